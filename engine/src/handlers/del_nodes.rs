use std::collections::BTreeMap;

use fleetctl_common::EngineError;
use fleetctl_types::{Action, ActionResult, Cluster, NodeId};

use super::{HandlerCtx, delete_nodes, outcome_to_result};

/// §4.7.5. Same pre-pass discipline as `add_nodes`: one filtering scan
/// producing survivors/failures, never mutated in place. Orphan nodes
/// (already detached) are silently dropped (R2). This is a detach, not a
/// destroy, so `delete_nodes` is called with `destroy = false`.
pub async fn handle(
    ctx: &HandlerCtx<'_>,
    action: &Action,
    cluster: &Cluster,
) -> Result<(ActionResult, String), EngineError> {
    let requested: Vec<NodeId> = action
        .inputs
        .get("nodes")
        .and_then(|v| v.as_array())
        .map(|arr| {
            arr.iter()
                .filter_map(|v| v.as_str().and_then(|s| s.parse().ok()))
                .collect()
        })
        .unwrap_or_default();

    let mut survivors = Vec::new();
    let mut failures: BTreeMap<NodeId, String> = BTreeMap::new();

    for node_id in requested {
        let node = match ctx.store.node_get(node_id).await {
            Ok(n) => n,
            Err(_) => {
                failures.insert(node_id, "Node not found".to_string());
                continue;
            }
        };

        if node.cluster_id.is_none() {
            continue; // already an orphan: no-op (R2)
        }
        survivors.push(node_id);
    }

    if !failures.is_empty() {
        let reason = failures
            .iter()
            .map(|(id, reason)| format!("{id}: {reason}"))
            .collect::<Vec<_>>()
            .join("; ");
        return Ok((ActionResult::Error, reason));
    }

    if survivors.is_empty() {
        return Ok((ActionResult::Ok, "Completed deleting nodes".to_string()));
    }

    let outcome = delete_nodes(ctx, action, &survivors, false).await?;
    let (result, reason) = outcome_to_result(&outcome);
    if result == ActionResult::Ok {
        Ok((ActionResult::Ok, "Completed deleting nodes".to_string()))
    } else {
        Ok((result, reason))
    }
}
