use std::collections::BTreeMap;

use fleetctl_common::EngineError;
use fleetctl_types::{Action, ActionResult, Cluster, NodeActionKind, NodeId};

use super::{HandlerCtx, outcome_to_result};

/// §4.7.4. Pre-validation is a single pass producing two disjoint sets
/// (survivors, failures) rather than mutating the input list while
/// iterating it (see the design notes on the source's list-mutation bug).
/// One NODE_JOIN is dispatched per survivor, targeting that survivor —
/// not whatever node the validation loop last inspected.
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

        if node.cluster_id == Some(cluster.id) {
            continue; // already a member: silent no-op (R1)
        }
        if let Some(owner) = node.cluster_id {
            failures.insert(node_id, format!("Node already owned by cluster {owner}"));
            continue;
        }
        if !node.joinable() {
            failures.insert(node_id, "Node not in ACTIVE status".to_string());
            continue;
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
        return Ok((ActionResult::Ok, "Completed adding nodes".to_string()));
    }

    let mut dependency_ids = Vec::with_capacity(survivors.len());
    for node_id in &survivors {
        let dep_id = ctx
            .spawn_child(
                action,
                NodeActionKind::NodeJoin,
                *node_id,
                serde_json::json!({ "cluster_id": cluster.id }),
            )
            .await?;
        dependency_ids.push(dep_id);
    }

    let outcome = ctx.coordinate(action.id, &dependency_ids).await?;
    let (result, reason) = outcome_to_result(&outcome);
    if result != ActionResult::Ok {
        return Ok((result, reason));
    }

    let mut stored = action.clone();
    stored.data.nodes = Some(survivors);
    ctx.store.action_store(&stored).await?;
    Ok((ActionResult::Ok, "Completed adding nodes".to_string()))
}
