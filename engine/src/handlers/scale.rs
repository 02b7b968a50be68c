use fleetctl_common::EngineError;
use fleetctl_types::{Action, ActionData, ActionResult, Cluster, ClusterStatus};

use super::{HandlerCtx, create_nodes, delete_nodes, outcome_to_result};

/// §4.7.7 (scale-out half). Uses the count a deletion/creation policy left
/// in scratch data if present, else `inputs.count` (default 1, 0 is a
/// legitimate "no scaling needed" outcome).
pub async fn handle_out(
    ctx: &HandlerCtx<'_>,
    action: &Action,
    cluster: &Cluster,
    policy_data: &ActionData,
) -> Result<(ActionResult, String), EngineError> {
    let count = policy_data
        .creation
        .as_ref()
        .and_then(|c| c.count)
        .unwrap_or_else(|| action.inputs.get("count").and_then(|v| v.as_i64()).unwrap_or(1));

    if count == 0 {
        return Ok((
            ActionResult::Ok,
            "No scaling needed based on policy checking".to_string(),
        ));
    }

    let nodes = ctx.store.node_get_all_by_cluster(cluster.id).await?;
    let mut cluster = cluster.clone();
    cluster.desired_capacity = nodes.len() as i64 + count;
    ctx.store.cluster_store(&cluster).await?;

    let (outcome, _) = create_nodes(ctx, action, &cluster, count, None).await?;
    let (result, reason) = outcome_to_result(&outcome);

    if result == ActionResult::Ok {
        cluster.status = ClusterStatus::Active;
        ctx.store.cluster_store(&cluster).await?;
        Ok((ActionResult::Ok, "Cluster scaling succeeded".to_string()))
    } else {
        cluster.status = ClusterStatus::Error;
        ctx.store.cluster_store(&cluster).await?;
        Ok((result, reason))
    }
}

/// §4.7.7 (scale-in half). Honors policy-supplied `deletion.candidates`
/// when present; otherwise picks victims uniformly at random.
pub async fn handle_in(
    ctx: &HandlerCtx<'_>,
    action: &Action,
    cluster: &Cluster,
    policy_data: &ActionData,
) -> Result<(ActionResult, String), EngineError> {
    let deletion = policy_data.deletion.as_ref();
    let count = deletion
        .and_then(|d| d.count)
        .unwrap_or_else(|| action.inputs.get("count").and_then(|v| v.as_i64()).unwrap_or(1));

    if count == 0 {
        return Ok((
            ActionResult::Ok,
            "No scaling needed based on policy checking".to_string(),
        ));
    }

    let nodes = ctx.store.node_get_all_by_cluster(cluster.id).await?;
    let mut cluster = cluster.clone();
    cluster.desired_capacity = nodes.len() as i64 - count;
    ctx.store.cluster_store(&cluster).await?;

    let candidates = deletion
        .and_then(|d| d.candidates.clone())
        .filter(|c| !c.is_empty());

    let victims = match candidates {
        Some(candidates) => candidates,
        None => {
            ctx.pick_victims(&nodes.iter().map(|n| n.id).collect::<Vec<_>>(), count as usize)
                .await
        }
    };

    let outcome = delete_nodes(ctx, action, &victims, true).await?;
    let (result, reason) = outcome_to_result(&outcome);

    if result == ActionResult::Ok {
        cluster.status = ClusterStatus::Active;
        ctx.store.cluster_store(&cluster).await?;
        Ok((ActionResult::Ok, "Cluster scaling succeeded".to_string()))
    } else {
        cluster.status = ClusterStatus::Error;
        ctx.store.cluster_store(&cluster).await?;
        Ok((result, reason))
    }
}
