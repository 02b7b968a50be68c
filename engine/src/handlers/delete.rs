use fleetctl_common::EngineError;
use fleetctl_types::{Action, ActionData, ActionResult, Cluster, ClusterStatus};

use super::{HandlerCtx, delete_nodes, outcome_to_result};
use crate::coordinator::CoordinatorOutcome;

/// §4.7.2: ACTIVE -> DELETING, destroy every node, then tear down the
/// cluster object itself. A cancel mid-flight leaves outstanding
/// NODE_DELETEs running and restores the cluster to ACTIVE (abandoned, not
/// rolled back).
pub async fn handle(
    ctx: &HandlerCtx<'_>,
    action: &Action,
    cluster: &Cluster,
    _policy_data: &ActionData,
) -> Result<(ActionResult, String), EngineError> {
    let mut cluster = cluster.clone();
    cluster.status = ClusterStatus::Deleting;
    cluster.status_reason = "Deletion in progress".to_string();
    ctx.store.cluster_store(&cluster).await?;

    let nodes = ctx.store.node_get_all_by_cluster(cluster.id).await?;
    let node_ids: Vec<_> = nodes.iter().map(|n| n.id).collect();

    let outcome = delete_nodes(ctx, action, &node_ids, true).await?;

    match &outcome {
        CoordinatorOutcome::Ok => {
            ctx.store.cluster_delete(cluster.id).await?;
            Ok((ActionResult::Ok, "Cluster deletion succeeded".to_string()))
        }
        CoordinatorOutcome::Cancel => {
            cluster.status = ClusterStatus::Active;
            cluster.status_reason = "cancelled".to_string();
            ctx.store.cluster_store(&cluster).await?;
            Ok(outcome_to_result(&outcome))
        }
        CoordinatorOutcome::Error(_) | CoordinatorOutcome::Timeout => {
            cluster.status = ClusterStatus::Warning;
            cluster.status_reason = "Deletion in progress".to_string();
            ctx.store.cluster_store(&cluster).await?;
            Ok(outcome_to_result(&outcome))
        }
    }
}
