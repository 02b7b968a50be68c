use fleetctl_common::EngineError;
use fleetctl_types::{Action, ActionData, ActionResult, Cluster, ClusterStatus};

use super::{HandlerCtx, create_nodes, outcome_to_result};

/// §4.7.1: INIT -> CREATING, then the cluster's own resource-level
/// creation, then one NODE_CREATE per `desired_capacity`.
pub async fn handle(
    ctx: &HandlerCtx<'_>,
    action: &Action,
    cluster: &Cluster,
    policy_data: &ActionData,
) -> Result<(ActionResult, String), EngineError> {
    let mut cluster = cluster.clone();
    cluster.status = ClusterStatus::Creating;
    ctx.store.cluster_store(&cluster).await?;

    if let Err(err) = ctx.cluster_resource.create(&cluster).await {
        cluster.status = ClusterStatus::Error;
        cluster.status_reason = "Cluster creation failed".to_string();
        ctx.store.cluster_store(&cluster).await?;
        return Ok((ActionResult::Error, format!("Cluster creation failed: {err}")));
    }

    let placement = policy_data.placement.as_deref();
    let (outcome, node_ids) =
        create_nodes(ctx, action, &cluster, cluster.desired_capacity, placement).await?;
    let (result, reason) = outcome_to_result(&outcome);

    if result == ActionResult::Ok {
        cluster.status = ClusterStatus::Active;
        cluster.status_reason = "Cluster creation succeeded".to_string();
        ctx.store.cluster_store(&cluster).await?;
        let mut stored = action.clone();
        stored.data.nodes = Some(node_ids);
        ctx.store.action_store(&stored).await?;
        Ok((ActionResult::Ok, "Cluster creation succeeded".to_string()))
    } else {
        cluster.status = ClusterStatus::Error;
        cluster.status_reason = reason.clone();
        ctx.store.cluster_store(&cluster).await?;
        Ok((result, reason))
    }
}
