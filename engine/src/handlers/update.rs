use fleetctl_common::EngineError;
use fleetctl_types::{Action, ActionResult, Cluster, ClusterStatus, NodeActionKind};

use super::{HandlerCtx, outcome_to_result};

/// §4.7.3: fan a NODE_UPDATE out to every current member carrying the new
/// profile id, then commit the profile change onto the cluster itself.
pub async fn handle(
    ctx: &HandlerCtx<'_>,
    action: &Action,
    cluster: &Cluster,
) -> Result<(ActionResult, String), EngineError> {
    let new_profile_id: Option<uuid::Uuid> = action
        .inputs
        .get("new_profile_id")
        .and_then(|v| v.as_str())
        .and_then(|s| s.parse().ok());
    let Some(new_profile_id) = new_profile_id else {
        return Err(EngineError::InvalidCapacity(
            "new_profile_id is required for CLUSTER_UPDATE".to_string(),
        ));
    };

    let nodes = ctx.store.node_get_all_by_cluster(cluster.id).await?;
    if nodes.is_empty() {
        let mut cluster = cluster.clone();
        cluster.profile_id = new_profile_id;
        cluster.status = ClusterStatus::Active;
        ctx.store.cluster_store(&cluster).await?;
        return Ok((ActionResult::Ok, "Cluster update succeeded".to_string()));
    }

    let mut dependency_ids = Vec::with_capacity(nodes.len());
    for node in &nodes {
        let dep_id = ctx
            .spawn_child(
                action,
                NodeActionKind::NodeUpdate,
                node.id,
                serde_json::json!({ "new_profile_id": new_profile_id }),
            )
            .await?;
        dependency_ids.push(dep_id);
    }

    let outcome = ctx.coordinate(action.id, &dependency_ids).await?;
    let (result, reason) = outcome_to_result(&outcome);
    if result != ActionResult::Ok {
        return Ok((result, reason));
    }

    let mut cluster = cluster.clone();
    cluster.profile_id = new_profile_id;
    cluster.status = ClusterStatus::Active;
    ctx.store.cluster_store(&cluster).await?;
    Ok((ActionResult::Ok, "Cluster update succeeded".to_string()))
}
