use fleetctl_common::EngineError;
use fleetctl_types::{Action, ActionResult, AdjustmentType, Cluster, ClusterStatus};

use super::{HandlerCtx, create_nodes, delete_nodes, outcome_to_result};

fn input_i64(action: &Action, key: &str) -> Option<i64> {
    action.inputs.get(key).and_then(|v| v.as_i64())
}

fn input_adjustment_type(action: &Action) -> Option<AdjustmentType> {
    match action.inputs.get("adj_type").and_then(|v| v.as_str()) {
        Some("EXACT_CAPACITY") => Some(AdjustmentType::ExactCapacity),
        Some("CHANGE_IN_CAPACITY") => Some(AdjustmentType::ChangeInCapacity),
        Some("CHANGE_IN_PERCENTAGE") => Some(AdjustmentType::ChangeInPercentage),
        _ => None,
    }
}

/// §4.7.6. Compute a tentative desired capacity, truncate it unless
/// `strict`, validate the resulting bounds, persist them, then fan out
/// creates or deletes to close the gap between the node count and the new
/// desired capacity.
pub async fn handle(
    ctx: &HandlerCtx<'_>,
    action: &Action,
    cluster: &Cluster,
) -> Result<(ActionResult, String), EngineError> {
    let min_size = input_i64(action, "min_size");
    let max_size = input_i64(action, "max_size");
    let min_step = input_i64(action, "min_step");
    let strict = action
        .inputs
        .get("strict")
        .and_then(|v| v.as_bool())
        .unwrap_or(false);
    let adj_type = input_adjustment_type(action);

    let (mut desired, desired_given) = match adj_type {
        Some(adj_type) => {
            let number = input_i64(action, "number").ok_or_else(|| {
                EngineError::InvalidCapacity("number is required when adj_type is set".to_string())
            })?;
            (
                crate::capacity::calculate_desired(cluster.desired_capacity, adj_type, number, min_step),
                true,
            )
        }
        None => (cluster.desired_capacity, false),
    };

    if !strict {
        desired = crate::capacity::truncate_desired(cluster, desired, min_size, max_size);
    }

    crate::capacity::validate(cluster, desired, desired_given, min_size, max_size, strict)
        .map_err(EngineError::InvalidCapacity)?;

    let mut cluster = cluster.clone();
    let mut changed = false;
    if let Some(min_size) = min_size {
        if min_size != cluster.min_size {
            cluster.min_size = min_size;
            changed = true;
        }
    }
    if let Some(max_size) = max_size {
        if max_size != cluster.max_size {
            cluster.max_size = max_size;
            changed = true;
        }
    }
    if desired_given && desired != cluster.desired_capacity {
        cluster.desired_capacity = desired;
        changed = true;
    }
    if changed {
        cluster.updated_time = chrono::Utc::now();
        cluster.status_reason = "Cluster properties updated.".to_string();
        ctx.store.cluster_store(&cluster).await?;
    }

    let nodes = ctx.store.node_get_all_by_cluster(cluster.id).await?;
    let current = nodes.len() as i64;
    let desired = cluster.desired_capacity;
    let delta = desired - current;

    let outcome = if delta < 0 {
        let victims = ctx
            .pick_victims(&nodes.iter().map(|n| n.id).collect::<Vec<_>>(), (-delta) as usize)
            .await;
        delete_nodes(ctx, action, &victims, true).await?
    } else if delta > 0 {
        let (outcome, _) = create_nodes(ctx, action, &cluster, delta, None).await?;
        outcome
    } else {
        crate::coordinator::CoordinatorOutcome::Ok
    };

    let (result, reason) = outcome_to_result(&outcome);
    if result != ActionResult::Ok {
        return Ok((result, reason));
    }

    cluster.status = ClusterStatus::Active;
    ctx.store.cluster_store(&cluster).await?;
    Ok((ActionResult::Ok, "Cluster resize succeeded".to_string()))
}
