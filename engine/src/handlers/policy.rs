use fleetctl_common::EngineError;
use fleetctl_types::{Action, ActionResult, Cluster, ClusterPolicyBinding, PolicyId, PolicyPatch};

use super::HandlerCtx;

fn policy_id(action: &Action) -> Option<PolicyId> {
    action
        .inputs
        .get("policy_id")
        .and_then(|v| v.as_str())
        .and_then(|s| s.parse().ok())
}

/// §4.7.8 ATTACH. A binding already present for this exact policy id is a
/// no-op (OK); a different policy id of the same *type* is a conflict
/// (I6: the binding table is never mutated in that case).
pub async fn attach(
    ctx: &HandlerCtx<'_>,
    action: &Action,
    cluster: &Cluster,
) -> Result<(ActionResult, String), EngineError> {
    let Some(policy_id) = policy_id(action) else {
        return Err(EngineError::PolicyNotSpecified);
    };
    let policy_type = action
        .inputs
        .get("policy_type")
        .and_then(|v| v.as_str())
        .unwrap_or("")
        .to_string();

    let existing = ctx.store.cluster_policy_get_all(cluster.id).await?;
    for binding in &existing {
        if binding.policy_id == policy_id {
            return Ok((ActionResult::Ok, "Policy already attached".to_string()));
        }
        if binding.policy_type == policy_type {
            return Err(EngineError::PolicyTypeConflict(policy_type));
        }
    }

    let (accepted, data) = ctx.policy.attach(cluster).await?;
    if !accepted {
        return Ok((ActionResult::Error, "Failed attaching policy".to_string()));
    }

    let priority = action.inputs.get("priority").and_then(|v| v.as_i64()).unwrap_or(0) as i32;
    let cooldown = action.inputs.get("cooldown").and_then(|v| v.as_i64()).unwrap_or(0) as i32;
    let level = action.inputs.get("level").and_then(|v| v.as_i64()).unwrap_or(0) as i32;
    let enabled = action.inputs.get("enabled").and_then(|v| v.as_bool()).unwrap_or(true);

    let binding = ClusterPolicyBinding {
        policy_id,
        policy_type,
        priority,
        cooldown,
        level,
        enabled,
        data,
    };
    ctx.store.cluster_policy_store(cluster.id, binding).await?;

    Ok((ActionResult::Ok, "Policy attached.".to_string()))
}

/// §4.7.8 DETACH.
pub async fn detach(
    ctx: &HandlerCtx<'_>,
    action: &Action,
    cluster: &Cluster,
) -> Result<(ActionResult, String), EngineError> {
    let Some(policy_id) = policy_id(action) else {
        return Err(EngineError::PolicyNotSpecified);
    };

    let (accepted, _data) = ctx.policy.detach(cluster).await?;
    if !accepted {
        return Ok((ActionResult::Error, "Failed detaching policy".to_string()));
    }

    ctx.store.cluster_policy_remove(cluster.id, policy_id).await?;
    Ok((ActionResult::Ok, "Policy detached.".to_string()))
}

/// §4.7.8 UPDATE. Applies whichever subset of fields is provided; missing
/// fields are left untouched on the binding.
pub async fn update(
    ctx: &HandlerCtx<'_>,
    action: &Action,
    cluster: &Cluster,
) -> Result<(ActionResult, String), EngineError> {
    let Some(policy_id) = policy_id(action) else {
        return Err(EngineError::PolicyNotSpecified);
    };

    let patch = PolicyPatch {
        cooldown: action.inputs.get("cooldown").and_then(|v| v.as_i64()).map(|n| n as i32),
        level: action.inputs.get("level").and_then(|v| v.as_i64()).map(|n| n as i32),
        priority: action.inputs.get("priority").and_then(|v| v.as_i64()).map(|n| n as i32),
        enabled: action.inputs.get("enabled").and_then(|v| v.as_bool()),
    };

    ctx.store
        .cluster_policy_update(cluster.id, policy_id, patch)
        .await?;

    Ok((ActionResult::Ok, "Policy updated.".to_string()))
}
