//! One module per cluster operation (§4.7). The common shape — plan
//! sub-actions, dispatch, coordinate, interpret the verdict into a cluster
//! status transition — lives here as two shared helpers (`create_nodes`,
//! `delete_nodes`) that every handler built on node fan-out reuses, the
//! same way the source shares `_create_nodes`/`_delete_nodes` across
//! `do_create`/`do_resize` and `do_delete`/`do_add_nodes`/`do_del_nodes`.

mod add_nodes;
mod create;
mod del_nodes;
mod delete;
mod policy;
mod resize;
mod scale;
mod update;

use std::collections::BTreeMap;
use std::time::Duration;

use fleetctl_common::EngineError;
use fleetctl_types::{
    Action, ActionCause, ActionData, ActionId, ActionKind, ActionResult, ActionStatus,
    ActionTarget, Cluster, ClusterActionKind, Node, NodeActionKind, NodeId, NodeStatus,
};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use tokio::sync::Mutex as AsyncMutex;
use uuid::Uuid;

use crate::coordinator::{Coordinator, CoordinatorOutcome};
use crate::traits::{ClusterResourceDriver, Dispatcher, Persistence, Policy};

pub struct HandlerCtx<'a> {
    pub store: &'a dyn Persistence,
    pub dispatcher: &'a dyn Dispatcher,
    pub cluster_resource: &'a dyn ClusterResourceDriver,
    pub policy: &'a dyn Policy,
    pub rng: &'a AsyncMutex<StdRng>,
    pub poll_interval: Duration,
}

pub async fn dispatch(
    ctx: &HandlerCtx<'_>,
    kind: ClusterActionKind,
    action: &Action,
    cluster: &Cluster,
    policy_data: &ActionData,
) -> Result<(ActionResult, String), EngineError> {
    match kind {
        ClusterActionKind::ClusterCreate => create::handle(ctx, action, cluster, policy_data).await,
        ClusterActionKind::ClusterDelete => delete::handle(ctx, action, cluster, policy_data).await,
        ClusterActionKind::ClusterUpdate => update::handle(ctx, action, cluster).await,
        ClusterActionKind::ClusterAddNodes => add_nodes::handle(ctx, action, cluster).await,
        ClusterActionKind::ClusterDelNodes => del_nodes::handle(ctx, action, cluster).await,
        ClusterActionKind::ClusterResize => resize::handle(ctx, action, cluster).await,
        ClusterActionKind::ClusterScaleOut => scale::handle_out(ctx, action, cluster, policy_data).await,
        ClusterActionKind::ClusterScaleIn => scale::handle_in(ctx, action, cluster, policy_data).await,
        ClusterActionKind::ClusterAttachPolicy => policy::attach(ctx, action, cluster).await,
        ClusterActionKind::ClusterDetachPolicy => policy::detach(ctx, action, cluster).await,
        ClusterActionKind::ClusterUpdatePolicy => policy::update(ctx, action, cluster).await,
    }
}

impl<'a> HandlerCtx<'a> {
    async fn coordinate(
        &self,
        parent_id: ActionId,
        dependency_ids: &[ActionId],
    ) -> Result<CoordinatorOutcome, EngineError> {
        let coordinator = Coordinator::new(self.store, self.poll_interval);
        coordinator.wait_for_dependents(parent_id, dependency_ids).await
    }

    async fn spawn_child(
        &self,
        parent: &Action,
        kind: NodeActionKind,
        target: NodeId,
        inputs: serde_json::Value,
    ) -> Result<ActionId, EngineError> {
        let mut child = Action {
            id: Uuid::new_v4(),
            target: ActionTarget::Node(target),
            kind: ActionKind::Node(kind),
            inputs,
            data: ActionData::default(),
            status: ActionStatus::Init,
            cause: ActionCause::Derived,
            owner: None,
            start_time: None,
            deadline: parent.deadline,
            cancel_requested: false,
        };
        self.store.action_store(&child).await?;
        self.store.action_add_dependency(parent.id, child.id).await?;
        child.status = ActionStatus::Ready;
        self.store.action_store(&child).await?;
        self.dispatcher.start_action(child.id);
        Ok(child.id)
    }

    async fn pick_victims(&self, node_ids: &[NodeId], count: usize) -> Vec<NodeId> {
        let mut rng = self.rng.lock().await;
        let mut pool = node_ids.to_vec();
        pool.shuffle(&mut *rng);
        pool.truncate(count);
        pool
    }
}

/// Shared by CREATE and RESIZE's scale-up branch: allocates `count` fresh
/// nodes, one NODE_CREATE sub-action each, waits for them all, and records
/// the new node ids in the parent's scratch data on success.
async fn create_nodes(
    ctx: &HandlerCtx<'_>,
    parent: &Action,
    cluster: &Cluster,
    count: i64,
    placement: Option<&[String]>,
) -> Result<(CoordinatorOutcome, Vec<NodeId>), EngineError> {
    if count <= 0 {
        return Ok((CoordinatorOutcome::Ok, vec![]));
    }

    let mut node_ids = Vec::with_capacity(count as usize);
    let mut dependency_ids = Vec::with_capacity(count as usize);

    for m in 0..count {
        let index = ctx.store.next_node_index(cluster.id).await?;
        let node_id = Uuid::new_v4();
        let mut data = BTreeMap::new();
        if let Some(placement) = placement {
            if let Some(slot) = placement.get(m as usize) {
                data.insert("placement".to_string(), serde_json::json!(slot));
            }
        }
        let node = Node {
            id: node_id,
            name: format!("node-{}-{:03}", cluster.id_prefix(), index),
            cluster_id: Some(cluster.id),
            index,
            profile_id: cluster.profile_id,
            status: NodeStatus::Init,
            data,
        };
        ctx.store.node_store(&node).await?;
        node_ids.push(node_id);

        let dep_id = ctx
            .spawn_child(parent, NodeActionKind::NodeCreate, node_id, serde_json::Value::Null)
            .await?;
        dependency_ids.push(dep_id);
    }

    let outcome = ctx.coordinate(parent.id, &dependency_ids).await?;
    Ok((outcome, node_ids))
}

/// Shared by DELETE, ADD/DEL_NODES' removal path, and RESIZE/SCALE_IN's
/// scale-down branch. `destroy` picks NODE_DELETE (destructive) vs
/// NODE_LEAVE (detach only, membership removed but the node survives).
async fn delete_nodes(
    ctx: &HandlerCtx<'_>,
    parent: &Action,
    node_ids: &[NodeId],
    destroy: bool,
) -> Result<CoordinatorOutcome, EngineError> {
    if node_ids.is_empty() {
        return Ok(CoordinatorOutcome::Ok);
    }

    let kind = if destroy {
        NodeActionKind::NodeDelete
    } else {
        NodeActionKind::NodeLeave
    };

    let mut dependency_ids = Vec::with_capacity(node_ids.len());
    for node_id in node_ids {
        let dep_id = ctx
            .spawn_child(parent, kind, *node_id, serde_json::Value::Null)
            .await?;
        dependency_ids.push(dep_id);
    }

    ctx.coordinate(parent.id, &dependency_ids).await
}

fn outcome_to_result(outcome: &CoordinatorOutcome) -> (ActionResult, String) {
    match outcome {
        CoordinatorOutcome::Ok => (ActionResult::Ok, String::new()),
        CoordinatorOutcome::Error(reason) => (ActionResult::Error, reason.clone()),
        CoordinatorOutcome::Cancel => (ActionResult::Cancel, "action was cancelled".to_string()),
        CoordinatorOutcome::Timeout => (ActionResult::Timeout, "action timed out".to_string()),
    }
}
