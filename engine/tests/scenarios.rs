//! End-to-end coverage of the six scenarios and several of the quantified
//! invariants, run entirely against the in-memory collaborators.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use fleetctl_common::EngineError;
use fleetctl_engine::fakes::{
    AllowAllClusterResourceDriver, AllowAllPolicy, AllowAllPolicyGate, InProcessDispatcher,
    MemoryLock, MemoryStore,
};
use fleetctl_engine::traits::{ClusterResourceDriver, NodeActionRunner, Persistence, Policy, PolicyGate};
use fleetctl_engine::{Engine, EngineConfig};
use fleetctl_types::{
    Action, ActionCause, ActionData, ActionKind, ActionResult, ActionStatus, ActionTarget,
    ClusterActionKind, ClusterPolicyBinding, ClusterStatus, Cluster, DeletionData, Node,
    NodeActionKind, NodeId, NodeStatus, PolicyCheckOutput, PolicyCheckStatus, PolicyPhase,
};
use rand::SeedableRng;
use rand::rngs::StdRng;
use uuid::Uuid;

fn new_cluster(min: i64, max: i64, desired: i64) -> Cluster {
    Cluster {
        id: Uuid::new_v4(),
        name: "web".to_string(),
        user: "alice".to_string(),
        project: "proj".to_string(),
        domain: "default".to_string(),
        profile_id: Uuid::new_v4(),
        min_size: min,
        max_size: max,
        desired_capacity: desired,
        status: ClusterStatus::Active,
        status_reason: String::new(),
        next_index: 0,
        updated_time: Utc::now(),
        policies: vec![],
    }
}

fn new_node(cluster_id: Uuid) -> Node {
    Node {
        id: Uuid::new_v4(),
        name: "seed".to_string(),
        cluster_id: Some(cluster_id),
        index: 0,
        profile_id: Uuid::new_v4(),
        status: NodeStatus::Active,
        data: BTreeMap::new(),
    }
}

fn new_action(target: ActionTarget, kind: ClusterActionKind, inputs: serde_json::Value) -> Action {
    Action {
        id: Uuid::new_v4(),
        target,
        kind: ActionKind::Cluster(kind),
        inputs,
        data: ActionData::default(),
        status: ActionStatus::Ready,
        cause: ActionCause::User,
        owner: None,
        start_time: None,
        deadline: Some(Utc::now() + chrono::Duration::seconds(30)),
        cancel_requested: false,
    }
}

/// Always succeeds after an optional delay, unless `fail` names the node.
struct ScriptedRunner {
    delay: Duration,
    slow: Vec<NodeId>,
}

#[async_trait]
impl NodeActionRunner for ScriptedRunner {
    async fn run(
        &self,
        _kind: NodeActionKind,
        node_id: NodeId,
        _inputs: serde_json::Value,
    ) -> Result<(), EngineError> {
        if self.slow.contains(&node_id) {
            tokio::time::sleep(self.delay).await;
        }
        Ok(())
    }
}

fn test_engine(
    store: Arc<MemoryStore>,
    runner: Arc<ScriptedRunner>,
) -> Engine {
    let lock = Arc::new(MemoryLock::new());
    let dispatcher = Arc::new(InProcessDispatcher::new(store.clone(), runner));
    let policy_gate = Arc::new(AllowAllPolicyGate);
    Engine::with_rng(
        store,
        lock,
        dispatcher,
        policy_gate,
        Arc::new(AllowAllClusterResourceDriver),
        Arc::new(AllowAllPolicy),
        EngineConfig {
            poll_interval: Duration::from_millis(20),
            default_deadline: Duration::from_secs(30),
        },
        StdRng::seed_from_u64(7),
    )
}

#[tokio::test]
async fn scenario_1_create_from_empty() {
    let store = Arc::new(MemoryStore::new());
    let cluster = new_cluster(0, 5, 3);
    store.seed_cluster(cluster.clone()).await;

    let runner = Arc::new(ScriptedRunner { delay: Duration::ZERO, slow: vec![] });
    let engine = test_engine(store.clone(), runner);

    let action = new_action(
        ActionTarget::Cluster(cluster.id),
        ClusterActionKind::ClusterCreate,
        serde_json::json!({}),
    );
    store.action_store(&action).await.unwrap();

    let (result, _reason) = engine.execute(action.id).await;
    assert_eq!(result, ActionResult::Ok);

    let nodes = store.node_get_all_by_cluster(cluster.id).await.unwrap();
    assert_eq!(nodes.len(), 3);
    let mut indices: Vec<_> = nodes.iter().map(|n| n.index).collect();
    indices.sort();
    assert_eq!(indices, vec![1, 2, 3]);
    for node in &nodes {
        assert_eq!(node.name, format!("node-{}-{:03}", cluster.id_prefix(), node.index));
    }

    let stored = store.cluster_get(cluster.id).await.unwrap();
    assert_eq!(stored.status, ClusterStatus::Active);
}

#[tokio::test]
async fn scenario_2_scale_out_by_two() {
    let store = Arc::new(MemoryStore::new());
    let mut cluster = new_cluster(0, 10, 3);
    cluster.status = ClusterStatus::Active;
    store.seed_cluster(cluster.clone()).await;
    for _ in 0..3 {
        store.seed_node(new_node(cluster.id)).await;
    }

    let runner = Arc::new(ScriptedRunner { delay: Duration::ZERO, slow: vec![] });
    let engine = test_engine(store.clone(), runner);

    let action = new_action(
        ActionTarget::Cluster(cluster.id),
        ClusterActionKind::ClusterScaleOut,
        serde_json::json!({ "count": 2 }),
    );
    store.action_store(&action).await.unwrap();

    let (result, _) = engine.execute(action.id).await;
    assert_eq!(result, ActionResult::Ok);

    let stored = store.cluster_get(cluster.id).await.unwrap();
    assert_eq!(stored.desired_capacity, 5);
    let nodes = store.node_get_all_by_cluster(cluster.id).await.unwrap();
    assert_eq!(nodes.len(), 5);
    assert_eq!(stored.status, ClusterStatus::Active);
}

#[tokio::test]
async fn scenario_3_resize_strict_rejection_b3() {
    let store = Arc::new(MemoryStore::new());
    let cluster = new_cluster(2, 5, 3);
    store.seed_cluster(cluster.clone()).await;

    let runner = Arc::new(ScriptedRunner { delay: Duration::ZERO, slow: vec![] });
    let engine = test_engine(store.clone(), runner);

    let action = new_action(
        ActionTarget::Cluster(cluster.id),
        ClusterActionKind::ClusterResize,
        serde_json::json!({ "adj_type": "EXACT_CAPACITY", "number": 1, "strict": true }),
    );
    store.action_store(&action).await.unwrap();

    let (result, reason) = engine.execute(action.id).await;
    assert_eq!(result, ActionResult::Error);
    assert!(reason.contains("min_size"), "reason was: {reason}");

    let stored = store.cluster_get(cluster.id).await.unwrap();
    assert_eq!(stored.desired_capacity, 3, "no persistent change on strict rejection");
    assert!(store.node_get_all_by_cluster(cluster.id).await.unwrap().is_empty());
}

/// A `PolicyGate` test double that hands the scale-in handler a fixed
/// `deletion` plan on the BEFORE phase, as a real scaling policy would.
struct FixedDeletionGate {
    candidates: Vec<NodeId>,
}

#[async_trait]
impl PolicyGate for FixedDeletionGate {
    async fn check(
        &self,
        _cluster_id: Uuid,
        phase: PolicyPhase,
    ) -> Result<PolicyCheckOutput, EngineError> {
        if phase != PolicyPhase::Before {
            return Ok(PolicyCheckOutput::default());
        }
        Ok(PolicyCheckOutput {
            status: PolicyCheckStatus::Ok,
            reason: String::new(),
            data: ActionData {
                deletion: Some(DeletionData {
                    count: Some(2),
                    destroy_after_delete: Some(true),
                    candidates: Some(self.candidates.clone()),
                }),
                ..ActionData::default()
            },
        })
    }
}

#[tokio::test]
async fn scenario_4_scale_in_honors_policy_candidates() {
    let store = Arc::new(MemoryStore::new());
    let mut cluster = new_cluster(0, 10, 4);
    cluster.status = ClusterStatus::Active;
    store.seed_cluster(cluster.clone()).await;

    let mut nodes = Vec::new();
    for _ in 0..4 {
        let node = new_node(cluster.id);
        store.seed_node(node.clone()).await;
        nodes.push(node);
    }
    let candidates = vec![nodes[1].id, nodes[3].id];

    let runner = Arc::new(ScriptedRunner { delay: Duration::ZERO, slow: vec![] });
    let lock = Arc::new(MemoryLock::new());
    let dispatcher = Arc::new(InProcessDispatcher::new(store.clone(), runner));
    let policy_gate = Arc::new(FixedDeletionGate { candidates: candidates.clone() });
    let engine = Engine::with_rng(
        store.clone(),
        lock,
        dispatcher,
        policy_gate,
        Arc::new(AllowAllClusterResourceDriver),
        Arc::new(AllowAllPolicy),
        EngineConfig {
            poll_interval: Duration::from_millis(20),
            default_deadline: Duration::from_secs(30),
        },
        StdRng::seed_from_u64(11),
    );

    let action = new_action(
        ActionTarget::Cluster(cluster.id),
        ClusterActionKind::ClusterScaleIn,
        serde_json::json!({}),
    );
    store.action_store(&action).await.unwrap();

    let (result, _) = engine.execute(action.id).await;
    assert_eq!(result, ActionResult::Ok);

    let stored = store.cluster_get(cluster.id).await.unwrap();
    assert_eq!(stored.desired_capacity, 2);

    let remaining = store.node_get_all_by_cluster(cluster.id).await.unwrap();
    let remaining_ids: Vec<_> = remaining.iter().map(|n| n.id).collect();
    assert!(!remaining_ids.contains(&candidates[0]));
    assert!(!remaining_ids.contains(&candidates[1]));
    assert_eq!(remaining.len(), 2);
}

#[tokio::test]
async fn scenario_5_delete_with_cancel_mid_flight() {
    let store = Arc::new(MemoryStore::new());
    let mut cluster = new_cluster(0, 10, 3);
    cluster.status = ClusterStatus::Active;
    store.seed_cluster(cluster.clone()).await;

    let mut nodes = Vec::new();
    for _ in 0..3 {
        let node = new_node(cluster.id);
        store.seed_node(node.clone()).await;
        nodes.push(node);
    }
    // Node 0 finishes immediately; the other two hang around long enough
    // for the test to observe the cancel before they settle.
    let slow = vec![nodes[1].id, nodes[2].id];
    let runner = Arc::new(ScriptedRunner { delay: Duration::from_millis(500), slow });
    let engine = Arc::new(test_engine(store.clone(), runner));

    let action = new_action(
        ActionTarget::Cluster(cluster.id),
        ClusterActionKind::ClusterDelete,
        serde_json::json!({}),
    );
    store.action_store(&action).await.unwrap();
    let action_id = action.id;

    let engine_handle = engine.clone();
    let join = tokio::spawn(async move { engine_handle.execute(action_id).await });

    // Give the fast NODE_DELETE a chance to settle, then request a cancel.
    tokio::time::sleep(Duration::from_millis(60)).await;
    let mut parent = store.action_get(action_id).await.unwrap();
    parent.cancel_requested = true;
    store.action_store(&parent).await.unwrap();

    let (result, reason) = join.await.unwrap();
    assert_eq!(result, ActionResult::Cancel);
    assert!(reason.to_lowercase().contains("cancel"), "reason was: {reason}");

    let stored = store.cluster_get(cluster.id).await.unwrap();
    assert_eq!(stored.status, ClusterStatus::Active);
    assert_eq!(stored.status_reason, "cancelled");
}

#[tokio::test]
async fn scenario_6_attach_conflicting_policy_type_i6() {
    let store = Arc::new(MemoryStore::new());
    let cluster = new_cluster(0, 10, 3);
    store.seed_cluster(cluster.clone()).await;

    let p1 = Uuid::new_v4();
    store
        .cluster_policy_store(
            cluster.id,
            ClusterPolicyBinding {
                policy_id: p1,
                policy_type: "senlin.policy.scaling".to_string(),
                priority: 0,
                cooldown: 0,
                level: 0,
                enabled: true,
                data: serde_json::Value::Null,
            },
        )
        .await
        .unwrap();

    let runner = Arc::new(ScriptedRunner { delay: Duration::ZERO, slow: vec![] });
    let engine = test_engine(store.clone(), runner);

    let p2 = Uuid::new_v4();
    let action = new_action(
        ActionTarget::Cluster(cluster.id),
        ClusterActionKind::ClusterAttachPolicy,
        serde_json::json!({ "policy_id": p2.to_string(), "policy_type": "senlin.policy.scaling" }),
    );
    store.action_store(&action).await.unwrap();

    let (result, _) = engine.execute(action.id).await;
    assert_eq!(result, ActionResult::Error);

    let bindings = store.cluster_policy_get_all(cluster.id).await.unwrap();
    assert_eq!(bindings.len(), 1, "I6: the binding table is never mutated on conflict");
    assert_eq!(bindings[0].policy_id, p1);
}

struct FailingClusterResourceDriver;

#[async_trait]
impl ClusterResourceDriver for FailingClusterResourceDriver {
    async fn create(&self, _cluster: &Cluster) -> Result<(), EngineError> {
        Err(EngineError::SubActionFailure("load balancer quota exceeded".to_string()))
    }
}

#[tokio::test]
async fn scenario_create_fails_when_cluster_resource_creation_fails() {
    let store = Arc::new(MemoryStore::new());
    let cluster = new_cluster(0, 5, 3);
    store.seed_cluster(cluster.clone()).await;

    let runner = Arc::new(ScriptedRunner { delay: Duration::ZERO, slow: vec![] });
    let lock = Arc::new(MemoryLock::new());
    let dispatcher = Arc::new(InProcessDispatcher::new(store.clone(), runner));
    let policy_gate = Arc::new(AllowAllPolicyGate);
    let engine = Engine::with_rng(
        store.clone(),
        lock,
        dispatcher,
        policy_gate,
        Arc::new(FailingClusterResourceDriver),
        Arc::new(AllowAllPolicy),
        EngineConfig {
            poll_interval: Duration::from_millis(20),
            default_deadline: Duration::from_secs(30),
        },
        StdRng::seed_from_u64(13),
    );

    let action = new_action(
        ActionTarget::Cluster(cluster.id),
        ClusterActionKind::ClusterCreate,
        serde_json::json!({}),
    );
    store.action_store(&action).await.unwrap();

    let (result, reason) = engine.execute(action.id).await;
    assert_eq!(result, ActionResult::Error);
    assert!(reason.contains("Cluster creation failed"), "reason was: {reason}");

    let stored = store.cluster_get(cluster.id).await.unwrap();
    assert_eq!(stored.status, ClusterStatus::Error);
    assert!(store.node_get_all_by_cluster(cluster.id).await.unwrap().is_empty());
}

struct RejectingPolicy;

#[async_trait]
impl Policy for RejectingPolicy {
    async fn attach(&self, _cluster: &Cluster) -> Result<(bool, serde_json::Value), EngineError> {
        Ok((false, serde_json::Value::Null))
    }

    async fn detach(&self, _cluster: &Cluster) -> Result<(bool, serde_json::Value), EngineError> {
        Ok((false, serde_json::Value::Null))
    }
}

#[tokio::test]
async fn scenario_attach_policy_fails_when_hook_rejects() {
    let store = Arc::new(MemoryStore::new());
    let cluster = new_cluster(0, 10, 3);
    store.seed_cluster(cluster.clone()).await;

    let runner = Arc::new(ScriptedRunner { delay: Duration::ZERO, slow: vec![] });
    let lock = Arc::new(MemoryLock::new());
    let dispatcher = Arc::new(InProcessDispatcher::new(store.clone(), runner));
    let policy_gate = Arc::new(AllowAllPolicyGate);
    let engine = Engine::with_rng(
        store.clone(),
        lock,
        dispatcher,
        policy_gate,
        Arc::new(AllowAllClusterResourceDriver),
        Arc::new(RejectingPolicy),
        EngineConfig {
            poll_interval: Duration::from_millis(20),
            default_deadline: Duration::from_secs(30),
        },
        StdRng::seed_from_u64(17),
    );

    let p1 = Uuid::new_v4();
    let action = new_action(
        ActionTarget::Cluster(cluster.id),
        ClusterActionKind::ClusterAttachPolicy,
        serde_json::json!({ "policy_id": p1.to_string(), "policy_type": "senlin.policy.scaling" }),
    );
    store.action_store(&action).await.unwrap();

    let (result, reason) = engine.execute(action.id).await;
    assert_eq!(result, ActionResult::Error);
    assert!(reason.contains("Failed attaching policy"), "reason was: {reason}");
    assert!(store.cluster_policy_get_all(cluster.id).await.unwrap().is_empty());
}
