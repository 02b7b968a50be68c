//! Collaborator interfaces the core consumes. Each is a thin `async_trait`
//! so that real implementations (Postgres, Redis, an in-process worker
//! pool) and the in-memory `fakes` used by tests are interchangeable.

use async_trait::async_trait;
use fleetctl_common::EngineError;
use fleetctl_types::{
    Action, ActionId, Cluster, ClusterId, ClusterPolicyBinding, LockScope, Node, NodeActionKind,
    NodeId, PolicyCheckOutput, PolicyId, PolicyPatch, PolicyPhase,
};

/// Durable record store for clusters, nodes, actions, and their
/// dependency/policy-binding edges. `NotFound`/`Conflict` are the only
/// error kinds a caller should branch on; everything else propagates.
#[async_trait]
pub trait Persistence: Send + Sync {
    async fn cluster_get(&self, id: ClusterId) -> Result<Cluster, EngineError>;
    async fn cluster_store(&self, cluster: &Cluster) -> Result<(), EngineError>;
    async fn cluster_delete(&self, id: ClusterId) -> Result<(), EngineError>;

    async fn node_get(&self, id: NodeId) -> Result<Node, EngineError>;
    async fn node_get_all_by_cluster(&self, cluster_id: ClusterId) -> Result<Vec<Node>, EngineError>;
    async fn node_store(&self, node: &Node) -> Result<(), EngineError>;
    async fn node_delete(&self, id: NodeId) -> Result<(), EngineError>;

    /// Allocates and persists the next `index` for a new node in `cluster_id`,
    /// bumping `Cluster::next_index` atomically. Monotone, never reused.
    async fn next_node_index(&self, cluster_id: ClusterId) -> Result<i64, EngineError>;

    async fn action_get(&self, id: ActionId) -> Result<Action, EngineError>;
    async fn action_store(&self, action: &Action) -> Result<(), EngineError>;

    /// Records `dependent depends on dependency` and marks `dependent`
    /// `WAITING` in the same write.
    async fn action_add_dependency(
        &self,
        dependent: ActionId,
        dependency: ActionId,
    ) -> Result<(), EngineError>;
    async fn action_dependencies(&self, dependent: ActionId) -> Result<Vec<ActionId>, EngineError>;

    async fn cluster_policy_get_all(
        &self,
        cluster_id: ClusterId,
    ) -> Result<Vec<ClusterPolicyBinding>, EngineError>;
    async fn cluster_policy_store(
        &self,
        cluster_id: ClusterId,
        binding: ClusterPolicyBinding,
    ) -> Result<(), EngineError>;
    async fn cluster_policy_remove(
        &self,
        cluster_id: ClusterId,
        policy_id: PolicyId,
    ) -> Result<(), EngineError>;
    async fn cluster_policy_update(
        &self,
        cluster_id: ClusterId,
        policy_id: PolicyId,
        patch: PolicyPatch,
    ) -> Result<(), EngineError>;
}

/// Named mutex keyed by `(cluster_id, scope)`. Non-forced acquire is
/// non-blocking: it returns `false` immediately on contention rather than
/// queuing. Forced acquire preempts any existing owner and is reserved for
/// `CLUSTER_DELETE` (see the design note in the crate root docs).
#[async_trait]
pub trait ClusterLock: Send + Sync {
    async fn acquire(
        &self,
        cluster_id: ClusterId,
        owner: ActionId,
        scope: LockScope,
        forced: bool,
    ) -> Result<bool, EngineError>;

    /// Releases only if `owner` still holds the lock; otherwise a no-op.
    async fn release(
        &self,
        cluster_id: ClusterId,
        owner: ActionId,
        scope: LockScope,
    ) -> Result<(), EngineError>;
}

/// Fire-and-forget handoff of a READY action to a worker pool. `start_action`
/// must never await the action's completion.
pub trait Dispatcher: Send + Sync {
    fn start_action(&self, action_id: ActionId);
}

/// Pre/post-action policy evaluation. `check` runs every enabled binding for
/// `cluster_id` at `phase` in ascending priority order and folds their
/// verdicts into one [`PolicyCheckOutput`].
#[async_trait]
pub trait PolicyGate: Send + Sync {
    async fn check(
        &self,
        cluster_id: ClusterId,
        phase: PolicyPhase,
    ) -> Result<PolicyCheckOutput, EngineError>;
}

/// The opaque per-node executor. Out of scope per the purpose statement;
/// the core only relies on it reporting a terminal outcome.
#[async_trait]
pub trait NodeActionRunner: Send + Sync {
    async fn run(
        &self,
        kind: NodeActionKind,
        node_id: NodeId,
        inputs: serde_json::Value,
    ) -> Result<(), EngineError>;
}

/// Cluster-level resource provisioning, invoked once by CLUSTER_CREATE
/// before any per-node fan-out. This is the cluster's own non-node state
/// (e.g. a load balancer, a security group) — distinct from, and run
/// ahead of, the per-node executor behind [`NodeActionRunner`].
#[async_trait]
pub trait ClusterResourceDriver: Send + Sync {
    async fn create(&self, cluster: &Cluster) -> Result<(), EngineError>;
}

/// Per-policy attach/detach hooks, called once each by ATTACH_POLICY and
/// DETACH_POLICY after the binding-table checks pass. The returned `bool`
/// is the hook's own accept/reject verdict; the `Value` is scratch data
/// the hook wants recorded on the binding.
#[async_trait]
pub trait Policy: Send + Sync {
    async fn attach(&self, cluster: &Cluster) -> Result<(bool, serde_json::Value), EngineError>;
    async fn detach(&self, cluster: &Cluster) -> Result<(bool, serde_json::Value), EngineError>;
}
