//! In-memory collaborator implementations used by tests and the default
//! dev profile. No I/O; a `tokio::sync::RwLock<HashMap<...>>` per record
//! kind, the same shape the teacher reaches for in its own fast-path test
//! doubles.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use fleetctl_common::EngineError;
use fleetctl_types::{
    Action, ActionId, Cluster, ClusterId, ClusterPolicyBinding, LockScope, Node, NodeId,
    PolicyCheckOutput, PolicyId, PolicyPatch, PolicyPhase,
};
use tokio::sync::RwLock;

use crate::traits::{ClusterLock, ClusterResourceDriver, Persistence, Policy, PolicyGate};

#[derive(Default)]
pub struct MemoryStore {
    clusters: RwLock<HashMap<ClusterId, Cluster>>,
    nodes: RwLock<HashMap<NodeId, Node>>,
    actions: RwLock<HashMap<ActionId, Action>>,
    dependencies: RwLock<HashMap<ActionId, Vec<ActionId>>>,
    policies: RwLock<HashMap<(ClusterId, PolicyId), ClusterPolicyBinding>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        MemoryStore::default()
    }

    pub async fn seed_cluster(&self, cluster: Cluster) {
        self.clusters.write().await.insert(cluster.id, cluster);
    }

    pub async fn seed_node(&self, node: Node) {
        self.nodes.write().await.insert(node.id, node);
    }
}

#[async_trait]
impl Persistence for MemoryStore {
    async fn cluster_get(&self, id: ClusterId) -> Result<Cluster, EngineError> {
        self.clusters
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or_else(|| EngineError::NotFound(format!("cluster {id}")))
    }

    async fn cluster_store(&self, cluster: &Cluster) -> Result<(), EngineError> {
        self.clusters
            .write()
            .await
            .insert(cluster.id, cluster.clone());
        Ok(())
    }

    async fn cluster_delete(&self, id: ClusterId) -> Result<(), EngineError> {
        self.clusters.write().await.remove(&id);
        Ok(())
    }

    async fn node_get(&self, id: NodeId) -> Result<Node, EngineError> {
        self.nodes
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or_else(|| EngineError::NotFound(format!("node {id}")))
    }

    async fn node_get_all_by_cluster(&self, cluster_id: ClusterId) -> Result<Vec<Node>, EngineError> {
        Ok(self
            .nodes
            .read()
            .await
            .values()
            .filter(|n| n.cluster_id == Some(cluster_id))
            .cloned()
            .collect())
    }

    async fn node_store(&self, node: &Node) -> Result<(), EngineError> {
        self.nodes.write().await.insert(node.id, node.clone());
        Ok(())
    }

    async fn node_delete(&self, id: NodeId) -> Result<(), EngineError> {
        self.nodes.write().await.remove(&id);
        Ok(())
    }

    async fn next_node_index(&self, cluster_id: ClusterId) -> Result<i64, EngineError> {
        let mut clusters = self.clusters.write().await;
        let cluster = clusters
            .get_mut(&cluster_id)
            .ok_or_else(|| EngineError::NotFound(format!("cluster {cluster_id}")))?;
        cluster.next_index += 1;
        Ok(cluster.next_index)
    }

    async fn action_get(&self, id: ActionId) -> Result<Action, EngineError> {
        self.actions
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or_else(|| EngineError::NotFound(format!("action {id}")))
    }

    async fn action_store(&self, action: &Action) -> Result<(), EngineError> {
        self.actions.write().await.insert(action.id, action.clone());
        Ok(())
    }

    async fn action_add_dependency(
        &self,
        dependent: ActionId,
        dependency: ActionId,
    ) -> Result<(), EngineError> {
        self.dependencies
            .write()
            .await
            .entry(dependent)
            .or_default()
            .push(dependency);
        if let Some(action) = self.actions.write().await.get_mut(&dependent) {
            action.status = fleetctl_types::ActionStatus::Waiting;
        }
        Ok(())
    }

    async fn action_dependencies(&self, dependent: ActionId) -> Result<Vec<ActionId>, EngineError> {
        Ok(self
            .dependencies
            .read()
            .await
            .get(&dependent)
            .cloned()
            .unwrap_or_default())
    }

    async fn cluster_policy_get_all(
        &self,
        cluster_id: ClusterId,
    ) -> Result<Vec<ClusterPolicyBinding>, EngineError> {
        Ok(self
            .policies
            .read()
            .await
            .iter()
            .filter(|((cid, _), _)| *cid == cluster_id)
            .map(|(_, binding)| binding.clone())
            .collect())
    }

    async fn cluster_policy_store(
        &self,
        cluster_id: ClusterId,
        binding: ClusterPolicyBinding,
    ) -> Result<(), EngineError> {
        self.policies
            .write()
            .await
            .insert((cluster_id, binding.policy_id), binding);
        Ok(())
    }

    async fn cluster_policy_remove(
        &self,
        cluster_id: ClusterId,
        policy_id: PolicyId,
    ) -> Result<(), EngineError> {
        self.policies.write().await.remove(&(cluster_id, policy_id));
        Ok(())
    }

    async fn cluster_policy_update(
        &self,
        cluster_id: ClusterId,
        policy_id: PolicyId,
        patch: PolicyPatch,
    ) -> Result<(), EngineError> {
        let mut policies = self.policies.write().await;
        let binding = policies
            .get_mut(&(cluster_id, policy_id))
            .ok_or_else(|| EngineError::NotFound(format!("policy binding {policy_id}")))?;
        if let Some(cooldown) = patch.cooldown {
            binding.cooldown = cooldown;
        }
        if let Some(level) = patch.level {
            binding.level = level;
        }
        if let Some(priority) = patch.priority {
            binding.priority = priority;
        }
        if let Some(enabled) = patch.enabled {
            binding.enabled = enabled;
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryLock {
    owners: RwLock<HashMap<(ClusterId, LockScope), ActionId>>,
}

impl MemoryLock {
    pub fn new() -> Self {
        MemoryLock::default()
    }
}

#[async_trait]
impl ClusterLock for MemoryLock {
    async fn acquire(
        &self,
        cluster_id: ClusterId,
        owner: ActionId,
        scope: LockScope,
        forced: bool,
    ) -> Result<bool, EngineError> {
        let mut owners = self.owners.write().await;
        let key = (cluster_id, scope);
        match owners.get(&key) {
            Some(existing) if *existing != owner && !forced => Ok(false),
            _ => {
                owners.insert(key, owner);
                Ok(true)
            }
        }
    }

    async fn release(
        &self,
        cluster_id: ClusterId,
        owner: ActionId,
        scope: LockScope,
    ) -> Result<(), EngineError> {
        let mut owners = self.owners.write().await;
        let key = (cluster_id, scope);
        if owners.get(&key) == Some(&owner) {
            owners.remove(&key);
        }
        Ok(())
    }
}

/// Default policy gate used whenever no real policy implementations are
/// configured. Always OK, never contributes scratch data.
#[derive(Default)]
pub struct AllowAllPolicyGate;

#[async_trait]
impl PolicyGate for AllowAllPolicyGate {
    async fn check(
        &self,
        _cluster_id: ClusterId,
        _phase: PolicyPhase,
    ) -> Result<PolicyCheckOutput, EngineError> {
        Ok(PolicyCheckOutput::default())
    }
}

/// Default cluster resource driver used whenever no real one is
/// configured. There is no cluster-level resource beyond the nodes
/// themselves, so creation always succeeds.
#[derive(Default)]
pub struct AllowAllClusterResourceDriver;

#[async_trait]
impl ClusterResourceDriver for AllowAllClusterResourceDriver {
    async fn create(&self, _cluster: &Cluster) -> Result<(), EngineError> {
        Ok(())
    }
}

/// Default policy hook used whenever no real policy implementations are
/// configured. Every attach/detach is accepted with no scratch data.
#[derive(Default)]
pub struct AllowAllPolicy;

#[async_trait]
impl Policy for AllowAllPolicy {
    async fn attach(&self, _cluster: &Cluster) -> Result<(bool, serde_json::Value), EngineError> {
        Ok((true, serde_json::Value::Null))
    }

    async fn detach(&self, _cluster: &Cluster) -> Result<(bool, serde_json::Value), EngineError> {
        Ok((true, serde_json::Value::Null))
    }
}

/// Fans `start_action` straight into the worker's own task instead of a
/// channel — useful for deterministic single-threaded tests where the
/// caller wants to `.await` a fully settled action graph without racing a
/// background pool.
pub struct InProcessDispatcher<R: crate::traits::NodeActionRunner + 'static> {
    store: Arc<dyn Persistence>,
    runner: Arc<R>,
}

impl<R: crate::traits::NodeActionRunner + 'static> InProcessDispatcher<R> {
    pub fn new(store: Arc<dyn Persistence>, runner: Arc<R>) -> Self {
        InProcessDispatcher { store, runner }
    }
}

impl<R: crate::traits::NodeActionRunner + 'static> crate::traits::Dispatcher
    for InProcessDispatcher<R>
{
    fn start_action(&self, action_id: ActionId) {
        let store = self.store.clone();
        let runner = self.runner.clone();
        tokio::spawn(async move {
            crate::dispatcher::run_action_once(&*store, &*runner, action_id).await;
        });
    }
}
