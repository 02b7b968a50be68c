//! §4.8: the single operation surface the core exposes — resolve the
//! cluster, acquire its lock (forced only for CLUSTER_DELETE), run the
//! BEFORE policy check, dispatch to a handler, run the AFTER policy check,
//! always release the lock.

use std::sync::Arc;
use std::time::Duration;

use fleetctl_common::EngineError;
use fleetctl_types::{
    ActionId, ActionKind, ActionResult, ActionTarget, ClusterActionKind, LockScope,
    PolicyCheckStatus, PolicyPhase,
};
use rand::SeedableRng;
use rand::rngs::StdRng;
use tokio::sync::Mutex as AsyncMutex;
use tracing::Instrument;

use crate::handlers::{self, HandlerCtx};
use crate::traits::{
    ClusterLock, ClusterResourceDriver, Dispatcher, Persistence, Policy, PolicyGate,
};

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub poll_interval: Duration,
    pub default_deadline: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            poll_interval: Duration::from_secs(1),
            default_deadline: Duration::from_secs(300),
        }
    }
}

/// Wires the collaborator traits together. One `Engine` instance serves
/// any number of concurrent `execute` calls; each acquires the cluster
/// lock independently.
pub struct Engine {
    store: Arc<dyn Persistence>,
    lock: Arc<dyn ClusterLock>,
    dispatcher: Arc<dyn Dispatcher>,
    policy_gate: Arc<dyn PolicyGate>,
    cluster_resource: Arc<dyn ClusterResourceDriver>,
    policy: Arc<dyn Policy>,
    config: EngineConfig,
    rng: AsyncMutex<StdRng>,
}

impl Engine {
    pub fn new(
        store: Arc<dyn Persistence>,
        lock: Arc<dyn ClusterLock>,
        dispatcher: Arc<dyn Dispatcher>,
        policy_gate: Arc<dyn PolicyGate>,
        cluster_resource: Arc<dyn ClusterResourceDriver>,
        policy: Arc<dyn Policy>,
        config: EngineConfig,
    ) -> Self {
        Engine::with_rng(
            store,
            lock,
            dispatcher,
            policy_gate,
            cluster_resource,
            policy,
            config,
            StdRng::from_os_rng(),
        )
    }

    /// Seeded constructor used by tests wanting deterministic victim
    /// selection (§9's REDESIGN FLAG on seedable RNGs).
    pub fn with_rng(
        store: Arc<dyn Persistence>,
        lock: Arc<dyn ClusterLock>,
        dispatcher: Arc<dyn Dispatcher>,
        policy_gate: Arc<dyn PolicyGate>,
        cluster_resource: Arc<dyn ClusterResourceDriver>,
        policy: Arc<dyn Policy>,
        config: EngineConfig,
        rng: StdRng,
    ) -> Self {
        Engine {
            store,
            lock,
            dispatcher,
            policy_gate,
            cluster_resource,
            policy,
            config,
            rng: AsyncMutex::new(rng),
        }
    }

    pub async fn execute(&self, action_id: ActionId) -> (ActionResult, String) {
        let span = tracing::info_span!("execute", %action_id);
        self.execute_inner(action_id).instrument(span).await
    }

    async fn execute_inner(&self, action_id: ActionId) -> (ActionResult, String) {
        let action = match self.store.action_get(action_id).await {
            Ok(a) => a,
            Err(err) => {
                tracing::error!(%action_id, %err, "action not found");
                return (ActionResult::Error, err.to_string());
            }
        };

        let (cluster_id, kind) = match (action.target, action.kind) {
            (ActionTarget::Cluster(id), ActionKind::Cluster(kind)) => (id, kind),
            _ => {
                let err = EngineError::ActionNotSupported(
                    "execute only accepts cluster-level actions".to_string(),
                );
                return (err.result(), err.to_string());
            }
        };

        let (result, reason) = self.execute_for_kind(&action, cluster_id, kind).await;
        fleetctl_common::metrics::record_action_result(kind.as_str(), result_label(result));
        (result, reason)
    }

    async fn execute_for_kind(
        &self,
        action: &fleetctl_types::Action,
        cluster_id: fleetctl_types::ClusterId,
        kind: ClusterActionKind,
    ) -> (ActionResult, String) {
        let action_id = action.id;

        let cluster = match self.store.cluster_get(cluster_id).await {
            Ok(c) => c,
            Err(err) => {
                tracing::error!(%cluster_id, %err, "cluster not found");
                return (ActionResult::Error, err.to_string());
            }
        };

        let forced = kind == ClusterActionKind::ClusterDelete;
        match self
            .lock
            .acquire(cluster_id, action_id, LockScope::Cluster, forced)
            .await
        {
            Ok(true) => {}
            Ok(false) => {
                let err = EngineError::LockFailed(cluster_id.to_string());
                tracing::warn!(%cluster_id, "failed to acquire cluster lock");
                return (err.result(), err.to_string());
            }
            Err(err) => return (err.result(), err.to_string()),
        }

        tracing::info!(%cluster_id, forced, "cluster lock acquired");
        let outcome = self.run_locked(action, &cluster, kind).await;

        if let Err(err) = self
            .lock
            .release(cluster_id, action_id, LockScope::Cluster)
            .await
        {
            tracing::error!(%cluster_id, %err, "failed to release cluster lock");
        } else {
            tracing::info!(%cluster_id, "cluster lock released");
        }

        outcome
    }

    async fn run_locked(
        &self,
        action: &fleetctl_types::Action,
        cluster: &fleetctl_types::Cluster,
        kind: ClusterActionKind,
    ) -> (ActionResult, String) {
        let pre = match self.policy_gate.check(cluster.id, PolicyPhase::Before).await {
            Ok(v) => v,
            Err(err) => {
                let err = EngineError::PolicyPreFail(err.to_string());
                return (err.result(), err.to_string());
            }
        };
        if pre.status != PolicyCheckStatus::Ok {
            tracing::warn!(cluster_id = %cluster.id, reason = %pre.reason, "BEFORE policy check failed");
            let err = EngineError::PolicyPreFail(pre.reason);
            return (err.result(), err.to_string());
        }

        let ctx = HandlerCtx {
            store: &*self.store,
            dispatcher: &*self.dispatcher,
            cluster_resource: &*self.cluster_resource,
            policy: &*self.policy,
            rng: &self.rng,
            poll_interval: self.config.poll_interval,
        };

        let (result, reason) = match handlers::dispatch(&ctx, kind, action, cluster, &pre.data).await {
            Ok(pair) => pair,
            Err(err) => {
                tracing::warn!(cluster_id = %cluster.id, %err, "handler failed");
                (err.result(), err.to_string())
            }
        };

        if result != ActionResult::Ok {
            return (result, reason);
        }

        match self.policy_gate.check(cluster.id, PolicyPhase::After).await {
            Ok(post) if post.status != PolicyCheckStatus::Ok => {
                tracing::warn!(cluster_id = %cluster.id, reason = %post.reason, "AFTER policy check failed");
                let err = EngineError::PolicyPostFail(post.reason);
                (err.result(), err.to_string())
            }
            Ok(_) => (result, reason),
            Err(err) => {
                let err = EngineError::PolicyPostFail(err.to_string());
                (err.result(), err.to_string())
            }
        }
    }
}

fn result_label(result: ActionResult) -> &'static str {
    match result {
        ActionResult::Ok => "ok",
        ActionResult::Error => "error",
        ActionResult::Cancel => "cancel",
        ActionResult::Timeout => "timeout",
        ActionResult::Retry => "retry",
        ActionResult::Failed => "failed",
    }
}
