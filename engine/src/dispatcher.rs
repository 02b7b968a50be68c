//! A bounded mpsc channel feeding a fixed pool of `tokio::task::spawn`ed
//! workers, mirroring the teacher's tokio-spawn-per-unit-of-work idiom.
//! `start_action` only enqueues an id; workers do the rest.

use std::sync::Arc;

use chrono::Utc;
use fleetctl_common::EngineError;
use fleetctl_types::{ActionId, ActionStatus};
use tokio::sync::mpsc;

use crate::traits::{Dispatcher, NodeActionRunner, Persistence};

const CHANNEL_CAPACITY: usize = 1024;

pub struct TokioDispatcher {
    tx: mpsc::Sender<ActionId>,
}

impl TokioDispatcher {
    /// Spawns `workers` tasks pulling from a shared channel. Each worker
    /// loads the action, flips it RUNNING, invokes `runner`, then persists
    /// the terminal status the runner reported.
    pub fn new(
        workers: usize,
        store: Arc<dyn Persistence>,
        runner: Arc<dyn NodeActionRunner>,
    ) -> Self {
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        let rx = Arc::new(tokio::sync::Mutex::new(rx));

        for worker_id in 0..workers.max(1) {
            let rx = rx.clone();
            let store = store.clone();
            let runner = runner.clone();
            tokio::spawn(async move {
                loop {
                    let action_id = {
                        let mut rx = rx.lock().await;
                        match rx.recv().await {
                            Some(id) => id,
                            None => return,
                        }
                    };
                    run_one(worker_id, &*store, &*runner, action_id).await;
                }
            });
        }

        TokioDispatcher { tx }
    }
}

impl Dispatcher for TokioDispatcher {
    fn start_action(&self, action_id: ActionId) {
        // Non-blocking per the contract: a full channel drops the send and
        // logs, rather than awaiting the worker pool.
        if let Err(err) = self.tx.try_send(action_id) {
            tracing::error!(%action_id, %err, "failed to enqueue action for dispatch");
        }
    }
}

/// Shared worker body, reused by [`InProcessDispatcher`] for fully
/// synchronous-feeling tests.
pub(crate) async fn run_action_once(
    store: &dyn Persistence,
    runner: &dyn NodeActionRunner,
    action_id: ActionId,
) {
    run_one(0, store, runner, action_id).await;
}

async fn run_one(
    worker_id: usize,
    store: &dyn Persistence,
    runner: &dyn NodeActionRunner,
    action_id: ActionId,
) {
    let mut action = match store.action_get(action_id).await {
        Ok(a) => a,
        Err(err) => {
            tracing::error!(%action_id, %err, "dispatcher could not load action");
            return;
        }
    };

    action.status = ActionStatus::Running;
    action.owner = Some(format!("worker-{worker_id}"));
    action.start_time = Some(Utc::now());
    if let Err(err) = store.action_store(&action).await {
        tracing::error!(%action_id, %err, "dispatcher could not persist RUNNING status");
        return;
    }

    let kind = match action.kind {
        fleetctl_types::ActionKind::Node(k) => k,
        fleetctl_types::ActionKind::Cluster(_) => {
            tracing::error!(%action_id, "dispatcher asked to run a cluster-level action");
            return;
        }
    };
    let node_id = action.target.id();

    let result: Result<(), EngineError> = runner.run(kind, node_id, action.inputs.clone()).await;

    action.status = match result {
        Ok(()) => ActionStatus::Succeeded,
        Err(ref err) => {
            tracing::warn!(%action_id, %err, "node action failed");
            ActionStatus::Failed
        }
    };
    if let Err(err) = store.action_store(&action).await {
        tracing::error!(%action_id, %err, "dispatcher could not persist terminal status");
    }
}
