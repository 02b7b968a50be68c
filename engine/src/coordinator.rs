//! Waits for a parent action's DERIVED sub-actions to reach terminal
//! states. The only suspension point in the core outside of lock
//! acquisition: each iteration polls persisted status, yields via a
//! full-jitter backoff sleep, and re-checks.

use std::time::Duration;

use chrono::Utc;
use fleetctl_common::{EngineError, wait::backoff_full_jitter};
use fleetctl_types::{ActionId, ActionStatus};

use crate::traits::Persistence;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CoordinatorOutcome {
    Ok,
    Error(String),
    Cancel,
    Timeout,
}

pub struct Coordinator<'a> {
    store: &'a dyn Persistence,
    poll_interval: Duration,
}

impl<'a> Coordinator<'a> {
    pub fn new(store: &'a dyn Persistence, poll_interval: Duration) -> Self {
        Coordinator {
            store,
            poll_interval,
        }
    }

    /// Blocks until every id in `dependency_ids` reaches a terminal state,
    /// or until the parent action (`parent_id`) is cancelled or its
    /// deadline elapses. Precedence when multiple conditions are observed
    /// in the same poll: `FAIL > TIMEOUT > CANCEL > OK`.
    pub async fn wait_for_dependents(
        &self,
        parent_id: ActionId,
        dependency_ids: &[ActionId],
    ) -> Result<CoordinatorOutcome, EngineError> {
        if dependency_ids.is_empty() {
            return Ok(CoordinatorOutcome::Ok);
        }

        let mut attempt = 0usize;
        loop {
            let parent = self.store.action_get(parent_id).await?;

            let mut all_succeeded = true;
            let mut failure: Option<String> = None;
            for dep_id in dependency_ids {
                let dep = self.store.action_get(*dep_id).await?;
                match dep.status {
                    ActionStatus::Failed => {
                        failure = Some(format!("dependent action {dep_id} failed"));
                        break;
                    }
                    ActionStatus::Succeeded => {}
                    _ => all_succeeded = false,
                }
            }

            if let Some(reason) = failure {
                tracing::debug!(%parent_id, %reason, "coordinator observed a failed dependent");
                return Ok(CoordinatorOutcome::Error(reason));
            }

            if parent.deadline.is_some_and(|d| Utc::now() >= d) {
                tracing::debug!(%parent_id, "coordinator observed deadline elapsed");
                return Ok(CoordinatorOutcome::Timeout);
            }

            if parent.cancel_requested {
                tracing::debug!(%parent_id, "coordinator observed cancel request");
                return Ok(CoordinatorOutcome::Cancel);
            }

            if all_succeeded {
                return Ok(CoordinatorOutcome::Ok);
            }

            let delay = backoff_full_jitter(Duration::from_millis(100), self.poll_interval, attempt);
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }
}
