//! Redis-backed [`ClusterLock`]. Ownership is a `SET key owner NX EX ttl`;
//! release is a `GET`-then-`DEL` compare so a stale caller can't clear
//! someone else's lock. Forced acquire (`CLUSTER_DELETE`) skips `NX` and
//! simply overwrites, matching the engine's preempt-on-delete contract.

use std::time::Duration;

use async_trait::async_trait;
use deadpool_redis::Pool;
use fleetctl_common::EngineError;
use fleetctl_engine::traits::ClusterLock;
use fleetctl_types::{ActionId, ClusterId, LockScope};
use redis::AsyncCommands;

fn redis_err(context: &str, err: impl std::fmt::Display) -> EngineError {
    EngineError::PersistenceFailure(format!("{context}: {err}"))
}

fn lock_key(cluster_id: ClusterId, scope: LockScope) -> String {
    match scope {
        LockScope::Cluster => format!("fleetctl:lock:cluster:{cluster_id}"),
    }
}

pub struct RedisLock {
    pool: Pool,
    ttl: Duration,
}

impl RedisLock {
    pub fn new(pool: Pool, ttl: Duration) -> Self {
        RedisLock { pool, ttl }
    }
}

#[async_trait]
impl ClusterLock for RedisLock {
    async fn acquire(
        &self,
        cluster_id: ClusterId,
        owner: ActionId,
        scope: LockScope,
        forced: bool,
    ) -> Result<bool, EngineError> {
        let mut conn = self
            .pool
            .get()
            .await
            .map_err(|e| redis_err("redis connection", e))?;
        let key = lock_key(cluster_id, scope);
        let owner = owner.to_string();
        let ttl_secs = self.ttl.as_secs().max(1);

        if forced {
            let _: () = conn
                .set_ex(&key, &owner, ttl_secs)
                .await
                .map_err(|e| redis_err("forced lock acquire", e))?;
            tracing::info!(%cluster_id, "forced lock override");
            return Ok(true);
        }

        let options = redis::SetOptions::default()
            .with_expiration(redis::SetExpiry::EX(ttl_secs))
            .conditional_set(redis::ExistenceCheck::NX);
        let result: Option<String> = conn
            .set_options(&key, &owner, options)
            .await
            .map_err(|e| redis_err("lock acquire", e))?;
        Ok(result.is_some())
    }

    async fn release(
        &self,
        cluster_id: ClusterId,
        owner: ActionId,
        scope: LockScope,
    ) -> Result<(), EngineError> {
        let mut conn = self
            .pool
            .get()
            .await
            .map_err(|e| redis_err("redis connection", e))?;
        let key = lock_key(cluster_id, scope);
        let owner = owner.to_string();

        let current: Option<String> = conn
            .get(&key)
            .await
            .map_err(|e| redis_err("lock release read", e))?;
        match current {
            Some(ref held_by) if held_by == &owner => {
                let _: () = conn
                    .del(&key)
                    .await
                    .map_err(|e| redis_err("lock release delete", e))?;
                Ok(())
            }
            Some(_) => {
                tracing::warn!(%cluster_id, "release no-op: lock is held by a different owner");
                Ok(())
            }
            None => Ok(()),
        }
    }
}
