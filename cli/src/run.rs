use std::io::Read;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use chrono::Utc;
use fleetctl_engine::dispatcher::TokioDispatcher;
use fleetctl_engine::fakes::{AllowAllClusterResourceDriver, AllowAllPolicy, AllowAllPolicyGate};
use fleetctl_engine::{Engine, EngineConfig};
use fleetctl_lock_redis::RedisLock;
use fleetctl_store_postgres::PostgresStore;
use fleetctl_types::{
    Action, ActionCause, ActionData, ActionId, ActionKind, ActionStatus, ActionTarget,
    ClusterActionKind,
};
use owo_colors::OwoColorize;
use uuid::Uuid;

use crate::args::RunArgs;
use crate::simulator::SimulatedNodeRunner;

fn parse_cluster_action_kind(raw: &str) -> Result<ClusterActionKind> {
    Ok(match raw {
        "CLUSTER_CREATE" => ClusterActionKind::ClusterCreate,
        "CLUSTER_DELETE" => ClusterActionKind::ClusterDelete,
        "CLUSTER_UPDATE" => ClusterActionKind::ClusterUpdate,
        "CLUSTER_ADD_NODES" => ClusterActionKind::ClusterAddNodes,
        "CLUSTER_DEL_NODES" => ClusterActionKind::ClusterDelNodes,
        "CLUSTER_RESIZE" => ClusterActionKind::ClusterResize,
        "CLUSTER_SCALE_OUT" => ClusterActionKind::ClusterScaleOut,
        "CLUSTER_SCALE_IN" => ClusterActionKind::ClusterScaleIn,
        "CLUSTER_ATTACH_POLICY" => ClusterActionKind::ClusterAttachPolicy,
        "CLUSTER_DETACH_POLICY" => ClusterActionKind::ClusterDetachPolicy,
        "CLUSTER_UPDATE_POLICY" => ClusterActionKind::ClusterUpdatePolicy,
        other => bail!("unrecognized action kind: {other}"),
    })
}

pub async fn run(args: RunArgs) -> Result<()> {
    let kind = parse_cluster_action_kind(&args.action_kind)?;

    let inputs_raw = match args.inputs {
        Some(ref s) => s.clone(),
        None => {
            let mut buf = String::new();
            std::io::stdin()
                .read_to_string(&mut buf)
                .context("failed to read action inputs from stdin")?;
            buf
        }
    };
    let inputs: serde_json::Value =
        serde_json::from_str(&inputs_raw).context("action inputs must be valid JSON")?;

    let pg_pool = fleetctl_common::postgres::create_pool(args.postgres.clone()).await;
    fleetctl_store_postgres::init_schema(&pg_pool)
        .await
        .context("failed to initialize postgres schema")?;
    let store = Arc::new(PostgresStore::new(pg_pool));

    let redis_pool = fleetctl_common::redis::init_redis(&args.redis).await;
    let lock = Arc::new(RedisLock::new(
        redis_pool,
        Duration::from_secs(args.lock_ttl_secs),
    ));

    let runner = Arc::new(SimulatedNodeRunner {
        delay: Duration::from_millis(50),
    });
    let dispatcher = Arc::new(TokioDispatcher::new(
        args.engine.workers,
        store.clone(),
        runner,
    ));

    let policy_gate = Arc::new(AllowAllPolicyGate);
    let cluster_resource = Arc::new(AllowAllClusterResourceDriver);
    let policy = Arc::new(AllowAllPolicy);

    let config = EngineConfig {
        poll_interval: Duration::from_millis(args.engine.poll_interval_ms),
        default_deadline: Duration::from_secs(args.engine.default_deadline_secs.max(0) as u64),
    };
    let engine = Engine::new(
        store.clone(),
        lock,
        dispatcher,
        policy_gate,
        cluster_resource,
        policy,
        config,
    );

    let action_id: ActionId = Uuid::new_v4();
    let action = Action {
        id: action_id,
        target: ActionTarget::Cluster(args.cluster_id),
        kind: ActionKind::Cluster(kind),
        inputs,
        data: ActionData::default(),
        status: ActionStatus::Ready,
        cause: ActionCause::User,
        owner: None,
        start_time: None,
        deadline: Some(Utc::now() + chrono::Duration::seconds(args.engine.default_deadline_secs)),
        cancel_requested: false,
    };
    store
        .action_store(&action)
        .await
        .context("failed to persist submitted action")?;

    tracing::info!(%action_id, cluster_id = %args.cluster_id, kind = %args.action_kind, "submitting action");
    let (result, reason) = engine.execute(action_id).await;

    println!("{} {:?}: {}", "result:".green().bold(), result, reason);
    Ok(())
}
