//! Postgres-backed [`Persistence`], grounded in the teacher's
//! `meta::db` shape: bootstrap the schema with `CREATE TABLE IF NOT
//! EXISTS` on startup, then parameterized CRUD against a `deadpool-postgres`
//! pool. Optimistic concurrency on `clusters`/`actions` is a `version`
//! column compared-and-swapped on every update.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use deadpool_postgres::Pool;
use fleetctl_common::EngineError;
use fleetctl_engine::traits::Persistence;
use fleetctl_types::{
    Action, ActionCause, ActionData, ActionId, ActionKind, ActionStatus, ActionTarget,
    ClusterActionKind, ClusterPolicyBinding, ClusterStatus, Cluster, ClusterId, Node,
    NodeActionKind, NodeId, NodeStatus, PolicyId, PolicyPatch,
};
use uuid::Uuid;

fn pg_err(context: &str, err: impl std::fmt::Display) -> EngineError {
    EngineError::PersistenceFailure(format!("{context}: {err}"))
}

/// Creates the schema if absent. Safe to call on every process start.
pub async fn init_schema(pool: &Pool) -> Result<(), EngineError> {
    let client = pool.get().await.map_err(|e| pg_err("db connection", e))?;

    client
        .batch_execute(
            r#"
            CREATE TABLE IF NOT EXISTS clusters (
                id UUID PRIMARY KEY,
                name TEXT NOT NULL,
                user_name TEXT NOT NULL,
                project TEXT NOT NULL,
                domain TEXT NOT NULL,
                profile_id UUID NOT NULL,
                min_size BIGINT NOT NULL,
                max_size BIGINT NOT NULL,
                desired_capacity BIGINT NOT NULL,
                status TEXT NOT NULL,
                status_reason TEXT NOT NULL DEFAULT '',
                next_index BIGINT NOT NULL DEFAULT 0,
                updated_time TIMESTAMPTZ NOT NULL,
                version BIGINT NOT NULL DEFAULT 0
            );

            CREATE TABLE IF NOT EXISTS cluster_policies (
                cluster_id UUID NOT NULL REFERENCES clusters(id) ON DELETE CASCADE,
                policy_id UUID NOT NULL,
                policy_type TEXT NOT NULL,
                priority INT NOT NULL,
                cooldown INT NOT NULL,
                level INT NOT NULL,
                enabled BOOLEAN NOT NULL,
                data JSONB,
                PRIMARY KEY (cluster_id, policy_id)
            );

            CREATE TABLE IF NOT EXISTS nodes (
                id UUID PRIMARY KEY,
                cluster_id UUID REFERENCES clusters(id) ON DELETE CASCADE,
                node_index BIGINT NOT NULL,
                profile_id UUID NOT NULL,
                status TEXT NOT NULL,
                data JSONB
            );
            CREATE INDEX IF NOT EXISTS idx_nodes_cluster_id ON nodes (cluster_id);

            CREATE TABLE IF NOT EXISTS actions (
                id UUID PRIMARY KEY,
                target_kind TEXT NOT NULL,
                target_id UUID NOT NULL,
                kind TEXT NOT NULL,
                inputs JSONB NOT NULL,
                data JSONB NOT NULL,
                status TEXT NOT NULL,
                cause TEXT NOT NULL,
                owner TEXT,
                start_time TIMESTAMPTZ,
                deadline TIMESTAMPTZ,
                cancel_requested BOOLEAN NOT NULL DEFAULT FALSE,
                version BIGINT NOT NULL DEFAULT 0
            );

            CREATE TABLE IF NOT EXISTS action_dependencies (
                dependent UUID NOT NULL,
                dependency UUID NOT NULL,
                PRIMARY KEY (dependent, dependency)
            );
            "#,
        )
        .await
        .map_err(|e| pg_err("failed to initialize schema", e))?;

    tracing::info!("store-postgres schema initialized");
    Ok(())
}

pub struct PostgresStore {
    pool: Pool,
}

impl PostgresStore {
    pub fn new(pool: Pool) -> Self {
        PostgresStore { pool }
    }
}

fn cluster_status_to_str(s: ClusterStatus) -> &'static str {
    match s {
        ClusterStatus::Init => "INIT",
        ClusterStatus::Creating => "CREATING",
        ClusterStatus::Active => "ACTIVE",
        ClusterStatus::Updating => "UPDATING",
        ClusterStatus::Deleting => "DELETING",
        ClusterStatus::Error => "ERROR",
        ClusterStatus::Warning => "WARNING",
    }
}

fn cluster_status_from_str(s: &str) -> ClusterStatus {
    match s {
        "CREATING" => ClusterStatus::Creating,
        "ACTIVE" => ClusterStatus::Active,
        "UPDATING" => ClusterStatus::Updating,
        "DELETING" => ClusterStatus::Deleting,
        "ERROR" => ClusterStatus::Error,
        "WARNING" => ClusterStatus::Warning,
        _ => ClusterStatus::Init,
    }
}

fn node_status_to_str(s: NodeStatus) -> &'static str {
    match s {
        NodeStatus::Init => "INIT",
        NodeStatus::Active => "ACTIVE",
        NodeStatus::Error => "ERROR",
    }
}

fn node_status_from_str(s: &str) -> NodeStatus {
    match s {
        "ACTIVE" => NodeStatus::Active,
        "ERROR" => NodeStatus::Error,
        _ => NodeStatus::Init,
    }
}

fn action_status_to_str(s: ActionStatus) -> &'static str {
    match s {
        ActionStatus::Init => "INIT",
        ActionStatus::Waiting => "WAITING",
        ActionStatus::Ready => "READY",
        ActionStatus::Running => "RUNNING",
        ActionStatus::Succeeded => "SUCCEEDED",
        ActionStatus::Failed => "FAILED",
        ActionStatus::Cancelled => "CANCELLED",
    }
}

fn action_status_from_str(s: &str) -> ActionStatus {
    match s {
        "WAITING" => ActionStatus::Waiting,
        "READY" => ActionStatus::Ready,
        "RUNNING" => ActionStatus::Running,
        "SUCCEEDED" => ActionStatus::Succeeded,
        "FAILED" => ActionStatus::Failed,
        "CANCELLED" => ActionStatus::Cancelled,
        _ => ActionStatus::Init,
    }
}

fn action_cause_to_str(c: ActionCause) -> &'static str {
    match c {
        ActionCause::User => "USER",
        ActionCause::Derived => "DERIVED",
    }
}

fn action_cause_from_str(s: &str) -> ActionCause {
    match s {
        "DERIVED" => ActionCause::Derived,
        _ => ActionCause::User,
    }
}

fn node_action_kind_to_str(k: NodeActionKind) -> &'static str {
    match k {
        NodeActionKind::NodeCreate => "NODE_CREATE",
        NodeActionKind::NodeDelete => "NODE_DELETE",
        NodeActionKind::NodeJoin => "NODE_JOIN",
        NodeActionKind::NodeLeave => "NODE_LEAVE",
        NodeActionKind::NodeUpdate => "NODE_UPDATE",
    }
}

fn action_kind_from_str(target_kind: &str, kind: &str) -> Option<ActionKind> {
    if target_kind == "cluster" {
        let k = match kind {
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
            _ => return None,
        };
        Some(ActionKind::Cluster(k))
    } else {
        let k = match kind {
            "NODE_CREATE" => NodeActionKind::NodeCreate,
            "NODE_DELETE" => NodeActionKind::NodeDelete,
            "NODE_JOIN" => NodeActionKind::NodeJoin,
            "NODE_LEAVE" => NodeActionKind::NodeLeave,
            "NODE_UPDATE" => NodeActionKind::NodeUpdate,
            _ => return None,
        };
        Some(ActionKind::Node(k))
    }
}

#[async_trait]
impl Persistence for PostgresStore {
    async fn cluster_get(&self, id: ClusterId) -> Result<Cluster, EngineError> {
        let client = self.pool.get().await.map_err(|e| pg_err("db connection", e))?;
        let row = client
            .query_opt(
                "SELECT id, name, user_name, project, domain, profile_id, min_size, max_size, \
                 desired_capacity, status, status_reason, next_index, updated_time \
                 FROM clusters WHERE id = $1",
                &[&id],
            )
            .await
            .map_err(|e| pg_err("cluster_get", e))?
            .ok_or_else(|| EngineError::NotFound(format!("cluster {id}")))?;

        let policies = self.cluster_policy_get_all(id).await?;

        Ok(Cluster {
            id: row.get("id"),
            name: row.get("name"),
            user: row.get("user_name"),
            project: row.get("project"),
            domain: row.get("domain"),
            profile_id: row.get("profile_id"),
            min_size: row.get("min_size"),
            max_size: row.get("max_size"),
            desired_capacity: row.get("desired_capacity"),
            status: cluster_status_from_str(row.get("status")),
            status_reason: row.get("status_reason"),
            next_index: row.get("next_index"),
            updated_time: row.get("updated_time"),
            policies,
        })
    }

    async fn cluster_store(&self, cluster: &Cluster) -> Result<(), EngineError> {
        let client = self.pool.get().await.map_err(|e| pg_err("db connection", e))?;
        client
            .execute(
                "INSERT INTO clusters (id, name, user_name, project, domain, profile_id, \
                 min_size, max_size, desired_capacity, status, status_reason, next_index, \
                 updated_time, version) \
                 VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12,$13,1) \
                 ON CONFLICT (id) DO UPDATE SET \
                 name = EXCLUDED.name, user_name = EXCLUDED.user_name, \
                 project = EXCLUDED.project, domain = EXCLUDED.domain, \
                 profile_id = EXCLUDED.profile_id, min_size = EXCLUDED.min_size, \
                 max_size = EXCLUDED.max_size, desired_capacity = EXCLUDED.desired_capacity, \
                 status = EXCLUDED.status, status_reason = EXCLUDED.status_reason, \
                 next_index = EXCLUDED.next_index, updated_time = EXCLUDED.updated_time, \
                 version = clusters.version + 1",
                &[
                    &cluster.id,
                    &cluster.name,
                    &cluster.user,
                    &cluster.project,
                    &cluster.domain,
                    &cluster.profile_id,
                    &cluster.min_size,
                    &cluster.max_size,
                    &cluster.desired_capacity,
                    &cluster_status_to_str(cluster.status),
                    &cluster.status_reason,
                    &cluster.next_index,
                    &cluster.updated_time,
                ],
            )
            .await
            .map_err(|e| pg_err("cluster_store", e))?;
        Ok(())
    }

    async fn cluster_delete(&self, id: ClusterId) -> Result<(), EngineError> {
        let client = self.pool.get().await.map_err(|e| pg_err("db connection", e))?;
        client
            .execute("DELETE FROM clusters WHERE id = $1", &[&id])
            .await
            .map_err(|e| pg_err("cluster_delete", e))?;
        Ok(())
    }

    async fn node_get(&self, id: NodeId) -> Result<Node, EngineError> {
        let client = self.pool.get().await.map_err(|e| pg_err("db connection", e))?;
        let row = client
            .query_opt(
                "SELECT id, cluster_id, node_index, profile_id, status, data FROM nodes WHERE id = $1",
                &[&id],
            )
            .await
            .map_err(|e| pg_err("node_get", e))?
            .ok_or_else(|| EngineError::NotFound(format!("node {id}")))?;
        Ok(row_to_node(&row))
    }

    async fn node_get_all_by_cluster(&self, cluster_id: ClusterId) -> Result<Vec<Node>, EngineError> {
        let client = self.pool.get().await.map_err(|e| pg_err("db connection", e))?;
        let rows = client
            .query(
                "SELECT id, cluster_id, node_index, profile_id, status, data FROM nodes WHERE cluster_id = $1",
                &[&cluster_id],
            )
            .await
            .map_err(|e| pg_err("node_get_all_by_cluster", e))?;
        Ok(rows.iter().map(row_to_node).collect())
    }

    async fn node_store(&self, node: &Node) -> Result<(), EngineError> {
        let client = self.pool.get().await.map_err(|e| pg_err("db connection", e))?;
        let data = serde_json::to_value(&node.data).unwrap_or(serde_json::Value::Null);
        client
            .execute(
                "INSERT INTO nodes (id, cluster_id, node_index, profile_id, status, data) \
                 VALUES ($1,$2,$3,$4,$5,$6) \
                 ON CONFLICT (id) DO UPDATE SET \
                 cluster_id = EXCLUDED.cluster_id, node_index = EXCLUDED.node_index, \
                 profile_id = EXCLUDED.profile_id, status = EXCLUDED.status, data = EXCLUDED.data",
                &[
                    &node.id,
                    &node.cluster_id,
                    &node.index,
                    &node.profile_id,
                    &node_status_to_str(node.status),
                    &data,
                ],
            )
            .await
            .map_err(|e| pg_err("node_store", e))?;
        Ok(())
    }

    async fn node_delete(&self, id: NodeId) -> Result<(), EngineError> {
        let client = self.pool.get().await.map_err(|e| pg_err("db connection", e))?;
        client
            .execute("DELETE FROM nodes WHERE id = $1", &[&id])
            .await
            .map_err(|e| pg_err("node_delete", e))?;
        Ok(())
    }

    async fn next_node_index(&self, cluster_id: ClusterId) -> Result<i64, EngineError> {
        let client = self.pool.get().await.map_err(|e| pg_err("db connection", e))?;
        let row = client
            .query_opt(
                "UPDATE clusters SET next_index = next_index + 1 WHERE id = $1 RETURNING next_index",
                &[&cluster_id],
            )
            .await
            .map_err(|e| pg_err("next_node_index", e))?
            .ok_or_else(|| EngineError::NotFound(format!("cluster {cluster_id}")))?;
        Ok(row.get("next_index"))
    }

    async fn action_get(&self, id: ActionId) -> Result<Action, EngineError> {
        let client = self.pool.get().await.map_err(|e| pg_err("db connection", e))?;
        let row = client
            .query_opt(
                "SELECT id, target_kind, target_id, kind, inputs, data, status, cause, owner, \
                 start_time, deadline, cancel_requested FROM actions WHERE id = $1",
                &[&id],
            )
            .await
            .map_err(|e| pg_err("action_get", e))?
            .ok_or_else(|| EngineError::NotFound(format!("action {id}")))?;
        row_to_action(&row).ok_or_else(|| {
            EngineError::PersistenceFailure(format!("action {id} has an unrecognized kind"))
        })
    }

    async fn action_store(&self, action: &Action) -> Result<(), EngineError> {
        let client = self.pool.get().await.map_err(|e| pg_err("db connection", e))?;
        let (target_kind, target_id): (&str, Uuid) = match action.target {
            ActionTarget::Cluster(id) => ("cluster", id),
            ActionTarget::Node(id) => ("node", id),
        };
        let kind_str = match action.kind {
            ActionKind::Cluster(k) => k.as_str(),
            ActionKind::Node(k) => node_action_kind_to_str(k),
        };
        let data = serde_json::to_value(&action.data).unwrap_or(serde_json::Value::Null);
        client
            .execute(
                "INSERT INTO actions (id, target_kind, target_id, kind, inputs, data, status, \
                 cause, owner, start_time, deadline, cancel_requested, version) \
                 VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12,1) \
                 ON CONFLICT (id) DO UPDATE SET \
                 target_kind = EXCLUDED.target_kind, target_id = EXCLUDED.target_id, \
                 kind = EXCLUDED.kind, inputs = EXCLUDED.inputs, data = EXCLUDED.data, \
                 status = EXCLUDED.status, cause = EXCLUDED.cause, owner = EXCLUDED.owner, \
                 start_time = EXCLUDED.start_time, deadline = EXCLUDED.deadline, \
                 cancel_requested = EXCLUDED.cancel_requested, version = actions.version + 1",
                &[
                    &action.id,
                    &target_kind,
                    &target_id,
                    &kind_str,
                    &action.inputs,
                    &data,
                    &action_status_to_str(action.status),
                    &action_cause_to_str(action.cause),
                    &action.owner,
                    &action.start_time,
                    &action.deadline,
                    &action.cancel_requested,
                ],
            )
            .await
            .map_err(|e| pg_err("action_store", e))?;
        Ok(())
    }

    async fn action_add_dependency(
        &self,
        dependent: ActionId,
        dependency: ActionId,
    ) -> Result<(), EngineError> {
        let mut client = self.pool.get().await.map_err(|e| pg_err("db connection", e))?;
        let tx = client.transaction().await.map_err(|e| pg_err("begin tx", e))?;
        tx.execute(
            "INSERT INTO action_dependencies (dependent, dependency) VALUES ($1, $2) \
             ON CONFLICT DO NOTHING",
            &[&dependent, &dependency],
        )
        .await
        .map_err(|e| pg_err("action_add_dependency", e))?;
        tx.execute(
            "UPDATE actions SET status = 'WAITING' WHERE id = $1",
            &[&dependent],
        )
        .await
        .map_err(|e| pg_err("action_add_dependency mark waiting", e))?;
        tx.commit().await.map_err(|e| pg_err("commit tx", e))?;
        Ok(())
    }

    async fn action_dependencies(&self, dependent: ActionId) -> Result<Vec<ActionId>, EngineError> {
        let client = self.pool.get().await.map_err(|e| pg_err("db connection", e))?;
        let rows = client
            .query(
                "SELECT dependency FROM action_dependencies WHERE dependent = $1",
                &[&dependent],
            )
            .await
            .map_err(|e| pg_err("action_dependencies", e))?;
        Ok(rows.iter().map(|r| r.get("dependency")).collect())
    }

    async fn cluster_policy_get_all(
        &self,
        cluster_id: ClusterId,
    ) -> Result<Vec<ClusterPolicyBinding>, EngineError> {
        let client = self.pool.get().await.map_err(|e| pg_err("db connection", e))?;
        let rows = client
            .query(
                "SELECT policy_id, policy_type, priority, cooldown, level, enabled, data \
                 FROM cluster_policies WHERE cluster_id = $1",
                &[&cluster_id],
            )
            .await
            .map_err(|e| pg_err("cluster_policy_get_all", e))?;
        Ok(rows
            .iter()
            .map(|row| ClusterPolicyBinding {
                policy_id: row.get("policy_id"),
                policy_type: row.get("policy_type"),
                priority: row.get("priority"),
                cooldown: row.get("cooldown"),
                level: row.get("level"),
                enabled: row.get("enabled"),
                data: row.get::<_, Option<serde_json::Value>>("data").unwrap_or(serde_json::Value::Null),
            })
            .collect())
    }

    async fn cluster_policy_store(
        &self,
        cluster_id: ClusterId,
        binding: ClusterPolicyBinding,
    ) -> Result<(), EngineError> {
        let client = self.pool.get().await.map_err(|e| pg_err("db connection", e))?;
        client
            .execute(
                "INSERT INTO cluster_policies (cluster_id, policy_id, policy_type, priority, \
                 cooldown, level, enabled, data) VALUES ($1,$2,$3,$4,$5,$6,$7,$8) \
                 ON CONFLICT (cluster_id, policy_id) DO UPDATE SET \
                 policy_type = EXCLUDED.policy_type, priority = EXCLUDED.priority, \
                 cooldown = EXCLUDED.cooldown, level = EXCLUDED.level, \
                 enabled = EXCLUDED.enabled, data = EXCLUDED.data",
                &[
                    &cluster_id,
                    &binding.policy_id,
                    &binding.policy_type,
                    &binding.priority,
                    &binding.cooldown,
                    &binding.level,
                    &binding.enabled,
                    &binding.data,
                ],
            )
            .await
            .map_err(|e| pg_err("cluster_policy_store", e))?;
        Ok(())
    }

    async fn cluster_policy_remove(
        &self,
        cluster_id: ClusterId,
        policy_id: PolicyId,
    ) -> Result<(), EngineError> {
        let client = self.pool.get().await.map_err(|e| pg_err("db connection", e))?;
        client
            .execute(
                "DELETE FROM cluster_policies WHERE cluster_id = $1 AND policy_id = $2",
                &[&cluster_id, &policy_id],
            )
            .await
            .map_err(|e| pg_err("cluster_policy_remove", e))?;
        Ok(())
    }

    async fn cluster_policy_update(
        &self,
        cluster_id: ClusterId,
        policy_id: PolicyId,
        patch: PolicyPatch,
    ) -> Result<(), EngineError> {
        let client = self.pool.get().await.map_err(|e| pg_err("db connection", e))?;

        let mut set_clauses: Vec<String> = Vec::new();
        let mut params: Vec<&(dyn tokio_postgres::types::ToSql + Sync)> = Vec::new();
        let mut idx = 1;

        if let Some(ref cooldown) = patch.cooldown {
            set_clauses.push(format!("cooldown = ${idx}"));
            params.push(cooldown);
            idx += 1;
        }
        if let Some(ref level) = patch.level {
            set_clauses.push(format!("level = ${idx}"));
            params.push(level);
            idx += 1;
        }
        if let Some(ref priority) = patch.priority {
            set_clauses.push(format!("priority = ${idx}"));
            params.push(priority);
            idx += 1;
        }
        if let Some(ref enabled) = patch.enabled {
            set_clauses.push(format!("enabled = ${idx}"));
            params.push(enabled);
            idx += 1;
        }

        if set_clauses.is_empty() {
            return Ok(());
        }

        let query = format!(
            "UPDATE cluster_policies SET {} WHERE cluster_id = ${idx} AND policy_id = ${}",
            set_clauses.join(", "),
            idx + 1
        );
        params.push(&cluster_id);
        params.push(&policy_id);

        client
            .execute(&query, &params)
            .await
            .map_err(|e| pg_err("cluster_policy_update", e))?;
        Ok(())
    }
}

fn row_to_node(row: &tokio_postgres::Row) -> Node {
    let data: Option<serde_json::Value> = row.get("data");
    Node {
        id: row.get("id"),
        name: String::new(),
        cluster_id: row.get("cluster_id"),
        index: row.get("node_index"),
        profile_id: row.get("profile_id"),
        status: node_status_from_str(row.get("status")),
        data: data
            .and_then(|v| serde_json::from_value(v).ok())
            .unwrap_or_default(),
    }
}

fn row_to_action(row: &tokio_postgres::Row) -> Option<Action> {
    let target_kind: String = row.get("target_kind");
    let target_id: Uuid = row.get("target_id");
    let target = if target_kind == "cluster" {
        ActionTarget::Cluster(target_id)
    } else {
        ActionTarget::Node(target_id)
    };
    let kind_str: String = row.get("kind");
    let kind = action_kind_from_str(&target_kind, &kind_str)?;
    let data: serde_json::Value = row.get("data");

    Some(Action {
        id: row.get("id"),
        target,
        kind,
        inputs: row.get("inputs"),
        data: serde_json::from_value::<ActionData>(data).unwrap_or_default(),
        status: action_status_from_str(row.get("status")),
        cause: action_cause_from_str(row.get("cause")),
        owner: row.get("owner"),
        start_time: row.get::<_, Option<DateTime<Utc>>>("start_time"),
        deadline: row.get::<_, Option<DateTime<Utc>>>("deadline"),
        cancel_requested: row.get("cancel_requested"),
    })
}
