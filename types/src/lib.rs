//! Record shapes shared by the engine and its storage/lock backends.
//!
//! These are plain, serde-friendly structs — no ORM or CRD machinery is
//! attached here. Backends translate them to/from whatever table or
//! document shape they use.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub type ClusterId = Uuid;
pub type NodeId = Uuid;
pub type ActionId = Uuid;
pub type PolicyId = Uuid;

/// `-1` on the wire means "unbounded"; this is the in-memory equivalent.
pub const UNBOUNDED: i64 = -1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClusterStatus {
    Init,
    Creating,
    Active,
    Updating,
    Deleting,
    Error,
    Warning,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Cluster {
    pub id: ClusterId,
    pub name: String,
    pub user: String,
    pub project: String,
    pub domain: String,
    pub profile_id: Uuid,
    pub min_size: i64,
    /// `UNBOUNDED` (-1) means no upper bound.
    pub max_size: i64,
    pub desired_capacity: i64,
    pub status: ClusterStatus,
    pub status_reason: String,
    pub next_index: i64,
    pub updated_time: DateTime<Utc>,
    pub policies: Vec<ClusterPolicyBinding>,
}

impl Cluster {
    pub fn effective_max(&self, max_size_override: Option<i64>) -> Option<i64> {
        let max = max_size_override.unwrap_or(self.max_size);
        if max < 0 { None } else { Some(max) }
    }

    /// Short id prefix used in generated node names (`node-<prefix>-001`).
    pub fn id_prefix(&self) -> String {
        self.id.simple().to_string()[..8].to_string()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NodeStatus {
    Init,
    Active,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    pub id: NodeId,
    pub name: String,
    /// `None` means the node is an orphan: unowned by any cluster.
    pub cluster_id: Option<ClusterId>,
    pub index: i64,
    pub profile_id: Uuid,
    pub status: NodeStatus,
    pub data: BTreeMap<String, serde_json::Value>,
}

impl Node {
    pub fn joinable(&self) -> bool {
        self.cluster_id.is_none() && self.status == NodeStatus::Active
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActionStatus {
    Init,
    Waiting,
    Ready,
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

impl ActionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ActionStatus::Succeeded | ActionStatus::Failed | ActionStatus::Cancelled
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActionCause {
    User,
    Derived,
}

/// What `execute` hands back to its caller. Distinct from [`ActionStatus`],
/// which is the action's own persisted lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActionResult {
    Ok,
    Error,
    Cancel,
    Timeout,
    Retry,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClusterActionKind {
    ClusterCreate,
    ClusterDelete,
    ClusterUpdate,
    ClusterAddNodes,
    ClusterDelNodes,
    ClusterResize,
    ClusterScaleOut,
    ClusterScaleIn,
    ClusterAttachPolicy,
    ClusterDetachPolicy,
    ClusterUpdatePolicy,
}

impl ClusterActionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ClusterActionKind::ClusterCreate => "CLUSTER_CREATE",
            ClusterActionKind::ClusterDelete => "CLUSTER_DELETE",
            ClusterActionKind::ClusterUpdate => "CLUSTER_UPDATE",
            ClusterActionKind::ClusterAddNodes => "CLUSTER_ADD_NODES",
            ClusterActionKind::ClusterDelNodes => "CLUSTER_DEL_NODES",
            ClusterActionKind::ClusterResize => "CLUSTER_RESIZE",
            ClusterActionKind::ClusterScaleOut => "CLUSTER_SCALE_OUT",
            ClusterActionKind::ClusterScaleIn => "CLUSTER_SCALE_IN",
            ClusterActionKind::ClusterAttachPolicy => "CLUSTER_ATTACH_POLICY",
            ClusterActionKind::ClusterDetachPolicy => "CLUSTER_DETACH_POLICY",
            ClusterActionKind::ClusterUpdatePolicy => "CLUSTER_UPDATE_POLICY",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NodeActionKind {
    NodeCreate,
    NodeDelete,
    NodeJoin,
    NodeLeave,
    NodeUpdate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ActionKind {
    Cluster(ClusterActionKind),
    Node(NodeActionKind),
}

/// What an [`Action`] targets. Cluster actions target a cluster; the
/// per-node sub-actions they spawn target a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ActionTarget {
    Cluster(ClusterId),
    Node(NodeId),
}

impl ActionTarget {
    pub fn id(&self) -> Uuid {
        match self {
            ActionTarget::Cluster(id) => *id,
            ActionTarget::Node(id) => *id,
        }
    }
}

/// Per-REDESIGN-FLAG (spec §9/§3a): the scratch `data` bag is a tagged
/// structure rather than a free-form map. `header` carries the fields
/// every action may set; `payload` carries the operation-specific hints.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ActionData {
    pub status: Option<ActionResult>,
    pub reason: Option<String>,
    pub deletion: Option<DeletionData>,
    pub creation: Option<CreationData>,
    pub placement: Option<Vec<String>>,
    pub nodes: Option<Vec<NodeId>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeletionData {
    pub count: Option<i64>,
    pub destroy_after_delete: Option<bool>,
    pub candidates: Option<Vec<NodeId>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CreationData {
    pub count: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Action {
    pub id: ActionId,
    pub target: ActionTarget,
    pub kind: ActionKind,
    pub inputs: serde_json::Value,
    pub data: ActionData,
    pub status: ActionStatus,
    pub cause: ActionCause,
    pub owner: Option<String>,
    pub start_time: Option<DateTime<Utc>>,
    pub deadline: Option<DateTime<Utc>>,
    /// Set by an external cancel signal; the coordinator observes it at its
    /// next poll. Never cleared once set.
    pub cancel_requested: bool,
}

impl Action {
    pub fn cluster_id(&self) -> Option<ClusterId> {
        match self.target {
            ActionTarget::Cluster(id) => Some(id),
            ActionTarget::Node(_) => None,
        }
    }
}

/// A directed edge: `dependent` may only run once `dependency` has
/// reached [`ActionStatus::Succeeded`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionDependency {
    pub dependent: ActionId,
    pub dependency: ActionId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PolicyPhase {
    Before,
    After,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PolicyCheckStatus {
    Ok,
    Failure,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterPolicyBinding {
    pub policy_id: PolicyId,
    pub policy_type: String,
    pub priority: i32,
    pub cooldown: i32,
    pub level: i32,
    pub enabled: bool,
    pub data: serde_json::Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AdjustmentType {
    ExactCapacity,
    ChangeInCapacity,
    ChangeInPercentage,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LockScope {
    Cluster,
}

/// Verdict handed back by a policy gate's BEFORE/AFTER check. `data` carries
/// whatever planning hints the policy wants merged into the action's
/// scratch data (e.g. `deletion.candidates`).
#[derive(Debug, Clone)]
pub struct PolicyCheckOutput {
    pub status: PolicyCheckStatus,
    pub reason: String,
    pub data: ActionData,
}

impl Default for PolicyCheckOutput {
    fn default() -> Self {
        PolicyCheckOutput {
            status: PolicyCheckStatus::Ok,
            reason: String::new(),
            data: ActionData::default(),
        }
    }
}

/// Partial update applied to a [`ClusterPolicyBinding`] by UPDATE_POLICY.
/// Fields left `None` are preserved.
#[derive(Debug, Clone, Default)]
pub struct PolicyPatch {
    pub cooldown: Option<i32>,
    pub level: Option<i32>,
    pub priority: Option<i32>,
    pub enabled: Option<bool>,
}
