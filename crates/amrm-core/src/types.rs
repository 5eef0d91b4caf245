//! Protocol records exchanged between application masters and the
//! resource manager.
//!
//! All records are plain data and serialize to JSON for the HTTP
//! transport. Collections default to empty so that sparse requests
//! (a heartbeat with no asks) deserialize cleanly.

use std::collections::{BTreeSet, HashMap};

use serde::{Deserialize, Serialize};

use crate::ids::{AttemptId, ContainerId, NodeId};

// ── Resources ──────────────────────────────────────────────────────

/// A quantity of cluster resources.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Resource {
    pub memory_mb: u64,
    pub vcores: u32,
}

impl Resource {
    pub const ZERO: Resource = Resource::new(0, 0);

    pub const fn new(memory_mb: u64, vcores: u32) -> Self {
        Self { memory_mb, vcores }
    }

    /// True if `self` fits inside `other` in every dimension.
    pub fn fits_in(&self, other: &Resource) -> bool {
        self.memory_mb <= other.memory_mb && self.vcores <= other.vcores
    }
}

/// A request for containers of a given shape at a given location.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceRequest {
    pub priority: u32,
    /// Host name, rack name, or `*` for anywhere.
    pub resource_name: String,
    pub capability: Resource,
    pub num_containers: u32,
}

/// Any host or rack.
pub const ANY_RESOURCE: &str = "*";

// ── Containers ─────────────────────────────────────────────────────

/// A container granted to an application master.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Container {
    pub id: ContainerId,
    pub node_id: NodeId,
    pub node_http_address: String,
    pub resource: Resource,
    pub priority: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContainerState {
    New,
    Running,
    Complete,
}

/// Status of a container, reported once it has finished.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerStatus {
    pub container_id: ContainerId,
    pub state: ContainerState,
    pub diagnostics: String,
    pub exit_status: i32,
}

// ── Nodes ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeState {
    New,
    Running,
    Unhealthy,
    Decommissioned,
    Lost,
    Rebooted,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeHealthStatus {
    pub is_healthy: bool,
    pub health_report: String,
    /// Milliseconds since the Unix epoch.
    pub last_health_report_time: u64,
}

/// A node as tracked by the resource manager. Handed out as a delta
/// when its state changes while an application is running.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RmNode {
    pub node_id: NodeId,
    pub state: NodeState,
    pub http_address: String,
    pub rack_name: String,
    pub total_capability: Resource,
    pub health: NodeHealthStatus,
}

/// The scheduler's view of a node's usage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulerNodeReport {
    pub used: Resource,
    pub num_containers: u32,
}

/// A node report as delivered to application masters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeReport {
    pub node_id: NodeId,
    pub state: NodeState,
    pub http_address: String,
    pub rack_name: String,
    pub used: Resource,
    pub capability: Resource,
    pub num_containers: u32,
    pub health: NodeHealthStatus,
}

impl NodeReport {
    /// Combine a node delta with the scheduler's usage figures. Nodes the
    /// scheduler does not know about report zero usage.
    pub fn from_node(node: &RmNode, usage: Option<SchedulerNodeReport>) -> Self {
        let (used, num_containers) = match usage {
            Some(report) => (report.used, report.num_containers),
            None => (Resource::ZERO, 0),
        };
        Self {
            node_id: node.node_id.clone(),
            state: node.state,
            http_address: node.http_address.clone(),
            rack_name: node.rack_name.clone(),
            used,
            capability: node.total_capability,
            num_containers,
            health: node.health.clone(),
        }
    }
}

// ── Applications ───────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApplicationAccessType {
    ViewApp,
    ModifyApp,
}

/// Access control lists keyed by access type.
pub type ApplicationAcls = HashMap<ApplicationAccessType, String>;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinalApplicationStatus {
    #[default]
    Undefined,
    Succeeded,
    Failed,
    Killed,
}

// ── Scheduling ─────────────────────────────────────────────────────

/// Result of one scheduling pass for an attempt.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Allocation {
    pub containers: Vec<Container>,
    /// Headroom the attempt may still ask for.
    pub resource_limit: Resource,
    /// Containers that must be given back unconditionally.
    pub strict_preemptions: BTreeSet<ContainerId>,
    /// Containers the scheduler would like back...
    pub container_preemptions: BTreeSet<ContainerId>,
    /// ...or, alternatively, resources of this shape.
    pub resource_preemptions: Vec<ResourceRequest>,
}

// ── Preemption ─────────────────────────────────────────────────────

/// Containers that will be reclaimed no matter what.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StrictPreemptionContract {
    pub containers: BTreeSet<ContainerId>,
}

/// Containers the attempt may keep if it frees equivalent resources.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreemptionContract {
    pub containers: BTreeSet<ContainerId>,
    pub resource_requests: Vec<ResourceRequest>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreemptionMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strict_contract: Option<StrictPreemptionContract>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contract: Option<PreemptionContract>,
}

// ── Register ───────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterRequest {
    pub attempt_id: AttemptId,
    pub host: String,
    pub rpc_port: u16,
    #[serde(default)]
    pub tracking_url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterResponse {
    pub minimum_capability: Resource,
    pub maximum_capability: Resource,
    pub application_acls: ApplicationAcls,
}

// ── Allocate (heartbeat) ───────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AllocateRequest {
    pub attempt_id: AttemptId,
    /// Id of the last response the application master received.
    pub response_id: i32,
    #[serde(default)]
    pub progress: f32,
    #[serde(default)]
    pub asks: Vec<ResourceRequest>,
    #[serde(default)]
    pub releases: Vec<ContainerId>,
}

/// The answer to a heartbeat, cached per attempt until the next one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeartbeatResponse {
    pub response_id: i32,
    pub reboot: bool,
    pub allocated_containers: Vec<Container>,
    pub completed_container_statuses: Vec<ContainerStatus>,
    pub available_resources: Resource,
    pub updated_nodes: Vec<NodeReport>,
    pub num_cluster_nodes: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preemption_message: Option<PreemptionMessage>,
}

impl HeartbeatResponse {
    /// Tells the application master to throw away its state and register
    /// again from scratch.
    pub const REBOOT: HeartbeatResponse = HeartbeatResponse {
        response_id: 0,
        reboot: true,
        allocated_containers: Vec::new(),
        completed_container_statuses: Vec::new(),
        available_resources: Resource::ZERO,
        updated_nodes: Vec::new(),
        num_cluster_nodes: 0,
        preemption_message: None,
    };

    /// The entry seeded when an attempt is admitted.
    pub fn initial() -> Self {
        Self {
            reboot: false,
            ..Self::REBOOT
        }
    }

    pub fn is_reboot(&self) -> bool {
        self.reboot
    }
}

// ── Finish ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FinishRequest {
    pub attempt_id: AttemptId,
    #[serde(default)]
    pub tracking_url: String,
    #[serde(default)]
    pub final_status: FinalApplicationStatus,
    #[serde(default)]
    pub diagnostics: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FinishResponse {}
