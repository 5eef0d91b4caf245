//! Interfaces to the subsystems the protocol service depends on.
//!
//! None of these are implemented here in full: the placement algorithm,
//! the liveness timeout logic, and the attempt state machine all live
//! elsewhere. The service only needs the narrow contracts below.

use amrm_core::*;
use async_trait::async_trait;

/// The cluster scheduler.
#[async_trait]
pub trait YarnScheduler: Send + Sync {
    /// Run a scheduling pass for `attempt`: record new asks, release
    /// containers, and return whatever was granted since the last call.
    async fn allocate(
        &self,
        attempt: &AttemptId,
        asks: &[ResourceRequest],
        releases: &[ContainerId],
    ) -> anyhow::Result<Allocation>;

    fn minimum_capability(&self) -> Resource;

    fn maximum_capability(&self) -> Resource;

    fn num_cluster_nodes(&self) -> u32;

    fn node_report(&self, node: &NodeId) -> Option<SchedulerNodeReport>;
}

/// Tracks which attempts are still alive.
pub trait LivenessMonitor: Send + Sync {
    fn received_ping(&self, attempt: &AttemptId);
}

/// Events delivered to the attempt state machine.
#[derive(Debug, Clone, PartialEq)]
pub enum AttemptEvent {
    Registration {
        attempt_id: AttemptId,
        host: String,
        rpc_port: u16,
        tracking_url: String,
    },
    StatusUpdate {
        attempt_id: AttemptId,
        progress: f32,
    },
    Unregistration {
        attempt_id: AttemptId,
        tracking_url: String,
        final_status: FinalApplicationStatus,
        diagnostics: String,
    },
}

impl AttemptEvent {
    pub fn attempt_id(&self) -> &AttemptId {
        match self {
            Self::Registration { attempt_id, .. }
            | Self::StatusUpdate { attempt_id, .. }
            | Self::Unregistration { attempt_id, .. } => attempt_id,
        }
    }
}

/// Hands events to the attempt state machine.
pub trait EventDispatcher: Send + Sync {
    fn dispatch(&self, event: AttemptEvent) -> anyhow::Result<()>;
}

/// Read access to running applications and their attempts.
pub trait AppRegistry: Send + Sync {
    /// The submitting user, if the application is known.
    fn application_user(&self, app: &ApplicationId) -> Option<String>;

    /// ACLs from the attempt's submission context.
    fn application_acls(&self, attempt: &AttemptId) -> Option<ApplicationAcls>;

    /// Drain node changes the application has not yet been told about.
    fn pull_node_updates(&self, app: &ApplicationId) -> Vec<RmNode>;

    /// Drain container statuses that finished since the last heartbeat.
    fn pull_just_finished_containers(&self, attempt: &AttemptId) -> Vec<ContainerStatus>;
}
