//! Collaborators for running the daemon on its own.
//!
//! Without a surrounding resource manager there is no placement engine
//! and nobody to announce applications. `IdleScheduler` grants nothing and
//! reports the configured allocation bounds; `OpenAppRegistry` knows every
//! application. Together they let the protocol (registration, numbering,
//! retries, reboots) run end to end.

use std::sync::Arc;

use amrm_core::*;
use amrm_core::config::SchedulerConfig;
use amrm_service::{AppRegistry, InMemoryAppRegistry, YarnScheduler};
use async_trait::async_trait;
use tracing::trace;

// ── Scheduler ──────────────────────────────────────────────────────

pub struct IdleScheduler {
    minimum: Resource,
    maximum: Resource,
}

impl IdleScheduler {
    pub fn from_config(config: &SchedulerConfig) -> ConfigResult<Self> {
        Ok(Self {
            minimum: config.minimum()?,
            maximum: config.maximum()?,
        })
    }
}

#[async_trait]
impl YarnScheduler for IdleScheduler {
    async fn allocate(
        &self,
        attempt: &AttemptId,
        asks: &[ResourceRequest],
        releases: &[ContainerId],
    ) -> anyhow::Result<Allocation> {
        trace!(attempt_id = %attempt, asks = asks.len(), releases = releases.len(), "idle scheduler pass");
        Ok(Allocation::default())
    }

    fn minimum_capability(&self) -> Resource {
        self.minimum
    }

    fn maximum_capability(&self) -> Resource {
        self.maximum
    }

    fn num_cluster_nodes(&self) -> u32 {
        0
    }

    fn node_report(&self, _node: &NodeId) -> Option<SchedulerNodeReport> {
        None
    }
}

// ── Applications ───────────────────────────────────────────────────

/// Registry that treats unannounced applications as running with no
/// user and empty ACLs. Announced ones and all queues come from `inner`.
pub struct OpenAppRegistry {
    inner: Arc<InMemoryAppRegistry>,
}

impl OpenAppRegistry {
    pub fn new(inner: Arc<InMemoryAppRegistry>) -> Self {
        Self { inner }
    }
}

impl AppRegistry for OpenAppRegistry {
    fn application_user(&self, app: &ApplicationId) -> Option<String> {
        self.inner.application_user(app)
    }

    fn application_acls(&self, attempt: &AttemptId) -> Option<ApplicationAcls> {
        Some(self.inner.application_acls(attempt).unwrap_or_default())
    }

    fn pull_node_updates(&self, app: &ApplicationId) -> Vec<RmNode> {
        self.inner.pull_node_updates(app)
    }

    fn pull_just_finished_containers(&self, attempt: &AttemptId) -> Vec<ContainerStatus> {
        self.inner.pull_just_finished_containers(attempt)
    }
}
