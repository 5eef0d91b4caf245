//! Thin adapter over the external scheduler.
//!
//! Pure pass-through: no retries, no caching. Scheduler failures surface
//! as `ServiceError::Scheduler` and the caller retries the heartbeat.

use std::sync::Arc;

use amrm_core::*;
use tracing::debug;

use crate::collaborators::YarnScheduler;
use crate::error::{ServiceError, ServiceResult};

#[derive(Clone)]
pub struct AllocationBridge {
    scheduler: Arc<dyn YarnScheduler>,
}

impl AllocationBridge {
    pub fn new(scheduler: Arc<dyn YarnScheduler>) -> Self {
        Self { scheduler }
    }

    pub async fn allocate(
        &self,
        attempt: &AttemptId,
        asks: &[ResourceRequest],
        releases: &[ContainerId],
    ) -> ServiceResult<Allocation> {
        let allocation = self
            .scheduler
            .allocate(attempt, asks, releases)
            .await
            .map_err(ServiceError::Scheduler)?;

        debug!(
            attempt_id = %attempt,
            asks = asks.len(),
            releases = releases.len(),
            granted = allocation.containers.len(),
            "scheduler pass complete"
        );
        Ok(allocation)
    }

    pub fn minimum_capability(&self) -> Resource {
        self.scheduler.minimum_capability()
    }

    pub fn maximum_capability(&self) -> Resource {
        self.scheduler.maximum_capability()
    }

    pub fn num_cluster_nodes(&self) -> u32 {
        self.scheduler.num_cluster_nodes()
    }

    pub fn node_report(&self, node: &NodeId) -> Option<SchedulerNodeReport> {
        self.scheduler.node_report(node)
    }

    /// Turn node deltas into reports, filling in usage from the scheduler.
    pub fn node_reports(&self, nodes: &[RmNode]) -> Vec<NodeReport> {
        nodes
            .iter()
            .map(|node| NodeReport::from_node(node, self.node_report(&node.node_id)))
            .collect()
    }
}
