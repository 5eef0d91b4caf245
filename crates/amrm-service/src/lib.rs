//! amrm-service — the application master heartbeat protocol.
//!
//! Mediates between the cluster scheduler and the application masters
//! that negotiate containers from it. Calls arrive over an at-least-once
//! channel; numbered heartbeats and a per-attempt response cache make
//! their effect exactly-once.
//!
//! # Architecture
//!
//! ```text
//! HeartbeatService
//!   ├── AccessGuard            (caller identity == claimed attempt?)
//!   ├── AttemptResponseCache   (last response + lock, per attempt)
//!   ├── AllocationBridge       (→ YarnScheduler)
//!   ├── build_preemption_message
//!   └── side channels
//!       ├── LivenessMonitor::received_ping
//!       └── EventDispatcher::dispatch(AttemptEvent)
//! ```

pub mod bridge;
pub mod cache;
pub mod collaborators;
pub mod error;
pub mod guard;
pub mod memory;
pub mod preemption;
pub mod service;

pub use bridge::AllocationBridge;
pub use cache::{AttemptResponseCache, CachedResponse};
pub use collaborators::{AppRegistry, AttemptEvent, EventDispatcher, LivenessMonitor, YarnScheduler};
pub use error::{ServiceError, ServiceResult};
pub use guard::{AccessGuard, CallerIdentity};
pub use memory::{ChannelDispatcher, InMemoryAppRegistry, PingRecorder};
pub use preemption::build_preemption_message;
pub use service::{Collaborators, HeartbeatService};
