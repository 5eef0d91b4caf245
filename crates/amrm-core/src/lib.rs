//! amrm-core — protocol records and configuration for the AMRM service.
//!
//! The AMRM protocol is spoken between a cluster's resource manager and
//! the application masters that negotiate containers from it:
//!
//! ```text
//! ApplicationMaster                     ResourceManager
//!   register(attempt)        ───────▶  min/max capability, ACLs
//!   allocate(attempt, id, …) ───────▶  HeartbeatResponse { id + 1, … }
//!   finish(attempt, status)  ───────▶  ack
//! ```
//!
//! This crate holds the wire records, identifiers, and the `amrm.toml`
//! configuration shared by the service, transport, and daemon crates.

pub mod config;
pub mod error;
pub mod ids;
pub mod types;

pub use config::AmrmConfig;
pub use error::{ConfigError, ConfigResult, IdParseError};
pub use ids::{ApplicationId, AttemptId, ContainerId, NodeId};
pub use types::*;
