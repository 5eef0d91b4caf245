//! amrm-api — HTTP transport for the AMRM protocol.
//!
//! Application masters reach the protocol router; the orchestration layer
//! that owns attempt lifecycles reaches the admin router, which is meant
//! to be bound to a private address.
//!
//! # Protocol routes
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | POST | `/amrm/v1/register` | Register an application master |
//! | POST | `/amrm/v1/allocate` | Heartbeat: ask, release, receive containers |
//! | POST | `/amrm/v1/finish` | Report the attempt's final status |
//!
//! # Admin routes
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | PUT | `/internal/v1/attempts/{attempt_id}` | Admit an attempt |
//! | DELETE | `/internal/v1/attempts/{attempt_id}` | Retire an attempt |
//!
//! The caller's identity is read from a header set by the authenticating
//! front door (`x-remote-user` by default).

pub mod handlers;
pub mod server;

use std::sync::Arc;

use amrm_service::HeartbeatService;
use axum::Router;
use axum::http::HeaderName;
use axum::routing::{post, put};

pub use server::ProtocolServer;

/// Shared state for API handlers.
#[derive(Clone)]
pub struct ApiState {
    pub service: Arc<HeartbeatService>,
    pub identity_header: HeaderName,
}

impl ApiState {
    /// Fails if `identity_header` is not a valid header name.
    pub fn new(service: Arc<HeartbeatService>, identity_header: &str) -> anyhow::Result<Self> {
        let identity_header = HeaderName::try_from(identity_header)
            .map_err(|e| anyhow::anyhow!("invalid identity header {identity_header:?}: {e}"))?;
        Ok(Self {
            service,
            identity_header,
        })
    }
}

/// Routes served to application masters.
pub fn protocol_router(state: ApiState) -> Router {
    let routes = Router::new()
        .route("/register", post(handlers::register))
        .route("/allocate", post(handlers::allocate))
        .route("/finish", post(handlers::finish))
        .with_state(state);

    Router::new().nest("/amrm/v1", routes)
}

/// Attempt lifecycle routes for the orchestration layer.
pub fn admin_router(state: ApiState) -> Router {
    let routes = Router::new()
        .route(
            "/attempts/{attempt_id}",
            put(handlers::register_attempt).delete(handlers::unregister_attempt),
        )
        .with_state(state);

    Router::new().nest("/internal/v1", routes)
}
