//! Service error types.

use amrm_core::{ApplicationId, AttemptId};
use thiserror::Error;

/// Errors surfaced to callers of the protocol entry points.
///
/// Heartbeats for unknown or out-of-sync attempts are not errors; they
/// succeed with a reboot response instead.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("unauthorized: {diagnostic}")]
    Unauthorized { diagnostic: String },

    #[error("application attempt doesn't exist in cache: {0}")]
    UnknownAttempt(AttemptId),

    #[error("application not found: {0}")]
    ApplicationNotFound(ApplicationId),

    #[error("event dispatch failed: {0}")]
    Dispatch(#[source] anyhow::Error),

    #[error("scheduler error: {0}")]
    Scheduler(#[source] anyhow::Error),
}

impl ServiceError {
    pub fn unauthorized(diagnostic: impl Into<String>) -> Self {
        Self::Unauthorized {
            diagnostic: diagnostic.into(),
        }
    }

    /// True for failures of an external collaborator rather than of the
    /// caller. The caller may retry the same request.
    pub fn is_collaborator_failure(&self) -> bool {
        matches!(self, Self::Dispatch(_) | Self::Scheduler(_))
    }
}

pub type ServiceResult<T> = Result<T, ServiceError>;
