//! Access guard: the caller must be the attempt it claims to be.
//!
//! Application masters authenticate as their attempt: the verified user
//! name attached to a call must equal the attempt id's string form.

use amrm_core::AttemptId;
use tracing::warn;

use crate::error::{ServiceError, ServiceResult};

/// The identity the transport verified for an incoming call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallerIdentity {
    user: Option<String>,
}

impl CallerIdentity {
    pub fn user(name: impl Into<String>) -> Self {
        Self {
            user: Some(name.into()),
        }
    }

    /// The transport could not establish who is calling.
    pub fn unresolved() -> Self {
        Self { user: None }
    }

    pub fn user_name(&self) -> Option<&str> {
        self.user.as_deref()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct AccessGuard {
    security_enabled: bool,
}

impl AccessGuard {
    pub fn new(security_enabled: bool) -> Self {
        Self { security_enabled }
    }

    pub fn security_enabled(&self) -> bool {
        self.security_enabled
    }

    /// No-op with security off.
    pub fn authorize(&self, caller: &CallerIdentity, claimed: &AttemptId) -> ServiceResult<()> {
        if !self.security_enabled {
            return Ok(());
        }

        let claimed = claimed.to_string();
        let Some(remote) = caller.user_name() else {
            let msg = format!("Cannot obtain the user-name for attempt {claimed}");
            warn!(attempt_id = %claimed, "{msg}");
            return Err(ServiceError::unauthorized(msg));
        };

        if remote != claimed {
            let msg = format!(
                "Unauthorized request from application master. Expected attempt {remote}, found {claimed}"
            );
            warn!(attempt_id = %claimed, remote_user = %remote, "{msg}");
            return Err(ServiceError::unauthorized(msg));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use amrm_core::ApplicationId;

    fn attempt() -> AttemptId {
        AttemptId::new(ApplicationId::new(1000, 1), 1)
    }

    #[test]
    fn disabled_guard_allows_anyone() {
        let guard = AccessGuard::new(false);
        guard.authorize(&CallerIdentity::unresolved(), &attempt()).unwrap();
        guard.authorize(&CallerIdentity::user("mallory"), &attempt()).unwrap();
    }

    #[test]
    fn matching_identity_is_allowed() {
        let guard = AccessGuard::new(true);
        let caller = CallerIdentity::user(attempt().to_string());
        guard.authorize(&caller, &attempt()).unwrap();
    }

    #[test]
    fn mismatched_identity_is_rejected_with_diagnostic() {
        let guard = AccessGuard::new(true);
        let other = AttemptId::new(ApplicationId::new(1000, 2), 1);
        let err = guard
            .authorize(&CallerIdentity::user(other.to_string()), &attempt())
            .unwrap_err();

        match err {
            ServiceError::Unauthorized { diagnostic } => {
                assert!(diagnostic.contains(&other.to_string()));
                assert!(diagnostic.contains(&attempt().to_string()));
            }
            other => panic!("expected Unauthorized, got {other:?}"),
        }
    }

    #[test]
    fn unresolved_identity_is_rejected() {
        let guard = AccessGuard::new(true);
        let err = guard
            .authorize(&CallerIdentity::unresolved(), &attempt())
            .unwrap_err();
        assert!(matches!(err, ServiceError::Unauthorized { .. }));
        assert!(err.to_string().contains("Cannot obtain the user-name"));
    }
}
