//! Heartbeat protocol handler — register, allocate, finish.
//!
//! An attempt's protocol state is implicit in the response cache:
//!
//! ```text
//! (no entry) ──register_app_attempt──▶ id 0 ──allocate──▶ id 1 ──▶ id 2 …
//!      ▲                                                          │
//!      └──────────────────── unregister_attempt ◀─────────────────┘
//! ```
//!
//! Every entry point takes the attempt's lock before touching shared
//! state, so at most one call runs per attempt while different attempts
//! proceed in parallel. Heartbeats are numbered: an application master
//! sends the id of the last response it saw, and the handler either
//! replays that response (a retry), advances to the next one, or tells
//! the master to reboot.

use std::sync::Arc;

use amrm_core::*;
use tracing::{debug, error, info, warn};

use crate::bridge::AllocationBridge;
use crate::cache::AttemptResponseCache;
use crate::collaborators::{
    AppRegistry, AttemptEvent, EventDispatcher, LivenessMonitor, YarnScheduler,
};
use crate::error::{ServiceError, ServiceResult};
use crate::guard::{AccessGuard, CallerIdentity};
use crate::preemption::build_preemption_message;

const AUDIT_TARGET: &str = "amrm::audit";

/// External subsystems the handler drives.
#[derive(Clone)]
pub struct Collaborators {
    pub scheduler: Arc<dyn YarnScheduler>,
    pub liveness: Arc<dyn LivenessMonitor>,
    pub dispatcher: Arc<dyn EventDispatcher>,
    pub apps: Arc<dyn AppRegistry>,
}

/// How a heartbeat's response id relates to the cached one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Sequence {
    /// The master missed our last response and is asking again.
    Retry,
    /// The master is in step; compute the next response.
    Current,
    /// Older than the previous response, or ahead of anything we sent.
    Invalid,
}

fn classify(request_id: i32, cached_id: i32) -> Sequence {
    let request = i64::from(request_id);
    let cached = i64::from(cached_id);
    if request + 1 == cached {
        Sequence::Retry
    } else if request == cached {
        Sequence::Current
    } else {
        Sequence::Invalid
    }
}

fn reboot() -> Arc<HeartbeatResponse> {
    Arc::new(HeartbeatResponse::REBOOT)
}

/// Serves the application master protocol.
pub struct HeartbeatService {
    cache: Arc<AttemptResponseCache>,
    guard: AccessGuard,
    bridge: AllocationBridge,
    liveness: Arc<dyn LivenessMonitor>,
    dispatcher: Arc<dyn EventDispatcher>,
    apps: Arc<dyn AppRegistry>,
}

impl HeartbeatService {
    pub fn new(
        cache: Arc<AttemptResponseCache>,
        guard: AccessGuard,
        collaborators: Collaborators,
    ) -> Self {
        Self {
            cache,
            guard,
            bridge: AllocationBridge::new(collaborators.scheduler),
            liveness: collaborators.liveness,
            dispatcher: collaborators.dispatcher,
            apps: collaborators.apps,
        }
    }

    pub fn cache(&self) -> &Arc<AttemptResponseCache> {
        &self.cache
    }

    pub fn security_enabled(&self) -> bool {
        self.guard.security_enabled()
    }

    // ── Attempt lifecycle ───────────────────────────────────────────

    /// Admit an attempt. Until this runs, register and finish fail and
    /// heartbeats are told to reboot.
    pub fn register_app_attempt(&self, attempt: AttemptId) {
        info!(attempt_id = %attempt, "registering attempt");
        if self.cache.put(attempt, HeartbeatResponse::initial()).is_some() {
            warn!(attempt_id = %attempt, "attempt was already registered, state reset");
        }
    }

    /// Retire an attempt. Heartbeats in flight or later get a reboot.
    /// Returns false if the attempt was not registered.
    pub fn unregister_attempt(&self, attempt: &AttemptId) -> bool {
        if self.cache.remove(attempt).is_some() {
            info!(attempt_id = %attempt, "unregistered attempt");
            true
        } else {
            debug!(attempt_id = %attempt, "unregister for unknown attempt");
            false
        }
    }

    // ── RPC entry points ────────────────────────────────────────────

    pub async fn register(
        &self,
        caller: &CallerIdentity,
        request: RegisterRequest,
    ) -> ServiceResult<RegisterResponse> {
        let attempt = request.attempt_id;
        self.guard.authorize(caller, &attempt)?;
        let app_id = attempt.application_id;

        let Some(entry) = self.cache.get(&attempt) else {
            error!(attempt_id = %attempt, "register for attempt not in cache");
            warn!(
                target: AUDIT_TARGET,
                user = %self.audit_user(&app_id),
                operation = "register_am",
                attempt_id = %attempt,
                "failure: attempt doesn't exist in cache"
            );
            return Err(ServiceError::UnknownAttempt(attempt));
        };

        let _serial = entry.lock().lock().await;

        info!(attempt_id = %attempt, host = %request.host, port = request.rpc_port, "AM registration");
        self.liveness.received_ping(&attempt);

        let application_acls = self
            .apps
            .application_acls(&attempt)
            .ok_or(ServiceError::ApplicationNotFound(app_id))?;

        self.dispatcher
            .dispatch(AttemptEvent::Registration {
                attempt_id: attempt,
                host: request.host,
                rpc_port: request.rpc_port,
                tracking_url: request.tracking_url,
            })
            .map_err(ServiceError::Dispatch)?;

        info!(
            target: AUDIT_TARGET,
            user = %self.audit_user(&app_id),
            operation = "register_am",
            attempt_id = %attempt,
            "success"
        );

        Ok(RegisterResponse {
            minimum_capability: self.bridge.minimum_capability(),
            maximum_capability: self.bridge.maximum_capability(),
            application_acls,
        })
    }

    /// Process a heartbeat. Never fails for unknown or out-of-sync
    /// attempts; those get the reboot response.
    pub async fn allocate(
        &self,
        caller: &CallerIdentity,
        request: AllocateRequest,
    ) -> ServiceResult<Arc<HeartbeatResponse>> {
        let attempt = request.attempt_id;
        self.guard.authorize(caller, &attempt)?;

        // A heartbeat is proof of life even when we end up rejecting it.
        self.liveness.received_ping(&attempt);

        let Some(entry) = self.cache.get(&attempt) else {
            error!(attempt_id = %attempt, "heartbeat for attempt not in cache");
            return Ok(reboot());
        };
        if let Some(early) = self.screen(&attempt, request.response_id, &entry.response) {
            return Ok(early);
        }

        let _serial = entry.lock().lock().await;

        // Another call may have advanced or retired the attempt while we
        // waited for the lock.
        let current = match self.cache.get(&attempt) {
            Some(current) if current.same_entry(&entry) => current,
            _ => {
                error!(attempt_id = %attempt, "attempt removed from the cache while waiting");
                return Ok(reboot());
            }
        };
        if let Some(early) = self.screen(&attempt, request.response_id, &current.response) {
            return Ok(early);
        }

        let Some(next_id) = current.response.response_id.checked_add(1) else {
            error!(attempt_id = %attempt, "response id space exhausted");
            return Ok(reboot());
        };

        self.dispatcher
            .dispatch(AttemptEvent::StatusUpdate {
                attempt_id: attempt,
                progress: request.progress,
            })
            .map_err(ServiceError::Dispatch)?;

        let allocation = self
            .bridge
            .allocate(&attempt, &request.asks, &request.releases)
            .await?;

        let updated_nodes = self
            .bridge
            .node_reports(&self.apps.pull_node_updates(&attempt.application_id));
        let completed = self.apps.pull_just_finished_containers(&attempt);
        let preemption_message = build_preemption_message(&allocation);

        let response = Arc::new(HeartbeatResponse {
            response_id: next_id,
            reboot: false,
            allocated_containers: allocation.containers,
            completed_container_statuses: completed,
            available_resources: allocation.resource_limit,
            updated_nodes,
            num_cluster_nodes: self.bridge.num_cluster_nodes(),
            preemption_message,
        });

        if self
            .cache
            .replace(&attempt, &current, Arc::clone(&response))
            .is_none()
        {
            error!(attempt_id = %attempt, "attempt removed or readmitted during allocate");
            return Ok(reboot());
        }

        debug!(
            attempt_id = %attempt,
            response_id = next_id,
            allocated = response.allocated_containers.len(),
            completed = response.completed_container_statuses.len(),
            preempting = response.preemption_message.is_some(),
            "heartbeat processed"
        );
        Ok(response)
    }

    pub async fn finish(
        &self,
        caller: &CallerIdentity,
        request: FinishRequest,
    ) -> ServiceResult<FinishResponse> {
        let attempt = request.attempt_id;
        self.guard.authorize(caller, &attempt)?;

        let Some(entry) = self.cache.get(&attempt) else {
            error!(attempt_id = %attempt, "finish for attempt not in cache");
            return Err(ServiceError::UnknownAttempt(attempt));
        };

        let _serial = entry.lock().lock().await;

        self.liveness.received_ping(&attempt);

        self.dispatcher
            .dispatch(AttemptEvent::Unregistration {
                attempt_id: attempt,
                tracking_url: request.tracking_url,
                final_status: request.final_status,
                diagnostics: request.diagnostics,
            })
            .map_err(ServiceError::Dispatch)?;

        info!(
            target: AUDIT_TARGET,
            user = %self.audit_user(&attempt.application_id),
            operation = "finish_am",
            attempt_id = %attempt,
            final_status = ?request.final_status,
            "success"
        );

        Ok(FinishResponse::default())
    }

    // ── Internal helpers ────────────────────────────────────────────

    /// Answer retries and invalid ids without doing any work. `None`
    /// means the heartbeat is in step and should advance state.
    fn screen(
        &self,
        attempt: &AttemptId,
        request_id: i32,
        cached: &Arc<HeartbeatResponse>,
    ) -> Option<Arc<HeartbeatResponse>> {
        match classify(request_id, cached.response_id) {
            Sequence::Current => None,
            Sequence::Retry => {
                debug!(attempt_id = %attempt, response_id = cached.response_id, "replaying last response");
                Some(Arc::clone(cached))
            }
            Sequence::Invalid => {
                error!(
                    attempt_id = %attempt,
                    request_id,
                    cached_id = cached.response_id,
                    "invalid response id"
                );
                Some(reboot())
            }
        }
    }

    fn audit_user(&self, app: &ApplicationId) -> String {
        self.apps.application_user(app).unwrap_or_default()
    }
}
