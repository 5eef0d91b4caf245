//! Attempt response cache — the last response sent to each attempt.
//!
//! Presence of an entry is what makes an attempt known to the protocol.
//! Each entry also carries the attempt's lock, created once when the
//! attempt is admitted and carried across every replacement, so that
//! calls for one attempt serialize while calls for different attempts
//! never touch the same lock.
//!
//! Backed by a sharded concurrent map; lookups for different attempts do
//! not contend on a global lock.

use std::sync::Arc;

use amrm_core::{AttemptId, HeartbeatResponse};
use dashmap::DashMap;
use tokio::sync::Mutex;

/// A cached response plus the lock guarding its attempt.
#[derive(Debug, Clone)]
pub struct CachedResponse {
    pub response: Arc<HeartbeatResponse>,
    lock: Arc<Mutex<()>>,
}

impl CachedResponse {
    fn new(response: Arc<HeartbeatResponse>) -> Self {
        Self {
            response,
            lock: Arc::new(Mutex::new(())),
        }
    }

    /// The per-attempt lock.
    pub fn lock(&self) -> &Arc<Mutex<()>> {
        &self.lock
    }

    /// True if both handles belong to the same admitted attempt.
    pub fn same_entry(&self, other: &CachedResponse) -> bool {
        Arc::ptr_eq(&self.lock, &other.lock)
    }
}

/// Map from attempt to its last-sent response.
#[derive(Debug, Default)]
pub struct AttemptResponseCache {
    entries: DashMap<AttemptId, CachedResponse>,
}

impl AttemptResponseCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a fresh entry with a new lock, returning whatever it displaced.
    pub fn put(
        &self,
        attempt: AttemptId,
        response: HeartbeatResponse,
    ) -> Option<Arc<HeartbeatResponse>> {
        self.entries
            .insert(attempt, CachedResponse::new(Arc::new(response)))
            .map(|old| old.response)
    }

    pub fn get(&self, attempt: &AttemptId) -> Option<CachedResponse> {
        self.entries.get(attempt).map(|e| e.value().clone())
    }

    pub fn remove(&self, attempt: &AttemptId) -> Option<Arc<HeartbeatResponse>> {
        self.entries.remove(attempt).map(|(_, e)| e.response)
    }

    /// Swap in a new response for the entry `expected` was read from,
    /// keeping its lock.
    ///
    /// Returns the previous response, or `None` if the attempt vanished or
    /// was admitted again since `expected` was read. Nothing is written
    /// in that case.
    pub fn replace(
        &self,
        attempt: &AttemptId,
        expected: &CachedResponse,
        response: Arc<HeartbeatResponse>,
    ) -> Option<Arc<HeartbeatResponse>> {
        let mut entry = self.entries.get_mut(attempt)?;
        if !entry.same_entry(expected) {
            return None;
        }
        Some(std::mem::replace(&mut entry.response, response))
    }

    pub fn contains(&self, attempt: &AttemptId) -> bool {
        self.entries.contains_key(attempt)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
