//! In-memory collaborators.
//!
//! Used by the daemon when it runs without a surrounding resource manager
//! and by tests. None of these make decisions: the ping recorder never
//! expires anyone, and the registry only queues what it is told.

use std::time::Instant;

use amrm_core::*;
use dashmap::DashMap;
use tokio::sync::mpsc;

use crate::collaborators::{AppRegistry, AttemptEvent, EventDispatcher, LivenessMonitor};

// ── Liveness ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy)]
struct PingRecord {
    count: u64,
    last: Instant,
}

/// Records pings per attempt.
#[derive(Debug, Default)]
pub struct PingRecorder {
    pings: DashMap<AttemptId, PingRecord>,
}

impl PingRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ping_count(&self, attempt: &AttemptId) -> u64 {
        self.pings.get(attempt).map(|r| r.count).unwrap_or(0)
    }

    pub fn last_ping(&self, attempt: &AttemptId) -> Option<Instant> {
        self.pings.get(attempt).map(|r| r.last)
    }

    pub fn forget(&self, attempt: &AttemptId) {
        self.pings.remove(attempt);
    }
}

impl LivenessMonitor for PingRecorder {
    fn received_ping(&self, attempt: &AttemptId) {
        let now = Instant::now();
        self.pings
            .entry(*attempt)
            .and_modify(|r| {
                r.count += 1;
                r.last = now;
            })
            .or_insert(PingRecord {
                count: 1,
                last: now,
            });
    }
}

// ── Events ─────────────────────────────────────────────────────────

/// Forwards attempt events into a channel.
#[derive(Debug, Clone)]
pub struct ChannelDispatcher {
    tx: mpsc::UnboundedSender<AttemptEvent>,
}

impl ChannelDispatcher {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<AttemptEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl EventDispatcher for ChannelDispatcher {
    fn dispatch(&self, event: AttemptEvent) -> anyhow::Result<()> {
        self.tx
            .send(event)
            .map_err(|e| anyhow::anyhow!("event channel closed, dropped {:?}", e.0.attempt_id()))
    }
}

// ── Applications ───────────────────────────────────────────────────

#[derive(Debug, Clone)]
struct AppRecord {
    user: String,
    acls: ApplicationAcls,
    node_updates: Vec<RmNode>,
}

/// Running applications, with queues of pending node and container updates.
#[derive(Debug, Default)]
pub struct InMemoryAppRegistry {
    apps: DashMap<ApplicationId, AppRecord>,
    finished: DashMap<AttemptId, Vec<ContainerStatus>>,
}

impl InMemoryAppRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_application(&self, app: ApplicationId, user: impl Into<String>, acls: ApplicationAcls) {
        self.apps.insert(
            app,
            AppRecord {
                user: user.into(),
                acls,
                node_updates: Vec::new(),
            },
        );
    }

    /// Drop an application and anything still queued for its attempts.
    pub fn remove_application(&self, app: &ApplicationId) -> bool {
        self.finished.retain(|attempt, _| attempt.application_id != *app);
        self.apps.remove(app).is_some()
    }

    pub fn contains(&self, app: &ApplicationId) -> bool {
        self.apps.contains_key(app)
    }

    /// Queue a node change for every running application.
    pub fn broadcast_node_update(&self, node: RmNode) {
        for mut app in self.apps.iter_mut() {
            app.node_updates.push(node.clone());
        }
    }

    /// Queue a node change for one application.
    pub fn push_node_update(&self, app: &ApplicationId, node: RmNode) -> bool {
        match self.apps.get_mut(app) {
            Some(mut record) => {
                record.node_updates.push(node);
                true
            }
            None => false,
        }
    }

    pub fn push_finished_container(&self, attempt: AttemptId, status: ContainerStatus) {
        self.finished.entry(attempt).or_default().push(status);
    }
}

impl AppRegistry for InMemoryAppRegistry {
    fn application_user(&self, app: &ApplicationId) -> Option<String> {
        self.apps.get(app).map(|r| r.user.clone())
    }

    fn application_acls(&self, attempt: &AttemptId) -> Option<ApplicationAcls> {
        self.apps
            .get(&attempt.application_id)
            .map(|r| r.acls.clone())
    }

    fn pull_node_updates(&self, app: &ApplicationId) -> Vec<RmNode> {
        self.apps
            .get_mut(app)
            .map(|mut r| std::mem::take(&mut r.node_updates))
            .unwrap_or_default()
    }

    fn pull_just_finished_containers(&self, attempt: &AttemptId) -> Vec<ContainerStatus> {
        self.finished
            .get_mut(attempt)
            .map(|mut statuses| std::mem::take(&mut *statuses))
            .unwrap_or_default()
    }
}
