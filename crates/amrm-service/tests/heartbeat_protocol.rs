//! Heartbeat protocol tests.
//!
//! Drives `HeartbeatService` end to end with in-memory collaborators and
//! a stub scheduler: registration, numbered heartbeats, retries, reboots,
//! preemption, and the races the per-attempt lock has to settle.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use amrm_core::*;
use amrm_service::*;
use async_trait::async_trait;
use tokio::sync::mpsc;

// ── Stub scheduler ─────────────────────────────────────────────────

#[derive(Default)]
struct StubScheduler {
    calls: AtomicUsize,
    fail: AtomicBool,
    delay: Option<Duration>,
    /// Removes the attempt from this cache mid-allocate.
    evict_from: Option<Arc<AttemptResponseCache>>,
    /// Retires and readmits the attempt in this cache mid-allocate.
    readmit_in: Option<Arc<AttemptResponseCache>>,
    preemption: Mutex<Allocation>,
}

impl StubScheduler {
    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl YarnScheduler for StubScheduler {
    async fn allocate(
        &self,
        attempt: &AttemptId,
        asks: &[ResourceRequest],
        _releases: &[ContainerId],
    ) -> anyhow::Result<Allocation> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) as u64 + 1;
        if self.fail.load(Ordering::SeqCst) {
            anyhow::bail!("scheduler unavailable");
        }
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(cache) = &self.evict_from {
            cache.remove(attempt);
        }
        if let Some(cache) = &self.readmit_in {
            cache.remove(attempt);
            cache.put(*attempt, HeartbeatResponse::initial());
        }

        let mut containers = Vec::new();
        for ask in asks {
            for n in 0..u64::from(ask.num_containers) {
                containers.push(Container {
                    id: ContainerId::new(*attempt, call * 100 + n),
                    node_id: NodeId::new("n1", 45454),
                    node_http_address: "n1:8042".to_string(),
                    resource: ask.capability,
                    priority: ask.priority,
                });
            }
        }

        let template = self.preemption.lock().unwrap().clone();
        Ok(Allocation {
            containers,
            resource_limit: Resource::new(8192, 8),
            ..template
        })
    }

    fn minimum_capability(&self) -> Resource {
        Resource::new(1024, 1)
    }

    fn maximum_capability(&self) -> Resource {
        Resource::new(8192, 32)
    }

    fn num_cluster_nodes(&self) -> u32 {
        4
    }

    fn node_report(&self, _node: &NodeId) -> Option<SchedulerNodeReport> {
        Some(SchedulerNodeReport {
            used: Resource::new(2048, 2),
            num_containers: 2,
        })
    }
}

// ── Harness ────────────────────────────────────────────────────────

struct Harness {
    service: Arc<HeartbeatService>,
    scheduler: Arc<StubScheduler>,
    pings: Arc<PingRecorder>,
    apps: Arc<InMemoryAppRegistry>,
    events: mpsc::UnboundedReceiver<AttemptEvent>,
}

impl Harness {
    fn drain_events(&mut self) -> Vec<AttemptEvent> {
        let mut out = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            out.push(event);
        }
        out
    }
}

fn build(security: bool, cache: Arc<AttemptResponseCache>, scheduler: StubScheduler) -> Harness {
    let scheduler = Arc::new(scheduler);
    let pings = Arc::new(PingRecorder::new());
    let apps = Arc::new(InMemoryAppRegistry::new());
    let (dispatcher, events) = ChannelDispatcher::channel();

    let mut acls = ApplicationAcls::new();
    acls.insert(ApplicationAccessType::ViewApp, "alice".to_string());
    apps.add_application(app_id(), "alice", acls);

    let service = HeartbeatService::new(
        cache,
        AccessGuard::new(security),
        Collaborators {
            scheduler: scheduler.clone(),
            liveness: pings.clone(),
            dispatcher: Arc::new(dispatcher),
            apps: apps.clone(),
        },
    );

    Harness {
        service: Arc::new(service),
        scheduler,
        pings,
        apps,
        events,
    }
}

fn harness() -> Harness {
    build(false, Arc::new(AttemptResponseCache::new()), StubScheduler::default())
}

fn app_id() -> ApplicationId {
    ApplicationId::new(1_700_000_000_000, 1)
}

fn attempt() -> AttemptId {
    AttemptId::new(app_id(), 1)
}

fn anyone() -> CallerIdentity {
    CallerIdentity::unresolved()
}

fn ask(num_containers: u32) -> ResourceRequest {
    ResourceRequest {
        priority: 1,
        resource_name: ANY_RESOURCE.to_string(),
        capability: Resource::new(1024, 1),
        num_containers,
    }
}

fn heartbeat(response_id: i32, asks: Vec<ResourceRequest>) -> AllocateRequest {
    AllocateRequest {
        attempt_id: attempt(),
        response_id,
        progress: 0.25,
        asks,
        releases: Vec::new(),
    }
}

fn register_request() -> RegisterRequest {
    RegisterRequest {
        attempt_id: attempt(),
        host: "am-host".to_string(),
        rpc_port: 9999,
        tracking_url: "http://am-host:8088".to_string(),
    }
}

fn finish_request() -> FinishRequest {
    FinishRequest {
        attempt_id: attempt(),
        tracking_url: "http://history/app1".to_string(),
        final_status: FinalApplicationStatus::Succeeded,
        diagnostics: "done".to_string(),
    }
}

// ── Scenario ───────────────────────────────────────────────────────

#[tokio::test]
async fn register_heartbeat_retry_stale_unregister() {
    let h = harness();
    h.service.register_app_attempt(attempt());
    h.service.register(&anyone(), register_request()).await.unwrap();

    let first = h.service.allocate(&anyone(), heartbeat(0, vec![ask(1)])).await.unwrap();
    assert!(!first.reboot);
    assert_eq!(first.response_id, 1);
    assert_eq!(first.allocated_containers.len(), 1);
    assert_eq!(first.allocated_containers[0].resource, Resource::new(1024, 1));

    let retry = h.service.allocate(&anyone(), heartbeat(0, vec![ask(1)])).await.unwrap();
    assert_eq!(retry, first);
    assert_eq!(h.scheduler.calls(), 1);

    let ahead = h.service.allocate(&anyone(), heartbeat(5, vec![])).await.unwrap();
    assert!(ahead.reboot);

    h.service.unregister_attempt(&attempt());
    let gone = h.service.allocate(&anyone(), heartbeat(1, vec![])).await.unwrap();
    assert!(gone.reboot);
}

#[tokio::test]
async fn response_ids_advance_by_one() {
    let h = harness();
    h.service.register_app_attempt(attempt());

    let mut last = 0;
    for _ in 0..5 {
        let resp = h.service.allocate(&anyone(), heartbeat(last, vec![])).await.unwrap();
        assert_eq!(resp.response_id, last + 1);
        last = resp.response_id;
    }
    assert_eq!(h.scheduler.calls(), 5);
    assert_eq!(
        h.service.cache().get(&attempt()).unwrap().response.response_id,
        5
    );
}

#[tokio::test]
async fn retry_replays_without_side_effects() {
    let mut h = harness();
    h.service.register_app_attempt(attempt());

    let a = h.service.allocate(&anyone(), heartbeat(0, vec![ask(2)])).await.unwrap();
    let b = h.service.allocate(&anyone(), heartbeat(0, vec![ask(2)])).await.unwrap();

    assert!(Arc::ptr_eq(&a, &b), "retry must replay the cached response");
    assert_eq!(h.scheduler.calls(), 1);

    let status_updates = h
        .drain_events()
        .into_iter()
        .filter(|e| matches!(e, AttemptEvent::StatusUpdate { .. }))
        .count();
    assert_eq!(status_updates, 1);

    // Both calls still count as liveness.
    assert_eq!(h.pings.ping_count(&attempt()), 2);
}

#[tokio::test]
async fn older_than_previous_is_rebooted() {
    let h = harness();
    h.service.register_app_attempt(attempt());
    for id in 0..3 {
        h.service.allocate(&anyone(), heartbeat(id, vec![])).await.unwrap();
    }

    // Cached id is 3; request 1 + 1 < 3.
    let resp = h.service.allocate(&anyone(), heartbeat(1, vec![])).await.unwrap();
    assert!(resp.reboot);
    assert_eq!(h.scheduler.calls(), 3);
    assert_eq!(
        h.service.cache().get(&attempt()).unwrap().response.response_id,
        3
    );
}

// ── Unknown attempts ───────────────────────────────────────────────

#[tokio::test]
async fn heartbeat_for_unknown_attempt_reboots_but_pings() {
    let h = harness();
    let resp = h.service.allocate(&anyone(), heartbeat(0, vec![])).await.unwrap();
    assert!(resp.reboot);
    assert_eq!(*resp, HeartbeatResponse::REBOOT);
    assert_eq!(h.pings.ping_count(&attempt()), 1);
    assert_eq!(h.scheduler.calls(), 0);
}

#[tokio::test]
async fn register_and_finish_for_unknown_attempt_fail() {
    let h = harness();

    let err = h.service.register(&anyone(), register_request()).await.unwrap_err();
    assert!(matches!(err, ServiceError::UnknownAttempt(a) if a == attempt()));

    let err = h.service.finish(&anyone(), finish_request()).await.unwrap_err();
    assert!(matches!(err, ServiceError::UnknownAttempt(_)));

    assert_eq!(h.pings.ping_count(&attempt()), 0);
}

// ── Register / finish ──────────────────────────────────────────────

#[tokio::test]
async fn register_reports_capabilities_and_acls() {
    let mut h = harness();
    h.service.register_app_attempt(attempt());

    let resp = h.service.register(&anyone(), register_request()).await.unwrap();
    assert_eq!(resp.minimum_capability, Resource::new(1024, 1));
    assert_eq!(resp.maximum_capability, Resource::new(8192, 32));
    assert_eq!(
        resp.application_acls.get(&ApplicationAccessType::ViewApp).map(String::as_str),
        Some("alice")
    );

    assert_eq!(h.pings.ping_count(&attempt()), 1);
    let events = h.drain_events();
    assert_eq!(
        events,
        vec![AttemptEvent::Registration {
            attempt_id: attempt(),
            host: "am-host".to_string(),
            rpc_port: 9999,
            tracking_url: "http://am-host:8088".to_string(),
        }]
    );
}

#[tokio::test]
async fn duplicate_register_repeats_side_effects() {
    let mut h = harness();
    h.service.register_app_attempt(attempt());

    h.service.register(&anyone(), register_request()).await.unwrap();
    h.service.register(&anyone(), register_request()).await.unwrap();

    assert_eq!(h.pings.ping_count(&attempt()), 2);
    assert_eq!(h.drain_events().len(), 2);
}

#[tokio::test]
async fn register_for_unknown_application_fails() {
    let mut h = harness();
    h.apps.remove_application(&app_id());
    h.service.register_app_attempt(attempt());

    let err = h.service.register(&anyone(), register_request()).await.unwrap_err();
    assert!(matches!(err, ServiceError::ApplicationNotFound(_)));
    assert!(h.drain_events().is_empty());
}

#[tokio::test]
async fn finish_emits_unregistration_and_keeps_entry() {
    let mut h = harness();
    h.service.register_app_attempt(attempt());

    h.service.finish(&anyone(), finish_request()).await.unwrap();

    let events = h.drain_events();
    assert_eq!(events.len(), 1);
    match &events[0] {
        AttemptEvent::Unregistration {
            final_status,
            diagnostics,
            ..
        } => {
            assert_eq!(*final_status, FinalApplicationStatus::Succeeded);
            assert_eq!(diagnostics, "done");
        }
        other => panic!("unexpected event {other:?}"),
    }

    // Removal is the owner's job.
    assert!(h.service.cache().contains(&attempt()));
    let resp = h.service.allocate(&anyone(), heartbeat(0, vec![])).await.unwrap();
    assert!(!resp.reboot);
}

// ── Response contents ──────────────────────────────────────────────

#[tokio::test]
async fn node_updates_and_finished_containers_are_delivered_once() {
    let h = harness();
    h.service.register_app_attempt(attempt());

    h.apps.broadcast_node_update(RmNode {
        node_id: NodeId::new("n2", 45454),
        state: NodeState::Unhealthy,
        http_address: "n2:8042".to_string(),
        rack_name: "/rack-b".to_string(),
        total_capability: Resource::new(16_384, 16),
        health: NodeHealthStatus {
            is_healthy: false,
            health_report: "disk".to_string(),
            last_health_report_time: 7,
        },
    });
    h.apps.push_finished_container(
        attempt(),
        ContainerStatus {
            container_id: ContainerId::new(attempt(), 3),
            state: ContainerState::Complete,
            diagnostics: String::new(),
            exit_status: 0,
        },
    );

    let first = h.service.allocate(&anyone(), heartbeat(0, vec![])).await.unwrap();
    assert_eq!(first.updated_nodes.len(), 1);
    assert_eq!(first.updated_nodes[0].num_containers, 2);
    assert_eq!(first.updated_nodes[0].state, NodeState::Unhealthy);
    assert_eq!(first.completed_container_statuses.len(), 1);
    assert_eq!(first.num_cluster_nodes, 4);
    assert_eq!(first.available_resources, Resource::new(8192, 8));

    let replay = h.service.allocate(&anyone(), heartbeat(0, vec![])).await.unwrap();
    assert_eq!(replay.updated_nodes.len(), 1);

    let second = h.service.allocate(&anyone(), heartbeat(1, vec![])).await.unwrap();
    assert!(second.updated_nodes.is_empty());
    assert!(second.completed_container_statuses.is_empty());
}

#[tokio::test]
async fn preemption_message_follows_allocation() {
    let h = harness();
    h.service.register_app_attempt(attempt());

    let none = h.service.allocate(&anyone(), heartbeat(0, vec![])).await.unwrap();
    assert!(none.preemption_message.is_none());

    *h.scheduler.preemption.lock().unwrap() = Allocation {
        strict_preemptions: BTreeSet::from([ContainerId::new(attempt(), 1)]),
        ..Allocation::default()
    };
    let strict = h.service.allocate(&anyone(), heartbeat(1, vec![])).await.unwrap();
    let msg = strict.preemption_message.clone().unwrap();
    assert!(msg.strict_contract.is_some());
    assert!(msg.contract.is_none());

    *h.scheduler.preemption.lock().unwrap() = Allocation {
        strict_preemptions: BTreeSet::from([ContainerId::new(attempt(), 1)]),
        container_preemptions: BTreeSet::from([ContainerId::new(attempt(), 2)]),
        resource_preemptions: vec![ask(1)],
        ..Allocation::default()
    };
    let both = h.service.allocate(&anyone(), heartbeat(2, vec![])).await.unwrap();
    let msg = both.preemption_message.clone().unwrap();
    assert!(msg.strict_contract.is_some());
    assert!(msg.contract.is_some());
}

// ── Failures ───────────────────────────────────────────────────────

#[tokio::test]
async fn scheduler_failure_leaves_cache_untouched() {
    let h = harness();
    h.service.register_app_attempt(attempt());

    h.scheduler.fail.store(true, Ordering::SeqCst);
    let err = h.service.allocate(&anyone(), heartbeat(0, vec![])).await.unwrap_err();
    assert!(matches!(err, ServiceError::Scheduler(_)));
    assert_eq!(
        h.service.cache().get(&attempt()).unwrap().response.response_id,
        0
    );

    // The master retries with the same id once the scheduler recovers.
    h.scheduler.fail.store(false, Ordering::SeqCst);
    let resp = h.service.allocate(&anyone(), heartbeat(0, vec![])).await.unwrap();
    assert_eq!(resp.response_id, 1);
}

#[tokio::test]
async fn dispatch_failure_surfaces() {
    let h = harness();
    h.service.register_app_attempt(attempt());
    let Harness { service, events, .. } = h;
    drop(events);

    let err = service.allocate(&anyone(), heartbeat(0, vec![])).await.unwrap_err();
    assert!(matches!(err, ServiceError::Dispatch(_)));
    let err = service.finish(&anyone(), finish_request()).await.unwrap_err();
    assert!(err.is_collaborator_failure());
}

// ── Security ───────────────────────────────────────────────────────

#[tokio::test]
async fn security_rejects_other_callers_before_any_side_effect() {
    let h = build(true, Arc::new(AttemptResponseCache::new()), StubScheduler::default());
    h.service.register_app_attempt(attempt());
    let intruder = CallerIdentity::user("appattempt_1700000000000_0002_000001");

    let err = h.service.allocate(&intruder, heartbeat(0, vec![])).await.unwrap_err();
    assert!(matches!(err, ServiceError::Unauthorized { .. }));
    assert!(h.service.register(&intruder, register_request()).await.is_err());
    assert!(h.service.finish(&intruder, finish_request()).await.is_err());
    assert_eq!(h.pings.ping_count(&attempt()), 0);

    let owner = CallerIdentity::user(attempt().to_string());
    let resp = h.service.allocate(&owner, heartbeat(0, vec![])).await.unwrap();
    assert_eq!(resp.response_id, 1);
}

// ── Concurrency ────────────────────────────────────────────────────

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_duplicates_advance_once() {
    let scheduler = StubScheduler {
        delay: Some(Duration::from_millis(20)),
        ..StubScheduler::default()
    };
    let h = build(false, Arc::new(AttemptResponseCache::new()), scheduler);
    h.service.register_app_attempt(attempt());

    let mut tasks = Vec::new();
    for _ in 0..16 {
        let service = h.service.clone();
        tasks.push(tokio::spawn(async move {
            service.allocate(&anyone(), heartbeat(0, vec![ask(1)])).await
        }));
    }

    let mut responses = Vec::new();
    for task in tasks {
        responses.push(task.await.unwrap().unwrap());
    }

    assert_eq!(h.scheduler.calls(), 1);
    for resp in &responses {
        assert!(!resp.reboot);
        assert_eq!(resp.response_id, 1);
        assert!(Arc::ptr_eq(resp, &responses[0]));
    }
}

#[tokio::test]
async fn different_attempts_do_not_block_each_other() {
    let h = harness();
    let other = AttemptId::new(app_id(), 2);
    h.service.register_app_attempt(attempt());
    h.service.register_app_attempt(other);

    let entry = h.service.cache().get(&attempt()).unwrap();
    let _held = entry.lock().lock().await;

    let req = AllocateRequest {
        attempt_id: other,
        ..heartbeat(0, vec![])
    };
    let resp = tokio::time::timeout(Duration::from_secs(5), h.service.allocate(&anyone(), req))
        .await
        .expect("heartbeat for another attempt must not wait")
        .unwrap();
    assert_eq!(resp.response_id, 1);
}

#[tokio::test]
async fn unregister_during_allocate_reboots() {
    let cache = Arc::new(AttemptResponseCache::new());
    let scheduler = StubScheduler {
        evict_from: Some(cache.clone()),
        ..StubScheduler::default()
    };
    let h = build(false, cache, scheduler);
    h.service.register_app_attempt(attempt());

    let resp = h.service.allocate(&anyone(), heartbeat(0, vec![ask(1)])).await.unwrap();
    assert!(resp.reboot);
    assert!(!h.service.cache().contains(&attempt()));
}

#[tokio::test]
async fn readmission_during_allocate_reboots_and_keeps_fresh_entry() {
    let cache = Arc::new(AttemptResponseCache::new());
    let scheduler = StubScheduler {
        readmit_in: Some(cache.clone()),
        ..StubScheduler::default()
    };
    let h = build(false, cache, scheduler);
    h.service.register_app_attempt(attempt());

    let resp = h.service.allocate(&anyone(), heartbeat(0, vec![ask(1)])).await.unwrap();
    assert!(resp.reboot);
    assert_eq!(h.scheduler.calls(), 1);

    let fresh = h.service.cache().get(&attempt()).unwrap();
    assert_eq!(fresh.response.response_id, 0);
    assert!(!fresh.response.reboot);
}

#[tokio::test]
async fn exhausted_response_ids_reboot() {
    let h = harness();
    h.service.cache().put(
        attempt(),
        HeartbeatResponse {
            response_id: i32::MAX,
            ..HeartbeatResponse::initial()
        },
    );

    let resp = h.service.allocate(&anyone(), heartbeat(i32::MAX, vec![ask(1)])).await.unwrap();
    assert!(resp.reboot);
    assert_eq!(h.scheduler.calls(), 0);
    assert_eq!(
        h.service.cache().get(&attempt()).unwrap().response.response_id,
        i32::MAX
    );

    // The previous response can still be replayed.
    let resp = h.service.allocate(&anyone(), heartbeat(i32::MAX - 1, vec![])).await.unwrap();
    assert!(!resp.reboot);
    assert_eq!(resp.response_id, i32::MAX);
}

#[tokio::test]
async fn unregister_while_waiting_for_lock_reboots() {
    let h = harness();
    h.service.register_app_attempt(attempt());

    let entry = h.service.cache().get(&attempt()).unwrap();
    let held = entry.lock().clone().lock_owned().await;

    let service = h.service.clone();
    let pending = tokio::spawn(async move {
        service.allocate(&anyone(), heartbeat(0, vec![])).await
    });
    tokio::task::yield_now().await;

    h.service.unregister_attempt(&attempt());
    drop(held);

    let resp = pending.await.unwrap().unwrap();
    assert!(resp.reboot);
    assert_eq!(h.scheduler.calls(), 0);
}
