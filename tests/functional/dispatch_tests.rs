//! Retry behaviour of the dispatcher wrapped around a real tracker.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use nad_admission_controller::HealthState;
use nad_admission_controller::controller::{
    ChangeEvent, ChangeKind, Dispatcher, Error, EventHandler, MAX_RETRIES, Result, UsageTracker,
    WorkQueue,
};

use crate::common::fixtures::standard_networks;
use crate::mock_state::{MockLookup, MockUsage};

/// Fails the first `fail_times` attempts per key, then delegates to the tracker
struct FailingTracker {
    inner: Arc<UsageTracker<Arc<MockLookup>>>,
    fail_times: u32,
    attempts: Mutex<HashMap<String, u32>>,
    applied: Mutex<Vec<ChangeKind>>,
}

impl FailingTracker {
    fn new(inner: Arc<UsageTracker<Arc<MockLookup>>>, fail_times: u32) -> Self {
        Self {
            inner,
            fail_times,
            attempts: Mutex::new(HashMap::new()),
            applied: Mutex::new(Vec::new()),
        }
    }

    fn applied(&self) -> Vec<ChangeKind> {
        self.applied.lock().clone()
    }

    fn attempts(&self, key: &str) -> u32 {
        self.attempts.lock().get(key).copied().unwrap_or(0)
    }
}

impl EventHandler for FailingTracker {
    async fn handle(&self, event: &ChangeEvent) -> Result<()> {
        let attempt = {
            let mut attempts = self.attempts.lock();
            let attempt = attempts.entry(event.key.clone()).or_insert(0);
            *attempt += 1;
            *attempt
        };
        if attempt <= self.fail_times {
            return Err(Error::Dispatch(format!("injected failure {}", attempt)));
        }
        self.inner.apply(event).await;
        self.applied.lock().push(event.kind);
        Ok(())
    }
}

struct Running {
    queue: Arc<WorkQueue>,
    health: Arc<HealthState>,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl Running {
    async fn stop(self) {
        self.cancel.cancel();
        tokio::time::timeout(Duration::from_secs(5), self.handle)
            .await
            .expect("dispatcher stops")
            .unwrap();
    }
}

fn start(handler: Arc<FailingTracker>, workers: usize) -> Running {
    start_with_backoff(handler, workers, Duration::from_millis(1))
}

fn start_with_backoff(handler: Arc<FailingTracker>, workers: usize, base: Duration) -> Running {
    let queue = Arc::new(WorkQueue::new());
    let health = Arc::new(HealthState::new());
    let dispatcher = Dispatcher::new(queue.clone(), handler)
        .with_workers(workers)
        .with_backoff(base, base * 8)
        .with_health_state(Some(health.clone()));
    let cancel = CancellationToken::new();
    let handle = tokio::spawn(dispatcher.run(cancel.clone()));
    Running {
        queue,
        health,
        cancel,
        handle,
    }
}

async fn eventually(mut check: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !check() {
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    })
    .await
    .expect("condition reached in time");
    tokio::time::sleep(Duration::from_millis(30)).await;
}

fn create(key: &str, annotation: &str) -> ChangeEvent {
    ChangeEvent::applied(
        ChangeKind::Create,
        key,
        "default",
        Some(annotation.to_string()),
    )
}

#[tokio::test]
async fn test_event_applied_after_transient_failures() {
    let usage = MockUsage::new(standard_networks());
    let handler = Arc::new(FailingTracker::new(usage.tracker.clone(), 3));
    let running = start(handler.clone(), 1);

    running.queue.add(create("default/pod-a", "macvlan-conf"));
    eventually(|| usage.store().running_sum("macvlan") == 1).await;

    assert_eq!(handler.attempts("default/pod-a"), 4);
    assert_eq!(running.queue.failures("default/pod-a"), 0);
    assert_eq!(running.health.metrics.dispatch_retries_total.get(), 3);
    assert_eq!(running.health.metrics.dispatch_dropped_total.get(), 0);

    running.stop().await;
}

#[tokio::test]
async fn test_event_dropped_after_five_failures() {
    let usage = MockUsage::new(standard_networks());
    let handler = Arc::new(FailingTracker::new(usage.tracker.clone(), MAX_RETRIES));
    let running = start(handler.clone(), 1);

    running.queue.add(create("default/pod-a", "macvlan-conf"));
    eventually(|| running.health.metrics.dispatch_dropped_total.get() == 1).await;

    assert_eq!(handler.attempts("default/pod-a"), MAX_RETRIES);
    assert_eq!(running.health.metrics.dispatch_retries_total.get(), 4);
    assert!(usage.sink.emissions().is_empty());
    assert_eq!(running.queue.failures("default/pod-a"), 0);

    // The next event for the key starts a fresh budget and succeeds
    running.queue.add(create("default/pod-a", "macvlan-conf"));
    eventually(|| usage.store().running_sum("macvlan") == 1).await;
    assert_eq!(handler.attempts("default/pod-a"), MAX_RETRIES + 1);

    running.stop().await;
}

#[tokio::test]
async fn test_newer_event_wins_over_retry() {
    let usage = MockUsage::new(standard_networks());
    let handler = Arc::new(FailingTracker::new(usage.tracker.clone(), 1));
    let running = start(handler.clone(), 1);

    running.queue.add(create("default/pod-a", "macvlan-conf"));
    running
        .queue
        .add(create("default/pod-a", "kube-system/sriov-net"));
    eventually(|| usage.store().running_sum("any") == 1 && running.queue.is_empty()).await;

    assert_eq!(
        usage.store().remembered("default/pod-a").as_deref(),
        Some("sriov")
    );
    assert_eq!(usage.store().running_sum("macvlan"), 0);

    running.stop().await;
}

#[tokio::test]
async fn test_processed_delete_cancels_pending_retry() {
    let usage = MockUsage::new(standard_networks());
    let handler = Arc::new(FailingTracker::new(usage.tracker.clone(), 1));
    let running = start_with_backoff(handler.clone(), 1, Duration::from_millis(100));

    // The create fails and waits out its backoff
    running.queue.add(create("default/pod-a", "macvlan-conf"));
    tokio::time::sleep(Duration::from_millis(20)).await;
    running
        .queue
        .add(ChangeEvent::deleted("default/pod-a", "default"));
    eventually(|| handler.applied() == vec![ChangeKind::Delete]).await;

    // Well past the retry deadline
    tokio::time::sleep(Duration::from_millis(250)).await;

    assert_eq!(handler.applied(), vec![ChangeKind::Delete]);
    assert_eq!(handler.attempts("default/pod-a"), 2);
    assert!(usage.store().sums().is_empty());
    assert_eq!(usage.store().remembered("default/pod-a"), None);

    running.stop().await;
}

#[tokio::test]
async fn test_many_pods_across_workers_net_to_zero() {
    let usage = MockUsage::new(standard_networks());
    let handler = Arc::new(FailingTracker::new(usage.tracker.clone(), 0));
    let running = start(handler.clone(), 4);

    let annotations = ["macvlan-conf", "bridge-tuning", "ib-net", "macvlan-conf,ib-net"];
    for i in 0..40 {
        let key = format!("default/pod-{}", i);
        running.queue.add(create(&key, annotations[i % annotations.len()]));
    }
    eventually(|| usage.store().running_sum("any") == 40).await;
    assert_eq!(usage.store().running_sum("macvlan"), 20);
    assert_eq!(usage.store().running_sum("ib-sriov,macvlan"), 10);

    for i in 0..40 {
        running
            .queue
            .add(ChangeEvent::deleted(format!("default/pod-{}", i), "default"));
    }
    eventually(|| usage.store().sums().is_empty()).await;
    assert!(usage.sink.totals().is_empty());
    assert_eq!(usage.store().tracked_count(), 0);

    running.stop().await;
}
