//! Pod watch events flowing through the adapter, queue, workers and tracker.

use std::sync::Arc;
use std::time::Duration;

use k8s_openapi::api::core::v1::Pod;
use kube::runtime::watcher::Event;
use tokio_util::sync::CancellationToken;

use nad_admission_controller::controller::{Dispatcher, PodEventAdapter, WorkQueue};

use crate::common::fixtures::{PodBuilder, standard_networks};
use crate::mock_state::MockUsage;

/// Adapter feeding a live dispatcher
struct Pipeline {
    usage: MockUsage,
    adapter: PodEventAdapter,
    queue: Arc<WorkQueue>,
    cancel: CancellationToken,
    handle: tokio::task::JoinHandle<()>,
}

impl Pipeline {
    fn start() -> Self {
        let usage = MockUsage::new(standard_networks());
        let queue = Arc::new(WorkQueue::new());
        let dispatcher = Dispatcher::new(queue.clone(), usage.tracker.clone()).with_workers(2);
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(dispatcher.run(cancel.clone()));
        Self {
            usage,
            adapter: PodEventAdapter::new(),
            queue,
            cancel,
            handle,
        }
    }

    fn send(&mut self, event: Event<Pod>) {
        for change in self.adapter.on_event(event) {
            self.queue.add(change);
        }
    }

    /// Wait until the queue drains and `any` reaches `expected`
    async fn settle(&self, expected: i64) {
        let store = self.usage.store().clone();
        let queue = self.queue.clone();
        tokio::time::timeout(Duration::from_secs(5), async move {
            while !(queue.is_empty() && store.running_sum("any") == expected) {
                tokio::time::sleep(Duration::from_millis(2)).await;
            }
        })
        .await
        .expect("pipeline settles");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    async fn stop(self) {
        self.cancel.cancel();
        self.handle.await.unwrap();
    }
}

#[tokio::test]
async fn test_pod_lifecycle() {
    let mut pipeline = Pipeline::start();

    let pending = PodBuilder::new("pod-a")
        .networks("macvlan-conf")
        .phase("Pending")
        .build();
    pipeline.send(Event::Apply(pending));
    pipeline.settle(0).await;
    assert!(pipeline.usage.sink.emissions().is_empty());

    let running = PodBuilder::new("pod-a").networks("macvlan-conf").build();
    pipeline.send(Event::Apply(running.clone()));
    pipeline.settle(1).await;
    assert_eq!(pipeline.usage.store().running_sum("macvlan"), 1);

    // Terminating pods keep their count until the delete arrives
    let terminating = PodBuilder::new("pod-a")
        .networks("macvlan-conf")
        .terminating()
        .build();
    pipeline.send(Event::Apply(terminating));
    pipeline.settle(1).await;

    pipeline.send(Event::Delete(running));
    pipeline.settle(0).await;
    assert!(pipeline.usage.store().sums().is_empty());

    pipeline.stop().await;
}

#[tokio::test]
async fn test_annotation_change_and_removal() {
    let mut pipeline = Pipeline::start();

    pipeline.send(Event::Apply(
        PodBuilder::new("pod-a").networks("macvlan-conf").build(),
    ));
    pipeline.settle(1).await;

    pipeline.send(Event::Apply(
        PodBuilder::new("pod-a")
            .networks("bridge-tuning,macvlan-conf")
            .build(),
    ));
    pipeline.settle(1).await;
    let store = pipeline.usage.store().clone();
    assert_eq!(store.running_sum("bridge,macvlan,tuning"), 1);
    assert_eq!(store.running_sum("macvlan"), 1);

    // Dropping the annotation counts as a delete
    pipeline.send(Event::Apply(PodBuilder::new("pod-a").build()));
    pipeline.settle(0).await;
    assert!(store.sums().is_empty());

    pipeline.stop().await;
}

#[tokio::test]
async fn test_unannotated_pods_are_ignored() {
    let mut pipeline = Pipeline::start();

    let plain = PodBuilder::new("plain").build();
    pipeline.send(Event::Apply(plain.clone()));
    pipeline.send(Event::Delete(plain));
    pipeline.settle(0).await;

    assert!(pipeline.usage.sink.emissions().is_empty());
    assert_eq!(pipeline.usage.lookup.calls(), 0);

    pipeline.stop().await;
}

#[tokio::test]
async fn test_relist_removes_vanished_pods() {
    let mut pipeline = Pipeline::start();

    pipeline.send(Event::Apply(
        PodBuilder::new("pod-a").networks("macvlan-conf").build(),
    ));
    pipeline.send(Event::Apply(
        PodBuilder::new("pod-b")
            .namespace("kube-system")
            .networks("sriov-net")
            .build(),
    ));
    pipeline.settle(2).await;

    // pod-a disappeared while the watch was disconnected
    pipeline.send(Event::Init);
    pipeline.send(Event::InitApply(
        PodBuilder::new("pod-b")
            .namespace("kube-system")
            .networks("sriov-net")
            .build(),
    ));
    pipeline.send(Event::InitDone);
    pipeline.settle(1).await;

    let store = pipeline.usage.store();
    assert_eq!(store.running_sum("macvlan"), 0);
    assert_eq!(store.running_sum("sriov"), 1);
    assert_eq!(store.remembered("default/pod-a"), None);
    assert_eq!(pipeline.adapter.known_pods(), 1);

    pipeline.stop().await;
}
