//! Pod watch adapter.
//!
//! Turns raw pod watch events into typed [`ChangeEvent`]s for the usage
//! dispatcher:
//! - only pods carrying the network-selection annotation are considered
//! - counting happens while a pod is `Running`
//! - an update that removes the annotation becomes a delete
//! - pods with a deletion timestamp are ignored until the delete arrives
//! - after a re-list, pods that vanished while disconnected are deleted

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use futures::StreamExt;
use k8s_openapi::api::core::v1::Pod;
use kube::runtime::watcher::Event;
use kube::runtime::{WatchStreamExt, watcher};
use kube::{Api, Client, ResourceExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::usage_tracker::{ChangeEvent, ChangeKind};
use super::work_queue::WorkQueue;
use crate::network::NETWORKS_ANNOTATION;

/// Phase in which a pod's networks are counted
const RUNNING_PHASE: &str = "Running";

/// `namespace/name` key of a pod
pub fn pod_key(pod: &Pod) -> String {
    match pod.namespace() {
        Some(namespace) => format!("{}/{}", namespace, pod.name_any()),
        None => pod.name_any(),
    }
}

fn networks_annotation(pod: &Pod) -> Option<&String> {
    pod.annotations().get(NETWORKS_ANNOTATION)
}

fn is_running(pod: &Pod) -> bool {
    pod.status
        .as_ref()
        .and_then(|status| status.phase.as_deref())
        == Some(RUNNING_PHASE)
}

/// Stateful translation of pod watch events into change events
#[derive(Debug, Default)]
pub struct PodEventAdapter {
    /// Annotated pods seen so far, key to namespace
    known: HashMap<String, String>,
    /// Keys observed during an in-progress re-list
    relist: Option<HashSet<String>>,
}

impl PodEventAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of annotated pods currently known
    pub fn known_pods(&self) -> usize {
        self.known.len()
    }

    /// Translate one watch event
    pub fn on_event(&mut self, event: Event<Pod>) -> Vec<ChangeEvent> {
        match event {
            Event::Apply(pod) => self.on_apply(&pod).into_iter().collect(),
            Event::Delete(pod) => self.on_delete(&pod).into_iter().collect(),
            Event::Init => {
                self.relist = Some(HashSet::new());
                Vec::new()
            }
            Event::InitApply(pod) => {
                if let Some(relist) = self.relist.as_mut() {
                    relist.insert(pod_key(&pod));
                }
                self.on_apply(&pod).into_iter().collect()
            }
            Event::InitDone => self.on_relist_done(),
        }
    }

    fn on_apply(&mut self, pod: &Pod) -> Option<ChangeEvent> {
        let key = pod_key(pod);
        let namespace = pod.namespace().unwrap_or_default();

        if pod.metadata.deletion_timestamp.is_some() {
            debug!(pod = %key, "Pod is terminating, waiting for delete");
            return None;
        }

        let Some(annotation) = networks_annotation(pod) else {
            // Annotation removed from a previously annotated pod
            return self
                .known
                .remove(&key)
                .map(|namespace| ChangeEvent::deleted(key, namespace));
        };

        let kind = if self.known.contains_key(&key) {
            ChangeKind::Update
        } else {
            ChangeKind::Create
        };
        self.known.insert(key.clone(), namespace.clone());

        if !is_running(pod) {
            debug!(pod = %key, "Pod not running, not counted");
            return None;
        }

        Some(ChangeEvent::applied(
            kind,
            key,
            namespace,
            Some(annotation.clone()),
        ))
    }

    fn on_delete(&mut self, pod: &Pod) -> Option<ChangeEvent> {
        let key = pod_key(pod);
        let was_known = self.known.remove(&key).is_some();
        if was_known || networks_annotation(pod).is_some() {
            Some(ChangeEvent::deleted(key, pod.namespace().unwrap_or_default()))
        } else {
            None
        }
    }

    fn on_relist_done(&mut self) -> Vec<ChangeEvent> {
        let Some(relist) = self.relist.take() else {
            return Vec::new();
        };
        let vanished: Vec<String> = self
            .known
            .keys()
            .filter(|key| !relist.contains(*key))
            .cloned()
            .collect();

        vanished
            .into_iter()
            .filter_map(|key| {
                self.known
                    .remove(&key)
                    .map(|namespace| ChangeEvent::deleted(key, namespace))
            })
            .collect()
    }
}

/// Watch pods cluster-wide and feed change events into `queue` until
/// `cancel` fires.
pub async fn run_pod_watcher(client: Client, queue: Arc<WorkQueue>, cancel: CancellationToken) {
    let pods: Api<Pod> = Api::all(client);
    let config = watcher::Config::default().any_semantic();
    let stream = watcher(pods, config).default_backoff();
    futures::pin_mut!(stream);

    let mut adapter = PodEventAdapter::new();
    let mut synced = false;
    info!("Starting pod watcher for net-attach-def usage");

    loop {
        let next = tokio::select! {
            _ = cancel.cancelled() => break,
            next = stream.next() => next,
        };

        match next {
            Some(Ok(event)) => {
                let relist_done = matches!(event, Event::InitDone);
                for change in adapter.on_event(event) {
                    queue.add(change);
                }
                if relist_done && !synced {
                    synced = true;
                    info!(pods = adapter.known_pods(), "Pod watcher synced and ready");
                }
            }
            Some(Err(e)) => warn!(error = %e, "Pod watch error, retrying"),
            None => {
                error!("Pod watch stream ended unexpectedly");
                break;
            }
        }
    }

    info!("Pod watcher stopped");
}
