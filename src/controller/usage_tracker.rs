//! Usage tracking state machine.
//!
//! Counts running pods per CNI plugin type. Each pod key moves between
//! `Untracked` and `Tracked(types)`:
//! - `on_add` reverses any previous count for the key, then counts the plugin
//!   types its annotation resolves to
//! - `on_delete` reverses the remembered count and forgets the key
//!
//! For every counted pod the tracker emits `+1` on each distinct plugin type,
//! `+1` on the sorted comma-joined combination when there is more than one
//! type, and `+1` on [`ANY_NETWORK`]. Deletes mirror this with `-1`.

use std::collections::{BTreeSet, HashSet};
use std::future::Future;
use std::sync::Arc;

use kube::ResourceExt;
use tracing::{debug, info, warn};

use crate::cni;
use crate::controller::error::LookupError;
use crate::crd::NetworkAttachmentDefinition;
use crate::network::parse_network_annotation;

/// Label counted once for every tracked pod
pub const ANY_NETWORK: &str = "any";

/// Receives counter updates produced by the tracker.
pub trait MetricsSink: Send + Sync {
    /// Adjust the instance count of `label` by `delta`
    fn add_instances(&self, label: &str, delta: f64);

    /// Report whether any pod currently uses `label`
    fn set_enabled(&self, label: &str, up: bool);
}

/// Resolves NetworkAttachmentDefinitions referenced by pod annotations.
pub trait NetworkLookup: Send + Sync {
    /// Fetch a definition by name. `Ok(None)` means it does not exist.
    fn get_by_name(
        &self,
        name: &str,
        namespace: &str,
    ) -> impl Future<Output = Result<Option<NetworkAttachmentDefinition>, LookupError>> + Send;
}

impl<T: NetworkLookup> NetworkLookup for Arc<T> {
    fn get_by_name(
        &self,
        name: &str,
        namespace: &str,
    ) -> impl Future<Output = Result<Option<NetworkAttachmentDefinition>, LookupError>> + Send {
        (**self).get_by_name(name, namespace)
    }
}

/// What happened to a pod
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Create,
    Update,
    Delete,
}

/// A pod change relevant to usage tracking
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeEvent {
    /// Pod key, `namespace/name`
    pub key: String,
    pub kind: ChangeKind,
    /// Network-selection annotation value, absent once removed
    pub annotation: Option<String>,
    /// Pod namespace, the default for unqualified references
    pub namespace: String,
}

impl ChangeEvent {
    /// A create or update carrying the pod's current annotation
    pub fn applied(
        kind: ChangeKind,
        key: impl Into<String>,
        namespace: impl Into<String>,
        annotation: Option<String>,
    ) -> Self {
        Self {
            key: key.into(),
            kind,
            annotation,
            namespace: namespace.into(),
        }
    }

    /// A pod that is gone or no longer annotated
    pub fn deleted(key: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            kind: ChangeKind::Delete,
            annotation: None,
            namespace: namespace.into(),
        }
    }
}

/// Sorted, comma-joined plugin types
pub fn combination_key(types: &BTreeSet<String>) -> String {
    types.iter().map(String::as_str).collect::<Vec<_>>().join(",")
}

/// Usage tracker over an injectable store, lookup and metrics sink
pub struct UsageTracker<L> {
    lookup: L,
    store: Arc<super::UsageStore>,
    sink: Arc<dyn MetricsSink>,
    /// Labels whose "enabled instance up" gauge is maintained
    tracked_labels: HashSet<String>,
}

impl<L: NetworkLookup> UsageTracker<L> {
    /// Create a tracker that maintains the enabled gauge for [`ANY_NETWORK`]
    pub fn new(lookup: L, store: Arc<super::UsageStore>, sink: Arc<dyn MetricsSink>) -> Self {
        Self {
            lookup,
            store,
            sink,
            tracked_labels: HashSet::from([ANY_NETWORK.to_string()]),
        }
    }

    /// Replace the set of labels with an enabled gauge
    pub fn with_tracked_labels<I, S>(mut self, labels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tracked_labels = labels.into_iter().map(Into::into).collect();
        self
    }

    /// The store backing this tracker
    pub fn store(&self) -> &Arc<super::UsageStore> {
        &self.store
    }

    /// Apply a change event to the tracked state
    pub async fn apply(&self, event: &ChangeEvent) {
        match (event.kind, event.annotation.as_deref()) {
            (ChangeKind::Delete, _) | (_, None) => self.on_delete(&event.key),
            (_, Some(annotation)) => self.on_add(&event.key, annotation, &event.namespace).await,
        }
    }

    /// Count a pod's networks, replacing any earlier count for the same key
    pub async fn on_add(&self, key: &str, annotation: &str, namespace: &str) {
        if self.store.remembered(key).is_some() {
            self.on_delete(key);
        }

        info!(pod = key, namespace = namespace, "Pod found for net-attach-def metrics");

        let types = self.resolve_plugin_types(annotation, namespace).await;
        for plugin_type in &types {
            self.emit(plugin_type, 1);
        }
        let combination = combination_key(&types);
        if types.len() > 1 {
            self.emit(&combination, 1);
        }
        self.emit(ANY_NETWORK, 1);

        debug!(pod = key, networks = %combination, "Tracking pod network usage");
        self.store.remember(key, types);
    }

    /// Reverse the remembered count for a pod. Untracked keys are a no-op.
    pub fn on_delete(&self, key: &str) {
        let Some(types) = self.store.forget(key) else {
            debug!(pod = key, "Pod not tracked, nothing to remove");
            return;
        };

        for plugin_type in &types {
            self.emit(plugin_type, -1);
        }
        let combination = combination_key(&types);
        if types.len() > 1 {
            self.emit(&combination, -1);
        }
        self.emit(ANY_NETWORK, -1);

        debug!(pod = key, networks = %combination, "Stopped tracking pod network usage");
    }

    /// Union of plugin types across every resolvable network in `annotation`.
    ///
    /// Unparseable annotations, missing definitions, failed lookups and
    /// unclassifiable configs all contribute nothing.
    pub async fn resolve_plugin_types(&self, annotation: &str, namespace: &str) -> BTreeSet<String> {
        let mut types = BTreeSet::new();

        let networks = match parse_network_annotation(annotation, namespace) {
            Ok(networks) => networks,
            Err(e) => {
                warn!(namespace = namespace, error = %e, "Error reading pod annotation");
                return types;
            }
        };

        for network in networks {
            let nad = match self
                .lookup
                .get_by_name(&network.name, &network.namespace)
                .await
            {
                Ok(Some(nad)) => nad,
                Ok(None) => {
                    debug!(
                        name = %network.name,
                        namespace = %network.namespace,
                        "Network attachment definition not found, skipping"
                    );
                    continue;
                }
                Err(e) => {
                    warn!(error = %e, "Skipping network reference");
                    continue;
                }
            };

            match cni::classify_named(&nad.name_any(), nad.config()) {
                Ok(plugin_types) => types.extend(plugin_types),
                Err(e) => {
                    debug!(
                        name = %network.name,
                        namespace = %network.namespace,
                        error = %e,
                        "Network attachment definition config not classifiable"
                    );
                }
            }
        }

        types
    }

    fn emit(&self, label: &str, delta: i64) {
        let tracked = self.tracked_labels.contains(label);
        self.store.adjust(label, delta, |sum| {
            self.sink.add_instances(label, delta as f64);
            if tracked {
                self.sink.set_enabled(label, sum > 0);
            }
        });
    }
}
