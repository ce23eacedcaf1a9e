//! nad-admission-controller library crate
//!
//! Admission webhooks for NetworkAttachmentDefinitions and pod network
//! selections, plus a usage tracker that counts running pods per CNI plugin
//! type.

pub mod cni;
pub mod config;
pub mod controller;
pub mod crd;
pub mod health;
pub mod network;
pub mod webhooks;

pub use config::Cli;
pub use health::HealthState;
pub use webhooks::{WEBHOOK_PORT, WebhookError, WebhookServerConfig, run_webhook_server};

use std::sync::Arc;
use std::time::Duration;

use kube::Client;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use controller::{
    Dispatcher, KubeNetworkLookup, MetricsSink, UsageStore, UsageTracker, WorkQueue,
    run_pod_watcher,
};

/// Settings for the usage tracking pipeline
#[derive(Debug, Clone)]
pub struct UsageTrackingConfig {
    /// Concurrent dispatch workers
    pub workers: usize,
    /// Labels with an "enabled instance up" gauge
    pub tracked_labels: Vec<String>,
    /// Timeout for one definition lookup
    pub lookup_timeout: Duration,
}

impl From<&Cli> for UsageTrackingConfig {
    fn from(cli: &Cli) -> Self {
        Self {
            workers: cli.workers,
            tracked_labels: cli.tracked_labels(),
            lookup_timeout: cli.lookup_timeout(),
        }
    }
}

/// Run the usage tracker until `cancel` fires.
///
/// Watches pods cluster-wide, dispatches their changes to the tracker and
/// records counts on `health_state`. Returns after in-flight events drain.
pub async fn run_usage_tracking(
    client: Client,
    config: UsageTrackingConfig,
    health_state: Arc<HealthState>,
    cancel: CancellationToken,
) {
    info!(
        workers = config.workers,
        tracked = ?config.tracked_labels,
        "Starting net-attach-def usage tracking"
    );

    health_state.metrics.init_tracked_labels(&config.tracked_labels);

    let lookup = KubeNetworkLookup::new(client.clone()).with_timeout(config.lookup_timeout);
    let sink: Arc<dyn MetricsSink> = health_state.clone();
    let tracker = UsageTracker::new(lookup, Arc::new(UsageStore::new()), sink)
        .with_tracked_labels(config.tracked_labels);

    let queue = Arc::new(WorkQueue::new());
    let dispatcher = Dispatcher::new(queue.clone(), Arc::new(tracker))
        .with_workers(config.workers)
        .with_health_state(Some(health_state));

    let watcher = tokio::spawn(run_pod_watcher(client, queue, cancel.clone()));

    dispatcher.run(cancel).await;

    if let Err(e) = watcher.await {
        error!(error = %e, "Pod watcher task panicked");
    }
}
