//! Retry/dispatch loop for usage events.
//!
//! Workers pull events from the [`WorkQueue`] and hand them to an
//! [`EventHandler`]. A failed event is requeued with per-key exponential
//! backoff; after [`MAX_RETRIES`] consecutive failures the key is dropped and
//! its count reset. Errors that are not retryable drop the key on the first
//! failure. A success resets the count immediately.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use super::error::Result;
use super::usage_tracker::{ChangeEvent, NetworkLookup, UsageTracker};
use super::work_queue::WorkQueue;
use crate::health::HealthState;

/// Consecutive failures after which a key is dropped
pub const MAX_RETRIES: u32 = 5;

/// Delay before the first retry of a key
pub const BASE_RETRY_DELAY: Duration = Duration::from_millis(5);

/// Upper bound on the retry delay
pub const MAX_RETRY_DELAY: Duration = Duration::from_secs(1000);

/// Retry delay after `failures` consecutive failures: `base * 2^(failures - 1)`,
/// capped at `max`.
pub fn backoff_delay(failures: u32, base: Duration, max: Duration) -> Duration {
    let exponent = failures.saturating_sub(1).min(31);
    base.checked_mul(1u32 << exponent)
        .map_or(max, |delay| delay.min(max))
}

/// Processes one dequeued event
pub trait EventHandler: Send + Sync + 'static {
    fn handle(&self, event: &ChangeEvent) -> impl Future<Output = Result<()>> + Send;
}

impl<L: NetworkLookup + 'static> EventHandler for UsageTracker<L> {
    async fn handle(&self, event: &ChangeEvent) -> Result<()> {
        self.apply(event).await;
        Ok(())
    }
}

/// Worker pool driving an [`EventHandler`] from a [`WorkQueue`]
pub struct Dispatcher<H> {
    queue: Arc<WorkQueue>,
    handler: Arc<H>,
    workers: usize,
    base_delay: Duration,
    max_delay: Duration,
    health_state: Option<Arc<HealthState>>,
}

impl<H: EventHandler> Dispatcher<H> {
    /// Create a single-worker dispatcher
    pub fn new(queue: Arc<WorkQueue>, handler: Arc<H>) -> Self {
        Self {
            queue,
            handler,
            workers: 1,
            base_delay: BASE_RETRY_DELAY,
            max_delay: MAX_RETRY_DELAY,
            health_state: None,
        }
    }

    /// Number of concurrent workers (at least one)
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    /// Override the retry backoff bounds
    pub fn with_backoff(mut self, base: Duration, max: Duration) -> Self {
        self.base_delay = base;
        self.max_delay = max;
        self
    }

    /// Record retry and drop metrics on the given health state
    pub fn with_health_state(mut self, health_state: Option<Arc<HealthState>>) -> Self {
        self.health_state = health_state;
        self
    }

    /// The queue workers pull from
    pub fn queue(&self) -> &Arc<WorkQueue> {
        &self.queue
    }

    /// Run workers until `cancel` fires, then let in-flight events finish.
    pub async fn run(self, cancel: CancellationToken) {
        let this = Arc::new(self);
        info!(workers = this.workers, "Starting usage dispatcher");

        let mut workers = JoinSet::new();
        for worker in 0..this.workers {
            let this = Arc::clone(&this);
            workers.spawn(async move {
                while this.process_next().await {}
                debug!(worker = worker, "Usage worker stopped");
            });
        }

        cancel.cancelled().await;
        info!("Shutting down usage dispatcher, draining in-flight events");
        this.queue.shutdown();

        while let Some(joined) = workers.join_next().await {
            if let Err(e) = joined {
                error!(error = %e, "Usage worker panicked");
            }
        }
        info!("Usage dispatcher stopped");
    }

    /// Handle one event. Returns false once the queue has shut down.
    async fn process_next(&self) -> bool {
        let Some(event) = self.queue.get().await else {
            return false;
        };
        let key = event.key.clone();

        let result = self.handler.handle(&event).await;
        self.handle_result(event, result);
        self.queue.done(&key);
        true
    }

    fn handle_result(&self, event: ChangeEvent, result: Result<()>) {
        let err = match result {
            Ok(()) => {
                self.queue.forget(&event.key);
                return;
            }
            Err(err) => err,
        };

        let failures = self.queue.record_failure(&event.key);
        if err.is_retryable() && failures < MAX_RETRIES {
            let delay = backoff_delay(failures, self.base_delay, self.max_delay);
            info!(
                pod = %event.key,
                attempt = failures,
                retry_in = ?delay,
                error = %err,
                "Error syncing pod, requeueing"
            );
            if let Some(state) = &self.health_state {
                state.metrics.record_dispatch_retry();
            }
            self.queue.add_after(event, delay);
            return;
        }

        self.queue.forget(&event.key);
        if let Some(state) = &self.health_state {
            state.metrics.record_dispatch_dropped();
        }
        error!(
            pod = %event.key,
            attempts = failures,
            error = %err,
            "Dropping pod out of the queue"
        );
    }
}
