//! Keyed work queue for usage events.
//!
//! Guarantees:
//! - a key is held by at most one worker at a time
//! - a key appears in the queue at most once; newer events for a queued or
//!   in-flight key replace the pending one (latest wins)
//! - an event that arrives while its key is in flight is queued again when
//!   the worker calls [`WorkQueue::done`]
//! - a delayed retry is discarded once any newer event for its key has been
//!   added, whether that event is still pending or already processed
//!
//! Failure counts are kept per key for the dispatcher's retry ceiling.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Notify;
use tracing::debug;

use super::usage_tracker::ChangeEvent;

#[derive(Default)]
struct QueueState {
    /// Keys ready to be handed out, in arrival order
    queue: VecDeque<String>,
    /// Newest unprocessed event per key
    pending: HashMap<String, ChangeEvent>,
    /// Keys currently held by a worker, with the generation handed out
    processing: HashMap<String, u64>,
    /// Generation of the newest event added per key
    generations: HashMap<String, u64>,
    /// Source of generations, unique across keys
    next_generation: u64,
    /// Consecutive failures per key
    failures: HashMap<String, u32>,
    shutting_down: bool,
}

/// Work queue with per-key exclusivity
#[derive(Default)]
pub struct WorkQueue {
    state: Mutex<QueueState>,
    notify: Notify,
}

impl WorkQueue {
    /// Create an empty queue
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueue an event, replacing any pending event for the same key
    pub fn add(&self, event: ChangeEvent) {
        let mut state = self.state.lock();
        if state.shutting_down {
            return;
        }
        let key = event.key.clone();
        state.next_generation += 1;
        let generation = state.next_generation;
        state.generations.insert(key.clone(), generation);
        if state.pending.insert(key.clone(), event).is_some() {
            return;
        }
        if !state.processing.contains_key(&key) {
            state.queue.push_back(key);
            drop(state);
            self.notify.notify_one();
        }
    }

    /// Enqueue an event unless its key moved past `generation`
    fn add_if_current(&self, event: ChangeEvent, generation: Option<u64>) {
        {
            let state = self.state.lock();
            if state.generations.get(&event.key).copied() != generation {
                debug!(pod = %event.key, "Discarding retry superseded by a newer event");
                return;
            }
        }
        self.add(event);
    }

    /// Enqueue an event after `delay`, unless superseded in the meantime.
    ///
    /// For a key held by a worker the event is tied to the generation that
    /// worker was handed, so any later `add` for the key cancels the retry.
    pub fn add_after(self: &Arc<Self>, event: ChangeEvent, delay: Duration) {
        let generation = {
            let state = self.state.lock();
            state
                .processing
                .get(&event.key)
                .or_else(|| state.generations.get(&event.key))
                .copied()
        };
        let queue = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            queue.add_if_current(event, generation);
        });
    }

    /// Wait for the next event. Returns `None` once the queue shuts down.
    ///
    /// The returned event's key is held until [`WorkQueue::done`] is called.
    pub async fn get(&self) -> Option<ChangeEvent> {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut state = self.state.lock();
                if state.shutting_down {
                    return None;
                }
                while let Some(key) = state.queue.pop_front() {
                    if let Some(event) = state.pending.remove(&key) {
                        let generation = state.generations.get(&key).copied().unwrap_or(0);
                        state.processing.insert(key, generation);
                        return Some(event);
                    }
                }
            }

            notified.await;
        }
    }

    /// Release a key taken by [`WorkQueue::get`]
    pub fn done(&self, key: &str) {
        let mut state = self.state.lock();
        state.processing.remove(key);
        if state.pending.contains_key(key) && !state.shutting_down {
            state.queue.push_back(key.to_string());
            drop(state);
            self.notify.notify_one();
        } else if !state.pending.contains_key(key) && !state.failures.contains_key(key) {
            // Nothing pending and no retry outstanding
            state.generations.remove(key);
        }
    }

    /// Count a failure for `key`, returning the new consecutive total
    pub fn record_failure(&self, key: &str) -> u32 {
        let mut state = self.state.lock();
        let failures = state.failures.entry(key.to_string()).or_insert(0);
        *failures += 1;
        *failures
    }

    /// Reset the failure count for `key`
    pub fn forget(&self, key: &str) {
        self.state.lock().failures.remove(key);
    }

    /// Consecutive failures recorded for `key`
    pub fn failures(&self, key: &str) -> u32 {
        self.state.lock().failures.get(key).copied().unwrap_or(0)
    }

    /// Number of keys waiting to be handed out
    pub fn len(&self) -> usize {
        self.state.lock().queue.len()
    }

    /// Whether no key is waiting
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Stop handing out keys. Workers blocked in [`WorkQueue::get`] return.
    pub fn shutdown(&self) {
        self.state.lock().shutting_down = true;
        self.notify.notify_waiters();
    }

    /// Whether [`WorkQueue::shutdown`] was called
    pub fn is_shutting_down(&self) -> bool {
        self.state.lock().shutting_down
    }
}
