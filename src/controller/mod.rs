//! Usage controller for network-attachment-definition metrics.
//!
//! Pod watch events flow through the pipeline:
//! - `watch`: pod events become typed change events
//! - `work_queue`: per-key exclusive, latest-wins queue
//! - `dispatcher`: worker pool with bounded retries
//! - `usage_tracker`: per-pod state machine emitting counter deltas
//! - `usage_store`: remembered combinations and running sums
//!
//! `lookup` resolves referenced definitions against the API server.

pub mod dispatcher;
pub mod error;
pub mod lookup;
pub mod usage_store;
pub mod usage_tracker;
pub mod watch;
pub mod work_queue;

pub use dispatcher::{Dispatcher, EventHandler, MAX_RETRIES};
pub use error::{Error, LookupError, Result};
pub use lookup::KubeNetworkLookup;
pub use usage_store::UsageStore;
pub use usage_tracker::{
    ANY_NETWORK, ChangeEvent, ChangeKind, MetricsSink, NetworkLookup, UsageTracker,
};
pub use watch::{PodEventAdapter, run_pod_watcher};
pub use work_queue::WorkQueue;
