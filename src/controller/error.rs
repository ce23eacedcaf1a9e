//! Error types for the usage controller.
//!
//! Defines custom error types with classification for retry behavior.

use std::time::Duration;
use thiserror::Error;

/// Failure to resolve a NetworkAttachmentDefinition referenced by a pod.
///
/// Lookup failures are soft: the tracker skips the reference.
#[derive(Error, Debug)]
pub enum LookupError {
    /// The API server did not answer in time
    #[error("lookup of network attachment definition {namespace}/{name} timed out after {after:?}")]
    Timeout {
        name: String,
        namespace: String,
        after: Duration,
    },

    /// Kubernetes API error
    #[error("failed to locate network attachment definition {namespace}/{name}: {source}")]
    Api {
        name: String,
        namespace: String,
        #[source]
        source: kube::Error,
    },
}

/// Error returned by an event handler
#[derive(Error, Debug)]
pub enum Error {
    /// Network attachment definition lookup failed
    #[error("Lookup error: {0}")]
    Lookup(#[from] LookupError),

    /// Transient processing failure, retried by the dispatcher
    #[error("Dispatch error: {0}")]
    Dispatch(String),
}

impl Error {
    /// Check if this error should be retried
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Dispatch(_) => true,
            Error::Lookup(_) => false,
        }
    }
}

/// Result type alias for controller operations
pub type Result<T> = std::result::Result<T, Error>;
