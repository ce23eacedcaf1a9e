//! NetworkAttachmentDefinition lookups against the Kubernetes API.

use std::time::Duration;

use kube::{Api, Client};
use tracing::debug;

use super::error::LookupError;
use super::usage_tracker::NetworkLookup;
use crate::crd::NetworkAttachmentDefinition;

/// Default time allowed for one lookup
pub const DEFAULT_LOOKUP_TIMEOUT: Duration = Duration::from_secs(5);

/// [`NetworkLookup`] backed by `GET` requests to the API server
#[derive(Clone)]
pub struct KubeNetworkLookup {
    client: Client,
    timeout: Duration,
}

impl KubeNetworkLookup {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            timeout: DEFAULT_LOOKUP_TIMEOUT,
        }
    }

    /// Override the per-lookup timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

impl NetworkLookup for KubeNetworkLookup {
    async fn get_by_name(
        &self,
        name: &str,
        namespace: &str,
    ) -> Result<Option<NetworkAttachmentDefinition>, LookupError> {
        let api: Api<NetworkAttachmentDefinition> =
            Api::namespaced(self.client.clone(), namespace);

        debug!(name = name, namespace = namespace, "Looking up network attachment definition");

        match tokio::time::timeout(self.timeout, api.get_opt(name)).await {
            Ok(Ok(nad)) => Ok(nad),
            Ok(Err(source)) => Err(LookupError::Api {
                name: name.to_string(),
                namespace: namespace.to_string(),
                source,
            }),
            Err(_) => Err(LookupError::Timeout {
                name: name.to_string(),
                namespace: namespace.to_string(),
                after: self.timeout,
            }),
        }
    }
}
