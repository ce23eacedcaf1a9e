//! NetworkAttachmentDefinition Custom Resource Definition.
//!
//! The CRD itself is owned by the Network Plumbing Working Group; this type
//! only mirrors the fields the webhook and usage tracker read.

use kube::CustomResource;
use serde::{Deserialize, Serialize};

/// NetworkAttachmentDefinition describes a secondary pod network.
///
/// Example:
/// ```yaml
/// apiVersion: k8s.cni.cncf.io/v1
/// kind: NetworkAttachmentDefinition
/// metadata:
///   name: macvlan-conf
/// spec:
///   config: '{"cniVersion": "0.3.0", "type": "macvlan", "master": "eth0"}'
/// ```
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[kube(
    group = "k8s.cni.cncf.io",
    version = "v1",
    kind = "NetworkAttachmentDefinition",
    plural = "network-attachment-definitions",
    shortname = "net-attach-def",
    namespaced,
    schema = "disabled"
)]
#[serde(rename_all = "camelCase")]
pub struct NetworkAttachmentDefinitionSpec {
    /// Embedded CNI configuration (JSON). May be empty.
    #[serde(default)]
    pub config: String,
}

impl NetworkAttachmentDefinition {
    /// The embedded CNI configuration string.
    pub fn config(&self) -> &str {
        &self.spec.config
    }
}
