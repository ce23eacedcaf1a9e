//! Namespace isolation policy for pods.
//!
//! A pod's network-selection annotation may only reference networks in the
//! pod's own namespace, so references must not carry an explicit namespace.

use std::collections::BTreeMap;

use tracing::{debug, info};

use super::ValidationResult;
use crate::network::{LOCAL_NAMESPACE, NETWORKS_ANNOTATION, parse_network_annotation};

pub const REASON_CROSS_NAMESPACE: &str = "CrossNamespaceReferenceDenied";
pub const REASON_INVALID_ANNOTATION: &str = "InvalidAnnotation";

/// Validate the annotations of a pod
pub fn validate(annotations: Option<&BTreeMap<String, String>>) -> ValidationResult {
    validate_annotation(annotations.and_then(|a| a.get(NETWORKS_ANNOTATION)).map(String::as_str))
}

/// Validate a raw network-selection annotation value
pub fn validate_annotation(value: Option<&str>) -> ValidationResult {
    let value = match value {
        Some(v) if !v.is_empty() => v,
        _ => return ValidationResult::allowed(),
    };

    debug!(annotation = %value, "Analyzing {} annotation", NETWORKS_ANNOTATION);

    let networks = match parse_network_annotation(value, LOCAL_NAMESPACE) {
        Ok(networks) => networks,
        Err(e) => {
            return ValidationResult::denied(REASON_INVALID_ANNOTATION, &e.to_string());
        }
    };

    if let Some(network) = networks.iter().find(|n| n.namespace != LOCAL_NAMESPACE) {
        return ValidationResult::denied(
            REASON_CROSS_NAMESPACE,
            &format!(
                "{} annotations must not refer to namespaced values (must use local namespace, i.e. must not contain a /), rejected: {} (namespace: {})",
                NETWORKS_ANNOTATION, value, network.namespace
            ),
        );
    }

    info!(annotation = %value, "Allowed network selection");
    ValidationResult::allowed()
}
