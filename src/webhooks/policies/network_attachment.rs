//! NetworkAttachmentDefinition validation policy.
//!
//! Validates:
//! - The resource name is a DNS-1123 label
//! - A non-empty `spec.config` is a JSON object
//! - The config is a well-formed CNI config or config list with plugin types

use kube::ResourceExt;
use tracing::{debug, info};

use super::ValidationResult;
use crate::cni::{self, CniConfigError};
use crate::crd::NetworkAttachmentDefinition;
use crate::network::is_dns1123_label;

pub const REASON_INVALID_NAME: &str = "InvalidName";
pub const REASON_NOT_JSON: &str = "NotJSON";
pub const REASON_INVALID_CONFIG: &str = "InvalidConfig";

/// Validate a NetworkAttachmentDefinition resource
pub fn validate(nad: &NetworkAttachmentDefinition) -> ValidationResult {
    validate_parts(&nad.name_any(), nad.config())
}

/// Validate a NetworkAttachmentDefinition given its name and raw config
pub fn validate_parts(name: &str, config: &str) -> ValidationResult {
    if !is_dns1123_label(name) {
        return ValidationResult::denied(
            REASON_INVALID_NAME,
            &format!("net-attach-def name '{}' is invalid", name),
        );
    }

    if config.is_empty() {
        debug!(name = %name, "Allowing empty spec.config");
        return ValidationResult::allowed();
    }

    match cni::classify_named(name, config) {
        Ok(plugin_types) => {
            info!(name = %name, plugin_types = ?plugin_types, "Network attachment definition is valid");
            ValidationResult::allowed()
        }
        Err(CniConfigError::NotJson(e)) => ValidationResult::denied(
            REASON_NOT_JSON,
            &format!("configuration string is not in JSON format: {}", e),
        ),
        Err(e) => ValidationResult::denied(REASON_INVALID_CONFIG, &format!("invalid config: {}", e)),
    }
}
