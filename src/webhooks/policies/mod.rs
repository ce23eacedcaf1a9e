//! Admission policies for network attachment resources.
//!
//! - `network_attachment`: NetworkAttachmentDefinition name and CNI config
//! - `isolation`: pods may only select networks from their own namespace
//!
//! Policies are pure functions. Every parse or classification error is turned
//! into a denial carrying a reason and a human-readable message.

pub mod isolation;
pub mod network_attachment;

/// Result of a validation check
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationResult {
    /// Whether the validation passed
    pub allowed: bool,
    /// Reason for denial (if not allowed)
    pub reason: Option<String>,
    /// Detailed message (if not allowed)
    pub message: Option<String>,
}

impl ValidationResult {
    /// Create an allowed result
    pub fn allowed() -> Self {
        Self {
            allowed: true,
            reason: None,
            message: None,
        }
    }

    /// Create a denied result
    pub fn denied(reason: &str, message: &str) -> Self {
        Self {
            allowed: false,
            reason: Some(reason.to_string()),
            message: Some(message.to_string()),
        }
    }

    /// Denial text in the `[reason] message` form sent back to the API server.
    /// Empty for allowed results.
    pub fn denial_message(&self) -> String {
        if self.allowed {
            return String::new();
        }
        let reason = self.reason.as_deref().unwrap_or("ValidationFailed");
        let message = self.message.as_deref().unwrap_or("Validation failed");
        format!("[{}] {}", reason, message)
    }
}
