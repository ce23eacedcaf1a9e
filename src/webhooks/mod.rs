//! Webhook module for validating admission requests.
//!
//! This module provides two ValidatingAdmissionWebhooks:
//! - `/validate`: NetworkAttachmentDefinition name and CNI config checks
//! - `/isolate`: pods may only reference networks in their own namespace
//!
//! The server certificate is watched by [`cert_reload`] and swapped in place.

pub mod cert_reload;
pub mod policies;
mod server;

pub use cert_reload::{CertReload, CertReloadError, CertificateWatcher};
pub use policies::ValidationResult;
pub use server::{
    ISOLATE_PATH, VALIDATE_PATH, WEBHOOK_PORT, WebhookError, WebhookServerConfig, WebhookState,
    create_webhook_router, decode_network_attachment, run_webhook_server,
};

// Re-export kube-rs admission types for contract testing
pub use kube::core::admission::{AdmissionRequest, AdmissionResponse, AdmissionReview, Operation};
