//! Custom Resource Definitions (CRDs) consumed by nad-admission-controller.
//!
//! - `NetworkAttachmentDefinition`: a CNI configuration a pod can attach to

mod network_attachment_definition;

pub use network_attachment_definition::*;
