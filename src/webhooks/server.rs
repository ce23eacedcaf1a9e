//! Admission webhook server.
//!
//! Provides HTTPS endpoints for Kubernetes validating admission webhooks:
//! - `/validate` - NetworkAttachmentDefinition name and CNI config validation
//! - `/isolate` - Pod network-selection namespace isolation
//!
//! TLS material is reloaded in place when the certificate supervisor reports a
//! rotated certificate, so in-flight connections are never dropped.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    Json, Router,
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode, header::CONTENT_TYPE},
    response::{IntoResponse, Response},
    routing::post,
};
use axum_server::tls_rustls::RustlsConfig;
use kube::core::DynamicObject;
use kube::core::admission::{AdmissionRequest, AdmissionResponse, AdmissionReview, Operation};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::crd::NetworkAttachmentDefinition;
use crate::health::HealthState;
use crate::webhooks::cert_reload::CertReload;
use crate::webhooks::policies::{ValidationResult, isolation, network_attachment};

/// Default webhook server port
pub const WEBHOOK_PORT: u16 = 443;

/// Route for NetworkAttachmentDefinition validation
pub const VALIDATE_PATH: &str = "/validate";
/// Route for pod namespace isolation
pub const ISOLATE_PATH: &str = "/isolate";

/// Time allowed for open connections to finish after shutdown is requested
const GRACEFUL_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Shared state for webhook handlers
#[derive(Default)]
pub struct WebhookState {
    /// Optional health state for admission metrics
    pub health_state: Option<Arc<HealthState>>,
}

impl WebhookState {
    pub fn new(health_state: Option<Arc<HealthState>>) -> Self {
        Self { health_state }
    }

    fn record(&self, webhook: &str, allowed: bool) {
        if let Some(state) = &self.health_state {
            state.metrics.record_admission(webhook, allowed);
        }
    }
}

/// Create the webhook router
pub fn create_webhook_router(state: Arc<WebhookState>) -> Router {
    Router::new()
        .route(VALIDATE_PATH, post(validate_network_attachment))
        .route(ISOLATE_PATH, post(isolate_pod))
        .with_state(state)
}

/// Reject a request before a decision could be made.
fn invalid(status: StatusCode, message: String) -> Response {
    error!(status = %status, message = %message, "Rejecting admission request");
    (
        status,
        Json(AdmissionResponse::invalid(message).into_review()),
    )
        .into_response()
}

/// Check the HTTP envelope and decode the admission request it carries.
fn read_admission_request(
    headers: &HeaderMap,
    body: &[u8],
) -> Result<AdmissionRequest<DynamicObject>, Response> {
    if body.is_empty() {
        return Err(invalid(
            StatusCode::BAD_REQUEST,
            "Error reading HTTP request: empty body".to_string(),
        ));
    }

    let content_type = headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    let media_type = content_type.split(';').next().unwrap_or_default().trim();
    if !media_type.eq_ignore_ascii_case("application/json") {
        return Err(invalid(
            StatusCode::UNSUPPORTED_MEDIA_TYPE,
            format!(
                "Invalid Content-Type='{}', expected 'application/json'",
                content_type
            ),
        ));
    }

    let review: AdmissionReview<DynamicObject> = serde_json::from_slice(body).map_err(|e| {
        invalid(
            StatusCode::BAD_REQUEST,
            format!("error deserializing AdmissionReview: {}", e),
        )
    })?;

    review.try_into().map_err(|e| {
        invalid(
            StatusCode::BAD_REQUEST,
            format!("Invalid AdmissionReview: {}", e),
        )
    })
}

/// Turn a policy result into the review sent back to the API server.
fn respond(
    state: &WebhookState,
    webhook: &str,
    request: &AdmissionRequest<DynamicObject>,
    result: ValidationResult,
) -> Response {
    state.record(webhook, result.allowed);
    let response = AdmissionResponse::from(request);
    let response = if result.allowed {
        info!(uid = %request.uid, webhook = webhook, "Admission request allowed");
        response
    } else {
        let message = result.denial_message();
        warn!(uid = %request.uid, webhook = webhook, message = %message, "Admission request denied");
        response.deny(message)
    };
    (StatusCode::OK, Json(response.into_review())).into_response()
}

/// Decode the embedded object as a NetworkAttachmentDefinition.
///
/// `spec` is optional on the wire; a missing one means an empty config.
pub fn decode_network_attachment(
    object: &DynamicObject,
) -> Result<NetworkAttachmentDefinition, serde_json::Error> {
    let mut value = serde_json::to_value(object)?;
    if let Some(map) = value.as_object_mut() {
        map.entry("spec")
            .or_insert_with(|| serde_json::Value::Object(serde_json::Map::new()));
    }
    serde_json::from_value(value)
}

/// NetworkAttachmentDefinition validation handler
async fn validate_network_attachment(
    State(state): State<Arc<WebhookState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let request = match read_admission_request(&headers, &body) {
        Ok(request) => request,
        Err(response) => return response,
    };

    debug!(
        uid = %request.uid,
        operation = ?request.operation,
        namespace = ?request.namespace,
        name = %request.name,
        "Processing net-attach-def admission request"
    );

    if request.operation == Operation::Delete {
        return respond(&state, "validate", &request, ValidationResult::allowed());
    }

    let result = match request.object.as_ref().map(decode_network_attachment) {
        Some(Ok(nad)) => network_attachment::validate(&nad),
        Some(Err(e)) => ValidationResult::denied(
            "InvalidRequest",
            &format!("could not decode NetworkAttachmentDefinition: {}", e),
        ),
        None => ValidationResult::denied("InvalidRequest", "Missing object in request"),
    };

    respond(&state, "validate", &request, result)
}

/// Pod namespace isolation handler
async fn isolate_pod(
    State(state): State<Arc<WebhookState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let request = match read_admission_request(&headers, &body) {
        Ok(request) => request,
        Err(response) => return response,
    };

    debug!(
        uid = %request.uid,
        operation = ?request.operation,
        namespace = ?request.namespace,
        name = %request.name,
        "Processing pod isolation admission request"
    );

    if request.operation == Operation::Delete {
        return respond(&state, "isolate", &request, ValidationResult::allowed());
    }

    let result = match &request.object {
        Some(pod) => isolation::validate(pod.metadata.annotations.as_ref()),
        None => ValidationResult::denied("InvalidRequest", "Missing object in request"),
    };

    respond(&state, "isolate", &request, result)
}

/// Errors that can occur when running the webhook server
#[derive(Error, Debug)]
pub enum WebhookError {
    /// TLS configuration error
    #[error("TLS configuration error: {0}")]
    TlsConfig(String),
    /// Server error
    #[error("Webhook server error: {0}")]
    Server(String),
}

/// Listener and TLS material for the webhook server
#[derive(Debug, Clone)]
pub struct WebhookServerConfig {
    pub addr: SocketAddr,
    pub cert_path: PathBuf,
    pub key_path: PathBuf,
}

/// Run the webhook server with TLS
///
/// Serves until `cancel` fires. Each [`CertReload`] received on `reloads`
/// swaps the served key pair in place; a failed reload keeps the previous one.
pub async fn run_webhook_server(
    config: WebhookServerConfig,
    state: Arc<WebhookState>,
    mut reloads: mpsc::Receiver<CertReload>,
    cancel: CancellationToken,
) -> Result<(), WebhookError> {
    let app = create_webhook_router(state);

    let tls = RustlsConfig::from_pem_file(&config.cert_path, &config.key_path)
        .await
        .map_err(|e| WebhookError::TlsConfig(e.to_string()))?;

    {
        let tls = tls.clone();
        let cert_path = config.cert_path.clone();
        let key_path = config.key_path.clone();
        tokio::spawn(async move {
            while let Some(reload) = reloads.recv().await {
                match tls.reload_from_pem_file(&cert_path, &key_path).await {
                    Ok(()) => info!(digest = %reload.digest, "Reloaded webhook TLS key pair"),
                    Err(e) => error!(error = %e, "Failed to reload webhook TLS key pair, keeping previous"),
                }
            }
        });
    }

    let handle = axum_server::Handle::new();
    {
        let handle = handle.clone();
        tokio::spawn(async move {
            cancel.cancelled().await;
            handle.graceful_shutdown(Some(GRACEFUL_SHUTDOWN_TIMEOUT));
        });
    }

    info!(addr = %config.addr, "Webhook server listening with TLS");

    axum_server::bind_rustls(config.addr, tls)
        .handle(handle)
        .serve(app.into_make_service())
        .await
        .map_err(|e| WebhookError::Server(e.to_string()))?;

    Ok(())
}
