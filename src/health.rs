//! Health server for Kubernetes probes and Prometheus metrics.
//!
//! Provides:
//! - `/` - Index page linking the endpoints below
//! - `/healthz` - Liveness probe (always returns 200 if server is running)
//! - `/readyz` - Readiness probe (returns 200 when ready to serve traffic)
//! - `/metrics` - Prometheus metrics endpoint

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::AtomicU64;

use axum::{
    Router,
    extract::State,
    http::StatusCode,
    response::{Html, IntoResponse, Response},
    routing::get,
};
use prometheus_client::encoding::text::encode;
use prometheus_client::encoding::{EncodeLabel, EncodeLabelSet, LabelSetEncoder};
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::registry::Registry;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::controller::MetricsSink;

/// Labels for per-network usage metrics
#[derive(Clone, Debug, Hash, PartialEq, Eq)]
pub struct NetworkLabels {
    pub networks: String,
}

impl EncodeLabelSet for NetworkLabels {
    fn encode(&self, mut encoder: LabelSetEncoder<'_>) -> Result<(), std::fmt::Error> {
        ("networks", self.networks.as_str()).encode(encoder.encode_label())?;
        Ok(())
    }
}

/// Labels for admission decisions
#[derive(Clone, Debug, Hash, PartialEq, Eq)]
pub struct AdmissionLabels {
    pub webhook: String,
    pub allowed: bool,
}

impl EncodeLabelSet for AdmissionLabels {
    fn encode(&self, mut encoder: LabelSetEncoder<'_>) -> Result<(), std::fmt::Error> {
        ("webhook", self.webhook.as_str()).encode(encoder.encode_label())?;
        let allowed = if self.allowed { "true" } else { "false" };
        ("allowed", allowed).encode(encoder.encode_label())?;
        Ok(())
    }
}

/// Shared metrics for the controller and webhooks
pub struct Metrics {
    /// Running pods per plugin type, combination and `any`
    pub network_instances: Family<NetworkLabels, Gauge<f64, AtomicU64>>,
    /// 1 while at least one pod uses a tracked label
    pub network_enabled_up: Family<NetworkLabels, Gauge>,
    /// Admission decisions by webhook and outcome
    pub admission_requests_total: Family<AdmissionLabels, Counter>,
    /// Usage events requeued after a failure
    pub dispatch_retries_total: Counter,
    /// Usage events dropped after exhausting retries
    pub dispatch_dropped_total: Counter,
    /// Prometheus registry
    registry: Registry,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    /// Create a new metrics instance with registered metrics
    pub fn new() -> Self {
        let mut registry = Registry::default();

        let network_instances = Family::<NetworkLabels, Gauge<f64, AtomicU64>>::default();
        registry.register(
            "network_attachment_definition_instances",
            "Metric to get number of instance using network attachment definition in the cluster",
            network_instances.clone(),
        );

        let network_enabled_up = Family::<NetworkLabels, Gauge>::default();
        registry.register(
            "network_attachment_definition_enabled_instance_up",
            "Metric to identify clusters with network attachment definition enabled instances",
            network_enabled_up.clone(),
        );

        let admission_requests_total = Family::<AdmissionLabels, Counter>::default();
        registry.register(
            "nad_admission_requests",
            "Total number of admission requests by webhook and decision",
            admission_requests_total.clone(),
        );

        let dispatch_retries_total = Counter::default();
        registry.register(
            "nad_usage_dispatch_retries",
            "Total number of usage events requeued after a failure",
            dispatch_retries_total.clone(),
        );

        let dispatch_dropped_total = Counter::default();
        registry.register(
            "nad_usage_dispatch_dropped",
            "Total number of usage events dropped after exhausting retries",
            dispatch_dropped_total.clone(),
        );

        Self {
            network_instances,
            network_enabled_up,
            admission_requests_total,
            dispatch_retries_total,
            dispatch_dropped_total,
            registry,
        }
    }

    /// Make tracked labels visible before any pod is counted
    pub fn init_tracked_labels(&self, labels: &[String]) {
        for label in labels {
            let labels = NetworkLabels {
                networks: label.clone(),
            };
            self.network_instances.get_or_create(&labels).inc_by(0.0);
            self.network_enabled_up.get_or_create(&labels).set(0);
        }
    }

    /// Record an admission decision
    pub fn record_admission(&self, webhook: &str, allowed: bool) {
        let labels = AdmissionLabels {
            webhook: webhook.to_string(),
            allowed,
        };
        self.admission_requests_total.get_or_create(&labels).inc();
    }

    /// Record a requeue after a failed usage event
    pub fn record_dispatch_retry(&self) {
        self.dispatch_retries_total.inc();
    }

    /// Record a usage event dropped after its last retry
    pub fn record_dispatch_dropped(&self) {
        self.dispatch_dropped_total.inc();
    }

    /// Encode metrics to Prometheus text format
    pub fn encode(&self) -> String {
        let mut buffer = String::new();
        if encode(&mut buffer, &self.registry).is_err() {
            tracing::error!("Failed to encode metrics");
            return "# Error encoding metrics".to_string();
        }
        buffer
    }
}

impl MetricsSink for Metrics {
    fn add_instances(&self, label: &str, delta: f64) {
        let labels = NetworkLabels {
            networks: label.to_string(),
        };
        self.network_instances.get_or_create(&labels).inc_by(delta);
        debug!(networks = label, delta = delta, "Updated network instance count");
    }

    fn set_enabled(&self, label: &str, up: bool) {
        let labels = NetworkLabels {
            networks: label.to_string(),
        };
        self.network_enabled_up
            .get_or_create(&labels)
            .set(i64::from(up));
    }
}

/// Shared state for the health server
pub struct HealthState {
    /// Whether the webhook and usage tracker are serving
    ready: RwLock<bool>,
    /// Metrics registry
    pub metrics: Metrics,
}

impl Default for HealthState {
    fn default() -> Self {
        Self::new()
    }
}

impl HealthState {
    /// Create a new health state (starts as not ready)
    pub fn new() -> Self {
        Self {
            ready: RwLock::new(false),
            metrics: Metrics::new(),
        }
    }

    /// Mark the process as ready or not ready
    pub async fn set_ready(&self, ready: bool) {
        *self.ready.write().await = ready;
    }

    /// Check if the process is ready
    pub async fn is_ready(&self) -> bool {
        *self.ready.read().await
    }
}

const INDEX_PAGE: &str = r#"<html>
<head><title>nad-admission-controller</title></head>
<body>
<h1>Network Attachment Definition Admission Controller</h1>
<p><a href="/metrics">Metrics</a></p>
<p><a href="/healthz">Health</a></p>
<p><a href="/readyz">Readiness</a></p>
</body>
</html>"#;

async fn index() -> Html<&'static str> {
    Html(INDEX_PAGE)
}

impl MetricsSink for HealthState {
    fn add_instances(&self, label: &str, delta: f64) {
        self.metrics.add_instances(label, delta);
    }

    fn set_enabled(&self, label: &str, up: bool) {
        self.metrics.set_enabled(label, up);
    }
}

/// Liveness probe handler
///
/// Returns 200 OK if the process is alive.
async fn healthz() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

/// Readiness probe handler
///
/// Returns 503 Service Unavailable until startup completes and again once
/// shutdown begins.
async fn readyz(State(state): State<Arc<HealthState>>) -> Response {
    if state.is_ready().await {
        (StatusCode::OK, "ready").into_response()
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "not ready").into_response()
    }
}

/// Metrics handler
async fn metrics_handler(State(state): State<Arc<HealthState>>) -> impl IntoResponse {
    let body = state.metrics.encode();
    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
        body,
    )
}

/// Create the health server router
pub fn create_router(state: Arc<HealthState>) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics_handler))
        .with_state(state)
}

/// Run the health server on `addr` until `cancel` fires
pub async fn run_health_server(
    state: Arc<HealthState>,
    addr: SocketAddr,
    cancel: CancellationToken,
) -> Result<(), std::io::Error> {
    let app = create_router(state);

    info!(addr = %addr, "Starting health server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(cancel.cancelled_owned())
        .await?;

    Ok(())
}
