//! nad-admission-controller - admission webhooks and usage metrics for
//! Kubernetes NetworkAttachmentDefinitions.
//!
//! This is the main entry point that:
//! - Initializes structured logging
//! - Starts the health/metrics server
//! - Starts the TLS webhook server and the certificate rotation watcher
//! - Starts the pod usage tracker unless disabled

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use kube::Client;
use tokio::signal;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use nad_admission_controller::health::{HealthState, run_health_server};
use nad_admission_controller::webhooks::{CertificateWatcher, WebhookState};
use nad_admission_controller::{
    Cli, UsageTrackingConfig, WebhookServerConfig, run_usage_tracking, run_webhook_server,
};

/// Grace period for in-flight usage events to complete during shutdown
const SHUTDOWN_GRACE_PERIOD_SECS: u64 = 5;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing subscriber
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("nad_admission_controller=info".parse()?)
                .add_directive("kube=info".parse()?),
        )
        .json()
        .init();

    let cli = Cli::parse();
    info!(
        webhook = %cli.webhook_addr(),
        metrics = %cli.metrics_listen_address,
        "Starting nad-admission-controller"
    );

    // kube and axum-server may enable different rustls backends
    if rustls::crypto::aws_lc_rs::default_provider()
        .install_default()
        .is_err()
    {
        warn!("A rustls crypto provider was already installed");
    }

    let health_state = Arc::new(HealthState::new());
    let cancel = CancellationToken::new();

    let health_handle = {
        let health_state = health_state.clone();
        let addr = cli.metrics_listen_address;
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if let Err(e) = run_health_server(health_state, addr, cancel).await {
                error!(error = %e, "Health server error");
            }
        })
    };

    // Certificate rotation feeds the webhook's TLS reloads
    let (reload_tx, reload_rx) = mpsc::channel(1);
    let mut cert_handle = tokio::spawn(
        CertificateWatcher::new(&cli.tls_cert_file).run(reload_tx, cancel.clone()),
    );

    let webhook_handle = {
        let config = WebhookServerConfig {
            addr: cli.webhook_addr(),
            cert_path: cli.tls_cert_file.clone(),
            key_path: cli.tls_private_key_file.clone(),
        };
        let state = Arc::new(WebhookState::new(Some(health_state.clone())));
        tokio::spawn(run_webhook_server(config, state, reload_rx, cancel.clone()))
    };

    let mut tracking_handle: Option<JoinHandle<()>> = if cli.disable_usage_tracking {
        info!("Usage tracking disabled, serving admission webhooks only");
        None
    } else {
        let client = Client::try_default().await?;
        info!("Connected to Kubernetes cluster");
        let config = UsageTrackingConfig::from(&cli);
        let health_state = health_state.clone();
        let cancel = cancel.clone();
        Some(tokio::spawn(async move {
            run_usage_tracking(client, config, health_state, cancel).await;
        }))
    };

    health_state.set_ready(true).await;

    // Wait for any task to complete (or fail), or shutdown signal
    let mut exit_error: Option<Box<dyn std::error::Error>> = None;
    let mut tracking_finished = false;
    tokio::select! {
        result = &mut cert_handle => {
            match result {
                Ok(Ok(())) => error!("Certificate watcher stopped unexpectedly"),
                Ok(Err(e)) => {
                    error!(error = %e, "Certificate watcher failed, cannot serve TLS safely");
                    exit_error = Some(e.into());
                }
                Err(e) => error!(error = %e, "Certificate watcher task panicked"),
            }
        }
        result = health_handle => {
            if let Err(e) = result {
                error!(error = %e, "Health server task panicked");
            }
        }
        result = webhook_handle => {
            match result {
                Ok(Ok(())) => error!("Webhook server stopped unexpectedly"),
                Ok(Err(e)) => {
                    error!(error = %e, "Webhook server error");
                    exit_error = Some(e.into());
                }
                Err(e) => error!(error = %e, "Webhook server task panicked"),
            }
        }
        result = async {
            match tracking_handle.as_mut() {
                Some(handle) => handle.await,
                None => std::future::pending().await,
            }
        } => {
            tracking_finished = true;
            if let Err(e) = result {
                error!(error = %e, "Usage tracking task panicked");
            }
        }
        // Handle graceful shutdown on SIGTERM or SIGINT
        _ = shutdown_signal() => {
            info!("Received shutdown signal, initiating graceful shutdown...");
        }
    }

    // Mark as not ready to stop receiving new work
    health_state.set_ready(false).await;
    cancel.cancel();

    if let Some(handle) = tracking_handle.filter(|_| !tracking_finished) {
        info!(
            "Waiting up to {}s for in-flight usage events to complete...",
            SHUTDOWN_GRACE_PERIOD_SECS
        );
        if tokio::time::timeout(Duration::from_secs(SHUTDOWN_GRACE_PERIOD_SECS), handle)
            .await
            .is_err()
        {
            warn!("Grace period elapsed before usage tracking drained");
        }
    }

    info!("nad-admission-controller stopped");
    match exit_error {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

/// Wait for shutdown signal (SIGTERM or SIGINT)
///
/// Note: Signal handler setup failures are fatal - the process cannot shut down
/// gracefully without them. Using expect() here is intentional.
#[allow(clippy::expect_used)]
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
