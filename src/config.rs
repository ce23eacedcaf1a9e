//! Command-line and environment configuration.

use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

use crate::controller::ANY_NETWORK;

#[derive(Parser, Debug, Clone)]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Port the admission webhook listens on.
    #[arg(long, env = "NAD_WEBHOOK_PORT", default_value_t = 443)]
    pub port: u16,

    /// IP address the admission webhook binds to.
    #[arg(long, env = "NAD_BIND_ADDRESS", default_value = "0.0.0.0")]
    pub bind_address: IpAddr,

    /// Address of the health and metrics server.
    #[arg(
        long,
        env = "NAD_METRICS_LISTEN_ADDRESS",
        default_value = "0.0.0.0:9091"
    )]
    pub metrics_listen_address: SocketAddr,

    /// PEM certificate served by the webhook, watched for rotation.
    #[arg(
        long,
        value_name = "FILE",
        env = "NAD_TLS_CERT_FILE",
        default_value = "cert.pem"
    )]
    pub tls_cert_file: PathBuf,

    /// PEM private key matching the certificate.
    #[arg(
        long,
        value_name = "FILE",
        env = "NAD_TLS_PRIVATE_KEY_FILE",
        default_value = "key.pem"
    )]
    pub tls_private_key_file: PathBuf,

    /// Number of usage dispatch workers.
    #[arg(long, env = "NAD_WORKERS", default_value_t = 1)]
    pub workers: usize,

    /// Network labels that get an "enabled instance up" gauge.
    #[arg(
        long,
        env = "NAD_TRACKED_NETWORKS",
        value_delimiter = ',',
        default_value = "any,sriov,ib-sriov"
    )]
    pub tracked_networks: Vec<String>,

    /// Timeout for one network-attachment-definition lookup, in seconds.
    #[arg(long, env = "NAD_LOOKUP_TIMEOUT_SECS", default_value_t = 5)]
    pub lookup_timeout_secs: u64,

    /// Serve only the admission webhook, without usage tracking.
    #[arg(long, env = "NAD_DISABLE_USAGE_TRACKING")]
    pub disable_usage_tracking: bool,
}

impl Cli {
    /// Socket address of the admission webhook
    pub fn webhook_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_address, self.port)
    }

    pub fn lookup_timeout(&self) -> Duration {
        Duration::from_secs(self.lookup_timeout_secs)
    }

    /// Tracked labels, trimmed and de-duplicated. `any` is always included.
    pub fn tracked_labels(&self) -> Vec<String> {
        let mut labels = vec![ANY_NETWORK.to_string()];
        for label in &self.tracked_networks {
            let label = label.trim();
            if !label.is_empty() && !labels.iter().any(|l| l == label) {
                labels.push(label.to_string());
            }
        }
        labels
    }
}
