//! Certificate rotation supervisor.
//!
//! Polls the webhook certificate file, hashes its content and sends a reload
//! trigger when the hash changes. The first read only records a baseline.
//! The private key is not polled: rotation tools replace both files together
//! and the reload re-reads the pair.

use std::path::{Path, PathBuf};
use std::time::Duration;

use sha2::{Digest, Sha512};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Interval between certificate polls.
pub const CERT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Errors that stop the supervisor.
#[derive(Error, Debug)]
pub enum CertReloadError {
    /// The certificate could not be read. Serving without it is unsafe.
    #[error("failed to read certificate file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Notification that the certificate on disk changed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertReload {
    /// Hex SHA-512 of the new certificate content.
    pub digest: String,
}

/// Hex SHA-512 digest of certificate bytes.
pub fn digest(content: &[u8]) -> String {
    hex::encode(Sha512::digest(content))
}

/// Polls a certificate file for content changes.
pub struct CertificateWatcher {
    cert_path: PathBuf,
    interval: Duration,
}

impl CertificateWatcher {
    /// Create a watcher polling `cert_path` every [`CERT_POLL_INTERVAL`].
    pub fn new(cert_path: impl AsRef<Path>) -> Self {
        Self {
            cert_path: cert_path.as_ref().to_path_buf(),
            interval: CERT_POLL_INTERVAL,
        }
    }

    /// Override the poll interval.
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    async fn read_digest(&self) -> Result<String, CertReloadError> {
        let content =
            tokio::fs::read(&self.cert_path)
                .await
                .map_err(|source| CertReloadError::Read {
                    path: self.cert_path.clone(),
                    source,
                })?;
        Ok(digest(&content))
    }

    /// Poll until cancelled or the certificate becomes unreadable.
    ///
    /// A dropped receiver is not an error; polling continues so that read
    /// failures still surface.
    pub async fn run(
        self,
        reloads: mpsc::Sender<CertReload>,
        cancel: CancellationToken,
    ) -> Result<(), CertReloadError> {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut previous: Option<String> = None;

        info!(path = %self.cert_path.display(), "Watching webhook certificate for changes");

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("Certificate watcher stopped");
                    return Ok(());
                }
                _ = ticker.tick() => {}
            }

            let current = self.read_digest().await?;
            if let Some(prev) = &previous
                && *prev != current
            {
                info!(path = %self.cert_path.display(), "Webhook certificate changed, triggering reload");
                if reloads
                    .send(CertReload {
                        digest: current.clone(),
                    })
                    .await
                    .is_err()
                {
                    debug!("Reload receiver dropped");
                }
            }
            previous = Some(current);
        }
    }
}
