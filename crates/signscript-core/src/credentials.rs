//! Background refresh of temporary worker credentials.
//!
//! The credential file is rewritten by an external process. A long-lived
//! task re-reads it on a fixed interval and publishes the result on a
//! `watch` channel; signing code only ever holds the receiving end.
//!
//! The loop outlives individual tasks. A failed refresh keeps the previous
//! value and is logged; it never stops the loop.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use secrecy::SecretString;
use serde::Deserialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::ConfigError;

/// Temporary credentials read from the credential file.
#[derive(Clone)]
pub struct TempCredentials {
    /// Client identifier.
    pub client_id: String,
    /// Access token.
    pub access_token: SecretString,
    /// Optional certificate accompanying temporary credentials.
    pub certificate: Option<String>,
}

impl fmt::Debug for TempCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TempCredentials")
            .field("client_id", &self.client_id)
            .field("access_token", &"[REDACTED]")
            .field("has_certificate", &self.certificate.is_some())
            .finish()
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawCredentials {
    client_id: String,
    access_token: String,
    #[serde(default)]
    certificate: Option<String>,
}

/// Shared, read-only view of the latest credentials.
pub type CredentialsHandle = watch::Receiver<Option<Arc<TempCredentials>>>;

/// Reads and parses the credential file.
///
/// # Errors
///
/// Returns an error if the file cannot be read, is not valid JSON, or has an
/// empty `clientId` or `accessToken`.
pub async fn read_temp_creds(path: &Path) -> Result<TempCredentials, ConfigError> {
    let content = tokio::fs::read(path).await?;
    let raw: RawCredentials = serde_json::from_slice(&content)?;
    if raw.client_id.trim().is_empty() || raw.access_token.trim().is_empty() {
        return Err(ConfigError::Validation(format!(
            "{}: clientId and accessToken must not be empty",
            path.display()
        )));
    }
    Ok(TempCredentials {
        client_id: raw.client_id,
        access_token: SecretString::from(raw.access_token),
        certificate: raw.certificate,
    })
}

/// Periodically re-reads a credential file.
#[derive(Debug, Clone)]
pub struct CredentialRefresher {
    path: PathBuf,
    interval: Duration,
}

impl CredentialRefresher {
    /// Creates a refresher for `path` running every `interval`.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>, interval: Duration) -> Self {
        Self {
            path: path.into(),
            interval,
        }
    }

    /// Loads the file once, then spawns the refresh loop on the current
    /// runtime.
    ///
    /// An unreadable file at startup is logged and published as `None`. The
    /// loop ends once every receiver has been dropped.
    #[must_use]
    pub async fn spawn(self) -> (CredentialsHandle, JoinHandle<()>) {
        let initial = match read_temp_creds(&self.path).await {
            Ok(creds) => Some(Arc::new(creds)),
            Err(error) => {
                warn!(path = %self.path.display(), %error, "initial credential read failed");
                None
            },
        };
        let (tx, rx) = watch::channel(initial);
        let handle = tokio::spawn(self.run(tx));
        (rx, handle)
    }

    async fn run(self, tx: watch::Sender<Option<Arc<TempCredentials>>>) {
        info!(
            path = %self.path.display(),
            interval_secs = self.interval.as_secs(),
            "credential refresh loop started"
        );
        loop {
            tokio::select! {
                () = tokio::time::sleep(self.interval) => {},
                () = tx.closed() => break,
            }
            match read_temp_creds(&self.path).await {
                Ok(creds) => {
                    debug!(client_id = %creds.client_id, "refreshed temporary credentials");
                    if tx.send(Some(Arc::new(creds))).is_err() {
                        break;
                    }
                },
                Err(error) => {
                    warn!(path = %self.path.display(), %error, "credential refresh failed");
                },
            }
        }
        debug!("credential refresh loop stopped");
    }
}
