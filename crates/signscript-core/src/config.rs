//! Worker configuration.
//!
//! Loaded once at startup from a TOML file:
//!
//! ```toml
//! work_dir = "/builds/worker/work"
//! my_ip = "10.0.0.12"
//! signing_server_config = "/builds/worker/passwords.json"
//! ssl_cert = "/builds/worker/host.cert"
//! signtool = ["python", "tools/release/signing/signtool.py"]
//! token_duration = "5m"
//!
//! [retry]
//! attempts = 10
//! base_delay = "5s"
//! max_delay = "30s"
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::retry::RetryPolicy;

/// Top-level worker configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WorkerConfig {
    /// Directory artifacts are downloaded to and signed in. Shared by all
    /// entries of a task.
    pub work_dir: PathBuf,

    /// Address reported to signing servers when requesting a token.
    pub my_ip: String,

    /// Path to the signing-server pool JSON file.
    pub signing_server_config: PathBuf,

    /// Certificate reference handed to the signing tool (`-c`).
    pub ssl_cert: PathBuf,

    /// Program and leading arguments used to run the signing tool.
    #[serde(default = "default_signtool")]
    pub signtool: Vec<String>,

    /// Kill the signing tool if it runs longer than this.
    #[serde(default, with = "humantime_serde")]
    pub signtool_timeout: Option<Duration>,

    /// Validity requested for each signing token.
    #[serde(default = "default_token_duration", with = "humantime_serde")]
    pub token_duration: Duration,

    /// URL scheme used to reach signing servers.
    #[serde(default = "default_server_scheme")]
    pub server_scheme: String,

    /// Temporary credential file re-read by the refresh loop. The loop is
    /// not started when this is unset.
    #[serde(default)]
    pub temp_creds_file: Option<PathBuf>,

    /// Interval between credential refreshes.
    #[serde(default = "default_temp_creds_refresh", with = "humantime_serde")]
    pub temp_creds_refresh: Duration,

    /// Per-request HTTP timeout.
    #[serde(default = "default_http_timeout", with = "humantime_serde")]
    pub http_timeout: Duration,

    /// Retry policy for the manifest download and token requests.
    #[serde(default)]
    pub retry: RetryPolicy,
}

fn default_signtool() -> Vec<String> {
    vec![
        "python".to_string(),
        "tools/release/signing/signtool.py".to_string(),
    ]
}

const fn default_token_duration() -> Duration {
    Duration::from_secs(5 * 60)
}

fn default_server_scheme() -> String {
    "https".to_string()
}

const fn default_temp_creds_refresh() -> Duration {
    Duration::from_secs(10 * 60)
}

const fn default_http_timeout() -> Duration {
    Duration::from_secs(60)
}

impl WorkerConfig {
    /// Creates a configuration with defaults for every optional field.
    #[must_use]
    pub fn new(
        work_dir: impl Into<PathBuf>,
        my_ip: impl Into<String>,
        signing_server_config: impl Into<PathBuf>,
        ssl_cert: impl Into<PathBuf>,
    ) -> Self {
        Self {
            work_dir: work_dir.into(),
            my_ip: my_ip.into(),
            signing_server_config: signing_server_config.into(),
            ssl_cert: ssl_cert.into(),
            signtool: default_signtool(),
            signtool_timeout: None,
            token_duration: default_token_duration(),
            server_scheme: default_server_scheme(),
            temp_creds_file: None,
            temp_creds_refresh: default_temp_creds_refresh(),
            http_timeout: default_http_timeout(),
            retry: RetryPolicy::default(),
        }
    }

    /// Loads and validates configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed or validated.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(ConfigError::Io)?;
        Self::from_toml(&content)
    }

    /// Parses and validates configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML is invalid or fails [`Self::validate`].
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Checks values serde cannot.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Validation`] naming the first bad field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.my_ip.trim().is_empty() {
            return Err(ConfigError::Validation("my_ip must not be empty".to_string()));
        }
        if self.signtool.is_empty() || self.signtool[0].trim().is_empty() {
            return Err(ConfigError::Validation(
                "signtool must name a program".to_string(),
            ));
        }
        if self.retry.attempts == 0 {
            return Err(ConfigError::Validation(
                "retry.attempts must be at least 1".to_string(),
            ));
        }
        if self.temp_creds_refresh.is_zero() {
            return Err(ConfigError::Validation(
                "temp_creds_refresh must be non-zero".to_string(),
            ));
        }
        if !matches!(self.server_scheme.as_str(), "http" | "https") {
            return Err(ConfigError::Validation(format!(
                "server_scheme must be http or https, got {}",
                self.server_scheme
            )));
        }
        Ok(())
    }

    /// Path the rewritten manifest is written to.
    #[must_use]
    pub fn manifest_path(&self) -> PathBuf {
        self.work_dir.join("manifest.json")
    }
}

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// I/O error reading a configuration file.
    #[error("failed to read configuration file: {0}")]
    Io(#[from] std::io::Error),

    /// TOML parsing error.
    #[error("failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),

    /// JSON parsing error (signing-server and credential files).
    #[error("failed to parse JSON configuration: {0}")]
    Json(#[from] serde_json::Error),

    /// Validation error.
    #[error("configuration validation failed: {0}")]
    Validation(String),
}
