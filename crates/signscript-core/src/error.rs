//! Error taxonomy for the signing workflow.
//!
//! Variants map onto how far a failure reaches:
//!
//! | Variant | Scope |
//! |---------|-------|
//! | `TaskVerification` | whole task, raised before any network activity |
//! | `ChecksumMismatch` | one manifest entry |
//! | `SigningServer` | one manifest entry (no token could be obtained) |
//! | `SignTool*` | one manifest entry |
//! | `DetachedSignatureMissing` | one manifest entry |
//! | `Http` | call site; retried where a retry policy applies |
//!
//! Entry-scoped failures are collected by
//! [`raise_future_errors`](crate::aggregate::raise_future_errors) once every
//! entry has finished.

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur while verifying or executing a signing task.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SigningError {
    /// The task document failed schema or scope validation.
    #[error("task verification failed: {reason}")]
    TaskVerification {
        /// Why the task was rejected.
        reason: String,
    },

    /// A downloaded artifact does not hash to the value in the manifest.
    #[error("checksum mismatch for {url}: expected {expected}, got {actual}")]
    ChecksumMismatch {
        /// Source URL of the artifact.
        url: String,
        /// SHA-512 recorded in the manifest.
        expected: String,
        /// SHA-512 of the bytes actually received.
        actual: String,
    },

    /// No candidate signing server produced a token.
    #[error("cannot retrieve signing token for cert type {cert_type} (formats: {formats:?})")]
    SigningServer {
        /// Requested certificate type.
        cert_type: String,
        /// Requested signing formats.
        formats: Vec<String>,
    },

    /// The signing tool exited unsuccessfully.
    #[error("signtool exited with {}: {output}", code.map_or_else(|| "signal".to_string(), |c| format!("code {c}")))]
    SignToolFailed {
        /// Exit code, `None` if terminated by a signal.
        code: Option<i32>,
        /// Combined stdout and stderr.
        output: String,
    },

    /// The signing tool succeeded but did not write a detached signature
    /// that one of the requested formats produces.
    #[error("signtool did not produce {format} signature {}", path.display())]
    DetachedSignatureMissing {
        /// Format whose signature is missing.
        format: String,
        /// Where the signature was expected.
        path: PathBuf,
    },

    /// The signing tool could not be started.
    #[error("failed to spawn signtool: {message}")]
    SignToolSpawn {
        /// Spawn error description.
        message: String,
    },

    /// The signing tool exceeded the configured timeout and was killed.
    #[error("signtool timed out after {timeout_secs}s")]
    SignToolTimeout {
        /// Timeout that was exceeded, in seconds.
        timeout_secs: u64,
    },

    /// An HTTP request failed at the transport layer or returned non-2xx.
    #[error("HTTP request to {url} failed{}: {message}", status.map(|s| format!(" ({s})")).unwrap_or_default())]
    Http {
        /// Request URL.
        url: String,
        /// Response status, if a response was received.
        status: Option<u16>,
        /// Error message or response body.
        message: String,
    },

    /// The manifest document is malformed.
    #[error("invalid manifest: {reason}")]
    Manifest {
        /// What is wrong with the manifest.
        reason: String,
    },

    /// The worker configuration is unusable.
    #[error("configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    /// Filesystem operation failed.
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        /// Path the operation targeted.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// JSON encoding or decoding failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl SigningError {
    /// Builds an [`SigningError::Io`] for `path`.
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Builds an [`SigningError::Http`] from a `reqwest` error.
    pub(crate) fn http(url: &str, error: &reqwest::Error) -> Self {
        Self::Http {
            url: url.to_string(),
            status: error.status().map(|s| s.as_u16()),
            message: error.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checksum_mismatch_carries_both_values() {
        let err = SigningError::ChecksumMismatch {
            url: "https://example.com/a.mar".to_string(),
            expected: "aa".to_string(),
            actual: "bb".to_string(),
        };
        let message = err.to_string();
        assert!(message.contains("expected aa"));
        assert!(message.contains("got bb"));
    }

    #[test]
    fn test_signtool_failed_display() {
        let err = SigningError::SignToolFailed {
            code: Some(2),
            output: "boom".to_string(),
        };
        assert_eq!(err.to_string(), "signtool exited with code 2: boom");

        let err = SigningError::SignToolFailed {
            code: None,
            output: String::new(),
        };
        assert!(err.to_string().starts_with("signtool exited with signal"));
    }

    #[test]
    fn test_http_display_includes_status() {
        let err = SigningError::Http {
            url: "https://h/token".to_string(),
            status: Some(503),
            message: "unavailable".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "HTTP request to https://h/token failed (503): unavailable"
        );
    }

    #[test]
    fn test_detached_signature_missing_display() {
        let err = SigningError::DetachedSignatureMissing {
            format: "gpg".to_string(),
            path: PathBuf::from("/work/app.tar.gz.asc"),
        };
        assert_eq!(
            err.to_string(),
            "signtool did not produce gpg signature /work/app.tar.gz.asc"
        );
    }
}
