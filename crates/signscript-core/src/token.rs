//! Signing-token acquisition with server failover.
//!
//! ```text
//! shuffled candidates ──► for each server:
//!                            request_token (retried per RetryPolicy)
//!                              Ok(bytes)  → write private token file, DONE
//!                              Err(e)     → warn, next server
//!                         exhausted ──► SigningError::SigningServer
//! ```
//!
//! Failover is between servers; the retry policy only replays requests
//! against the same server.

use std::future::Future;
use std::io::Write;
use std::path::Path;

use secrecy::ExposeSecret;
use tempfile::TempPath;
use tracing::{debug, info, warn};

use crate::config::WorkerConfig;
use crate::error::SigningError;
use crate::fs::set_private;
use crate::retry::RetryPolicy;
use crate::server::{SigningRequest, SigningServer, SigningServerPool, shuffled_servers};

/// A signing token stored in a private, uniquely named file.
///
/// The file is deleted when the `Token` is dropped, so a token never
/// outlives the invocation it was acquired for.
#[derive(Debug)]
pub struct Token {
    path: TempPath,
    server: String,
}

impl Token {
    /// Path of the token file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Host the token was issued by.
    #[must_use]
    pub fn server(&self) -> &str {
        &self.server
    }
}

/// Requests raw token bytes from one signing server.
pub trait TokenProvider: Sync {
    /// Fetches a token from `server`.
    ///
    /// # Errors
    ///
    /// Returns an error if the server cannot issue a token.
    fn request_token(
        &self,
        server: &SigningServer,
    ) -> impl Future<Output = Result<Vec<u8>, SigningError>> + Send;
}

/// Token provider that POSTs to `<scheme>://<host>/token`.
#[derive(Debug, Clone)]
pub struct HttpTokenProvider<'a> {
    client: &'a reqwest::Client,
    scheme: &'a str,
    my_ip: &'a str,
    duration_secs: String,
    retry: &'a RetryPolicy,
}

impl<'a> HttpTokenProvider<'a> {
    /// Creates a provider using `config`'s identity, token duration, scheme
    /// and retry policy.
    #[must_use]
    pub fn new(client: &'a reqwest::Client, config: &'a WorkerConfig) -> Self {
        Self {
            client,
            scheme: &config.server_scheme,
            my_ip: &config.my_ip,
            duration_secs: config.token_duration.as_secs().to_string(),
            retry: &config.retry,
        }
    }

    async fn post_once(&self, url: &str, server: &SigningServer) -> Result<Vec<u8>, SigningError> {
        let form = [
            ("slave_ip", self.my_ip),
            ("duration", self.duration_secs.as_str()),
        ];
        let response = self
            .client
            .post(url)
            .basic_auth(server.user(), Some(server.password().expose_secret()))
            .form(&form)
            .send()
            .await
            .map_err(|e| SigningError::http(url, &e))?;

        let status = response.status();
        if !status.is_success() {
            let message = response
                .text()
                .await
                .unwrap_or_else(|_| "unable to read token response body".to_string());
            return Err(SigningError::Http {
                url: url.to_string(),
                status: Some(status.as_u16()),
                message,
            });
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| SigningError::http(url, &e))?;
        if body.is_empty() {
            return Err(SigningError::Http {
                url: url.to_string(),
                status: Some(status.as_u16()),
                message: "empty token".to_string(),
            });
        }
        Ok(body.to_vec())
    }
}

impl TokenProvider for HttpTokenProvider<'_> {
    async fn request_token(&self, server: &SigningServer) -> Result<Vec<u8>, SigningError> {
        let url = server.token_url(self.scheme);
        let url = url.as_str();
        self.retry
            .run(url, move || self.post_once(url, server))
            .await
    }
}

/// Obtains a token for `request` from the first server that issues one.
///
/// Candidates are the suitable servers for the request in random order. The
/// token is written to a fresh `token-*` file in `work_dir`, readable only by
/// the worker.
///
/// # Errors
///
/// Returns [`SigningError::SigningServer`] if no candidate issues a token
/// (including when there are no candidates), or an I/O error if the token
/// file cannot be written.
pub async fn acquire_token<P: TokenProvider>(
    provider: &P,
    pool: &SigningServerPool,
    request: &SigningRequest,
    work_dir: &Path,
) -> Result<Token, SigningError> {
    let candidates = shuffled_servers(pool, request);
    debug!(
        cert_type = request.cert_type(),
        candidates = candidates.len(),
        "acquiring signing token"
    );

    for server in candidates {
        debug!(server = server.host(), "getting token");
        match provider.request_token(server).await {
            Ok(bytes) => {
                let token = write_token(work_dir, &bytes, server.host())?;
                info!(server = server.host(), "acquired signing token");
                return Ok(token);
            },
            Err(error) => {
                warn!(server = server.host(), %error, "token request failed, trying next server");
            },
        }
    }

    Err(SigningError::SigningServer {
        cert_type: request.cert_type().to_string(),
        formats: request.formats().to_vec(),
    })
}

fn write_token(work_dir: &Path, bytes: &[u8], server: &str) -> Result<Token, SigningError> {
    let mut file = tempfile::Builder::new()
        .prefix("token-")
        .tempfile_in(work_dir)
        .map_err(|e| SigningError::io(work_dir, e))?;
    set_private(file.as_file(), file.path())?;
    file.as_file_mut()
        .write_all(bytes)
        .map_err(|e| SigningError::io(file.path(), e))?;
    file.as_file()
        .sync_all()
        .map_err(|e| SigningError::io(file.path(), e))?;
    Ok(Token {
        path: file.into_temp_path(),
        server: server.to_string(),
    })
}
