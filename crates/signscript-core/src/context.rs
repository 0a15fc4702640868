//! Task-scoped worker state.

use std::time::Duration;

use crate::config::WorkerConfig;
use crate::error::SigningError;
use crate::server::SigningServerPool;
use crate::signtool::SignTool;
use crate::token::HttpTokenProvider;

/// Everything one signing task needs, passed by reference to each
/// component. Created at task start and dropped when the task ends.
#[derive(Debug)]
pub struct Context {
    config: WorkerConfig,
    client: reqwest::Client,
    servers: SigningServerPool,
}

impl Context {
    /// Creates a context from a config and an already loaded server pool.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(config: WorkerConfig, servers: SigningServerPool) -> Result<Self, SigningError> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(15).min(config.http_timeout))
            .timeout(config.http_timeout)
            .user_agent(concat!("signscript/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|error| SigningError::Http {
                url: String::new(),
                status: None,
                message: format!("cannot build HTTP client: {error}"),
            })?;
        Ok(Self {
            config,
            client,
            servers,
        })
    }

    /// Creates a context, loading the server pool from
    /// `config.signing_server_config`.
    ///
    /// # Errors
    ///
    /// Returns an error if the pool cannot be loaded or the HTTP client
    /// cannot be built.
    pub fn from_config(config: WorkerConfig) -> Result<Self, SigningError> {
        let servers = SigningServerPool::from_file(&config.signing_server_config)?;
        Self::new(config, servers)
    }

    /// Worker configuration.
    #[must_use]
    pub const fn config(&self) -> &WorkerConfig {
        &self.config
    }

    /// Shared HTTP client.
    #[must_use]
    pub const fn client(&self) -> &reqwest::Client {
        &self.client
    }

    /// Read-only signing-server pool.
    #[must_use]
    pub const fn servers(&self) -> &SigningServerPool {
        &self.servers
    }

    /// Token provider talking to the configured signing servers.
    #[must_use]
    pub fn token_provider(&self) -> HttpTokenProvider<'_> {
        HttpTokenProvider::new(&self.client, &self.config)
    }

    /// Signing tool configured for this worker.
    #[must_use]
    pub fn signtool(&self) -> SignTool {
        SignTool::from_config(&self.config)
    }
}
