//! `signscript servers`

use std::path::Path;

use anyhow::{Context, Result, bail};
use serde::Serialize;
use signscript_core::SigningServerPool;
use signscript_core::server::suitable_servers;

use super::{load_config, print_json};

/// Host and formats only; credentials are never printed.
#[derive(Debug, Serialize)]
struct ServerSummary<'a> {
    host: &'a str,
    formats: Vec<&'a str>,
}

pub fn run(config_path: &Path, cert_type: &str, formats: &[String]) -> Result<()> {
    let config = load_config(config_path)?;
    let pool = SigningServerPool::from_file(&config.signing_server_config).with_context(|| {
        format!(
            "failed to load signing servers from {}",
            config.signing_server_config.display()
        )
    })?;

    print_json(&summarize(&pool, cert_type, formats)?)
}

fn summarize<'a>(
    pool: &'a SigningServerPool,
    cert_type: &str,
    formats: &[String],
) -> Result<Vec<ServerSummary<'a>>> {
    if pool.servers_for(cert_type).is_empty() {
        let known: Vec<&str> = pool.cert_types().collect();
        bail!(
            "no servers configured for cert type {cert_type}; configured: {}",
            known.join(", ")
        );
    }

    Ok(suitable_servers(pool, cert_type, formats)
        .into_iter()
        .map(|server| ServerSummary {
            host: server.host(),
            formats: server.formats().iter().map(String::as_str).collect(),
        })
        .collect())
}
