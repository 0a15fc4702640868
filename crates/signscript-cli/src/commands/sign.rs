//! `signscript sign`

use std::path::Path;

use anyhow::{Context as _, Result};
use signscript_core::credentials::CredentialRefresher;
use signscript_core::{Context, sign_manifest, verify_task};
use tracing::info;

use super::{load_config, load_task, print_json};

pub async fn run(config_path: &Path, task_path: &Path) -> Result<()> {
    let config = load_config(config_path)?;
    // Verification comes before any network or signing work.
    let task = verify_task(&load_task(task_path)?).context("task rejected")?;

    let refresher = match &config.temp_creds_file {
        Some(path) => Some(
            CredentialRefresher::new(path, config.temp_creds_refresh)
                .spawn()
                .await,
        ),
        None => None,
    };

    let ctx = Context::from_config(config).context("failed to set up worker context")?;
    info!(
        manifest = %task.manifest_url,
        cert_type = task.request.cert_type(),
        servers = ctx.servers().len(),
        "starting signing task"
    );

    let outcome = sign_manifest(&ctx, &task).await;

    if let Some((_creds, handle)) = refresher {
        handle.abort();
    }

    let outcome = outcome.context("signing task failed")?;
    print_json(&outcome)
}
