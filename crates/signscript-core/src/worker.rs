//! Signing workflow for one task.
//!
//! ```text
//! Manifest::load
//!   └─ per entry (concurrent, raise_future_errors)
//!        fetch_and_verify ─► acquire_token ─► SignTool::sign
//!          ─► every detached signature on disk ─► ManifestEntry::record_signed
//!   └─ all Ok ─► manifest.json
//! ```
//!
//! The manifest is only written when every entry was signed. A detached
//! signature the requested formats call for but the tool did not write fails
//! its entry.

use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::aggregate::raise_future_errors;
use crate::context::Context;
use crate::error::SigningError;
use crate::fetch::fetch_and_verify;
use crate::formats::{DetachedSignatureFormat, detached_signatures};
use crate::fs::ensure_dir;
use crate::manifest::{Manifest, ManifestEntry};
use crate::server::suitable_servers;
use crate::signtool::SignInvocation;
use crate::task::SigningTask;
use crate::token::acquire_token;

/// A detached signature file produced alongside a signed artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DetachedFile {
    /// Format that produced the signature.
    pub format: String,
    /// Path of the signature file.
    pub path: PathBuf,
    /// MIME type to upload it with.
    pub mime: String,
}

/// One signed artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SignedArtifact {
    /// Path of the signed file.
    pub path: PathBuf,
    /// SHA-512 of the signed file.
    pub sha512: String,
    /// Size in bytes.
    pub size: u64,
    /// Detached signatures written next to it.
    pub detached: Vec<DetachedFile>,
}

/// Files a completed task leaves behind for upload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SigningOutcome {
    /// The rewritten manifest.
    pub manifest_path: PathBuf,
    /// Signed artifacts in manifest order.
    pub artifacts: Vec<SignedArtifact>,
}

/// Signs every artifact listed in the task's manifest.
///
/// # Errors
///
/// Returns the error of the first failing entry (in manifest order) after
/// all entries have finished, or any error loading or writing the manifest.
#[instrument(skip_all, fields(manifest = %task.manifest_url, cert_type = task.request.cert_type()))]
pub async fn sign_manifest(
    ctx: &Context,
    task: &SigningTask,
) -> Result<SigningOutcome, SigningError> {
    let config = ctx.config();
    ensure_dir(&config.work_dir)?;

    let mut manifest = Manifest::load(ctx.client(), &config.retry, &task.manifest_url).await?;
    let targets = manifest
        .entries()
        .iter()
        .map(|entry| -> Result<_, SigningError> {
            Ok((manifest.entry_url(entry), manifest.local_name(entry)?))
        })
        .collect::<Result<Vec<_>, _>>()?;

    let subtasks = manifest
        .entries_mut()
        .iter_mut()
        .zip(&targets)
        .map(|(entry, (url, name))| sign_entry(ctx, task, url, name, entry));
    let artifacts = raise_future_errors(subtasks).await?;

    let manifest_path = config.manifest_path();
    manifest.write(&manifest_path)?;
    info!(
        path = %manifest_path.display(),
        artifacts = artifacts.len(),
        "signing task complete"
    );

    Ok(SigningOutcome {
        manifest_path,
        artifacts,
    })
}

#[instrument(skip_all, fields(file = entry.file_to_sign()))]
async fn sign_entry(
    ctx: &Context,
    task: &SigningTask,
    url: &str,
    name: &str,
    entry: &mut ManifestEntry,
) -> Result<SignedArtifact, SigningError> {
    let config = ctx.config();
    let work_dir = config.work_dir.as_path();
    let request = &task.request;
    let path = work_dir.join(name);
    let expected = detached_signatures(request.formats());

    fetch_and_verify(ctx.client(), url, entry.hash(), &path).await?;
    for sig in &expected {
        let stale = work_dir.join(sig.filename_for(name));
        remove_if_present(&stale, "stale detached signature").await;
    }

    let token = acquire_token(&ctx.token_provider(), ctx.servers(), request, work_dir).await?;
    let servers = suitable_servers(ctx.servers(), request.cert_type(), request.formats());
    let nonce = work_dir.join(format!("nonce-{}", Uuid::new_v4()));
    debug!(server = token.server(), servers = servers.len(), "running signtool");

    let result = ctx
        .signtool()
        .sign(&SignInvocation {
            input: &path,
            output: &path,
            cert: &config.ssl_cert,
            token: token.path(),
            nonce: &nonce,
            formats: request.formats(),
            servers: &servers,
        })
        .await;
    remove_if_present(&nonce, "nonce file").await;
    drop(token);
    let signed = result?;

    require_detached(work_dir, name, &expected).await?;
    entry.record_signed(signed.digests.sha512.clone(), signed.size, &expected);

    let detached = expected
        .iter()
        .map(|sig| DetachedFile {
            format: sig.format.to_string(),
            path: work_dir.join(sig.filename_for(name)),
            mime: sig.mime.to_string(),
        })
        .collect();

    Ok(SignedArtifact {
        path,
        sha512: signed.digests.sha512,
        size: signed.size,
        detached,
    })
}

/// Fails unless every signature in `expected` was written next to `name`.
async fn require_detached(
    work_dir: &Path,
    name: &str,
    expected: &[DetachedSignatureFormat],
) -> Result<(), SigningError> {
    for sig in expected {
        let path = work_dir.join(sig.filename_for(name));
        let present = tokio::fs::try_exists(&path)
            .await
            .map_err(|e| SigningError::io(&path, e))?;
        if !present {
            return Err(SigningError::DetachedSignatureMissing {
                format: sig.format.to_string(),
                path,
            });
        }
    }
    Ok(())
}

async fn remove_if_present(path: &Path, what: &str) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => debug!(path = %path.display(), "removed {what}"),
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => {},
        Err(error) => warn!(path = %path.display(), %error, "failed to remove {what}"),
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    #[tokio::test]
    async fn test_require_detached_accepts_written_signatures() {
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join("app.tar.gz.asc"), b"sig").unwrap();
        let expected = detached_signatures(&["mar", "gpg"]);

        require_detached(temp.path(), "app.tar.gz", &expected)
            .await
            .unwrap();
        require_detached(temp.path(), "app.tar.gz", &[]).await.unwrap();
    }

    #[tokio::test]
    async fn test_require_detached_fails_on_missing_signature() {
        let temp = TempDir::new().unwrap();
        let expected = detached_signatures(&["gpg"]);

        let err = require_detached(temp.path(), "app.tar.gz", &expected)
            .await
            .unwrap_err();

        match err {
            SigningError::DetachedSignatureMissing { format, path } => {
                assert_eq!(format, "gpg");
                assert_eq!(path, temp.path().join("app.tar.gz.asc"));
            },
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_remove_if_present_tolerates_missing_file() {
        let temp = TempDir::new().unwrap();
        let nonce = temp.path().join("nonce-1");
        remove_if_present(&nonce, "nonce file").await;
        std::fs::write(&nonce, b"n").unwrap();
        remove_if_present(&nonce, "nonce file").await;
        assert!(!nonce.exists());
    }
}
