//! Checksum-verified artifact download.
//!
//! The body is streamed to disk chunk by chunk while both digests are
//! updated, so artifacts are never held in memory. A file whose SHA-512 does
//! not match the manifest is removed before the error is returned.

use std::path::{Path, PathBuf};

use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use crate::error::SigningError;
use crate::hash::{Digester, Digests, digest_matches};

/// An artifact that was downloaded and matched its expected digest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedArtifact {
    /// Where the artifact was written.
    pub path: PathBuf,
    /// Digests of the downloaded bytes.
    pub digests: Digests,
    /// Size in bytes.
    pub size: u64,
}

/// Last path segment of `url`, used as the on-disk file name.
///
/// Percent-encoding is kept as is.
///
/// # Errors
///
/// Returns [`SigningError::Manifest`] if `url` does not parse or has no
/// non-empty final segment.
pub fn filename_from_url(url: &str) -> Result<String, SigningError> {
    let parsed = url::Url::parse(url).map_err(|e| SigningError::Manifest {
        reason: format!("invalid URL {url}: {e}"),
    })?;
    parsed
        .path_segments()
        .and_then(Iterator::last)
        .filter(|segment| !segment.is_empty() && *segment != "." && *segment != "..")
        .map(str::to_string)
        .ok_or_else(|| SigningError::Manifest {
            reason: format!("URL {url} has no file name"),
        })
}

/// Downloads `url` to `dest` and checks its SHA-512 against
/// `expected_sha512`.
///
/// # Errors
///
/// - [`SigningError::Http`] on transport failure or non-2xx status.
/// - [`SigningError::ChecksumMismatch`] if the digest differs; `dest` is
///   removed.
/// - [`SigningError::Io`] if `dest` cannot be written.
pub async fn fetch_and_verify(
    client: &reqwest::Client,
    url: &str,
    expected_sha512: &str,
    dest: &Path,
) -> Result<FetchedArtifact, SigningError> {
    debug!(url, dest = %dest.display(), "downloading artifact");
    let result = download(client, url, dest).await;
    let (digests, size) = match result {
        Ok(done) => done,
        Err(error) => {
            discard(dest).await;
            return Err(error);
        },
    };

    info!(url, sha512 = %digests.sha512, sha1 = %digests.sha1, size, "downloaded artifact");

    if !digest_matches(expected_sha512, &digests.sha512) {
        discard(dest).await;
        return Err(SigningError::ChecksumMismatch {
            url: url.to_string(),
            expected: expected_sha512.to_string(),
            actual: digests.sha512,
        });
    }

    Ok(FetchedArtifact {
        path: dest.to_path_buf(),
        digests,
        size,
    })
}

async fn download(
    client: &reqwest::Client,
    url: &str,
    dest: &Path,
) -> Result<(Digests, u64), SigningError> {
    let mut response = client
        .get(url)
        .send()
        .await
        .map_err(|e| SigningError::http(url, &e))?;
    let status = response.status();
    if !status.is_success() {
        return Err(SigningError::Http {
            url: url.to_string(),
            status: Some(status.as_u16()),
            message: status
                .canonical_reason()
                .unwrap_or("unexpected status")
                .to_string(),
        });
    }

    let mut file = tokio::fs::File::create(dest)
        .await
        .map_err(|e| SigningError::io(dest, e))?;
    let mut digester = Digester::new();
    while let Some(chunk) = response
        .chunk()
        .await
        .map_err(|e| SigningError::http(url, &e))?
    {
        digester.update(&chunk);
        file.write_all(&chunk)
            .await
            .map_err(|e| SigningError::io(dest, e))?;
    }
    file.flush().await.map_err(|e| SigningError::io(dest, e))?;
    file.sync_all()
        .await
        .map_err(|e| SigningError::io(dest, e))?;

    let size = digester.bytes_hashed();
    Ok((digester.finalize(), size))
}

async fn discard(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => debug!(path = %path.display(), "removed untrusted download"),
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => {},
        Err(error) => warn!(path = %path.display(), %error, "failed to remove untrusted download"),
    }
}
