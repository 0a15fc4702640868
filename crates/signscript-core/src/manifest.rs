//! Signing manifest.
//!
//! A manifest is a JSON array of entries. Each entry names one artifact
//! relative to the manifest's own URL and carries its SHA-512:
//!
//! ```json
//! [
//!   {"file_to_sign": "app.mar", "hash": "<sha512>", "size": 1234},
//!   {"mar": "legacy.mar", "hash": "<sha512>"}
//! ]
//! ```
//!
//! Names may contain a relative subpath (`en-US/app.mar`); the artifact is
//! stored in the work directory under the last segment of its URL, so two
//! entries resolving to the same local name are rejected.
//!
//! Fields the worker does not know about are kept and written back
//! unchanged.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};

use crate::error::SigningError;
use crate::fetch::filename_from_url;
use crate::formats::DetachedSignatureFormat;
use crate::fs::{to_sorted_json, write_json};
use crate::retry::RetryPolicy;

/// One artifact listed in a manifest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawManifestEntry")]
pub struct ManifestEntry {
    #[serde(skip_serializing_if = "Option::is_none")]
    file_to_sign: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    mar: Option<String>,
    hash: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    size: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    detached_signatures: Option<BTreeMap<String, String>>,
    #[serde(flatten)]
    extra: BTreeMap<String, Value>,
}

#[derive(Deserialize)]
struct RawManifestEntry {
    #[serde(default)]
    file_to_sign: Option<String>,
    #[serde(default)]
    mar: Option<String>,
    #[serde(default)]
    hash: Option<String>,
    #[serde(default)]
    size: Option<u64>,
    #[serde(default)]
    detached_signatures: Option<BTreeMap<String, String>>,
    #[serde(flatten)]
    extra: BTreeMap<String, Value>,
}

impl TryFrom<RawManifestEntry> for ManifestEntry {
    type Error = String;

    fn try_from(raw: RawManifestEntry) -> Result<Self, Self::Error> {
        let name = raw
            .file_to_sign
            .as_deref()
            .or(raw.mar.as_deref())
            .ok_or_else(|| "entry has neither file_to_sign nor mar".to_string())?;
        if !is_relative_name(name) {
            return Err(format!("invalid file name {name:?}"));
        }
        let hash = raw
            .hash
            .filter(|h| !h.trim().is_empty())
            .ok_or_else(|| format!("entry {name} has no hash"))?;
        Ok(Self {
            file_to_sign: raw.file_to_sign,
            mar: raw.mar,
            hash,
            size: raw.size,
            detached_signatures: raw.detached_signatures,
            extra: raw.extra,
        })
    }
}

/// A non-empty relative path with no `.` or `..` segments.
fn is_relative_name(name: &str) -> bool {
    !name.is_empty()
        && !name.starts_with('/')
        && name.split('/').all(|segment| segment != "." && segment != "..")
}

impl ManifestEntry {
    /// File name of the artifact; `file_to_sign`, else the legacy `mar`.
    #[must_use]
    pub fn file_to_sign(&self) -> &str {
        self.file_to_sign
            .as_deref()
            .or(self.mar.as_deref())
            .unwrap_or_default()
    }

    /// Expected (or, after signing, recorded) SHA-512.
    #[must_use]
    pub fn hash(&self) -> &str {
        &self.hash
    }

    /// Recorded size in bytes, if any.
    #[must_use]
    pub const fn size(&self) -> Option<u64> {
        self.size
    }

    /// Detached signature files by format, if any were recorded.
    #[must_use]
    pub const fn detached_signatures(&self) -> Option<&BTreeMap<String, String>> {
        self.detached_signatures.as_ref()
    }

    /// Replaces the integrity data with that of the signed file.
    ///
    /// `detached` lists the formats whose signature file was produced. The
    /// recorded map is rebuilt from it, so signatures listed by the input
    /// manifest do not survive, and it is present even when empty.
    pub fn record_signed(
        &mut self,
        sha512: impl Into<String>,
        size: u64,
        detached: &[DetachedSignatureFormat],
    ) {
        let name = self.file_to_sign();
        let map = detached
            .iter()
            .map(|sig| (sig.format.to_string(), sig.filename_for(name)))
            .collect();
        self.hash = sha512.into();
        self.size = Some(size);
        self.detached_signatures = Some(map);
    }
}

/// A loaded manifest.
#[derive(Debug, Clone, PartialEq)]
pub struct Manifest {
    entries: Vec<ManifestEntry>,
    url_prefix: String,
}

impl Manifest {
    /// Parses manifest JSON fetched from `url`.
    ///
    /// # Errors
    ///
    /// Returns [`SigningError::Manifest`] if the document is not an array
    /// of valid entries or two entries resolve to the same local file name.
    pub fn from_json(bytes: &[u8], url: &str) -> Result<Self, SigningError> {
        let entries: Vec<ManifestEntry> =
            serde_json::from_slice(bytes).map_err(|e| SigningError::Manifest {
                reason: format!("{url}: {e}"),
            })?;
        let manifest = Self {
            entries,
            url_prefix: url_prefix(url),
        };

        let mut seen = BTreeSet::new();
        for entry in &manifest.entries {
            let local = manifest.local_name(entry)?;
            if seen.contains(&local) {
                return Err(SigningError::Manifest {
                    reason: format!(
                        "{url}: duplicate entry {} (stored as {local})",
                        entry.file_to_sign()
                    ),
                });
            }
            seen.insert(local);
        }

        Ok(manifest)
    }

    /// Downloads and parses the manifest at `url`, retrying per `retry`.
    ///
    /// # Errors
    ///
    /// Returns [`SigningError::Http`] once the retries are exhausted, or a
    /// parse error from [`Manifest::from_json`].
    pub async fn load(
        client: &reqwest::Client,
        retry: &RetryPolicy,
        url: &str,
    ) -> Result<Self, SigningError> {
        let body = retry.run(url, || fetch_once(client, url)).await?;

        let manifest = Self::from_json(&body, url)?;
        info!(url, entries = manifest.entries.len(), "loaded signing manifest");
        Ok(manifest)
    }

    /// Manifest URL with its last path segment removed, ending in `/`.
    #[must_use]
    pub fn url_prefix(&self) -> &str {
        &self.url_prefix
    }

    /// URL of `entry`'s artifact.
    #[must_use]
    pub fn entry_url(&self, entry: &ManifestEntry) -> String {
        format!("{}{}", self.url_prefix, entry.file_to_sign())
    }

    /// Name `entry`'s artifact is stored under in the work directory.
    ///
    /// # Errors
    ///
    /// Returns [`SigningError::Manifest`] if the entry URL has no file name.
    pub fn local_name(&self, entry: &ManifestEntry) -> Result<String, SigningError> {
        filename_from_url(&self.entry_url(entry))
    }

    /// Entries in document order.
    #[must_use]
    pub fn entries(&self) -> &[ManifestEntry] {
        &self.entries
    }

    /// Mutable entries in document order.
    pub fn entries_mut(&mut self) -> &mut [ManifestEntry] {
        &mut self.entries
    }

    /// Deterministic JSON encoding: sorted keys, two-space indent, trailing
    /// newline.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_json_bytes(&self) -> Result<Vec<u8>, SigningError> {
        to_sorted_json(&self.entries)
    }

    /// Atomically writes the manifest to `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or the write fails.
    pub fn write(&self, path: &Path) -> Result<(), SigningError> {
        write_json(path, &self.entries)?;
        debug!(path = %path.display(), "wrote manifest");
        Ok(())
    }
}

async fn fetch_once(client: &reqwest::Client, url: &str) -> Result<Vec<u8>, SigningError> {
    let response = client
        .get(url)
        .send()
        .await
        .map_err(|e| SigningError::http(url, &e))?;
    let status = response.status();
    if !status.is_success() {
        return Err(SigningError::Http {
            url: url.to_string(),
            status: Some(status.as_u16()),
            message: "cannot fetch manifest".to_string(),
        });
    }
    let body = response
        .bytes()
        .await
        .map_err(|e| SigningError::http(url, &e))?;
    Ok(body.to_vec())
}

fn url_prefix(url: &str) -> String {
    url.rfind('/')
        .map_or_else(|| url.to_string(), |idx| url[..=idx].to_string())
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use tempfile::TempDir;

    use super::*;
    use crate::formats::detached_signatures;

    const URL: &str = "https://queue.example/task/1/public/manifest.json";

    fn manifest(value: &Value) -> Result<Manifest, SigningError> {
        Manifest::from_json(&serde_json::to_vec(value).unwrap(), URL)
    }

    #[test]
    fn test_parse_entries() {
        let m = manifest(&json!([
            {"file_to_sign": "a.mar", "hash": "aa", "size": 3, "locale": "de"},
            {"mar": "b.mar", "hash": "bb"},
        ]))
        .unwrap();

        assert_eq!(m.url_prefix(), "https://queue.example/task/1/public/");
        assert_eq!(m.entries().len(), 2);
        let a = &m.entries()[0];
        assert_eq!(a.file_to_sign(), "a.mar");
        assert_eq!(a.size(), Some(3));
        assert_eq!(serde_json::to_value(a).unwrap()["locale"], json!("de"));
        assert_eq!(m.entries()[1].file_to_sign(), "b.mar");
        assert_eq!(
            m.entry_url(&m.entries()[1]),
            "https://queue.example/task/1/public/b.mar"
        );
    }

    #[test]
    fn test_file_to_sign_preferred_over_mar() {
        let m = manifest(&json!([{"file_to_sign": "new.mar", "mar": "old.mar", "hash": "aa"}]))
            .unwrap();
        assert_eq!(m.entries()[0].file_to_sign(), "new.mar");
    }

    #[test]
    fn test_invalid_entries_rejected() {
        for bad in [
            json!([{"hash": "aa"}]),
            json!([{"file_to_sign": "a.mar"}]),
            json!([{"file_to_sign": "a.mar", "hash": ""}]),
            json!([{"file_to_sign": "../a.mar", "hash": "aa"}]),
            json!([{"file_to_sign": "en-US/../a.mar", "hash": "aa"}]),
            json!([{"file_to_sign": "/a.mar", "hash": "aa"}]),
            json!([{"file_to_sign": "en-US/", "hash": "aa"}]),
            json!({"file_to_sign": "a.mar", "hash": "aa"}),
        ] {
            let err = manifest(&bad).unwrap_err();
            assert!(matches!(err, SigningError::Manifest { .. }), "{bad}");
        }
    }

    #[test]
    fn test_duplicate_names_rejected() {
        let err = manifest(&json!([
            {"file_to_sign": "a.mar", "hash": "aa"},
            {"mar": "a.mar", "hash": "bb"},
        ]))
        .unwrap_err();
        assert!(err.to_string().contains("duplicate entry a.mar"));
    }

    #[test]
    fn test_subpath_entries_stored_under_last_segment() {
        let m = manifest(&json!([
            {"file_to_sign": "en-US/target.mar", "hash": "aa"},
            {"file_to_sign": "de/update.mar", "hash": "bb"},
        ]))
        .unwrap();

        let entry = &m.entries()[0];
        assert_eq!(entry.file_to_sign(), "en-US/target.mar");
        assert_eq!(
            m.entry_url(entry),
            "https://queue.example/task/1/public/en-US/target.mar"
        );
        assert_eq!(m.local_name(entry).unwrap(), "target.mar");
        assert_eq!(m.local_name(&m.entries()[1]).unwrap(), "update.mar");
    }

    #[test]
    fn test_duplicate_local_names_rejected() {
        for names in [["a.mar#1", "a.mar#2"], ["en-US/a.mar", "de/a.mar"]] {
            let err = manifest(&json!([
                {"file_to_sign": names[0], "hash": "aa"},
                {"file_to_sign": names[1], "hash": "bb"},
            ]))
            .unwrap_err();
            assert!(
                err.to_string().contains("(stored as a.mar)"),
                "{names:?}: {err}"
            );
        }
    }

    #[test]
    fn test_record_signed() {
        let mut m = manifest(&json!([
            {"file_to_sign": "a.tar.gz", "hash": "aa"},
            {"file_to_sign": "b.mar", "hash": "bb"},
        ]))
        .unwrap();

        let detached = detached_signatures(&["gpg", "mar"]);
        m.entries_mut()[0].record_signed("cc", 42, &detached);
        m.entries_mut()[1].record_signed("dd", 7, &[]);

        let a = &m.entries()[0];
        assert_eq!(a.hash(), "cc");
        assert_eq!(a.size(), Some(42));
        assert_eq!(
            a.detached_signatures().unwrap().get("gpg").map(String::as_str),
            Some("a.tar.gz.asc")
        );
        assert_eq!(m.entries()[1].detached_signatures(), Some(&BTreeMap::new()));
        assert_eq!(
            serde_json::to_value(&m.entries()[1]).unwrap()["detached_signatures"],
            json!({})
        );
    }

    #[test]
    fn test_record_signed_drops_signatures_from_input() {
        let mut m = manifest(&json!([
            {"file_to_sign": "a.mar", "hash": "aa", "detached_signatures": {"widevine": "a.mar.sig"}},
        ]))
        .unwrap();

        m.entries_mut()[0].record_signed("bb", 3, &detached_signatures(&["gpg"]));

        let recorded = m.entries()[0].detached_signatures().unwrap();
        assert_eq!(recorded.len(), 1);
        assert_eq!(recorded.get("gpg").map(String::as_str), Some("a.mar.asc"));
        assert!(!recorded.contains_key("widevine"));
    }

    #[test]
    fn test_serialization_is_sorted_and_stable() {
        let mut m = manifest(&json!([
            {"zeta": 1, "file_to_sign": "a.mar", "hash": "aa", "alpha": {"y": 1, "x": 2}},
        ]))
        .unwrap();
        m.entries_mut()[0].record_signed("bb", 5, &detached_signatures(&["gpg"]));

        let bytes = m.to_json_bytes().unwrap();
        let text = String::from_utf8(bytes.clone()).unwrap();
        assert_eq!(
            text,
            "[\n  {\n    \"alpha\": {\n      \"x\": 2,\n      \"y\": 1\n    },\n    \
             \"detached_signatures\": {\n      \"gpg\": \"a.mar.asc\"\n    },\n    \
             \"file_to_sign\": \"a.mar\",\n    \"hash\": \"bb\",\n    \"size\": 5,\n    \
             \"zeta\": 1\n  }\n]\n"
        );

        let reparsed = Manifest::from_json(&bytes, URL).unwrap();
        assert_eq!(reparsed.to_json_bytes().unwrap(), bytes);
    }

    #[test]
    fn test_write_matches_bytes() {
        let temp = TempDir::new().unwrap();
        let m = manifest(&json!([{"file_to_sign": "a.mar", "hash": "aa"}])).unwrap();
        let path = temp.path().join("manifest.json");
        m.write(&path).unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), m.to_json_bytes().unwrap());
    }
}
