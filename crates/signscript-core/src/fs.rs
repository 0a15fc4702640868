//! Filesystem helpers for the work directory.

use std::io::Write;
use std::path::Path;

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use tempfile::NamedTempFile;

use crate::error::SigningError;

/// Creates `path` and any missing parents. Succeeds if it already exists.
///
/// # Errors
///
/// Returns an error if a component exists as a non-directory or the
/// directory cannot be created.
pub fn ensure_dir(path: &Path) -> Result<(), SigningError> {
    std::fs::create_dir_all(path).map_err(|e| SigningError::io(path, e))
}

/// Reads and deserializes a JSON file.
///
/// # Errors
///
/// Returns an error if the file cannot be read or is not valid JSON for `T`.
pub fn load_json<T: DeserializeOwned>(path: &Path) -> Result<T, SigningError> {
    let content = std::fs::read(path).map_err(|e| SigningError::io(path, e))?;
    Ok(serde_json::from_slice(&content)?)
}

/// Serializes `value` as JSON with sorted object keys, two-space
/// indentation and a trailing newline.
///
/// # Errors
///
/// Returns an error if `value` cannot be represented as JSON.
pub fn to_sorted_json<T: Serialize>(value: &T) -> Result<Vec<u8>, SigningError> {
    let value = sort_keys(serde_json::to_value(value)?);
    let mut out = serde_json::to_vec_pretty(&value)?;
    out.push(b'\n');
    Ok(out)
}

/// Rebuilds every object in `value` with keys inserted in sorted order, so
/// the output is sorted even when `serde_json` preserves insertion order.
fn sort_keys(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(String, Value)> = map.into_iter().collect();
            entries.sort_by(|a, b| a.0.cmp(&b.0));
            Value::Object(
                entries
                    .into_iter()
                    .map(|(k, v)| (k, sort_keys(v)))
                    .collect::<Map<String, Value>>(),
            )
        },
        Value::Array(items) => Value::Array(items.into_iter().map(sort_keys).collect()),
        other => other,
    }
}

/// Writes `value` to `path` as sorted JSON, atomically.
///
/// # Errors
///
/// Returns an error if serialization or the atomic write fails.
pub fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), SigningError> {
    let bytes = to_sorted_json(value)?;
    atomic_write(path, &bytes)
}

/// Writes bytes to `path` via a temp file in the same directory, fsync and
/// rename.
///
/// # Errors
///
/// Returns an error if the temp file cannot be created, written or renamed.
pub fn atomic_write(path: &Path, bytes: &[u8]) -> Result<(), SigningError> {
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let mut temp = NamedTempFile::new_in(dir).map_err(|e| SigningError::io(dir, e))?;
    temp.as_file_mut()
        .write_all(bytes)
        .map_err(|e| SigningError::io(temp.path(), e))?;
    temp.as_file()
        .sync_all()
        .map_err(|e| SigningError::io(temp.path(), e))?;
    temp.persist(path)
        .map_err(|e| SigningError::io(path, e.error))?;
    Ok(())
}

#[cfg(unix)]
pub(crate) fn set_private(file: &std::fs::File, path: &Path) -> Result<(), SigningError> {
    use std::os::unix::fs::PermissionsExt;
    file.set_permissions(std::fs::Permissions::from_mode(0o600))
        .map_err(|e| SigningError::io(path, e))
}

#[cfg(not(unix))]
pub(crate) fn set_private(_file: &std::fs::File, _path: &Path) -> Result<(), SigningError> {
    Ok(())
}
