//! SHA-512 / SHA-1 digests of artifacts.
//!
//! SHA-512 is the integrity value recorded in manifests. SHA-1 is only
//! logged alongside it for audit trails.

use std::path::Path;

use sha1::Sha1;
use sha2::{Digest, Sha512};
use tokio::io::AsyncReadExt;

use crate::error::SigningError;

/// Read size used when hashing files.
const READ_CHUNK: usize = 64 * 1024;

/// Hex-encoded digests of one artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Digests {
    /// Lowercase hex SHA-512.
    pub sha512: String,
    /// Lowercase hex SHA-1.
    pub sha1: String,
}

/// Incremental SHA-512 + SHA-1 hasher.
#[derive(Debug, Clone, Default)]
pub struct Digester {
    sha512: Sha512,
    sha1: Sha1,
    len: u64,
}

impl Digester {
    /// Creates an empty digester.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds `bytes` into both digests.
    pub fn update(&mut self, bytes: &[u8]) {
        self.sha512.update(bytes);
        self.sha1.update(bytes);
        self.len += bytes.len() as u64;
    }

    /// Number of bytes fed so far.
    #[must_use]
    pub const fn bytes_hashed(&self) -> u64 {
        self.len
    }

    /// Consumes the digester and returns hex-encoded digests.
    #[must_use]
    pub fn finalize(self) -> Digests {
        Digests {
            sha512: hex::encode(self.sha512.finalize()),
            sha1: hex::encode(self.sha1.finalize()),
        }
    }
}

/// Hex SHA-512 of `bytes`.
#[must_use]
pub fn sha512_hex(bytes: &[u8]) -> String {
    hex::encode(Sha512::digest(bytes))
}

/// Hashes the file at `path` without loading it into memory.
///
/// Returns the digests and the file size in bytes.
///
/// # Errors
///
/// Returns an error if the file cannot be opened or read.
pub async fn digest_file(path: &Path) -> Result<(Digests, u64), SigningError> {
    let mut file = tokio::fs::File::open(path)
        .await
        .map_err(|e| SigningError::io(path, e))?;
    let mut digester = Digester::new();
    let mut buf = vec![0u8; READ_CHUNK];
    loop {
        let n = file
            .read(&mut buf)
            .await
            .map_err(|e| SigningError::io(path, e))?;
        if n == 0 {
            break;
        }
        digester.update(&buf[..n]);
    }
    let len = digester.bytes_hashed();
    Ok((digester.finalize(), len))
}

/// Case-insensitive comparison of two hex digests.
#[must_use]
pub fn digest_matches(expected: &str, actual: &str) -> bool {
    expected.trim().eq_ignore_ascii_case(actual)
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    const HELLO_SHA1: &str = "f572d396fae9206628714fb2ce00f72e94f2258f";
    const HELLO_SHA512: &str = "e7c22b994c59d9cf2b48e549b1e24666636045930d3da7c1acb299d1c3b7f931f94aae41edda2c2b207a36e10f8bcb8d45223e54878f5b316e7ce3b6bc019629";

    #[test]
    fn test_digester_known_values() {
        let mut digester = Digester::new();
        digester.update(b"hel");
        digester.update(b"lo\n");
        assert_eq!(digester.bytes_hashed(), 6);
        let digests = digester.finalize();
        assert_eq!(digests.sha1, HELLO_SHA1);
        assert_eq!(digests.sha512, HELLO_SHA512);
        assert_eq!(sha512_hex(b"hello\n"), HELLO_SHA512);
    }

    #[tokio::test]
    async fn test_digest_file() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("hello.txt");
        std::fs::write(&path, b"hello\n").unwrap();

        let (digests, size) = digest_file(&path).await.unwrap();
        assert_eq!(size, 6);
        assert_eq!(digests.sha512, HELLO_SHA512);
        assert_eq!(digests.sha1, HELLO_SHA1);
    }

    #[tokio::test]
    async fn test_digest_large_file_matches_one_shot() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("big.bin");
        let data: Vec<u8> = (0..(READ_CHUNK * 3 + 17)).map(|i| (i % 251) as u8).collect();
        std::fs::write(&path, &data).unwrap();

        let (digests, size) = digest_file(&path).await.unwrap();
        assert_eq!(size, data.len() as u64);
        assert_eq!(digests.sha512, sha512_hex(&data));
    }

    #[test]
    fn test_digest_matches_ignores_case() {
        assert!(digest_matches(&HELLO_SHA512.to_uppercase(), HELLO_SHA512));
        assert!(!digest_matches("00", HELLO_SHA512));
    }
}
