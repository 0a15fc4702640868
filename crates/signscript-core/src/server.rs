//! Signing servers and server selection.
//!
//! The pool is read from a JSON file keyed by certificate type:
//!
//! ```json
//! {
//!   "dep": [
//!     ["signing1.example.com:9110", "user", "pass", ["gpg", "mar"]],
//!     ["signing2.example.com:9110", "user", "pass", ["signcode"]]
//!   ]
//! }
//! ```

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::Path;

use rand::seq::SliceRandom;
use secrecy::SecretString;
use serde::Deserialize;

use crate::config::ConfigError;

/// One signing server able to issue tokens for a certificate type.
#[derive(Clone)]
pub struct SigningServer {
    host: String,
    user: String,
    password: SecretString,
    cert_type: String,
    formats: BTreeSet<String>,
}

impl SigningServer {
    /// Creates a server record.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Validation`] if `host`, `user` or `cert_type`
    /// is empty, or no formats are given.
    pub fn new(
        host: impl Into<String>,
        user: impl Into<String>,
        password: SecretString,
        cert_type: impl Into<String>,
        formats: impl IntoIterator<Item = impl Into<String>>,
    ) -> Result<Self, ConfigError> {
        let host = host.into();
        let user = user.into();
        let cert_type = cert_type.into();
        let formats: BTreeSet<String> = formats.into_iter().map(Into::into).collect();

        for (field, value) in [("host", &host), ("user", &user), ("cert_type", &cert_type)] {
            if value.trim().is_empty() {
                return Err(ConfigError::Validation(format!(
                    "signing server {field} must not be empty"
                )));
            }
        }
        if formats.is_empty() {
            return Err(ConfigError::Validation(format!(
                "signing server {host} supports no formats"
            )));
        }

        Ok(Self {
            host,
            user,
            password,
            cert_type,
            formats,
        })
    }

    /// `host[:port]` of the server.
    #[must_use]
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Basic-auth user name.
    #[must_use]
    pub fn user(&self) -> &str {
        &self.user
    }

    /// Basic-auth password.
    #[must_use]
    pub const fn password(&self) -> &SecretString {
        &self.password
    }

    /// Certificate type this server signs with.
    #[must_use]
    pub fn cert_type(&self) -> &str {
        &self.cert_type
    }

    /// Formats the server supports.
    #[must_use]
    pub const fn formats(&self) -> &BTreeSet<String> {
        &self.formats
    }

    /// True if the server supports at least one of `formats`.
    #[must_use]
    pub fn supports_any<S: AsRef<str>>(&self, formats: &[S]) -> bool {
        formats.iter().any(|f| self.formats.contains(f.as_ref()))
    }

    /// URL of the token endpoint.
    #[must_use]
    pub fn token_url(&self, scheme: &str) -> String {
        format!("{scheme}://{}/token", self.host)
    }
}

impl fmt::Debug for SigningServer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SigningServer")
            .field("host", &self.host)
            .field("user", &self.user)
            .field("password", &"[REDACTED]")
            .field("cert_type", &self.cert_type)
            .field("formats", &self.formats)
            .finish()
    }
}

/// All configured signing servers, grouped by certificate type.
#[derive(Debug, Clone, Default)]
pub struct SigningServerPool {
    servers: BTreeMap<String, Vec<SigningServer>>,
}

/// On-disk shape of one server: `[host, user, password, [formats...]]`.
#[derive(Deserialize)]
struct RawServer(String, String, String, Vec<String>);

impl SigningServerPool {
    /// Builds a pool from already constructed servers.
    #[must_use]
    pub fn new(servers: impl IntoIterator<Item = SigningServer>) -> Self {
        let mut map: BTreeMap<String, Vec<SigningServer>> = BTreeMap::new();
        for server in servers {
            map.entry(server.cert_type.clone()).or_default().push(server);
        }
        Self { servers: map }
    }

    /// Loads the pool from a signing-server JSON file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed, or contains an
    /// invalid server.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json(&content)
    }

    /// Parses the pool from signing-server JSON.
    ///
    /// # Errors
    ///
    /// Returns an error if the JSON is malformed or a server is invalid.
    pub fn from_json(content: &str) -> Result<Self, ConfigError> {
        let raw: BTreeMap<String, Vec<RawServer>> = serde_json::from_str(content)?;
        let mut servers = Vec::new();
        for (cert_type, entries) in raw {
            for RawServer(host, user, password, formats) in entries {
                servers.push(SigningServer::new(
                    host,
                    user,
                    SecretString::from(password),
                    cert_type.clone(),
                    formats,
                )?);
            }
        }
        Ok(Self::new(servers))
    }

    /// Servers configured for `cert_type`, in config order.
    #[must_use]
    pub fn servers_for(&self, cert_type: &str) -> &[SigningServer] {
        self.servers.get(cert_type).map_or(&[][..], Vec::as_slice)
    }

    /// Configured certificate types.
    pub fn cert_types(&self) -> impl Iterator<Item = &str> {
        self.servers.keys().map(String::as_str)
    }

    /// Total number of servers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.servers.values().map(Vec::len).sum()
    }

    /// True if no servers are configured.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// What a task asks to be signed with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SigningRequest {
    cert_type: String,
    formats: Vec<String>,
}

impl SigningRequest {
    /// Creates a request.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Validation`] if `cert_type` is empty or no
    /// formats are given.
    pub fn new(cert_type: impl Into<String>, formats: Vec<String>) -> Result<Self, ConfigError> {
        let cert_type = cert_type.into();
        if cert_type.trim().is_empty() {
            return Err(ConfigError::Validation(
                "cert_type must not be empty".to_string(),
            ));
        }
        if formats.is_empty() {
            return Err(ConfigError::Validation(
                "at least one signing format is required".to_string(),
            ));
        }
        Ok(Self { cert_type, formats })
    }

    /// Requested certificate type.
    #[must_use]
    pub fn cert_type(&self) -> &str {
        &self.cert_type
    }

    /// Requested formats, in request order.
    #[must_use]
    pub fn formats(&self) -> &[String] {
        &self.formats
    }
}

/// Servers under `cert_type` sharing at least one format with `formats`,
/// in config order.
#[must_use]
pub fn suitable_servers<'a, S: AsRef<str>>(
    pool: &'a SigningServerPool,
    cert_type: &str,
    formats: &[S],
) -> Vec<&'a SigningServer> {
    pool.servers_for(cert_type)
        .iter()
        .filter(|s| s.supports_any(formats))
        .collect()
}

/// [`suitable_servers`] for `request`, uniformly shuffled to spread load.
#[must_use]
pub fn shuffled_servers<'a>(
    pool: &'a SigningServerPool,
    request: &SigningRequest,
) -> Vec<&'a SigningServer> {
    let mut servers = suitable_servers(pool, request.cert_type(), request.formats());
    servers.shuffle(&mut rand::thread_rng());
    servers
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use secrecy::ExposeSecret;

    use super::*;

    const POOL_JSON: &str = r#"{
        "dep": [
            ["a.example:9110", "user", "pass-a", ["gpg", "mar"]],
            ["b.example:9110", "user", "pass-b", ["signcode"]],
            ["c.example:9110", "user", "pass-c", ["mar"]]
        ],
        "release": [
            ["r.example:9110", "rel", "pass-r", ["gpg"]]
        ]
    }"#;

    fn pool() -> SigningServerPool {
        SigningServerPool::from_json(POOL_JSON).unwrap()
    }

    fn hosts(servers: &[&SigningServer]) -> Vec<String> {
        servers.iter().map(|s| s.host().to_string()).collect()
    }

    #[test]
    fn test_load_pool() {
        let pool = pool();
        assert_eq!(pool.len(), 4);
        assert_eq!(pool.cert_types().collect::<Vec<_>>(), vec!["dep", "release"]);
        let a = &pool.servers_for("dep")[0];
        assert_eq!(a.host(), "a.example:9110");
        assert_eq!(a.password().expose_secret(), "pass-a");
        assert_eq!(a.cert_type(), "dep");
        assert!(a.formats().contains("gpg"));
    }

    #[test]
    fn test_suitable_servers_intersection() {
        let pool = pool();
        assert_eq!(
            hosts(&suitable_servers(&pool, "dep", &["mar"])),
            vec!["a.example:9110", "c.example:9110"]
        );
        assert_eq!(
            hosts(&suitable_servers(&pool, "dep", &["gpg", "signcode"])),
            vec!["a.example:9110", "b.example:9110"]
        );
        assert_eq!(
            hosts(&suitable_servers(&pool, "release", &["gpg"])),
            vec!["r.example:9110"]
        );
    }

    #[test]
    fn test_suitable_servers_never_disjoint() {
        let pool = pool();
        for formats in [vec!["mar"], vec!["gpg"], vec!["signcode", "jar"], vec!["jar"]] {
            for server in suitable_servers(&pool, "dep", &formats) {
                assert!(formats.iter().any(|f| server.formats().contains(*f)));
            }
        }
    }

    #[test]
    fn test_no_match_is_empty() {
        let pool = pool();
        assert!(suitable_servers(&pool, "dep", &["jar"]).is_empty());
        assert!(suitable_servers(&pool, "nightly", &["gpg"]).is_empty());
    }

    #[test]
    fn test_shuffled_servers_is_permutation() {
        let pool = pool();
        let request = SigningRequest::new("dep", vec!["mar".to_string()]).unwrap();
        let mut seen = HashSet::new();
        for _ in 0..64 {
            let shuffled = hosts(&shuffled_servers(&pool, &request));
            let mut sorted = shuffled.clone();
            sorted.sort();
            assert_eq!(sorted, vec!["a.example:9110", "c.example:9110"]);
            seen.insert(shuffled);
        }
        // Both orders should show up over 64 draws.
        assert_eq!(seen.len(), 2);
    }

    #[test]
    fn test_debug_redacts_password() {
        let pool = pool();
        let debug = format!("{:?}", pool.servers_for("dep")[0]);
        assert!(debug.contains("REDACTED"));
        assert!(!debug.contains("pass-a"));
    }

    #[test]
    fn test_invalid_servers_rejected() {
        assert!(SigningServerPool::from_json(r#"{"dep": [["", "u", "p", ["gpg"]]]}"#).is_err());
        assert!(SigningServerPool::from_json(r#"{"dep": [["h", "u", "p", []]]}"#).is_err());
        assert!(SigningServerPool::from_json(r#"{"dep": [["h", "u"]]}"#).is_err());
    }

    #[test]
    fn test_signing_request_validation() {
        assert!(SigningRequest::new("", vec!["gpg".to_string()]).is_err());
        assert!(SigningRequest::new("dep", vec![]).is_err());
        let request = SigningRequest::new("dep", vec!["gpg".to_string()]).unwrap();
        assert_eq!(request.cert_type(), "dep");
        assert_eq!(request.formats(), ["gpg".to_string()]);
    }

    #[test]
    fn test_token_url() {
        let pool = pool();
        assert_eq!(
            pool.servers_for("release")[0].token_url("https"),
            "https://r.example:9110/token"
        );
    }
}
