//! External signing tool invocation.
//!
//! The worker never signs anything itself. It runs the configured tool as
//!
//! ```text
//! <argv...> -n <nonce> -t <token> -c <cert> [-H <host>]... [-f <fmt>]... -o <output> <input>
//! ```
//!
//! with the work directory as cwd. The tool does its own server failover
//! across the `-H` hosts.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::config::WorkerConfig;
use crate::error::SigningError;
use crate::hash::{Digests, digest_file};
use crate::server::SigningServer;

/// One run of the signing tool.
#[derive(Debug, Clone)]
pub struct SignInvocation<'a> {
    /// Verified artifact to sign.
    pub input: &'a Path,
    /// Where the tool writes the signed artifact.
    pub output: &'a Path,
    /// Certificate reference passed with `-c`.
    pub cert: &'a Path,
    /// Token file passed with `-t`.
    pub token: &'a Path,
    /// Nonce file passed with `-n`; created by the tool.
    pub nonce: &'a Path,
    /// Requested formats, each passed with `-f`.
    pub formats: &'a [String],
    /// Candidate servers, each passed with `-H`.
    pub servers: &'a [&'a SigningServer],
}

/// Digests of a successfully signed file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedFile {
    /// Path of the signed output.
    pub path: PathBuf,
    /// Digests of the signed output.
    pub digests: Digests,
    /// Size in bytes.
    pub size: u64,
}

/// Configured signing tool.
#[derive(Debug, Clone)]
pub struct SignTool {
    argv: Vec<String>,
    work_dir: PathBuf,
    timeout: Option<Duration>,
}

impl SignTool {
    /// Creates a tool runner. `argv` is the command prefix (program first).
    #[must_use]
    pub fn new(argv: Vec<String>, work_dir: impl Into<PathBuf>, timeout: Option<Duration>) -> Self {
        Self {
            argv,
            work_dir: work_dir.into(),
            timeout,
        }
    }

    /// Tool runner using the worker's `signtool`, `work_dir` and
    /// `signtool_timeout` settings.
    #[must_use]
    pub fn from_config(config: &WorkerConfig) -> Self {
        Self::new(
            config.signtool.clone(),
            config.work_dir.clone(),
            config.signtool_timeout,
        )
    }

    /// Arguments appended after the configured argv prefix.
    #[must_use]
    pub fn command_args(invocation: &SignInvocation<'_>) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec![
            "-n".into(),
            invocation.nonce.into(),
            "-t".into(),
            invocation.token.into(),
            "-c".into(),
            invocation.cert.into(),
        ];
        for server in invocation.servers {
            args.push("-H".into());
            args.push(server.host().into());
        }
        for format in invocation.formats {
            args.push("-f".into());
            args.push(format.into());
        }
        args.push("-o".into());
        args.push(invocation.output.into());
        args.push(invocation.input.into());
        args
    }

    /// Runs the tool and hashes its output.
    ///
    /// # Errors
    ///
    /// - [`SigningError::SignToolSpawn`] if the process cannot be started.
    /// - [`SigningError::SignToolTimeout`] if it exceeds the timeout; the
    ///   process is killed.
    /// - [`SigningError::SignToolFailed`] on non-zero exit or signal, with
    ///   the combined output.
    /// - [`SigningError::Io`] if the output file cannot be hashed.
    pub async fn sign(&self, invocation: &SignInvocation<'_>) -> Result<SignedFile, SigningError> {
        let (program, prefix) = self
            .argv
            .split_first()
            .ok_or_else(|| SigningError::SignToolSpawn {
                message: "signtool command is empty".to_string(),
            })?;

        let mut cmd = Command::new(program);
        cmd.args(prefix)
            .args(Self::command_args(invocation))
            .current_dir(&self.work_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        debug!(
            input = %invocation.input.display(),
            output = %invocation.output.display(),
            formats = ?invocation.formats,
            servers = invocation.servers.len(),
            "running signtool"
        );

        let child = cmd.spawn().map_err(|e| SigningError::SignToolSpawn {
            message: format!("{program}: {e}"),
        })?;

        let wait = child.wait_with_output();
        let output = match self.timeout {
            Some(limit) => {
                if let Ok(result) = tokio::time::timeout(limit, wait).await {
                    result
                } else {
                    // Dropping the wait future drops the child, which kills it.
                    warn!(input = %invocation.input.display(), "signtool timed out");
                    return Err(SigningError::SignToolTimeout {
                        timeout_secs: limit.as_secs(),
                    });
                }
            },
            None => wait.await,
        }
        .map_err(|e| SigningError::SignToolSpawn {
            message: format!("failed to wait for signtool: {e}"),
        })?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        let combined = if stderr.is_empty() {
            stdout.into_owned()
        } else {
            format!("{stdout}\nSTDERR:\n{stderr}")
        };
        debug!(status = %output.status, output = %combined, "signtool finished");

        if !output.status.success() {
            return Err(SigningError::SignToolFailed {
                code: output.status.code(),
                output: combined,
            });
        }

        let (digests, size) = digest_file(invocation.output).await?;
        info!(
            path = %invocation.output.display(),
            sha512 = %digests.sha512,
            sha1 = %digests.sha1,
            size,
            "signed file"
        );
        Ok(SignedFile {
            path: invocation.output.to_path_buf(),
            digests,
            size,
        })
    }
}

#[cfg(test)]
mod tests {
    use secrecy::SecretString;
    use tempfile::TempDir;

    use super::*;

    fn server(host: &str) -> SigningServer {
        SigningServer::new(
            host,
            "u",
            SecretString::from("p".to_string()),
            "dep",
            ["gpg"],
        )
        .unwrap()
    }

    struct Paths {
        input: PathBuf,
        output: PathBuf,
        cert: PathBuf,
        token: PathBuf,
        nonce: PathBuf,
    }

    fn paths(dir: &Path) -> Paths {
        let input = dir.join("app.mar");
        std::fs::write(&input, b"unsigned\n").unwrap();
        Paths {
            input,
            output: dir.join("app.mar"),
            cert: dir.join("cert.pem"),
            token: dir.join("token-x"),
            nonce: dir.join("nonce-x"),
        }
    }

    fn sh(script: &str) -> Vec<String> {
        vec!["sh".to_string(), "-c".to_string(), script.to_string(), "signtool".to_string()]
    }

    #[test]
    fn test_command_args_layout() {
        let a = server("a:9110");
        let b = server("b:9110");
        let servers = [&a, &b];
        let formats = vec!["gpg".to_string(), "mar".to_string()];
        let invocation = SignInvocation {
            input: Path::new("in.mar"),
            output: Path::new("out.mar"),
            cert: Path::new("cert.pem"),
            token: Path::new("token-1"),
            nonce: Path::new("nonce-1"),
            formats: &formats,
            servers: &servers,
        };

        let args: Vec<String> = SignTool::command_args(&invocation)
            .into_iter()
            .map(|a| a.into_string().unwrap())
            .collect();
        assert_eq!(
            args,
            [
                "-n", "nonce-1", "-t", "token-1", "-c", "cert.pem", "-H", "a:9110", "-H",
                "b:9110", "-f", "gpg", "-f", "mar", "-o", "out.mar", "in.mar"
            ]
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_sign_success_hashes_output() {
        let temp = TempDir::new().unwrap();
        let p = paths(temp.path());
        let formats = vec!["gpg".to_string()];
        // The output path is the second-to-last argument.
        let tool = SignTool::new(
            sh(r#"for a; do prev2="$prev"; prev="$a"; done; printf 'signed\n' > "$prev2""#),
            temp.path(),
            None,
        );

        let signed = tool
            .sign(&SignInvocation {
                input: &p.input,
                output: &p.output,
                cert: &p.cert,
                token: &p.token,
                nonce: &p.nonce,
                formats: &formats,
                servers: &[],
            })
            .await
            .unwrap();

        assert_eq!(std::fs::read(&p.output).unwrap(), b"signed\n");
        assert_eq!(signed.size, 7);
        assert_eq!(signed.digests.sha512, crate::hash::sha512_hex(b"signed\n"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_sign_failure_captures_output() {
        let temp = TempDir::new().unwrap();
        let p = paths(temp.path());
        let tool = SignTool::new(
            sh("echo starting; echo 'bad token' >&2; exit 3"),
            temp.path(),
            None,
        );

        let err = tool
            .sign(&SignInvocation {
                input: &p.input,
                output: &p.output,
                cert: &p.cert,
                token: &p.token,
                nonce: &p.nonce,
                formats: &[],
                servers: &[],
            })
            .await
            .unwrap_err();

        match err {
            SigningError::SignToolFailed { code, output } => {
                assert_eq!(code, Some(3));
                assert!(output.contains("starting"));
                assert!(output.contains("bad token"));
            },
            other => panic!("unexpected error: {other}"),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_sign_timeout() {
        let temp = TempDir::new().unwrap();
        let p = paths(temp.path());
        let tool = SignTool::new(sh("sleep 10"), temp.path(), Some(Duration::from_millis(100)));

        let err = tool
            .sign(&SignInvocation {
                input: &p.input,
                output: &p.output,
                cert: &p.cert,
                token: &p.token,
                nonce: &p.nonce,
                formats: &[],
                servers: &[],
            })
            .await
            .unwrap_err();
        assert!(matches!(err, SigningError::SignToolTimeout { .. }));
    }

    #[tokio::test]
    async fn test_spawn_failure() {
        let temp = TempDir::new().unwrap();
        let p = paths(temp.path());
        let tool = SignTool::new(
            vec!["/nonexistent/signtool-binary".to_string()],
            temp.path(),
            None,
        );

        let err = tool
            .sign(&SignInvocation {
                input: &p.input,
                output: &p.output,
                cert: &p.cert,
                token: &p.token,
                nonce: &p.nonce,
                formats: &[],
                servers: &[],
            })
            .await
            .unwrap_err();
        assert!(matches!(err, SigningError::SignToolSpawn { .. }));
    }
}
