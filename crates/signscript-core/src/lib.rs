//! # signscript-core
//!
//! Core of the signing-task worker.
//!
//! Given a task that names a signing manifest, the worker downloads every
//! artifact listed in the manifest, verifies its SHA-512 digest, obtains a
//! short-lived token from a signing server that supports the requested
//! certificate type and formats, runs the external `signtool` against the
//! artifact and rewrites the manifest with the post-sign integrity data.
//!
//! ## Pipeline
//!
//! ```text
//! task.json --verify--> SigningRequest + manifest URL
//!   -> Manifest::load (retried GET)
//!   -> per entry, concurrently (aggregate::raise_future_errors):
//!        fetch::fetch_and_verify   (streamed, SHA-512 checked)
//!        token::acquire_token      (shuffled servers, failover)
//!        signtool::SignTool::sign  (external process)
//!        formats::detached_signatures
//!        entry.record_signed(...)
//!   -> manifest.json (sorted keys, written atomically)
//! ```
//!
//! ## Shared state
//!
//! Everything a task needs lives in an explicit [`Context`]: the parsed
//! [`WorkerConfig`], the HTTP client and the signing-server pool. The pool is
//! read-only. Files that a single invocation owns (token, nonce) are created
//! with unique names so concurrent entries never share them.
//!
//! The credential refresh loop in [`credentials`] runs as its own task and is
//! only observed through a `watch` receiver.

pub mod aggregate;
pub mod config;
pub mod context;
pub mod credentials;
pub mod error;
pub mod fetch;
pub mod formats;
pub mod fs;
pub mod hash;
pub mod manifest;
pub mod retry;
pub mod server;
pub mod signtool;
pub mod task;
pub mod token;
pub mod worker;

pub use aggregate::raise_future_errors;
pub use config::{ConfigError, WorkerConfig};
pub use context::Context;
pub use error::SigningError;
pub use formats::{DetachedSignatureFormat, detached_signatures};
pub use manifest::{Manifest, ManifestEntry};
pub use retry::RetryPolicy;
pub use server::{SigningRequest, SigningServer, SigningServerPool};
pub use task::{SigningTask, verify_task};
pub use token::{Token, acquire_token};
pub use worker::{SigningOutcome, sign_manifest};
