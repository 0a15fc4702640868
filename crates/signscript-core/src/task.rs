//! Task verification.
//!
//! A task is accepted only if it passes the bundled JSON schema and its
//! scopes name exactly one certificate type and at least one format:
//!
//! ```text
//! project:releng:signing:cert:<cert_type>
//! project:releng:signing:format:<format>   (one or more)
//! ```
//!
//! Verification happens before any network or signing activity.

use std::sync::OnceLock;

use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use crate::error::SigningError;
use crate::server::SigningRequest;

/// Scope prefix naming the certificate type.
pub const CERT_SCOPE_PREFIX: &str = "project:releng:signing:cert:";

/// Scope prefix naming a signing format.
pub const FORMAT_SCOPE_PREFIX: &str = "project:releng:signing:format:";

const TASK_SCHEMA: &str = include_str!("../data/signing_task_schema.json");

/// Maximum number of schema errors reported in one rejection.
const MAX_REPORTED_ERRORS: usize = 8;

/// A verified signing task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SigningTask {
    /// URL of the signing manifest.
    pub manifest_url: String,
    /// Certificate type and formats derived from the scopes.
    pub request: SigningRequest,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct TaskDocument {
    scopes: Vec<String>,
    payload: TaskPayload,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct TaskPayload {
    signing_manifest: String,
}

fn task_validator() -> Result<&'static jsonschema::Validator, SigningError> {
    static VALIDATOR: OnceLock<Result<jsonschema::Validator, String>> = OnceLock::new();
    VALIDATOR
        .get_or_init(|| {
            let schema: Value = serde_json::from_str(TASK_SCHEMA).map_err(|e| e.to_string())?;
            jsonschema::options()
                .build(&schema)
                .map_err(|e| e.to_string())
        })
        .as_ref()
        .map_err(|message| SigningError::TaskVerification {
            reason: format!("task schema is invalid: {message}"),
        })
}

/// Validates `task` against the task JSON schema.
///
/// # Errors
///
/// Returns [`SigningError::TaskVerification`] listing the schema violations.
pub fn validate_task_schema(task: &Value) -> Result<(), SigningError> {
    let validator = task_validator()?;
    let errors: Vec<String> = validator
        .iter_errors(task)
        .take(MAX_REPORTED_ERRORS)
        .map(|e| e.to_string())
        .collect();
    if errors.is_empty() {
        Ok(())
    } else {
        Err(SigningError::TaskVerification {
            reason: errors.join("; "),
        })
    }
}

/// Extracts the single certificate type from `scopes`.
///
/// # Errors
///
/// Returns [`SigningError::TaskVerification`] unless exactly one cert scope
/// is present.
pub fn task_cert_type<S: AsRef<str>>(scopes: &[S]) -> Result<String, SigningError> {
    let certs: Vec<&str> = scopes
        .iter()
        .filter_map(|s| s.as_ref().strip_prefix(CERT_SCOPE_PREFIX))
        .collect();
    match certs.as_slice() {
        [cert] if !cert.is_empty() => Ok((*cert).to_string()),
        [_] => Err(SigningError::TaskVerification {
            reason: "certificate scope names an empty cert type".to_string(),
        }),
        [] => Err(SigningError::TaskVerification {
            reason: format!("no scope starts with {CERT_SCOPE_PREFIX}"),
        }),
        many => Err(SigningError::TaskVerification {
            reason: format!("expected one certificate scope, found {}", many.len()),
        }),
    }
}

/// Extracts signing formats from `scopes`, in scope order.
///
/// # Errors
///
/// Returns [`SigningError::TaskVerification`] if no format scope is present.
pub fn task_signing_formats<S: AsRef<str>>(scopes: &[S]) -> Result<Vec<String>, SigningError> {
    let formats: Vec<String> = scopes
        .iter()
        .filter_map(|s| s.as_ref().strip_prefix(FORMAT_SCOPE_PREFIX))
        .filter(|f| !f.is_empty())
        .map(str::to_string)
        .collect();
    if formats.is_empty() {
        return Err(SigningError::TaskVerification {
            reason: format!("no scope starts with {FORMAT_SCOPE_PREFIX}"),
        });
    }
    Ok(formats)
}

/// Verifies a task document and extracts what the worker needs from it.
///
/// # Errors
///
/// Returns [`SigningError::TaskVerification`] on any schema or scope
/// violation.
pub fn verify_task(task: &Value) -> Result<SigningTask, SigningError> {
    validate_task_schema(task)?;
    let document: TaskDocument =
        serde_json::from_value(task.clone()).map_err(|e| SigningError::TaskVerification {
            reason: e.to_string(),
        })?;

    let cert_type = task_cert_type(&document.scopes)?;
    let formats = task_signing_formats(&document.scopes)?;
    let request =
        SigningRequest::new(cert_type, formats).map_err(|e| SigningError::TaskVerification {
            reason: e.to_string(),
        })?;

    debug!(
        cert_type = request.cert_type(),
        formats = ?request.formats(),
        manifest = %document.payload.signing_manifest,
        "task verified"
    );

    Ok(SigningTask {
        manifest_url: document.payload.signing_manifest,
        request,
    })
}
