//! `signscript verify`

use std::path::Path;

use anyhow::{Context, Result};
use serde::Serialize;
use signscript_core::verify_task;

use super::{load_task, print_json};

#[derive(Serialize)]
struct Verified<'a> {
    manifest_url: &'a str,
    cert_type: &'a str,
    formats: &'a [String],
}

pub fn run(task_path: &Path) -> Result<()> {
    let task = load_task(task_path)?;
    let verified = verify_task(&task).context("task rejected")?;
    print_json(&Verified {
        manifest_url: &verified.manifest_url,
        cert_type: verified.request.cert_type(),
        formats: verified.request.formats(),
    })
}
