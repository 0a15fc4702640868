//! Subcommand implementations.

pub mod servers;
pub mod sign;
pub mod verify;

use std::path::Path;

use anyhow::{Context, Result};
use serde::Serialize;
use signscript_core::WorkerConfig;
use signscript_core::fs::load_json;

/// Loads and validates the worker config.
pub fn load_config(path: &Path) -> Result<WorkerConfig> {
    WorkerConfig::from_file(path)
        .with_context(|| format!("failed to load config from {}", path.display()))
}

/// Reads a task document as raw JSON.
pub fn load_task(path: &Path) -> Result<serde_json::Value> {
    load_json(path).with_context(|| format!("failed to read task {}", path.display()))
}

/// Prints `value` as pretty JSON on stdout.
pub fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let text = serde_json::to_string_pretty(value).context("failed to encode output")?;
    println!("{text}");
    Ok(())
}
