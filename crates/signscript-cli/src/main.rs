//! signscript - signing-task worker
//!
//! Verifies a signing task, signs every artifact in its manifest with the
//! external signing tool and rewrites the manifest.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

mod commands;

/// signscript - signing-task worker
#[derive(Parser, Debug)]
#[command(name = "signscript")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to worker configuration file
    #[arg(short, long, default_value = "worker.toml")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Write logs to this file instead of stderr
    #[arg(long)]
    log_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run a signing task and print the outcome as JSON
    Sign {
        /// Path to the task document
        task: PathBuf,
    },

    /// Verify a task document without signing anything
    Verify {
        /// Path to the task document
        task: PathBuf,
    },

    /// List signing servers suitable for a cert type and formats
    Servers {
        /// Certificate type
        #[arg(long)]
        cert_type: String,

        /// Signing format (repeatable)
        #[arg(short, long = "format", required = true)]
        formats: Vec<String>,
    },
}

fn init_logging(cli: &Cli) -> Result<()> {
    let filter = EnvFilter::try_new(&cli.log_level).unwrap_or_else(|_| EnvFilter::new("info"));

    if let Some(log_file) = &cli.log_file {
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(log_file)
            .context("failed to open log file")?;

        tracing_subscriber::registry()
            .with(filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .with_writer(file)
                    .with_ansi(false),
            )
            .init();
    } else {
        // stdout carries command output
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli)?;

    match cli.command {
        Commands::Sign { task } => commands::sign::run(&cli.config, &task).await,
        Commands::Verify { task } => commands::verify::run(&task),
        Commands::Servers { cert_type, formats } => {
            commands::servers::run(&cli.config, &cert_type, &formats)
        },
    }
}
