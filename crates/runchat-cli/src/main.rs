#![forbid(unsafe_code)]
#![cfg_attr(docsrs, feature(doc_cfg))]
#![doc = include_str!("../README.md")]

mod commands;
mod config;
mod sink;

use std::process;

use clap::Parser;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use crate::config::{Cli, log_config};

// Tracing target constants
pub const TRACING_TARGET_STARTUP: &str = "runchat_cli::startup";
pub const TRACING_TARGET_SHUTDOWN: &str = "runchat_cli::shutdown";
pub const TRACING_TARGET_CONFIG: &str = "runchat_cli::config";
pub const TRACING_TARGET_COMMAND: &str = "runchat_cli::command";

#[tokio::main]
async fn main() {
    let Err(error) = run().await else {
        process::exit(0);
    };

    if tracing::enabled!(tracing::Level::ERROR) {
        tracing::error!(
            target: TRACING_TARGET_SHUTDOWN,
            error = %format!("{error:#}"),
            "command failed"
        );
    } else {
        eprintln!("Error: {error:#}");
    }

    process::exit(1);
}

/// Main application entry point.
async fn run() -> anyhow::Result<()> {
    #[cfg(feature = "dotenv")]
    let dotenv = dotenvy::dotenv();

    let cli = Cli::parse();

    init_tracing();
    log_startup_info();

    #[cfg(feature = "dotenv")]
    match dotenv {
        Ok(path) => tracing::debug!(
            target: TRACING_TARGET_CONFIG,
            path = %path.display(),
            "loaded environment file"
        ),
        Err(error) if error.not_found() => {}
        Err(error) => tracing::warn!(
            target: TRACING_TARGET_CONFIG,
            error = %error,
            "failed to load environment file"
        ),
    }

    log_config(&cli);

    let context = cli.context()?;
    cli.command.execute(&context).await
}

/// Initializes tracing with environment-based filtering.
///
/// Logs go to stderr so command output on stdout stays pipeable.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

/// Logs startup information.
fn log_startup_info() {
    tracing::debug!(
        target: TRACING_TARGET_STARTUP,
        version = env!("CARGO_PKG_VERSION"),
        pid = process::id(),
        arch = std::env::consts::ARCH,
        os = std::env::consts::OS,
        features = ?enabled_features(),
        "starting runchat"
    );
}

/// Returns a list of enabled compile-time features.
fn enabled_features() -> Vec<&'static str> {
    [cfg!(feature = "dotenv").then_some("dotenv")]
        .into_iter()
        .flatten()
        .collect()
}
