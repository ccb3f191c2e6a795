use std::fs::OpenOptions;
use std::io;
use std::path::Path;
use std::sync::Mutex;

use anyhow::{Context, Result};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, fmt};

pub const DEFAULT_LOG_FILE: &str = "project-start.log";

// HTTP stack internals are only interesting when asked for through RUST_LOG.
const QUIET_DEPENDENCIES: &str = "hyper=info,hyper_util=info,reqwest=info,rustls=info";

fn stdout_directives(verbose: bool) -> String {
    let level = if verbose { "debug" } else { "info" };
    format!("{level},{QUIET_DEPENDENCIES}")
}

fn file_directives() -> String {
    format!("debug,{QUIET_DEPENDENCIES}")
}

/// Log to stdout (INFO, DEBUG when verbose) and append everything from DEBUG to `log_file`.
///
/// `RUST_LOG` replaces the stdout filter.
pub fn init_logging(verbose: bool, log_file: &Path) -> Result<()> {
    let stdout_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(stdout_directives(verbose)));
    let stdout_layer = fmt::layer()
        .with_writer(io::stdout)
        .with_target(true)
        .with_filter(stdout_filter);

    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_file)
        .with_context(|| format!("failed to open log file {}", log_file.display()))?;
    let file_layer = fmt::layer()
        .with_writer(Mutex::new(file))
        .with_ansi(false)
        .with_target(true)
        .with_filter(EnvFilter::new(file_directives()));

    tracing_subscriber::registry()
        .with(stdout_layer)
        .with(file_layer)
        .try_init()
        .context("failed to initialize logging")
}
