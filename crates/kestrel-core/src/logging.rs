//! Tracing setup.
//!
//! Logs go to `${KESTREL_HOME}/logs/kestrel.log` (daily rolling) so stdout and
//! stderr stay reserved for the transcript. Verbosity comes from `KESTREL_LOG`
//! (`EnvFilter` syntax, default `info`).

use std::path::Path;

use anyhow::{Context, Result};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt;
use tracing_subscriber::prelude::*;

use crate::config::paths;

pub const LOG_ENV_VAR: &str = "KESTREL_LOG";
const LOG_FILE_PREFIX: &str = "kestrel.log";

/// Installs the global subscriber writing into the default logs directory.
///
/// The returned guard flushes buffered lines on drop; hold it for the life of
/// the process.
///
/// # Errors
/// Returns an error if the logs directory cannot be created or a global
/// subscriber is already installed.
pub fn init() -> Result<WorkerGuard> {
    init_in(&paths::logs_dir())
}

/// Installs the global subscriber writing into `dir`.
///
/// # Errors
/// Returns an error if `dir` cannot be created or a global subscriber is
/// already installed.
pub fn init_in(dir: &Path) -> Result<WorkerGuard> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create logs dir {}", dir.display()))?;

    let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
    let (writer, guard) = tracing_appender::non_blocking(appender);

    tracing_subscriber::registry()
        .with(env_filter())
        .with(fmt::layer().with_writer(writer).with_ansi(false))
        .try_init()
        .context("Failed to install tracing subscriber")?;

    Ok(guard)
}

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_env(LOG_ENV_VAR).unwrap_or_else(|_| EnvFilter::new("info"))
}
