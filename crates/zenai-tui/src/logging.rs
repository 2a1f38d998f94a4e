use std::path::PathBuf;
use anyhow::{Context, Result};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

const DEFAULT_LEVEL: &str = "info";

pub fn log_dir() -> Result<PathBuf> {
    dirs::data_local_dir()
        .map(|dir| dir.join("zenai").join("logs"))
        .context("Could not determine local data directory")
}

/// Sends logs to a file, since the terminal belongs to the UI. Keep the guard alive until exit.
pub fn init() -> Result<WorkerGuard> {
    let dir = log_dir()?;
    std::fs::create_dir_all(&dir)
        .with_context(|| format!("Failed to create log directory {}", dir.display()))?;

    let appender = tracing_appender::rolling::never(&dir, "zenai.log");
    let (writer, guard) = tracing_appender::non_blocking(appender);

    // Fall back to the default level if ZENAI_LOG is unset or invalid
    let filter = EnvFilter::try_from_env("ZENAI_LOG")
        .or_else(|_| EnvFilter::try_new(DEFAULT_LEVEL))
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LEVEL));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_ansi(false)
        .try_init();

    Ok(guard)
}
