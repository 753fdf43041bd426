//! File-backed tracing setup. The terminal belongs to the UI, so nothing is
//! written to stdout or stderr.

use crate::config;
use anyhow::{Context, Result};
use std::env;
use std::path::{Path, PathBuf};
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

const LOG_DIR: &str = "logs";
const LOG_FILE_PREFIX: &str = "soundstage.log";
const LOG_ENV: &str = "SOUNDSTAGE_LOG";
const DEFAULT_FILTER: &str = "soundstage=info,warn";

/// Filter directives from `SOUNDSTAGE_LOG`, then `RUST_LOG`, then the default.
pub fn filter_directives() -> String {
    env::var(LOG_ENV)
        .or_else(|_| env::var("RUST_LOG"))
        .ok()
        .filter(|value| !value.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_FILTER.to_string())
}

/// Daily-rotated writer under `dir`. Lines are flushed on a worker thread
/// until the guard drops.
pub fn file_writer(dir: &Path) -> Result<(NonBlocking, WorkerGuard)> {
    let appender = RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix(LOG_FILE_PREFIX)
        .build(dir)
        .with_context(|| format!("failed to open log directory {}", dir.display()))?;
    Ok(tracing_appender::non_blocking(appender))
}

/// Installs the global subscriber. Keep the returned guard alive for the
/// whole session or buffered lines are lost.
pub fn init() -> Result<(PathBuf, WorkerGuard)> {
    let dir = config::ensure_config_dir()?.join(LOG_DIR);
    std::fs::create_dir_all(&dir)
        .with_context(|| format!("failed to create {}", dir.display()))?;
    let (writer, guard) = file_writer(&dir)?;

    let filter = EnvFilter::try_new(filter_directives())
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    let fmt_layer = fmt::layer()
        .with_writer(writer)
        .with_ansi(false)
        .with_target(true);

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .try_init()
        .context("failed to install tracing subscriber")?;

    tracing::info!(dir = %dir.display(), "logging initialized");
    Ok((dir, guard))
}
