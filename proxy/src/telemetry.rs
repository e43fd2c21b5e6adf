use anyhow::{Context, Result};
use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{filter, fmt, prelude::*, EnvFilter};

pub(crate) const ACCESS_TARGET: &str = "access";

/// Installs the process-wide subscriber: a stdout layer filtered by
/// `LOG_LEVEL`, plus an optional non-blocking access-log file layer so the
/// hot path never touches the filesystem.
pub(crate) fn init(log_level: &str, access_log_file: Option<&Path>) -> Result<Option<WorkerGuard>> {
    let env_filter = EnvFilter::try_new(log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    let stdout = fmt::layer().with_filter(env_filter);
    let registry = tracing_subscriber::registry().with(stdout);

    match access_log_file {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("failed to open access log {}", path.display()))?;
            let (writer, guard) = tracing_appender::non_blocking(file);
            let access = fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_target(false)
                .with_filter(filter::filter_fn(|meta| meta.target() == ACCESS_TARGET));
            registry.with(access).init();
            Ok(Some(guard))
        }
        None => {
            registry.init();
            Ok(None)
        }
    }
}
