//! Tracing setup for the binary.
//!
//! Events go to stderr, and additionally to a plain-text log file when one is
//! configured. `RUST_LOG` takes precedence over the configured level.

use std::path::Path;
use thiserror::Error;
use tracing::debug;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, fmt};

#[derive(Debug, Error)]
pub enum LoggingError {
    #[error("invalid log level '{level}': {reason}")]
    InvalidLevel { level: String, reason: String },
    #[error("cannot open log file {path}: {reason}")]
    LogFile { path: String, reason: String },
    #[error("logging is already initialized")]
    AlreadyInitialized,
}

/// Installs the global subscriber.
///
/// The returned guard flushes the file writer on drop, so keep it alive for
/// the lifetime of the program.
pub fn init_logging(
    level: &str,
    log_file: Option<&Path>,
) -> Result<Option<WorkerGuard>, LoggingError> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(level).map_err(|e| LoggingError::InvalidLevel {
            level: level.to_string(),
            reason: e.to_string(),
        })?,
    };

    let stderr_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .without_time()
        .compact();

    let (file_layer, guard) = match log_file {
        Some(path) => {
            let (writer, guard) = tracing_appender::non_blocking(open_log_file(path)?);
            let layer = fmt::layer().with_writer(writer).with_ansi(false);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(stderr_layer)
        .with(file_layer)
        .try_init()
        .map_err(|_| LoggingError::AlreadyInitialized)?;

    debug!(level, log_file = ?log_file, "Logging initialized");
    Ok(guard)
}

fn open_log_file(path: &Path) -> Result<RollingFileAppender, LoggingError> {
    let log_file_error = |reason: String| LoggingError::LogFile {
        path: path.display().to_string(),
        reason,
    };

    let file_name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .ok_or_else(|| log_file_error("path has no file name".to_string()))?;
    let directory = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };

    RollingFileAppender::builder()
        .rotation(Rotation::NEVER)
        .filename_prefix(file_name)
        .build(directory)
        .map_err(|e| log_file_error(e.to_string()))
}
