//! Structured logging for stallwatch
//!
//! Installs a global `tracing` subscriber with either pretty or JSON-lines
//! output on stderr and an optional append-only log file.
//!
//! ```ignore
//! use stallwatch_core::logging::{init_logging, LogConfig};
//!
//! init_logging(&LogConfig::default())?;
//! ```
//!
//! Stall events use these field names: `worker`, `kind`, `tier`,
//! `elapsed_ms`, `workers`, `count`.

pub use crate::config::LogFormat;
use serde::{Deserialize, Serialize};
use std::io;
use std::path::PathBuf;
use std::sync::OnceLock;
use tracing_subscriber::fmt::time::SystemTime;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, fmt};

static LOGGING_INITIALIZED: OnceLock<()> = OnceLock::new();

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Level filter (trace, debug, info, warn, error); `RUST_LOG` wins when set
    pub level: String,

    /// Output format
    pub format: LogFormat,

    /// Optional file that receives a copy of every log line
    pub file: Option<PathBuf>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
            file: None,
        }
    }
}

/// Error type for logging initialization
#[derive(Debug, thiserror::Error)]
pub enum LogError {
    #[error("logging already initialized")]
    AlreadyInitialized,

    #[error("invalid log filter {filter:?}: {reason}")]
    InvalidFilter { filter: String, reason: String },

    #[error("failed to open log file: {0}")]
    FileCreate(#[from] io::Error),

    #[error("failed to set global subscriber: {0}")]
    SetSubscriber(#[from] tracing::subscriber::SetGlobalDefaultError),
}

fn open_log_file(path: &std::path::Path) -> io::Result<std::fs::File> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    std::fs::OpenOptions::new().create(true).append(true).open(path)
}

fn build_filter(level: &str) -> Result<EnvFilter, LogError> {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return Ok(filter);
    }
    EnvFilter::try_new(level).map_err(|err| LogError::InvalidFilter {
        filter: level.to_string(),
        reason: err.to_string(),
    })
}

/// Initialize the global logging subscriber.
///
/// Call once at startup; later calls return [`LogError::AlreadyInitialized`].
pub fn init_logging(config: &LogConfig) -> Result<(), LogError> {
    if LOGGING_INITIALIZED.get().is_some() {
        return Err(LogError::AlreadyInitialized);
    }

    let filter = build_filter(&config.level)?;
    let file = config.file.as_deref().map(open_log_file).transpose()?;

    match config.format {
        LogFormat::Pretty => {
            let stderr_layer = fmt::layer()
                .with_writer(io::stderr)
                .with_target(true)
                .with_thread_names(true)
                .with_ansi(true);
            let file_layer = file.map(|file| {
                fmt::layer()
                    .with_writer(file)
                    .with_target(true)
                    .with_thread_names(true)
                    .with_ansi(false)
            });
            tracing::subscriber::set_global_default(
                tracing_subscriber::registry()
                    .with(filter)
                    .with(stderr_layer)
                    .with(file_layer),
            )?;
        }
        LogFormat::Json => {
            let stderr_layer = fmt::layer()
                .json()
                .with_timer(SystemTime)
                .with_writer(io::stderr)
                .with_target(true)
                .with_thread_names(true)
                .flatten_event(true);
            let file_layer = file.map(|file| {
                fmt::layer()
                    .json()
                    .with_timer(SystemTime)
                    .with_writer(file)
                    .with_target(true)
                    .with_thread_names(true)
                    .flatten_event(true)
            });
            tracing::subscriber::set_global_default(
                tracing_subscriber::registry()
                    .with(filter)
                    .with(stderr_layer)
                    .with(file_layer),
            )?;
        }
    }

    let _ = LOGGING_INITIALIZED.set(());

    tracing::info!(
        log_level = %config.level,
        log_format = %config.format,
        log_file = ?config.file,
        "Logging initialized"
    );

    Ok(())
}

/// Check if logging has been initialized
pub fn is_logging_initialized() -> bool {
    LOGGING_INITIALIZED.get().is_some()
}
