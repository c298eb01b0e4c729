//! Error types for stallwatch-core

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::handle::WorkerId;

/// Result type alias using the library's Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for stallwatch-core
#[derive(Error, Debug)]
pub enum Error {
    /// Handle registration errors
    #[error("Registration error: {0}")]
    Registration(#[from] RegistrationError),

    /// Configuration errors
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    /// `start()` was called while the monitor thread is already running
    #[error("supervisor is already running")]
    AlreadyRunning,

    /// The monitor thread could not be spawned
    #[error("failed to spawn supervisor thread: {0}")]
    Spawn(#[source] std::io::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Registry membership errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistrationError {
    /// A live handle is already registered under this identity
    #[error("duplicate registration for {id}")]
    Duplicate { id: WorkerId },
}

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Thresholds are zero or not strictly increasing
    #[error(
        "thresholds must be positive and strictly increasing: miss={miss:?} mega_miss={mega_miss:?} kill={kill:?}"
    )]
    InvalidThresholds {
        miss: Duration,
        mega_miss: Duration,
        kill: Duration,
    },

    /// The systemic threshold is below the miss threshold
    #[error("multikill threshold {multikill:?} must be at least the miss threshold {miss:?}")]
    InvalidMultikillThreshold { multikill: Duration, miss: Duration },

    /// Multikill needs at least one stalled worker to mean anything
    #[error("multikill count must be at least 1")]
    InvalidMultikillCount,

    /// The scan cadence must be positive
    #[error("loop interval must be positive")]
    InvalidLoopInterval,

    /// Armed handles need a positive touch cadence
    #[error("touch interval must be positive to arm a timer")]
    InvalidTouchInterval,

    /// No event loop is available to host the touch timer
    #[error("no event loop available to arm the touch timer")]
    MissingEventLoop,

    /// Config file could not be read
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Config file is not valid TOML for this schema
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Failure reported by a stall response.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ActionError {
    #[error("action failed: {0}")]
    Failed(String),
}

impl ActionError {
    pub fn failed(reason: impl Into<String>) -> Self {
        Self::Failed(reason.into())
    }
}
