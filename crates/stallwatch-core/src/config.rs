//! Configuration management for stallwatch
//!
//! Handles loading and validation of `stallwatch.toml` files.
//!
//! ```toml
//! [supervisor]
//! miss_ms = 200
//! mega_miss_ms = 1000
//! kill_ms = 10000
//! multikill_count = 2
//!
//! [logging]
//! level = "info"
//! format = "json"
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::logging::LogConfig;
use crate::supervisor::SupervisorConfig;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct StallwatchConfig {
    /// Supervisor thresholds and cadence
    #[serde(default)]
    pub supervisor: SupervisorSection,

    /// Logging settings
    #[serde(default)]
    pub logging: LogConfig,
}

/// `[supervisor]` section. All durations are milliseconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SupervisorSection {
    /// Stale for this long: miss
    #[serde(default = "default_miss_ms")]
    pub miss_ms: u64,

    /// Stale for this long: mega-miss
    #[serde(default = "default_mega_miss_ms")]
    pub mega_miss_ms: u64,

    /// Stale for this long: kill
    #[serde(default = "default_kill_ms")]
    pub kill_ms: u64,

    /// Staleness counted toward multikill (defaults to `mega_miss_ms`)
    #[serde(default)]
    pub multikill_ms: Option<u64>,

    /// Number of simultaneously stalled workers that triggers multikill
    #[serde(default = "default_multikill_count")]
    pub multikill_count: usize,

    /// Scan cadence (defaults to the smallest threshold)
    #[serde(default)]
    pub loop_interval_ms: Option<u64>,

    /// Cadence for timer-driven touches
    #[serde(default = "default_touch_interval_ms")]
    pub touch_interval_ms: u64,
}

impl Default for SupervisorSection {
    fn default() -> Self {
        Self {
            miss_ms: default_miss_ms(),
            mega_miss_ms: default_mega_miss_ms(),
            kill_ms: default_kill_ms(),
            multikill_ms: None,
            multikill_count: default_multikill_count(),
            loop_interval_ms: None,
            touch_interval_ms: default_touch_interval_ms(),
        }
    }
}

fn default_miss_ms() -> u64 {
    200
}

fn default_mega_miss_ms() -> u64 {
    1_000
}

fn default_kill_ms() -> u64 {
    10_000
}

fn default_multikill_count() -> usize {
    2
}

fn default_touch_interval_ms() -> u64 {
    50
}

impl SupervisorSection {
    /// Convert to a validated [`SupervisorConfig`].
    pub fn to_supervisor_config(&self) -> Result<SupervisorConfig, ConfigError> {
        let config = SupervisorConfig {
            miss_after: Duration::from_millis(self.miss_ms),
            mega_miss_after: Duration::from_millis(self.mega_miss_ms),
            kill_after: Duration::from_millis(self.kill_ms),
            multikill_after: self.multikill_ms.map(Duration::from_millis),
            multikill_count: self.multikill_count,
            loop_interval: Duration::from_millis(self.loop_interval_ms.unwrap_or(self.miss_ms)),
        };
        config.validate()?;
        Ok(config)
    }

    #[must_use]
    pub fn touch_interval(&self) -> Duration {
        Duration::from_millis(self.touch_interval_ms)
    }
}

impl StallwatchConfig {
    /// Load configuration from a specific path
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    /// Parse configuration from TOML text
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    /// Validated supervisor settings
    pub fn supervisor_config(&self) -> Result<SupervisorConfig, ConfigError> {
        self.supervisor.to_supervisor_config()
    }
}

/// Log output format
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable output for interactive use
    #[default]
    Pretty,
    /// JSON lines for machines
    Json,
}

impl std::fmt::Display for LogFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pretty => write!(f, "pretty"),
            Self::Json => write!(f, "json"),
        }
    }
}

impl std::str::FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            _ => Err(format!("unknown log format: {s}. Expected one of: pretty, json")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn default_config_is_valid() {
        let config = StallwatchConfig::default();
        let sup = config.supervisor_config().unwrap();
        assert_eq!(sup.miss_after, Duration::from_millis(200));
        assert_eq!(sup.loop_interval, Duration::from_millis(200));
        assert_eq!(config.supervisor.touch_interval(), Duration::from_millis(50));
        assert_eq!(config.logging.format, LogFormat::Pretty);
    }

    #[test]
    fn empty_file_uses_defaults() {
        let config = StallwatchConfig::from_toml_str("").unwrap();
        assert_eq!(config.supervisor.kill_ms, 10_000);
        assert_eq!(config.supervisor.multikill_count, 2);
    }

    #[test]
    fn parses_full_file() {
        let config = StallwatchConfig::from_toml_str(
            r#"
            [supervisor]
            miss_ms = 1000
            mega_miss_ms = 3000
            kill_ms = 5000
            multikill_ms = 4000
            multikill_count = 3
            loop_interval_ms = 500
            touch_interval_ms = 100

            [logging]
            level = "debug"
            format = "json"
            "#,
        )
        .unwrap();

        let sup = config.supervisor_config().unwrap();
        assert_eq!(sup.kill_after, Duration::from_secs(5));
        assert_eq!(sup.systemic_threshold(), Duration::from_secs(4));
        assert_eq!(sup.multikill_count, 3);
        assert_eq!(sup.loop_interval, Duration::from_millis(500));
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.logging.format, LogFormat::Json);
    }

    #[test]
    fn unordered_thresholds_are_rejected() {
        let config = StallwatchConfig::from_toml_str(
            "[supervisor]\nmiss_ms = 500\nmega_miss_ms = 400\nkill_ms = 900\n",
        )
        .unwrap();
        assert!(matches!(
            config.supervisor_config(),
            Err(ConfigError::InvalidThresholds { .. })
        ));
    }

    #[test]
    fn malformed_toml_is_a_parse_error() {
        let err = StallwatchConfig::from_toml_str("[supervisor\nmiss_ms = ").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn load_from_reads_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[supervisor]\nkill_ms = 20000").unwrap();
        let config = StallwatchConfig::load_from(file.path()).unwrap();
        assert_eq!(config.supervisor.kill_ms, 20_000);
    }

    #[test]
    fn load_from_missing_file() {
        let err = StallwatchConfig::load_from(Path::new("/nonexistent/stallwatch.toml"))
            .unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
        assert!(err.to_string().contains("/nonexistent/stallwatch.toml"));
    }

    #[test]
    fn log_format_parse_and_display() {
        assert_eq!("JSON".parse::<LogFormat>().unwrap(), LogFormat::Json);
        assert_eq!(LogFormat::Pretty.to_string(), "pretty");
        assert!("xml".parse::<LogFormat>().is_err());
    }
}
