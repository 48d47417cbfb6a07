//! Configuration management for the election engine
//!
//! Loads settings from environment variables (and a `.env` file if present)
//! with validation.

use crate::{Error, Result, validation_error};
use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Upper bound for any configured window length (hours), roughly a century
pub const MAX_WINDOW_HOURS: i64 = 24 * 366 * 100;

/// Engine behaviour and storage settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Directory for file-backed journals; in-memory journals when unset
    pub data_dir: Option<PathBuf>,

    /// Voting window used when an admin starts an election without one (hours)
    pub default_duration_hours: i64,

    /// Largest single extension an admin may apply (hours)
    pub max_extension_hours: i64,

    /// How often the background sweeper stops expired elections (seconds)
    pub sweep_interval_seconds: u64,

    /// Default `auto_close` flag for newly created elections
    pub auto_close: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            data_dir: None,
            default_duration_hours: 24,
            max_extension_hours: 72,
            sweep_interval_seconds: 60,
            auto_close: true,
        }
    }
}

impl EngineConfig {
    /// Load engine configuration from environment variables
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok(); // Load .env file if present

        let defaults = Self::default();

        let data_dir = std::env::var("BALLOTBOX_DATA_DIR")
            .ok()
            .filter(|s| !s.trim().is_empty())
            .map(PathBuf::from);

        let default_duration_hours = env_or("BALLOTBOX_DEFAULT_DURATION_HOURS", defaults.default_duration_hours)?;
        let max_extension_hours = env_or("BALLOTBOX_MAX_EXTENSION_HOURS", defaults.max_extension_hours)?;
        let sweep_interval_seconds = env_or("BALLOTBOX_SWEEP_INTERVAL_SECONDS", defaults.sweep_interval_seconds)?;
        let auto_close = env_or("BALLOTBOX_AUTO_CLOSE", defaults.auto_close)?;

        let config = Self {
            data_dir,
            default_duration_hours,
            max_extension_hours,
            sweep_interval_seconds,
            auto_close,
        };
        config.validate()?;
        Ok(config)
    }

    /// Create configuration for testing
    pub fn for_testing() -> Self {
        Self {
            data_dir: None,
            sweep_interval_seconds: 1,
            ..Self::default()
        }
    }

    /// Validate configuration parameters
    pub fn validate(&self) -> Result<()> {
        if !(1..=MAX_WINDOW_HOURS).contains(&self.default_duration_hours) {
            return Err(validation_error!(
                "default_duration_hours must be between 1 and {}",
                MAX_WINDOW_HOURS
            ));
        }
        if !(1..=MAX_WINDOW_HOURS).contains(&self.max_extension_hours) {
            return Err(validation_error!(
                "max_extension_hours must be between 1 and {}",
                MAX_WINDOW_HOURS
            ));
        }
        if self.sweep_interval_seconds == 0 {
            return Err(validation_error!("sweep_interval_seconds must be positive"));
        }
        Ok(())
    }

    pub fn default_duration(&self) -> Duration {
        Duration::hours(self.default_duration_hours.clamp(1, MAX_WINDOW_HOURS))
    }

    pub fn max_extension(&self) -> Duration {
        Duration::hours(self.max_extension_hours.clamp(1, MAX_WINDOW_HOURS))
    }

    pub fn sweep_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.sweep_interval_seconds)
    }
}

fn env_or<T: std::str::FromStr>(name: &str, default: T) -> Result<T> {
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|_| Error::validation(format!("Invalid {name}"))),
        Err(_) => Ok(default),
    }
}

/// Application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub engine: EngineConfig,
    pub logging: LoggingConfig,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String,
}

impl Config {
    /// Load configuration from environment
    pub fn from_env() -> Result<Self> {
        let engine = EngineConfig::from_env()?;

        let logging = LoggingConfig {
            level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            format: std::env::var("LOG_FORMAT").unwrap_or_else(|_| "json".to_string()),
        };

        Ok(Self { engine, logging })
    }

    /// Create configuration for testing
    pub fn for_testing() -> Self {
        let logging = LoggingConfig {
            level: "debug".to_string(),
            format: "pretty".to_string(),
        };

        Self {
            engine: EngineConfig::for_testing(),
            logging,
        }
    }
}
