//! Configuration loading and management
//!
//! Configuration is loaded from `~/.config/appstats/config.toml`
//!
//! This module follows the XDG Base Directory Specification:
//! - Config: `$XDG_CONFIG_HOME/appstats/` (~/.config/appstats/)
//! - Data: `$XDG_DATA_HOME/appstats/` (~/.local/share/appstats/)
//! - State/Logs: `$XDG_STATE_HOME/appstats/` (~/.local/state/appstats/)

use crate::error::{Error, Result};
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// Returns a best-effort home directory path.
fn home_dir() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Returns XDG_CONFIG_HOME or ~/.config
fn xdg_config_home() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".config"))
}

/// Returns XDG_DATA_HOME or ~/.local/share
fn xdg_data_home() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".local/share"))
}

/// Returns XDG_STATE_HOME or ~/.local/state
fn xdg_state_home() -> PathBuf {
    std::env::var("XDG_STATE_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".local/state"))
}

/// Main configuration struct
#[derive(Debug, Deserialize, Default, Clone)]
pub struct Config {
    /// Storage configuration
    #[serde(default)]
    pub storage: StorageConfig,

    /// Upload and identity-retry tuning
    #[serde(default)]
    pub collector: CollectorConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Storage configuration
#[derive(Debug, Deserialize, Default, Clone)]
pub struct StorageConfig {
    /// Override path for the SQLite database file
    pub database_path: Option<PathBuf>,
}

/// Upload coordinator and identity-resolution tuning
#[derive(Debug, Deserialize, Clone)]
pub struct CollectorConfig {
    /// Minimum seconds between non-forced uploads
    #[serde(default = "default_cooldown_secs")]
    pub cooldown_secs: u64,

    /// HTTP request timeout in seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Max identity-resolution retry attempts per process lifetime
    #[serde(default = "default_retry_max_attempts")]
    pub retry_max_attempts: u32,

    /// Fixed delay between identity-resolution retries, in seconds
    #[serde(default = "default_retry_delay_secs")]
    pub retry_delay_secs: u64,

    /// Shared secret prefix for the sign/ts request headers
    #[serde(default = "default_sign_secret")]
    pub sign_secret: String,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            cooldown_secs: default_cooldown_secs(),
            timeout_secs: default_timeout_secs(),
            retry_max_attempts: default_retry_max_attempts(),
            retry_delay_secs: default_retry_delay_secs(),
            sign_secret: default_sign_secret(),
        }
    }
}

impl CollectorConfig {
    /// Upload cooldown as a [`Duration`]
    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.cooldown_secs)
    }

    /// Retry delay as a [`Duration`]
    pub fn retry_delay(&self) -> Duration {
        Duration::from_secs(self.retry_delay_secs)
    }

    /// Validate configuration, returning error message if invalid
    pub fn validate(&self) -> Result<()> {
        if self.timeout_secs == 0 {
            return Err(Error::Config(
                "collector.timeout_secs must be greater than 0".to_string(),
            ));
        }
        if self.sign_secret.is_empty() {
            return Err(Error::Config(
                "collector.sign_secret must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

fn default_cooldown_secs() -> u64 {
    30 * 60
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_retry_max_attempts() -> u32 {
    10
}

fn default_retry_delay_secs() -> u64 {
    5
}

fn default_sign_secret() -> String {
    // Matches the shared-secret scheme the reference collector expects.
    "Meilbn_AppStats_".to_string()
}

/// Logging configuration
#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Maximum number of log files to keep
    #[serde(default = "default_max_log_files")]
    pub max_files: usize,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            max_files: default_max_log_files(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_max_log_files() -> usize {
    5
}

impl Config {
    /// Load configuration from the default path
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path();

        if !config_path.exists() {
            tracing::info!("No config file found at {:?}, using defaults", config_path);
            return Ok(Config::default());
        }

        Self::load_from(&config_path)
    }

    /// Load configuration from a specific path
    pub fn load_from(path: &PathBuf) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("failed to read config file {:?}: {}", path, e)))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| Error::Config(format!("failed to parse config: {}", e)))?;

        config.collector.validate()?;

        Ok(config)
    }

    /// Returns the default config file path
    ///
    /// `$XDG_CONFIG_HOME/appstats/config.toml` (~/.config/appstats/config.toml)
    pub fn config_path() -> PathBuf {
        xdg_config_home().join("appstats").join("config.toml")
    }

    /// Returns the data directory path (for the SQLite database)
    ///
    /// `$XDG_DATA_HOME/appstats/` (~/.local/share/appstats/)
    pub fn data_dir() -> PathBuf {
        xdg_data_home().join("appstats")
    }

    /// Returns the state directory path (for logs)
    ///
    /// `$XDG_STATE_HOME/appstats/` (~/.local/state/appstats/)
    pub fn state_dir() -> PathBuf {
        xdg_state_home().join("appstats")
    }

    /// Returns the database file path, honoring the storage override
    ///
    /// Defaults to `$XDG_DATA_HOME/appstats/stats.db`
    pub fn database_path(&self) -> PathBuf {
        self.storage
            .database_path
            .clone()
            .unwrap_or_else(|| Self::data_dir().join("stats.db"))
    }

    /// Returns the log file path
    ///
    /// `$XDG_STATE_HOME/appstats/appstats.log`
    pub fn log_path() -> PathBuf {
        Self::state_dir().join("appstats.log")
    }
}
