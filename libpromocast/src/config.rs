//! Configuration management for Promocast

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{ConfigError, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub database: DatabaseConfig,
    #[serde(default)]
    pub dispatch: DispatchConfig,
    #[serde(default)]
    pub monitor: MonitorConfig,
    /// Platform adapters keyed by platform name as used in campaigns
    #[serde(default)]
    pub platforms: HashMap<String, PlatformConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchConfig {
    /// Seconds between due-scans in the daemon
    #[serde(default = "default_poll_interval")]
    pub poll_interval: u64,
    /// Bound on a single provider call, e.g. "30s"
    #[serde(default = "default_attempt_timeout")]
    pub attempt_timeout: String,
    /// Tokens expiring within this many seconds are treated as unusable
    #[serde(default = "default_expiry_skew")]
    pub expiry_skew: i64,
    /// Claims older than this many seconds are returned to the queue
    #[serde(default = "default_stale_claim_after")]
    pub stale_claim_after: i64,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            poll_interval: default_poll_interval(),
            attempt_timeout: default_attempt_timeout(),
            expiry_skew: default_expiry_skew(),
            stale_claim_after: default_stale_claim_after(),
        }
    }
}

impl DispatchConfig {
    pub fn attempt_timeout(&self) -> Result<Duration> {
        humantime::parse_duration(&self.attempt_timeout).map_err(|e| {
            ConfigError::InvalidValue {
                field: "dispatch.attempt_timeout".to_string(),
                reason: e.to_string(),
            }
            .into()
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorConfig {
    /// Maximum staleness of monitor snapshots, in seconds
    #[serde(default = "default_refresh_interval")]
    pub refresh_interval: u64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            refresh_interval: default_refresh_interval(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum PlatformConfig {
    /// Mastodon-compatible instance
    Mastodon {
        instance: String,
        #[serde(default)]
        rate_limit_endpoint: Option<String>,
    },
    /// Generic JSON-over-HTTP publish endpoint
    Webhook {
        endpoint: String,
        #[serde(default)]
        rate_limit_endpoint: Option<String>,
    },
}

fn default_poll_interval() -> u64 {
    60
}

fn default_attempt_timeout() -> String {
    "30s".to_string()
}

fn default_expiry_skew() -> i64 {
    60
}

fn default_stale_claim_after() -> i64 {
    900
}

fn default_refresh_interval() -> u64 {
    5
}

impl Config {
    /// Load configuration from the default location
    pub fn load() -> Result<Self> {
        let config_path = resolve_config_path()?;
        let mut config = Self::load_from_path(&config_path)?;

        if let Ok(db_path) = std::env::var("PROMOCAST_DB_PATH") {
            config.database.path = db_path;
        }

        Ok(config)
    }

    /// Load configuration from a specific path
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(ConfigError::ReadError)?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content).map_err(ConfigError::ParseError)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.database.path.trim().is_empty() {
            return Err(ConfigError::MissingField("database.path".to_string()).into());
        }
        if self.dispatch.poll_interval == 0 {
            return Err(ConfigError::InvalidValue {
                field: "dispatch.poll_interval".to_string(),
                reason: "must be at least 1 second".to_string(),
            }
            .into());
        }
        self.dispatch.attempt_timeout()?;
        Ok(())
    }

    /// Create a default configuration
    pub fn default_config() -> Self {
        Self {
            database: DatabaseConfig {
                path: "~/.local/share/promocast/promocast.db".to_string(),
            },
            dispatch: DispatchConfig::default(),
            monitor: MonitorConfig::default(),
            platforms: HashMap::new(),
        }
    }
}

/// Resolve the configuration file path following XDG Base Directory spec
pub fn resolve_config_path() -> Result<PathBuf> {
    if let Ok(path) = std::env::var("PROMOCAST_CONFIG") {
        return Ok(PathBuf::from(shellexpand::tilde(&path).to_string()));
    }

    let config_dir = dirs::config_dir()
        .ok_or_else(|| ConfigError::MissingField("config directory".to_string()))?;

    Ok(config_dir.join("promocast").join("config.toml"))
}
