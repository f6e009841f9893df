//! Operator defaults for rgpurge
//!
//! Defaults live in a small YAML file. Every field is optional; command-line
//! flags and environment variables override whatever the file says.
//!
//! ```yaml
//! subscription: 00000000-0000-0000-0000-000000000000
//! wait: true
//! timeout_secs: 3600
//! poll_interval_secs: 20
//! retry:
//!   max_attempts: 6
//!   initial_delay_ms: 1000
//! ```

pub mod error;

pub use error::*;

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable naming a config file directly
pub const CONFIG_ENV: &str = "RGPURGE_CONFIG";

const LOCAL_CANDIDATES: [&str; 2] = ["rgpurge.yaml", ".rgpurge.yaml"];

/// Backoff settings for control-plane calls
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RetrySettings {
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub multiplier: f64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay_ms: 2_000,
            max_delay_ms: 30_000,
            multiplier: 2.0,
        }
    }
}

impl RetrySettings {
    pub fn initial_delay(&self) -> Duration {
        Duration::from_millis(self.initial_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }
}

/// Contents of a defaults file
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RgpurgeConfig {
    /// Subscription passed to every `az` call
    pub subscription: Option<String>,
    pub timeout_secs: Option<u64>,
    pub poll_interval_secs: Option<u64>,
    /// Length of one scheduling unit for inter-pass and link waits
    pub time_unit_ms: Option<u64>,
    pub retry: RetrySettings,
    pub allow_raw_delete: Option<bool>,
    /// Poll until the resource group is gone
    pub wait: Option<bool>,

    #[serde(skip)]
    pub source: Option<PathBuf>,
}

impl RgpurgeConfig {
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }

    pub fn poll_interval(&self) -> Option<Duration> {
        self.poll_interval_secs.map(Duration::from_secs)
    }

    pub fn time_unit(&self) -> Option<Duration> {
        self.time_unit_ms.map(Duration::from_millis)
    }

    pub fn validate(&self) -> Result<()> {
        if self.poll_interval_secs == Some(0) {
            return Err(ConfigError::Invalid {
                field: "poll_interval_secs",
                message: "must be greater than zero".to_string(),
            });
        }
        if self.time_unit_ms == Some(0) {
            return Err(ConfigError::Invalid {
                field: "time_unit_ms",
                message: "must be greater than zero".to_string(),
            });
        }
        if self.retry.max_attempts == 0 {
            return Err(ConfigError::Invalid {
                field: "retry.max_attempts",
                message: "at least one attempt is required".to_string(),
            });
        }
        if self.retry.multiplier < 1.0 {
            return Err(ConfigError::Invalid {
                field: "retry.multiplier",
                message: format!("{} would shrink the delay", self.retry.multiplier),
            });
        }
        Ok(())
    }
}

/// `~/.config/rgpurge`
pub fn config_dir() -> Result<PathBuf> {
    dirs::config_dir()
        .map(|dir| dir.join("rgpurge"))
        .ok_or(ConfigError::ConfigDirNotFound)
}

/// Locate the defaults file.
///
/// Search order:
/// 1. `RGPURGE_CONFIG` (must exist when set)
/// 2. Current directory: `rgpurge.yaml`, `.rgpurge.yaml`
/// 3. `~/.config/rgpurge/config.yaml`
pub fn find_config_file() -> Result<Option<PathBuf>> {
    if let Ok(explicit) = std::env::var(CONFIG_ENV) {
        let path = PathBuf::from(explicit);
        if path.is_file() {
            return Ok(Some(path));
        }
        return Err(ConfigError::ExplicitFileMissing(path));
    }

    let current_dir = std::env::current_dir()?;
    for filename in LOCAL_CANDIDATES {
        let path = current_dir.join(filename);
        if path.is_file() {
            return Ok(Some(path));
        }
    }

    if let Ok(dir) = config_dir() {
        let global = dir.join("config.yaml");
        if global.is_file() {
            return Ok(Some(global));
        }
    }

    Ok(None)
}

pub fn load_from(path: &Path) -> Result<RgpurgeConfig> {
    let content = std::fs::read_to_string(path)?;
    let mut config = if content.trim().is_empty() {
        RgpurgeConfig::default()
    } else {
        serde_yaml::from_str::<RgpurgeConfig>(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?
    };
    config.validate()?;
    config.source = Some(path.to_path_buf());
    Ok(config)
}

/// Load the defaults file, or built-in defaults when there is none
pub fn load() -> Result<RgpurgeConfig> {
    match find_config_file()? {
        Some(path) => load_from(&path),
        None => Ok(RgpurgeConfig::default()),
    }
}
