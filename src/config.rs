//! Runtime configuration read from `TABGUARD_*` environment variables.

use std::path::PathBuf;
use std::time::Duration;

use crate::managers::lock_manager::DEFAULT_CLEANUP_INTERVAL;
use crate::platform;
use crate::types::errors::ConfigError;

pub const ENV_DATA_DIR: &str = "TABGUARD_DATA_DIR";
pub const ENV_EXTENSION_ID: &str = "TABGUARD_EXTENSION_ID";
pub const ENV_CLEANUP_INTERVAL_SECS: &str = "TABGUARD_CLEANUP_INTERVAL_SECS";
pub const ENV_SETTINGS_CACHE_MS: &str = "TABGUARD_SETTINGS_CACHE_MS";

pub const DEFAULT_EXTENSION_ID: &str = "tabguard";
pub const DATABASE_FILE: &str = "tabguard.db";

#[derive(Debug, Clone, PartialEq)]
pub struct AppConfig {
    pub data_dir: PathBuf,
    /// Runtime id that inbound senders must present.
    pub extension_id: String,
    pub cleanup_interval: Duration,
    pub settings_cache_ttl: Duration,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            data_dir: platform::get_data_dir(),
            extension_id: DEFAULT_EXTENSION_ID.to_string(),
            cleanup_interval: DEFAULT_CLEANUP_INTERVAL,
            settings_cache_ttl: Duration::from_millis(5000),
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Builds a config from an arbitrary variable lookup. Blank values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| {
            lookup(name)
                .map(|v| v.trim().to_owned())
                .filter(|v| !v.is_empty())
        };
        let mut config = Self::default();

        if let Some(dir) = get(ENV_DATA_DIR) {
            config.data_dir = PathBuf::from(dir);
        }
        if let Some(id) = get(ENV_EXTENSION_ID) {
            config.extension_id = id;
        }
        if let Some(raw) = get(ENV_CLEANUP_INTERVAL_SECS) {
            let secs = parse_positive(ENV_CLEANUP_INTERVAL_SECS, &raw)?;
            config.cleanup_interval = Duration::from_secs(secs);
        }
        if let Some(raw) = get(ENV_SETTINGS_CACHE_MS) {
            let ms: u64 = raw.parse().map_err(|_| invalid(ENV_SETTINGS_CACHE_MS, &raw))?;
            config.settings_cache_ttl = Duration::from_millis(ms);
        }
        Ok(config)
    }

    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join(DATABASE_FILE)
    }
}

fn parse_positive(name: &str, raw: &str) -> Result<u64, ConfigError> {
    match raw.parse::<u64>() {
        Ok(v) if v > 0 => Ok(v),
        _ => Err(invalid(name, raw)),
    }
}

fn invalid(name: &str, value: &str) -> ConfigError {
    ConfigError::InvalidValue {
        name: name.to_string(),
        value: value.to_string(),
    }
}
