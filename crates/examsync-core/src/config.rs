//! Application configuration management.
//!
//! Holds the remote endpoint and the timing knobs of the sync layer.
//! Configuration is stored at `~/.config/examsync/config.json`; a missing
//! file or missing fields fall back to defaults.

use std::path::PathBuf;

use anyhow::Result;
use chrono::Duration;
use serde::{Deserialize, Serialize};

/// Application name used for config/storage directory paths
const APP_NAME: &str = "examsync";

/// Config file name
const CONFIG_FILE: &str = "config.json";

/// Environment variable overriding `api_base_url`.
pub const API_URL_ENV: &str = "EXAMSYNC_API_URL";

/// Largest snapshot worth caching. Anything bigger is served live only.
pub const DEFAULT_MAX_CACHE_PAYLOAD_BYTES: usize = 4 * 1024 * 1024;

fn default_sync_interval_secs() -> u64 {
    300
}

fn default_min_sync_interval_secs() -> u64 {
    300
}

fn default_foreground_refresh_secs() -> u64 {
    30
}

fn default_cache_ttl_hours() -> i64 {
    crate::cache::manager::DEFAULT_TTL_HOURS
}

fn default_max_cache_payload_bytes() -> usize {
    DEFAULT_MAX_CACHE_PAYLOAD_BYTES
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub api_base_url: Option<String>,
    /// Background sync tick.
    #[serde(default = "default_sync_interval_secs")]
    pub sync_interval_secs: u64,
    /// A valid cache younger than this is not re-synced.
    #[serde(default = "default_min_sync_interval_secs")]
    pub min_sync_interval_secs: u64,
    /// Foreground re-resolution tick.
    #[serde(default = "default_foreground_refresh_secs")]
    pub foreground_refresh_secs: u64,
    #[serde(default = "default_cache_ttl_hours")]
    pub cache_ttl_hours: i64,
    #[serde(default = "default_max_cache_payload_bytes")]
    pub max_cache_payload_bytes: usize,
    #[serde(default)]
    pub log_dir: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_base_url: None,
            sync_interval_secs: default_sync_interval_secs(),
            min_sync_interval_secs: default_min_sync_interval_secs(),
            foreground_refresh_secs: default_foreground_refresh_secs(),
            cache_ttl_hours: default_cache_ttl_hours(),
            max_cache_payload_bytes: default_max_cache_payload_bytes(),
            log_dir: None,
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;
        if path.exists() {
            let contents = std::fs::read_to_string(&path)?;
            Ok(serde_json::from_str(&contents)?)
        } else {
            Ok(Self::default())
        }
    }

    /// Apply environment overrides on top of the file.
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(url) = std::env::var(API_URL_ENV) {
            if !url.trim().is_empty() {
                self.api_base_url = Some(url);
            }
        }
        self
    }

    fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;
        Ok(config_dir.join(APP_NAME).join(CONFIG_FILE))
    }

    pub fn storage_dir(&self) -> Result<PathBuf> {
        let data_dir = dirs::data_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find data directory"))?;
        Ok(data_dir.join(APP_NAME))
    }

    pub fn sync_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.sync_interval_secs.max(1))
    }

    pub fn min_sync_interval(&self) -> Duration {
        Duration::seconds(self.min_sync_interval_secs as i64)
    }

    pub fn foreground_refresh(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.foreground_refresh_secs.max(1))
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::hours(self.cache_ttl_hours)
    }
}
