use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::cache;
use crate::error::ConfigError;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ApiMode {
    #[default]
    Mock,
    Http,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ApiConfig {
    pub mode: ApiMode,
    pub base_url: String,
    pub timeout_ms: u64,
    pub retry_attempts: u8,
    pub retry_delay_ms: u64,
    /// Artificial latency added by the mock API.
    pub network_delay_ms: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            mode: ApiMode::Mock,
            base_url: "http://localhost:8080/api".to_owned(),
            timeout_ms: 5000,
            retry_attempts: 3,
            retry_delay_ms: 1000,
            network_delay_ms: 0,
        }
    }
}

impl ApiConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn network_delay(&self) -> Duration {
        Duration::from_millis(self.network_delay_ms)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct StorageConfig {
    /// Overrides the platform data directory for the local database.
    pub data_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RouterConfig {
    pub default_route: String,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            default_route: "/".to_owned(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PortalConfig {
    pub api: ApiConfig,
    pub storage: StorageConfig,
    pub router: RouterConfig,
}

impl PortalConfig {
    /// `<config dir>/microlearn/config.json`, creating the directory.
    pub fn config_file_path() -> Result<PathBuf, ConfigError> {
        let config_dir = dirs::config_dir().ok_or(ConfigError::NoConfigDir)?;
        let app_config_dir = config_dir.join("microlearn");
        std::fs::create_dir_all(&app_config_dir)?;
        Ok(app_config_dir.join("config.json"))
    }

    /// Loads the default config file, falling back to (and writing) defaults.
    pub fn load() -> Self {
        match Self::config_file_path() {
            Ok(path) => Self::load_or_default(&path),
            Err(e) => {
                warn!(error = %e, "no configuration directory, using defaults");
                Self::default()
            }
        }
    }

    pub fn load_or_default(path: &Path) -> Self {
        match Self::from_file(path) {
            Ok(config) => config,
            Err(e) => {
                warn!(
                    error = %e,
                    path = %path.display(),
                    "could not load configuration, using defaults"
                );
                let config = Self::default();
                if let Err(save_err) = config.save_to(path) {
                    warn!(error = %save_err, "could not save default configuration");
                }
                config
            }
        }
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    /// Where the local database lives, if anywhere.
    pub fn cache_dir(&self) -> Option<PathBuf> {
        self.storage
            .data_dir
            .clone()
            .or_else(cache::default_location)
    }
}
