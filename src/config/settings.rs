//! Application settings loaded from a TOML file.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{BridgeError, BridgeResult};
use crate::runtime::manager::ManagerConfig;

/// Top-level settings document
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Settings {
    pub bridge: BridgeSettings,
}

/// `[bridge]` table: everything the bridge manager can be configured with
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct BridgeSettings {
    /// Path to the JS services directory
    pub services_path: Option<PathBuf>,
    /// Explicit runtime executable; auto-detected when absent
    pub runtime_executable: Option<PathBuf>,
    pub startup_timeout_secs: u64,
    pub request_timeout_secs: u64,
    pub health_check_interval_secs: u64,
    pub debug: bool,
}

impl Default for BridgeSettings {
    fn default() -> Self {
        Self {
            services_path: None,
            runtime_executable: None,
            startup_timeout_secs: 30,
            request_timeout_secs: 60,
            health_check_interval_secs: 120,
            debug: false,
        }
    }
}

impl Settings {
    /// Default settings location under the user config dir.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("haven").join("config.toml"))
    }

    /// Load settings from `path`, or from the default location.
    ///
    /// A missing default file yields default settings; an explicitly given
    /// path must exist.
    pub async fn load(path: Option<&Path>) -> BridgeResult<Settings> {
        let resolved = match path {
            Some(path) => path.to_path_buf(),
            None => match Self::default_path() {
                Some(default) if default.is_file() => default,
                _ => return Ok(Settings::default()),
            },
        };

        let text = tokio::fs::read_to_string(&resolved).await.map_err(|e| {
            BridgeError::config(format!("cannot read {}: {e}", resolved.display()))
        })?;
        Self::parse(&text)
            .map_err(|e| BridgeError::config(format!("invalid {}: {e}", resolved.display())))
    }

    fn parse(text: &str) -> Result<Settings, toml::de::Error> {
        toml::from_str(text)
    }

    /// Convert into the manager's configuration.
    pub fn manager_config(&self) -> ManagerConfig {
        ManagerConfig {
            services_path: self.bridge.services_path.clone(),
            runtime_executable: self.bridge.runtime_executable.clone(),
            startup_timeout: Duration::from_secs(self.bridge.startup_timeout_secs),
            request_timeout: Duration::from_secs(self.bridge.request_timeout_secs),
            health_check_interval: Duration::from_secs(self.bridge.health_check_interval_secs),
            debug: self.bridge.debug,
        }
    }
}
