//! Viewer settings with persistence
//!
//! Settings are saved to `~/.config/vista/settings.toml`

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use vista_loader::LoaderConfig;
use vista_net::NetConfig;

/// All viewer settings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ViewerSettings {
    pub network: NetworkSettings,
    pub loader: LoaderConfig,
    pub logging: LoggingSettings,
}

impl ViewerSettings {
    /// Get the config directory path
    fn config_dir() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("vista"))
    }

    /// Get the settings file path
    pub fn settings_path() -> Option<PathBuf> {
        Self::config_dir().map(|p| p.join("settings.toml"))
    }

    /// Load settings from the config directory, or return defaults if not found
    pub fn load() -> Self {
        let Some(path) = Self::settings_path() else {
            warn!("Could not determine config directory");
            return Self::default();
        };
        Self::load_from(&path)
    }

    /// Load settings from `path`, falling back to defaults on any problem
    pub fn load_from(path: &Path) -> Self {
        if !path.exists() {
            info!("No settings file found, using defaults");
            return Self::default();
        }

        match fs::read_to_string(path) {
            Ok(content) => match toml::from_str(&content) {
                Ok(settings) => {
                    info!("Loaded settings from {:?}", path);
                    settings
                }
                Err(e) => {
                    warn!("Failed to parse settings: {}, using defaults", e);
                    Self::default()
                }
            },
            Err(e) => {
                warn!("Failed to read settings file: {}, using defaults", e);
                Self::default()
            }
        }
    }

    /// Save settings to the config directory
    pub fn save(&self) -> anyhow::Result<()> {
        let Some(path) = Self::settings_path() else {
            anyhow::bail!("Could not determine config directory");
        };
        self.save_to(&path)
    }

    /// Save settings to `path`, creating its directory if needed
    pub fn save_to(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(dir) = path.parent() {
            if !dir.exists() {
                fs::create_dir_all(dir)?;
            }
        }

        let content = toml::to_string_pretty(self)?;
        fs::write(path, content)?;
        info!("Saved settings to {:?}", path);
        Ok(())
    }
}

/// HTTP retrieval settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkSettings {
    /// Request timeout in seconds
    pub timeout_secs: u64,
    pub user_agent: String,
    /// Bearer token for credentialed requests. Never sent with signed URLs.
    pub bearer_token: Option<String>,
    /// Largest response body accepted, in megabytes
    pub max_body_mb: u64,
}

impl Default for NetworkSettings {
    fn default() -> Self {
        let net = NetConfig::default();
        Self {
            timeout_secs: net.timeout.as_secs(),
            user_agent: net.user_agent,
            bearer_token: None,
            max_body_mb: net.max_body_bytes / (1024 * 1024),
        }
    }
}

impl NetworkSettings {
    pub fn net_config(&self) -> NetConfig {
        NetConfig {
            timeout: Duration::from_secs(self.timeout_secs),
            user_agent: self.user_agent.clone(),
            bearer_token: self.bearer_token.clone(),
            max_body_bytes: self.max_body_mb * 1024 * 1024,
        }
    }
}

/// Logging settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// Default filter level when `RUST_LOG` is not set
    pub level: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".into(),
        }
    }
}
