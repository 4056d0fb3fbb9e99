//! Node configuration, loaded from a TOML file with sensible defaults

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::wireless::geolocate::{DEFAULT_ELEVATION_URL, DEFAULT_LOCATE_URL};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    pub wifi: WifiConfig,
    pub mqtt: MqttConfig,
    pub sntp: SntpConfig,
    pub location: LocationConfig,
    pub discovery: DiscoveryConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct WifiConfig {
    pub ssid: String,
    pub password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MqttConfig {
    pub broker_host: String,
    pub broker_port: u16,
    pub client_id: String,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            broker_host: "192.168.0.2".to_string(),
            broker_port: 1883,
            client_id: "weathernode".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SntpConfig {
    pub server: String,
    pub timezone: String,
    pub timeout_secs: u64,
}

impl Default for SntpConfig {
    fn default() -> Self {
        Self {
            server: "time.google.com".to_string(),
            timezone: "PST8PDT".to_string(),
            timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LocationConfig {
    pub locate_url: String,
    pub elevation_url: String,
}

impl Default for LocationConfig {
    fn default() -> Self {
        Self {
            locate_url: DEFAULT_LOCATE_URL.to_string(),
            elevation_url: DEFAULT_ELEVATION_URL.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    pub discover_prefix: String,
    pub state_prefix: String,
    pub device_name: String,
    pub manufacturer: String,
    pub model: String,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            discover_prefix: "homeassistant".to_string(),
            state_prefix: "weather-station".to_string(),
            device_name: "Weather Station".to_string(),
            manufacturer: "weathernode".to_string(),
            model: "environmental sensor node".to_string(),
        }
    }
}

impl NodeConfig {
    /// Load from `path`, or fall back to defaults when the file is absent
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            info!("No config file at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        let raw = fs::read_to_string(path)?;
        let config = toml::from_str(&raw)?;
        debug!("Loaded config from {}", path.display());
        Ok(config)
    }

    /// Default location under the platform config directory
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("weathernode")
            .join("config.toml")
    }
}
