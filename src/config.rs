use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::connection::device_connection::{DEFAULT_DEVICE_ID, DEFAULT_IDENTITY};
use crate::connection::roster::VESSEL_IDENTITY;
use crate::connection::ConnectionSettings;
use crate::controller::pipeline::{MAX_DIRECTION_CHANGE_DELAY_MS, MIN_DIRECTION_CHANGE_DELAY_MS};
use crate::controller::ControlSettings;

pub const CONFIG_ENV: &str = "SHIPCTL_CONFIG";
const CONFIG_DIR: &str = "shipcontroller";
const CONFIG_FILE: &str = "config.toml";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to access {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Invalid configuration: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Failed to serialize configuration: {0}")]
    Serialize(#[from] toml::ser::Error),
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct RelayConfig {
    pub url: String,
    pub device_id: String,
    pub identity: String,
    pub vessel_identity: String,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            url: "mock://relay".to_string(),
            device_id: DEFAULT_DEVICE_ID.to_string(),
            identity: DEFAULT_IDENTITY.to_string(),
            vessel_identity: VESSEL_IDENTITY.to_string(),
        }
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct ConnectionTimings {
    pub heartbeat_initial_delay_ms: u64,
    pub heartbeat_interval_ms: u64,
    pub reconnect_interval_ms: u64,
}

impl Default for ConnectionTimings {
    fn default() -> Self {
        Self {
            heartbeat_initial_delay_ms: 5000,
            heartbeat_interval_ms: 5000,
            reconnect_interval_ms: 5000,
        }
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
#[serde(default)]
pub struct AppConfig {
    pub relay: RelayConfig,
    pub control: ControlSettings,
    pub connection: ConnectionTimings,
}

impl AppConfig {
    /// `$SHIPCTL_CONFIG`, else `<config dir>/shipcontroller/config.toml`
    pub fn default_path() -> PathBuf {
        if let Some(path) = std::env::var_os(CONFIG_ENV) {
            return PathBuf::from(path);
        }
        let mut base = dirs::config_dir()
            .or_else(dirs::home_dir)
            .unwrap_or_else(|| {
                warn!("Could not determine config directory, using current directory");
                PathBuf::from(".")
            });
        base.push(CONFIG_DIR);
        base.push(CONFIG_FILE);
        base
    }

    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: AppConfig = toml::from_str(text)?;
        Ok(config.sanitized())
    }

    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Clamps values the same way the settings surface does
    pub fn sanitized(mut self) -> Self {
        self.control.filter_alpha = ControlSettings::clamp_alpha(self.control.filter_alpha);
        self.control.direction_change_delay_ms = self
            .control
            .direction_change_delay_ms
            .clamp(MIN_DIRECTION_CHANGE_DELAY_MS, MAX_DIRECTION_CHANGE_DELAY_MS);
        self
    }

    pub fn connection_settings(&self) -> ConnectionSettings {
        ConnectionSettings {
            device_id: self.relay.device_id.clone(),
            identity: self.relay.identity.clone(),
            vessel_identity: self.relay.vessel_identity.clone(),
            heartbeat_initial_delay: Duration::from_millis(self.connection.heartbeat_initial_delay_ms),
            heartbeat_interval: Duration::from_millis(self.connection.heartbeat_interval_ms),
            reconnect_interval: Duration::from_millis(self.connection.reconnect_interval_ms),
        }
    }

    /// Writes the default configuration if `path` does not exist yet.
    /// Returns whether a file was created.
    pub async fn ensure_default(path: &Path) -> Result<bool, ConfigError> {
        let exists = tokio::fs::try_exists(path).await.map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        if exists {
            return Ok(false);
        }
        info!("Creating default configuration at {}", path.display());
        AppConfig::default().save(path).await?;
        Ok(true)
    }

    pub async fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| ConfigError::Io {
                path: path.to_path_buf(),
                source,
            })?;
        let config = Self::from_toml_str(&text)?;
        debug!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Loads `path`, creating it with defaults when absent. Unreadable or
    /// invalid files fall back to defaults.
    pub async fn load_or_default(path: &Path) -> Self {
        if let Err(e) = Self::ensure_default(path).await {
            warn!("Could not write default configuration: {}", e);
        }
        match Self::load(path).await {
            Ok(config) => config,
            Err(e) => {
                warn!("Using default configuration: {}", e);
                AppConfig::default()
            }
        }
    }

    pub async fn save(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|source| ConfigError::Io {
                    path: parent.to_path_buf(),
                    source,
                })?;
        }
        let text = self.to_toml_string()?;
        tokio::fs::write(path, text)
            .await
            .map_err(|source| ConfigError::Io {
                path: path.to_path_buf(),
                source,
            })?;
        info!("Configuration saved to {}", path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::FilterKind;

    fn scratch_path(name: &str) -> PathBuf {
        let nanos = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or_default();
        std::env::temp_dir()
            .join(format!("shipcontroller-{}-{}-{}", name, std::process::id(), nanos))
            .join(CONFIG_FILE)
    }

    #[test]
    fn defaults_match_relay_protocol() {
        let config = AppConfig::default();
        assert_eq!(config.relay.device_id, "h832h9eh29h");
        assert_eq!(config.relay.identity, "MAIN_DEVICES");
        assert_eq!(config.relay.vessel_identity, "SHIP_DEVICES");
        assert_eq!(config.control.filter, FilterKind::Lag);
        assert_eq!(config.control.direction_change_delay_ms, 150);
        let settings = config.connection_settings();
        assert_eq!(settings.heartbeat_interval, Duration::from_secs(5));
    }

    #[test]
    fn partial_files_use_defaults_and_clamp() {
        let config = AppConfig::from_toml_str(
            r#"
            [control]
            filter = "kalman"
            filter_alpha = 0.01
            direction_change_delay_ms = 900
            "#,
        )
        .unwrap();
        assert_eq!(config.control.filter, FilterKind::Kalman);
        assert_eq!(config.control.filter_alpha, 0.1);
        assert_eq!(config.control.direction_change_delay_ms, 200);
        assert!(config.control.haptics_enabled);
        assert_eq!(config.relay, RelayConfig::default());
    }

    #[test]
    fn invalid_files_are_rejected() {
        assert!(matches!(
            AppConfig::from_toml_str("[control]\nfilter = \"median\""),
            Err(ConfigError::Parse(_))
        ));
    }

    #[tokio::test]
    async fn ensure_default_writes_once() {
        let path = scratch_path("ensure");
        assert!(AppConfig::ensure_default(&path).await.unwrap());
        assert!(!AppConfig::ensure_default(&path).await.unwrap());
        assert_eq!(AppConfig::load(&path).await.unwrap(), AppConfig::default());
    }

    #[tokio::test]
    async fn save_and_reload() {
        let path = scratch_path("save");
        let mut config = AppConfig::default();
        config.relay.url = "ws://10.0.0.2:8080/ws".into();
        config.control.haptics_enabled = false;
        config.save(&path).await.unwrap();
        assert_eq!(AppConfig::load_or_default(&path).await, config);
    }

    #[tokio::test]
    async fn broken_file_falls_back_to_defaults() {
        let path = scratch_path("broken");
        tokio::fs::create_dir_all(path.parent().unwrap()).await.unwrap();
        tokio::fs::write(&path, "this is = = not toml").await.unwrap();
        assert_eq!(AppConfig::load_or_default(&path).await, AppConfig::default());
    }
}
