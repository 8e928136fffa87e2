// Copyright 2026 Daniel Pelikan
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Configuration module.
//!
//! Handles loading and saving application settings.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use crate::bluetooth::{gatt_uuids, DriverConfig, GattProfile, SessionPolicy};

const APP_DIR: &str = "hxm-monitor";

const DEFAULT_LOG_FILTER: &str = "hxm_monitor=info";

/// Application configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Data directory for session recordings.
    #[serde(skip)]
    pub data_dir: PathBuf,

    pub device: DeviceConfig,
    pub session: SessionConfig,
    pub timeouts: TimeoutConfig,
    pub connection: ConnectionConfig,
    pub gatt: GattConfig,
    pub output: OutputConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// Peripheral address, e.g. "00:22:D0:12:34:56".
    pub address: Option<String>,
}

/// Which characteristics a session acquires.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub battery: bool,
    pub heart_rate: bool,
    pub custom: bool,
    /// Start a session as soon as services are discovered.
    pub auto_start: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            battery: true,
            heart_rate: true,
            custom: true,
            auto_start: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    pub battery_ms: u64,
    pub heart_rate_ms: u64,
    pub custom_ms: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            battery_ms: 3000,
            heart_rate_ms: 5000,
            custom_ms: 3000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    pub auto_reconnect: bool,
    pub reconnect_delay_ms: u64,
    pub max_connect_failures: u32,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            auto_reconnect: true,
            reconnect_delay_ms: 2000,
            max_connect_failures: 3,
        }
    }
}

/// Vendor service and characteristic of the strap's activity data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GattConfig {
    pub custom_service: Uuid,
    pub custom_measurement: Uuid,
}

impl Default for GattConfig {
    fn default() -> Self {
        Self {
            custom_service: gatt_uuids::CUSTOM_SERVICE,
            custom_measurement: gatt_uuids::CUSTOM_MEASUREMENT,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Print each measurement as a JSON line on stdout.
    pub json_lines: bool,
    /// Write each session to `<data_dir>/sessions`.
    pub record_sessions: bool,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            json_lines: true,
            record_sessions: true,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Extra `tracing` filter directives, e.g. "hxm_monitor::bluetooth=debug".
    pub filter: Option<String>,
}

fn config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_DIR)
}

fn data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_DIR)
}

impl Config {
    /// Load configuration from file or create default.
    pub fn load() -> Result<Self> {
        let config_dir = config_dir();
        std::fs::create_dir_all(&config_dir)?;

        let mut config = Self::load_from(&config_dir.join("config.toml"))?;

        config.data_dir = data_dir();
        std::fs::create_dir_all(&config.data_dir)?;

        Ok(config)
    }

    /// Load from `path`, writing the defaults there if it does not exist.
    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            Ok(toml::from_str(&content)?)
        } else {
            let config = Self::default();
            config.save_to(path)?;
            Ok(config)
        }
    }

    /// Save configuration to file.
    pub fn save(&self) -> Result<()> {
        self.save_to(&config_dir().join("config.toml"))
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn session_policy(&self) -> SessionPolicy {
        SessionPolicy {
            battery: self.session.battery,
            heart_rate: self.session.heart_rate,
            custom: self.session.custom,
        }
    }

    pub fn driver_config(&self) -> DriverConfig {
        DriverConfig {
            battery_timeout: Duration::from_millis(self.timeouts.battery_ms),
            heart_rate_timeout: Duration::from_millis(self.timeouts.heart_rate_ms),
            custom_timeout: Duration::from_millis(self.timeouts.custom_ms),
            max_connect_failures: self.connection.max_connect_failures,
            profile: GattProfile {
                custom: (self.gatt.custom_service, self.gatt.custom_measurement),
                ..GattProfile::default()
            },
        }
    }

    /// Build the log filter. `env` is the `RUST_LOG` value, which replaces
    /// the default; `logging.filter` directives are added on top.
    pub fn log_filter(&self, env: Option<&str>) -> Result<EnvFilter> {
        let mut filter = env
            .filter(|directives| !directives.trim().is_empty())
            .and_then(|directives| EnvFilter::try_new(directives).ok())
            .unwrap_or_else(|| EnvFilter::new(DEFAULT_LOG_FILTER));

        if let Some(extra) = self.logging.filter.as_deref() {
            for directive in extra.split(',').map(str::trim).filter(|d| !d.is_empty()) {
                filter = filter.add_directive(directive.parse()?);
            }
        }
        Ok(filter)
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.connection.reconnect_delay_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_first_load_writes_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");

        let config = Config::load_from(&path).unwrap();
        assert!(path.exists());
        assert_eq!(config, Config::default());
        assert_eq!(config.timeouts.heart_rate_ms, 5000);
        assert!(config.device.address.is_none());
    }

    #[test]
    fn test_round_trip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");

        let mut config = Config::default();
        config.device.address = Some("00:22:D0:12:34:56".to_string());
        config.session.custom = false;
        config.timeouts.battery_ms = 1500;
        config.logging.filter = Some("hxm_monitor=debug".to_string());
        config.save_to(&path).unwrap();

        assert_eq!(Config::load_from(&path).unwrap(), config);
    }

    #[test]
    fn test_missing_sections_use_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            "[device]\naddress = \"00:22:D0:12:34:56\"\n\n[session]\ncustom = false\n",
        )
        .unwrap();

        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.device.address.as_deref(), Some("00:22:D0:12:34:56"));
        assert!(!config.session.custom);
        assert!(config.session.heart_rate);
        assert!(config.session.auto_start);
        assert_eq!(config.connection, ConnectionConfig::default());
        assert_eq!(config.gatt.custom_measurement, gatt_uuids::CUSTOM_MEASUREMENT);
    }

    #[test]
    fn test_log_filter_sources() {
        let config = Config::default();

        let filter = config.log_filter(None).unwrap().to_string();
        assert!(filter.contains("hxm_monitor=info"));

        let filter = config.log_filter(Some("hxm_monitor=debug")).unwrap().to_string();
        assert!(filter.contains("hxm_monitor=debug"));
        assert!(!filter.contains("hxm_monitor=info"));

        let mut config = Config::default();
        config.logging.filter = Some("hxm_monitor::bluetooth=trace, ".to_string());
        let filter = config.log_filter(None).unwrap().to_string();
        assert!(filter.contains("hxm_monitor=info"));
        assert!(filter.contains("hxm_monitor::bluetooth=trace"));

        config.logging.filter = Some("hxm_monitor=loud".to_string());
        assert!(config.log_filter(None).is_err());
    }

    #[test]
    fn test_driver_config_conversion() {
        let mut config = Config::default();
        config.timeouts.custom_ms = 750;
        config.connection.max_connect_failures = 5;

        let driver = config.driver_config();
        assert_eq!(driver.custom_timeout, Duration::from_millis(750));
        assert_eq!(driver.heart_rate_timeout, Duration::from_secs(5));
        assert_eq!(driver.max_connect_failures, 5);
        assert_eq!(driver.profile, GattProfile::default());

        let policy = config.session_policy();
        assert_eq!(policy, SessionPolicy::default());
    }
}
