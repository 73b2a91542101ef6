//! Driver configuration management

use crate::connection::ConnectOptions;
use crate::read_loop::ErrorPolicy;
use anyhow::{Context, Result, anyhow};
use common::DebugFlags;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DriverConfig {
    #[serde(default)]
    pub driver: DriverSettings,
    /// Debug output categories
    #[serde(default)]
    pub debug: DebugSettings,
    /// Background reader tuning
    #[serde(default)]
    pub read_loop: ReadLoopSettings,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DriverSettings {
    /// 0-based index among connected controllers
    #[serde(default)]
    pub device_index: usize,
    /// How long the CLI stays connected, in seconds
    #[serde(default = "DriverSettings::default_duration_secs")]
    pub duration_secs: u64,
    #[serde(default = "DriverSettings::default_log_level")]
    pub log_level: String,
}

impl Default for DriverSettings {
    fn default() -> Self {
        Self {
            device_index: 0,
            duration_secs: Self::default_duration_secs(),
            log_level: Self::default_log_level(),
        }
    }
}

impl DriverSettings {
    fn default_duration_secs() -> u64 {
        30
    }

    fn default_log_level() -> String {
        "info".to_string()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DebugSettings {
    /// Connection steps, packets and decoded reports
    #[serde(default)]
    pub protocol: bool,
    /// libusb's own diagnostics
    #[serde(default)]
    pub usb: bool,
}

impl From<DebugSettings> for DebugFlags {
    fn from(settings: DebugSettings) -> Self {
        DebugFlags {
            protocol: settings.protocol,
            usb: settings.usb,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadLoopSettings {
    /// Consecutive read errors before the device is considered gone
    #[serde(default)]
    pub max_consecutive_errors: Option<u32>,
    /// Upper bound on one blocking read, in milliseconds
    #[serde(default = "ReadLoopSettings::default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

impl Default for ReadLoopSettings {
    fn default() -> Self {
        Self {
            max_consecutive_errors: None,
            poll_interval_ms: Self::default_poll_interval_ms(),
        }
    }
}

impl ReadLoopSettings {
    fn default_poll_interval_ms() -> u64 {
        100
    }
}

impl DriverConfig {
    /// Load configuration from the specified path
    pub fn load(path: Option<PathBuf>) -> Result<Self> {
        let config_path = if let Some(p) = path {
            PathBuf::from(shellexpand::tilde(&p.to_string_lossy()).as_ref())
        } else {
            // Try standard locations in order
            let candidates = vec![Self::default_path(), PathBuf::from("/etc/recon/recon.toml")];

            candidates
                .into_iter()
                .find(|p| p.exists())
                .ok_or_else(|| anyhow!("No configuration file found, using defaults"))?
        };

        let content = fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;

        let config = Self::parse(&content)
            .with_context(|| format!("Failed to parse config file: {}", config_path.display()))?;

        tracing::info!("Loaded configuration from: {}", config_path.display());
        Ok(config)
    }

    /// Parse and validate TOML text
    pub fn parse(content: &str) -> Result<Self> {
        let config: DriverConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration or return defaults if not found
    pub fn load_or_default() -> Self {
        match Self::load(None) {
            Ok(config) => config,
            Err(e) => {
                tracing::debug!("Failed to load config: {}, using defaults", e);
                Self::default()
            }
        }
    }

    /// Save configuration to the specified path
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize configuration")?;

        // Create parent directories if they don't exist
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        tracing::info!("Saved configuration to: {}", path.display());
        Ok(())
    }

    /// Get the default configuration file path
    pub fn default_path() -> PathBuf {
        if let Some(config_dir) = dirs::config_dir() {
            config_dir.join("recon").join("recon.toml")
        } else {
            PathBuf::from(".config/recon/recon.toml")
        }
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.driver.log_level.as_str()) {
            return Err(anyhow!(
                "Invalid log level '{}', must be one of: {}",
                self.driver.log_level,
                valid_levels.join(", ")
            ));
        }

        if self.read_loop.poll_interval_ms == 0 {
            return Err(anyhow!("read_loop.poll_interval_ms must be greater than 0"));
        }

        if self.read_loop.max_consecutive_errors == Some(0) {
            return Err(anyhow!(
                "read_loop.max_consecutive_errors must be greater than 0 (omit it to never give up)"
            ));
        }

        Ok(())
    }

    pub fn debug_flags(&self) -> DebugFlags {
        self.debug.into()
    }

    pub fn duration(&self) -> Duration {
        Duration::from_secs(self.driver.duration_secs)
    }

    /// Connection options for the configured device
    pub fn connect_options(&self) -> ConnectOptions {
        ConnectOptions {
            index: self.driver.device_index,
            error_policy: ErrorPolicy {
                max_consecutive_errors: self.read_loop.max_consecutive_errors,
            },
            read_slice: Duration::from_millis(self.read_loop.poll_interval_ms),
            ..ConnectOptions::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = DriverConfig::default();
        assert_eq!(config.driver.log_level, "info");
        assert_eq!(config.driver.duration_secs, 30);
        assert_eq!(config.driver.device_index, 0);
        assert!(!config.debug.protocol);
        assert_eq!(config.read_loop.max_consecutive_errors, None);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_serialization() {
        let config = DriverConfig::default();
        let toml_str = toml::to_string(&config).unwrap();
        let parsed: DriverConfig = toml::from_str(&toml_str).unwrap();

        assert_eq!(config, parsed);
    }

    #[test]
    fn test_validate_log_level() {
        let mut config = DriverConfig::default();
        assert!(config.validate().is_ok());

        config.driver.log_level = "invalid".to_string();
        assert!(config.validate().is_err());

        config.driver.log_level = "debug".to_string();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_read_loop() {
        let mut config = DriverConfig::default();
        config.read_loop.poll_interval_ms = 0;
        assert!(config.validate().is_err());

        config.read_loop.poll_interval_ms = 50;
        config.read_loop.max_consecutive_errors = Some(0);
        assert!(config.validate().is_err());

        config.read_loop.max_consecutive_errors = Some(5);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_connect_options() {
        let mut config = DriverConfig::default();
        config.driver.device_index = 2;
        config.read_loop.max_consecutive_errors = Some(10);
        config.read_loop.poll_interval_ms = 20;

        let options = config.connect_options();
        assert_eq!(options.index, 2);
        assert_eq!(options.error_policy, ErrorPolicy::escalate_after(10));
        assert_eq!(options.read_slice, Duration::from_millis(20));
        assert!(options.start_reader);
    }
}
