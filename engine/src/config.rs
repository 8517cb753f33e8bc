// Configuration management with layered configuration (file, env)

use crate::errors::ConfigurationError;
use chrono::NaiveTime;
use chrono_tz::Tz;
use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Main settings structure containing all configuration options
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub scheduling: SchedulingConfig,
    pub housekeeping: HousekeepingConfig,
    pub observability: ObservabilityConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulingConfig {
    /// Zone that calendar dates and the due time are read in
    pub timezone: Tz,
    /// Local time of day new jobs fall due, "HH:MM"
    pub due_time: String,
    /// Days the availability search looks ahead before giving up
    pub search_horizon_days: u32,
    /// Open/failed window used when a config leaves it unset
    pub default_window_days: u32,
    pub max_trigger_depth: u32,
}

impl Default for SchedulingConfig {
    fn default() -> Self {
        Self {
            timezone: chrono_tz::Europe::London,
            due_time: "23:30".to_string(),
            search_horizon_days: 1500,
            default_window_days: 3650,
            max_trigger_depth: 8,
        }
    }
}

impl SchedulingConfig {
    pub fn due_time(&self) -> Result<NaiveTime, ConfigurationError> {
        NaiveTime::parse_from_str(&self.due_time, "%H:%M")
            .map_err(|_| ConfigurationError::InvalidDueTime(self.due_time.clone()))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HousekeepingConfig {
    pub interval_seconds: u64,
}

impl Default for HousekeepingConfig {
    fn default() -> Self {
        Self {
            interval_seconds: 3600,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    pub log_level: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}

impl Settings {
    /// Load configuration with layered precedence: defaults → file → env
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from_path("config")
    }

    /// Load configuration from a specific path
    pub fn load_from_path<P: AsRef<Path>>(config_dir: P) -> Result<Self, ConfigError> {
        let config_dir = config_dir.as_ref();

        let builder = Config::builder()
            .add_source(File::from(config_dir.join("default.toml")).required(false))
            // Local overrides (not committed to git)
            .add_source(File::from(config_dir.join("local.toml")).required(false))
            .add_source(
                Environment::with_prefix("HWK")
                    .separator("__")
                    .try_parsing(true),
            );

        let config = builder.build()?;
        config.try_deserialize()
    }

    /// Validate configuration settings
    pub fn validate(&self) -> Result<(), String> {
        if let Err(e) = self.scheduling.due_time() {
            return Err(e.to_string());
        }
        if self.scheduling.search_horizon_days == 0 {
            return Err("Scheduling search_horizon_days must be greater than 0".to_string());
        }
        if self.scheduling.default_window_days == 0 {
            return Err("Scheduling default_window_days must be greater than 0".to_string());
        }
        if self.scheduling.max_trigger_depth == 0 {
            return Err("Scheduling max_trigger_depth must be greater than 0".to_string());
        }

        if self.housekeeping.interval_seconds == 0 {
            return Err("Housekeeping interval_seconds must be greater than 0".to_string());
        }

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.observability.log_level.to_lowercase().as_str()) {
            return Err(format!(
                "Invalid log level: {}. Must be one of: {:?}",
                self.observability.log_level, valid_levels
            ));
        }

        Ok(())
    }
}
