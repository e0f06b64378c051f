//! Daemon configuration

use anyhow::Result;
use serde::Deserialize;
use std::path::PathBuf;

/// Daemon configuration, read from an optional `thermostat` config file
/// plus `THERMOSTAT_*` environment overrides.
#[derive(Debug, Clone, Deserialize)]
pub struct ThermostatConfig {
    /// Display name of this controller instance
    #[serde(default = "default_name")]
    pub name: String,

    /// Sensor entity ids feeding the feature schema, in fixed order
    #[serde(default)]
    pub sensors: Vec<String>,

    /// Entity id of the climate actuator being driven
    #[serde(default = "default_actuator")]
    pub actuator: String,

    /// JSON states file the platform adapter reads sensor values from
    #[serde(default = "default_states_path")]
    pub states_path: PathBuf,

    /// JSON file the platform adapter writes temperature commands to
    #[serde(default = "default_command_path")]
    pub command_path: PathBuf,

    /// Directory for the training log, model artifact and saved state
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Manual override lifetime in minutes
    #[serde(default = "default_override_minutes")]
    pub override_minutes: u64,

    /// Prediction tick interval in seconds
    #[serde(default = "default_tick_interval")]
    pub tick_interval_secs: u64,

    /// Interval for polling the states file for external changes
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
}

fn default_name() -> String {
    "Learning Thermostat".to_string()
}

fn default_actuator() -> String {
    "climate.living_room".to_string()
}

fn default_states_path() -> PathBuf {
    PathBuf::from("states.json")
}

fn default_command_path() -> PathBuf {
    PathBuf::from("commands.json")
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("data")
}

fn default_override_minutes() -> u64 {
    60
}

fn default_tick_interval() -> u64 {
    300
}

fn default_poll_interval() -> u64 {
    10
}

impl Default for ThermostatConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            sensors: Vec::new(),
            actuator: default_actuator(),
            states_path: default_states_path(),
            command_path: default_command_path(),
            data_dir: default_data_dir(),
            override_minutes: default_override_minutes(),
            tick_interval_secs: default_tick_interval(),
            poll_interval_secs: default_poll_interval(),
        }
    }
}

impl ThermostatConfig {
    /// Load configuration from the config file and environment.
    pub fn load() -> Result<Self> {
        let config = config::Config::builder()
            .add_source(config::File::with_name("thermostat").required(false))
            .add_source(config::Environment::with_prefix("THERMOSTAT"))
            .build()?;

        Ok(config.try_deserialize().unwrap_or_default())
    }

    pub fn training_log_path(&self) -> PathBuf {
        self.data_dir.join("training_data.csv")
    }

    pub fn model_artifact_path(&self) -> PathBuf {
        self.data_dir.join("model.json")
    }

    pub fn controller_state_path(&self) -> PathBuf {
        self.data_dir.join("controller_state.json")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ThermostatConfig::default();
        assert_eq!(config.override_minutes, 60);
        assert_eq!(config.tick_interval_secs, 300);
        assert!(config.sensors.is_empty());
    }

    #[test]
    fn test_derived_paths() {
        let config = ThermostatConfig {
            data_dir: PathBuf::from("/var/lib/thermostat"),
            ..Default::default()
        };
        assert_eq!(
            config.training_log_path(),
            PathBuf::from("/var/lib/thermostat/training_data.csv")
        );
        assert_eq!(
            config.model_artifact_path(),
            PathBuf::from("/var/lib/thermostat/model.json")
        );
    }
}
