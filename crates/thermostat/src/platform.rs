//! File-backed platform adapter
//!
//! Stands in for the host automation platform: sensor and actuator states
//! are read from a flat JSON states file (entity id → state string), and
//! temperature commands are written to a JSON command file for an external
//! bridge to pick up. A small poll loop watches the actuator's target and
//! feeds externally observed changes into the controller's intake queue.

use async_trait::async_trait;
use chrono::Local;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use thermostat_lib::{
    Actuator, ActuatorReading, ControllerHandle, EngineError, SensorReader, SensorValue, Snapshot,
};
use tokio::sync::broadcast;
use tokio::time::interval;
use tracing::{debug, info, warn};

/// Suffix keys under the actuator entity in the states file.
const TARGET_ATTR: &str = "temperature";
const MEASURED_ATTR: &str = "current_temperature";

/// Reads entity states from a JSON file and writes commands to another.
pub struct StateFile {
    states_path: PathBuf,
    command_path: PathBuf,
    sensor_ids: Vec<String>,
    actuator_id: String,
}

#[derive(Serialize)]
struct TemperatureCommand<'a> {
    entity_id: &'a str,
    temperature: f64,
    issued_at: String,
}

impl StateFile {
    pub fn new(
        states_path: impl Into<PathBuf>,
        command_path: impl Into<PathBuf>,
        sensor_ids: Vec<String>,
        actuator_id: String,
    ) -> Self {
        Self {
            states_path: states_path.into(),
            command_path: command_path.into(),
            sensor_ids,
            actuator_id,
        }
    }

    /// Current states as raw strings; a missing or unreadable file is an
    /// empty map (every entity unavailable).
    fn read_states(&self) -> HashMap<String, String> {
        let bytes = match std::fs::read(&self.states_path) {
            Ok(bytes) => bytes,
            Err(e) => {
                debug!(error = %e, path = %self.states_path.display(), "States file unreadable");
                return HashMap::new();
            }
        };
        match serde_json::from_slice::<HashMap<String, Value>>(&bytes) {
            Ok(map) => map
                .into_iter()
                .map(|(k, v)| (k, state_string(v)))
                .collect(),
            Err(e) => {
                warn!(error = %e, "States file is not a JSON object, treating all as unavailable");
                HashMap::new()
            }
        }
    }

    fn attr_key(&self, attr: &str) -> String {
        format!("{}.{}", self.actuator_id, attr)
    }

    /// The actuator's externally visible target, if currently a number.
    pub fn read_external_target(&self) -> Option<f64> {
        let states = self.read_states();
        states
            .get(&self.attr_key(TARGET_ATTR))
            .map(|s| SensorValue::from_state(s))
            .and_then(|v| v.as_number())
    }
}

fn state_string(value: Value) -> String {
    match value {
        Value::String(s) => s,
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

#[async_trait]
impl SensorReader for StateFile {
    async fn snapshot(&self) -> Snapshot {
        let states = self.read_states();
        let mut snapshot = Snapshot::new(Local::now());
        for id in &self.sensor_ids {
            let value = states
                .get(id)
                .map(|s| SensorValue::from_state(s))
                .unwrap_or(SensorValue::Unavailable);
            snapshot.values.insert(id.clone(), value);
        }
        snapshot
    }
}

#[async_trait]
impl Actuator for StateFile {
    async fn set_target(&self, value: f64) -> Result<(), EngineError> {
        let command = TemperatureCommand {
            entity_id: &self.actuator_id,
            temperature: value,
            issued_at: Local::now().to_rfc3339(),
        };
        let bytes = serde_json::to_vec_pretty(&command)?;

        if let Some(parent) = self.command_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let temp_path = self.command_path.with_extension("tmp");
        std::fs::write(&temp_path, bytes)?;
        std::fs::rename(&temp_path, &self.command_path)?;
        debug!(value, "Wrote temperature command");
        Ok(())
    }

    async fn read(&self) -> ActuatorReading {
        let states = self.read_states();
        let lookup = |attr: &str| {
            states
                .get(&self.attr_key(attr))
                .map(|s| SensorValue::from_state(s))
                .unwrap_or(SensorValue::Unavailable)
        };
        ActuatorReading {
            target: lookup(TARGET_ATTR),
            current_temperature: lookup(MEASURED_ATTR),
        }
    }
}

/// Watch the states file for external target changes and feed them into
/// the controller. Changes made by our own commands come back through the
/// same path; the controller's preset gate decides whether they matter.
pub async fn watch_external_changes(
    adapter: Arc<StateFile>,
    handle: ControllerHandle,
    poll_interval: Duration,
    mut shutdown: broadcast::Receiver<()>,
) {
    info!(
        interval_secs = poll_interval.as_secs(),
        "Starting external change watcher"
    );

    let mut ticker = interval(poll_interval);
    let mut last_seen = adapter.read_external_target();

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let current = adapter.read_external_target();
                if let Some(value) = current {
                    if last_seen != Some(value) && last_seen.is_some() {
                        debug!(value, "Observed external target change");
                        handle.observed_target_change(value).await;
                    }
                }
                last_seen = current.or(last_seen);
            }
            _ = shutdown.recv() => {
                info!("Shutting down external change watcher");
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    fn write_states(path: &Path, json: &str) {
        std::fs::write(path, json).unwrap();
    }

    fn adapter(dir: &Path) -> StateFile {
        StateFile::new(
            dir.join("states.json"),
            dir.join("commands.json"),
            vec!["sensor.outdoor".to_string(), "sensor.window".to_string()],
            "climate.living_room".to_string(),
        )
    }

    #[tokio::test]
    async fn test_snapshot_reads_sensor_states() {
        let dir = tempfile::tempdir().unwrap();
        write_states(
            &dir.path().join("states.json"),
            r#"{"sensor.outdoor": "4.5", "sensor.window": "open"}"#,
        );

        let snapshot = adapter(dir.path()).snapshot().await;
        assert_eq!(
            snapshot.values.get("sensor.outdoor"),
            Some(&SensorValue::Number(4.5))
        );
        assert_eq!(
            snapshot.values.get("sensor.window"),
            Some(&SensorValue::Text("open".to_string()))
        );
    }

    #[tokio::test]
    async fn test_missing_states_file_is_all_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let snapshot = adapter(dir.path()).snapshot().await;
        assert_eq!(
            snapshot.values.get("sensor.outdoor"),
            Some(&SensorValue::Unavailable)
        );
    }

    #[tokio::test]
    async fn test_actuator_reading_and_command() {
        let dir = tempfile::tempdir().unwrap();
        write_states(
            &dir.path().join("states.json"),
            r#"{"climate.living_room.temperature": "21.0",
                "climate.living_room.current_temperature": "unavailable"}"#,
        );

        let adapter = adapter(dir.path());
        let reading = adapter.read().await;
        assert_eq!(reading.target, SensorValue::Number(21.0));
        assert_eq!(reading.current_temperature, SensorValue::Unavailable);

        adapter.set_target(22.5).await.unwrap();
        let written = std::fs::read_to_string(dir.path().join("commands.json")).unwrap();
        assert!(written.contains("22.5"));
        assert!(written.contains("climate.living_room"));
    }

    #[tokio::test]
    async fn test_numeric_json_values_accepted() {
        let dir = tempfile::tempdir().unwrap();
        write_states(
            &dir.path().join("states.json"),
            r#"{"sensor.outdoor": 4.5, "sensor.window": true}"#,
        );

        let snapshot = adapter(dir.path()).snapshot().await;
        assert_eq!(
            snapshot.values.get("sensor.outdoor"),
            Some(&SensorValue::Number(4.5))
        );
        assert_eq!(
            snapshot.values.get("sensor.window"),
            Some(&SensorValue::Text("true".to_string()))
        );
    }
}
