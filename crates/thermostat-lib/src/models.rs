//! Core data models for the learning thermostat

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

/// Token recorded for a sensor whose value is missing or unavailable.
pub const UNKNOWN_TOKEN: &str = "unknown";

/// A raw value observed from a sensor or the actuator.
///
/// Platform state strings are kept as observed; values that parse as a
/// number are numeric, everything else is categorical text. Missing or
/// "unavailable"/"unknown" states are `Unavailable` and must never be
/// coerced to a number.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SensorValue {
    Number(f64),
    Text(String),
    Unavailable,
}

impl SensorValue {
    /// Parse a raw platform state string.
    pub fn from_state(state: &str) -> Self {
        match state {
            "" | "unavailable" | "unknown" => SensorValue::Unavailable,
            s => match s.parse::<f64>() {
                Ok(n) if n.is_finite() => SensorValue::Number(n),
                _ => SensorValue::Text(s.to_string()),
            },
        }
    }

    /// Numeric view, `None` for text or unavailable values.
    pub fn as_number(&self) -> Option<f64> {
        match self {
            SensorValue::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// The raw token stored in the training log for this value.
    pub fn to_token(&self) -> String {
        match self {
            SensorValue::Number(n) => format_number(*n),
            SensorValue::Text(s) => s.clone(),
            SensorValue::Unavailable => UNKNOWN_TOKEN.to_string(),
        }
    }
}

/// Render a number without trailing noise so tokens round-trip through CSV.
fn format_number(n: f64) -> String {
    if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{:.1}", n)
    } else {
        format!("{}", n)
    }
}

/// Point-in-time reading of all monitored sensors.
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub taken_at: DateTime<Local>,
    /// Keyed by raw sensor id (e.g. `sensor.living_room_temperature`).
    pub values: HashMap<String, SensorValue>,
}

impl Snapshot {
    pub fn new(taken_at: DateTime<Local>) -> Self {
        Self {
            taken_at,
            values: HashMap::new(),
        }
    }
}

/// Ordered, fixed set of sensor feature columns.
///
/// Fixed at setup time and shared between the feature engine, the training
/// store and the model. A model trained on one schema explicitly rejects
/// records produced under another.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureSchema {
    columns: Vec<String>,
}

impl FeatureSchema {
    /// Build a schema from raw sensor ids, sanitizing each into a column name.
    pub fn from_sensor_ids<I, S>(sensor_ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            columns: sensor_ids
                .into_iter()
                .map(|id| sanitize_sensor_id(id.as_ref()))
                .collect(),
        }
    }

    /// Sanitized column names, in fixed order.
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }
}

/// Sanitize a sensor entity id into a feature column name.
///
/// Dots are not valid in CSV headers or feature names downstream.
pub fn sanitize_sensor_id(sensor_id: &str) -> String {
    sensor_id.replace('.', "_")
}

/// Fixed-schema encoding of a [`Snapshot`] used by the model.
///
/// One raw token per sensor column (schema order) plus the derived cyclic
/// time-of-day features and the Monday-0 weekday index.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureRecord {
    pub schema: Arc<FeatureSchema>,
    /// Raw tokens in schema order; missing values carry [`UNKNOWN_TOKEN`].
    pub sensors: Vec<String>,
    pub time_sin: f64,
    pub time_cos: f64,
    pub day_of_week: u32,
}

/// A labelled sample in the training log.
///
/// Raw sensor tokens plus the observed timestamp; the time features are
/// re-derived from the timestamp at train time. Immutable once written.
#[derive(Debug, Clone, PartialEq)]
pub struct TrainingRecord {
    pub timestamp: DateTime<Local>,
    /// Raw tokens in schema order.
    pub sensors: Vec<String>,
    /// Target temperature label.
    pub target: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sensor_value_from_state() {
        assert_eq!(SensorValue::from_state("21.5"), SensorValue::Number(21.5));
        assert_eq!(
            SensorValue::from_state("on"),
            SensorValue::Text("on".to_string())
        );
        assert_eq!(SensorValue::from_state("unavailable"), SensorValue::Unavailable);
        assert_eq!(SensorValue::from_state("unknown"), SensorValue::Unavailable);
        assert_eq!(SensorValue::from_state(""), SensorValue::Unavailable);
    }

    #[test]
    fn test_sensor_value_token() {
        assert_eq!(SensorValue::Number(21.0).to_token(), "21.0");
        assert_eq!(SensorValue::Number(21.53).to_token(), "21.53");
        assert_eq!(SensorValue::Text("heat".into()).to_token(), "heat");
        assert_eq!(SensorValue::Unavailable.to_token(), UNKNOWN_TOKEN);
    }

    #[test]
    fn test_schema_sanitizes_ids() {
        let schema =
            FeatureSchema::from_sensor_ids(["sensor.kitchen_temp", "binary_sensor.window"]);
        assert_eq!(
            schema.columns(),
            &["sensor_kitchen_temp".to_string(), "binary_sensor_window".to_string()]
        );
    }

    #[test]
    fn test_schema_equality_is_order_sensitive() {
        let a = FeatureSchema::from_sensor_ids(["sensor.a", "sensor.b"]);
        let b = FeatureSchema::from_sensor_ids(["sensor.b", "sensor.a"]);
        assert_ne!(a, b);
    }
}
