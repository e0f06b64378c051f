//! Feature encoding for model training and prediction
//!
//! Transforms a raw sensor snapshot into the fixed-schema record the model
//! consumes. Encoding is pure and total: missing or unavailable sensors map
//! to the `"unknown"` token instead of erroring, and the same time-encoding
//! function serves both the training path (from each stored record's
//! timestamp) and the prediction path (from the snapshot timestamp).

use crate::models::{FeatureRecord, FeatureSchema, Snapshot, TrainingRecord, UNKNOWN_TOKEN};
use chrono::{DateTime, Datelike, Local, Timelike};
use std::f64::consts::TAU;
use std::sync::Arc;

/// Seconds in a day, the period of the cyclic time encoding.
const SECONDS_PER_DAY: f64 = 86_400.0;

/// Cyclic time-of-day features plus the Monday-0 weekday index.
///
/// `s` is seconds elapsed since local midnight: `(sin(τ·s/86400),
/// cos(τ·s/86400), weekday)`. Shared by training and prediction so the two
/// paths can never drift apart.
pub fn time_features(timestamp: DateTime<Local>) -> (f64, f64, u32) {
    let s = timestamp.num_seconds_from_midnight() as f64;
    let angle = TAU * s / SECONDS_PER_DAY;
    (
        angle.sin(),
        angle.cos(),
        timestamp.weekday().num_days_from_monday(),
    )
}

/// Deterministic Snapshot → FeatureRecord transform over a fixed schema.
#[derive(Debug, Clone)]
pub struct FeatureEngine {
    schema: Arc<FeatureSchema>,
    /// Raw sensor ids, aligned with the schema columns.
    sensor_ids: Vec<String>,
}

impl FeatureEngine {
    /// Build an engine over the given raw sensor ids. The derived schema is
    /// fixed for the engine's lifetime.
    pub fn new<I, S>(sensor_ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let ids: Vec<String> = sensor_ids
            .into_iter()
            .map(|s| s.as_ref().to_string())
            .collect();
        let schema = Arc::new(FeatureSchema::from_sensor_ids(ids.iter()));
        Self {
            schema,
            sensor_ids: ids,
        }
    }

    pub fn schema(&self) -> Arc<FeatureSchema> {
        Arc::clone(&self.schema)
    }

    /// Ordered raw tokens for a snapshot, as written to the training log.
    ///
    /// Sensors absent from the snapshot carry the `"unknown"` token.
    pub fn raw_row(&self, snapshot: &Snapshot) -> Vec<String> {
        self.sensor_ids
            .iter()
            .map(|id| {
                snapshot
                    .values
                    .get(id)
                    .map(|v| v.to_token())
                    .unwrap_or_else(|| UNKNOWN_TOKEN.to_string())
            })
            .collect()
    }

    /// Encode a live snapshot for prediction.
    pub fn encode(&self, snapshot: &Snapshot) -> FeatureRecord {
        self.encode_row(self.raw_row(snapshot), snapshot.taken_at)
    }

    /// Encode a stored training record for model fitting.
    pub fn encode_training(&self, record: &TrainingRecord) -> FeatureRecord {
        self.encode_row(record.sensors.clone(), record.timestamp)
    }

    fn encode_row(&self, sensors: Vec<String>, timestamp: DateTime<Local>) -> FeatureRecord {
        let (time_sin, time_cos, day_of_week) = time_features(timestamp);
        FeatureRecord {
            schema: Arc::clone(&self.schema),
            sensors,
            time_sin,
            time_cos,
            day_of_week,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SensorValue;
    use chrono::TimeZone;

    fn local(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> DateTime<Local> {
        Local.with_ymd_and_hms(y, mo, d, h, mi, s).unwrap()
    }

    #[test]
    fn test_time_features_midnight() {
        let (sin, cos, _) = time_features(local(2024, 1, 1, 0, 0, 0));
        assert!(sin.abs() < 1e-9);
        assert!((cos - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_time_features_noon() {
        let (sin, cos, _) = time_features(local(2024, 1, 1, 12, 0, 0));
        assert!(sin.abs() < 1e-9);
        assert!((cos + 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_day_of_week_monday_is_zero() {
        // 2024-01-01 was a Monday.
        let (_, _, dow) = time_features(local(2024, 1, 1, 10, 0, 0));
        assert_eq!(dow, 0);
        let (_, _, dow) = time_features(local(2024, 1, 7, 10, 0, 0));
        assert_eq!(dow, 6);
    }

    #[test]
    fn test_encode_missing_sensor_is_unknown() {
        let engine = FeatureEngine::new(["sensor.a", "sensor.b"]);
        let mut snapshot = Snapshot::new(local(2024, 1, 1, 8, 30, 0));
        snapshot
            .values
            .insert("sensor.a".to_string(), SensorValue::Number(19.5));

        let record = engine.encode(&snapshot);
        assert_eq!(record.sensors, vec!["19.5".to_string(), UNKNOWN_TOKEN.to_string()]);
    }

    #[test]
    fn test_encode_is_deterministic() {
        let engine = FeatureEngine::new(["sensor.a"]);
        let mut snapshot = Snapshot::new(local(2024, 3, 15, 22, 15, 30));
        snapshot
            .values
            .insert("sensor.a".to_string(), SensorValue::Text("low".into()));

        assert_eq!(engine.encode(&snapshot), engine.encode(&snapshot));
    }

    #[test]
    fn test_training_and_predict_paths_agree() {
        let engine = FeatureEngine::new(["sensor.a"]);
        let at = local(2024, 5, 4, 6, 45, 0);
        let mut snapshot = Snapshot::new(at);
        snapshot
            .values
            .insert("sensor.a".to_string(), SensorValue::Number(17.0));

        let live = engine.encode(&snapshot);
        let stored = TrainingRecord {
            timestamp: at,
            sensors: engine.raw_row(&snapshot),
            target: 21.0,
        };
        let trained = engine.encode_training(&stored);

        assert_eq!(live.time_sin, trained.time_sin);
        assert_eq!(live.time_cos, trained.time_cos);
        assert_eq!(live.day_of_week, trained.day_of_week);
        assert_eq!(live.sensors, trained.sensors);
    }
}
