//! Append-only training log
//!
//! One CSV row per labelled sample: `timestamp, <sensor columns…>,
//! target_temperature`. The header is written once when the file is first
//! created; rows are never edited or deleted. Append failures are reported
//! to the caller, which logs and drops the sample — losing one data point
//! is acceptable, crashing the control loop is not.

use crate::error::EngineError;
use crate::models::{FeatureSchema, TrainingRecord};
use chrono::{DateTime, Local};
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, info};

const TIMESTAMP_COLUMN: &str = "timestamp";
const TARGET_COLUMN: &str = "target_temperature";

/// Persistent, append-only log of labelled training samples.
pub struct TrainingStore {
    path: PathBuf,
    schema: Arc<FeatureSchema>,
    /// Appends come in from detached blocking tasks; serializing them keeps
    /// the header-on-first-write check race-free and rows whole.
    write_lock: Mutex<()>,
}

impl TrainingStore {
    pub fn new(path: impl Into<PathBuf>, schema: Arc<FeatureSchema>) -> Self {
        Self {
            path: path.into(),
            schema,
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The fixed column header: timestamp, sensor columns, label.
    fn header(&self) -> Vec<String> {
        let mut header = Vec::with_capacity(self.schema.len() + 2);
        header.push(TIMESTAMP_COLUMN.to_string());
        header.extend(self.schema.columns().iter().cloned());
        header.push(TARGET_COLUMN.to_string());
        header
    }

    /// Append one record, initializing the file with the header if absent.
    pub fn append(&self, record: &TrainingRecord) -> Result<(), EngineError> {
        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);

        let new_file = !self.path.exists();
        if new_file {
            if let Some(parent) = self.path.parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent)?;
                }
            }
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(file);

        if new_file {
            writer.write_record(&self.header())?;
            info!(path = %self.path.display(), "Initialized training log");
        }

        let mut row = Vec::with_capacity(self.schema.len() + 2);
        row.push(record.timestamp.to_rfc3339());
        row.extend(record.sensors.iter().cloned());
        row.push(format!("{}", record.target));
        writer.write_record(&row)?;
        writer.flush()?;

        debug!(target = record.target, "Appended training sample");
        Ok(())
    }

    /// Full scan of the log, used only by training.
    ///
    /// The on-disk header is verified against the live schema so a log
    /// written under a different sensor set fails loudly instead of feeding
    /// misaligned columns into the model.
    pub fn read_all(&self) -> Result<Vec<TrainingRecord>, EngineError> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }

        let mut reader = csv::Reader::from_path(&self.path)?;
        let expected = self.header();
        let found: Vec<String> = reader.headers()?.iter().map(str::to_string).collect();
        if found != expected {
            return Err(EngineError::SchemaMismatch {
                expected,
                got: found,
            });
        }

        let mut records = Vec::new();
        for row in reader.records() {
            let row = row?;
            if row.len() != self.schema.len() + 2 {
                debug!(len = row.len(), "Skipping malformed training row");
                continue;
            }

            let timestamp = match DateTime::parse_from_rfc3339(&row[0]) {
                Ok(ts) => ts.with_timezone(&Local),
                Err(e) => {
                    debug!(error = %e, "Skipping row with unparsable timestamp");
                    continue;
                }
            };
            let target = match row[row.len() - 1].parse::<f64>() {
                Ok(t) => t,
                Err(e) => {
                    debug!(error = %e, "Skipping row with unparsable target");
                    continue;
                }
            };
            let sensors = row
                .iter()
                .skip(1)
                .take(self.schema.len())
                .map(str::to_string)
                .collect();

            records.push(TrainingRecord {
                timestamp,
                sensors,
                target,
            });
        }

        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn test_schema() -> Arc<FeatureSchema> {
        Arc::new(FeatureSchema::from_sensor_ids(["sensor.a", "sensor.b"]))
    }

    fn test_record(target: f64) -> TrainingRecord {
        TrainingRecord {
            timestamp: Local.with_ymd_and_hms(2024, 1, 15, 8, 0, 0).unwrap(),
            sensors: vec!["19.5".to_string(), "on".to_string()],
            target,
        }
    }

    #[test]
    fn test_append_and_read_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = TrainingStore::new(dir.path().join("log.csv"), test_schema());

        store.append(&test_record(21.0)).unwrap();
        store.append(&test_record(22.5)).unwrap();

        let records = store.read_all().unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].target, 21.0);
        assert_eq!(records[1].target, 22.5);
        assert_eq!(records[0].sensors, vec!["19.5", "on"]);
        assert_eq!(records[0].timestamp, test_record(21.0).timestamp);
    }

    #[test]
    fn test_header_written_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("log.csv");
        let store = TrainingStore::new(&path, test_schema());

        store.append(&test_record(21.0)).unwrap();
        store.append(&test_record(21.5)).unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        let header_lines = contents
            .lines()
            .filter(|l| l.starts_with("timestamp"))
            .count();
        assert_eq!(header_lines, 1);
        assert!(contents.starts_with("timestamp,sensor_a,sensor_b,target_temperature"));
    }

    #[test]
    fn test_concurrent_first_appends_write_one_header() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("log.csv");
        let store = Arc::new(TrainingStore::new(&path, test_schema()));

        let barrier = Arc::new(std::sync::Barrier::new(8));
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let store = Arc::clone(&store);
                let barrier = Arc::clone(&barrier);
                std::thread::spawn(move || {
                    barrier.wait();
                    store.append(&test_record(20.0 + i as f64)).unwrap();
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let contents = std::fs::read_to_string(&path).unwrap();
        let header_lines = contents
            .lines()
            .filter(|l| l.starts_with("timestamp"))
            .count();
        assert_eq!(header_lines, 1);
        assert_eq!(store.read_all().unwrap().len(), 8);
    }

    #[test]
    fn test_read_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = TrainingStore::new(dir.path().join("absent.csv"), test_schema());
        assert!(store.read_all().unwrap().is_empty());
    }

    #[test]
    fn test_header_drift_is_schema_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("log.csv");
        std::fs::write(&path, "timestamp,sensor_other,target_temperature\n").unwrap();

        let store = TrainingStore::new(&path, test_schema());
        match store.read_all() {
            Err(EngineError::SchemaMismatch { .. }) => {}
            other => panic!("expected SchemaMismatch, got {:?}", other.map(|r| r.len())),
        }
    }
}
