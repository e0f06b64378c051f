//! Model lifecycle management
//!
//! Owns the single live model behind a read/write lock: readers clone the
//! `Arc` at entry and finish against whatever model they observed, the
//! writer publishes a replacement only after it is fully built. Training
//! and prediction are CPU-bound and must be offloaded by the caller
//! (`spawn_blocking`); nothing here blocks on the reactive loop's behalf.

use super::forest::{ForestConfig, RandomForestRegressor};
use super::pipeline::Preprocessor;
use super::Model;
use crate::error::EngineError;
use crate::features::FeatureEngine;
use crate::models::{FeatureRecord, TrainingRecord};
use chrono::{DateTime, Utc};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};
use tracing::{debug, info, warn};

/// Minimum number of training records before a model can be fitted.
pub const MIN_TRAINING_SAMPLES: usize = 20;

/// Guards the live model and its on-disk artifact.
pub struct ModelManager {
    engine: FeatureEngine,
    forest_config: ForestConfig,
    artifact_path: PathBuf,
    model: RwLock<Option<Arc<Model>>>,
}

impl ModelManager {
    pub fn new(engine: FeatureEngine, artifact_path: impl Into<PathBuf>) -> Self {
        Self::with_forest_config(engine, artifact_path, ForestConfig::default())
    }

    pub fn with_forest_config(
        engine: FeatureEngine,
        artifact_path: impl Into<PathBuf>,
        forest_config: ForestConfig,
    ) -> Self {
        Self {
            engine,
            forest_config,
            artifact_path: artifact_path.into(),
            model: RwLock::new(None),
        }
    }

    /// Best-effort restore of a previously persisted model at startup.
    ///
    /// A missing or unreadable artifact is not an error; it just leaves the
    /// manager untrained until the next training pass. An artifact trained
    /// under a different sensor schema is refused for the same reason a
    /// mismatched record would be.
    pub fn load(&self) {
        if !self.artifact_path.exists() {
            info!("No persisted model found, waiting for training");
            return;
        }

        let loaded = std::fs::read(&self.artifact_path)
            .map_err(EngineError::from)
            .and_then(|bytes| serde_json::from_slice::<Model>(&bytes).map_err(EngineError::from));

        match loaded {
            Ok(model) if model.schema == *self.engine.schema() => {
                info!(trained_at = %model.trained_at, "Loaded persisted model");
                self.swap(Arc::new(model));
            }
            Ok(model) => {
                warn!(
                    artifact_columns = ?model.schema.columns(),
                    live_columns = ?self.engine.schema().columns(),
                    "Persisted model was trained under a different schema, ignoring"
                );
            }
            Err(e) => {
                warn!(error = %e, path = %self.artifact_path.display(), "Failed to load persisted model");
            }
        }
    }

    /// Train a replacement model from the full training log.
    ///
    /// Fails with [`EngineError::InsufficientData`] below
    /// [`MIN_TRAINING_SAMPLES`]. On success the new model is swapped in
    /// first and then persisted; a persistence failure (serialization or
    /// write) is returned as a recoverable [`EngineError::Persist`] while
    /// the model stays live.
    pub fn train(&self, records: &[TrainingRecord]) -> Result<DateTime<Utc>, EngineError> {
        if records.len() < MIN_TRAINING_SAMPLES {
            return Err(EngineError::InsufficientData {
                have: records.len(),
                need: MIN_TRAINING_SAMPLES,
            });
        }

        info!(samples = records.len(), "Starting model training");

        let encoded: Vec<FeatureRecord> = records
            .iter()
            .map(|r| self.engine.encode_training(r))
            .collect();
        let preprocessor = Preprocessor::fit(&encoded);
        let x: Vec<Vec<f64>> = encoded.iter().map(|r| preprocessor.transform(r)).collect();
        let y: Vec<f64> = records.iter().map(|r| r.target).collect();

        let forest = RandomForestRegressor::fit(&x, &y, self.forest_config.clone());
        let trained_at = Utc::now();
        let model = Arc::new(Model {
            schema: (*self.engine.schema()).clone(),
            preprocessor,
            forest,
            trained_at,
        });

        self.swap(Arc::clone(&model));
        info!(samples = records.len(), "Model training completed");

        let artifact = serde_json::to_vec(model.as_ref())
            .map_err(|e| EngineError::Persist(e.to_string()))?;
        if let Err(e) = write_atomically(&self.artifact_path, &artifact) {
            return Err(EngineError::Persist(e.to_string()));
        }
        debug!(path = %self.artifact_path.display(), "Model artifact persisted");

        Ok(trained_at)
    }

    /// Predict the target temperature for one record.
    ///
    /// The live `Arc` is cloned at entry, so a concurrent swap can never
    /// produce a torn read; the prediction completes against whichever
    /// model was current when it started.
    pub fn predict(&self, record: &FeatureRecord) -> Result<f64, EngineError> {
        let model = {
            let guard = self.model.read().unwrap_or_else(PoisonError::into_inner);
            guard.as_ref().map(Arc::clone)
        };
        match model {
            Some(model) => model.predict(record),
            None => Err(EngineError::NotTrained),
        }
    }

    pub fn is_trained(&self) -> bool {
        self.model
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Timestamp of the live model, if any.
    pub fn trained_at(&self) -> Option<DateTime<Utc>> {
        self.model
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(|m| m.trained_at)
    }

    fn swap(&self, model: Arc<Model>) {
        let mut guard = self.model.write().unwrap_or_else(PoisonError::into_inner);
        *guard = Some(model);
    }
}

/// Write the artifact via temp file + rename so readers never observe a
/// partially written blob.
fn write_atomically(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let temp_path = path.with_extension("tmp");
    let mut file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(&temp_path)?;
    file.write_all(bytes)?;
    file.sync_all()?;
    std::fs::rename(&temp_path, path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Local, TimeZone};

    fn test_engine() -> FeatureEngine {
        FeatureEngine::new(["sensor.outdoor"])
    }

    fn linear_records(n: usize) -> Vec<TrainingRecord> {
        // Constant timestamp so the time features carry no signal.
        let at = Local.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
        (0..n)
            .map(|i| TrainingRecord {
                timestamp: at,
                sensors: vec![format!("{}.0", i)],
                target: 2.0 * i as f64 + 5.0,
            })
            .collect()
    }

    #[test]
    fn test_insufficient_data() {
        let dir = tempfile::tempdir().unwrap();
        let manager = ModelManager::new(test_engine(), dir.path().join("model.json"));

        match manager.train(&linear_records(19)) {
            Err(EngineError::InsufficientData { have: 19, need: 20 }) => {}
            other => panic!("expected InsufficientData, got {:?}", other),
        }
        assert!(!manager.is_trained());
    }

    #[test]
    fn test_exactly_twenty_records_trains() {
        let dir = tempfile::tempdir().unwrap();
        let manager = ModelManager::new(test_engine(), dir.path().join("model.json"));

        manager.train(&linear_records(20)).unwrap();
        assert!(manager.is_trained());
        assert!(dir.path().join("model.json").exists());
    }

    #[test]
    fn test_predict_before_training_is_not_trained() {
        let dir = tempfile::tempdir().unwrap();
        let engine = test_engine();
        let manager = ModelManager::new(engine.clone(), dir.path().join("model.json"));

        let record = engine.encode_training(&linear_records(1)[0]);
        match manager.predict(&record) {
            Err(EngineError::NotTrained) => {}
            other => panic!("expected NotTrained, got {:?}", other),
        }
    }

    #[test]
    fn test_schema_mismatch_is_detected() {
        let dir = tempfile::tempdir().unwrap();
        let manager = ModelManager::new(test_engine(), dir.path().join("model.json"));
        manager.train(&linear_records(20)).unwrap();

        let other_engine = FeatureEngine::new(["sensor.outdoor", "sensor.extra"]);
        let mut snapshot = crate::models::Snapshot::new(Local::now());
        snapshot.values.insert(
            "sensor.outdoor".to_string(),
            crate::models::SensorValue::Number(4.0),
        );
        let record = other_engine.encode(&snapshot);

        match manager.predict(&record) {
            Err(EngineError::SchemaMismatch { .. }) => {}
            other => panic!("expected SchemaMismatch, got {:?}", other),
        }
    }

    #[test]
    fn test_persist_failure_keeps_model_live() {
        let dir = tempfile::tempdir().unwrap();
        // A regular file where the artifact's parent directory should be
        // makes every write attempt fail.
        let blocker = dir.path().join("blocked");
        std::fs::write(&blocker, b"").unwrap();

        let engine = test_engine();
        let manager = ModelManager::new(engine.clone(), blocker.join("model.json"));
        match manager.train(&linear_records(20)) {
            Err(EngineError::Persist(_)) => {}
            other => panic!("expected Persist, got {:?}", other),
        }

        assert!(manager.is_trained());
        let record = engine.encode_training(&linear_records(1)[0]);
        assert!(manager.predict(&record).is_ok());
    }

    #[test]
    fn test_load_ignores_missing_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let manager = ModelManager::new(test_engine(), dir.path().join("absent.json"));
        manager.load();
        assert!(!manager.is_trained());
    }

    #[test]
    fn test_load_ignores_corrupt_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.json");
        std::fs::write(&path, b"not a model").unwrap();

        let manager = ModelManager::new(test_engine(), &path);
        manager.load();
        assert!(!manager.is_trained());
    }

    #[test]
    fn test_load_refuses_foreign_schema() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.json");

        let foreign = ModelManager::new(FeatureEngine::new(["sensor.other"]), &path);
        foreign.train(&linear_records(20)).unwrap();

        let manager = ModelManager::new(test_engine(), &path);
        manager.load();
        assert!(!manager.is_trained());
    }
}
