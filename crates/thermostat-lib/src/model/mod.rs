//! Regression model lifecycle: train, persist, load, predict

mod forest;
mod manager;
mod pipeline;

pub use forest::{ForestConfig, RandomForestRegressor, DEFAULT_SEED, DEFAULT_TREES};
pub use manager::{ModelManager, MIN_TRAINING_SAMPLES};
pub use pipeline::Preprocessor;

use crate::error::EngineError;
use crate::models::{FeatureRecord, FeatureSchema};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A fully built, immutable model artifact.
///
/// Binds the preprocessing transform and the fitted forest to the feature
/// schema that was live when it was trained. Replaced wholesale on
/// retraining, never mutated in place.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Model {
    pub schema: FeatureSchema,
    pub preprocessor: Preprocessor,
    pub forest: RandomForestRegressor,
    pub trained_at: DateTime<Utc>,
}

impl Model {
    /// Predict the target temperature for one record.
    ///
    /// A record produced under a different schema is an explicit
    /// [`EngineError::SchemaMismatch`], never a silently misaligned encode.
    pub fn predict(&self, record: &FeatureRecord) -> Result<f64, EngineError> {
        if *record.schema != self.schema {
            return Err(EngineError::SchemaMismatch {
                expected: self.schema.columns().to_vec(),
                got: record.schema.columns().to_vec(),
            });
        }
        let row = self.preprocessor.transform(record);
        Ok(self.forest.predict(&row))
    }
}
