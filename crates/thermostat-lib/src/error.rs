//! Failure taxonomy for the learning/control engine
//!
//! Every worker-offloaded operation reports back through these variants;
//! the controller is the single place that interprets them. None of them
//! may take down the reactive loop.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    /// Training attempted with fewer records than the minimum.
    #[error("not enough training data: have {have}, need {need}")]
    InsufficientData { have: usize, need: usize },

    /// Prediction requested before any successful train or load.
    #[error("prediction requested but no model is trained")]
    NotTrained,

    /// Input columns do not match the schema the model was trained on.
    #[error("feature schema mismatch: expected {expected:?}, got {got:?}")]
    SchemaMismatch {
        expected: Vec<String>,
        got: Vec<String>,
    },

    /// Training log read or write failure. Non-fatal; the sample is dropped.
    #[error("training log error: {0}")]
    Store(#[from] csv::Error),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// Model trained and live in memory, but writing the artifact failed.
    #[error("failed to persist model artifact: {0}")]
    Persist(String),

    /// Model artifact could not be serialized or deserialized.
    #[error("model artifact error: {0}")]
    Artifact(#[from] serde_json::Error),
}
