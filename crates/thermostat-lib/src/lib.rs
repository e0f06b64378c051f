//! Engine library for the learning thermostat
//!
//! This crate provides the core functionality for:
//! - Feature encoding of raw sensor snapshots
//! - Append-only training data collection
//! - Regression model training, persistence and prediction
//! - The closed-loop setpoint controller state machine

pub mod controller;
pub mod error;
pub mod features;
pub mod model;
pub mod models;
pub mod store;

pub use controller::{
    Actuator, ActuatorReading, Controller, ControllerConfig, ControllerHandle, ControllerStatus,
    HvacMode, PresetMode, SensorReader,
};
pub use error::EngineError;
pub use features::FeatureEngine;
pub use model::{ModelManager, MIN_TRAINING_SAMPLES};
pub use models::*;
pub use store::TrainingStore;
