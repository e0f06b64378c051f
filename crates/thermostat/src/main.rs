//! Learning thermostat daemon
//!
//! Wires the engine library to the file-backed platform adapter: loads
//! configuration, restores persisted controller state and any previously
//! trained model, kicks an initial training pass, and runs the controller
//! until SIGINT.

use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use thermostat_lib::controller::{load_persisted_state, save_persisted_state, PersistedControlState};
use thermostat_lib::{
    Controller, ControllerConfig, FeatureEngine, ModelManager, TrainingStore,
};
use tokio::sync::broadcast;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod config;
mod platform;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and env filter
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json())
        .init();

    info!("Starting thermostatd");

    let config = config::ThermostatConfig::load()?;
    if config.sensors.is_empty() {
        warn!("No sensors configured; the model will learn from time features only");
    }
    info!(
        name = %config.name,
        actuator = %config.actuator,
        sensors = config.sensors.len(),
        "Thermostat configured"
    );

    let engine = FeatureEngine::new(&config.sensors);
    let store = Arc::new(TrainingStore::new(
        config.training_log_path(),
        engine.schema(),
    ));
    let models = Arc::new(ModelManager::new(
        engine.clone(),
        config.model_artifact_path(),
    ));
    models.load();

    let adapter = Arc::new(platform::StateFile::new(
        &config.states_path,
        &config.command_path,
        config.sensors.clone(),
        config.actuator.clone(),
    ));

    let restored = load_persisted_state(&config.controller_state_path());
    if restored.is_some() {
        info!("Restored controller state from previous run");
    }

    let (controller, handle) = Controller::new(
        engine,
        store,
        models,
        adapter.clone(),
        adapter.clone(),
        ControllerConfig {
            tick_interval: Duration::from_secs(config.tick_interval_secs),
            override_duration: Duration::from_secs(config.override_minutes * 60),
        },
        restored,
    );

    let (shutdown_tx, _) = broadcast::channel(1);
    let controller_task = tokio::spawn(controller.run(shutdown_tx.subscribe()));
    let watcher_task = tokio::spawn(platform::watch_external_changes(
        adapter,
        handle.clone(),
        Duration::from_secs(config.poll_interval_secs),
        shutdown_tx.subscribe(),
    ));

    // Train from whatever the log already holds; harmless when the log is
    // still short.
    handle.retrain().await;

    tokio::signal::ctrl_c().await?;
    info!("SIGINT received, shutting down");

    let final_state = PersistedControlState {
        hvac_mode: handle.status().hvac_mode,
        preset: handle.status().preset,
        target_temperature: handle.status().target_temperature,
    };
    if let Err(e) = save_persisted_state(&config.controller_state_path(), &final_state) {
        warn!(error = %e, "Failed to save controller state");
    }

    let _ = shutdown_tx.send(());
    let _ = controller_task.await;
    let _ = watcher_task.await;

    info!("Shutdown complete");
    Ok(())
}
