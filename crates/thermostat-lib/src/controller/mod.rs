//! Closed-loop setpoint controller
//!
//! One tokio task owns all mutable state and processes external events
//! strictly in arrival order: user commands and observed platform changes
//! arrive on a single intake queue, the periodic prediction tick fires on
//! an interval, and worker completions come back over an internal channel
//! onto the same task. Store I/O, training and prediction run on the
//! blocking pool; results are revalidated against current state before
//! being applied, so anything that completed after the world moved on is
//! discarded instead of applied blindly.

mod state;

pub use state::{
    ControlState, HvacMode, Override, PersistedControlState, PresetMode, TickGate, DEFAULT_TARGET,
};

use crate::error::EngineError;
use crate::features::FeatureEngine;
use crate::model::ModelManager;
use crate::models::{SensorValue, Snapshot, TrainingRecord};
use crate::store::TrainingStore;
use async_trait::async_trait;
use chrono::{DateTime, Local, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::time::{interval_at, Instant};
use tracing::{debug, info, warn};

/// Default interval between autonomous prediction ticks.
pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// Default lifetime of a manual override.
pub const DEFAULT_OVERRIDE_DURATION: Duration = Duration::from_secs(60 * 60);

/// A point-in-time reading of the actuator.
///
/// Either field may be unavailable; unavailable values are treated as
/// missing data, never coerced to a number.
#[derive(Debug, Clone)]
pub struct ActuatorReading {
    pub target: SensorValue,
    pub current_temperature: SensorValue,
}

/// The external device the controller drives.
#[async_trait]
pub trait Actuator: Send + Sync {
    /// Forward a new target temperature to the device.
    async fn set_target(&self, value: f64) -> Result<(), EngineError>;

    /// Read the device's current target and measured temperature.
    async fn read(&self) -> ActuatorReading;
}

/// Source of raw sensor snapshots.
#[async_trait]
pub trait SensorReader: Send + Sync {
    /// Read all configured sensors at once.
    async fn snapshot(&self) -> Snapshot;
}

#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Interval between autonomous prediction ticks.
    pub tick_interval: Duration,
    /// How long a manual override suppresses prediction.
    pub override_duration: Duration,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            tick_interval: DEFAULT_TICK_INTERVAL,
            override_duration: DEFAULT_OVERRIDE_DURATION,
        }
    }
}

/// Operations accepted by the controller, delivered over the intake queue.
#[derive(Debug, Clone)]
pub enum Command {
    /// Manual setpoint adjustment: starts an override.
    SetTemperature(f64),
    SetHvacMode(HvacMode),
    /// Preset by display name; invalid names are rejected unchanged.
    SetPresetMode(String),
    /// The actuator's target changed outside of this controller.
    ObservedTargetChange(f64),
    /// Read the full training log and train a replacement model.
    Retrain,
}

/// Completions delivered back from the blocking pool.
#[derive(Debug)]
enum WorkerEvent {
    Prediction {
        generation: u64,
        result: Result<f64, EngineError>,
    },
    Training(Result<DateTime<Utc>, EngineError>),
}

/// Read-only snapshot of controller state, published on a watch channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControllerStatus {
    pub hvac_mode: HvacMode,
    pub preset: PresetMode,
    pub target_temperature: f64,
    pub current_temperature: Option<f64>,
    pub model_trained: bool,
    pub override_active: bool,
    pub override_until: Option<DateTime<Local>>,
}

/// Cloneable front door to a running controller.
#[derive(Clone)]
pub struct ControllerHandle {
    cmd_tx: mpsc::Sender<Command>,
    status_rx: watch::Receiver<ControllerStatus>,
}

impl ControllerHandle {
    pub async fn set_temperature(&self, value: f64) {
        let _ = self.cmd_tx.send(Command::SetTemperature(value)).await;
    }

    pub async fn set_hvac_mode(&self, mode: HvacMode) {
        let _ = self.cmd_tx.send(Command::SetHvacMode(mode)).await;
    }

    pub async fn set_preset_mode(&self, name: impl Into<String>) {
        let _ = self.cmd_tx.send(Command::SetPresetMode(name.into())).await;
    }

    pub async fn observed_target_change(&self, value: f64) {
        let _ = self
            .cmd_tx
            .send(Command::ObservedTargetChange(value))
            .await;
    }

    pub async fn retrain(&self) {
        let _ = self.cmd_tx.send(Command::Retrain).await;
    }

    /// Latest published status.
    pub fn status(&self) -> ControllerStatus {
        self.status_rx.borrow().clone()
    }

    /// Watch side of the status channel, for callers that want to await
    /// changes instead of polling.
    pub fn watch(&self) -> watch::Receiver<ControllerStatus> {
        self.status_rx.clone()
    }
}

/// The reactive controller task. Create with [`Controller::new`], then
/// drive it to completion with [`Controller::run`].
pub struct Controller {
    state: ControlState,
    engine: FeatureEngine,
    store: Arc<TrainingStore>,
    models: Arc<ModelManager>,
    actuator: Arc<dyn Actuator>,
    sensors: Arc<dyn SensorReader>,
    config: ControllerConfig,
    /// Bumped on mode changes and new overrides; in-flight predictions
    /// carry the generation they started under and are discarded on
    /// mismatch.
    generation: u64,
    cmd_rx: mpsc::Receiver<Command>,
    worker_tx: mpsc::Sender<WorkerEvent>,
    worker_rx: mpsc::Receiver<WorkerEvent>,
    status_tx: watch::Sender<ControllerStatus>,
}

impl Controller {
    pub fn new(
        engine: FeatureEngine,
        store: Arc<TrainingStore>,
        models: Arc<ModelManager>,
        actuator: Arc<dyn Actuator>,
        sensors: Arc<dyn SensorReader>,
        config: ControllerConfig,
        restored: Option<PersistedControlState>,
    ) -> (Self, ControllerHandle) {
        let state = restored
            .as_ref()
            .map(ControlState::restored)
            .unwrap_or_default();

        let (cmd_tx, cmd_rx) = mpsc::channel(32);
        let (worker_tx, worker_rx) = mpsc::channel(16);
        let (status_tx, status_rx) = watch::channel(status_of(&state, models.is_trained()));

        let controller = Self {
            state,
            engine,
            store,
            models,
            actuator,
            sensors,
            config,
            generation: 0,
            cmd_rx,
            worker_tx,
            worker_rx,
            status_tx,
        };
        let handle = ControllerHandle { cmd_tx, status_rx };
        (controller, handle)
    }

    /// Run until shutdown or until every handle is dropped.
    pub async fn run(mut self, mut shutdown: broadcast::Receiver<()>) {
        info!(
            interval_secs = self.config.tick_interval.as_secs(),
            mode = %self.state.hvac_mode,
            "Starting controller loop"
        );

        let mut ticker = self.armed_ticker();
        self.publish();

        loop {
            tokio::select! {
                _ = ticker.tick(), if self.state.hvac_mode == HvacMode::Auto => {
                    self.on_tick(Local::now()).await;
                }
                cmd = self.cmd_rx.recv() => match cmd {
                    Some(cmd) => {
                        if self.on_command(cmd).await {
                            ticker = self.armed_ticker();
                        }
                    }
                    None => {
                        info!("All controller handles dropped, stopping");
                        break;
                    }
                },
                Some(event) = self.worker_rx.recv() => {
                    self.on_worker_event(event).await;
                }
                _ = shutdown.recv() => {
                    info!("Shutting down controller loop");
                    break;
                }
            }
        }
    }

    /// A fresh tick interval, first fire one full period from now.
    fn armed_ticker(&self) -> tokio::time::Interval {
        interval_at(
            Instant::now() + self.config.tick_interval,
            self.config.tick_interval,
        )
    }

    /// Handle one command. Returns true when the tick interval must be
    /// re-armed (mode switched to Auto).
    async fn on_command(&mut self, cmd: Command) -> bool {
        match cmd {
            Command::SetTemperature(value) => {
                let now = Local::now();
                self.state
                    .begin_override(now, self.config.override_duration, value);
                self.generation += 1;
                if let Some(active) = self.state.override_state {
                    info!(value, until = %active.until, "Manual override started");
                }

                if self.state.preset == PresetMode::LearningControlling {
                    debug!("Recording manual override as a training sample");
                    self.record_sample(value).await;
                }

                self.apply_target(value).await;
                self.publish();
                false
            }
            Command::SetHvacMode(mode) => {
                let rearm = mode == HvacMode::Auto && self.state.hvac_mode != HvacMode::Auto;
                if self.state.hvac_mode != mode {
                    info!(from = %self.state.hvac_mode, to = %mode, "HVAC mode changed");
                    self.state.hvac_mode = mode;
                    self.generation += 1;
                    self.publish();
                }
                rearm
            }
            Command::SetPresetMode(name) => {
                match name.parse::<PresetMode>() {
                    Ok(preset) => {
                        self.state.preset = preset;
                        self.publish();
                    }
                    Err(()) => warn!(preset = %name, "Unsupported preset mode"),
                }
                false
            }
            Command::ObservedTargetChange(value) => {
                if self.state.preset == PresetMode::LearningControlling {
                    info!(value, "Recording externally observed setpoint change");
                    self.record_sample(value).await;
                }
                false
            }
            Command::Retrain => {
                self.spawn_training();
                false
            }
        }
    }

    /// One scheduled control cycle.
    async fn on_tick(&mut self, now: DateTime<Local>) {
        let reading = self.actuator.read().await;
        self.state.current_temperature = reading.current_temperature.as_number();

        let was_overridden = self.state.override_active();
        match self.state.evaluate_tick(now, self.models.is_trained()) {
            TickGate::Disabled => {}
            TickGate::NotTrained => debug!("Tick skipped: model not trained"),
            TickGate::OverrideActive => debug!("Tick skipped: manual override active"),
            TickGate::Predict => {
                if was_overridden {
                    info!("Manual override has ended");
                }
                self.spawn_prediction().await;
            }
        }
        self.publish();
    }

    /// Snapshot, encode and predict on the blocking pool, tagged with the
    /// current generation.
    async fn spawn_prediction(&self) {
        let snapshot = self.sensors.snapshot().await;
        let record = self.engine.encode(&snapshot);
        let models = Arc::clone(&self.models);
        let generation = self.generation;
        let tx = self.worker_tx.clone();

        tokio::task::spawn_blocking(move || {
            let result = models.predict(&record);
            let _ = tx.blocking_send(WorkerEvent::Prediction { generation, result });
        });
    }

    /// Read the full store and train a replacement model on the blocking
    /// pool.
    fn spawn_training(&self) {
        let store = Arc::clone(&self.store);
        let models = Arc::clone(&self.models);
        let tx = self.worker_tx.clone();

        tokio::task::spawn_blocking(move || {
            let result = store.read_all().and_then(|records| models.train(&records));
            let _ = tx.blocking_send(WorkerEvent::Training(result));
        });
    }

    async fn on_worker_event(&mut self, event: WorkerEvent) {
        match event {
            WorkerEvent::Prediction { generation, result } => {
                if generation != self.generation || self.state.hvac_mode != HvacMode::Auto {
                    debug!("Discarding stale prediction result");
                    return;
                }
                match result {
                    Ok(predicted) => {
                        let target = round_to_tenth(predicted);
                        info!(predicted, target, "Applying predicted target");
                        self.state.target_temperature = target;
                        self.apply_target(target).await;
                        self.publish();
                    }
                    Err(e) => {
                        warn!(error = %e, "Prediction failed, keeping previous target");
                    }
                }
            }
            WorkerEvent::Training(result) => {
                match result {
                    Ok(trained_at) => info!(%trained_at, "Training completed"),
                    Err(EngineError::InsufficientData { have, need }) => {
                        info!(have, need, "Not enough data to train yet");
                    }
                    Err(e) => warn!(error = %e, "Training failed"),
                }
                self.publish();
            }
        }
    }

    /// Synthesize a training record from the current snapshot and append it
    /// off the reactive loop. Store failures are logged and the sample is
    /// dropped; they never propagate.
    async fn record_sample(&self, label: f64) {
        let snapshot = self.sensors.snapshot().await;
        let record = TrainingRecord {
            timestamp: snapshot.taken_at,
            sensors: self.engine.raw_row(&snapshot),
            target: label,
        };
        let store = Arc::clone(&self.store);

        tokio::task::spawn_blocking(move || {
            if let Err(e) = store.append(&record) {
                warn!(error = %e, "Failed to append training sample, dropping it");
            }
        });
    }

    async fn apply_target(&self, value: f64) {
        if let Err(e) = self.actuator.set_target(value).await {
            warn!(error = %e, value, "Failed to forward target to actuator");
        }
    }

    fn publish(&self) {
        let _ = self
            .status_tx
            .send(status_of(&self.state, self.models.is_trained()));
    }
}

fn status_of(state: &ControlState, trained: bool) -> ControllerStatus {
    ControllerStatus {
        hvac_mode: state.hvac_mode,
        preset: state.preset,
        target_temperature: state.target_temperature,
        current_temperature: state.current_temperature,
        model_trained: trained,
        override_active: state.override_active(),
        override_until: state.override_state.map(|o| o.until),
    }
}

/// Round a prediction to one decimal place before applying it.
fn round_to_tenth(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

/// Best-effort load of persisted controller state; absence or corruption
/// just means a fresh start.
pub fn load_persisted_state(path: &Path) -> Option<PersistedControlState> {
    if !path.exists() {
        return None;
    }
    match std::fs::read(path)
        .map_err(EngineError::from)
        .and_then(|bytes| Ok(serde_json::from_slice(&bytes)?))
    {
        Ok(state) => Some(state),
        Err(e) => {
            warn!(error = %e, path = %path.display(), "Ignoring unreadable controller state");
            None
        }
    }
}

/// Persist controller state via temp file + rename.
pub fn save_persisted_state(
    path: &Path,
    state: &PersistedControlState,
) -> Result<(), EngineError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let bytes = serde_json::to_vec_pretty(state)?;
    let temp_path = path.with_extension("tmp");
    std::fs::write(&temp_path, bytes)?;
    std::fs::rename(&temp_path, path)?;
    Ok(())
}
