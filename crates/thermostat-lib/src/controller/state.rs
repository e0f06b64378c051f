//! Controller state machine
//!
//! Pure state: mode, preset, override window, current target and last
//! measured temperature. All mutation happens on the reactive loop; the
//! async plumbing lives in the parent module.

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Default target before any restore, prediction or override.
pub const DEFAULT_TARGET: f64 = 21.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HvacMode {
    Off,
    Auto,
}

impl fmt::Display for HvacMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HvacMode::Off => write!(f, "off"),
            HvacMode::Auto => write!(f, "auto"),
        }
    }
}

/// Sub-mode of Auto: whether manual and observed adjustments are also
/// recorded as training data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PresetMode {
    Controlling,
    LearningControlling,
}

impl PresetMode {
    pub const CONTROLLING: &'static str = "Controlling";
    pub const LEARNING_CONTROLLING: &'static str = "Learning & Controlling";

    pub fn name(&self) -> &'static str {
        match self {
            PresetMode::Controlling => Self::CONTROLLING,
            PresetMode::LearningControlling => Self::LEARNING_CONTROLLING,
        }
    }
}

impl fmt::Display for PresetMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for PresetMode {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            Self::CONTROLLING => Ok(PresetMode::Controlling),
            Self::LEARNING_CONTROLLING => Ok(PresetMode::LearningControlling),
            _ => Err(()),
        }
    }
}

/// An active manual override: autonomous prediction is suppressed until
/// `until`, which is only evaluated at the next scheduled tick.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Override {
    pub until: DateTime<Local>,
    pub value: f64,
}

/// What a tick should do, decided against current state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickGate {
    /// Mode is Off; the tick is inert.
    Disabled,
    /// No trained model yet; skip this cycle.
    NotTrained,
    /// A manual override is still active; skip prediction.
    OverrideActive,
    /// Proceed with snapshot, encode and predict.
    Predict,
}

/// Mutable controller state, owned by the reactive loop.
#[derive(Debug, Clone)]
pub struct ControlState {
    pub hvac_mode: HvacMode,
    pub preset: PresetMode,
    pub override_state: Option<Override>,
    pub target_temperature: f64,
    pub current_temperature: Option<f64>,
}

impl Default for ControlState {
    fn default() -> Self {
        Self {
            hvac_mode: HvacMode::Off,
            preset: PresetMode::LearningControlling,
            override_state: None,
            target_temperature: DEFAULT_TARGET,
            current_temperature: None,
        }
    }
}

impl ControlState {
    /// Seed state from a previously persisted snapshot.
    pub fn restored(persisted: &PersistedControlState) -> Self {
        Self {
            hvac_mode: persisted.hvac_mode,
            preset: persisted.preset,
            target_temperature: persisted.target_temperature,
            ..Self::default()
        }
    }

    /// Begin a manual override for `duration` starting at `now`.
    pub fn begin_override(&mut self, now: DateTime<Local>, duration: Duration, value: f64) {
        let until = now + chrono::Duration::from_std(duration).unwrap_or(chrono::Duration::zero());
        self.override_state = Some(Override { until, value });
        self.target_temperature = value;
    }

    /// Decide what the current tick should do, clearing an expired override
    /// on the way through. Expiry is tick-driven: an override ends at the
    /// first tick at or after its deadline, not at the deadline itself.
    pub fn evaluate_tick(&mut self, now: DateTime<Local>, trained: bool) -> TickGate {
        if self.hvac_mode != HvacMode::Auto {
            return TickGate::Disabled;
        }
        if !trained {
            return TickGate::NotTrained;
        }
        if let Some(active) = self.override_state {
            if now < active.until {
                return TickGate::OverrideActive;
            }
            self.override_state = None;
        }
        TickGate::Predict
    }

    pub fn override_active(&self) -> bool {
        self.override_state.is_some()
    }
}

/// Controller state that survives restarts: mode, preset and target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedControlState {
    pub hvac_mode: HvacMode,
    pub preset: PresetMode,
    pub target_temperature: f64,
}

impl From<&ControlState> for PersistedControlState {
    fn from(state: &ControlState) -> Self {
        Self {
            hvac_mode: state.hvac_mode,
            preset: state.preset,
            target_temperature: state.target_temperature,
        }
    }
}
