//! Visual feedback for the hub (the LED ring on real hardware).
//!
//! The hub only decides *which* state to show; rendering belongs to the
//! `Indicator` implementation. `LogIndicator` logs transitions.

use std::sync::Mutex;

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IndicatorState {
    /// Dark: deep sleep or shutdown.
    Off,
    /// Awake, waiting for taps.
    Idle,
    /// Validation in flight.
    Waiting,
    /// Bond validated, recording.
    Success,
    /// A collaborator reported a failure.
    Error,
}

impl IndicatorState {
    /// Human-readable label for logs and status output.
    pub fn label(&self) -> &str {
        match self {
            IndicatorState::Off => "Off",
            IndicatorState::Idle => "Ready",
            IndicatorState::Waiting => "Validating...",
            IndicatorState::Success => "Bonded",
            IndicatorState::Error => "Error",
        }
    }
}

pub trait Indicator: Send + Sync + 'static {
    fn set_state(&self, state: IndicatorState);
    fn state(&self) -> IndicatorState;
}

/// Indicator that logs each change and remembers the current state.
pub struct LogIndicator {
    current: Mutex<IndicatorState>,
}

impl Default for LogIndicator {
    fn default() -> Self {
        Self {
            current: Mutex::new(IndicatorState::Off),
        }
    }
}

impl Indicator for LogIndicator {
    fn set_state(&self, state: IndicatorState) {
        let mut current = self.current.lock().unwrap_or_else(|e| e.into_inner());
        if *current != state {
            log::info!("Indicator: {} -> {}", current.label(), state.label());
            *current = state;
        }
    }

    fn state(&self) -> IndicatorState {
        *self.current.lock().unwrap_or_else(|e| e.into_inner())
    }
}
