//! Activity-driven power signal.
//!
//! `Active -> Idle` after `idle_timeout` without activity, then
//! `Idle -> DeepSleep` after a further `deep_sleep_delay`. Any recorded
//! activity or an explicit wake-up snaps back to `Active`.
//!
//! The signal only classifies; acting on it (dimming the indicator,
//! powering down readers) is up to the state-change observers.

use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{broadcast, watch};

use crate::config::format_duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PowerState {
    Active,
    Idle,
    DeepSleep,
}

pub type PowerCallback = Arc<dyn Fn(PowerState) + Send + Sync>;

/// Classify inactivity against the two ordered thresholds.
pub fn classify(elapsed: Duration, idle_timeout: Duration, deep_sleep_delay: Duration) -> PowerState {
    if elapsed >= idle_timeout.saturating_add(deep_sleep_delay) {
        PowerState::DeepSleep
    } else if elapsed >= idle_timeout {
        PowerState::Idle
    } else {
        PowerState::Active
    }
}

struct PowerInner {
    state: PowerState,
    last_activity: Instant,
    last_activity_wall: DateTime<Utc>,
}

pub struct PowerSignal {
    /// State and activity clocks, updated together.
    inner: Mutex<PowerInner>,
    /// Inactivity before `Active -> Idle`.
    idle_timeout: Duration,
    /// Further inactivity before `Idle -> DeepSleep`.
    deep_sleep_delay: Duration,
    /// Notified on every actual transition.
    observers: RwLock<Vec<PowerCallback>>,
    /// Fires whenever the signal leaves `DeepSleep`.
    wake_tx: broadcast::Sender<()>,
}

impl PowerSignal {
    pub fn new(idle_timeout: Duration, deep_sleep_delay: Duration) -> Self {
        let (wake_tx, _) = broadcast::channel(8);
        Self {
            inner: Mutex::new(PowerInner {
                state: PowerState::Active,
                last_activity: Instant::now(),
                last_activity_wall: Utc::now(),
            }),
            idle_timeout,
            deep_sleep_delay,
            observers: RwLock::new(Vec::new()),
            wake_tx,
        }
    }

    /// Register an observer for actual state transitions.
    pub fn on_state_change(&self, callback: PowerCallback) {
        self.observers
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push(callback);
    }

    /// Receiver signalled every time the signal leaves `DeepSleep`.
    pub fn wake_receiver(&self) -> broadcast::Receiver<()> {
        self.wake_tx.subscribe()
    }

    /// Current classification.
    pub fn state(&self) -> PowerState {
        self.lock().state
    }

    /// Wall-clock time of the last recorded activity or wake-up.
    pub fn last_activity(&self) -> DateTime<Utc> {
        self.lock().last_activity_wall
    }

    pub fn record_activity(&self) {
        self.record_activity_at(Instant::now());
    }

    /// Reset the idle clock and force `Active`. Notifies only on a change.
    pub fn record_activity_at(&self, now: Instant) {
        let previous = {
            let mut inner = self.lock();
            inner.last_activity = now;
            inner.last_activity_wall = Utc::now();
            std::mem::replace(&mut inner.state, PowerState::Active)
        };
        if previous != PowerState::Active {
            self.transitioned(previous, PowerState::Active);
        }
    }

    pub fn wake_up(&self) -> bool {
        self.wake_up_at(Instant::now())
    }

    /// Leave `DeepSleep`. Returns `false` (and does nothing) in any other state.
    pub fn wake_up_at(&self, now: Instant) -> bool {
        {
            let mut inner = self.lock();
            if inner.state != PowerState::DeepSleep {
                return false;
            }
            inner.state = PowerState::Active;
            inner.last_activity = now;
            inner.last_activity_wall = Utc::now();
        }
        self.transitioned(PowerState::DeepSleep, PowerState::Active);
        true
    }

    pub fn check(&self) -> Vec<PowerState> {
        self.check_at(Instant::now())
    }

    /// Advance the state for elapsed inactivity as of `now`.
    ///
    /// Only moves toward `DeepSleep`; returns every state entered, in order.
    pub fn check_at(&self, now: Instant) -> Vec<PowerState> {
        let (from, entered) = {
            let mut inner = self.lock();
            let elapsed = now.saturating_duration_since(inner.last_activity);
            let target = classify(elapsed, self.idle_timeout, self.deep_sleep_delay);
            let from = inner.state;

            let mut entered = Vec::new();
            if inner.state == PowerState::Active && target >= PowerState::Idle {
                entered.push(PowerState::Idle);
            }
            if inner.state != PowerState::DeepSleep && target == PowerState::DeepSleep {
                entered.push(PowerState::DeepSleep);
            }
            if let Some(last) = entered.last() {
                inner.state = *last;
            }
            (from, entered)
        };

        let mut previous = from;
        for state in &entered {
            self.transitioned(previous, *state);
            previous = *state;
        }
        entered
    }

    fn transitioned(&self, from: PowerState, to: PowerState) {
        log::info!("Power state changed: {:?} -> {:?}", from, to);
        if from == PowerState::DeepSleep {
            // No receivers is fine.
            let _ = self.wake_tx.send(());
        }
        let observers: Vec<PowerCallback> = self
            .observers
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        for observer in observers {
            observer(to);
        }
    }

    fn lock(&self) -> MutexGuard<'_, PowerInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Re-evaluate the power state every `period` until shutdown.
pub async fn run_power_ticker(
    signal: Arc<PowerSignal>,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(period);
    log::info!("Power ticker started (interval: {})", format_duration(period));

    loop {
        if *shutdown.borrow() {
            break;
        }
        tokio::select! {
            _ = ticker.tick() => {
                signal.check();
            }
            changed = shutdown.changed() => {
                if changed.is_err() {
                    break;
                }
            }
        }
    }

    log::info!("Power ticker stopped");
}
