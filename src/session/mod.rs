//! Bonding session state machine.
//!
//! One session per hub, driven through `handle_event`. Phases advance
//! `Initial -> CollectingTaps -> Validating -> Recording -> Complete`;
//! `reset` re-arms the session back to `CollectingTaps`.
//!
//! Every `reset` starts a new bond generation. Collaborator results that
//! were started for an earlier generation are delivered through
//! `handle_event_for` and rejected as stale.
//!
//! Events are serialized on a single mutex. Phase subscribers and failure
//! observers are invoked after that mutex is released, on the caller's
//! thread, in registration order. A subscriber may call back into the
//! session, but anything long-running belongs on its own task.

pub mod bond_id;

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, RwLock};

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

pub use bond_id::{generate_bond_id, is_valid_bond_id, BOND_ID_LEN};

/// Number of distinct taps that make up one bond.
pub const BOND_SIZE: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Initial,
    CollectingTaps,
    Validating,
    Recording,
    Complete,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Initial => "initial",
            Phase::CollectingTaps => "collecting_taps",
            Phase::Validating => "validating",
            Phase::Recording => "recording",
            Phase::Complete => "complete",
        };
        f.write_str(name)
    }
}

/// Failure reported by an external collaborator. Forwarded to failure
/// observers; the phase is left untouched.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionFailure {
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("recording failed: {0}")]
    Recording(String),
    #[error("validation service unreachable: {0}")]
    Transport(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error("{event} not accepted in phase {actual}")]
    WrongPhase { event: &'static str, actual: Phase },
    #[error("duplicate UID: {0}")]
    DuplicateUid(String),
    #[error("{event} belongs to bond generation {expected}, session is at {actual}")]
    StaleGeneration {
        event: &'static str,
        expected: u64,
        actual: u64,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// A reader reported this UID.
    Tap(String),
    /// The validation service accepted the collected UIDs.
    ValidationSucceeded(Vec<String>),
    RecordingStarted,
    RecordingCompleted,
    Failure(SessionFailure),
}

impl SessionEvent {
    fn name(&self) -> &'static str {
        match self {
            SessionEvent::Tap(_) => "tap",
            SessionEvent::ValidationSucceeded(_) => "validation result",
            SessionEvent::RecordingStarted => "recording start",
            SessionEvent::RecordingCompleted => "recording completion",
            SessionEvent::Failure(_) => "failure",
        }
    }
}

/// Owned copy of the session for status queries.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionSnapshot {
    pub phase: Phase,
    /// UIDs in the order they were tapped.
    pub collected_uids: Vec<String>,
    /// Accounts returned by the validation service, empty until validated.
    pub validated_accounts: Vec<String>,
    /// Empty until validation succeeds.
    pub bond_id: String,
    /// Bumped by every `reset`.
    pub generation: u64,
    /// Wall-clock time of the last handled event.
    pub last_event: Option<DateTime<Utc>>,
}

pub type PhaseCallback = Arc<dyn Fn(Phase) + Send + Sync>;
pub type FailureCallback = Arc<dyn Fn(&SessionFailure) + Send + Sync>;

#[derive(Debug)]
struct SessionState {
    phase: Phase,
    collected_uids: Vec<String>,
    validated_accounts: Vec<String>,
    bond_id: String,
    generation: u64,
    last_event: Option<DateTime<Utc>>,
}

/// What to dispatch once the state lock is gone.
enum Notify {
    Nothing,
    Entered(Phase),
    Failure(SessionFailure),
}

pub struct BondingSession {
    /// Phase, bond contents and generation; one event at a time.
    state: Mutex<SessionState>,
    /// Phase-entry callbacks, keyed by the phase they wait for.
    subscribers: RwLock<HashMap<Phase, Vec<PhaseCallback>>>,
    /// Observers of collaborator failures.
    failure_observers: RwLock<Vec<FailureCallback>>,
}

impl Default for BondingSession {
    fn default() -> Self {
        Self::new()
    }
}

impl BondingSession {
    /// Create a session in `Initial`. Nothing is collected until `start`.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(SessionState {
                phase: Phase::Initial,
                collected_uids: Vec::with_capacity(BOND_SIZE),
                validated_accounts: Vec::new(),
                bond_id: String::new(),
                generation: 0,
                last_event: None,
            }),
            subscribers: RwLock::new(HashMap::new()),
            failure_observers: RwLock::new(Vec::new()),
        }
    }

    /// Arm the session for collection.
    ///
    /// `Initial` moves to `CollectingTaps`; calling it again while already
    /// collecting is a no-op. Any later phase needs `reset` instead.
    pub fn start(&self) -> Result<(), SessionError> {
        let notify = {
            let mut state = self.lock();
            match state.phase {
                Phase::Initial => {
                    state.phase = Phase::CollectingTaps;
                    Notify::Entered(Phase::CollectingTaps)
                }
                Phase::CollectingTaps => Notify::Nothing,
                actual => {
                    return Err(SessionError::WrongPhase {
                        event: "start",
                        actual,
                    })
                }
            }
        };
        self.dispatch(notify);
        Ok(())
    }

    /// Apply one event to whatever bond is current.
    pub fn handle_event(&self, event: SessionEvent) -> Result<(), SessionError> {
        self.apply_locked(None, event, Utc::now())
    }

    /// Apply one event as of `now` (used for the bond ID timestamp).
    pub fn handle_event_at(
        &self,
        event: SessionEvent,
        now: DateTime<Utc>,
    ) -> Result<(), SessionError> {
        self.apply_locked(None, event, now)
    }

    /// Apply a collaborator result that was started for bond `generation`.
    ///
    /// Fails with `StaleGeneration`, leaving the session untouched, if the
    /// session has been reset since.
    pub fn handle_event_for(
        &self,
        generation: u64,
        event: SessionEvent,
    ) -> Result<(), SessionError> {
        self.apply_locked(Some(generation), event, Utc::now())
    }

    pub fn handle_event_for_at(
        &self,
        generation: u64,
        event: SessionEvent,
        now: DateTime<Utc>,
    ) -> Result<(), SessionError> {
        self.apply_locked(Some(generation), event, now)
    }

    fn apply_locked(
        &self,
        generation: Option<u64>,
        event: SessionEvent,
        now: DateTime<Utc>,
    ) -> Result<(), SessionError> {
        let notify = {
            let mut state = self.lock();
            if let Some(expected) = generation {
                if expected != state.generation {
                    return Err(SessionError::StaleGeneration {
                        event: event.name(),
                        expected,
                        actual: state.generation,
                    });
                }
            }
            state.last_event = Some(now);
            Self::apply(&mut state, event, now)?
        };
        self.dispatch(notify);
        Ok(())
    }

    fn apply(
        state: &mut SessionState,
        event: SessionEvent,
        now: DateTime<Utc>,
    ) -> Result<Notify, SessionError> {
        let wrong_phase = SessionError::WrongPhase {
            event: event.name(),
            actual: state.phase,
        };

        match event {
            SessionEvent::Tap(uid) => {
                if state.phase != Phase::CollectingTaps {
                    return Err(wrong_phase);
                }
                if state.collected_uids.contains(&uid) {
                    return Err(SessionError::DuplicateUid(uid));
                }
                state.collected_uids.push(uid);
                if state.collected_uids.len() == BOND_SIZE {
                    state.phase = Phase::Validating;
                    return Ok(Notify::Entered(Phase::Validating));
                }
                Ok(Notify::Nothing)
            }
            SessionEvent::ValidationSucceeded(accounts) => {
                if state.phase != Phase::Validating {
                    return Err(wrong_phase);
                }
                state.validated_accounts = accounts;
                state.bond_id = generate_bond_id(&state.collected_uids, now);
                state.phase = Phase::Recording;
                Ok(Notify::Entered(Phase::Recording))
            }
            SessionEvent::RecordingStarted => {
                if state.phase != Phase::Recording {
                    return Err(wrong_phase);
                }
                Ok(Notify::Nothing)
            }
            SessionEvent::RecordingCompleted => {
                if state.phase != Phase::Recording {
                    return Err(wrong_phase);
                }
                state.phase = Phase::Complete;
                Ok(Notify::Entered(Phase::Complete))
            }
            // Failures leave the phase where it is; recovery is a manual reset.
            SessionEvent::Failure(failure) => Ok(Notify::Failure(failure)),
        }
    }

    /// Unconditionally return to `CollectingTaps` with an empty bond and
    /// start a new generation.
    pub fn reset(&self) {
        {
            let mut state = self.lock();
            state.generation = state.generation.wrapping_add(1);
            state.phase = Phase::CollectingTaps;
            state.collected_uids.clear();
            state.validated_accounts.clear();
            state.bond_id.clear();
        }
        log::info!("Bonding session reset");
        self.dispatch(Notify::Entered(Phase::CollectingTaps));
    }

    /// Register a callback fired every time the session enters `phase`.
    pub fn subscribe(&self, phase: Phase, callback: PhaseCallback) {
        self.subscribers
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .entry(phase)
            .or_default()
            .push(callback);
    }

    pub fn subscribe_failures(&self, observer: FailureCallback) {
        self.failure_observers
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push(observer);
    }

    /// Current phase.
    pub fn phase(&self) -> Phase {
        self.lock().phase
    }

    /// Current bond generation.
    pub fn generation(&self) -> u64 {
        self.lock().generation
    }

    pub fn collected_uids(&self) -> Vec<String> {
        self.lock().collected_uids.clone()
    }

    /// Collected UIDs rendered as canonical tap URLs.
    pub fn formatted_uids(&self) -> Vec<String> {
        self.lock()
            .collected_uids
            .iter()
            .map(|uid| crate::validation::tap_url(uid))
            .collect()
    }

    pub fn validated_accounts(&self) -> Vec<String> {
        self.lock().validated_accounts.clone()
    }

    pub fn bond_id(&self) -> String {
        self.lock().bond_id.clone()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let state = self.lock();
        SessionSnapshot {
            phase: state.phase,
            collected_uids: state.collected_uids.clone(),
            validated_accounts: state.validated_accounts.clone(),
            bond_id: state.bond_id.clone(),
            generation: state.generation,
            last_event: state.last_event,
        }
    }

    fn dispatch(&self, notify: Notify) {
        match notify {
            Notify::Nothing => {}
            Notify::Entered(phase) => {
                log::info!("Bonding session entered phase {}", phase);
                // Copy the list so callbacks may subscribe or re-enter.
                let callbacks: Vec<PhaseCallback> = self
                    .subscribers
                    .read()
                    .unwrap_or_else(|e| e.into_inner())
                    .get(&phase)
                    .cloned()
                    .unwrap_or_default();
                for callback in callbacks {
                    callback(phase);
                }
            }
            Notify::Failure(failure) => {
                log::warn!("Bonding session failure: {}", failure);
                let observers: Vec<FailureCallback> = self
                    .failure_observers
                    .read()
                    .unwrap_or_else(|e| e.into_inner())
                    .clone();
                for observer in observers {
                    observer(&failure);
                }
            }
        }
    }

    fn lock(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}
