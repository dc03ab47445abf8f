//! Message recorder collaborator.
//!
//! Audio capture itself lives outside the hub. `TimedRecorder` stands in
//! for it: a recording runs until stopped or until `max_duration` elapses,
//! and each recording reports completion exactly once.

use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RecorderState {
    Idle,
    Recording,
    Finished,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RecorderError {
    #[error("a recording is already in progress")]
    AlreadyRecording,
    #[error("no recording in progress")]
    NotRecording,
}

pub type FinishedCallback = Arc<dyn Fn() + Send + Sync>;

pub trait Recorder: Send + Sync + 'static {
    fn start_recording(&self) -> Result<(), RecorderError>;
    fn stop_recording(&self) -> Result<(), RecorderError>;
    fn state(&self) -> RecorderState;
    /// Install the callback fired when a recording finishes.
    fn set_on_finished(&self, callback: FinishedCallback);
}

struct Shared {
    state: Mutex<(RecorderState, u64)>,
    on_finished: RwLock<Option<FinishedCallback>>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, (RecorderState, u64)> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Finish recording `generation` if it is still the live one.
    fn finish(&self, generation: u64) -> bool {
        {
            let mut guard = self.lock();
            if guard.0 != RecorderState::Recording || guard.1 != generation {
                return false;
            }
            guard.0 = RecorderState::Finished;
        }
        log::info!("Recording {} finished", generation);
        let callback = self
            .on_finished
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        if let Some(callback) = callback {
            callback();
        }
        true
    }
}

/// Recorder that finishes on its own after `max_duration`.
pub struct TimedRecorder {
    shared: Arc<Shared>,
    max_duration: Duration,
}

impl TimedRecorder {
    pub fn new(max_duration: Duration) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new((RecorderState::Idle, 0)),
                on_finished: RwLock::new(None),
            }),
            max_duration,
        }
    }
}

impl Recorder for TimedRecorder {
    fn start_recording(&self) -> Result<(), RecorderError> {
        let generation = {
            let mut guard = self.shared.lock();
            if guard.0 == RecorderState::Recording {
                return Err(RecorderError::AlreadyRecording);
            }
            guard.0 = RecorderState::Recording;
            guard.1 += 1;
            guard.1
        };
        log::info!(
            "Recording {} started (max {}s)",
            generation,
            self.max_duration.as_secs()
        );

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let shared = self.shared.clone();
                let max_duration = self.max_duration;
                handle.spawn(async move {
                    tokio::time::sleep(max_duration).await;
                    shared.finish(generation);
                });
            }
            Err(_) => log::warn!("No runtime available; recording ends only on stop"),
        }
        Ok(())
    }

    fn stop_recording(&self) -> Result<(), RecorderError> {
        let generation = {
            let guard = self.shared.lock();
            if guard.0 != RecorderState::Recording {
                return Err(RecorderError::NotRecording);
            }
            guard.1
        };
        self.shared.finish(generation);
        Ok(())
    }

    fn state(&self) -> RecorderState {
        self.shared.lock().0
    }

    fn set_on_finished(&self, callback: FinishedCallback) {
        *self
            .shared
            .on_finished
            .write()
            .unwrap_or_else(|e| e.into_inner()) = Some(callback);
    }
}
