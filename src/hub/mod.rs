//! Hub assembly and event orchestration.
//!
//! `Hub` owns the registry, the bonding session, the power signal and the
//! task supervisor, and wires them to the external collaborators:
//!
//! - reader taps -> power activity + `SessionEvent::Tap`
//! - entering `Validating` -> validation call on a detached task, whose
//!   verdict comes back as a normal session event
//! - entering `Recording` -> recorder start; recorder completion ->
//!   `SessionEvent::RecordingCompleted`
//! - phase, failure and power changes -> indicator
//!
//! Every collaborator result is tagged with the bond generation it was
//! started for, so a result that lands after a reset is discarded instead
//! of being applied to the next bond. Re-arming the session also stops a
//! recording still running for the old bond.
//!
//! Apart from those tags the orchestration holds no state.

pub mod status;
#[cfg(test)]
mod tests;

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use thiserror::Error;
use tokio::runtime::Handle;

use crate::config::{ConfigError, HubConfig};
use crate::indicator::{Indicator, IndicatorState};
use crate::power::{run_power_ticker, PowerSignal, PowerState};
use crate::recorder::{Recorder, RecorderError};
use crate::registry::{run_liveness_sweeper, DeviceRegistry, RegistryError, TapMessage};
use crate::session::{BondingSession, Phase, SessionError, SessionEvent, SessionFailure};
use crate::tasks::{ShutdownReport, TaskSupervisor};
use crate::validation::Validator;

pub use status::{hub_name, HubStatus};

#[derive(Debug, Error)]
pub enum HubError {
    #[error("the hub must be created inside a tokio runtime")]
    NoRuntime,
    #[error("failed to start bonding session: {0}")]
    Start(#[from] SessionError),
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),
    #[error("hub already started")]
    AlreadyStarted,
}

pub struct Hub<V: Validator> {
    config: HubConfig,
    /// Host name, reported in `status`.
    name: String,
    /// Known readers and their liveness.
    registry: Arc<DeviceRegistry>,
    /// The single bonding session.
    session: Arc<BondingSession>,
    /// Activity-driven power state.
    power: Arc<PowerSignal>,
    validator: Arc<V>,
    recorder: Arc<dyn Recorder>,
    indicator: Arc<dyn Indicator>,
    /// Periodic loops and in-flight collaborator calls.
    tasks: Arc<TaskSupervisor>,
    /// Runtime captured at construction, for spawning from callbacks.
    runtime: Handle,
    /// Set by the first successful `start`.
    started: AtomicBool,
}

impl<V: Validator> Hub<V> {
    /// Build every component and wire the event flow.
    pub fn new(
        config: HubConfig,
        validator: V,
        recorder: Arc<dyn Recorder>,
        indicator: Arc<dyn Indicator>,
    ) -> Result<Self, HubError> {
        let runtime = Handle::try_current().map_err(|_| HubError::NoRuntime)?;
        config.validate()?;

        let hub = Self {
            name: hub_name(),
            registry: Arc::new(DeviceRegistry::new(config.registry.liveness_timeout)),
            session: Arc::new(BondingSession::new()),
            power: Arc::new(PowerSignal::new(
                config.power.idle_timeout,
                config.power.deep_sleep_delay,
            )),
            validator: Arc::new(validator),
            recorder,
            indicator,
            tasks: Arc::new(TaskSupervisor::new()),
            runtime,
            started: AtomicBool::new(false),
            config,
        };
        hub.wire();
        Ok(hub)
    }

    fn wire(&self) {
        self.wire_taps();
        self.wire_validation();
        self.wire_recording();
        self.wire_indicator();
    }

    fn wire_taps(&self) {
        let power = self.power.clone();
        let session = self.session.clone();
        self.registry
            .set_tap_handler(Arc::new(move |msg: &TapMessage| {
                power.record_activity();
                if let Err(e) = session.handle_event(SessionEvent::Tap(msg.uid.clone())) {
                    log::warn!("Tap {} from {} rejected: {}", msg.uid, msg.device_id, e);
                }
            }));
    }

    fn wire_validation(&self) {
        // Subscribers live inside the session, so they hold it weakly.
        let session = Arc::downgrade(&self.session);
        let validator = self.validator.clone();
        let tasks = self.tasks.clone();
        let runtime = self.runtime.clone();
        let indicator = self.indicator.clone();

        self.session.subscribe(
            Phase::Validating,
            Arc::new(move |_: Phase| {
                indicator.set_state(IndicatorState::Waiting);
                let Some(live) = session.upgrade() else {
                    return;
                };
                // UIDs and generation from one snapshot, so they describe the same bond.
                let bond = live.snapshot();
                log::info!(
                    "Validating UIDs: {:?} (bond generation {})",
                    bond.collected_uids,
                    bond.generation
                );

                let session = session.clone();
                let validator = validator.clone();
                tasks.spawn_outstanding(&runtime, async move {
                    validate_and_report(validator, session, bond.generation, bond.collected_uids)
                        .await;
                });
            }),
        );
    }

    fn wire_recording(&self) {
        // Generation of the bond the recorder is (or was last) recording.
        let recording_for = Arc::new(AtomicU64::new(0));

        let session = Arc::downgrade(&self.session);
        let recorder = self.recorder.clone();
        let indicator = self.indicator.clone();
        let generation = recording_for.clone();
        self.session.subscribe(
            Phase::Recording,
            Arc::new(move |_: Phase| {
                let Some(session) = session.upgrade() else {
                    return;
                };
                indicator.set_state(IndicatorState::Success);
                let bond = session.generation();
                generation.store(bond, Ordering::SeqCst);
                log::info!("Starting message recording...");
                // The session lock is already released here, so reporting
                // straight back into it is safe.
                let started = recorder.start_recording();
                let event = match &started {
                    Ok(()) => SessionEvent::RecordingStarted,
                    Err(e) => SessionEvent::Failure(SessionFailure::Recording(e.to_string())),
                };
                if let Err(e) = session.handle_event_for(bond, event) {
                    log::warn!("Recording start not applied: {}", e);
                    // The bond moved on while the recorder was starting.
                    if started.is_ok() {
                        let _ = recorder.stop_recording();
                    }
                }
            }),
        );

        // Entering CollectingTaps means a fresh bond: end any old recording.
        // Its completion then carries a stale generation and is dropped.
        let recorder = self.recorder.clone();
        self.session.subscribe(
            Phase::CollectingTaps,
            Arc::new(move |_: Phase| match recorder.stop_recording() {
                Ok(()) => log::info!("Stopped recording left over from the previous bond"),
                Err(RecorderError::NotRecording) => {}
                Err(e) => log::warn!("Failed to stop recorder: {}", e),
            }),
        );

        let session = Arc::downgrade(&self.session);
        let generation = recording_for;
        self.recorder.set_on_finished(Arc::new(move || {
            let Some(session) = session.upgrade() else {
                return;
            };
            let bond = generation.load(Ordering::SeqCst);
            match session.handle_event_for(bond, SessionEvent::RecordingCompleted) {
                Ok(()) => {}
                Err(SessionError::StaleGeneration { .. }) => {
                    log::info!("Discarding completion of a recording for reset bond {}", bond)
                }
                Err(e) => log::warn!("Recording completion not applied: {}", e),
            }
        }));
    }

    fn wire_indicator(&self) {
        let indicator = self.indicator.clone();
        self.session.subscribe(
            Phase::CollectingTaps,
            Arc::new(move |_: Phase| indicator.set_state(IndicatorState::Idle)),
        );

        let indicator = self.indicator.clone();
        self.session
            .subscribe_failures(Arc::new(move |_: &SessionFailure| {
                indicator.set_state(IndicatorState::Error);
            }));

        let indicator = self.indicator.clone();
        self.power.on_state_change(Arc::new(move |state: PowerState| match state {
            PowerState::DeepSleep => indicator.set_state(IndicatorState::Off),
            PowerState::Active => indicator.set_state(IndicatorState::Idle),
            PowerState::Idle => {}
        }));
    }

    /// Arm the session and start the periodic loops. Only the first call
    /// succeeds; later calls fail with `AlreadyStarted`.
    pub fn start(&self) -> Result<(), HubError> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(HubError::AlreadyStarted);
        }
        log::info!("Starting hub {}", self.name);
        if let Err(e) = self.session.start() {
            self.started.store(false, Ordering::SeqCst);
            return Err(e.into());
        }
        self.indicator.set_state(IndicatorState::Idle);

        let registry = self.registry.clone();
        let sweep_interval = self.config.registry.sweep_interval;
        let shutdown = self.tasks.shutdown_signal();
        let _guard = self.runtime.enter();
        self.tasks.spawn_periodic(
            "liveness-sweeper",
            run_liveness_sweeper(registry, sweep_interval, shutdown),
        );

        let power = self.power.clone();
        let check_interval = self.config.power.check_interval;
        let shutdown = self.tasks.shutdown_signal();
        self.tasks.spawn_periodic(
            "power-ticker",
            run_power_ticker(power, check_interval, shutdown),
        );
        Ok(())
    }

    /// Route an inbound transport message to the registry.
    pub fn handle_message(&self, topic: &str, payload: &[u8]) -> Result<(), RegistryError> {
        self.registry.handle_message(topic, payload)
    }

    /// Tap from the hub's own reader (no registry involvement).
    pub fn local_tap(&self, uid: &str) -> Result<(), SessionError> {
        log::info!("NFC tap detected: {}", uid);
        self.power.record_activity();
        self.session.handle_event(SessionEvent::Tap(uid.to_string()))
    }

    /// Re-arm the bonding session for a new bond.
    ///
    /// Validation still in flight for the old bond is ignored when it
    /// returns, and a running recording is stopped.
    pub fn reset(&self) {
        self.session.reset();
    }

    pub fn wake_up(&self) -> bool {
        self.power.wake_up()
    }

    pub fn status(&self) -> HubStatus {
        let session = self.session.snapshot();
        HubStatus {
            hub_name: self.name.clone(),
            phase: session.phase,
            power_state: self.power.state(),
            indicator: self.indicator.state(),
            uids: session.collected_uids,
            bond_id: session.bond_id,
            last_activity: self.power.last_activity(),
            devices: self.registry.list_devices(),
        }
    }

    /// Stop periodic loops, wait (bounded) for in-flight validation, then
    /// stop the recorder and darken the indicator.
    pub async fn shutdown(&self) -> ShutdownReport {
        log::info!("Initiating graceful shutdown...");
        let report = self.tasks.shutdown(self.config.shutdown_timeout).await;

        match self.recorder.stop_recording() {
            Ok(()) | Err(RecorderError::NotRecording) => {}
            Err(e) => log::warn!("Failed to stop recorder: {}", e),
        }
        self.indicator.set_state(IndicatorState::Off);
        log::info!("Shutdown complete");
        report
    }

    pub fn config(&self) -> &HubConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<DeviceRegistry> {
        &self.registry
    }

    pub fn session(&self) -> &Arc<BondingSession> {
        &self.session
    }

    pub fn power(&self) -> &Arc<PowerSignal> {
        &self.power
    }

    pub fn tasks(&self) -> &Arc<TaskSupervisor> {
        &self.tasks
    }

    pub fn validator(&self) -> &Arc<V> {
        &self.validator
    }
}

/// Run one validation call and feed the verdict back into the session.
async fn validate_and_report<V: Validator>(
    validator: Arc<V>,
    session: Weak<BondingSession>,
    generation: u64,
    uids: Vec<String>,
) {
    let event = match validator.validate(uids).await {
        Ok(resp) if resp.valid => {
            log::info!("UIDs validated successfully: {:?}", resp.accounts);
            SessionEvent::ValidationSucceeded(resp.accounts)
        }
        Ok(resp) => {
            let reason = resp.reason.unwrap_or_else(|| "rejected".to_string());
            log::warn!("UID validation failed: {}", reason);
            SessionEvent::Failure(SessionFailure::Validation(reason))
        }
        Err(e) => {
            log::warn!("UID validation error: {}", e);
            SessionEvent::Failure(SessionFailure::Transport(e.to_string()))
        }
    };

    let Some(session) = session.upgrade() else {
        return;
    };
    match session.handle_event_for(generation, event) {
        Ok(()) => {}
        Err(SessionError::StaleGeneration { .. }) => {
            log::info!("Discarding validation result for reset bond {}", generation)
        }
        Err(e) => log::warn!("Validation result not applied: {}", e),
    }
}
