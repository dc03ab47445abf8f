//! End-to-end tests for the hub orchestration.
//!
//! Uses mock validators that accept, reject, fail or stall.

#[cfg(test)]
mod hub_flow_tests {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::{Duration, Instant};

    use crate::config::{ConfigError, HubConfig};
    use crate::hub::{Hub, HubError};
    use crate::indicator::{Indicator, IndicatorState, LogIndicator};
    use crate::power::PowerState;
    use crate::recorder::{Recorder, RecorderState, TimedRecorder};
    use crate::registry::{DeviceStatus, TOPIC_REGISTER, TOPIC_TAP};
    use crate::session::{is_valid_bond_id, Phase, SessionError};
    use crate::validation::{ValidationError, ValidationResponse, Validator};

    // ── Mock Validator ───────────────────────────────────────────────────

    enum Verdict {
        Accept(Vec<String>),
        /// Accept, with one account derived from each UID.
        Echo,
        Reject(&'static str),
        Fail,
    }

    struct MockValidator {
        verdict: Verdict,
        delay: Duration,
        call_count: AtomicU32,
        seen: Mutex<Vec<Vec<String>>>,
    }

    impl MockValidator {
        fn new(verdict: Verdict) -> Self {
            Self {
                verdict,
                delay: Duration::ZERO,
                call_count: AtomicU32::new(0),
                seen: Mutex::new(Vec::new()),
            }
        }

        fn stalled(verdict: Verdict, delay: Duration) -> Self {
            Self {
                delay,
                ..Self::new(verdict)
            }
        }

        fn calls(&self) -> u32 {
            self.call_count.load(Ordering::SeqCst)
        }
    }

    impl Validator for MockValidator {
        async fn validate(&self, uids: Vec<String>) -> Result<ValidationResponse, ValidationError> {
            self.call_count.fetch_add(1, Ordering::SeqCst);
            self.seen.lock().unwrap().push(uids.clone());
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            match &self.verdict {
                Verdict::Accept(accounts) => Ok(ValidationResponse::accepted(accounts.clone())),
                Verdict::Echo => Ok(ValidationResponse::accepted(
                    uids.iter().map(|uid| format!("acct-{}", uid)).collect(),
                )),
                Verdict::Reject(reason) => Ok(ValidationResponse::rejected(*reason)),
                Verdict::Fail => Err(ValidationError::Status {
                    status: 500,
                    body: "internal error".to_string(),
                }),
            }
        }
    }

    // ── Helpers ──────────────────────────────────────────────────────────

    fn test_config() -> HubConfig {
        let mut config = HubConfig::default();
        config.registry.sweep_interval = Duration::from_millis(20);
        config.power.check_interval = Duration::from_millis(20);
        config.shutdown_timeout = Duration::from_millis(200);
        config
    }

    struct Harness {
        hub: Hub<MockValidator>,
        recorder: Arc<TimedRecorder>,
        indicator: Arc<LogIndicator>,
    }

    fn build(validator: MockValidator, recording: Duration, config: HubConfig) -> Harness {
        let recorder = Arc::new(TimedRecorder::new(recording));
        let indicator = Arc::new(LogIndicator::default());
        let hub = Hub::new(config, validator, recorder.clone(), indicator.clone()).unwrap();
        Harness {
            hub,
            recorder,
            indicator,
        }
    }

    fn accounts() -> Vec<String> {
        vec!["alice".to_string(), "bob".to_string(), "carol".to_string()]
    }

    async fn wait_for(mut cond: impl FnMut() -> bool) -> bool {
        for _ in 0..400 {
            if cond() {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        cond()
    }

    fn tap_payload(device: &str, uid: &str) -> Vec<u8> {
        format!(r#"{{"device_id":"{}","uid":"{}","timestamp":1700000000}}"#, device, uid).into_bytes()
    }

    // ── Tests ────────────────────────────────────────────────────────────

    #[test]
    fn test_new_outside_runtime_fails() {
        let recorder = Arc::new(TimedRecorder::new(Duration::from_secs(1)));
        let indicator = Arc::new(LogIndicator::default());
        let result = Hub::new(
            HubConfig::default(),
            MockValidator::new(Verdict::Fail),
            recorder,
            indicator,
        );
        assert!(matches!(result, Err(HubError::NoRuntime)));
    }

    #[tokio::test]
    async fn test_full_bond_from_reader_taps() {
        let h = build(
            MockValidator::new(Verdict::Accept(accounts())),
            Duration::from_millis(80),
            test_config(),
        );
        h.hub.start().unwrap();
        assert_eq!(h.indicator.state(), IndicatorState::Idle);

        h.hub
            .handle_message(
                TOPIC_REGISTER,
                br#"{"device_id":"fiz-01","type":"fiz-reader","firmware":"1.2.0","ip":"10.0.0.5"}"#,
            )
            .unwrap();
        for uid in ["04a1", "04b2", "04c3"] {
            h.hub
                .handle_message(TOPIC_TAP, &tap_payload("fiz-01", uid))
                .unwrap();
        }

        assert!(wait_for(|| h.hub.session().phase() == Phase::Recording).await);
        assert_eq!(h.hub.validator().calls(), 1);
        assert_eq!(
            h.hub.validator().seen.lock().unwrap()[0],
            vec!["04a1", "04b2", "04c3"]
        );
        assert_eq!(h.hub.session().validated_accounts(), accounts());
        assert!(is_valid_bond_id(&h.hub.session().bond_id()));
        assert_eq!(h.indicator.state(), IndicatorState::Success);
        assert_eq!(h.recorder.state(), RecorderState::Recording);

        let status = h.hub.status();
        assert_eq!(status.phase, Phase::Recording);
        assert_eq!(status.uids.len(), 3);
        assert_eq!(status.devices.len(), 1);
        assert_eq!(status.devices[0].status, DeviceStatus::Online);
        assert_eq!(status.power_state, PowerState::Active);

        assert!(wait_for(|| h.hub.session().phase() == Phase::Complete).await);
        assert_eq!(h.recorder.state(), RecorderState::Finished);

        h.hub.shutdown().await;
    }

    #[tokio::test]
    async fn test_rejected_bond_shows_error_until_reset() {
        let h = build(
            MockValidator::new(Verdict::Reject("unknown card")),
            Duration::from_secs(60),
            test_config(),
        );
        h.hub.start().unwrap();
        for uid in ["u1", "u2", "u3"] {
            h.hub.local_tap(uid).unwrap();
        }

        assert!(wait_for(|| h.indicator.state() == IndicatorState::Error).await);
        assert_eq!(h.hub.session().phase(), Phase::Validating);
        assert_eq!(h.recorder.state(), RecorderState::Idle);

        h.hub.reset();
        assert_eq!(h.hub.session().phase(), Phase::CollectingTaps);
        assert!(h.hub.session().collected_uids().is_empty());
        assert_eq!(h.indicator.state(), IndicatorState::Idle);

        h.hub.shutdown().await;
    }

    #[tokio::test]
    async fn test_validation_transport_error_reported() {
        let h = build(
            MockValidator::new(Verdict::Fail),
            Duration::from_secs(60),
            test_config(),
        );
        h.hub.start().unwrap();
        for uid in ["u1", "u2", "u3"] {
            h.hub.local_tap(uid).unwrap();
        }

        assert!(wait_for(|| h.indicator.state() == IndicatorState::Error).await);
        assert_eq!(h.hub.validator().calls(), 1);
        assert_eq!(h.hub.session().phase(), Phase::Validating);
        assert!(h.hub.session().bond_id().is_empty());

        h.hub.shutdown().await;
    }

    #[tokio::test]
    async fn test_duplicate_local_tap_rejected() {
        let h = build(
            MockValidator::new(Verdict::Fail),
            Duration::from_secs(60),
            test_config(),
        );
        h.hub.start().unwrap();
        h.hub.local_tap("u1").unwrap();

        let err = h.hub.local_tap("u1").unwrap_err();
        assert_eq!(err, SessionError::DuplicateUid("u1".to_string()));
        assert_eq!(h.hub.session().collected_uids(), vec!["u1"]);
        assert_eq!(h.hub.validator().calls(), 0);

        h.hub.shutdown().await;
    }

    #[tokio::test]
    async fn test_tap_before_start_is_dropped() {
        let h = build(
            MockValidator::new(Verdict::Fail),
            Duration::from_secs(60),
            test_config(),
        );

        // Unknown device and an unarmed session: logged, never fatal.
        h.hub
            .handle_message(TOPIC_TAP, &tap_payload("fiz-09", "u1"))
            .unwrap();
        assert_eq!(h.hub.session().phase(), Phase::Initial);
        assert!(h.hub.session().collected_uids().is_empty());
    }

    #[tokio::test]
    async fn test_power_changes_drive_indicator() {
        let h = build(
            MockValidator::new(Verdict::Fail),
            Duration::from_secs(60),
            test_config(),
        );
        h.hub.start().unwrap();

        let entered = h
            .hub
            .power()
            .check_at(Instant::now() + Duration::from_secs(11 * 60));
        assert_eq!(entered, vec![PowerState::Idle, PowerState::DeepSleep]);
        assert_eq!(h.indicator.state(), IndicatorState::Off);

        h.hub.local_tap("u1").unwrap();
        assert_eq!(h.hub.power().state(), PowerState::Active);
        assert_eq!(h.indicator.state(), IndicatorState::Idle);

        h.hub.shutdown().await;
    }

    #[tokio::test]
    async fn test_shutdown_aborts_stalled_validation() {
        let mut config = test_config();
        config.shutdown_timeout = Duration::from_millis(50);
        let h = build(
            MockValidator::stalled(Verdict::Accept(accounts()), Duration::from_secs(30)),
            Duration::from_secs(60),
            config,
        );
        h.hub.start().unwrap();
        for uid in ["u1", "u2", "u3"] {
            h.hub.local_tap(uid).unwrap();
        }
        assert!(wait_for(|| h.hub.validator().calls() == 1).await);

        let report = h.hub.shutdown().await;
        assert_eq!(report.periodic_stopped, 2);
        assert_eq!(report.outstanding_aborted, 1);
        assert_eq!(h.hub.session().phase(), Phase::Validating);
        assert_eq!(h.indicator.state(), IndicatorState::Off);
        assert!(h.hub.tasks().is_shutting_down());
    }

    #[tokio::test]
    async fn test_shutdown_waits_for_quick_validation() {
        let h = build(
            MockValidator::stalled(Verdict::Accept(accounts()), Duration::from_millis(30)),
            Duration::from_secs(60),
            test_config(),
        );
        h.hub.start().unwrap();
        for uid in ["u1", "u2", "u3"] {
            h.hub.local_tap(uid).unwrap();
        }
        assert!(wait_for(|| h.hub.validator().calls() == 1).await);

        let report = h.hub.shutdown().await;
        assert_eq!(report.outstanding_completed, 1);
        assert_eq!(report.outstanding_aborted, 0);
        // The late verdict started a recording which shutdown then stopped.
        assert_eq!(h.recorder.state(), RecorderState::Finished);
        assert_eq!(h.hub.session().phase(), Phase::Complete);
    }

    #[tokio::test]
    async fn test_reset_during_validation_discards_old_verdict() {
        let h = build(
            MockValidator::stalled(Verdict::Echo, Duration::from_millis(60)),
            Duration::from_secs(60),
            test_config(),
        );
        h.hub.start().unwrap();
        for uid in ["a1", "a2", "a3"] {
            h.hub.local_tap(uid).unwrap();
        }
        assert!(wait_for(|| h.hub.validator().calls() == 1).await);

        h.hub.reset();
        for uid in ["b1", "b2", "b3"] {
            h.hub.local_tap(uid).unwrap();
        }
        assert!(wait_for(|| h.hub.session().phase() == Phase::Recording).await);

        // Let both verdicts land, whichever order they arrive in.
        tokio::time::sleep(Duration::from_millis(120)).await;
        assert_eq!(h.hub.validator().calls(), 2);
        assert_eq!(h.hub.session().collected_uids(), vec!["b1", "b2", "b3"]);
        assert_eq!(
            h.hub.session().validated_accounts(),
            vec!["acct-b1", "acct-b2", "acct-b3"]
        );
        assert!(is_valid_bond_id(&h.hub.session().bond_id()));
        assert_eq!(h.hub.session().phase(), Phase::Recording);

        h.hub.shutdown().await;
    }

    #[tokio::test]
    async fn test_reset_during_recording_stops_old_recording() {
        let h = build(
            MockValidator::new(Verdict::Echo),
            Duration::from_secs(60),
            test_config(),
        );
        h.hub.start().unwrap();
        for uid in ["a1", "a2", "a3"] {
            h.hub.local_tap(uid).unwrap();
        }
        assert!(wait_for(|| h.recorder.state() == RecorderState::Recording).await);

        h.hub.reset();
        assert_eq!(h.recorder.state(), RecorderState::Finished);
        // The old recording's completion must not finish the new bond.
        assert_eq!(h.hub.session().phase(), Phase::CollectingTaps);

        for uid in ["c1", "c2", "c3"] {
            h.hub.local_tap(uid).unwrap();
        }
        assert!(wait_for(|| h.hub.session().phase() == Phase::Recording).await);
        assert_eq!(h.recorder.state(), RecorderState::Recording);
        assert_eq!(h.indicator.state(), IndicatorState::Success);
        assert_eq!(
            h.hub.session().validated_accounts(),
            vec!["acct-c1", "acct-c2", "acct-c3"]
        );

        h.hub.shutdown().await;
        assert_eq!(h.hub.session().phase(), Phase::Complete);
    }

    #[tokio::test]
    async fn test_second_start_rejected() {
        let h = build(
            MockValidator::new(Verdict::Fail),
            Duration::from_secs(60),
            test_config(),
        );
        h.hub.start().unwrap();
        assert!(matches!(h.hub.start(), Err(HubError::AlreadyStarted)));

        let report = h.hub.shutdown().await;
        assert_eq!(report.periodic_stopped, 2);
    }

    #[tokio::test]
    async fn test_zero_loop_period_rejected() {
        let mut config = test_config();
        config.power.check_interval = Duration::ZERO;
        let result = Hub::new(
            config,
            MockValidator::new(Verdict::Fail),
            Arc::new(TimedRecorder::new(Duration::from_secs(1))),
            Arc::new(LogIndicator::default()),
        );
        assert!(matches!(
            result,
            Err(HubError::Config(ConfigError::ZeroPeriod("power.check_interval")))
        ));
    }
}
