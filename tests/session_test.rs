//! End-to-end session scenarios driven in virtual time.

use pretty_assertions::assert_eq;
use std::time::Duration;
use stressloop::config::Config;
use stressloop::core::{calibrate_samples, DifficultyController};
use stressloop::error::{CalibrationError, SessionError};
use stressloop::session::{SessionOrchestrator, SessionReport, SessionState, TickOutcome};
use stressloop::source::{
    synthetic, Channel, InlineFeed, OutageFeed, RawSample, ReplaySource, SampleFeed,
    SyntheticConfig, SyntheticSource,
};
use stressloop::telemetry::{StressLog, STRESS_LOG_HEADER};

fn config(calibration_s: u64) -> Config {
    let mut config = Config::default();
    config.calibration_duration = Duration::from_secs(calibration_s);
    config
}

fn synthetic_feeds(synthetic: &SyntheticConfig) -> Vec<Box<dyn SampleFeed>> {
    let (eda, ecg) = SyntheticSource::pair(synthetic);
    vec![
        Box::new(InlineFeed::new(eda)),
        Box::new(InlineFeed::new(ecg)),
    ]
}

fn replay_feeds(samples: &[RawSample]) -> Vec<Box<dyn SampleFeed>> {
    Channel::ALL
        .into_iter()
        .map(|channel| {
            Box::new(InlineFeed::new(ReplaySource::new(channel, samples))) as Box<dyn SampleFeed>
        })
        .collect()
}

/// Start at t=0 and tick once per second until calibration ends.
fn calibrate(session: &mut SessionOrchestrator) -> Result<f64, SessionError> {
    session.start(0.0)?;
    let mut t = 0.0;
    while session.state() == SessionState::Calibrating {
        t += 1.0;
        session.tick(t)?;
    }
    Ok(t)
}

#[test]
fn test_flat_signals_reject_calibration() {
    let synthetic = SyntheticConfig::flat(2.0, 70.0);
    let (mut session, mut reader) =
        SessionOrchestrator::new(config(20), synthetic_feeds(&synthetic)).unwrap();

    let err = calibrate(&mut session).unwrap_err();
    assert!(
        matches!(
            err,
            SessionError::Calibration(CalibrationError::InsufficientSamples { .. })
        ),
        "unexpected error: {err}"
    );
    assert_eq!(session.state(), SessionState::Idle);
    assert!(session.baseline().is_none());
    assert!(reader.latest().is_none());
    assert_eq!(session.tick(30.0).unwrap(), TickOutcome::Idle);
}

#[test]
fn test_baseline_has_positive_spread() {
    let (mut session, _reader) =
        SessionOrchestrator::new(config(20), synthetic_feeds(&SyntheticConfig::default()))
            .unwrap();
    calibrate(&mut session).unwrap();

    let baseline = session.baseline().unwrap();
    for channel in Channel::ALL {
        let profile = baseline.profile(channel);
        assert!(profile.valid);
        assert!(profile.baseline_std > 0.0, "{channel}: {profile:?}");
        assert!(profile.sample_count >= session.config().required_calibration_samples());
    }
}

#[test]
fn test_outage_holds_then_recovers() {
    let synthetic = SyntheticConfig::default();
    let (eda, ecg) = SyntheticSource::pair(&synthetic);
    let feeds: Vec<Box<dyn SampleFeed>> = vec![
        Box::new(InlineFeed::new(eda)),
        Box::new(OutageFeed::new(InlineFeed::new(ecg), vec![(12.5, 15.5)])),
    ];
    let (mut session, _reader) = SessionOrchestrator::new(config(10), feeds).unwrap();
    let t = calibrate(&mut session).unwrap();
    assert_eq!(t, 10.0);

    for t in [11.0, 12.0] {
        assert!(matches!(
            session.tick(t).unwrap(),
            TickOutcome::Published(_)
        ));
    }

    let mut held = Vec::new();
    for t in [13.0, 14.0, 15.0] {
        match session.tick(t).unwrap() {
            TickOutcome::Held(setting) => held.push(setting.confidence),
            other => panic!("expected a held setting at {t}, got {other:?}"),
        }
    }
    assert!(held.windows(2).all(|w| w[1] < w[0]), "{held:?}");

    let mut published = 0;
    for t in 16..=25 {
        if let TickOutcome::Published(_) = session.tick(t as f64).unwrap() {
            published += 1;
        }
    }
    assert!(published > 0);
    assert_eq!(session.state(), SessionState::Running);

    let stats = session.stats().snapshot();
    assert_eq!(stats.disconnects, 1);
    assert!(stats.reconnect_attempts >= 2);
    assert!(stats.ticks_held >= 3);
}

fn ecg_outage_feeds(outage: (f64, f64)) -> Vec<Box<dyn SampleFeed>> {
    let (eda, ecg) = SyntheticSource::pair(&SyntheticConfig::default());
    vec![
        Box::new(InlineFeed::new(eda)),
        Box::new(OutageFeed::new(InlineFeed::new(ecg), vec![outage])),
    ]
}

#[test]
fn test_outage_below_failure_limit_is_absorbed() {
    // Four dead ticks against a limit of five; the backoff alone would not
    // retry before the limit.
    let (mut session, mut reader) =
        SessionOrchestrator::new(config(10), ecg_outage_feeds((12.5, 16.5))).unwrap();
    calibrate(&mut session).unwrap();
    assert_eq!(session.config().max_consecutive_failures, 5);

    let mut held = Vec::new();
    for t in 11..=16 {
        if let TickOutcome::Held(setting) = session.tick(t as f64).unwrap() {
            held.push(setting.confidence);
        }
    }
    assert_eq!(held.len(), 4);
    assert!(held.windows(2).all(|w| w[1] < w[0]), "{held:?}");

    let mut resumed = false;
    for t in 17..=25 {
        let outcome = session.tick(t as f64).unwrap();
        resumed |= matches!(outcome, TickOutcome::Published(_));
    }
    assert!(resumed);
    assert_eq!(session.state(), SessionState::Running);
    assert!(reader.latest().is_some());
    assert_eq!(session.stats().snapshot().disconnects, 1);
}

#[test]
fn test_outage_across_calibration_end_keeps_running() {
    let (mut session, _reader) =
        SessionOrchestrator::new(config(20), ecg_outage_feeds((17.5, 21.5))).unwrap();
    let t = calibrate(&mut session).unwrap();
    assert_eq!(t, 20.0);
    assert_eq!(session.state(), SessionState::Running);

    let mut resumed = false;
    for t in 21..=30 {
        let outcome = session.tick(t as f64).unwrap();
        if t >= 22 {
            resumed |= matches!(outcome, TickOutcome::Published(_));
        }
    }
    assert!(resumed);
    assert_eq!(session.state(), SessionState::Running);
}

#[test]
fn test_reader_sees_every_published_and_held_setting() {
    let (mut session, mut reader) =
        SessionOrchestrator::new(config(10), ecg_outage_feeds((12.5, 14.5))).unwrap();
    calibrate(&mut session).unwrap();
    assert_eq!(reader.take_fresh(), None);

    let mut held = 0;
    for t in 11..=20 {
        let expected = match session.tick(t as f64).unwrap() {
            TickOutcome::Published(setting) => setting,
            TickOutcome::Held(setting) => {
                held += 1;
                setting
            }
            other => panic!("unexpected outcome at {t}: {other:?}"),
        };
        assert_eq!(reader.take_fresh(), Some(expected));
        assert_eq!(reader.take_fresh(), None);
    }
    assert!(held > 0);
}

#[test]
fn test_persistent_failure_is_fatal_once() {
    let mut config = config(10);
    config.max_consecutive_failures = 3;
    let synthetic = SyntheticConfig::default();
    let (eda, ecg) = SyntheticSource::pair(&synthetic);
    let feeds: Vec<Box<dyn SampleFeed>> = vec![
        Box::new(OutageFeed::new(InlineFeed::new(eda), vec![(12.5, f64::INFINITY)])),
        Box::new(InlineFeed::new(ecg)),
    ];
    let (mut session, _reader) = SessionOrchestrator::new(config, feeds).unwrap();
    let mut t = calibrate(&mut session).unwrap();

    let mut errors = Vec::new();
    while t < 30.0 {
        t += 1.0;
        if let Err(e) = session.tick(t) {
            errors.push(e);
        }
    }
    assert_eq!(errors.len(), 1);
    match &errors[0] {
        SessionError::SensorFatal {
            channel, failures, ..
        } => {
            assert_eq!(*channel, Channel::Eda);
            assert_eq!(*failures, 3);
        }
        other => panic!("unexpected error {other}"),
    }
    assert_eq!(session.state(), SessionState::Ended);
}

#[test]
fn test_sensorless_session_publishes_fallback() {
    let mut config = Config::default();
    config.sensor_enabled = false;
    let (mut session, mut reader) = SessionOrchestrator::new(config.clone(), Vec::new()).unwrap();
    session.start(0.0).unwrap();

    for t in 1..=10 {
        session.tick(t as f64).unwrap();
    }
    // Late readers only see the newest value.
    assert_eq!(reader.take_fresh(), Some(config.fallback_setting));
    assert_eq!(reader.take_fresh(), None);
    assert!(session
        .history()
        .iter()
        .all(|entry| entry.setting == config.fallback_setting));
}

#[test]
fn test_rising_stress_never_eases_difficulty() {
    let controller = DifficultyController::from_config(&Config::default());
    let settings: Vec<_> = (0..10)
        .map(|i| controller.map(0.1 + 0.7 * i as f64 / 9.0))
        .collect();
    let max_blur = Config::default().difficulty_curve_params.blur_radius.max;

    for pair in settings.windows(2) {
        assert!(pair[1].blur_radius >= pair[0].blur_radius);
        assert!(pair[1].speed_multiplier >= pair[0].speed_multiplier);
        assert!(pair[1].spawn_rate >= pair[0].spawn_rate);
    }
    assert!(settings.iter().all(|s| s.blur_radius <= max_blur));
}

#[test]
fn test_replay_is_deterministic() {
    let samples = synthetic::record(&SyntheticConfig::default(), 40.0);
    let config = config(20);

    let first = calibrate_samples(&samples, &config).unwrap();
    let second = calibrate_samples(&samples, &config).unwrap();
    assert_eq!(first, second);

    let run = || {
        let (mut session, _reader) =
            SessionOrchestrator::new(config.clone(), replay_feeds(&samples)).unwrap();
        let mut t = calibrate(&mut session).unwrap();
        let mut scores = Vec::new();
        while t < 39.0 {
            t += 1.0;
            if let TickOutcome::Published(setting) = session.tick(t).unwrap() {
                scores.push((setting.stress_score, setting.confidence));
            }
        }
        (session.baseline().cloned(), scores)
    };
    let (baseline_a, scores_a) = run();
    let (baseline_b, scores_b) = run();
    assert_eq!(baseline_a, baseline_b);
    assert!(!scores_a.is_empty());
    assert_eq!(scores_a, scores_b);
}

#[test]
fn test_stress_log_and_report() {
    let dir = tempfile::tempdir().unwrap();
    let log_path = dir.path().join("stress_log.csv");
    let log = StressLog::open(&log_path).unwrap();

    let (session, _reader) =
        SessionOrchestrator::new(config(10), synthetic_feeds(&SyntheticConfig::default()))
            .unwrap();
    let mut session = session.with_stress_log(log);
    let mut t = calibrate(&mut session).unwrap();
    for _ in 0..5 {
        t += 1.0;
        session.tick(t).unwrap();
    }
    session.stop().unwrap();

    let content = std::fs::read_to_string(&log_path).unwrap();
    let lines: Vec<&str> = content.lines().collect();
    assert_eq!(lines[0], STRESS_LOG_HEADER);
    assert_eq!(lines.len() - 1, session.history().len());
    assert!(lines[1..].iter().all(|line| line.split(',').count() == 4));

    let path = session.report().export(dir.path()).unwrap();
    let report: SessionReport =
        serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap();
    assert_eq!(report.state, SessionState::Ended);
    assert!(report.baseline.is_some());
    assert_eq!(report.history.len(), session.history().len());
    assert_eq!(
        report.stats.map(|s| s.calibrations_completed),
        Some(1)
    );
}
