//! Session state machine.
//!
//! ```text
//! Idle --start--> Calibrating --baseline--> Running --stop--> Ended
//!   ^                  |                       |
//!   +--- rejected / ---+                       +--- sensor fatal --> Ended
//!        cancelled          Running --recalibrate--> Calibrating
//! ```
//!
//! The orchestrator is driven by an external scheduler through
//! [`SessionOrchestrator::tick`]; every tick pulls what the feeds acquired,
//! runs the pipeline once and publishes one [`DifficultySetting`].

use crate::channel::{latest_slot, CancelToken, SlotReader, SlotWriter};
use crate::config::Config;
use crate::core::calibration::{Calibrator, SessionBaseline};
use crate::core::difficulty::{DifficultyController, DifficultySetting};
use crate::core::features::FeatureExtractor;
use crate::core::stress::{check_quality, StressEstimator};
use crate::error::{CalibrationError, ConfigError, SensorError, SessionError};
use crate::session::backoff::Backoff;
use crate::session::report::{HistoryEntry, ReportBuilder, SessionReport, StressHistory};
use crate::source::{Channel, SampleFeed};
use crate::telemetry::{SessionStats, SharedStats, StressLog};
use chrono::{Local, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Lifecycle state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Idle,
    Calibrating,
    Running,
    Ended,
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            SessionState::Idle => "idle",
            SessionState::Calibrating => "calibrating",
            SessionState::Running => "running",
            SessionState::Ended => "ended",
        };
        f.write_str(name)
    }
}

/// What a tick did.
#[derive(Debug, Clone, PartialEq)]
pub enum TickOutcome {
    /// Not started, or returned to idle
    Idle,
    /// Calibration window still open
    Calibrating { progress: f64 },
    /// Calibration finished this tick; the session is now running
    Calibrated,
    /// A freshly computed setting was published
    Published(DifficultySetting),
    /// The previous setting was republished with decayed confidence
    Held(DifficultySetting),
    /// The session is over
    Ended,
}

struct ChannelLink {
    feed: Box<dyn SampleFeed>,
    backoff: Backoff,
    down: bool,
    failures: u32,
    last_fault: Option<SensorError>,
}

impl ChannelLink {
    fn channel(&self) -> Channel {
        self.feed.channel()
    }
}

/// Coordinates calibration, steady-state ticking, fault recovery and
/// shutdown for one session.
pub struct SessionOrchestrator {
    config: Config,
    state: SessionState,
    links: Vec<ChannelLink>,
    extractor: FeatureExtractor,
    calibrator: Option<Calibrator>,
    estimator: Option<StressEstimator>,
    controller: DifficultyController,
    baseline: Option<SessionBaseline>,
    last_setting: Option<DifficultySetting>,
    publisher: SlotWriter<DifficultySetting>,
    history: StressHistory,
    stats: SharedStats,
    stress_log: Option<StressLog>,
    cancel: CancelToken,
    fatal_reported: bool,
    report: ReportBuilder,
}

impl SessionOrchestrator {
    /// Create a session over `feeds`, returning the reader the game polls.
    ///
    /// The configuration is validated first; an invalid one is rejected
    /// before any state exists.
    pub fn new(
        config: Config,
        feeds: Vec<Box<dyn SampleFeed>>,
    ) -> Result<(Self, SlotReader<DifficultySetting>), SessionError> {
        config.validate()?;
        if config.sensor_enabled {
            for channel in Channel::ALL {
                if !feeds.iter().any(|f| f.channel() == channel) {
                    return Err(ConfigError::invalid(
                        "feeds",
                        format!("no {channel} feed while sensor_enabled is set"),
                    )
                    .into());
                }
            }
        }

        let links = feeds
            .into_iter()
            .map(|feed| ChannelLink {
                feed,
                backoff: Backoff::new(config.reconnect_backoff_params.clone()),
                down: false,
                failures: 0,
                last_fault: None,
            })
            .collect();
        let (publisher, reader) = latest_slot();

        let orchestrator = Self {
            extractor: FeatureExtractor::new(&config.features),
            controller: DifficultyController::from_config(&config),
            config,
            state: SessionState::Idle,
            links,
            calibrator: None,
            estimator: None,
            baseline: None,
            last_setting: None,
            publisher,
            history: StressHistory::default(),
            stats: Arc::new(SessionStats::new()),
            stress_log: None,
            cancel: CancelToken::new(),
            fatal_reported: false,
            report: ReportBuilder::new(),
        };
        Ok((orchestrator, reader))
    }

    /// Count into shared (possibly persisted) statistics.
    pub fn with_stats(mut self, stats: SharedStats) -> Self {
        self.stats = stats;
        self
    }

    /// Append every published setting to a stress log.
    pub fn with_stress_log(mut self, log: StressLog) -> Self {
        self.stress_log = Some(log);
        self
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn baseline(&self) -> Option<&SessionBaseline> {
        self.baseline.as_ref()
    }

    pub fn last_setting(&self) -> Option<DifficultySetting> {
        self.last_setting
    }

    pub fn history(&self) -> &StressHistory {
        &self.history
    }

    pub fn stats(&self) -> &SharedStats {
        &self.stats
    }

    /// Token that cancels an in-progress calibration from any thread.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Progress of the open calibration window, if any.
    pub fn calibration_progress(&self, now: f64) -> Option<f64> {
        self.calibrator.as_ref().map(|c| c.progress(now))
    }

    /// `Idle -> Calibrating`, or straight to `Running` on the fallback
    /// setting when sensors are disabled.
    pub fn start(&mut self, now: f64) -> Result<(), SessionError> {
        if self.state != SessionState::Idle {
            return Err(self.invalid("start"));
        }
        if !self.config.sensor_enabled {
            info!("Sensors disabled, running on the fallback setting");
            self.transition(SessionState::Running);
            return Ok(());
        }
        self.begin_calibration(now);
        Ok(())
    }

    /// `Running -> Calibrating`: discard the baseline and calibrate again.
    pub fn recalibrate(&mut self, now: f64) -> Result<(), SessionError> {
        if self.state != SessionState::Running || !self.config.sensor_enabled {
            return Err(self.invalid("recalibrate"));
        }
        self.begin_calibration(now);
        Ok(())
    }

    /// `Calibrating -> Idle` with no baseline.
    pub fn cancel(&mut self) -> Result<(), SessionError> {
        if self.state != SessionState::Calibrating {
            return Err(self.invalid("cancel"));
        }
        self.cancel.cancel();
        self.abandon_calibration(&CalibrationError::Cancelled);
        Ok(())
    }

    /// End the session. Feeds are shut down; later ticks report `Ended`.
    pub fn stop(&mut self) -> Result<(), SessionError> {
        if self.state == SessionState::Ended {
            return Err(self.invalid("stop"));
        }
        self.end();
        Ok(())
    }

    /// Run one tick at session time `now`.
    ///
    /// Calibration failures and the escalation to `SensorFatal` are returned
    /// as errors, each exactly once; the session state has already moved on
    /// (to `Idle` or `Ended`) when they are.
    pub fn tick(&mut self, now: f64) -> Result<TickOutcome, SessionError> {
        match self.state {
            SessionState::Idle => Ok(TickOutcome::Idle),
            SessionState::Ended => Ok(TickOutcome::Ended),
            SessionState::Calibrating => self.tick_calibrating(now),
            SessionState::Running if !self.config.sensor_enabled => {
                self.stats.record_tick();
                let setting = self.config.fallback_setting;
                self.publish(now, setting, false);
                Ok(TickOutcome::Published(setting))
            }
            SessionState::Running => self.tick_running(now),
        }
    }

    /// Report of the session so far.
    pub fn report(&self) -> SessionReport {
        self.report.build(
            self.state,
            self.config.sensor_enabled,
            self.baseline.as_ref(),
            &self.history,
            Some(self.stats.snapshot()),
        )
    }

    fn begin_calibration(&mut self, now: f64) {
        self.cancel.reset();
        let mut calibrator = Calibrator::new(&self.config, self.cancel.clone());
        calibrator.start(now);
        self.calibrator = Some(calibrator);
        self.estimator = None;
        self.baseline = None;
        self.reset_link_health(now);
        self.transition(SessionState::Calibrating);
    }

    /// Start every channel with a fresh failure budget. Links that are still
    /// down keep a pending reconnect.
    fn reset_link_health(&mut self, now: f64) {
        for link in &mut self.links {
            link.failures = 0;
            link.last_fault = None;
            link.backoff.reset();
            if link.down {
                link.backoff.schedule_after(now);
            }
        }
    }

    fn abandon_calibration(&mut self, reason: &CalibrationError) {
        warn!(%reason, "Calibration abandoned");
        self.calibrator = None;
        self.stats.record_calibration_failed();
        self.transition(SessionState::Idle);
    }

    fn tick_calibrating(&mut self, now: f64) -> Result<TickOutcome, SessionError> {
        if self.cancel.is_cancelled() {
            self.abandon_calibration(&CalibrationError::Cancelled);
            return Err(CalibrationError::Cancelled.into());
        }

        self.acquire(now);
        let features = self.extractor.extract(now);

        let Some(calibrator) = self.calibrator.as_mut() else {
            return Err(self.invalid("calibrate"));
        };
        if let Some(features) = features {
            calibrator.observe_features(&features);
        }
        if !calibrator.is_complete(now) {
            return Ok(TickOutcome::Calibrating {
                progress: calibrator.progress(now),
            });
        }

        match calibrator.finish() {
            Ok(baseline) => {
                self.estimator = StressEstimator::new(baseline.clone(), &self.config);
                self.baseline = Some(baseline);
                self.calibrator = None;
                self.stats.record_calibration_completed();
                self.reset_link_health(now);
                self.transition(SessionState::Running);
                Ok(TickOutcome::Calibrated)
            }
            Err(err) => {
                self.abandon_calibration(&err);
                Err(err.into())
            }
        }
    }

    fn tick_running(&mut self, now: f64) -> Result<TickOutcome, SessionError> {
        self.stats.record_tick();
        let all_up = self.acquire(now);

        if let Some(err) = self.escalate() {
            return Err(err);
        }

        let features = self.extractor.extract(now).filter(|_| all_up);
        let Some(estimator) = self.estimator.as_mut() else {
            let setting = self.config.fallback_setting;
            self.publish(now, setting, false);
            return Ok(TickOutcome::Published(setting));
        };

        match features {
            Some(features) => {
                let bounds = (
                    self.config.features.min_heart_rate_bpm,
                    self.config.features.max_heart_rate_bpm,
                );
                if check_quality(&features, bounds.0, bounds.1).is_err() {
                    self.stats.record_quality_issue();
                }
                let score = estimator.update(&features);
                let setting = self.controller.apply(&score);
                debug!(
                    stress = score.value,
                    confidence = score.confidence,
                    blur = setting.blur_radius,
                    "Published setting"
                );
                self.publish(now, setting, false);
                Ok(TickOutcome::Published(setting))
            }
            None => {
                let score = estimator.hold(now);
                let base = self.last_setting.unwrap_or(self.config.fallback_setting);
                let setting = DifficultySetting {
                    confidence: score.confidence,
                    ..base
                };
                debug!(confidence = score.confidence, "Holding setting");
                self.publish(now, setting, true);
                Ok(TickOutcome::Held(setting))
            }
        }
    }

    /// Pull every feed, feed the pipeline and manage reconnects. Returns
    /// whether every channel delivered this tick.
    fn acquire(&mut self, now: f64) -> bool {
        let tick_ms = (1000.0 / self.config.tick_rate_hz) as u64;
        let mut all_up = true;
        let mut overwritten = 0;

        for link in &mut self.links {
            let channel = link.channel();
            let batch = link.feed.pull(now);

            for sample in &batch.samples {
                self.extractor.ingest(sample);
                if let Some(calibrator) = self.calibrator.as_mut() {
                    calibrator.observe_sample(sample);
                }
            }
            self.stats.record_samples(batch.samples.len() as u64);

            let delivered = batch.fault.is_none() && !batch.samples.is_empty();
            match batch.fault {
                Some(fault) if fault.is_disconnect() => {
                    if !link.down {
                        warn!(%channel, %fault, "Sensor disconnected");
                        self.stats.record_disconnect();
                        link.down = true;
                        link.backoff.reset();
                        link.backoff.schedule_after(now);
                    }
                    link.last_fault = Some(fault);
                }
                Some(fault) if batch.samples.is_empty() => {
                    link.last_fault = Some(fault);
                }
                _ => {}
            }

            // Data flowing again, or the last chance before this tick would
            // reach the failure limit, overrides the backoff schedule.
            let at_limit = link.failures + 1 >= self.config.max_consecutive_failures;
            let mut recovered = false;
            if link.down && (delivered || at_limit || link.backoff.is_due(now)) {
                self.stats.record_reconnect_attempt();
                match link.feed.reconnect() {
                    Ok(()) => {
                        info!(%channel, attempts = link.backoff.attempts(), "Sensor reconnected");
                        link.down = false;
                        link.backoff.reset();
                        recovered = true;
                    }
                    Err(fault) => {
                        debug!(%channel, %fault, "Reconnect failed");
                        link.backoff.schedule_after(now);
                        link.last_fault = Some(fault);
                    }
                }
            }

            if !link.down && (!batch.samples.is_empty() || recovered) {
                link.failures = 0;
                link.last_fault = None;
            } else {
                link.failures += 1;
                if link.last_fault.is_none() {
                    link.last_fault = Some(SensorError::Timeout {
                        channel,
                        waited_ms: tick_ms,
                    });
                }
            }
            if link.down || batch.samples.is_empty() {
                all_up = false;
            }
            overwritten += link.feed.overwritten();
        }

        self.stats.set_samples_overwritten(overwritten);
        all_up
    }

    /// End the session once a channel has failed too many ticks in a row.
    fn escalate(&mut self) -> Option<SessionError> {
        let limit = self.config.max_consecutive_failures;
        let link = self.links.iter().find(|l| l.failures >= limit)?;
        let channel = link.channel();
        let failures = link.failures;
        let last = link
            .last_fault
            .clone()
            .unwrap_or_else(|| SensorError::disconnected(channel, "no data"));

        error!(%channel, failures, %last, "Sensor failed permanently, ending session");
        self.end();
        if self.fatal_reported {
            return None;
        }
        self.fatal_reported = true;
        Some(SessionError::SensorFatal {
            channel,
            failures,
            last,
        })
    }

    fn publish(&mut self, now: f64, setting: DifficultySetting, held: bool) {
        self.publisher.publish(setting);
        self.last_setting = Some(setting);

        let level = self.controller.classify(setting.stress_score);
        self.history.push(HistoryEntry {
            timestamp: now,
            recorded_at: Utc::now(),
            level,
            setting,
            held,
        });
        if held {
            self.stats.record_held();
        } else {
            self.stats.record_published();
        }

        if let Some(log) = self.stress_log.as_mut() {
            if let Err(e) = log.append(Local::now(), level, setting.stress_score, setting.confidence)
            {
                warn!(error = %e, path = %log.path().display(), "Failed to append stress log");
            }
        }
    }

    fn end(&mut self) {
        self.calibrator = None;
        // Dropping the feeds stops any acquisition threads.
        self.links.clear();
        self.transition(SessionState::Ended);
    }

    fn transition(&mut self, next: SessionState) {
        if self.state != next {
            info!(from = %self.state, to = %next, "Session state changed");
            self.state = next;
        }
    }

    fn invalid(&self, action: &'static str) -> SessionError {
        SessionError::InvalidTransition {
            state: self.state,
            action,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::{InlineFeed, OutageFeed, Scenario, SyntheticConfig, SyntheticSource};
    use std::time::Duration;

    fn feeds(synthetic: &SyntheticConfig) -> Vec<Box<dyn SampleFeed>> {
        let (eda, ecg) = SyntheticSource::pair(synthetic);
        vec![
            Box::new(InlineFeed::new(eda)),
            Box::new(InlineFeed::new(ecg)),
        ]
    }

    fn short_config() -> Config {
        let mut config = Config::default();
        config.calibration_duration = Duration::from_secs(10);
        config
    }

    fn run_until_running(session: &mut SessionOrchestrator) -> f64 {
        session.start(0.0).unwrap();
        let mut t = 0.0;
        while session.state() == SessionState::Calibrating {
            t += 1.0;
            session.tick(t).unwrap();
        }
        t
    }

    #[test]
    fn test_invalid_config_rejected_before_start() {
        let mut config = Config::default();
        config.smoothing_alpha = 2.0;
        let result = SessionOrchestrator::new(config, feeds(&SyntheticConfig::default()));
        assert!(matches!(result, Err(SessionError::Config(_))));
    }

    #[test]
    fn test_missing_feed_rejected() {
        let (eda, _) = SyntheticSource::pair(&SyntheticConfig::default());
        let feeds: Vec<Box<dyn SampleFeed>> = vec![Box::new(InlineFeed::new(eda))];
        assert!(SessionOrchestrator::new(Config::default(), feeds).is_err());
    }

    #[test]
    fn test_calibrates_then_publishes() {
        let (mut session, mut reader) =
            SessionOrchestrator::new(short_config(), feeds(&SyntheticConfig::default())).unwrap();
        assert_eq!(session.tick(1.0).unwrap(), TickOutcome::Idle);

        let t = run_until_running(&mut session);
        assert_eq!(t, 10.0);
        assert!(session.baseline().unwrap().is_valid());
        assert!(reader.latest().is_none());

        let outcome = session.tick(11.0).unwrap();
        let TickOutcome::Published(setting) = outcome else {
            panic!("expected a published setting, got {outcome:?}");
        };
        assert_eq!(reader.latest(), Some(setting));
        assert!((0.0..=1.0).contains(&setting.stress_score));
        assert_eq!(session.history().len(), 1);
    }

    #[test]
    fn test_invalid_transitions() {
        let (mut session, _reader) =
            SessionOrchestrator::new(short_config(), feeds(&SyntheticConfig::default())).unwrap();
        assert!(matches!(
            session.cancel(),
            Err(SessionError::InvalidTransition { state: SessionState::Idle, .. })
        ));
        assert!(session.recalibrate(0.0).is_err());
        session.start(0.0).unwrap();
        assert!(session.start(0.0).is_err());
        session.stop().unwrap();
        assert!(session.stop().is_err());
        assert_eq!(session.tick(5.0).unwrap(), TickOutcome::Ended);
    }

    #[test]
    fn test_cancel_returns_to_idle() {
        let (mut session, _reader) =
            SessionOrchestrator::new(short_config(), feeds(&SyntheticConfig::default())).unwrap();
        session.start(0.0).unwrap();
        session.tick(1.0).unwrap();
        session.cancel().unwrap();
        assert_eq!(session.state(), SessionState::Idle);
        assert!(session.baseline().is_none());
        assert_eq!(session.stats().snapshot().calibrations_failed, 1);
    }

    #[test]
    fn test_cancel_token_from_other_thread() {
        let (mut session, _reader) =
            SessionOrchestrator::new(short_config(), feeds(&SyntheticConfig::default())).unwrap();
        session.start(0.0).unwrap();
        let token = session.cancel_token();
        std::thread::spawn(move || token.cancel()).join().unwrap();

        let err = session.tick(1.0).unwrap_err();
        assert!(matches!(
            err,
            SessionError::Calibration(CalibrationError::Cancelled)
        ));
        assert_eq!(session.state(), SessionState::Idle);

        // A fresh start clears the cancellation.
        session.start(2.0).unwrap();
        assert!(matches!(
            session.tick(3.0).unwrap(),
            TickOutcome::Calibrating { .. }
        ));
    }

    #[test]
    fn test_recalibration() {
        let (mut session, _reader) =
            SessionOrchestrator::new(short_config(), feeds(&SyntheticConfig::default())).unwrap();
        let t = run_until_running(&mut session);
        session.tick(t + 1.0).unwrap();

        session.recalibrate(t + 1.0).unwrap();
        assert_eq!(session.state(), SessionState::Calibrating);
        assert!(session.baseline().is_none());

        let mut now = t + 1.0;
        while session.state() == SessionState::Calibrating {
            now += 1.0;
            session.tick(now).unwrap();
        }
        assert_eq!(session.state(), SessionState::Running);
        assert_eq!(session.stats().snapshot().calibrations_completed, 2);
    }

    #[test]
    fn test_fatal_after_persistent_outage() {
        let synthetic = SyntheticConfig::default();
        let (eda, ecg) = SyntheticSource::pair(&synthetic);
        let feeds: Vec<Box<dyn SampleFeed>> = vec![
            Box::new(InlineFeed::new(eda)),
            Box::new(OutageFeed::new(InlineFeed::new(ecg), vec![(15.5, 1e9)])),
        ];
        let (mut session, _reader) = SessionOrchestrator::new(short_config(), feeds).unwrap();
        let mut t = run_until_running(&mut session);

        let mut fatal = 0;
        for _ in 0..20 {
            t += 1.0;
            match session.tick(t) {
                Err(SessionError::SensorFatal {
                    channel, failures, ..
                }) => {
                    assert_eq!(channel, Channel::Ecg);
                    assert_eq!(failures, 5);
                    fatal += 1;
                }
                Err(other) => panic!("unexpected error {other}"),
                Ok(_) => {}
            }
        }
        assert_eq!(fatal, 1);
        assert_eq!(session.state(), SessionState::Ended);
        assert_eq!(session.tick(t + 1.0).unwrap(), TickOutcome::Ended);
    }

    #[test]
    fn test_no_sensor_mode_publishes_fallback() {
        let mut config = Config::default();
        config.sensor_enabled = false;
        let (mut session, mut reader) = SessionOrchestrator::new(config.clone(), Vec::new()).unwrap();
        session.start(0.0).unwrap();
        assert_eq!(session.state(), SessionState::Running);

        for t in 1..=5 {
            assert_eq!(
                session.tick(t as f64).unwrap(),
                TickOutcome::Published(config.fallback_setting)
            );
            assert_eq!(reader.take_fresh(), Some(config.fallback_setting));
        }
        assert!(session.recalibrate(6.0).is_err());
    }

    #[test]
    fn test_ramp_raises_difficulty() {
        let synthetic = SyntheticConfig {
            scenario: Scenario::Ramp {
                from: 0.05,
                to: 0.95,
                start_s: 12.0,
                duration_s: 30.0,
            },
            ..SyntheticConfig::default()
        };
        let (mut session, _reader) =
            SessionOrchestrator::new(short_config(), feeds(&synthetic)).unwrap();
        let mut t = run_until_running(&mut session);

        let mut early = Vec::new();
        let mut late = Vec::new();
        while t < 70.0 {
            t += 1.0;
            if let TickOutcome::Published(setting) = session.tick(t).unwrap() {
                if t <= 20.0 {
                    early.push(setting.stress_score);
                } else if t > 50.0 {
                    late.push(setting.stress_score);
                }
            }
        }
        let mean = |v: &[f64]| v.iter().sum::<f64>() / v.len() as f64;
        assert!(!early.is_empty() && !late.is_empty());
        assert!(mean(&late) > mean(&early), "early {early:?} late {late:?}");
    }
}
