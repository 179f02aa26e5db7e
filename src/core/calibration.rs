//! Per-session baseline calibration.
//!
//! The calibrator accumulates a fixed-duration window: raw sample counts per
//! channel and the per-tick features the stress score is later normalized
//! against (phasic EDA and HRV). Means and spreads use a two-pass
//! outlier-robust estimate.

use crate::channel::CancelToken;
use crate::config::{CalibrationTuning, Config};
use crate::core::features::{FeatureExtractor, FeatureVector};
use crate::error::{CalibrationError, Shortfall};
use crate::source::{Channel, RawSample};
use serde::{Deserialize, Serialize};
use statrs::statistics::Statistics;
use tracing::{debug, info, warn};

/// Baseline for one channel's calibrated quantity.
///
/// For [`Channel::Eda`] the quantity is per-tick phasic activity (µS); for
/// [`Channel::Ecg`] it is per-tick HRV (SDNN, ms).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationProfile {
    pub channel: Channel,
    pub baseline_mean: f64,
    pub baseline_std: f64,
    /// Raw samples received on the channel during the window
    pub sample_count: usize,
    pub valid: bool,
}

impl CalibrationProfile {
    /// Normalize a value against this baseline.
    pub fn z_score(&self, value: f64) -> f64 {
        (value - self.baseline_mean) / self.baseline_std
    }
}

/// Both channel profiles plus resting levels, owned by the session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionBaseline {
    pub eda: CalibrationProfile,
    pub ecg: CalibrationProfile,
    /// Mean heart rate over the window (bpm)
    pub resting_heart_rate: f64,
    /// Mean tonic EDA over the window (µS)
    pub tonic_eda: f64,
    /// Feature ticks the baseline was computed from
    pub feature_ticks: usize,
}

impl SessionBaseline {
    pub fn profile(&self, channel: Channel) -> &CalibrationProfile {
        match channel {
            Channel::Eda => &self.eda,
            Channel::Ecg => &self.ecg,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.eda.valid && self.ecg.valid
    }
}

/// Mean and population standard deviation after discarding values further
/// than `k` standard deviations from the first-pass mean.
pub fn robust_mean_std(values: &[f64], k: f64) -> (f64, f64) {
    if values.is_empty() {
        return (f64::NAN, f64::NAN);
    }
    let mean = values.iter().mean();
    let std = values.iter().population_std_dev();
    if std == 0.0 || !std.is_finite() {
        return (mean, std);
    }

    let kept: Vec<f64> = values
        .iter()
        .copied()
        .filter(|v| (v - mean).abs() <= k * std)
        .collect();
    if kept.is_empty() {
        return (mean, std);
    }
    (kept.iter().mean(), kept.iter().population_std_dev())
}

/// Accumulator for one calibration window.
#[derive(Debug)]
pub struct Calibrator {
    tuning: CalibrationTuning,
    duration: f64,
    required_samples: usize,
    started_at: Option<f64>,
    sample_counts: [usize; 2],
    phasic: Vec<f64>,
    hrv: Vec<f64>,
    heart_rate: Vec<f64>,
    tonic: Vec<f64>,
    cancel: CancelToken,
}

fn slot(channel: Channel) -> usize {
    match channel {
        Channel::Eda => 0,
        Channel::Ecg => 1,
    }
}

impl Calibrator {
    pub fn new(config: &Config, cancel: CancelToken) -> Self {
        Self {
            tuning: config.calibration.clone(),
            duration: config.calibration_duration.as_secs_f64(),
            required_samples: config.required_calibration_samples(),
            started_at: None,
            sample_counts: [0; 2],
            phasic: Vec::new(),
            hrv: Vec::new(),
            heart_rate: Vec::new(),
            tonic: Vec::new(),
            cancel,
        }
    }

    /// Open the window at session time `now`.
    pub fn start(&mut self, now: f64) {
        info!(
            window_s = self.duration,
            required_samples = self.required_samples,
            "Calibration window opened"
        );
        self.started_at = Some(now);
        self.sample_counts = [0; 2];
        self.phasic.clear();
        self.hrv.clear();
        self.heart_rate.clear();
        self.tonic.clear();
    }

    /// Session time at which the window closes.
    pub fn deadline(&self) -> Option<f64> {
        self.started_at.map(|start| start + self.duration)
    }

    /// Whether a sample timestamp falls inside the window.
    pub fn in_window(&self, timestamp: f64) -> bool {
        match self.started_at {
            Some(start) => timestamp >= start && timestamp < start + self.duration,
            None => false,
        }
    }

    pub fn observe_sample(&mut self, sample: &RawSample) {
        if self.in_window(sample.timestamp) {
            self.sample_counts[slot(sample.channel)] += 1;
        }
    }

    pub fn observe_features(&mut self, features: &FeatureVector) {
        let values = [
            features.phasic_eda,
            features.hrv,
            features.heart_rate,
            features.tonic_eda,
        ];
        if values.iter().any(|v| !v.is_finite()) {
            debug!("Skipping non-finite calibration features");
            return;
        }
        self.phasic.push(features.phasic_eda);
        self.hrv.push(features.hrv);
        self.heart_rate.push(features.heart_rate);
        self.tonic.push(features.tonic_eda);
    }

    /// Fraction of the window elapsed at `now`, in [0, 1].
    pub fn progress(&self, now: f64) -> f64 {
        match self.started_at {
            Some(start) => ((now - start) / self.duration).clamp(0.0, 1.0),
            None => 0.0,
        }
    }

    pub fn is_complete(&self, now: f64) -> bool {
        self.deadline().is_some_and(|deadline| now >= deadline)
    }

    pub fn sample_count(&self, channel: Channel) -> usize {
        self.sample_counts[slot(channel)]
    }

    pub fn feature_ticks(&self) -> usize {
        self.phasic.len()
    }

    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    /// Close the window and compute the baseline.
    ///
    /// A shortfall on any channel rejects the whole calibration.
    pub fn finish(&self) -> Result<SessionBaseline, CalibrationError> {
        if self.cancel.is_cancelled() {
            return Err(CalibrationError::Cancelled);
        }

        for channel in Channel::ALL {
            let observed = self.sample_count(channel);
            if observed < self.required_samples {
                return Err(self.reject(
                    channel,
                    Shortfall::TooFewSamples {
                        observed,
                        required: self.required_samples,
                    },
                ));
            }
        }

        if self.feature_ticks() < self.tuning.min_feature_ticks {
            return Err(self.reject(
                Channel::Ecg,
                Shortfall::TooFewFeatures {
                    observed: self.feature_ticks(),
                    required: self.tuning.min_feature_ticks,
                },
            ));
        }

        let eda = self.profile(Channel::Eda, &self.phasic)?;
        let ecg = self.profile(Channel::Ecg, &self.hrv)?;

        let baseline = SessionBaseline {
            eda,
            ecg,
            resting_heart_rate: self.heart_rate.iter().mean(),
            tonic_eda: self.tonic.iter().mean(),
            feature_ticks: self.feature_ticks(),
        };
        info!(
            eda_mean = baseline.eda.baseline_mean,
            eda_std = baseline.eda.baseline_std,
            hrv_mean = baseline.ecg.baseline_mean,
            hrv_std = baseline.ecg.baseline_std,
            resting_hr = baseline.resting_heart_rate,
            "Calibration complete"
        );
        Ok(baseline)
    }

    fn profile(&self, channel: Channel, values: &[f64]) -> Result<CalibrationProfile, CalibrationError> {
        let (mean, std) = robust_mean_std(values, self.tuning.outlier_k);
        if !(std > self.tuning.min_baseline_std) {
            return Err(self.reject(channel, Shortfall::ZeroVariance { std }));
        }
        Ok(CalibrationProfile {
            channel,
            baseline_mean: mean,
            baseline_std: std,
            sample_count: self.sample_count(channel),
            valid: true,
        })
    }

    fn reject(&self, channel: Channel, shortfall: Shortfall) -> CalibrationError {
        warn!(%channel, %shortfall, "Calibration rejected");
        CalibrationError::InsufficientSamples { channel, shortfall }
    }
}

/// Calibrate from a recorded, time-ordered sample sequence.
///
/// The window opens at the first sample. Samples are run through a fresh
/// extractor ticking at `tick_rate_hz`; identical input always yields an
/// identical baseline.
pub fn calibrate_samples(
    samples: &[RawSample],
    config: &Config,
) -> Result<SessionBaseline, CalibrationError> {
    let mut calibrator = Calibrator::new(config, CancelToken::new());
    let Some(first) = samples.first() else {
        return calibrator.finish();
    };

    let start = first.timestamp;
    let interval = 1.0 / config.tick_rate_hz;
    let mut extractor = FeatureExtractor::new(&config.features);
    let mut ticks = 1u64;
    let mut next_tick = start + interval;
    calibrator.start(start);
    let end = start + config.calibration_duration.as_secs_f64();

    for sample in samples.iter().take_while(|s| s.timestamp < end) {
        while sample.timestamp >= next_tick {
            if let Some(features) = extractor.extract(next_tick) {
                calibrator.observe_features(&features);
            }
            ticks += 1;
            next_tick = start + ticks as f64 * interval;
        }
        extractor.ingest(sample);
        calibrator.observe_sample(sample);
    }

    if let Some(deadline) = calibrator.deadline() {
        while next_tick <= deadline {
            if let Some(features) = extractor.extract(next_tick) {
                calibrator.observe_features(&features);
            }
            ticks += 1;
            next_tick = start + ticks as f64 * interval;
        }
    }

    calibrator.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::synthetic::{Scenario, SyntheticConfig, SyntheticSource};
    use std::time::Duration;

    fn features(t: f64, phasic: f64, hrv: f64) -> FeatureVector {
        FeatureVector {
            timestamp: t,
            tonic_eda: 2.0,
            phasic_eda: phasic,
            heart_rate: 70.0,
            hrv,
            rmssd: hrv,
            pnn50: 0.0,
            beat_count: 0,
        }
    }

    fn short_config() -> Config {
        let mut config = Config::default();
        config.calibration_duration = Duration::from_secs(5);
        config.sampling_rate_hz = 10.0;
        config.features.ecg_lowpass_hz = 4.0;
        config
    }

    fn fill_samples(calibrator: &mut Calibrator, rate: f64, seconds: f64) {
        let n = (rate * seconds) as usize;
        for i in 0..n {
            let t = i as f64 / rate;
            calibrator.observe_sample(&RawSample::new(Channel::Eda, t, 2.0));
            calibrator.observe_sample(&RawSample::new(Channel::Ecg, t, 0.0));
        }
    }

    #[test]
    fn test_robust_mean_discards_outlier() {
        let mut values = vec![1.0; 20];
        values.extend([1.1, 0.9, 1.05, 0.95]);
        values.push(50.0);
        let (mean, std) = robust_mean_std(&values, 3.0);
        assert!((mean - 1.0).abs() < 0.01, "mean {mean}");
        assert!(std < 0.1);
    }

    #[test]
    fn test_robust_mean_constant_has_zero_std() {
        assert_eq!(robust_mean_std(&[2.0; 10], 3.0), (2.0, 0.0));
    }

    #[test]
    fn test_successful_calibration() {
        let config = short_config();
        let mut calibrator = Calibrator::new(&config, CancelToken::new());
        calibrator.start(0.0);
        fill_samples(&mut calibrator, 10.0, 5.0);
        for (i, (phasic, hrv)) in [(0.01, 40.0), (0.03, 50.0), (0.02, 45.0), (0.04, 55.0)]
            .into_iter()
            .enumerate()
        {
            calibrator.observe_features(&features(i as f64, phasic, hrv));
        }

        assert!(calibrator.is_complete(5.0));
        let baseline = calibrator.finish().unwrap();
        assert!(baseline.is_valid());
        assert!((baseline.eda.baseline_mean - 0.025).abs() < 1e-12);
        assert!(baseline.eda.baseline_std > 0.0);
        assert!((baseline.ecg.baseline_mean - 47.5).abs() < 1e-12);
        assert_eq!(baseline.eda.sample_count, 50);
        assert_eq!(baseline.resting_heart_rate, 70.0);
    }

    #[test]
    fn test_too_few_samples_rejected() {
        let config = short_config();
        let mut calibrator = Calibrator::new(&config, CancelToken::new());
        calibrator.start(0.0);
        // 30 of the required 40 samples.
        fill_samples(&mut calibrator, 10.0, 3.0);

        let err = calibrator.finish().unwrap_err();
        assert_eq!(
            err,
            CalibrationError::InsufficientSamples {
                channel: Channel::Eda,
                shortfall: Shortfall::TooFewSamples {
                    observed: 30,
                    required: 40
                },
            }
        );
    }

    #[test]
    fn test_zero_variance_rejected() {
        let config = short_config();
        let mut calibrator = Calibrator::new(&config, CancelToken::new());
        calibrator.start(0.0);
        fill_samples(&mut calibrator, 10.0, 5.0);
        for i in 0..5 {
            calibrator.observe_features(&features(i as f64, 0.0, 40.0 + i as f64));
        }

        let err = calibrator.finish().unwrap_err();
        assert!(matches!(
            err,
            CalibrationError::InsufficientSamples {
                channel: Channel::Eda,
                shortfall: Shortfall::ZeroVariance { .. }
            }
        ));
    }

    #[test]
    fn test_samples_outside_window_not_counted() {
        let config = short_config();
        let mut calibrator = Calibrator::new(&config, CancelToken::new());
        calibrator.start(10.0);
        calibrator.observe_sample(&RawSample::new(Channel::Eda, 9.9, 2.0));
        calibrator.observe_sample(&RawSample::new(Channel::Eda, 10.0, 2.0));
        calibrator.observe_sample(&RawSample::new(Channel::Eda, 15.0, 2.0));
        assert_eq!(calibrator.sample_count(Channel::Eda), 1);
        assert_eq!(calibrator.progress(12.5), 0.5);
    }

    #[test]
    fn test_cancelled_calibration() {
        let config = short_config();
        let token = CancelToken::new();
        let mut calibrator = Calibrator::new(&config, token.clone());
        calibrator.start(0.0);
        fill_samples(&mut calibrator, 10.0, 5.0);
        token.cancel();
        assert_eq!(calibrator.finish().unwrap_err(), CalibrationError::Cancelled);
    }

    fn recorded(seed: u64, scenario: Scenario, seconds: f64) -> Vec<RawSample> {
        let config = SyntheticConfig {
            seed,
            scenario,
            ..SyntheticConfig::default()
        };
        crate::source::synthetic::record(&config, seconds)
    }

    #[test]
    fn test_calibrate_samples_is_deterministic() {
        let config = Config::default();
        let samples = recorded(7, Scenario::Constant(0.2), 20.0);

        let first = calibrate_samples(&samples, &config).unwrap();
        let second = calibrate_samples(&samples, &config).unwrap();
        assert_eq!(
            first.eda.baseline_mean.to_bits(),
            second.eda.baseline_mean.to_bits()
        );
        assert_eq!(
            first.ecg.baseline_std.to_bits(),
            second.ecg.baseline_std.to_bits()
        );
        assert!(first.eda.baseline_std > 0.0);
        assert!(first.ecg.baseline_std > 0.0);
    }

    #[test]
    fn test_flat_signals_fail_calibration() {
        let config = Config::default();
        let synthetic = SyntheticConfig::flat(2.0, 70.0);
        let samples = crate::source::synthetic::record(&synthetic, 20.0);

        let err = calibrate_samples(&samples, &config).unwrap_err();
        assert!(matches!(
            err,
            CalibrationError::InsufficientSamples {
                shortfall: Shortfall::ZeroVariance { .. },
                ..
            }
        ));
    }

    #[test]
    fn test_samples_after_window_are_ignored() {
        let config = Config::default();
        let long = recorded(5, Scenario::Constant(0.1), 40.0);
        let window: Vec<RawSample> = long.iter().copied().filter(|s| s.timestamp < 20.0).collect();

        let from_long = calibrate_samples(&long, &config).unwrap();
        let from_window = calibrate_samples(&window, &config).unwrap();
        assert_eq!(from_long, from_window);
        assert!(from_long.eda.sample_count <= 2000);
    }

    #[test]
    fn test_empty_recording_fails() {
        let config = Config::default();
        assert!(calibrate_samples(&[], &config).is_err());
    }

    #[test]
    fn test_synthetic_session_calibrates() {
        let config = Config::default();
        let samples = recorded(3, Scenario::Constant(0.1), 20.0);
        let baseline = calibrate_samples(&samples, &config).unwrap();
        assert!((baseline.resting_heart_rate - 73.0).abs() < 5.0);
        assert!(baseline.feature_ticks >= 10);
    }
}
