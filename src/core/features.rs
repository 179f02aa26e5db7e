//! Feature extraction from raw EDA and ECG samples.
//!
//! - EDA: tonic level (slow exponential moving average) and phasic activity
//!   (raw minus tonic)
//! - ECG: band-limited R-peak detection with a refractory period, heart rate
//!   from the latest inter-beat interval, HRV over the last N intervals
//!
//! All filter state is bounded; nothing grows with session length.

use crate::config::FeatureConfig;
use crate::core::windowing::{RollingWindow, TickAccumulator};
use crate::source::{Channel, RawSample};
use serde::{Deserialize, Serialize};
use statrs::statistics::Statistics;
use std::f64::consts::PI;

/// Features for one extraction tick.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FeatureVector {
    /// Session time of the tick (seconds)
    pub timestamp: f64,
    /// Slow EDA level (µS)
    pub tonic_eda: f64,
    /// Mean phasic EDA over the tick (µS)
    pub phasic_eda: f64,
    /// Beats per minute from the most recent inter-beat interval
    pub heart_rate: f64,
    /// SDNN of the recent inter-beat intervals (ms)
    pub hrv: f64,
    /// Root mean square of successive differences (ms)
    pub rmssd: f64,
    /// Share of successive differences above 50 ms (%)
    pub pnn50: f64,
    /// Beats detected since extraction started
    pub beat_count: u64,
}

/// Exponential smoothing coefficient for a step of `dt` seconds with time
/// constant `tau`.
fn ema_coefficient(dt: f64, tau: f64) -> f64 {
    if dt <= 0.0 {
        0.0
    } else {
        1.0 - (-dt / tau).exp()
    }
}

/// Tonic/phasic decomposition of skin conductance.
#[derive(Debug, Clone)]
pub struct EdaFilter {
    time_constant: f64,
    tonic: Option<f64>,
    last_timestamp: f64,
    phasic: TickAccumulator,
}

impl EdaFilter {
    pub fn new(time_constant: f64) -> Self {
        Self {
            time_constant,
            tonic: None,
            last_timestamp: 0.0,
            phasic: TickAccumulator::default(),
        }
    }

    /// Feed one sample; returns its phasic component.
    pub fn push(&mut self, timestamp: f64, value: f64) -> f64 {
        let tonic = match self.tonic {
            None => value,
            Some(tonic) => {
                let a = ema_coefficient(timestamp - self.last_timestamp, self.time_constant);
                tonic + a * (value - tonic)
            }
        };
        self.tonic = Some(tonic);
        self.last_timestamp = timestamp;

        let phasic = value - tonic;
        self.phasic.add(phasic);
        phasic
    }

    pub fn tonic(&self) -> Option<f64> {
        self.tonic
    }

    /// Samples accumulated since the last [`EdaFilter::take_phasic`].
    pub fn pending(&self) -> usize {
        self.phasic.count()
    }

    /// Mean phasic activity since the previous call.
    pub fn take_phasic(&mut self) -> Option<f64> {
        self.phasic.take()
    }
}

/// Summary of the current inter-beat interval window.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HeartMetrics {
    pub heart_rate: f64,
    pub sdnn_ms: f64,
    pub rmssd_ms: f64,
    pub pnn50: f64,
}

/// R-peak detector over a raw ECG stream.
///
/// The signal is band-limited (baseline wander removed by subtracting a slow
/// moving average, then smoothed by a short one). A beat is the maximum of an
/// excursion above a threshold that tracks a decaying amplitude envelope.
/// Excursions starting within the refractory period are ignored.
#[derive(Debug, Clone)]
pub struct BeatDetector {
    config: FeatureConfig,
    baseline: f64,
    smoothed: f64,
    envelope: f64,
    first_timestamp: Option<f64>,
    last_timestamp: f64,
    candidate: Option<(f64, f64)>,
    last_beat: Option<f64>,
    intervals: RollingWindow<f64>,
    beat_count: u64,
}

impl BeatDetector {
    pub fn new(config: FeatureConfig) -> Self {
        let window = config.hrv_window_beats;
        Self {
            config,
            baseline: 0.0,
            smoothed: 0.0,
            envelope: 0.0,
            first_timestamp: None,
            last_timestamp: 0.0,
            candidate: None,
            last_beat: None,
            intervals: RollingWindow::new(window),
            beat_count: 0,
        }
    }

    /// Feed one sample; returns the time of a beat confirmed by it.
    pub fn push(&mut self, timestamp: f64, value: f64) -> Option<f64> {
        let first = match self.first_timestamp {
            Some(first) => first,
            None => {
                self.first_timestamp = Some(timestamp);
                self.last_timestamp = timestamp;
                self.baseline = value;
                return None;
            }
        };

        let dt = timestamp - self.last_timestamp;
        self.last_timestamp = timestamp;

        self.baseline += ema_coefficient(dt, self.config.ecg_baseline_time_constant_s)
            * (value - self.baseline);
        let high_passed = value - self.baseline;
        let lowpass_tau = 1.0 / (2.0 * PI * self.config.ecg_lowpass_hz);
        self.smoothed += ema_coefficient(dt, lowpass_tau) * (high_passed - self.smoothed);

        let y = self.smoothed;
        let decay = 0.5_f64.powf(dt.max(0.0) / self.config.envelope_half_life_s);
        self.envelope = (self.envelope * decay).max(y.abs());

        if timestamp - first < self.config.warmup_s {
            return None;
        }

        let threshold = self.config.detector_threshold * self.envelope;
        if y > threshold && self.envelope > 0.0 {
            match self.candidate {
                Some((_, peak)) if peak >= y => {}
                _ => self.candidate = Some((timestamp, y)),
            }
            return None;
        }

        let (beat_time, _) = self.candidate.take()?;
        if let Some(last) = self.last_beat {
            if beat_time - last < self.config.refractory_s {
                return None;
            }
            let ibi = beat_time - last;
            if (self.config.min_ibi_s..=self.config.max_ibi_s).contains(&ibi) {
                self.intervals.push(ibi);
            }
        }
        self.last_beat = Some(beat_time);
        self.beat_count += 1;
        Some(beat_time)
    }

    pub fn beat_count(&self) -> u64 {
        self.beat_count
    }

    /// Accepted inter-beat intervals currently in the window.
    pub fn interval_count(&self) -> usize {
        self.intervals.len()
    }

    /// Heart metrics once at least two intervals are known.
    pub fn metrics(&self) -> Option<HeartMetrics> {
        if self.intervals.len() < 2 {
            return None;
        }
        let latest = *self.intervals.latest()?;
        let intervals_ms: Vec<f64> = self.intervals.iter().map(|ibi| ibi * 1000.0).collect();
        let diffs: Vec<f64> = intervals_ms.windows(2).map(|w| w[1] - w[0]).collect();

        let rmssd_ms = diffs.iter().map(|d| d * d).mean().sqrt();
        let nn50 = diffs.iter().filter(|d| d.abs() > 50.0).count();

        Some(HeartMetrics {
            heart_rate: 60.0 / latest,
            sdnn_ms: intervals_ms.iter().population_std_dev(),
            rmssd_ms,
            pnn50: nn50 as f64 / diffs.len() as f64 * 100.0,
        })
    }
}

/// Per-channel rolling feature state.
#[derive(Debug, Clone)]
pub struct FeatureExtractor {
    eda: EdaFilter,
    ecg: BeatDetector,
    ecg_fresh: bool,
    emitted: u64,
    missed: u64,
}

impl FeatureExtractor {
    pub fn new(config: &FeatureConfig) -> Self {
        Self {
            eda: EdaFilter::new(config.tonic_time_constant_s),
            ecg: BeatDetector::new(config.clone()),
            ecg_fresh: false,
            emitted: 0,
            missed: 0,
        }
    }

    /// Feed one raw sample into its channel's filter.
    pub fn ingest(&mut self, sample: &RawSample) {
        if !sample.value.is_finite() {
            return;
        }
        match sample.channel {
            Channel::Eda => {
                self.eda.push(sample.timestamp, sample.value);
            }
            Channel::Ecg => {
                self.ecg.push(sample.timestamp, sample.value);
                self.ecg_fresh = true;
            }
        }
    }

    /// Produce the features for the tick ending at `now`.
    ///
    /// Returns `None` (not a zero-valued vector) until enough history has
    /// accumulated, and whenever a channel delivered nothing since the
    /// previous tick. Once extraction has started, such ticks count as
    /// missed.
    pub fn extract(&mut self, now: f64) -> Option<FeatureVector> {
        let features = self.try_extract(now);
        if features.is_none() && self.emitted > 0 {
            self.missed += 1;
        }
        features
    }

    fn try_extract(&mut self, now: f64) -> Option<FeatureVector> {
        let ecg_fresh = std::mem::replace(&mut self.ecg_fresh, false);
        let phasic = self.eda.take_phasic();

        let metrics = self.ecg.metrics()?;
        let tonic = self.eda.tonic()?;
        let phasic = phasic?;
        if !ecg_fresh {
            return None;
        }

        self.emitted += 1;
        Some(FeatureVector {
            timestamp: now,
            tonic_eda: tonic,
            phasic_eda: phasic,
            heart_rate: metrics.heart_rate,
            hrv: metrics.sdnn_ms,
            rmssd: metrics.rmssd_ms,
            pnn50: metrics.pnn50,
            beat_count: self.ecg.beat_count(),
        })
    }

    /// Feature vectors produced so far.
    pub fn emitted(&self) -> u64 {
        self.emitted
    }

    /// Ticks without features since the first emission.
    pub fn missed(&self) -> u64 {
        self.missed
    }

    pub fn beat_count(&self) -> u64 {
        self.ecg.beat_count()
    }
}
