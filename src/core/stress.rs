//! Stress estimation: baseline normalization, combination, squashing,
//! smoothing and confidence tracking.

use crate::config::{Config, ConfidenceConfig, Squash, StressLevels};
use crate::core::calibration::SessionBaseline;
use crate::core::features::FeatureVector;
use crate::error::QualityIssue;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Smoothed stress score with its confidence.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StressScore {
    pub timestamp: f64,
    /// Stress in [0, 1]
    pub value: f64,
    /// Trust in `value`, in [0, 1]
    pub confidence: f64,
}

/// Coarse classification of a stress score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum StressLevel {
    Calm,
    Moderate,
    Stressed,
}

impl StressLevel {
    pub fn from_score(score: f64, levels: &StressLevels) -> Self {
        if score < levels.calm_below {
            StressLevel::Calm
        } else if score < levels.moderate_below {
            StressLevel::Moderate
        } else {
            StressLevel::Stressed
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            StressLevel::Calm => "CALM",
            StressLevel::Moderate => "MODERATE",
            StressLevel::Stressed => "STRESSED",
        }
    }
}

impl std::fmt::Display for StressLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(self.as_str())
    }
}

impl Squash {
    /// Map a combined z-score into [0, 1].
    pub fn apply(&self, z: f64) -> f64 {
        let value = match *self {
            Squash::Logistic { gain, midpoint } => 1.0 / (1.0 + (-gain * (z - midpoint)).exp()),
            Squash::Linear { z_floor, z_ceiling } => (z - z_floor) / (z_ceiling - z_floor),
        };
        if value.is_nan() {
            0.0
        } else {
            value.clamp(0.0, 1.0)
        }
    }
}

/// Check a feature vector against physiological bounds.
pub fn check_quality(
    features: &FeatureVector,
    min_heart_rate: f64,
    max_heart_rate: f64,
) -> Result<(), QualityIssue> {
    let checks = [
        ("phasic_eda", features.phasic_eda),
        ("tonic_eda", features.tonic_eda),
        ("hrv", features.hrv),
        ("heart_rate", features.heart_rate),
    ];
    if let Some((feature, _)) = checks.iter().find(|(_, v)| !v.is_finite()) {
        return Err(QualityIssue::NonFinite { feature: *feature });
    }
    if !(min_heart_rate..=max_heart_rate).contains(&features.heart_rate) {
        return Err(QualityIssue::HeartRateOutOfRange {
            bpm: features.heart_rate,
            min: min_heart_rate,
            max: max_heart_rate,
        });
    }
    Ok(())
}

/// Turns feature vectors into a smoothed, bounded stress score.
#[derive(Debug, Clone)]
pub struct StressEstimator {
    baseline: SessionBaseline,
    weight_eda: f64,
    weight_hrv: f64,
    squash: Squash,
    alpha: f64,
    confidence_config: ConfidenceConfig,
    heart_rate_bounds: (f64, f64),
    smoothed: Option<f64>,
    confidence: f64,
}

impl StressEstimator {
    /// Returns `None` when the baseline is not valid.
    pub fn new(baseline: SessionBaseline, config: &Config) -> Option<Self> {
        if !baseline.is_valid() {
            return None;
        }
        Some(Self {
            baseline,
            weight_eda: config.stress_weight_eda,
            weight_hrv: config.stress_weight_hrv,
            squash: config.squash.clone(),
            alpha: config.smoothing_alpha,
            confidence_config: config.confidence.clone(),
            heart_rate_bounds: (
                config.features.min_heart_rate_bpm,
                config.features.max_heart_rate_bpm,
            ),
            smoothed: None,
            confidence: 1.0,
        })
    }

    pub fn baseline(&self) -> &SessionBaseline {
        &self.baseline
    }

    pub fn confidence(&self) -> f64 {
        self.confidence
    }

    /// Unsmoothed score for one feature vector.
    pub fn raw_score(&self, features: &FeatureVector) -> f64 {
        let z_eda = self.baseline.eda.z_score(features.phasic_eda);
        let z_hrv = self.baseline.ecg.z_score(features.hrv);
        // Lower HRV means more stress.
        let combined = (self.weight_eda * z_eda - self.weight_hrv * z_hrv)
            / (self.weight_eda.abs() + self.weight_hrv.abs());
        self.squash.apply(combined)
    }

    /// Score a new feature vector.
    pub fn update(&mut self, features: &FeatureVector) -> StressScore {
        let (min_hr, max_hr) = self.heart_rate_bounds;
        match check_quality(features, min_hr, max_hr) {
            Ok(()) => {
                self.confidence = (self.confidence + self.confidence_config.recovery_step).min(1.0);
            }
            Err(issue @ QualityIssue::NonFinite { .. }) => {
                warn!(%issue, "Signal quality low, holding score");
                self.confidence *= self.confidence_config.quality_penalty;
                return self.current(features.timestamp);
            }
            Err(issue) => {
                warn!(%issue, "Signal quality low");
                self.confidence *= self.confidence_config.quality_penalty;
            }
        }

        let x = self.raw_score(features);
        let smoothed = match self.smoothed {
            None => x,
            Some(previous) => self.alpha * x + (1.0 - self.alpha) * previous,
        };
        self.smoothed = Some(smoothed.clamp(0.0, 1.0));
        self.current(features.timestamp)
    }

    /// Record a tick without fresh features: the score holds and confidence
    /// decays.
    pub fn hold(&mut self, now: f64) -> StressScore {
        self.confidence *= self.confidence_config.gap_decay;
        self.current(now)
    }

    fn current(&self, timestamp: f64) -> StressScore {
        StressScore {
            timestamp,
            value: self.smoothed.unwrap_or(0.0),
            confidence: self.confidence.clamp(0.0, 1.0),
        }
    }
}
