//! Configuration for stressloop sessions.
//!
//! The configuration is immutable for the lifetime of a session and is
//! validated before any session state transition happens.

use crate::core::difficulty::DifficultySetting;
use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main configuration for a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Length of the baseline calibration window
    #[serde(rename = "calibration_duration_seconds", with = "duration_serde")]
    pub calibration_duration: Duration,

    /// Nominal sensor sampling rate per channel
    pub sampling_rate_hz: f64,

    /// Feature/score/difficulty cadence
    pub tick_rate_hz: f64,

    /// Weight of the newest score in the exponential smoothing (0, 1]
    pub smoothing_alpha: f64,

    /// Weight of normalized phasic EDA in the combined score
    pub stress_weight_eda: f64,

    /// Weight of inverse-normalized HRV in the combined score
    pub stress_weight_hrv: f64,

    /// How the combined z-score is squashed into [0, 1]
    pub squash: Squash,

    /// Sensitivity curves for each difficulty field
    pub difficulty_curve_params: DifficultyCurves,

    /// When false the session skips calibration and publishes `fallback_setting`
    pub sensor_enabled: bool,

    /// Setting published in no-sensor mode
    pub fallback_setting: DifficultySetting,

    /// Reconnect pacing after a sensor disconnect
    pub reconnect_backoff_params: BackoffParams,

    /// Consecutive failed ticks on a channel before the session ends
    pub max_consecutive_failures: u32,

    /// Calibration acceptance rules
    pub calibration: CalibrationTuning,

    /// Filter and beat-detector parameters
    pub features: FeatureConfig,

    /// Confidence decay/recovery
    pub confidence: ConfidenceConfig,

    /// Thresholds for the calm/moderate/stressed classification
    pub stress_levels: StressLevels,

    /// Per-channel acquisition buffer size (samples)
    pub buffer_capacity: usize,

    /// Whether sessions append to the CSV stress log
    pub stress_log: bool,

    /// Path for exported session reports
    pub export_path: PathBuf,

    /// Path for persisted statistics and the stress log
    pub data_path: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("stressloop");

        Self {
            calibration_duration: Duration::from_secs(20),
            sampling_rate_hz: 100.0,
            tick_rate_hz: 1.0,
            smoothing_alpha: 0.3,
            stress_weight_eda: 0.6,
            stress_weight_hrv: 0.4,
            squash: Squash::default(),
            difficulty_curve_params: DifficultyCurves::default(),
            sensor_enabled: true,
            fallback_setting: DifficultySetting {
                blur_radius: 0.0,
                speed_multiplier: 1.0,
                spawn_rate: 0.8,
                stress_score: 0.0,
                confidence: 0.0,
            },
            reconnect_backoff_params: BackoffParams::default(),
            max_consecutive_failures: 5,
            calibration: CalibrationTuning::default(),
            features: FeatureConfig::default(),
            confidence: ConfidenceConfig::default(),
            stress_levels: StressLevels::default(),
            buffer_capacity: 4096,
            stress_log: true,
            export_path: data_dir.join("exports"),
            data_path: data_dir,
        }
    }
}

impl Config {
    /// Load configuration from the default location.
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_path();

        if config_path.exists() {
            Self::load_from(&config_path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load and validate configuration from an explicit file.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let content =
            std::fs::read_to_string(path).map_err(|e| ConfigError::Io(e.to_string()))?;
        let config: Config =
            serde_json::from_str(&content).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to the default location.
    pub fn save(&self) -> Result<(), ConfigError> {
        self.save_to(&Self::config_path())
    }

    /// Save configuration to an explicit file.
    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::Io(e.to_string()))?;
        }

        let content = serde_json::to_string_pretty(self)
            .map_err(|e| ConfigError::Serialize(e.to_string()))?;

        std::fs::write(path, content).map_err(|e| ConfigError::Io(e.to_string()))?;

        Ok(())
    }

    /// Get the path to the configuration file.
    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("stressloop")
            .join("config.json")
    }

    /// Ensure all required directories exist.
    pub fn ensure_directories(&self) -> Result<(), ConfigError> {
        std::fs::create_dir_all(&self.export_path).map_err(|e| ConfigError::Io(e.to_string()))?;
        std::fs::create_dir_all(&self.data_path).map_err(|e| ConfigError::Io(e.to_string()))?;
        Ok(())
    }

    /// Interval between ticks.
    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.tick_rate_hz)
    }

    /// Raw samples a channel must deliver during calibration.
    pub fn required_calibration_samples(&self) -> usize {
        let expected = self.calibration_duration.as_secs_f64() * self.sampling_rate_hz;
        (expected * self.calibration.min_sample_fraction).ceil() as usize
    }

    /// Check every invariant the pipeline relies on.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.calibration_duration.is_zero() {
            return Err(ConfigError::invalid(
                "calibration_duration_seconds",
                "must be positive",
            ));
        }
        positive("sampling_rate_hz", self.sampling_rate_hz)?;
        positive("tick_rate_hz", self.tick_rate_hz)?;
        if self.tick_rate_hz > self.sampling_rate_hz {
            return Err(ConfigError::invalid(
                "tick_rate_hz",
                "cannot exceed sampling_rate_hz",
            ));
        }
        if !(self.smoothing_alpha > 0.0 && self.smoothing_alpha <= 1.0) {
            return Err(ConfigError::invalid("smoothing_alpha", "must be in (0, 1]"));
        }
        finite("stress_weight_eda", self.stress_weight_eda)?;
        finite("stress_weight_hrv", self.stress_weight_hrv)?;
        if self.stress_weight_eda.abs() + self.stress_weight_hrv.abs() == 0.0 {
            return Err(ConfigError::invalid(
                "stress_weight_eda",
                "at least one stress weight must be non-zero",
            ));
        }
        self.squash.validate()?;
        self.difficulty_curve_params.validate()?;
        self.validate_fallback()?;
        self.reconnect_backoff_params.validate()?;
        if self.max_consecutive_failures == 0 {
            return Err(ConfigError::invalid(
                "max_consecutive_failures",
                "must be at least 1",
            ));
        }
        self.calibration.validate()?;
        self.features.validate(self.sampling_rate_hz)?;
        self.confidence.validate()?;
        self.stress_levels.validate()?;
        if self.buffer_capacity == 0 {
            return Err(ConfigError::invalid("buffer_capacity", "must be at least 1"));
        }
        Ok(())
    }

    fn validate_fallback(&self) -> Result<(), ConfigError> {
        let s = &self.fallback_setting;
        let curves = &self.difficulty_curve_params;
        curves
            .blur_radius
            .check_in_range("fallback_setting.blur_radius", s.blur_radius)?;
        curves
            .speed_multiplier
            .check_in_range("fallback_setting.speed_multiplier", s.speed_multiplier)?;
        curves
            .spawn_rate
            .check_in_range("fallback_setting.spawn_rate", s.spawn_rate)?;
        unit_interval("fallback_setting.stress_score", s.stress_score)?;
        unit_interval("fallback_setting.confidence", s.confidence)
    }
}

/// Squashing function from combined z-score to [0, 1].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Squash {
    /// `1 / (1 + e^(-gain * (z - midpoint)))`
    Logistic { gain: f64, midpoint: f64 },
    /// Linear between `z_floor` (0.0) and `z_ceiling` (1.0), clamped
    Linear { z_floor: f64, z_ceiling: f64 },
}

impl Default for Squash {
    fn default() -> Self {
        Squash::Logistic {
            gain: 1.2,
            midpoint: 1.0,
        }
    }
}

impl Squash {
    fn validate(&self) -> Result<(), ConfigError> {
        match *self {
            Squash::Logistic { gain, midpoint } => {
                positive("squash.gain", gain)?;
                finite("squash.midpoint", midpoint)
            }
            Squash::Linear { z_floor, z_ceiling } => {
                finite("squash.z_floor", z_floor)?;
                finite("squash.z_ceiling", z_ceiling)?;
                if z_ceiling <= z_floor {
                    return Err(ConfigError::invalid(
                        "squash.z_ceiling",
                        "must be greater than z_floor",
                    ));
                }
                Ok(())
            }
        }
    }
}

/// Piecewise-linear sensitivity curve for one difficulty field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CurveParams {
    /// `(stress, value)` breakpoints with strictly increasing stress
    pub breakpoints: Vec<(f64, f64)>,
    /// Lower clamp for the output
    pub min: f64,
    /// Upper clamp for the output
    pub max: f64,
}

impl CurveParams {
    pub fn new(breakpoints: Vec<(f64, f64)>, min: f64, max: f64) -> Self {
        Self {
            breakpoints,
            min,
            max,
        }
    }

    fn validate(&self, field: &str) -> Result<(), ConfigError> {
        if self.breakpoints.is_empty() {
            return Err(ConfigError::invalid(field, "needs at least one breakpoint"));
        }
        finite(field, self.min)?;
        finite(field, self.max)?;
        if self.min > self.max {
            return Err(ConfigError::invalid(field, "min must not exceed max"));
        }
        for &(stress, value) in &self.breakpoints {
            if !(0.0..=1.0).contains(&stress) {
                return Err(ConfigError::invalid(
                    field,
                    format!("breakpoint stress {stress} outside [0, 1]"),
                ));
            }
            finite(field, value)?;
        }
        for pair in self.breakpoints.windows(2) {
            let (s0, v0) = pair[0];
            let (s1, v1) = pair[1];
            if s1 <= s0 {
                return Err(ConfigError::invalid(
                    field,
                    "breakpoint stresses must be strictly increasing",
                ));
            }
            if v1 < v0 {
                return Err(ConfigError::invalid(
                    field,
                    "breakpoint values must be non-decreasing",
                ));
            }
        }
        Ok(())
    }

    fn check_in_range(&self, field: &str, value: f64) -> Result<(), ConfigError> {
        if value.is_finite() && value >= self.min && value <= self.max {
            Ok(())
        } else {
            Err(ConfigError::invalid(
                field,
                format!("{value} outside [{}, {}]", self.min, self.max),
            ))
        }
    }
}

/// Curves for every output field of a difficulty setting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DifficultyCurves {
    pub blur_radius: CurveParams,
    pub speed_multiplier: CurveParams,
    pub spawn_rate: CurveParams,
}

impl Default for DifficultyCurves {
    fn default() -> Self {
        Self {
            // No blur while calm, ramps through the moderate band.
            blur_radius: CurveParams::new(
                vec![(0.0, 0.0), (0.35, 0.0), (0.65, 8.0), (1.0, 16.0)],
                0.0,
                16.0,
            ),
            speed_multiplier: CurveParams::new(
                vec![(0.0, 1.0), (0.5, 1.15), (1.0, 1.4)],
                1.0,
                1.5,
            ),
            spawn_rate: CurveParams::new(vec![(0.0, 0.6), (1.0, 1.2)], 0.5, 1.5),
        }
    }
}

impl DifficultyCurves {
    fn validate(&self) -> Result<(), ConfigError> {
        self.blur_radius
            .validate("difficulty_curve_params.blur_radius")?;
        self.speed_multiplier
            .validate("difficulty_curve_params.speed_multiplier")?;
        self.spawn_rate.validate("difficulty_curve_params.spawn_rate")
    }
}

/// Exponential backoff between reconnect attempts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackoffParams {
    pub initial_delay_ms: u64,
    pub multiplier: f64,
    pub max_delay_ms: u64,
}

impl Default for BackoffParams {
    fn default() -> Self {
        Self {
            initial_delay_ms: 250,
            multiplier: 2.0,
            max_delay_ms: 4000,
        }
    }
}

impl BackoffParams {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.multiplier < 1.0 || !self.multiplier.is_finite() {
            return Err(ConfigError::invalid(
                "reconnect_backoff_params.multiplier",
                "must be at least 1.0",
            ));
        }
        if self.max_delay_ms < self.initial_delay_ms {
            return Err(ConfigError::invalid(
                "reconnect_backoff_params.max_delay_ms",
                "must not be below initial_delay_ms",
            ));
        }
        Ok(())
    }
}

/// Rules deciding whether a calibration window is usable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationTuning {
    /// Fraction of the nominal sample count that must arrive
    pub min_sample_fraction: f64,
    /// Values further than `outlier_k` standard deviations are discarded
    pub outlier_k: f64,
    /// Spreads at or below this are degenerate
    pub min_baseline_std: f64,
    /// Feature ticks needed to estimate a spread
    pub min_feature_ticks: usize,
}

impl Default for CalibrationTuning {
    fn default() -> Self {
        Self {
            min_sample_fraction: 0.8,
            outlier_k: 3.0,
            min_baseline_std: 1e-6,
            min_feature_ticks: 3,
        }
    }
}

impl CalibrationTuning {
    fn validate(&self) -> Result<(), ConfigError> {
        if !(self.min_sample_fraction > 0.0 && self.min_sample_fraction <= 1.0) {
            return Err(ConfigError::invalid(
                "calibration.min_sample_fraction",
                "must be in (0, 1]",
            ));
        }
        positive("calibration.outlier_k", self.outlier_k)?;
        if !(self.min_baseline_std >= 0.0) {
            return Err(ConfigError::invalid(
                "calibration.min_baseline_std",
                "must be non-negative",
            ));
        }
        if self.min_feature_ticks < 2 {
            return Err(ConfigError::invalid(
                "calibration.min_feature_ticks",
                "must be at least 2",
            ));
        }
        Ok(())
    }
}

/// Filter and beat-detector parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureConfig {
    /// Time constant of the tonic EDA moving average
    pub tonic_time_constant_s: f64,
    /// Inter-beat intervals kept for HRV
    pub hrv_window_beats: usize,
    /// Dead time after a detected beat
    pub refractory_s: f64,
    /// Shortest accepted inter-beat interval
    pub min_ibi_s: f64,
    /// Longest accepted inter-beat interval
    pub max_ibi_s: f64,
    /// Time constant of the ECG baseline-wander filter (high-pass)
    pub ecg_baseline_time_constant_s: f64,
    /// Cutoff of the ECG smoothing filter (low-pass)
    pub ecg_lowpass_hz: f64,
    /// Fraction of the amplitude envelope a beat must exceed
    pub detector_threshold: f64,
    /// Half-life of the amplitude envelope
    pub envelope_half_life_s: f64,
    /// Signal history required before beats are trusted
    pub warmup_s: f64,
    /// Plausible heart-rate band; values outside lower confidence
    pub min_heart_rate_bpm: f64,
    pub max_heart_rate_bpm: f64,
}

impl Default for FeatureConfig {
    fn default() -> Self {
        Self {
            tonic_time_constant_s: 10.0,
            hrv_window_beats: 10,
            refractory_s: 0.25,
            min_ibi_s: 0.3,
            max_ibi_s: 2.0,
            ecg_baseline_time_constant_s: 0.75,
            ecg_lowpass_hz: 25.0,
            detector_threshold: 0.5,
            envelope_half_life_s: 2.0,
            warmup_s: 2.0,
            min_heart_rate_bpm: 30.0,
            max_heart_rate_bpm: 220.0,
        }
    }
}

impl FeatureConfig {
    fn validate(&self, sampling_rate_hz: f64) -> Result<(), ConfigError> {
        positive("features.tonic_time_constant_s", self.tonic_time_constant_s)?;
        if self.hrv_window_beats < 2 {
            return Err(ConfigError::invalid(
                "features.hrv_window_beats",
                "must be at least 2",
            ));
        }
        positive("features.refractory_s", self.refractory_s)?;
        positive("features.min_ibi_s", self.min_ibi_s)?;
        if self.max_ibi_s <= self.min_ibi_s {
            return Err(ConfigError::invalid(
                "features.max_ibi_s",
                "must exceed min_ibi_s",
            ));
        }
        positive(
            "features.ecg_baseline_time_constant_s",
            self.ecg_baseline_time_constant_s,
        )?;
        positive("features.ecg_lowpass_hz", self.ecg_lowpass_hz)?;
        if self.ecg_lowpass_hz >= sampling_rate_hz / 2.0 {
            return Err(ConfigError::invalid(
                "features.ecg_lowpass_hz",
                "must be below the Nyquist frequency",
            ));
        }
        if !(self.detector_threshold > 0.0 && self.detector_threshold < 1.0) {
            return Err(ConfigError::invalid(
                "features.detector_threshold",
                "must be in (0, 1)",
            ));
        }
        positive("features.envelope_half_life_s", self.envelope_half_life_s)?;
        if !(self.warmup_s >= 0.0) {
            return Err(ConfigError::invalid("features.warmup_s", "must be non-negative"));
        }
        positive("features.min_heart_rate_bpm", self.min_heart_rate_bpm)?;
        if self.max_heart_rate_bpm <= self.min_heart_rate_bpm {
            return Err(ConfigError::invalid(
                "features.max_heart_rate_bpm",
                "must exceed min_heart_rate_bpm",
            ));
        }
        Ok(())
    }
}

/// Confidence bookkeeping for the stress estimator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfidenceConfig {
    /// Multiplier applied on every gap or skipped tick
    pub gap_decay: f64,
    /// Multiplier applied when signal quality is low
    pub quality_penalty: f64,
    /// Additive recovery per clean tick
    pub recovery_step: f64,
}

impl Default for ConfidenceConfig {
    fn default() -> Self {
        Self {
            gap_decay: 0.7,
            quality_penalty: 0.6,
            recovery_step: 0.1,
        }
    }
}

impl ConfidenceConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if !(self.gap_decay > 0.0 && self.gap_decay < 1.0) {
            return Err(ConfigError::invalid("confidence.gap_decay", "must be in (0, 1)"));
        }
        if !(self.quality_penalty > 0.0 && self.quality_penalty < 1.0) {
            return Err(ConfigError::invalid(
                "confidence.quality_penalty",
                "must be in (0, 1)",
            ));
        }
        if !(self.recovery_step > 0.0 && self.recovery_step <= 1.0) {
            return Err(ConfigError::invalid(
                "confidence.recovery_step",
                "must be in (0, 1]",
            ));
        }
        Ok(())
    }
}

/// Score thresholds for the calm/moderate/stressed states.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StressLevels {
    pub calm_below: f64,
    pub moderate_below: f64,
}

impl Default for StressLevels {
    fn default() -> Self {
        Self {
            calm_below: 0.35,
            moderate_below: 0.65,
        }
    }
}

impl StressLevels {
    fn validate(&self) -> Result<(), ConfigError> {
        unit_interval("stress_levels.calm_below", self.calm_below)?;
        unit_interval("stress_levels.moderate_below", self.moderate_below)?;
        if self.moderate_below < self.calm_below {
            return Err(ConfigError::invalid(
                "stress_levels.moderate_below",
                "must not be below calm_below",
            ));
        }
        Ok(())
    }
}

fn finite(field: &str, value: f64) -> Result<(), ConfigError> {
    if value.is_finite() {
        Ok(())
    } else {
        Err(ConfigError::invalid(field, "must be finite"))
    }
}

fn positive(field: &str, value: f64) -> Result<(), ConfigError> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(ConfigError::invalid(field, format!("{value} must be positive")))
    }
}

fn unit_interval(field: &str, value: f64) -> Result<(), ConfigError> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(ConfigError::invalid(field, format!("{value} outside [0, 1]")))
    }
}

/// Serde support for Duration as fractional seconds.
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.as_secs_f64().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom)
    }
}
