//! Core signal pipeline.
//!
//! This module contains:
//! - Bounded windows and tick scheduling
//! - Feature extraction from raw EDA/ECG samples
//! - Baseline calibration
//! - Stress estimation against the baseline
//! - The stress-to-difficulty mapping

pub mod calibration;
pub mod difficulty;
pub mod features;
pub mod stress;
pub mod windowing;

// Re-export commonly used types
pub use calibration::{calibrate_samples, CalibrationProfile, Calibrator, SessionBaseline};
pub use difficulty::{DifficultyController, DifficultySetting};
pub use features::{FeatureExtractor, FeatureVector};
pub use stress::{StressEstimator, StressLevel, StressScore};
pub use windowing::{Cadence, RollingWindow};
