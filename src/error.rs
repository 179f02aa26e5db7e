//! Error types for stressloop.
//!
//! Transient sensor faults ([`SensorError`]) are absorbed by the session;
//! calibration and configuration faults are surfaced to the caller with
//! structured detail; [`SessionError::SensorFatal`] is the escalation of
//! repeated transient faults.

use crate::source::Channel;
use thiserror::Error;

/// Faults reported by a signal source. Both are transient.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SensorError {
    #[error("sensor disconnected on {channel}: {detail}")]
    Disconnected { channel: Channel, detail: String },

    #[error("no sample on {channel} within {waited_ms} ms")]
    Timeout { channel: Channel, waited_ms: u64 },
}

impl SensorError {
    pub fn disconnected(channel: Channel, detail: impl Into<String>) -> Self {
        SensorError::Disconnected {
            channel,
            detail: detail.into(),
        }
    }

    pub fn channel(&self) -> Channel {
        match self {
            SensorError::Disconnected { channel, .. } | SensorError::Timeout { channel, .. } => {
                *channel
            }
        }
    }

    pub fn is_disconnect(&self) -> bool {
        matches!(self, SensorError::Disconnected { .. })
    }
}

/// Why a calibration window could not produce a usable baseline.
#[derive(Debug, Clone, PartialEq)]
pub enum Shortfall {
    /// Fewer raw samples than the configured minimum arrived.
    TooFewSamples { observed: usize, required: usize },
    /// Not enough feature ticks to estimate a spread.
    TooFewFeatures { observed: usize, required: usize },
    /// The baseline has (near) zero spread.
    ZeroVariance { std: f64 },
}

impl std::fmt::Display for Shortfall {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Shortfall::TooFewSamples { observed, required } => {
                write!(f, "{observed} samples observed, {required} required")
            }
            Shortfall::TooFewFeatures { observed, required } => {
                write!(f, "{observed} feature ticks observed, {required} required")
            }
            Shortfall::ZeroVariance { std } => {
                write!(f, "baseline spread {std:e} carries no physiological variation")
            }
        }
    }
}

/// Calibration failures. Fatal to the calibration only.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CalibrationError {
    #[error("insufficient samples on {channel}: {shortfall}")]
    InsufficientSamples { channel: Channel, shortfall: Shortfall },

    #[error("calibration cancelled")]
    Cancelled,
}

/// Signal quality problems. Non-fatal; they lower confidence.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum QualityIssue {
    #[error("heart rate {bpm:.1} bpm outside [{min}, {max}]")]
    HeartRateOutOfRange { bpm: f64, min: f64, max: f64 },

    #[error("non-finite {feature}")]
    NonFinite { feature: &'static str },
}

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid configuration: {field}: {reason}")]
    Invalid { field: String, reason: String },

    #[error("IO error: {0}")]
    Io(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Serialize error: {0}")]
    Serialize(String),
}

impl ConfigError {
    pub fn invalid(field: impl Into<String>, reason: impl Into<String>) -> Self {
        ConfigError::Invalid {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

/// Errors reading or writing NDJSON sample recordings.
#[derive(Debug, Error)]
pub enum RecordingError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("line {line}: {source}")]
    Parse {
        line: usize,
        source: serde_json::Error,
    },

    #[error("encode error: {0}")]
    Encode(#[source] serde_json::Error),
}

/// Errors surfaced by the session orchestrator.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Calibration(#[from] CalibrationError),

    #[error("sensor on {channel} failed {failures} consecutive ticks: {last}")]
    SensorFatal {
        channel: Channel,
        failures: u32,
        last: SensorError,
    },

    #[error("cannot {action} while {state}")]
    InvalidTransition {
        state: crate::session::SessionState,
        action: &'static str,
    },
}
