//! Sample and source types shared by every acquisition path.

use crate::error::SensorError;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

/// Physiological channel carried by a sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    /// Electrodermal activity (skin conductance, µS)
    Eda,
    /// Electrocardiogram (arbitrary units)
    Ecg,
}

impl Channel {
    pub const ALL: [Channel; 2] = [Channel::Eda, Channel::Ecg];

    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::Eda => "eda",
            Channel::Ecg => "ecg",
        }
    }
}

impl std::fmt::Display for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Channel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "eda" | "gsr" => Ok(Channel::Eda),
            "ecg" => Ok(Channel::Ecg),
            other => Err(format!("unknown channel '{other}'")),
        }
    }
}

/// One timestamped reading from a sensor channel.
///
/// `timestamp` is in seconds on the session clock. Sources must produce
/// strictly increasing timestamps per channel.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RawSample {
    pub channel: Channel,
    pub timestamp: f64,
    pub value: f64,
}

impl RawSample {
    pub fn new(channel: Channel, timestamp: f64, value: f64) -> Self {
        Self {
            channel,
            timestamp,
            value,
        }
    }
}

/// Monotonic session clock shared by the tick loop and paced sources.
#[derive(Debug, Clone, Copy)]
pub struct SessionClock {
    origin: Instant,
}

impl SessionClock {
    pub fn start() -> Self {
        Self {
            origin: Instant::now(),
        }
    }

    /// Seconds since the clock started.
    pub fn now(&self) -> f64 {
        self.origin.elapsed().as_secs_f64()
    }
}

/// A lazy, potentially infinite stream of samples for one channel.
///
/// Implementations sit on top of an external sensor driver; the byte-level
/// device protocol stays behind this trait.
pub trait SignalSource: Send {
    /// Channel produced by this source.
    fn channel(&self) -> Channel;

    /// Read the next sample, waiting at most `timeout`.
    ///
    /// Returns [`SensorError::Timeout`] when nothing arrived in time and
    /// [`SensorError::Disconnected`] when the link dropped. Must never block
    /// longer than `timeout`.
    fn read(&mut self, timeout: Duration) -> Result<RawSample, SensorError>;

    /// Try to re-establish a dropped link. Must return within a bounded time.
    fn reconnect(&mut self) -> Result<(), SensorError> {
        Ok(())
    }
}

impl<S: SignalSource + ?Sized> SignalSource for Box<S> {
    fn channel(&self) -> Channel {
        (**self).channel()
    }

    fn read(&mut self, timeout: Duration) -> Result<RawSample, SensorError> {
        (**self).read(timeout)
    }

    fn reconnect(&mut self) -> Result<(), SensorError> {
        (**self).reconnect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_parsing() {
        assert_eq!("EDA".parse::<Channel>(), Ok(Channel::Eda));
        assert_eq!("gsr".parse::<Channel>(), Ok(Channel::Eda));
        assert_eq!(" ecg ".parse::<Channel>(), Ok(Channel::Ecg));
        assert!("emg".parse::<Channel>().is_err());
    }

    #[test]
    fn test_sample_serialization() {
        let sample = RawSample::new(Channel::Ecg, 1.25, 0.5);
        let json = serde_json::to_string(&sample).unwrap();
        assert_eq!(json, r#"{"channel":"ecg","timestamp":1.25,"value":0.5}"#);
    }
}
