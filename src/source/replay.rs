//! Replay of recorded samples.
//!
//! Recordings are newline-delimited JSON, one [`RawSample`] per line:
//!
//! ```text
//! {"channel":"eda","timestamp":0.0,"value":2.01}
//! {"channel":"ecg","timestamp":0.0,"value":0.03}
//! ```

use crate::error::{RecordingError, SensorError};
use crate::source::types::{Channel, RawSample, SignalSource};
use std::collections::VecDeque;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;
use std::time::Duration;

/// Read a recording. Blank lines are ignored.
pub fn load_recording(path: &Path) -> Result<Vec<RawSample>, RecordingError> {
    let reader = BufReader::new(File::open(path)?);
    let mut samples = Vec::new();
    for (index, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let sample = serde_json::from_str(&line).map_err(|source| RecordingError::Parse {
            line: index + 1,
            source,
        })?;
        samples.push(sample);
    }
    Ok(samples)
}

/// Write samples as a recording.
pub fn save_recording(path: &Path, samples: &[RawSample]) -> Result<(), RecordingError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut writer = BufWriter::new(File::create(path)?);
    for sample in samples {
        serde_json::to_writer(&mut writer, sample).map_err(RecordingError::Encode)?;
        writer.write_all(b"\n")?;
    }
    writer.flush()?;
    Ok(())
}

/// Plays back one channel of a recording.
///
/// Once exhausted, reads time out.
#[derive(Debug, Clone)]
pub struct ReplaySource {
    channel: Channel,
    samples: VecDeque<RawSample>,
}

impl ReplaySource {
    /// Take the samples for `channel`, in recorded order.
    pub fn new(channel: Channel, samples: &[RawSample]) -> Self {
        Self {
            channel,
            samples: samples
                .iter()
                .filter(|s| s.channel == channel)
                .copied()
                .collect(),
        }
    }

    pub fn remaining(&self) -> usize {
        self.samples.len()
    }

    pub fn is_exhausted(&self) -> bool {
        self.samples.is_empty()
    }

    /// Timestamp of the last sample still to be played.
    pub fn end_timestamp(&self) -> Option<f64> {
        self.samples.back().map(|s| s.timestamp)
    }
}

impl SignalSource for ReplaySource {
    fn channel(&self) -> Channel {
        self.channel
    }

    fn read(&mut self, timeout: Duration) -> Result<RawSample, SensorError> {
        self.samples.pop_front().ok_or(SensorError::Timeout {
            channel: self.channel,
            waited_ms: timeout.as_millis() as u64,
        })
    }
}
