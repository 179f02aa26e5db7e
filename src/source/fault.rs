//! Outage injection for exercising the session's fault handling.

use crate::error::SensorError;
use crate::source::feed::{FeedBatch, SampleFeed};
use crate::source::types::Channel;

/// Wraps a feed and drops its link over configured session-time windows.
///
/// Inside a window every pull reports a disconnect, samples stamped inside it
/// are discarded and reconnect attempts fail.
pub struct OutageFeed<F> {
    inner: F,
    windows: Vec<(f64, f64)>,
    last_pull: f64,
}

impl<F: SampleFeed> OutageFeed<F> {
    /// `windows` are half-open `[start, end)` intervals in session seconds.
    pub fn new(inner: F, windows: Vec<(f64, f64)>) -> Self {
        Self {
            inner,
            windows,
            last_pull: f64::NEG_INFINITY,
        }
    }

    fn in_outage(&self, t: f64) -> bool {
        self.windows.iter().any(|&(start, end)| t >= start && t < end)
    }
}

impl<F: SampleFeed> SampleFeed for OutageFeed<F> {
    fn channel(&self) -> Channel {
        self.inner.channel()
    }

    fn pull(&mut self, until: f64) -> FeedBatch {
        let mut batch = self.inner.pull(until);
        batch.samples.retain(|s| !self.in_outage(s.timestamp));
        if self.in_outage(until) {
            batch.fault = Some(SensorError::disconnected(self.channel(), "injected outage"));
        }
        self.last_pull = until;
        batch
    }

    fn reconnect(&mut self) -> Result<(), SensorError> {
        if self.in_outage(self.last_pull) {
            return Err(SensorError::disconnected(self.channel(), "injected outage"));
        }
        self.inner.reconnect()
    }

    fn overwritten(&self) -> u64 {
        self.inner.overwritten()
    }
}
