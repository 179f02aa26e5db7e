//! Bounded windows and fixed-cadence scheduling.
//!
//! Feature state never grows with session length: every history is either a
//! count-bounded ring or a per-tick accumulator that is reset when the tick
//! fires.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Ring of the most recent `capacity` values.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RollingWindow<T> {
    values: VecDeque<T>,
    capacity: usize,
}

impl<T> RollingWindow<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            values: VecDeque::with_capacity(capacity),
            capacity: capacity.max(1),
        }
    }

    /// Add a value, evicting the oldest when full.
    pub fn push(&mut self, value: T) {
        self.values.push_back(value);
        while self.values.len() > self.capacity {
            self.values.pop_front();
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.values.len() == self.capacity
    }

    pub fn latest(&self) -> Option<&T> {
        self.values.back()
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.values.iter()
    }

    pub fn clear(&mut self) {
        self.values.clear();
    }
}

/// Fixed-rate tick schedule on the session clock.
#[derive(Debug, Clone)]
pub struct Cadence {
    interval: f64,
    next_due: Option<f64>,
    skipped: u64,
}

impl Cadence {
    pub fn new(rate_hz: f64) -> Self {
        Self {
            interval: 1.0 / rate_hz,
            next_due: None,
            skipped: 0,
        }
    }

    pub fn interval(&self) -> f64 {
        self.interval
    }

    /// Anchor the schedule so the first tick fires one interval after `start`.
    pub fn start_at(&mut self, start: f64) {
        self.next_due = Some(start + self.interval);
    }

    /// Whether a tick is due at `now`. Advances the schedule when it is;
    /// whole intervals that elapsed without a call count as skipped.
    pub fn poll(&mut self, now: f64) -> bool {
        let due = match self.next_due {
            Some(due) => due,
            None => {
                self.start_at(now);
                return false;
            }
        };
        if now < due {
            return false;
        }
        let behind = ((now - due) / self.interval).floor();
        self.skipped += behind as u64;
        self.next_due = Some(due + (behind + 1.0) * self.interval);
        true
    }

    /// Intervals that elapsed without being polled.
    pub fn skipped(&self) -> u64 {
        self.skipped
    }

    pub fn reset(&mut self) {
        self.next_due = None;
        self.skipped = 0;
    }
}

/// Running sum/count for the values that arrive within one tick.
#[derive(Debug, Clone, Default)]
pub struct TickAccumulator {
    sum: f64,
    sum_abs: f64,
    count: usize,
}

impl TickAccumulator {
    pub fn add(&mut self, value: f64) {
        self.sum += value;
        self.sum_abs += value.abs();
        self.count += 1;
    }

    pub fn count(&self) -> usize {
        self.count
    }

    pub fn mean(&self) -> Option<f64> {
        (self.count > 0).then(|| self.sum / self.count as f64)
    }

    pub fn mean_abs(&self) -> Option<f64> {
        (self.count > 0).then(|| self.sum_abs / self.count as f64)
    }

    /// Return the accumulated mean and start a fresh tick.
    pub fn take(&mut self) -> Option<f64> {
        let mean = self.mean();
        *self = Self::default();
        mean
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rolling_window_evicts_oldest() {
        let mut window = RollingWindow::new(3);
        for i in 0..5 {
            window.push(i);
        }
        assert!(window.is_full());
        assert_eq!(window.iter().copied().collect::<Vec<_>>(), vec![2, 3, 4]);
        assert_eq!(window.latest(), Some(&4));
    }

    #[test]
    fn test_cadence_fires_once_per_interval() {
        let mut cadence = Cadence::new(1.0);
        cadence.start_at(0.0);

        assert!(!cadence.poll(0.5));
        assert!(cadence.poll(1.0));
        assert!(!cadence.poll(1.5));
        assert!(cadence.poll(2.2));
        assert_eq!(cadence.skipped(), 0);
    }

    #[test]
    fn test_cadence_counts_skipped_intervals() {
        let mut cadence = Cadence::new(2.0);
        cadence.start_at(0.0);

        // Due at 0.5; polling at 2.1 skips the slots at 0.5, 1.0, 1.5.
        assert!(cadence.poll(2.1));
        assert_eq!(cadence.skipped(), 3);
        assert!(!cadence.poll(2.4));
        assert!(cadence.poll(2.5));
    }

    #[test]
    fn test_accumulator_take_resets() {
        let mut acc = TickAccumulator::default();
        assert_eq!(acc.take(), None);
        acc.add(1.0);
        acc.add(-3.0);
        assert_eq!(acc.mean_abs(), Some(2.0));
        assert_eq!(acc.take(), Some(-1.0));
        assert_eq!(acc.count(), 0);
    }
}
