//! Reconnect pacing on the session clock.
//!
//! Attempts are scheduled rather than slept for, so the tick never waits on a
//! dead sensor: the delay doubles (by `multiplier`) after every failed
//! attempt, capped at `max_delay_ms`.

use crate::config::BackoffParams;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Backoff {
    params: BackoffParams,
    attempt: u32,
    next_attempt_at: Option<f64>,
}

impl Backoff {
    pub fn new(params: BackoffParams) -> Self {
        Self {
            params,
            attempt: 0,
            next_attempt_at: None,
        }
    }

    /// Delay before attempt number `attempt` (zero-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        let ms = self.params.initial_delay_ms as f64 * self.params.multiplier.powi(attempt as i32);
        let capped = ms.min(self.params.max_delay_ms as f64);
        Duration::from_millis(capped as u64)
    }

    /// Schedule the next attempt relative to `now`.
    pub fn schedule_after(&mut self, now: f64) {
        self.next_attempt_at = Some(now + self.delay(self.attempt).as_secs_f64());
        self.attempt = self.attempt.saturating_add(1);
    }

    pub fn is_due(&self, now: f64) -> bool {
        self.next_attempt_at.is_some_and(|at| now >= at)
    }

    pub fn is_pending(&self) -> bool {
        self.next_attempt_at.is_some()
    }

    /// Attempts scheduled since the last reset.
    pub fn attempts(&self) -> u32 {
        self.attempt
    }

    pub fn reset(&mut self) {
        self.attempt = 0;
        self.next_attempt_at = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delays_grow_and_cap() {
        let backoff = Backoff::new(BackoffParams::default());
        let delays: Vec<u64> = (0..7).map(|a| backoff.delay(a).as_millis() as u64).collect();
        assert_eq!(delays, vec![250, 500, 1000, 2000, 4000, 4000, 4000]);
    }

    #[test]
    fn test_scheduling() {
        let mut backoff = Backoff::new(BackoffParams::default());
        assert!(!backoff.is_due(100.0));

        backoff.schedule_after(10.0);
        assert!(!backoff.is_due(10.2));
        assert!(backoff.is_due(10.25));

        backoff.schedule_after(10.25);
        assert!(!backoff.is_due(10.5));
        assert!(backoff.is_due(10.75));
        assert_eq!(backoff.attempts(), 2);

        backoff.reset();
        assert!(!backoff.is_pending());
        assert_eq!(backoff.attempts(), 0);
    }
}
