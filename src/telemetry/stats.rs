//! Session counters.
//!
//! Lock-free counters updated by the session tick and readable from any
//! thread, with optional persistence of lifetime totals.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::warn;

/// Counters for the current session.
#[derive(Debug)]
pub struct SessionStats {
    /// Raw samples handed to the pipeline
    samples_received: AtomicU64,
    /// Samples dropped by full acquisition buffers
    samples_overwritten: AtomicU64,
    /// Ticks processed while running
    ticks: AtomicU64,
    /// Ticks that published a freshly computed setting
    settings_published: AtomicU64,
    /// Ticks that republished a held setting
    ticks_held: AtomicU64,
    /// Feature vectors flagged for low signal quality
    quality_issues: AtomicU64,
    /// Sensor disconnects observed
    disconnects: AtomicU64,
    /// Reconnect attempts made
    reconnect_attempts: AtomicU64,
    /// Calibrations that produced a baseline
    calibrations_completed: AtomicU64,
    /// Calibrations rejected or cancelled
    calibrations_failed: AtomicU64,
    /// Session start time
    session_start: DateTime<Utc>,
    /// Path for persisting stats
    persist_path: Option<PathBuf>,
}

macro_rules! counter {
    ($record:ident, $field:ident) => {
        pub fn $record(&self) {
            self.$field.fetch_add(1, Ordering::Relaxed);
        }
    };
}

impl SessionStats {
    pub fn new() -> Self {
        Self {
            samples_received: AtomicU64::new(0),
            samples_overwritten: AtomicU64::new(0),
            ticks: AtomicU64::new(0),
            settings_published: AtomicU64::new(0),
            ticks_held: AtomicU64::new(0),
            quality_issues: AtomicU64::new(0),
            disconnects: AtomicU64::new(0),
            reconnect_attempts: AtomicU64::new(0),
            calibrations_completed: AtomicU64::new(0),
            calibrations_failed: AtomicU64::new(0),
            session_start: Utc::now(),
            persist_path: None,
        }
    }

    /// Counters that accumulate into the file at `path`.
    pub fn with_persistence(path: PathBuf) -> Self {
        let mut stats = Self::new();
        stats.persist_path = Some(path);

        if let Err(e) = stats.load() {
            warn!(error = %e, "Could not load previous session stats");
        }

        stats
    }

    pub fn record_samples(&self, count: u64) {
        self.samples_received.fetch_add(count, Ordering::Relaxed);
    }

    /// Set the buffer overflow total reported by the feeds.
    pub fn set_samples_overwritten(&self, total: u64) {
        self.samples_overwritten.store(total, Ordering::Relaxed);
    }

    counter!(record_tick, ticks);
    counter!(record_published, settings_published);
    counter!(record_held, ticks_held);
    counter!(record_quality_issue, quality_issues);
    counter!(record_disconnect, disconnects);
    counter!(record_reconnect_attempt, reconnect_attempts);
    counter!(record_calibration_completed, calibrations_completed);
    counter!(record_calibration_failed, calibrations_failed);

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            samples_received: self.samples_received.load(Ordering::Relaxed),
            samples_overwritten: self.samples_overwritten.load(Ordering::Relaxed),
            ticks: self.ticks.load(Ordering::Relaxed),
            settings_published: self.settings_published.load(Ordering::Relaxed),
            ticks_held: self.ticks_held.load(Ordering::Relaxed),
            quality_issues: self.quality_issues.load(Ordering::Relaxed),
            disconnects: self.disconnects.load(Ordering::Relaxed),
            reconnect_attempts: self.reconnect_attempts.load(Ordering::Relaxed),
            calibrations_completed: self.calibrations_completed.load(Ordering::Relaxed),
            calibrations_failed: self.calibrations_failed.load(Ordering::Relaxed),
            session_start: self.session_start,
            session_duration_secs: (Utc::now() - self.session_start).num_seconds().max(0) as u64,
        }
    }

    /// Summary for display.
    pub fn summary(&self) -> String {
        let s = self.snapshot();
        format!(
            "Session Statistics:\n\
             - Samples received: {}\n\
             - Samples overwritten: {}\n\
             - Ticks: {} ({} published, {} held)\n\
             - Quality issues: {}\n\
             - Disconnects: {} ({} reconnect attempts)\n\
             - Calibrations: {} completed, {} failed\n\
             - Session duration: {} seconds",
            s.samples_received,
            s.samples_overwritten,
            s.ticks,
            s.settings_published,
            s.ticks_held,
            s.quality_issues,
            s.disconnects,
            s.reconnect_attempts,
            s.calibrations_completed,
            s.calibrations_failed,
            s.session_duration_secs
        )
    }

    /// Save stats to disk.
    pub fn save(&self) -> Result<(), std::io::Error> {
        if let Some(ref path) = self.persist_path {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }

            let persisted = PersistedStats {
                counters: self.snapshot(),
                last_updated: Utc::now(),
            };
            let json = serde_json::to_string_pretty(&persisted).map_err(std::io::Error::other)?;
            std::fs::write(path, json)?;
        }
        Ok(())
    }

    fn load(&mut self) -> Result<(), std::io::Error> {
        if let Some(ref path) = self.persist_path {
            if path.exists() {
                let content = std::fs::read_to_string(path)?;
                let persisted: PersistedStats =
                    serde_json::from_str(&content).map_err(std::io::Error::other)?;
                let c = persisted.counters;

                self.samples_received.store(c.samples_received, Ordering::Relaxed);
                self.ticks.store(c.ticks, Ordering::Relaxed);
                self.settings_published
                    .store(c.settings_published, Ordering::Relaxed);
                self.ticks_held.store(c.ticks_held, Ordering::Relaxed);
                self.quality_issues.store(c.quality_issues, Ordering::Relaxed);
                self.disconnects.store(c.disconnects, Ordering::Relaxed);
                self.reconnect_attempts
                    .store(c.reconnect_attempts, Ordering::Relaxed);
                self.calibrations_completed
                    .store(c.calibrations_completed, Ordering::Relaxed);
                self.calibrations_failed
                    .store(c.calibrations_failed, Ordering::Relaxed);
            }
        }
        Ok(())
    }

    /// Read persisted totals without creating a live counter set.
    pub fn load_snapshot(path: &std::path::Path) -> Result<Option<StatsSnapshot>, std::io::Error> {
        if !path.exists() {
            return Ok(None);
        }
        let content = std::fs::read_to_string(path)?;
        let persisted: PersistedStats =
            serde_json::from_str(&content).map_err(std::io::Error::other)?;
        Ok(Some(persisted.counters))
    }
}

impl Default for SessionStats {
    fn default() -> Self {
        Self::new()
    }
}

/// Point-in-time copy of the counters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    pub samples_received: u64,
    pub samples_overwritten: u64,
    pub ticks: u64,
    pub settings_published: u64,
    pub ticks_held: u64,
    pub quality_issues: u64,
    pub disconnects: u64,
    pub reconnect_attempts: u64,
    pub calibrations_completed: u64,
    pub calibrations_failed: u64,
    pub session_start: DateTime<Utc>,
    pub session_duration_secs: u64,
}

#[derive(Debug, Serialize, Deserialize)]
struct PersistedStats {
    counters: StatsSnapshot,
    last_updated: DateTime<Utc>,
}

/// Counters shared between the session and its observers.
pub type SharedStats = Arc<SessionStats>;
