//! Stress history and the exported session report.
//!
//! The history keeps the most recent published settings (bounded, like a
//! ring buffer); the report bundles it with the baseline, a summary and the
//! session counters as a single JSON document.

use crate::core::calibration::SessionBaseline;
use crate::core::difficulty::DifficultySetting;
use crate::core::stress::StressLevel;
use crate::core::windowing::RollingWindow;
use crate::session::SessionState;
use crate::telemetry::StatsSnapshot;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use statrs::statistics::Statistics;
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// The current report format version.
pub const REPORT_VERSION: &str = "1.0";

/// The name of this producer.
pub const PRODUCER_NAME: &str = "stressloop";

/// Entries kept in the stress history.
pub const HISTORY_CAPACITY: usize = 300;

/// One published setting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    /// Session time of the tick (seconds)
    pub timestamp: f64,
    /// Wall-clock time of the tick
    pub recorded_at: DateTime<Utc>,
    pub level: StressLevel,
    pub setting: DifficultySetting,
    /// Whether the setting was held over from an earlier tick
    pub held: bool,
}

/// Bounded history of published settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StressHistory {
    entries: RollingWindow<HistoryEntry>,
}

impl Default for StressHistory {
    fn default() -> Self {
        Self::new(HISTORY_CAPACITY)
    }
}

impl StressHistory {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: RollingWindow::new(capacity),
        }
    }

    pub fn push(&mut self, entry: HistoryEntry) {
        self.entries.push(entry);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn latest(&self) -> Option<&HistoryEntry> {
        self.entries.latest()
    }

    pub fn iter(&self) -> impl Iterator<Item = &HistoryEntry> {
        self.entries.iter()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn summary(&self) -> Option<HistorySummary> {
        if self.entries.is_empty() {
            return None;
        }
        let stress: Vec<f64> = self.iter().map(|e| e.setting.stress_score).collect();
        let count_level = |level| self.iter().filter(|e| e.level == level).count();

        Some(HistorySummary {
            entries: self.len(),
            mean_stress: stress.iter().mean(),
            std_stress: stress.iter().population_std_dev(),
            max_stress: stress.iter().copied().fold(f64::NEG_INFINITY, f64::max),
            mean_confidence: self.iter().map(|e| e.setting.confidence).mean(),
            held: self.iter().filter(|e| e.held).count(),
            calm: count_level(StressLevel::Calm),
            moderate: count_level(StressLevel::Moderate),
            stressed: count_level(StressLevel::Stressed),
        })
    }
}

/// Aggregate view of the stress history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistorySummary {
    pub entries: usize,
    pub mean_stress: f64,
    pub std_stress: f64,
    pub max_stress: f64,
    pub mean_confidence: f64,
    pub held: usize,
    pub calm: usize,
    pub moderate: usize,
    pub stressed: usize,
}

/// Producer metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProducerInfo {
    pub name: String,
    pub version: String,
    pub instance_id: Uuid,
}

/// Exported record of one session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionReport {
    pub report_version: String,
    pub producer: ProducerInfo,
    pub session_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub computed_at: DateTime<Utc>,
    pub state: SessionState,
    pub sensor_enabled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub baseline: Option<SessionBaseline>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<HistorySummary>,
    pub history: Vec<HistoryEntry>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stats: Option<StatsSnapshot>,
}

/// Builder for session reports.
#[derive(Debug, Clone)]
pub struct ReportBuilder {
    instance_id: Uuid,
    session_id: Uuid,
    started_at: DateTime<Utc>,
}

impl ReportBuilder {
    pub fn new() -> Self {
        Self {
            instance_id: Uuid::new_v4(),
            session_id: Uuid::new_v4(),
            started_at: Utc::now(),
        }
    }

    pub fn with_session_id(mut self, session_id: Uuid) -> Self {
        self.session_id = session_id;
        self
    }

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    pub fn build(
        &self,
        state: SessionState,
        sensor_enabled: bool,
        baseline: Option<&SessionBaseline>,
        history: &StressHistory,
        stats: Option<StatsSnapshot>,
    ) -> SessionReport {
        SessionReport {
            report_version: REPORT_VERSION.to_string(),
            producer: ProducerInfo {
                name: PRODUCER_NAME.to_string(),
                version: crate::VERSION.to_string(),
                instance_id: self.instance_id,
            },
            session_id: self.session_id,
            started_at: self.started_at,
            computed_at: Utc::now(),
            state,
            sensor_enabled,
            baseline: baseline.cloned(),
            summary: history.summary(),
            history: history.iter().cloned().collect(),
            stats,
        }
    }
}

impl Default for ReportBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionReport {
    /// Write the report as `session_YYYYmmdd_HHMMSS.json` under `dir`.
    pub fn export(&self, dir: &Path) -> std::io::Result<PathBuf> {
        std::fs::create_dir_all(dir)?;
        let name = format!("session_{}.json", self.started_at.format("%Y%m%d_%H%M%S"));
        let path = dir.join(name);
        let json = serde_json::to_string_pretty(self).map_err(std::io::Error::other)?;
        std::fs::write(&path, json)?;
        Ok(path)
    }
}
