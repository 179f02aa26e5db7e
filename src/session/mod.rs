//! Session lifecycle: the orchestrating state machine, reconnect pacing and
//! the exported report.

pub mod backoff;
pub mod orchestrator;
pub mod report;

// Re-export commonly used types
pub use backoff::Backoff;
pub use orchestrator::{SessionOrchestrator, SessionState, TickOutcome};
pub use report::{HistoryEntry, HistorySummary, ReportBuilder, SessionReport, StressHistory};
