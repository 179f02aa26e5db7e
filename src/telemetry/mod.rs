//! Session telemetry: counters and the stress-state log.

pub mod stats;
pub mod stress_log;

// Re-export commonly used types
pub use stats::{SessionStats, SharedStats, StatsSnapshot};
pub use stress_log::{StressLog, STRESS_LOG_FILE, STRESS_LOG_HEADER};
