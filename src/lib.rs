//! Stressloop - biofeedback-driven adaptive game difficulty.
//!
//! This library reads electrodermal activity (EDA) and electrocardiogram
//! (ECG) signals, estimates a player's stress relative to a per-session
//! resting baseline, and maps it to difficulty parameters a game applies in
//! real time.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                         Stressloop                           │
//! ├─────────────────────────────────────────────────────────────┤
//! │  ┌─────────────┐   ┌─────────────┐   ┌─────────────┐       │
//! │  │   Sources   │──▶│  Features   │──▶│ Calibration │       │
//! │  │  (EDA/ECG)  │   │ (per tick)  │   │ (baseline)  │       │
//! │  └─────────────┘   └─────────────┘   └─────────────┘       │
//! │         │                 │                 │               │
//! │         ▼                 ▼                 ▼               │
//! │  ┌─────────────┐   ┌─────────────┐   ┌─────────────┐       │
//! │  │  Session    │◀──│   Stress    │──▶│ Difficulty  │──▶ game│
//! │  │ Orchestrator│   │  Estimator  │   │ Controller  │       │
//! │  └─────────────┘   └─────────────┘   └─────────────┘       │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```no_run
//! use stressloop::source::{InlineFeed, SampleFeed, SyntheticConfig, SyntheticSource};
//! use stressloop::{Config, SessionOrchestrator};
//!
//! let (eda, ecg) = SyntheticSource::pair(&SyntheticConfig::default());
//! let feeds: Vec<Box<dyn SampleFeed>> =
//!     vec![Box::new(InlineFeed::new(eda)), Box::new(InlineFeed::new(ecg))];
//!
//! let (mut session, mut reader) = SessionOrchestrator::new(Config::default(), feeds)?;
//! session.start(0.0)?;
//! for t in 1..=60 {
//!     session.tick(t as f64)?;
//!     if let Some(setting) = reader.take_fresh() {
//!         println!("blur {:.2}", setting.blur_radius);
//!     }
//! }
//! # Ok::<(), stressloop::SessionError>(())
//! ```

pub mod channel;
pub mod config;
pub mod core;
pub mod error;
pub mod session;
pub mod source;
pub mod telemetry;

// Re-export key types at crate root for convenience
pub use config::Config;
pub use core::{DifficultySetting, SessionBaseline, StressLevel, StressScore};
pub use error::{CalibrationError, ConfigError, SensorError, SessionError};
pub use session::{SessionOrchestrator, SessionReport, SessionState, TickOutcome};
pub use source::{Channel, RawSample, SampleFeed, SignalSource};
pub use telemetry::{SessionStats, SharedStats};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Notice displayed to players before a sensor session.
pub const DISCLAIMER: &str = r#"
╔══════════════════════════════════════════════════════════════════╗
║                 STRESSLOOP - BIOFEEDBACK NOTICE                  ║
╠══════════════════════════════════════════════════════════════════╣
║                                                                  ║
║  This program adapts game difficulty to physiological signals.   ║
║                                                                  ║
║  ✓ WHAT IT USES:                                                 ║
║    • Skin conductance (EDA) from a wearable sensor               ║
║    • Heart activity (ECG) from the same sensor                   ║
║    • A resting baseline recorded at the start of each session    ║
║                                                                  ║
║  ✗ WHAT IT IS NOT:                                               ║
║    • NOT a medical device and NOT medical grade                  ║
║    • Not a diagnosis of stress, anxiety or any condition         ║
║                                                                  ║
║  Signals are processed locally and are not uploaded anywhere.    ║
║  Remove the sensor or stop the session at any time.              ║
║                                                                  ║
╚══════════════════════════════════════════════════════════════════╝
"#;
