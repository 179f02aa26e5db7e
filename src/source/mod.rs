//! Signal acquisition.
//!
//! Sources produce timestamped samples for one channel each; feeds hand them
//! to the session tick without blocking it. The byte-level sensor protocol is
//! outside this crate: a hardware driver plugs in by implementing
//! [`SignalSource`].

pub mod fault;
pub mod feed;
pub mod replay;
pub mod synthetic;
pub mod types;

// Re-export commonly used types
pub use fault::OutageFeed;
pub use feed::{FeedBatch, InlineFeed, SampleFeed, ThreadedFeed};
pub use replay::{load_recording, save_recording, ReplaySource};
pub use synthetic::{Scenario, SyntheticConfig, SyntheticSource};
pub use types::{Channel, RawSample, SessionClock, SignalSource};
