//! Run execution engine: clock, retry policy, executor, replay.

pub mod clock;
pub mod executor;
pub mod replay;
pub mod retry;

pub use clock::{Clock, ManualClock, SystemClock};
pub use executor::{CancelRegistry, RunExecutor};
pub use replay::{ReplayEngine, ReplayOptions};
