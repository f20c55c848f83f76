//! Debug mode: handle auditing wrapper
//!
//! - `DebugContext`: wraps another context and checks every handle
//! - `LeakDetector`: generation-based leak reports
//! - `DebugHandleInfo`: snapshot of a debug handle for diagnostics

mod context;
mod handles;
mod leak;

pub use context::{DebugContext, InvalidHandleCallback, OpenHandles};
pub use handles::{DebugHandleInfo, HandleViolation};
pub use leak::{LeakDetector, LeakError};
