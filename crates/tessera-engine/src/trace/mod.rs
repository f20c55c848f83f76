//! Trace mode: call counting and timing wrapper

mod context;
mod counters;

pub use context::{TraceContext, TraceFunction};
pub use counters::TraceCounters;
