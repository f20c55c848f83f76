//! Per-operation call counters and cumulative durations

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use rustc_hash::FxHashMap;
use tessera_sdk::ContextOp;

/// Lock-free counters indexed by `ContextOp::id`
#[derive(Debug)]
pub struct TraceCounters {
    calls: [AtomicU64; ContextOp::COUNT],
    durations_ns: [AtomicU64; ContextOp::COUNT],
}

impl TraceCounters {
    /// All counters at zero
    pub fn new() -> Self {
        Self {
            calls: std::array::from_fn(|_| AtomicU64::new(0)),
            durations_ns: std::array::from_fn(|_| AtomicU64::new(0)),
        }
    }

    /// Count one call of `op` that took `elapsed`
    #[inline]
    pub fn record(&self, op: ContextOp, elapsed: Duration) {
        let nanos = u64::try_from(elapsed.as_nanos()).unwrap_or(u64::MAX);
        self.calls[op.id()].fetch_add(1, Ordering::Relaxed);
        self.durations_ns[op.id()].fetch_add(nanos, Ordering::Relaxed);
    }

    /// Calls of one operation
    pub fn calls(&self, op: ContextOp) -> u64 {
        self.calls[op.id()].load(Ordering::Relaxed)
    }

    /// Nanoseconds spent in one operation
    pub fn duration_ns(&self, op: ContextOp) -> u64 {
        self.durations_ns[op.id()].load(Ordering::Relaxed)
    }

    /// Call count of every operation, keyed by operation name
    pub fn call_counts(&self) -> FxHashMap<&'static str, u64> {
        Self::snapshot(&self.calls)
    }

    /// Cumulative nanoseconds of every operation, keyed by operation name
    pub fn durations(&self) -> FxHashMap<&'static str, u64> {
        Self::snapshot(&self.durations_ns)
    }

    fn snapshot(values: &[AtomicU64; ContextOp::COUNT]) -> FxHashMap<&'static str, u64> {
        ContextOp::ALL
            .iter()
            .map(|op| (op.name(), values[op.id()].load(Ordering::Relaxed)))
            .collect()
    }
}

impl Default for TraceCounters {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record() {
        let counters = TraceCounters::new();
        counters.record(ContextOp::Add, Duration::from_nanos(10));
        counters.record(ContextOp::Add, Duration::from_nanos(5));
        assert_eq!(counters.calls(ContextOp::Add), 2);
        assert_eq!(counters.duration_ns(ContextOp::Add), 15);
        assert_eq!(counters.calls(ContextOp::Dup), 0);
    }

    #[test]
    fn test_snapshot_lists_every_op() {
        let counters = TraceCounters::new();
        counters.record(ContextOp::Close, Duration::ZERO);
        let counts = counters.call_counts();
        assert_eq!(counts.len(), ContextOp::COUNT);
        assert_eq!(counts["close"], 1);
        assert_eq!(counts["tracker_new"], 0);
        assert_eq!(counters.durations().len(), ContextOp::COUNT);
    }
}
