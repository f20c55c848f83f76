//! Tracker: a batch of handles released together
//!
//! Collect every handle opened during a multi-step operation, then close them
//! all with one call on both the success and the error path.
//!
//! The tracker always keeps room for one more handle than it holds. `add`
//! stores the handle first and only then grows, so a failed growth can never
//! drop the handle that was just passed in: `free` will still close it.

use crate::context::Context;
use crate::error::{AbiError, AbiResult};
use crate::handle::Handle;

/// Capacity used by `Tracker::new`
pub const DEFAULT_TRACKER_CAPACITY: usize = 5;

/// Growable, insertion-ordered batch of handles.
#[derive(Debug)]
pub struct Tracker {
    handles: Vec<Handle>,
    /// Slots reserved, including the spare one
    size: usize,
    /// Hard cap on `size`; growth past it reports out-of-memory
    limit: Option<usize>,
}

impl Tracker {
    /// Create a tracker with the default capacity
    pub fn new() -> AbiResult<Self> {
        Self::with_capacity(DEFAULT_TRACKER_CAPACITY)
    }

    /// Create a tracker that can hold `capacity` handles before growing
    pub fn with_capacity(capacity: usize) -> AbiResult<Self> {
        Self::build(capacity, None)
    }

    /// Like `with_capacity`, but never reserves more than `limit` slots
    pub fn with_limit(capacity: usize, limit: usize) -> AbiResult<Self> {
        Self::build(capacity, Some(limit))
    }

    fn build(capacity: usize, limit: Option<usize>) -> AbiResult<Self> {
        let size = capacity.checked_add(1).ok_or(AbiError::OutOfMemory)?;
        if limit.is_some_and(|limit| size > limit) {
            return Err(AbiError::OutOfMemory);
        }
        let mut handles = Vec::new();
        handles
            .try_reserve_exact(size)
            .map_err(|_| AbiError::OutOfMemory)?;
        Ok(Tracker {
            handles,
            size,
            limit,
        })
    }

    /// Track a handle.
    ///
    /// On out-of-memory the handle is still tracked, unless the spare slot
    /// was already consumed by an earlier failed growth. Callers should stop
    /// adding and `free` the tracker after the first error.
    pub fn add(&mut self, h: Handle) -> AbiResult<()> {
        if self.handles.len() >= self.size {
            self.resize(self.size * 2 - 1)?;
        }
        self.handles.push(h);
        if self.size <= self.handles.len() {
            self.resize(self.size * 2 - 1)?;
        }
        Ok(())
    }

    fn resize(&mut self, capacity: usize) -> AbiResult<()> {
        let size = capacity + 1;
        if size <= self.handles.len() {
            // would lose handles or leave no spare slot
            return Err(AbiError::OutOfMemory);
        }
        if self.limit.is_some_and(|limit| size > limit) {
            return Err(AbiError::OutOfMemory);
        }
        self.handles
            .try_reserve_exact(size - self.handles.len())
            .map_err(|_| AbiError::OutOfMemory)?;
        self.size = size;
        Ok(())
    }

    /// Forget all handles without closing them (ownership moved elsewhere)
    pub fn remove_all(&mut self) {
        self.handles.clear();
    }

    /// Close every tracked handle in insertion order and drop the tracker
    pub fn free<C: Context + ?Sized>(self, ctx: &C) {
        for h in &self.handles {
            ctx.close(*h);
        }
    }

    /// Tracked handles, in insertion order
    pub fn handles(&self) -> &[Handle] {
        &self.handles
    }

    /// Number of tracked handles
    pub fn len(&self) -> usize {
        self.handles.len()
    }

    /// Check if nothing is tracked
    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Number of reserved slots, including the spare one
    pub fn capacity(&self) -> usize {
        self.size
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn h(i: u64) -> Handle {
        Handle::from_bits(i * 2 + 1)
    }

    #[test]
    fn test_reserves_spare_slot() {
        let tracker = Tracker::with_capacity(0).unwrap();
        assert_eq!(tracker.capacity(), 1);
        assert!(tracker.is_empty());

        let tracker = Tracker::new().unwrap();
        assert_eq!(tracker.capacity(), DEFAULT_TRACKER_CAPACITY + 1);
    }

    #[test]
    fn test_growth_preserves_order() {
        let mut tracker = Tracker::with_capacity(1).unwrap();
        for i in 0..20 {
            tracker.add(h(i)).unwrap();
            assert!(tracker.capacity() > tracker.len());
        }
        let expected: Vec<_> = (0..20).map(h).collect();
        assert_eq!(tracker.handles(), expected.as_slice());
    }

    #[test]
    fn test_failed_growth_keeps_handle() {
        let mut tracker = Tracker::with_limit(1, 2).unwrap();
        tracker.add(h(0)).unwrap();
        tracker.add(h(1)).unwrap_err();
        assert_eq!(tracker.handles(), &[h(0), h(1)]);

        // spare slot already used: the handle is refused, not dropped silently
        assert_eq!(tracker.add(h(2)), Err(AbiError::OutOfMemory));
        assert_eq!(tracker.len(), 2);
    }

    #[test]
    fn test_limit_below_initial_size() {
        assert_eq!(Tracker::with_limit(4, 2).unwrap_err(), AbiError::OutOfMemory);
    }

    #[test]
    fn test_remove_all() {
        let mut tracker = Tracker::with_capacity(2).unwrap();
        tracker.add(h(0)).unwrap();
        tracker.add(h(1)).unwrap();
        tracker.remove_all();
        assert!(tracker.is_empty());
        tracker.add(h(2)).unwrap();
        assert_eq!(tracker.handles(), &[h(2)]);
    }
}
