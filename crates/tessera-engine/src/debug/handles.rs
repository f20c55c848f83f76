//! Debug handle records
//!
//! Every handle the debug context hands out is a record in an arena. A record
//! is in exactly one of these states:
//!
//! - **open**: linked into the open list. New records are pushed at the head,
//!   so generations never increase along the list.
//! - **closed**: appended to the closed queue, a FIFO bounded by `closed_max`.
//!   When the queue overflows the oldest record is evicted.
//! - **pinned**: a context-owned constant; in no list and never closed.
//! - **free**: the arena slot is unused. Freeing bumps the slot's epoch, so a
//!   debug handle that outlived its record no longer matches.
//!
//! Debug handle bits are `(epoch << 32) | ((index + 1) << 1)`. They are always
//! even, which tells them apart from universal handles.

use std::fmt;

use log::trace;
use tessera_sdk::{AbiError, Handle, ObjectRef};

const INDEX_LIMIT: usize = (u32::MAX >> 1) as usize;

/// Invalid handle usage detected by the debug context
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleViolation {
    /// Bits do not name a record
    Invalid(Handle),
    /// A universal handle was passed to the debug context
    Foreign(Handle),
    /// Handle is in the closed queue
    UseAfterClose(Handle),
    /// Record was evicted and its slot freed or reused
    Stale(Handle),
    /// Closed handle closed again
    DoubleClose(Handle),
    /// Context-owned constant handle was closed
    ConstantClosed(Handle),
}

impl HandleViolation {
    /// The offending handle
    pub fn handle(&self) -> Handle {
        match *self {
            HandleViolation::Invalid(h)
            | HandleViolation::Foreign(h)
            | HandleViolation::UseAfterClose(h)
            | HandleViolation::Stale(h)
            | HandleViolation::DoubleClose(h)
            | HandleViolation::ConstantClosed(h) => h,
        }
    }
}

impl fmt::Display for HandleViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HandleViolation::Invalid(h) => write!(f, "invalid debug handle {:?}", h),
            HandleViolation::Foreign(h) => {
                write!(f, "handle {:?} was not produced by the debug context", h)
            }
            HandleViolation::UseAfterClose(h) => {
                write!(f, "invalid usage of already closed handle {:?}", h)
            }
            HandleViolation::Stale(h) => {
                write!(f, "invalid usage of handle {:?} closed long ago", h)
            }
            HandleViolation::DoubleClose(h) => write!(f, "handle {:?} closed twice", h),
            HandleViolation::ConstantClosed(h) => {
                write!(f, "constant handle {:?} must not be closed", h)
            }
        }
    }
}

impl From<HandleViolation> for AbiError {
    fn from(v: HandleViolation) -> Self {
        match v {
            HandleViolation::DoubleClose(h) => AbiError::DoubleClose(h),
            other => AbiError::InvalidHandle(other.handle()),
        }
    }
}

/// Debug handle bit pattern
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct DHandle(Handle);

impl DHandle {
    fn new(index: usize, epoch: u32) -> Self {
        let low = ((index as u64) + 1) << 1;
        DHandle(Handle::from_bits(((epoch as u64) << 32) | low))
    }

    fn decode(h: Handle) -> Result<(usize, u32), HandleViolation> {
        let bits = h.to_bits();
        if bits & 1 == 1 {
            return Err(HandleViolation::Foreign(h));
        }
        let low = (bits & 0xffff_ffff) >> 1;
        if low == 0 {
            return Err(HandleViolation::Invalid(h));
        }
        Ok(((low - 1) as usize, (bits >> 32) as u32))
    }

    pub(crate) fn handle(self) -> Handle {
        self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Open,
    Closed,
    Pinned,
}

#[derive(Debug)]
struct Record {
    uh: Handle,
    generation: u64,
    state: State,
    prev: Option<usize>,
    next: Option<usize>,
}

#[derive(Debug)]
struct Slot {
    epoch: u32,
    record: Option<Record>,
}

/// Snapshot of one debug handle
#[derive(Debug, Clone)]
pub struct DebugHandleInfo {
    /// The debug handle
    pub id: Handle,
    /// Generation the handle was opened in
    pub generation: u64,
    /// Whether the handle sits in the closed queue
    pub is_closed: bool,
    /// Wrapped handle of the inner context (already closed if `is_closed`)
    pub underlying: Handle,
    /// Object behind an open handle
    pub object: Option<ObjectRef>,
}

impl fmt::Display for DebugHandleInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.object, self.is_closed) {
            (_, true) => write!(f, "<DebugHandle {:#x} CLOSED>", self.id),
            (Some(obj), false) => write!(f, "<DebugHandle {:#x} for {:?}>", self.id, obj),
            (None, false) => write!(f, "<DebugHandle {:#x} for NULL>", self.id),
        }
    }
}

/// Position of the lazy open-handle walk
#[derive(Debug, Clone, Copy)]
pub(crate) struct Cursor {
    index: usize,
    epoch: u32,
}

/// Arena of debug records
#[derive(Debug)]
pub(crate) struct DebugHandles {
    slots: Vec<Slot>,
    free_slots: Vec<usize>,
    open_head: Option<usize>,
    open_len: usize,
    closed_head: Option<usize>,
    closed_tail: Option<usize>,
    closed_len: usize,
    closed_max: usize,
    pinned: usize,
    generation: u64,
    max_records: usize,
}

impl DebugHandles {
    pub(crate) fn new(closed_max: usize) -> Self {
        Self {
            slots: Vec::new(),
            free_slots: Vec::new(),
            open_head: None,
            open_len: 0,
            closed_head: None,
            closed_tail: None,
            closed_len: 0,
            closed_max,
            pinned: 0,
            generation: 0,
            max_records: INDEX_LIMIT,
        }
    }

    fn record(&self, index: usize) -> &Record {
        match self.slots[index].record.as_ref() {
            Some(record) => record,
            None => unreachable!("list links to free slot {index}"),
        }
    }

    fn record_mut(&mut self, index: usize) -> &mut Record {
        match self.slots[index].record.as_mut() {
            Some(record) => record,
            None => unreachable!("list links to free slot {index}"),
        }
    }

    fn alloc(&mut self, uh: Handle, state: State) -> Result<usize, AbiError> {
        let record = Record {
            uh,
            generation: self.generation,
            state,
            prev: None,
            next: None,
        };
        if let Some(index) = self.free_slots.pop() {
            self.slots[index].record = Some(record);
            return Ok(index);
        }
        if self.slots.len() >= self.max_records {
            return Err(AbiError::OutOfMemory);
        }
        self.slots
            .try_reserve(1)
            .map_err(|_| AbiError::OutOfMemory)?;
        self.slots.push(Slot {
            epoch: 0,
            record: Some(record),
        });
        Ok(self.slots.len() - 1)
    }

    fn id(&self, index: usize) -> Handle {
        DHandle::new(index, self.slots[index].epoch).handle()
    }

    /// Wrap an inner handle in a fresh open record
    pub(crate) fn wrap(&mut self, uh: Handle) -> Result<Handle, AbiError> {
        let index = self.alloc(uh, State::Open)?;
        let old_head = self.open_head;
        self.record_mut(index).next = old_head;
        if let Some(head) = old_head {
            self.record_mut(head).prev = Some(index);
        }
        self.open_head = Some(index);
        self.open_len += 1;
        Ok(self.id(index))
    }

    /// Wrap a context-owned inner handle; the record joins no list
    pub(crate) fn pin(&mut self, uh: Handle) -> Result<Handle, AbiError> {
        let index = self.alloc(uh, State::Pinned)?;
        self.pinned += 1;
        Ok(self.id(index))
    }

    /// Release a pinned record again, returning its inner handle
    pub(crate) fn unpin(&mut self, h: Handle) -> Result<Handle, HandleViolation> {
        let index = self.lookup(h)?;
        let record = self.record(index);
        if record.state != State::Pinned {
            return Err(HandleViolation::Invalid(h));
        }
        let uh = record.uh;
        self.pinned -= 1;
        self.free(index);
        Ok(uh)
    }

    /// Cap the arena below the index limit
    #[cfg(test)]
    pub(crate) fn set_max_records(&mut self, max: usize) {
        self.max_records = max.min(INDEX_LIMIT);
    }

    /// Number of arena slots, free ones included
    #[cfg(test)]
    pub(crate) fn slot_count(&self) -> usize {
        self.slots.len()
    }

    fn lookup(&self, h: Handle) -> Result<usize, HandleViolation> {
        let (index, epoch) = DHandle::decode(h)?;
        let slot = self.slots.get(index).ok_or(HandleViolation::Invalid(h))?;
        if slot.epoch != epoch || slot.record.is_none() {
            return Err(HandleViolation::Stale(h));
        }
        Ok(index)
    }

    /// Inner handle of an open or pinned debug handle
    pub(crate) fn unwrap(&self, h: Handle) -> Result<Handle, HandleViolation> {
        if h.is_null() {
            return Ok(Handle::NULL);
        }
        let record = self.record(self.lookup(h)?);
        match record.state {
            State::Closed => Err(HandleViolation::UseAfterClose(h)),
            State::Open | State::Pinned => Ok(record.uh),
        }
    }

    /// Move an open record to the closed queue and return its inner handle,
    /// which the caller must close. `Ok(None)` for the null handle.
    pub(crate) fn close(&mut self, h: Handle) -> Result<Option<Handle>, HandleViolation> {
        if h.is_null() {
            return Ok(None);
        }
        let index = match self.lookup(h) {
            Ok(index) => index,
            Err(HandleViolation::Stale(h)) => return Err(HandleViolation::DoubleClose(h)),
            Err(err) => return Err(err),
        };
        match self.record(index).state {
            State::Closed => return Err(HandleViolation::DoubleClose(h)),
            State::Pinned => return Err(HandleViolation::ConstantClosed(h)),
            State::Open => {}
        }

        self.unlink_open(index);
        let tail = self.closed_tail;
        {
            let record = self.record_mut(index);
            record.state = State::Closed;
            record.prev = tail;
            record.next = None;
        }
        match tail {
            Some(tail) => self.record_mut(tail).next = Some(index),
            None => self.closed_head = Some(index),
        }
        self.closed_tail = Some(index);
        self.closed_len += 1;

        let uh = self.record(index).uh;
        self.evict_overflow();
        Ok(Some(uh))
    }

    fn unlink_open(&mut self, index: usize) {
        let (prev, next) = {
            let record = self.record(index);
            (record.prev, record.next)
        };
        match prev {
            Some(prev) => self.record_mut(prev).next = next,
            None => self.open_head = next,
        }
        if let Some(next) = next {
            self.record_mut(next).prev = prev;
        }
        self.open_len -= 1;
    }

    fn evict_overflow(&mut self) {
        while self.closed_len > self.closed_max {
            let Some(oldest) = self.closed_head else {
                break;
            };
            let next = self.record(oldest).next;
            self.closed_head = next;
            match next {
                Some(next) => self.record_mut(next).prev = None,
                None => self.closed_tail = None,
            }
            self.closed_len -= 1;
            self.free(oldest);
        }
    }

    fn free(&mut self, index: usize) {
        let slot = &mut self.slots[index];
        slot.record = None;
        slot.epoch = slot.epoch.wrapping_add(1);
        self.free_slots.push(index);
        trace!("debug handle record {} evicted", index);
    }

    pub(crate) fn new_generation(&mut self) -> u64 {
        self.generation += 1;
        self.generation
    }

    pub(crate) fn generation(&self) -> u64 {
        self.generation
    }

    pub(crate) fn closed_max(&self) -> usize {
        self.closed_max
    }

    /// Change the closed queue bound; shrinking evicts right away
    pub(crate) fn set_closed_max(&mut self, max: usize) {
        self.closed_max = max;
        self.evict_overflow();
    }

    pub(crate) fn open_len(&self) -> usize {
        self.open_len
    }

    pub(crate) fn closed_len(&self) -> usize {
        self.closed_len
    }

    fn snapshot(&self, index: usize) -> DebugHandleInfo {
        let record = self.record(index);
        DebugHandleInfo {
            id: self.id(index),
            generation: record.generation,
            is_closed: record.state == State::Closed,
            underlying: record.uh,
            object: None,
        }
    }

    /// Snapshot of any live record
    pub(crate) fn info(&self, h: Handle) -> Option<DebugHandleInfo> {
        if h.is_null() {
            return None;
        }
        self.lookup(h).ok().map(|index| self.snapshot(index))
    }

    pub(crate) fn open_cursor(&self) -> Option<Cursor> {
        self.open_head.map(|index| Cursor {
            index,
            epoch: self.slots[index].epoch,
        })
    }

    /// One step of the open-handle walk.
    ///
    /// Returns the handle at `cursor` and the next position, or `None` once
    /// the walk reaches a record older than `min_generation`, the end of the
    /// list, or a cursor whose record has left the open list.
    pub(crate) fn open_step(
        &self,
        cursor: Cursor,
        min_generation: u64,
    ) -> Option<(DebugHandleInfo, Option<Cursor>)> {
        let slot = self.slots.get(cursor.index)?;
        if slot.epoch != cursor.epoch {
            return None;
        }
        let record = slot.record.as_ref()?;
        if record.state != State::Open || record.generation < min_generation {
            return None;
        }
        let next = record.next.map(|index| Cursor {
            index,
            epoch: self.slots[index].epoch,
        });
        Some((self.snapshot(cursor.index), next))
    }

    /// Closed records, oldest first
    pub(crate) fn closed_entries(&self, min_generation: u64) -> Vec<DebugHandleInfo> {
        let mut entries = Vec::new();
        let mut current = self.closed_head;
        while let Some(index) = current {
            let record = self.record(index);
            if record.generation >= min_generation {
                entries.push(self.snapshot(index));
            }
            current = record.next;
        }
        entries
    }

    /// Verify list structure and bookkeeping
    pub(crate) fn check_invariants(&self) -> Result<(), String> {
        let mut count = 0;
        let mut prev = None;
        let mut last_generation = u64::MAX;
        let mut current = self.open_head;
        while let Some(index) = current {
            let record = self.record(index);
            if record.state != State::Open {
                return Err(format!("record {index} in open list is {:?}", record.state));
            }
            if record.prev != prev {
                return Err(format!("record {index} has a broken prev link"));
            }
            if record.generation > last_generation {
                return Err(format!("open list generations increase at record {index}"));
            }
            last_generation = record.generation;
            prev = Some(index);
            current = record.next;
            count += 1;
        }
        if count != self.open_len {
            return Err(format!("open list has {count} records, expected {}", self.open_len));
        }

        count = 0;
        prev = None;
        current = self.closed_head;
        while let Some(index) = current {
            let record = self.record(index);
            if record.state != State::Closed {
                return Err(format!("record {index} in closed queue is {:?}", record.state));
            }
            if record.prev != prev {
                return Err(format!("record {index} has a broken prev link"));
            }
            prev = Some(index);
            current = record.next;
            count += 1;
        }
        if count != self.closed_len || self.closed_tail != prev {
            return Err(format!(
                "closed queue has {count} records, expected {}",
                self.closed_len
            ));
        }
        if self.closed_len > self.closed_max {
            return Err(format!(
                "closed queue holds {} records, bound is {}",
                self.closed_len, self.closed_max
            ));
        }

        let accounted = self.open_len + self.closed_len + self.pinned + self.free_slots.len();
        if accounted != self.slots.len() {
            return Err(format!(
                "{accounted} records accounted for, arena has {}",
                self.slots.len()
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn uh(i: u64) -> Handle {
        Handle::from_bits((i << 1) | 1)
    }

    #[test]
    fn test_bit_layout() {
        let h = DHandle::new(0, 0).handle();
        assert_eq!(h.to_bits(), 2);
        assert_eq!(DHandle::decode(h), Ok((0, 0)));
        let h = DHandle::new(5, 3).handle();
        assert_eq!(DHandle::decode(h), Ok((5, 3)));
        assert_eq!(DHandle::decode(uh(1)), Err(HandleViolation::Foreign(uh(1))));
    }

    #[test]
    fn test_wrap_unwrap_close() {
        let mut handles = DebugHandles::new(4);
        let h = handles.wrap(uh(7)).unwrap();
        assert_eq!(handles.unwrap(h), Ok(uh(7)));
        assert_eq!(handles.close(h), Ok(Some(uh(7))));
        assert_eq!(handles.unwrap(h), Err(HandleViolation::UseAfterClose(h)));
        assert_eq!(handles.close(h), Err(HandleViolation::DoubleClose(h)));
        assert_eq!(handles.close(Handle::NULL), Ok(None));
        handles.check_invariants().unwrap();
    }

    #[test]
    fn test_closed_queue_is_bounded_fifo() {
        let mut handles = DebugHandles::new(2);
        let hs: Vec<_> = (0..3).map(|i| handles.wrap(uh(i)).unwrap()).collect();
        for h in &hs {
            handles.close(*h).unwrap();
        }
        assert_eq!(handles.closed_len(), 2);
        let ids: Vec<_> = handles.closed_entries(0).iter().map(|i| i.id).collect();
        assert_eq!(ids, vec![hs[1], hs[2]]);
        assert_eq!(handles.unwrap(hs[0]), Err(HandleViolation::Stale(hs[0])));
        assert_eq!(handles.close(hs[0]), Err(HandleViolation::DoubleClose(hs[0])));
        handles.check_invariants().unwrap();
    }

    #[test]
    fn test_reused_slot_gets_new_epoch() {
        let mut handles = DebugHandles::new(0);
        let old = handles.wrap(uh(1)).unwrap();
        handles.close(old).unwrap();
        let new = handles.wrap(uh(2)).unwrap();
        assert_ne!(old, new);
        assert_eq!(handles.unwrap(old), Err(HandleViolation::Stale(old)));
        assert_eq!(handles.unwrap(new), Ok(uh(2)));
    }

    #[test]
    fn test_shrinking_queue_evicts() {
        let mut handles = DebugHandles::new(10);
        for i in 0..5 {
            let h = handles.wrap(uh(i)).unwrap();
            handles.close(h).unwrap();
        }
        handles.set_closed_max(1);
        assert_eq!(handles.closed_len(), 1);
        assert_eq!(handles.closed_entries(0)[0].underlying, uh(4));
        handles.check_invariants().unwrap();
    }

    #[test]
    fn test_open_walk_stops_at_older_generation() {
        let mut handles = DebugHandles::new(4);
        handles.wrap(uh(0)).unwrap();
        let gen = handles.new_generation();
        let a = handles.wrap(uh(1)).unwrap();
        let b = handles.wrap(uh(2)).unwrap();

        let mut seen = Vec::new();
        let mut cursor = handles.open_cursor();
        while let Some(c) = cursor {
            let Some((info, next)) = handles.open_step(c, gen) else {
                break;
            };
            seen.push(info.id);
            cursor = next;
        }
        assert_eq!(seen, vec![b, a]);
    }

    #[test]
    fn test_pinned_records() {
        let mut handles = DebugHandles::new(4);
        let c = handles.pin(uh(3)).unwrap();
        assert_eq!(handles.unwrap(c), Ok(uh(3)));
        assert_eq!(handles.close(c), Err(HandleViolation::ConstantClosed(c)));
        assert_eq!(handles.open_len(), 0);
        handles.check_invariants().unwrap();
    }

    #[test]
    fn test_unpin_frees_record() {
        let mut handles = DebugHandles::new(4);
        let c = handles.pin(uh(3)).unwrap();
        assert_eq!(handles.unpin(c), Ok(uh(3)));
        assert_eq!(handles.unwrap(c), Err(HandleViolation::Stale(c)));
        handles.check_invariants().unwrap();

        let h = handles.wrap(uh(5)).unwrap();
        assert_eq!(handles.unpin(h), Err(HandleViolation::Invalid(h)));
    }

    #[test]
    fn test_record_cap_reports_out_of_memory() {
        let mut handles = DebugHandles::new(4);
        handles.set_max_records(1);
        let h = handles.wrap(uh(1)).unwrap();
        assert_eq!(handles.wrap(uh(3)), Err(AbiError::OutOfMemory));
        assert_eq!(handles.slot_count(), 1);
        assert_eq!(handles.open_len(), 1);
        handles.check_invariants().unwrap();
        handles.close(h).unwrap();
    }

    #[test]
    fn test_info_display() {
        let mut handles = DebugHandles::new(4);
        let h = handles.wrap(uh(1)).unwrap();
        let mut info = handles.info(h).unwrap();
        info.object = Some(ObjectRef::new(42i64));
        assert_eq!(info.to_string(), format!("<DebugHandle {:#x} for 42>", h));
        handles.close(h).unwrap();
        let info = handles.info(h).unwrap();
        assert_eq!(info.to_string(), format!("<DebugHandle {:#x} CLOSED>", h));
    }
}
