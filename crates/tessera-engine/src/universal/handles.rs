//! Universal handle table
//!
//! Maps slot indices to host object references. This is the only place in
//! the engine that stores object references on behalf of extension code.
//!
//! # Slot lifecycle
//!
//! Slots are added in batches of `(old_len / 2) * 3 + growth_constant` when
//! no free slot is left. A slot is `Occupied` while a handle to it is open and
//! `Free` otherwise; free slots form singly linked lists threaded through the
//! slots themselves.
//!
//! Closed slots go to a secondary "recently freed" list first. That list is
//! only handed over to the allocator once the primary free list runs dry, so
//! a just-closed slot is reused as late as possible and a stale handle keeps
//! failing loudly for longer.

use log::trace;
use tessera_sdk::{Handle, ObjectRef};
use thiserror::Error;

/// Default number of slots added on top of the geometric growth
pub const DEFAULT_GROWTH_CONSTANT: usize = 32;

/// Errors from handle table operations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum HandleError {
    /// Slot index past the end of the table
    #[error("using a handle containing garbage: {0:?}")]
    OutOfRange(Handle),

    /// Slot is on a free list
    #[error("using a handle that was closed already (or never allocated): {0:?}")]
    Free(Handle),

    /// Bit pattern belongs to another layer
    #[error("handle {0:?} does not belong to the universal context")]
    Foreign(Handle),

    /// Growth failed
    #[error("handle table exhausted")]
    OutOfMemory,
}

/// A handle as seen by the universal layer: `(slot << 1) | 1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct UHandle(Handle);

impl UHandle {
    /// The null handle
    pub const NULL: UHandle = UHandle(Handle::NULL);

    /// Encode a slot index
    #[inline]
    pub fn from_slot(slot: usize) -> Self {
        UHandle(Handle::from_bits(((slot as u64) << 1) | 1))
    }

    /// Reinterpret an ABI handle, rejecting other layers' bit patterns
    #[inline]
    pub fn try_from_handle(h: Handle) -> Result<Self, HandleError> {
        if h.is_null() || h.to_bits() & 1 == 1 {
            Ok(UHandle(h))
        } else {
            Err(HandleError::Foreign(h))
        }
    }

    /// Slot index, `None` for the null handle
    #[inline]
    pub fn slot(self) -> Option<usize> {
        if self.0.is_null() {
            None
        } else {
            Some((self.0.to_bits() >> 1) as usize)
        }
    }

    /// The ABI handle
    #[inline]
    pub fn handle(self) -> Handle {
        self.0
    }

    /// Check if this is the null handle
    #[inline]
    pub fn is_null(self) -> bool {
        self.0.is_null()
    }
}

enum Slot {
    Occupied(ObjectRef),
    Free { next: Option<usize> },
}

/// Slot table with free-list reuse.
pub struct HandleTable {
    slots: Vec<Slot>,
    free_list: Option<usize>,
    recently_freed: Option<usize>,
    growth_constant: usize,
    max_slots: Option<usize>,
    open: usize,
    grow_events: usize,
}

impl HandleTable {
    /// Create an empty table with the default growth constant
    pub fn new() -> Self {
        Self::with_growth(DEFAULT_GROWTH_CONSTANT, None)
    }

    /// Create an empty table.
    ///
    /// `max_slots` caps the table size; growth past it reports out-of-memory.
    pub fn with_growth(growth_constant: usize, max_slots: Option<usize>) -> Self {
        Self {
            slots: Vec::new(),
            free_list: None,
            recently_freed: None,
            growth_constant: growth_constant.max(1),
            max_slots,
            open: 0,
            grow_events: 0,
        }
    }

    fn grow(&mut self) -> Result<(), HandleError> {
        if let Some(head) = self.recently_freed.take() {
            self.free_list = Some(head);
            return Ok(());
        }

        let base = self.slots.len();
        let mut new_len = (base / 2) * 3 + self.growth_constant;
        if let Some(max) = self.max_slots {
            new_len = new_len.min(max);
        }
        if new_len <= base {
            return Err(HandleError::OutOfMemory);
        }
        self.slots
            .try_reserve_exact(new_len - base)
            .map_err(|_| HandleError::OutOfMemory)?;

        // Thread the new slots so the lowest index is handed out first
        for i in base..new_len {
            let next = if i + 1 < new_len { Some(i + 1) } else { None };
            self.slots.push(Slot::Free { next });
        }
        self.free_list = Some(base);
        self.grow_events += 1;
        trace!("handle table grew from {} to {} slots", base, new_len);
        Ok(())
    }

    /// Store an object reference and return a handle to it.
    ///
    /// The table takes over the reference passed in.
    pub fn alloc(&mut self, obj: ObjectRef) -> Result<UHandle, HandleError> {
        if self.free_list.is_none() {
            self.grow()?;
        }
        let Some(index) = self.free_list else {
            return Err(HandleError::OutOfMemory);
        };
        let next = match &self.slots[index] {
            Slot::Free { next } => *next,
            Slot::Occupied(_) => unreachable!("free list points at occupied slot {index}"),
        };
        self.free_list = next;
        self.slots[index] = Slot::Occupied(obj);
        self.open += 1;
        Ok(UHandle::from_slot(index))
    }

    fn index(&self, h: UHandle) -> Result<Option<usize>, HandleError> {
        match h.slot() {
            None => Ok(None),
            Some(index) if index < self.slots.len() => Ok(Some(index)),
            Some(_) => Err(HandleError::OutOfRange(h.handle())),
        }
    }

    /// Object behind a handle; `None` for the null handle.
    pub fn get(&self, h: UHandle) -> Result<Option<&ObjectRef>, HandleError> {
        let Some(index) = self.index(h)? else {
            return Ok(None);
        };
        match &self.slots[index] {
            Slot::Occupied(obj) => Ok(Some(obj)),
            Slot::Free { .. } => Err(HandleError::Free(h.handle())),
        }
    }

    /// Close a handle and hand back the reference the table held.
    ///
    /// The null handle is a no-op. Closing a free slot is an error, since
    /// accepting it would corrupt the free list.
    pub fn close(&mut self, h: UHandle) -> Result<Option<ObjectRef>, HandleError> {
        let Some(index) = self.index(h)? else {
            return Ok(None);
        };
        if let Slot::Free { .. } = self.slots[index] {
            return Err(HandleError::Free(h.handle()));
        }
        let old = std::mem::replace(
            &mut self.slots[index],
            Slot::Free {
                next: self.recently_freed,
            },
        );
        self.recently_freed = Some(index);
        self.open -= 1;
        match old {
            Slot::Occupied(obj) => Ok(Some(obj)),
            Slot::Free { .. } => Ok(None),
        }
    }

    /// Open a second, independent handle to the same object.
    ///
    /// Always allocates a new slot; both handles must be closed.
    pub fn dup(&mut self, h: UHandle) -> Result<UHandle, HandleError> {
        let obj = match self.get(h)? {
            Some(obj) => obj.clone(),
            None => return Ok(UHandle::NULL),
        };
        self.alloc(obj)
    }

    /// Number of open handles
    pub fn open_count(&self) -> usize {
        self.open
    }

    /// Number of slots (open and free)
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// How many times the table added slots
    pub fn grow_events(&self) -> usize {
        self.grow_events
    }
}

impl Default for HandleTable {
    fn default() -> Self {
        Self::new()
    }
}
