//! Handle: opaque 64-bit reference token
//!
//! Extension code only ever sees `Handle` values. The bit pattern is owned by
//! whichever context produced the handle:
//!
//! ```text
//! null:       0x0000000000000000
//! universal:  (slot << 1) | 1                          [low bit set]
//! debug:      (epoch << 32) | ((record + 1) << 1)      [low bit clear]
//! ```
//!
//! Each layer converts through its own private newtype, so a raw `Handle` is
//! never reinterpreted without going through that layer's checks.

use std::fmt;

/// Opaque reference to a host-runtime object.
///
/// A handle must be closed exactly once through the context that produced it.
/// Use `Context::dup` to obtain an independent handle to the same object.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(transparent)]
pub struct Handle(u64);

impl Handle {
    /// The null handle ("no object")
    pub const NULL: Handle = Handle(0);

    /// Create from raw bits. Only contexts should call this.
    #[inline(always)]
    pub const fn from_bits(bits: u64) -> Self {
        Self(bits)
    }

    /// Get the raw bits
    #[inline(always)]
    pub const fn to_bits(self) -> u64 {
        self.0
    }

    /// Check if this is the null handle
    #[inline(always)]
    pub const fn is_null(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Debug for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_null() {
            write!(f, "Handle(NULL)")
        } else {
            write!(f, "Handle({:#x})", self.0)
        }
    }
}

impl fmt::LowerHex for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::LowerHex::fmt(&self.0, f)
    }
}
