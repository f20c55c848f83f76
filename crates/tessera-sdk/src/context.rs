//! Context trait: the dispatch table every ABI call goes through
//!
//! Extension code holds an `Arc<dyn Context>` and invokes every runtime
//! operation through it. The engine provides three implementations: the
//! universal context (owns the handle table), and the debug and trace
//! wrappers, which intercept each call and delegate to the context they wrap.

use crate::error::{AbiError, AbiResult, PendingError};
use crate::handle::Handle;
use crate::object::ObjectRef;
use crate::tracker::Tracker;

/// ABI version implemented by every context in this crate
pub const ABI_VERSION: u32 = 1;

/// Message of the `MemoryError` raised by `Context::err_no_memory`
pub const OUT_OF_MEMORY: &str = "out of memory";

/// Declares a dense enum with stable ids and names.
macro_rules! id_enum {
    (
        $(#[$meta:meta])*
        pub enum $ty:ident { $($(#[$vmeta:meta])* $variant:ident => $name:literal,)* }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        #[repr(u16)]
        pub enum $ty {
            $($(#[$vmeta])* $variant,)*
        }

        impl $ty {
            /// Every variant, in id order
            pub const ALL: &'static [$ty] = &[$($ty::$variant,)*];

            /// Number of variants
            pub const COUNT: usize = Self::ALL.len();

            /// Stable dense id (index into `ALL`)
            #[inline]
            pub const fn id(self) -> usize {
                self as usize
            }

            /// Stable name
            pub const fn name(self) -> &'static str {
                match self {
                    $($ty::$variant => $name,)*
                }
            }

            /// Look up a variant by its stable name
            pub fn from_name(name: &str) -> Option<Self> {
                match name {
                    $($name => Some($ty::$variant),)*
                    _ => None,
                }
            }
        }

        impl std::fmt::Display for $ty {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.name())
            }
        }
    };
}

id_enum! {
    /// Singleton objects every context exposes as pre-opened handles.
    ///
    /// Constant handles are owned by the context: `dup` them to get a handle
    /// the caller may close.
    pub enum Constant {
        /// `None`
        None => "None",
        /// `True`
        True => "True",
        /// `False`
        False => "False",
        /// `NotImplemented`
        NotImplemented => "NotImplemented",
        /// `Ellipsis`
        Ellipsis => "Ellipsis",
        /// Root of the exception hierarchy
        BaseException => "BaseException",
        /// Base of ordinary exceptions
        Exception => "Exception",
        /// Wrong argument type
        TypeError => "TypeError",
        /// Right type, bad value
        ValueError => "ValueError",
        /// Sequence index out of range
        IndexError => "IndexError",
        /// Missing mapping key
        KeyError => "KeyError",
        /// Allocation failure
        MemoryError => "MemoryError",
        /// Internal error or misuse of the ABI
        SystemError => "SystemError",
        /// Integer result out of range
        OverflowError => "OverflowError",
        /// Division by zero
        ZeroDivisionError => "ZeroDivisionError",
        /// Generic runtime failure
        RuntimeError => "RuntimeError",
        /// The `object` type
        BaseObjectType => "object",
        /// The `type` type
        TypeType => "type",
        /// The `int` type
        LongType => "int",
        /// The `float` type
        FloatType => "float",
        /// The `str` type
        UnicodeType => "str",
        /// The `list` type
        ListType => "list",
    }
}

id_enum! {
    /// One entry per dispatch slot. Ids are stable and index trace counters.
    pub enum ContextOp {
        /// `Context::dup`
        Dup => "dup",
        /// `Context::close`
        Close => "close",
        /// `Context::from_object`
        FromObject => "from_object",
        /// `Context::as_object`
        AsObject => "as_object",
        /// `Context::long_from_i64`
        LongFromI64 => "long_from_i64",
        /// `Context::long_as_i64`
        LongAsI64 => "long_as_i64",
        /// `Context::float_from_f64`
        FloatFromF64 => "float_from_f64",
        /// `Context::float_as_f64`
        FloatAsF64 => "float_as_f64",
        /// `Context::unicode_from_str`
        UnicodeFromStr => "unicode_from_str",
        /// `Context::unicode_as_string`
        UnicodeAsString => "unicode_as_string",
        /// `Context::add`
        Add => "add",
        /// `Context::repr`
        Repr => "repr",
        /// `Context::is_true`
        IsTrue => "is_true",
        /// `Context::is`
        Is => "is",
        /// `Context::type_name`
        TypeName => "type_name",
        /// `Context::list_new`
        ListNew => "list_new",
        /// `Context::list_append`
        ListAppend => "list_append",
        /// `Context::length`
        Length => "length",
        /// `Context::get_item`
        GetItem => "get_item",
        /// `Context::callable_check`
        CallableCheck => "callable_check",
        /// `Context::call`
        Call => "call",
        /// `Context::err_set_string`
        ErrSetString => "err_set_string",
        /// `Context::err_occurred`
        ErrOccurred => "err_occurred",
        /// `Context::err_clear`
        ErrClear => "err_clear",
        /// `Context::err_fetch`
        ErrFetch => "err_fetch",
        /// `Context::err_exception_matches`
        ErrExceptionMatches => "err_exception_matches",
        /// `Context::fatal_error`
        FatalError => "fatal_error",
        /// `Context::tracker_new`
        TrackerNew => "tracker_new",
        /// `Context::tracker_add`
        TrackerAdd => "tracker_add",
        /// `Context::tracker_remove_all`
        TrackerRemoveAll => "tracker_remove_all",
        /// `Context::tracker_close`
        TrackerClose => "tracker_close",
    }
}

/// Which layer a context belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContextKind {
    /// Base context owning the handle table
    Universal,
    /// Handle-checking wrapper
    Debug,
    /// Call counting and timing wrapper
    Trace,
}

/// Abstract runtime context for extension code.
///
/// This trait is the single entry point for all ABI operations. Handles
/// passed in must have been produced by the same context; handles returned
/// are owned by the caller and must be closed (constants excepted).
///
/// Operations that fail leave an exception pending (see `err_occurred`) and
/// return the matching `AbiError`.
pub trait Context: Send + Sync {
    // ========================================================================
    // Identity
    // ========================================================================

    /// Human-readable context name
    fn name(&self) -> &str;

    /// Layer this context belongs to
    fn kind(&self) -> ContextKind;

    /// ABI version the context implements
    fn abi_version(&self) -> u32 {
        ABI_VERSION
    }

    /// Context-owned handle for a singleton. Initializes constants lazily.
    fn constant(&self, constant: Constant) -> AbiResult<Handle>;

    // ========================================================================
    // Handle Lifecycle
    // ========================================================================

    /// Open a new, independent handle to the same object
    fn dup(&self, h: Handle) -> AbiResult<Handle>;

    /// Close a handle. Closing the null handle is a no-op.
    fn close(&self, h: Handle);

    /// Open a handle for a host object (acquires a new reference)
    fn from_object(&self, obj: &ObjectRef) -> AbiResult<Handle>;

    /// Get the host object behind a handle (`None` for the null handle)
    fn as_object(&self, h: Handle) -> AbiResult<Option<ObjectRef>>;

    // ========================================================================
    // Numbers and Strings
    // ========================================================================

    /// Create an integer object
    fn long_from_i64(&self, value: i64) -> AbiResult<Handle>;

    /// Read an integer object
    fn long_as_i64(&self, h: Handle) -> AbiResult<i64>;

    /// Create a float object
    fn float_from_f64(&self, value: f64) -> AbiResult<Handle>;

    /// Read a float object (integers are converted)
    fn float_as_f64(&self, h: Handle) -> AbiResult<f64>;

    /// Create a string object
    fn unicode_from_str(&self, s: &str) -> AbiResult<Handle>;

    /// Read a string object
    fn unicode_as_string(&self, h: Handle) -> AbiResult<String>;

    // ========================================================================
    // Generic Object Protocol
    // ========================================================================

    /// `a + b`
    fn add(&self, a: Handle, b: Handle) -> AbiResult<Handle>;

    /// String representation as a new string object
    fn repr(&self, h: Handle) -> AbiResult<Handle>;

    /// Truthiness
    fn is_true(&self, h: Handle) -> AbiResult<bool>;

    /// Identity comparison of the objects behind two handles
    fn is(&self, a: Handle, b: Handle) -> AbiResult<bool>;

    /// Name of the object's type
    fn type_name(&self, h: Handle) -> AbiResult<String>;

    // ========================================================================
    // Lists
    // ========================================================================

    /// Create an empty list
    fn list_new(&self) -> AbiResult<Handle>;

    /// Append to a list (the list acquires its own reference to `item`)
    fn list_append(&self, list: Handle, item: Handle) -> AbiResult<()>;

    /// Length of a sized object
    fn length(&self, h: Handle) -> AbiResult<usize>;

    /// Item at `index` of a sequence
    fn get_item(&self, h: Handle, index: usize) -> AbiResult<Handle>;

    // ========================================================================
    // Calls
    // ========================================================================

    /// Check whether the object can be called
    fn callable_check(&self, h: Handle) -> AbiResult<bool>;

    /// Call `callable` with positional arguments
    fn call(&self, callable: Handle, args: &[Handle]) -> AbiResult<Handle>;

    // ========================================================================
    // Error State
    // ========================================================================

    /// Set the pending exception. `kind` is a handle to an exception type.
    fn err_set_string(&self, kind: Handle, message: &str) -> AbiResult<()>;

    /// Check whether an exception is pending
    fn err_occurred(&self) -> bool;

    /// Discard the pending exception
    fn err_clear(&self);

    /// Take the pending exception, leaving none
    fn err_fetch(&self) -> Option<PendingError>;

    /// Check whether the pending exception is an instance of `kind`
    fn err_exception_matches(&self, kind: Handle) -> AbiResult<bool>;

    /// Report an unrecoverable error and terminate
    fn fatal_error(&self, message: &str) -> !;

    /// Leave a `MemoryError` pending and return the matching error.
    ///
    /// Allocation failures inside a context surface through this, so they
    /// look like any other host exception to the caller.
    fn err_no_memory(&self) -> AbiError {
        let kind = match self.constant(Constant::MemoryError) {
            Ok(kind) => kind,
            Err(err) => return err,
        };
        match self.err_set_string(kind, OUT_OF_MEMORY) {
            Ok(()) => AbiError::raised(Constant::MemoryError.name(), OUT_OF_MEMORY),
            Err(err) => err,
        }
    }

    // ========================================================================
    // Trackers
    // ========================================================================

    /// Create a tracker with room for at least `capacity` handles
    fn tracker_new(&self, capacity: usize) -> AbiResult<Tracker> {
        Tracker::with_capacity(capacity).map_err(|_| self.err_no_memory())
    }

    /// Track a handle for later bulk release.
    ///
    /// On a failed growth a `MemoryError` is left pending; see `Tracker::add`
    /// for whether the handle was stored.
    fn tracker_add(&self, tracker: &mut Tracker, h: Handle) -> AbiResult<()> {
        tracker.add(h).map_err(|_| self.err_no_memory())
    }

    /// Forget every tracked handle without closing it
    fn tracker_remove_all(&self, tracker: &mut Tracker) {
        tracker.remove_all();
    }

    /// Close every tracked handle through this context and drop the tracker
    fn tracker_close(&self, tracker: Tracker) {
        tracker.free(self);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_op_ids_are_dense() {
        for (i, op) in ContextOp::ALL.iter().enumerate() {
            assert_eq!(op.id(), i);
        }
        assert_eq!(ContextOp::COUNT, ContextOp::ALL.len());
    }

    #[test]
    fn test_op_names_unique_and_resolvable() {
        let names: HashSet<_> = ContextOp::ALL.iter().map(|op| op.name()).collect();
        assert_eq!(names.len(), ContextOp::COUNT);
        assert_eq!(ContextOp::from_name("add"), Some(ContextOp::Add));
        assert_eq!(ContextOp::from_name("ctx_Add"), None);
        assert_eq!(ContextOp::TrackerClose.to_string(), "tracker_close");
    }

    #[test]
    fn test_constants() {
        assert_eq!(Constant::ALL[0], Constant::None);
        assert_eq!(Constant::from_name("int"), Some(Constant::LongType));
        assert_eq!(Constant::TypeError.name(), "TypeError");
    }
}
