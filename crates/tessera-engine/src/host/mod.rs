//! Host runtime interface
//!
//! The universal context never interprets objects itself: every object
//! operation is forwarded to a `HostRuntime`. `SimpleHost` is the in-memory
//! runtime used by the CLI and the tests.

mod simple;

pub use simple::{HostFunction, HostValue, SimpleHost};

use tessera_sdk::{Constant, ObjectRef};
use thiserror::Error;

/// Result type for host operations
pub type HostResult<T> = Result<T, HostError>;

/// Exception raised by the host runtime
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{}: {message}", kind.name())]
pub struct HostError {
    /// Exception type
    pub kind: Constant,
    /// Exception message
    pub message: String,
}

impl HostError {
    /// Create a new host exception
    pub fn new(kind: Constant, message: impl Into<String>) -> Self {
        HostError {
            kind,
            message: message.into(),
        }
    }

    /// `TypeError` shorthand
    pub fn type_error(message: impl Into<String>) -> Self {
        Self::new(Constant::TypeError, message)
    }
}

/// Object operations the universal context forwards to.
///
/// Every returned `ObjectRef` is a new reference owned by the caller.
pub trait HostRuntime: Send + Sync {
    /// Singleton object for a constant. Must return the same object each time.
    fn constant(&self, constant: Constant) -> ObjectRef;

    /// Create an integer
    fn int_from_i64(&self, value: i64) -> ObjectRef;

    /// Read an integer
    fn int_as_i64(&self, obj: &ObjectRef) -> HostResult<i64>;

    /// Create a float
    fn float_from_f64(&self, value: f64) -> ObjectRef;

    /// Read a float (integers convert)
    fn float_as_f64(&self, obj: &ObjectRef) -> HostResult<f64>;

    /// Create a string
    fn str_from(&self, s: &str) -> ObjectRef;

    /// Read a string
    fn str_as_string(&self, obj: &ObjectRef) -> HostResult<String>;

    /// `a + b`
    fn add(&self, a: &ObjectRef, b: &ObjectRef) -> HostResult<ObjectRef>;

    /// Printable representation
    fn repr(&self, obj: &ObjectRef) -> HostResult<String>;

    /// Truthiness
    fn is_true(&self, obj: &ObjectRef) -> HostResult<bool>;

    /// Type name
    fn type_name(&self, obj: &ObjectRef) -> String;

    /// Create an empty list
    fn list_new(&self) -> ObjectRef;

    /// Append to a list
    fn list_append(&self, list: &ObjectRef, item: ObjectRef) -> HostResult<()>;

    /// Length of a sized object
    fn length(&self, obj: &ObjectRef) -> HostResult<usize>;

    /// Item of a sequence
    fn get_item(&self, obj: &ObjectRef, index: usize) -> HostResult<ObjectRef>;

    /// Whether `call` can succeed on this object
    fn is_callable(&self, obj: &ObjectRef) -> bool;

    /// Call an object
    fn call(&self, callable: &ObjectRef, args: &[ObjectRef]) -> HostResult<ObjectRef>;

    /// Whether exception type `raised` is `kind` or derives from it
    fn exception_matches(&self, raised: &ObjectRef, kind: &ObjectRef) -> bool;

    /// Name of an exception type; `TypeError` if `kind` is not one
    fn exception_name(&self, kind: &ObjectRef) -> HostResult<String>;
}
