//! ObjectRef: counted reference to a host-runtime object
//!
//! The core never looks inside host objects. Cloning an `ObjectRef` acquires a
//! reference and dropping it releases one, so "the table owns one reference
//! per open handle" falls out of ordinary ownership.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

/// Marker for anything a host runtime can hand to the handle layer.
pub trait HostObject: Any + fmt::Debug + Send + Sync {
    /// Upcast for downcasting by the owning host runtime
    fn as_any(&self) -> &dyn Any;
}

impl<T: Any + fmt::Debug + Send + Sync> HostObject for T {
    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Counted reference to a host object.
#[derive(Clone)]
pub struct ObjectRef(Arc<dyn HostObject>);

impl ObjectRef {
    /// Allocate a new host object
    pub fn new<T: HostObject>(value: T) -> Self {
        ObjectRef(Arc::new(value))
    }

    /// Borrow the object as a concrete host type
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        (*self.0).as_any().downcast_ref::<T>()
    }

    /// Identity comparison (same host object)
    pub fn ptr_eq(a: &ObjectRef, b: &ObjectRef) -> bool {
        Arc::ptr_eq(&a.0, &b.0)
    }

    /// Address of the object, for diagnostics only
    pub fn addr(&self) -> usize {
        Arc::as_ptr(&self.0) as *const () as usize
    }

    /// Number of live references to the object
    pub fn ref_count(&self) -> usize {
        Arc::strong_count(&self.0)
    }
}

impl fmt::Debug for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&*self.0, f)
    }
}
