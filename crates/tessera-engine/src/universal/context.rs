//! The universal context
//!
//! Owns the handle table and forwards every object operation to the host
//! runtime. Handles it returns are odd bit patterns (see `UHandle`).

use std::sync::Arc;

use log::{debug, warn};
use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use tessera_sdk::{
    AbiError, AbiResult, Constant, Context, ContextKind, Handle, ObjectRef, PendingError,
};

use super::handles::{HandleError, HandleTable, UHandle};
use crate::config::{EngineConfig, FatalPolicy};
use crate::fatal::{fatal, FatalKind};
use crate::host::{HostError, HostResult, HostRuntime};

/// Exception left behind by a failed operation
struct Pending {
    kind: ObjectRef,
    type_name: String,
    message: String,
}

/// Base context: handle table plus host runtime
pub struct UniversalContext {
    host: Arc<dyn HostRuntime>,
    table: Mutex<HandleTable>,
    constants: OnceCell<Vec<Handle>>,
    pending: Mutex<Option<Pending>>,
    check_handles: bool,
    fatal_policy: FatalPolicy,
}

impl UniversalContext {
    /// Create a context over `host`
    pub fn new(host: Arc<dyn HostRuntime>, config: &EngineConfig) -> Self {
        debug!(
            "creating universal context (growth constant {}, max slots {:?})",
            config.handle_growth_constant, config.max_handle_slots
        );
        Self {
            host,
            table: Mutex::new(HandleTable::with_growth(
                config.handle_growth_constant,
                config.max_handle_slots,
            )),
            constants: OnceCell::new(),
            pending: Mutex::new(None),
            check_handles: config.check_handles,
            fatal_policy: config.fatal_policy,
        }
    }

    /// The host runtime objects live in
    pub fn host(&self) -> &Arc<dyn HostRuntime> {
        &self.host
    }

    /// Number of open handles, constants included
    pub fn open_handles(&self) -> usize {
        self.table.lock().open_count()
    }

    /// Number of table slots
    pub fn capacity(&self) -> usize {
        self.table.lock().capacity()
    }

    /// How many times the table grew
    pub fn grow_events(&self) -> usize {
        self.table.lock().grow_events()
    }

    fn table_error(&self, h: Handle, err: HandleError) -> AbiError {
        if err == HandleError::OutOfMemory {
            return self.raise(HostError::new(Constant::MemoryError, "handle table exhausted"));
        }
        if self.check_handles {
            fatal(self.fatal_policy, FatalKind::InvalidHandle, err.to_string());
        }
        warn!("{}", err);
        AbiError::InvalidHandle(h)
    }

    fn resolve(&self, h: Handle) -> AbiResult<Option<ObjectRef>> {
        let result = UHandle::try_from_handle(h)
            .and_then(|uh| self.table.lock().get(uh).map(|obj| obj.cloned()));
        result.map_err(|err| self.table_error(h, err))
    }

    fn object(&self, h: Handle) -> AbiResult<ObjectRef> {
        match self.resolve(h)? {
            Some(obj) => Ok(obj),
            None => Err(self.raise(HostError::new(
                Constant::SystemError,
                "NULL handle passed where an object is required",
            ))),
        }
    }

    fn open(&self, obj: ObjectRef) -> AbiResult<Handle> {
        let result = self.table.lock().alloc(obj);
        result
            .map(UHandle::handle)
            .map_err(|err| self.table_error(Handle::NULL, err))
    }

    fn raise(&self, err: HostError) -> AbiError {
        let kind = self.host.constant(err.kind);
        let type_name = err.kind.name().to_string();
        let old = self.pending.lock().replace(Pending {
            kind,
            type_name: type_name.clone(),
            message: err.message.clone(),
        });
        drop(old);
        AbiError::Raised {
            type_name,
            message: err.message,
        }
    }

    fn check<T>(&self, result: HostResult<T>) -> AbiResult<T> {
        result.map_err(|err| self.raise(err))
    }

    fn open_result(&self, result: HostResult<ObjectRef>) -> AbiResult<Handle> {
        let obj = self.check(result)?;
        self.open(obj)
    }

    fn init_constants(&self) -> AbiResult<Vec<Handle>> {
        let mut handles = Vec::with_capacity(Constant::COUNT);
        for &c in Constant::ALL {
            match self.open(self.host.constant(c)) {
                Ok(h) => handles.push(h),
                Err(err) => {
                    for h in handles {
                        self.close(h);
                    }
                    return Err(err);
                }
            }
        }
        debug!("universal context: opened {} constant handles", handles.len());
        Ok(handles)
    }
}

impl Context for UniversalContext {
    fn name(&self) -> &str {
        "universal"
    }

    fn kind(&self) -> ContextKind {
        ContextKind::Universal
    }

    fn constant(&self, constant: Constant) -> AbiResult<Handle> {
        let handles = self.constants.get_or_try_init(|| self.init_constants())?;
        Ok(handles[constant.id()])
    }

    fn dup(&self, h: Handle) -> AbiResult<Handle> {
        let result = UHandle::try_from_handle(h).and_then(|uh| self.table.lock().dup(uh));
        result
            .map(UHandle::handle)
            .map_err(|err| self.table_error(h, err))
    }

    fn close(&self, h: Handle) {
        let result = UHandle::try_from_handle(h).and_then(|uh| self.table.lock().close(uh));
        match result {
            // the reference is released here, outside the table lock
            Ok(obj) => drop(obj),
            Err(err) => {
                self.table_error(h, err);
            }
        }
    }

    fn from_object(&self, obj: &ObjectRef) -> AbiResult<Handle> {
        self.open(obj.clone())
    }

    fn as_object(&self, h: Handle) -> AbiResult<Option<ObjectRef>> {
        self.resolve(h)
    }

    fn long_from_i64(&self, value: i64) -> AbiResult<Handle> {
        self.open(self.host.int_from_i64(value))
    }

    fn long_as_i64(&self, h: Handle) -> AbiResult<i64> {
        let obj = self.object(h)?;
        self.check(self.host.int_as_i64(&obj))
    }

    fn float_from_f64(&self, value: f64) -> AbiResult<Handle> {
        self.open(self.host.float_from_f64(value))
    }

    fn float_as_f64(&self, h: Handle) -> AbiResult<f64> {
        let obj = self.object(h)?;
        self.check(self.host.float_as_f64(&obj))
    }

    fn unicode_from_str(&self, s: &str) -> AbiResult<Handle> {
        self.open(self.host.str_from(s))
    }

    fn unicode_as_string(&self, h: Handle) -> AbiResult<String> {
        let obj = self.object(h)?;
        self.check(self.host.str_as_string(&obj))
    }

    fn add(&self, a: Handle, b: Handle) -> AbiResult<Handle> {
        let a = self.object(a)?;
        let b = self.object(b)?;
        self.open_result(self.host.add(&a, &b))
    }

    fn repr(&self, h: Handle) -> AbiResult<Handle> {
        let obj = self.object(h)?;
        let text = self.check(self.host.repr(&obj))?;
        self.open(self.host.str_from(&text))
    }

    fn is_true(&self, h: Handle) -> AbiResult<bool> {
        let obj = self.object(h)?;
        self.check(self.host.is_true(&obj))
    }

    fn is(&self, a: Handle, b: Handle) -> AbiResult<bool> {
        Ok(match (self.resolve(a)?, self.resolve(b)?) {
            (Some(a), Some(b)) => ObjectRef::ptr_eq(&a, &b),
            (None, None) => true,
            _ => false,
        })
    }

    fn type_name(&self, h: Handle) -> AbiResult<String> {
        let obj = self.object(h)?;
        Ok(self.host.type_name(&obj))
    }

    fn list_new(&self) -> AbiResult<Handle> {
        self.open(self.host.list_new())
    }

    fn list_append(&self, list: Handle, item: Handle) -> AbiResult<()> {
        let list = self.object(list)?;
        let item = self.object(item)?;
        self.check(self.host.list_append(&list, item))
    }

    fn length(&self, h: Handle) -> AbiResult<usize> {
        let obj = self.object(h)?;
        self.check(self.host.length(&obj))
    }

    fn get_item(&self, h: Handle, index: usize) -> AbiResult<Handle> {
        let obj = self.object(h)?;
        self.open_result(self.host.get_item(&obj, index))
    }

    fn callable_check(&self, h: Handle) -> AbiResult<bool> {
        let obj = self.object(h)?;
        Ok(self.host.is_callable(&obj))
    }

    fn call(&self, callable: Handle, args: &[Handle]) -> AbiResult<Handle> {
        let callable = self.object(callable)?;
        let args = args
            .iter()
            .map(|&h| self.object(h))
            .collect::<AbiResult<Vec<_>>>()?;
        self.open_result(self.host.call(&callable, &args))
    }

    fn err_set_string(&self, kind: Handle, message: &str) -> AbiResult<()> {
        let kind = self.object(kind)?;
        let type_name = self.check(self.host.exception_name(&kind))?;
        let old = self.pending.lock().replace(Pending {
            kind,
            type_name,
            message: message.to_string(),
        });
        drop(old);
        Ok(())
    }

    fn err_occurred(&self) -> bool {
        self.pending.lock().is_some()
    }

    fn err_clear(&self) {
        let old = self.pending.lock().take();
        drop(old);
    }

    fn err_fetch(&self) -> Option<PendingError> {
        let pending = self.pending.lock().take()?;
        Some(PendingError {
            type_name: pending.type_name,
            message: pending.message,
        })
    }

    fn err_exception_matches(&self, kind: Handle) -> AbiResult<bool> {
        let kind = self.object(kind)?;
        let raised = self.pending.lock().as_ref().map(|p| p.kind.clone());
        Ok(raised.is_some_and(|raised| self.host.exception_matches(&raised, &kind)))
    }

    fn fatal_error(&self, message: &str) -> ! {
        fatal(self.fatal_policy, FatalKind::Extension, message)
    }
}
