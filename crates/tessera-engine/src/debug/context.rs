//! The debug context
//!
//! Wraps another context. Every handle argument is unwrapped and checked
//! before the call is delegated; every handle result is wrapped in a fresh
//! debug record. The inner context only ever sees its own handles.

use std::sync::Arc;

use log::{debug, warn};
use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use tessera_sdk::{
    AbiError, AbiResult, Constant, Context, ContextKind, Handle, ObjectRef, PendingError,
};

use super::handles::{Cursor, DebugHandleInfo, DebugHandles, HandleViolation};
use crate::config::{EngineConfig, FatalPolicy};
use crate::fatal::{fatal, FatalKind};

/// Callback invoked on invalid handle usage instead of terminating
pub type InvalidHandleCallback = Arc<dyn Fn(&HandleViolation) + Send + Sync>;

/// Handle-checking wrapper context
pub struct DebugContext {
    inner: Arc<dyn Context>,
    handles: Mutex<DebugHandles>,
    constants: OnceCell<Vec<Handle>>,
    on_invalid_handle: Mutex<Option<InvalidHandleCallback>>,
    fatal_policy: FatalPolicy,
}

impl DebugContext {
    /// Wrap `inner`. A debug context cannot wrap another debug context.
    pub fn new(inner: Arc<dyn Context>, config: &EngineConfig) -> AbiResult<Self> {
        if inner.kind() == ContextKind::Debug {
            return Err(AbiError::Configuration(format!(
                "debug context cannot wrap '{}', expected a non-debug context",
                inner.name()
            )));
        }
        debug!(
            "creating debug context over '{}' (closed queue max {})",
            inner.name(),
            config.closed_handles_queue_max_size
        );
        Ok(Self {
            inner,
            handles: Mutex::new(DebugHandles::new(config.closed_handles_queue_max_size)),
            constants: OnceCell::new(),
            on_invalid_handle: Mutex::new(None),
            fatal_policy: config.fatal_policy,
        })
    }

    /// The wrapped context
    pub fn inner(&self) -> &Arc<dyn Context> {
        &self.inner
    }

    /// Start a new generation and return its number
    pub fn new_generation(&self) -> u64 {
        self.handles.lock().new_generation()
    }

    /// Current generation
    pub fn generation(&self) -> u64 {
        self.handles.lock().generation()
    }

    /// Open handles of generation `min_generation` or newer, newest first.
    ///
    /// The walk is lazy and re-locks for every item, so handles may be
    /// opened and closed while iterating. It ends early when the record it
    /// would visit next has been closed in the meantime.
    pub fn open_handles(&self, min_generation: u64) -> OpenHandles<'_> {
        let cursor = self.handles.lock().open_cursor();
        OpenHandles {
            ctx: self,
            cursor,
            min_generation,
        }
    }

    /// Closed handles still remembered, oldest first
    pub fn closed_handles(&self, min_generation: u64) -> Vec<DebugHandleInfo> {
        self.handles.lock().closed_entries(min_generation)
    }

    /// Bound of the closed handle history
    pub fn closed_handles_queue_max_size(&self) -> usize {
        self.handles.lock().closed_max()
    }

    /// Change the bound of the closed handle history; shrinking evicts the
    /// oldest entries right away
    pub fn set_closed_handles_queue_max_size(&self, max: usize) {
        self.handles.lock().set_closed_max(max);
    }

    /// Install or remove the invalid handle callback.
    ///
    /// With a callback installed, invalid handle usage is passed to it and
    /// the operation fails with `InvalidHandle` (or `DoubleClose`) instead of
    /// terminating the process.
    pub fn set_on_invalid_handle(&self, callback: Option<InvalidHandleCallback>) {
        *self.on_invalid_handle.lock() = callback;
    }

    /// Close an open handle by id, reporting misuse as an error
    pub fn force_close(&self, id: Handle) -> AbiResult<()> {
        let result = self.handles.lock().close(id);
        if let Some(uh) = result? {
            self.inner.close(uh);
        }
        Ok(())
    }

    /// Snapshot of a debug handle that is open or still in the closed queue
    pub fn handle_info(&self, h: Handle) -> Option<DebugHandleInfo> {
        let info = self.handles.lock().info(h)?;
        Some(self.attach_object(info))
    }

    /// Number of open debug handles (constants excluded)
    pub fn open_count(&self) -> usize {
        self.handles.lock().open_len()
    }

    /// Number of handles in the closed queue
    pub fn closed_count(&self) -> usize {
        self.handles.lock().closed_len()
    }

    /// Verify the record lists
    pub fn check_invariants(&self) -> Result<(), String> {
        self.handles.lock().check_invariants()
    }

    fn attach_object(&self, mut info: DebugHandleInfo) -> DebugHandleInfo {
        if !info.is_closed {
            info.object = self.inner.as_object(info.underlying).ok().flatten();
        }
        info
    }

    fn report(&self, violation: HandleViolation) -> AbiError {
        warn!("debug context: {}", violation);
        let callback = self.on_invalid_handle.lock().clone();
        match callback {
            Some(callback) => {
                callback(&violation);
                violation.into()
            }
            None => {
                let kind = match violation {
                    HandleViolation::DoubleClose(_) => FatalKind::DoubleClose,
                    _ => FatalKind::InvalidHandle,
                };
                fatal(self.fatal_policy, kind, violation.to_string())
            }
        }
    }

    fn unwrap(&self, h: Handle) -> AbiResult<Handle> {
        let result = self.handles.lock().unwrap(h);
        result.map_err(|v| self.report(v))
    }

    fn wrap(&self, uh: Handle) -> AbiResult<Handle> {
        if uh.is_null() {
            return Ok(Handle::NULL);
        }
        let result = self.handles.lock().wrap(uh);
        match result {
            Ok(h) => Ok(h),
            Err(err) => {
                self.inner.close(uh);
                match err {
                    AbiError::OutOfMemory => Err(self.inner.err_no_memory()),
                    other => Err(other),
                }
            }
        }
    }

    fn wrap_result(&self, result: AbiResult<Handle>) -> AbiResult<Handle> {
        self.wrap(result?)
    }

    fn init_constants(&self) -> AbiResult<Vec<Handle>> {
        let mut pinned = Vec::with_capacity(Constant::COUNT);
        for &c in Constant::ALL {
            let result = self.inner.constant(c).and_then(|uh| {
                let pin = self.handles.lock().pin(uh);
                pin.map_err(|err| match err {
                    AbiError::OutOfMemory => self.inner.err_no_memory(),
                    other => other,
                })
            });
            match result {
                Ok(h) => pinned.push(h),
                Err(err) => {
                    let mut handles = self.handles.lock();
                    for h in pinned {
                        // inner constants stay owned by the inner context
                        let _ = handles.unpin(h);
                    }
                    return Err(err);
                }
            }
        }
        debug!("debug context: pinned {} constant handles", pinned.len());
        Ok(pinned)
    }
}

/// Lazy walk over open debug handles, see [`DebugContext::open_handles`]
pub struct OpenHandles<'a> {
    ctx: &'a DebugContext,
    cursor: Option<Cursor>,
    min_generation: u64,
}

impl Iterator for OpenHandles<'_> {
    type Item = DebugHandleInfo;

    fn next(&mut self) -> Option<DebugHandleInfo> {
        let cursor = self.cursor.take()?;
        let (info, next) = self
            .ctx
            .handles
            .lock()
            .open_step(cursor, self.min_generation)?;
        self.cursor = next;
        Some(self.ctx.attach_object(info))
    }
}

impl Context for DebugContext {
    fn name(&self) -> &str {
        "debug"
    }

    fn kind(&self) -> ContextKind {
        ContextKind::Debug
    }

    fn constant(&self, constant: Constant) -> AbiResult<Handle> {
        let handles = self.constants.get_or_try_init(|| self.init_constants())?;
        Ok(handles[constant.id()])
    }

    fn dup(&self, h: Handle) -> AbiResult<Handle> {
        let uh = self.unwrap(h)?;
        self.wrap_result(self.inner.dup(uh))
    }

    fn close(&self, h: Handle) {
        let result = self.handles.lock().close(h);
        match result {
            Ok(Some(uh)) => self.inner.close(uh),
            Ok(None) => {}
            Err(violation) => {
                self.report(violation);
            }
        }
    }

    fn from_object(&self, obj: &ObjectRef) -> AbiResult<Handle> {
        self.wrap_result(self.inner.from_object(obj))
    }

    fn as_object(&self, h: Handle) -> AbiResult<Option<ObjectRef>> {
        let uh = self.unwrap(h)?;
        self.inner.as_object(uh)
    }

    fn long_from_i64(&self, value: i64) -> AbiResult<Handle> {
        self.wrap_result(self.inner.long_from_i64(value))
    }

    fn long_as_i64(&self, h: Handle) -> AbiResult<i64> {
        let uh = self.unwrap(h)?;
        self.inner.long_as_i64(uh)
    }

    fn float_from_f64(&self, value: f64) -> AbiResult<Handle> {
        self.wrap_result(self.inner.float_from_f64(value))
    }

    fn float_as_f64(&self, h: Handle) -> AbiResult<f64> {
        let uh = self.unwrap(h)?;
        self.inner.float_as_f64(uh)
    }

    fn unicode_from_str(&self, s: &str) -> AbiResult<Handle> {
        self.wrap_result(self.inner.unicode_from_str(s))
    }

    fn unicode_as_string(&self, h: Handle) -> AbiResult<String> {
        let uh = self.unwrap(h)?;
        self.inner.unicode_as_string(uh)
    }

    fn add(&self, a: Handle, b: Handle) -> AbiResult<Handle> {
        let a = self.unwrap(a)?;
        let b = self.unwrap(b)?;
        self.wrap_result(self.inner.add(a, b))
    }

    fn repr(&self, h: Handle) -> AbiResult<Handle> {
        let uh = self.unwrap(h)?;
        self.wrap_result(self.inner.repr(uh))
    }

    fn is_true(&self, h: Handle) -> AbiResult<bool> {
        let uh = self.unwrap(h)?;
        self.inner.is_true(uh)
    }

    fn is(&self, a: Handle, b: Handle) -> AbiResult<bool> {
        let a = self.unwrap(a)?;
        let b = self.unwrap(b)?;
        self.inner.is(a, b)
    }

    fn type_name(&self, h: Handle) -> AbiResult<String> {
        let uh = self.unwrap(h)?;
        self.inner.type_name(uh)
    }

    fn list_new(&self) -> AbiResult<Handle> {
        self.wrap_result(self.inner.list_new())
    }

    fn list_append(&self, list: Handle, item: Handle) -> AbiResult<()> {
        let list = self.unwrap(list)?;
        let item = self.unwrap(item)?;
        self.inner.list_append(list, item)
    }

    fn length(&self, h: Handle) -> AbiResult<usize> {
        let uh = self.unwrap(h)?;
        self.inner.length(uh)
    }

    fn get_item(&self, h: Handle, index: usize) -> AbiResult<Handle> {
        let uh = self.unwrap(h)?;
        self.wrap_result(self.inner.get_item(uh, index))
    }

    fn callable_check(&self, h: Handle) -> AbiResult<bool> {
        let uh = self.unwrap(h)?;
        self.inner.callable_check(uh)
    }

    fn call(&self, callable: Handle, args: &[Handle]) -> AbiResult<Handle> {
        let callable = self.unwrap(callable)?;
        let args = args
            .iter()
            .map(|&h| self.unwrap(h))
            .collect::<AbiResult<Vec<_>>>()?;
        self.wrap_result(self.inner.call(callable, &args))
    }

    fn err_set_string(&self, kind: Handle, message: &str) -> AbiResult<()> {
        let kind = self.unwrap(kind)?;
        self.inner.err_set_string(kind, message)
    }

    fn err_occurred(&self) -> bool {
        self.inner.err_occurred()
    }

    fn err_clear(&self) {
        self.inner.err_clear()
    }

    fn err_fetch(&self) -> Option<PendingError> {
        self.inner.err_fetch()
    }

    fn err_exception_matches(&self, kind: Handle) -> AbiResult<bool> {
        let kind = self.unwrap(kind)?;
        self.inner.err_exception_matches(kind)
    }

    fn err_no_memory(&self) -> AbiError {
        self.inner.err_no_memory()
    }

    fn fatal_error(&self, message: &str) -> ! {
        self.inner.fatal_error(message)
    }
}
