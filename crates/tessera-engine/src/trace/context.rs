//! The trace context
//!
//! Wraps another context and counts and times every call. Handles pass
//! through unchanged: the trace layer has no handle space of its own.

use std::sync::Arc;
use std::time::Instant;

use log::debug;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use tessera_sdk::{
    AbiError, AbiResult, Constant, Context, ContextKind, ContextOp, Handle, ObjectRef,
    PendingError, Tracker,
};

use super::counters::TraceCounters;
use crate::config::{EngineConfig, FatalPolicy};
use crate::fatal::{fatal, FatalKind};

/// Argument of `set_trace_functions`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TraceFunction {
    /// Leave the current callback in place
    Keep,
    /// Remove the callback
    Clear,
    /// Install a callable; it receives the operation name as a string
    Set(Handle),
}

/// Call counting and timing wrapper context
pub struct TraceContext {
    inner: Arc<dyn Context>,
    counters: TraceCounters,
    on_enter: Mutex<Option<ObjectRef>>,
    on_exit: Mutex<Option<ObjectRef>>,
    fatal_policy: FatalPolicy,
}

impl TraceContext {
    /// Wrap `inner`, which must be a universal context
    pub fn new(inner: Arc<dyn Context>, config: &EngineConfig) -> AbiResult<Self> {
        if inner.kind() != ContextKind::Universal {
            return Err(AbiError::Configuration(format!(
                "trace context cannot wrap '{}', expected a universal context",
                inner.name()
            )));
        }
        debug!("creating trace context over '{}'", inner.name());
        Ok(Self {
            inner,
            counters: TraceCounters::new(),
            on_enter: Mutex::new(None),
            on_exit: Mutex::new(None),
            fatal_policy: config.fatal_policy,
        })
    }

    /// The wrapped context
    pub fn inner(&self) -> &Arc<dyn Context> {
        &self.inner
    }

    /// Call count of every operation, keyed by name
    pub fn call_counts(&self) -> FxHashMap<&'static str, u64> {
        self.counters.call_counts()
    }

    /// Cumulative nanoseconds of every operation, keyed by name
    pub fn durations(&self) -> FxHashMap<&'static str, u64> {
        self.counters.durations()
    }

    /// Calls of one operation
    pub fn call_count(&self, op: ContextOp) -> u64 {
        self.counters.calls(op)
    }

    /// Nanoseconds spent in one operation
    pub fn duration_ns(&self, op: ContextOp) -> u64 {
        self.counters.duration_ns(op)
    }

    /// Install, keep or clear the enter and exit callbacks.
    ///
    /// Both arguments are validated before either is applied. A null or
    /// non-callable handle is a configuration error and leaves a `TypeError`
    /// pending.
    pub fn set_trace_functions(
        &self,
        on_enter: TraceFunction,
        on_exit: TraceFunction,
    ) -> AbiResult<()> {
        let on_enter = self.resolve_trace_function(on_enter, "on_enter")?;
        let on_exit = self.resolve_trace_function(on_exit, "on_exit")?;
        if let Some(update) = on_enter {
            *self.on_enter.lock() = update;
        }
        if let Some(update) = on_exit {
            *self.on_exit.lock() = update;
        }
        Ok(())
    }

    fn resolve_trace_function(
        &self,
        func: TraceFunction,
        which: &str,
    ) -> AbiResult<Option<Option<ObjectRef>>> {
        match func {
            TraceFunction::Keep => Ok(None),
            TraceFunction::Clear => Ok(Some(None)),
            TraceFunction::Set(h) if h.is_null() => {
                Err(self.configuration_error(format!("{} must be callable, got NULL", which)))
            }
            TraceFunction::Set(h) => {
                if !self.inner.callable_check(h)? {
                    return Err(self.configuration_error(format!("{} must be callable", which)));
                }
                match self.inner.as_object(h)? {
                    Some(obj) => Ok(Some(Some(obj))),
                    None => Err(self.configuration_error(format!("{} must be callable", which))),
                }
            }
        }
    }

    fn configuration_error(&self, message: String) -> AbiError {
        let pending = self
            .inner
            .constant(Constant::TypeError)
            .and_then(|kind| self.inner.err_set_string(kind, &message));
        match pending {
            Ok(()) => AbiError::Configuration(message),
            Err(err) => err,
        }
    }

    fn notify(&self, op: ContextOp, slot: &Mutex<Option<ObjectRef>>, which: &str) {
        let callback = slot.lock().clone();
        if let Some(callback) = callback {
            if let Err(err) = self.invoke(&callback, op) {
                fatal(
                    self.fatal_policy,
                    FatalKind::InstrumentationFailure,
                    format!("error in {} trace function for '{}': {}", which, op, err),
                );
            }
        }
    }

    fn invoke(&self, callback: &ObjectRef, op: ContextOp) -> AbiResult<()> {
        let func = self.inner.from_object(callback)?;
        let name = match self.inner.unicode_from_str(op.name()) {
            Ok(name) => name,
            Err(err) => {
                self.inner.close(func);
                return Err(err);
            }
        };
        let result = self.inner.call(func, &[name]);
        self.inner.close(name);
        self.inner.close(func);
        self.inner.close(result?);
        Ok(())
    }

    #[inline]
    fn traced<T>(&self, op: ContextOp, f: impl FnOnce() -> T) -> T {
        self.notify(op, &self.on_enter, "on_enter");
        let start = Instant::now();
        let result = f();
        self.counters.record(op, start.elapsed());
        self.notify(op, &self.on_exit, "on_exit");
        result
    }
}

impl Context for TraceContext {
    fn name(&self) -> &str {
        "trace"
    }

    fn kind(&self) -> ContextKind {
        ContextKind::Trace
    }

    fn constant(&self, constant: Constant) -> AbiResult<Handle> {
        self.inner.constant(constant)
    }

    fn dup(&self, h: Handle) -> AbiResult<Handle> {
        self.traced(ContextOp::Dup, || self.inner.dup(h))
    }

    fn close(&self, h: Handle) {
        self.traced(ContextOp::Close, || self.inner.close(h))
    }

    fn from_object(&self, obj: &ObjectRef) -> AbiResult<Handle> {
        self.traced(ContextOp::FromObject, || self.inner.from_object(obj))
    }

    fn as_object(&self, h: Handle) -> AbiResult<Option<ObjectRef>> {
        self.traced(ContextOp::AsObject, || self.inner.as_object(h))
    }

    fn long_from_i64(&self, value: i64) -> AbiResult<Handle> {
        self.traced(ContextOp::LongFromI64, || self.inner.long_from_i64(value))
    }

    fn long_as_i64(&self, h: Handle) -> AbiResult<i64> {
        self.traced(ContextOp::LongAsI64, || self.inner.long_as_i64(h))
    }

    fn float_from_f64(&self, value: f64) -> AbiResult<Handle> {
        self.traced(ContextOp::FloatFromF64, || self.inner.float_from_f64(value))
    }

    fn float_as_f64(&self, h: Handle) -> AbiResult<f64> {
        self.traced(ContextOp::FloatAsF64, || self.inner.float_as_f64(h))
    }

    fn unicode_from_str(&self, s: &str) -> AbiResult<Handle> {
        self.traced(ContextOp::UnicodeFromStr, || self.inner.unicode_from_str(s))
    }

    fn unicode_as_string(&self, h: Handle) -> AbiResult<String> {
        self.traced(ContextOp::UnicodeAsString, || self.inner.unicode_as_string(h))
    }

    fn add(&self, a: Handle, b: Handle) -> AbiResult<Handle> {
        self.traced(ContextOp::Add, || self.inner.add(a, b))
    }

    fn repr(&self, h: Handle) -> AbiResult<Handle> {
        self.traced(ContextOp::Repr, || self.inner.repr(h))
    }

    fn is_true(&self, h: Handle) -> AbiResult<bool> {
        self.traced(ContextOp::IsTrue, || self.inner.is_true(h))
    }

    fn is(&self, a: Handle, b: Handle) -> AbiResult<bool> {
        self.traced(ContextOp::Is, || self.inner.is(a, b))
    }

    fn type_name(&self, h: Handle) -> AbiResult<String> {
        self.traced(ContextOp::TypeName, || self.inner.type_name(h))
    }

    fn list_new(&self) -> AbiResult<Handle> {
        self.traced(ContextOp::ListNew, || self.inner.list_new())
    }

    fn list_append(&self, list: Handle, item: Handle) -> AbiResult<()> {
        self.traced(ContextOp::ListAppend, || self.inner.list_append(list, item))
    }

    fn length(&self, h: Handle) -> AbiResult<usize> {
        self.traced(ContextOp::Length, || self.inner.length(h))
    }

    fn get_item(&self, h: Handle, index: usize) -> AbiResult<Handle> {
        self.traced(ContextOp::GetItem, || self.inner.get_item(h, index))
    }

    fn callable_check(&self, h: Handle) -> AbiResult<bool> {
        self.traced(ContextOp::CallableCheck, || self.inner.callable_check(h))
    }

    fn call(&self, callable: Handle, args: &[Handle]) -> AbiResult<Handle> {
        self.traced(ContextOp::Call, || self.inner.call(callable, args))
    }

    fn err_set_string(&self, kind: Handle, message: &str) -> AbiResult<()> {
        self.traced(ContextOp::ErrSetString, || self.inner.err_set_string(kind, message))
    }

    fn err_occurred(&self) -> bool {
        self.traced(ContextOp::ErrOccurred, || self.inner.err_occurred())
    }

    fn err_clear(&self) {
        self.traced(ContextOp::ErrClear, || self.inner.err_clear())
    }

    fn err_fetch(&self) -> Option<PendingError> {
        self.traced(ContextOp::ErrFetch, || self.inner.err_fetch())
    }

    fn err_exception_matches(&self, kind: Handle) -> AbiResult<bool> {
        self.traced(ContextOp::ErrExceptionMatches, || {
            self.inner.err_exception_matches(kind)
        })
    }

    fn err_no_memory(&self) -> AbiError {
        self.inner.err_no_memory()
    }

    fn fatal_error(&self, message: &str) -> ! {
        // never returns, so only the call is counted
        self.notify(ContextOp::FatalError, &self.on_enter, "on_enter");
        self.counters
            .record(ContextOp::FatalError, std::time::Duration::ZERO);
        self.inner.fatal_error(message)
    }

    fn tracker_new(&self, capacity: usize) -> AbiResult<Tracker> {
        self.traced(ContextOp::TrackerNew, || self.inner.tracker_new(capacity))
    }

    fn tracker_add(&self, tracker: &mut Tracker, h: Handle) -> AbiResult<()> {
        self.traced(ContextOp::TrackerAdd, || self.inner.tracker_add(tracker, h))
    }

    fn tracker_remove_all(&self, tracker: &mut Tracker) {
        self.traced(ContextOp::TrackerRemoveAll, || {
            self.inner.tracker_remove_all(tracker)
        })
    }

    fn tracker_close(&self, tracker: Tracker) {
        self.traced(ContextOp::TrackerClose, || self.inner.tracker_close(tracker))
    }
}
