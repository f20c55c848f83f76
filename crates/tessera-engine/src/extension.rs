//! Extension modules
//!
//! An extension is a named set of functions written against `dyn Context`.
//! The same module can be loaded in any mode; the loaded copy is bound to
//! that mode's context and the function code never knows which one it got.

use std::fmt;
use std::sync::Arc;

use rustc_hash::FxHashMap;
use tessera_sdk::{AbiError, AbiResult, Context, Handle, ObjectRef};

use crate::config::Mode;

/// Extension function: receives the context and borrowed argument handles,
/// returns a new handle owned by the caller
pub type ExtensionFn = fn(&dyn Context, &[Handle]) -> AbiResult<Handle>;

/// Named collection of extension functions
#[derive(Clone)]
pub struct ExtensionModule {
    name: String,
    version: String,
    functions: FxHashMap<String, ExtensionFn>,
}

impl ExtensionModule {
    /// Create an empty module
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        ExtensionModule {
            name: name.into(),
            version: version.into(),
            functions: FxHashMap::default(),
        }
    }

    /// Register a function, replacing any previous one of the same name
    pub fn register_function(&mut self, name: impl Into<String>, func: ExtensionFn) {
        self.functions.insert(name.into(), func);
    }

    /// Builder form of `register_function`
    pub fn with_function(mut self, name: impl Into<String>, func: ExtensionFn) -> Self {
        self.register_function(name, func);
        self
    }

    /// Module name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Module version
    pub fn version(&self) -> &str {
        &self.version
    }

    /// Look up a function
    pub fn function(&self, name: &str) -> Option<ExtensionFn> {
        self.functions.get(name).copied()
    }

    /// Registered function names, sorted
    pub fn function_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.functions.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl fmt::Debug for ExtensionModule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExtensionModule")
            .field("name", &self.name)
            .field("version", &self.version)
            .field("functions", &self.function_names())
            .finish()
    }
}

/// A module bound to one context
pub struct LoadedModule {
    module: Arc<ExtensionModule>,
    ctx: Arc<dyn Context>,
    mode: Mode,
}

impl LoadedModule {
    pub(crate) fn new(module: Arc<ExtensionModule>, ctx: Arc<dyn Context>, mode: Mode) -> Self {
        log::debug!(
            "loaded extension '{}' {} in {} mode",
            module.name(),
            module.version(),
            mode
        );
        LoadedModule { module, ctx, mode }
    }

    /// The module definition
    pub fn module(&self) -> &ExtensionModule {
        &self.module
    }

    /// Context the module is bound to
    pub fn context(&self) -> &Arc<dyn Context> {
        &self.ctx
    }

    /// Mode the module was loaded in
    pub fn mode(&self) -> Mode {
        self.mode
    }

    /// Call an extension function with host objects.
    ///
    /// Argument handles are opened into a tracker and closed after the call,
    /// on both paths. The result handle is converted back to an object and
    /// closed. A failing call returns the pending exception if there is one.
    pub fn call(&self, name: &str, args: &[ObjectRef]) -> AbiResult<ObjectRef> {
        let func = self.module.function(name).ok_or_else(|| {
            AbiError::ModuleError(format!(
                "module '{}' has no function '{}'",
                self.module.name(),
                name
            ))
        })?;
        let ctx = &*self.ctx;

        let mut tracker = ctx
            .tracker_new(args.len())
            .map_err(|err| self.fetch_error(err))?;
        let mut handles = Vec::with_capacity(args.len());
        for arg in args {
            let h = match ctx.from_object(arg) {
                Ok(h) => h,
                Err(err) => {
                    ctx.tracker_close(tracker);
                    return Err(self.fetch_error(err));
                }
            };
            let tracked = tracker.len();
            if let Err(err) = ctx.tracker_add(&mut tracker, h) {
                if tracker.len() == tracked {
                    ctx.close(h);
                }
                ctx.tracker_close(tracker);
                return Err(self.fetch_error(err));
            }
            handles.push(h);
        }

        let result = func(ctx, &handles);
        ctx.tracker_close(tracker);

        let h = result.map_err(|err| self.fetch_error(err))?;
        if h.is_null() {
            return Err(self.fetch_error(AbiError::raised(
                "SystemError",
                format!("'{}' returned NULL without setting an exception", name),
            )));
        }
        let obj = ctx.as_object(h);
        ctx.close(h);
        obj?.ok_or(AbiError::InvalidHandle(h))
    }

    fn fetch_error(&self, err: AbiError) -> AbiError {
        match self.ctx.err_fetch() {
            Some(pending) => pending.into(),
            None => err,
        }
    }
}

impl fmt::Debug for LoadedModule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoadedModule")
            .field("module", &self.module.name())
            .field("context", &self.ctx.name())
            .field("mode", &self.mode)
            .finish()
    }
}
