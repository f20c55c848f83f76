//! Runtime: owns the universal context and the wrapper singletons

use std::sync::Arc;

use once_cell::sync::OnceCell;
use tessera_sdk::{AbiError, AbiResult, Context};

use crate::config::{ConfigError, EngineConfig, Mode};
use crate::debug::DebugContext;
use crate::extension::{ExtensionModule, LoadedModule};
use crate::host::{HostRuntime, SimpleHost};
use crate::trace::TraceContext;
use crate::universal::UniversalContext;

/// Entry point for embedders.
///
/// There is one universal context per runtime. The debug and trace contexts
/// wrap it and are created on first use; every later request returns the
/// same instance, so their state (open handles, counters) is shared by all
/// modules loaded in that mode.
pub struct Runtime {
    config: EngineConfig,
    universal: Arc<UniversalContext>,
    debug: OnceCell<Arc<DebugContext>>,
    trace: OnceCell<Arc<TraceContext>>,
}

impl Runtime {
    /// Runtime over a fresh `SimpleHost`
    pub fn new(config: EngineConfig) -> Self {
        Self::with_host(Arc::new(SimpleHost::new()), config)
    }

    /// Runtime over an existing host runtime
    pub fn with_host(host: Arc<dyn HostRuntime>, config: EngineConfig) -> Self {
        let universal = Arc::new(UniversalContext::new(host, &config));
        Runtime {
            config,
            universal,
            debug: OnceCell::new(),
            trace: OnceCell::new(),
        }
    }

    /// Active configuration
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// The host runtime
    pub fn host(&self) -> &Arc<dyn HostRuntime> {
        self.universal.host()
    }

    /// The universal context
    pub fn universal(&self) -> &Arc<UniversalContext> {
        &self.universal
    }

    /// The debug context, created on first call
    pub fn debug(&self) -> AbiResult<&Arc<DebugContext>> {
        self.debug.get_or_try_init(|| {
            let inner: Arc<dyn Context> = self.universal.clone();
            DebugContext::new(inner, &self.config).map(Arc::new)
        })
    }

    /// The trace context, created on first call
    pub fn trace(&self) -> AbiResult<&Arc<TraceContext>> {
        self.trace.get_or_try_init(|| {
            let inner: Arc<dyn Context> = self.universal.clone();
            TraceContext::new(inner, &self.config).map(Arc::new)
        })
    }

    /// Context for a mode
    pub fn context(&self, mode: Mode) -> AbiResult<Arc<dyn Context>> {
        let ctx: Arc<dyn Context> = match mode {
            Mode::Universal => self.universal.clone(),
            Mode::Debug => self.debug()?.clone(),
            Mode::Trace => self.trace()?.clone(),
        };
        Ok(ctx)
    }

    /// Context for a mode name (`"universal"`, `"debug"` or `"trace"`)
    pub fn context_for(&self, mode: &str) -> AbiResult<Arc<dyn Context>> {
        let mode: Mode = mode
            .parse()
            .map_err(|e: ConfigError| AbiError::Configuration(e.to_string()))?;
        self.context(mode)
    }

    /// Context for the configured default mode
    pub fn default_context(&self) -> AbiResult<Arc<dyn Context>> {
        self.context(self.config.mode)
    }

    /// Bind an extension module to a mode's context
    pub fn load(
        &self,
        module: impl Into<Arc<ExtensionModule>>,
        mode: Mode,
    ) -> AbiResult<LoadedModule> {
        let ctx = self.context(mode)?;
        Ok(LoadedModule::new(module.into(), ctx, mode))
    }
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new(EngineConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tessera_sdk::ContextKind;

    #[test]
    fn test_wrappers_are_singletons() {
        let runtime = Runtime::default();
        let a = runtime.context(Mode::Debug).unwrap();
        let b = runtime.context_for("debug").unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(a.kind(), ContextKind::Debug);
        assert!(Arc::ptr_eq(runtime.trace().unwrap(), runtime.trace().unwrap()));
    }

    #[test]
    fn test_unknown_mode() {
        let runtime = Runtime::default();
        let err = runtime.context_for("verbose").err().unwrap();
        assert!(matches!(err, AbiError::Configuration(_)));
    }

    #[test]
    fn test_default_context_follows_config() {
        let config = EngineConfig {
            mode: Mode::Trace,
            ..EngineConfig::default()
        };
        let runtime = Runtime::new(config);
        assert_eq!(runtime.default_context().unwrap().name(), "trace");
    }
}
