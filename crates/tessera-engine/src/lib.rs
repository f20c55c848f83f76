//! Tessera Engine
//!
//! Runtime side of the Tessera ABI:
//! - **Universal**: the base context and its handle table (`universal` module)
//! - **Debug**: handle auditing wrapper with leak detection (`debug` module)
//! - **Trace**: call counting and timing wrapper (`trace` module)
//! - **Host**: the object runtime contexts forward to (`host` module)
//! - **Runtime**: owns the contexts and loads extension modules
//!
//! # Example
//!
//! ```rust,ignore
//! use tessera_engine::{EngineConfig, ExtensionModule, Mode, Runtime};
//! use tessera_sdk::{AbiResult, Context, Handle};
//!
//! fn add(ctx: &dyn Context, args: &[Handle]) -> AbiResult<Handle> {
//!     ctx.add(args[0], args[1])
//! }
//!
//! let runtime = Runtime::new(EngineConfig::from_env()?);
//! let module = ExtensionModule::new("demo", "0.1.0").with_function("add", add);
//! let loaded = runtime.load(module, Mode::Debug)?;
//! let host = runtime.host();
//! let sum = loaded.call("add", &[host.int_from_i64(1), host.int_from_i64(2)])?;
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

// ============================================================================
// Core Modules
// ============================================================================

/// Configuration: modes, fatal policy, TOML and environment loading
pub mod config;

/// Fatal error reporting
pub mod fatal;

/// Host runtime interface and the in-memory sample host
pub mod host;

/// Universal context and handle table
pub mod universal;

/// Debug wrapper context
pub mod debug;

/// Trace wrapper context
pub mod trace;

/// Extension modules and the call trampoline
pub mod extension;

/// Runtime owning the contexts
pub mod runtime;

// ============================================================================
// Re-exports
// ============================================================================

pub use config::{ConfigError, EngineConfig, FatalPolicy, Mode};
pub use debug::{DebugContext, DebugHandleInfo, HandleViolation, LeakDetector, LeakError};
pub use extension::{ExtensionFn, ExtensionModule, LoadedModule};
pub use fatal::{FatalKind, FatalReport};
pub use host::{HostError, HostResult, HostRuntime, HostValue, SimpleHost};
pub use runtime::Runtime;
pub use trace::{TraceContext, TraceFunction};
pub use universal::UniversalContext;

pub use tessera_sdk as sdk;
