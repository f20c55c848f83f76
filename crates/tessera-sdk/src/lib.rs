//! Tessera SDK - ABI surface for extension modules
//!
//! This crate provides the types extension code programs against, without
//! depending on the engine:
//!
//! - [`Handle`]: opaque reference to a host object
//! - [`Context`]: dispatch trait every runtime operation goes through
//! - [`Tracker`]: batch of handles closed together on error paths
//! - [`AbiError`] / [`AbiResult`]: errors crossing the boundary
//!
//! # Example
//!
//! ```ignore
//! use tessera_sdk::{AbiResult, Context, Handle};
//!
//! fn double(ctx: &dyn Context, args: &[Handle]) -> AbiResult<Handle> {
//!     ctx.add(args[0], args[0])
//! }
//! ```

#![warn(missing_docs)]

pub mod context;
pub mod error;
pub mod handle;
pub mod object;
pub mod tracker;

pub use context::{Constant, Context, ContextKind, ContextOp, ABI_VERSION, OUT_OF_MEMORY};
pub use error::{AbiError, AbiResult, PendingError};
pub use handle::Handle;
pub use object::{HostObject, ObjectRef};
pub use tracker::{Tracker, DEFAULT_TRACKER_CAPACITY};
