//! Universal mode: the base context and its handle table

mod context;
mod handles;

pub use context::UniversalContext;
pub use handles::{HandleError, HandleTable, UHandle, DEFAULT_GROWTH_CONSTANT};
