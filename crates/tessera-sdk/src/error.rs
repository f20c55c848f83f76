//! Error types for the Tessera ABI

use crate::handle::Handle;

/// Result type for ABI calls
pub type AbiResult<T> = Result<T, AbiError>;

/// Errors surfaced across the extension boundary.
///
/// Host exceptions are reported as [`AbiError::Raised`]; the same exception is
/// also left pending on the context until it is fetched or cleared.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AbiError {
    /// A host-runtime exception is pending
    #[error("{type_name}: {message}")]
    Raised {
        /// Name of the exception type
        type_name: String,
        /// Exception message
        message: String,
    },

    /// Handle is out of range, free, stale or belongs to another layer
    #[error("Invalid handle: {0:?}")]
    InvalidHandle(Handle),

    /// Handle was closed a second time
    #[error("Handle closed twice: {0:?}")]
    DoubleClose(Handle),

    /// Table, tracker or record allocation failed
    #[error("Out of memory")]
    OutOfMemory,

    /// Unknown mode, malformed callback, bad setting
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Module-level error (unknown function, bad module definition)
    #[error("Module error: {0}")]
    ModuleError(String),
}

impl AbiError {
    /// Shorthand for a raised exception of the given type
    pub fn raised(type_name: impl Into<String>, message: impl Into<String>) -> Self {
        AbiError::Raised {
            type_name: type_name.into(),
            message: message.into(),
        }
    }

    /// True for errors that correspond to a pending host exception
    pub fn is_raised(&self) -> bool {
        matches!(self, AbiError::Raised { .. })
    }
}

/// Exception left pending on a context by a failed operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingError {
    /// Name of the exception type
    pub type_name: String,
    /// Exception message
    pub message: String,
}

impl From<PendingError> for AbiError {
    fn from(err: PendingError) -> Self {
        AbiError::Raised {
            type_name: err.type_name,
            message: err.message,
        }
    }
}
