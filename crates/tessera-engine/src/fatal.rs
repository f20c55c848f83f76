//! Fatal error reporting
//!
//! Conditions the engine cannot recover from (a broken handle invariant, a
//! failing trace callback, an explicit `fatal_error` call) print a diagnostic
//! with a backtrace to stderr and then abort or panic per `FatalPolicy`.

use std::backtrace::Backtrace;
use std::fmt;

use crate::config::FatalPolicy;

/// Category of a fatal condition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FatalKind {
    /// Closed, stale, foreign or garbage handle
    InvalidHandle,
    /// Handle closed twice
    DoubleClose,
    /// A trace callback failed
    InstrumentationFailure,
    /// Extension called `fatal_error`
    Extension,
    /// Engine bookkeeping is inconsistent
    Internal,
}

impl fmt::Display for FatalKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            FatalKind::InvalidHandle => "invalid handle",
            FatalKind::DoubleClose => "double close",
            FatalKind::InstrumentationFailure => "instrumentation failure",
            FatalKind::Extension => "extension",
            FatalKind::Internal => "internal",
        })
    }
}

/// Diagnostic printed before terminating
#[derive(Debug)]
pub struct FatalReport {
    /// Category
    pub kind: FatalKind,
    /// Message
    pub message: String,
    /// Where the condition was detected
    pub backtrace: Backtrace,
}

impl FatalReport {
    /// Capture a report at the current location
    pub fn capture(kind: FatalKind, message: impl Into<String>) -> Self {
        FatalReport {
            kind,
            message: message.into(),
            backtrace: Backtrace::force_capture(),
        }
    }
}

impl fmt::Display for FatalReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "========================================")?;
        writeln!(f, "Tessera fatal error ({})", self.kind)?;
        writeln!(f, "  {}", self.message)?;
        writeln!(f, "----------------------------------------")?;
        writeln!(f, "{}", self.backtrace)?;
        write!(f, "========================================")
    }
}

/// Report a fatal condition and terminate according to `policy`
pub fn fatal(policy: FatalPolicy, kind: FatalKind, message: impl Into<String>) -> ! {
    let report = FatalReport::capture(kind, message);
    log::error!("fatal error ({}): {}", report.kind, report.message);
    eprintln!("{}", report);
    match policy {
        FatalPolicy::Abort => std::process::abort(),
        FatalPolicy::Panic => panic!("fatal error ({}): {}", report.kind, report.message),
    }
}
