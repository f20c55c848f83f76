//! Leak detection on top of debug generations

use std::fmt;

use super::context::DebugContext;
use super::handles::DebugHandleInfo;

/// Handles opened during a checked region and never closed
#[derive(Debug)]
pub struct LeakError {
    /// Leaked handles, newest first
    pub leaks: Vec<DebugHandleInfo>,
}

impl fmt::Display for LeakError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} unclosed handle(s):", self.leaks.len())?;
        for leak in &self.leaks {
            write!(f, "\n    {}", leak)?;
        }
        Ok(())
    }
}

impl std::error::Error for LeakError {}

/// Reports handles opened between `start` and `stop` that are still open.
///
/// ```rust,ignore
/// let detector = LeakDetector::start(&debug_ctx);
/// run_extension_code(&debug_ctx);
/// detector.stop()?;
/// ```
pub struct LeakDetector<'a> {
    ctx: &'a DebugContext,
    generation: u64,
}

impl<'a> LeakDetector<'a> {
    /// Begin a new generation on `ctx`
    pub fn start(ctx: &'a DebugContext) -> Self {
        let generation = ctx.new_generation();
        LeakDetector { ctx, generation }
    }

    /// Generation this detector watches
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Handles opened since `start` that are still open
    pub fn check(&self) -> Vec<DebugHandleInfo> {
        self.ctx.open_handles(self.generation).collect()
    }

    /// Finish; fails if anything opened since `start` is still open
    pub fn stop(self) -> Result<(), LeakError> {
        let leaks = self.check();
        if leaks.is_empty() {
            Ok(())
        } else {
            log::warn!("leak detector: {} unclosed handle(s)", leaks.len());
            Err(LeakError { leaks })
        }
    }
}
