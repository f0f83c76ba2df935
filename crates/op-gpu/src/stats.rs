//! GPU statistics

use crate::depal::DepalStats;
use std::fmt;

/// Per-session GPU counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GpuStats {
    /// Frames completed
    pub frames: u64,
    /// Draws dropped because a resource could not be created
    pub draws_skipped: u64,
    pub shader_compiles: u64,
    pub compile_failures: u64,
}

impl GpuStats {
    pub(crate) fn collect(frames: u64, draws_skipped: u64, depal: DepalStats) -> Self {
        Self {
            frames,
            draws_skipped,
            shader_compiles: depal.shader_compiles,
            compile_failures: depal.compile_failures,
        }
    }
}

impl fmt::Display for GpuStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} frames, {} draws skipped, {} shaders compiled ({} failed)",
            self.frames, self.draws_skipped, self.shader_compiles, self.compile_failures
        )
    }
}
