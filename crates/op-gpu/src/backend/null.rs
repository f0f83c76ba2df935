//! Backend that renders nothing

use super::{GpuInterface, GpuResources};
use crate::context::GraphicsEvent;
use crate::debug::{DebugShaderStringType, DebugShaderType};
use crate::readiness::{ReadyProbe, WarmUp};
use crate::stats::GpuStats;
use op_core::{GpuBackend, GpuError};

/// No-op backend for running without a host context
pub struct NullGpu {
    frame: u64,
    ready: WarmUp,
}

impl NullGpu {
    pub fn new() -> Self {
        tracing::info!("Using null GPU backend");
        Self {
            frame: 0,
            ready: WarmUp::ready(),
        }
    }
}

impl Default for NullGpu {
    fn default() -> Self {
        Self::new()
    }
}

impl GpuInterface for NullGpu {
    fn kind(&self) -> GpuBackend {
        GpuBackend::Null
    }

    fn is_ready(&self) -> bool {
        self.ready.is_ready()
    }

    fn cancel_ready(&mut self) {}

    fn ready_probe(&self) -> ReadyProbe {
        self.ready.probe()
    }

    fn begin_frame(&mut self) {}

    fn end_frame(&mut self) {
        self.frame += 1;
    }

    fn frame(&self) -> u64 {
        self.frame
    }

    fn device_lost(&mut self) {}

    fn device_restore(&mut self) -> Result<(), GpuError> {
        Ok(())
    }

    fn handle_event(&mut self, _event: GraphicsEvent) {}

    fn resources(&mut self) -> Option<GpuResources<'_>> {
        None
    }

    fn debug_get_shader_ids(&self, _kind: DebugShaderType) -> Vec<String> {
        Vec::new()
    }

    fn debug_get_shader_string(&self, _id: &str, _kind: DebugShaderType, _string_type: DebugShaderStringType) -> String {
        String::new()
    }

    fn stats(&self) -> GpuStats {
        GpuStats {
            frames: self.frame,
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_null_backend_counts_frames() {
        let mut gpu = NullGpu::new();
        assert!(gpu.is_ready());
        gpu.begin_frame();
        gpu.end_frame();
        assert_eq!(gpu.frame(), 1);
        assert!(gpu.resources().is_none());
        assert!(gpu.debug_get_shader_ids(DebugShaderType::Depal).is_empty());
    }
}
