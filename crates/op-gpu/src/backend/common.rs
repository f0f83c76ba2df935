//! Backend shared by every device-driven implementation

use super::{GpuInterface, GpuResources};
use crate::context::{GraphicsContext, GraphicsEvent};
use crate::debug::{DebugShaderStringType, DebugShaderType};
use crate::depal::{DepalShaderCache, DepalSourceStash};
use crate::device::RenderDevice;
use crate::framebuffer::FramebufferManager;
use crate::readiness::{ReadyProbe, WarmUp};
use crate::stats::GpuStats;
use op_core::{Config, GpuBackend, GpuError};
use op_memory::GuestMemory;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Backend that owns one [`RenderDevice`] plus the depal cache and the
/// framebuffer manager built on top of it
pub struct DeviceBackend<D: RenderDevice> {
    kind: GpuBackend,
    device: D,
    depal: DepalShaderCache,
    framebuffers: FramebufferManager,
    context: Arc<dyn GraphicsContext>,
    warm_up: WarmUp,
    frame: u64,
    draws_skipped: u64,
    trace_frames: bool,
    shader_dump: Option<PathBuf>,
}

impl<D: RenderDevice> DeviceBackend<D> {
    pub(crate) fn new(
        kind: GpuBackend,
        mut device: D,
        context: Arc<dyn GraphicsContext>,
        memory: Arc<GuestMemory>,
        config: &Config,
        warm_up: WarmUp,
        stash: Option<Arc<DepalSourceStash>>,
    ) -> Result<Self, GpuError> {
        let language = device.caps().shader_language;
        let mut depal = DepalShaderCache::new(language);
        if let Some(stash) = stash {
            depal = depal.with_source_stash(stash);
        }

        let (width, height) = context.surface_size();
        let mut framebuffers = FramebufferManager::new(memory, language, width, height);
        framebuffers.device_restore(&mut device)?;

        tracing::info!(
            "{} backend ready on {} device ({:?}, {}x{})",
            kind.name(),
            device.name(),
            language,
            width,
            height
        );

        Ok(Self {
            kind,
            device,
            depal,
            framebuffers,
            context,
            warm_up,
            frame: 0,
            draws_skipped: 0,
            trace_frames: config.debug.trace_gpu,
            shader_dump: config.debug.dump_shaders.then(|| config.paths.shader_dump.clone()),
        })
    }

    pub fn device(&self) -> &D {
        &self.device
    }

    pub fn device_mut(&mut self) -> &mut D {
        &mut self.device
    }

    pub fn context(&self) -> &Arc<dyn GraphicsContext> {
        &self.context
    }

    fn dump_shaders(&self, dir: &Path) -> std::io::Result<usize> {
        let ids = self.depal.debug_get_shader_ids(DebugShaderType::Depal);
        if ids.is_empty() {
            return Ok(0);
        }
        std::fs::create_dir_all(dir)?;
        for id in &ids {
            let source = self
                .depal
                .debug_get_shader_string(id, DebugShaderType::Depal, DebugShaderStringType::SourceCode);
            std::fs::write(dir.join(format!("depal_{}.txt", id)), source)?;
        }
        Ok(ids.len())
    }
}

impl<D: RenderDevice> GpuInterface for DeviceBackend<D> {
    fn kind(&self) -> GpuBackend {
        self.kind
    }

    fn is_ready(&self) -> bool {
        self.warm_up.is_ready()
    }

    fn cancel_ready(&mut self) {
        self.warm_up.cancel();
    }

    fn ready_probe(&self) -> ReadyProbe {
        self.warm_up.probe()
    }

    fn begin_frame(&mut self) {
        self.depal.begin_frame(self.frame);
        self.framebuffers.begin_frame(self.frame);
    }

    fn end_frame(&mut self) {
        if let Err(e) = self.framebuffers.copy_display_to_output(&mut self.device) {
            tracing::warn!("Present failed at frame {}: {}", self.frame, e);
        }
        let textures = self.depal.decimate(&mut self.device);
        let fbos = self.framebuffers.decimate_fbos(&mut self.device);
        if self.trace_frames {
            tracing::debug!(
                "Frame {}: {} CLUT textures, {} framebuffers decimated",
                self.frame,
                textures,
                fbos
            );
        }
        self.frame += 1;
    }

    fn frame(&self) -> u64 {
        self.frame
    }

    fn device_lost(&mut self) {
        tracing::warn!("{} device lost at frame {}", self.device.name(), self.frame);
        self.depal.device_lost();
        self.framebuffers.device_lost();
    }

    fn device_restore(&mut self) -> Result<(), GpuError> {
        tracing::info!("Restoring {} device objects", self.device.name());
        self.framebuffers.device_restore(&mut self.device)
    }

    fn handle_event(&mut self, event: GraphicsEvent) {
        self.framebuffers.handle_event(&mut self.device, event);
    }

    fn resources(&mut self) -> Option<GpuResources<'_>> {
        Some(GpuResources {
            device: &mut self.device,
            depal: &mut self.depal,
            framebuffers: &mut self.framebuffers,
            draws_skipped: &mut self.draws_skipped,
        })
    }

    fn debug_get_shader_ids(&self, kind: DebugShaderType) -> Vec<String> {
        self.depal.debug_get_shader_ids(kind)
    }

    fn debug_get_shader_string(&self, id: &str, kind: DebugShaderType, string_type: DebugShaderStringType) -> String {
        self.depal.debug_get_shader_string(id, kind, string_type)
    }

    fn stats(&self) -> GpuStats {
        GpuStats::collect(self.frame, self.draws_skipped, self.depal.stats())
    }
}

impl<D: RenderDevice> Drop for DeviceBackend<D> {
    fn drop(&mut self) {
        if let Some(dir) = self.shader_dump.take() {
            match self.dump_shaders(&dir) {
                Ok(count) => tracing::info!("Dumped {} depal shaders to {}", count, dir.display()),
                Err(e) => tracing::warn!("Failed to dump shaders to {}: {}", dir.display(), e),
            }
        }
        self.depal.clear(&mut self.device);
        self.framebuffers.shutdown(&mut self.device);
        tracing::debug!("{} backend shut down after {} frames", self.kind.name(), self.frame);
    }
}
