//! GPU backends
//!
//! Exactly one backend is live at a time; [`create_backend`] picks it from
//! the configured selector and probes whether this build and host can
//! provide it.

mod common;
pub mod null;
pub mod software;
pub mod vulkan;

pub use common::DeviceBackend;
pub use null::NullGpu;

use crate::context::{GraphicsContext, GraphicsEvent};
use crate::debug::{DebugShaderStringType, DebugShaderType};
use crate::depal::DepalShaderCache;
use crate::device::{RenderDevice, ShaderHandle, TextureHandle};
use crate::framebuffer::FramebufferManager;
use crate::ge_constants::{GePaletteFormat, PixelFormat};
use crate::readiness::ReadyProbe;
use crate::stats::GpuStats;
use op_core::{Config, GpuBackend, GpuError};
use op_memory::GuestMemory;
use std::sync::Arc;

/// Interface every backend implements
pub trait GpuInterface: Send {
    fn kind(&self) -> GpuBackend;

    /// Non-blocking poll of the asynchronous warm-up
    fn is_ready(&self) -> bool;

    /// Ask the warm-up to stop early. It still ends up ready.
    fn cancel_ready(&mut self);

    /// Readiness view that can be polled from another thread
    fn ready_probe(&self) -> ReadyProbe;

    fn begin_frame(&mut self);

    /// Present, decimate the caches and advance the frame counter
    fn end_frame(&mut self);

    /// Current frame number
    fn frame(&self) -> u64;

    /// Forget every device object without releasing it
    fn device_lost(&mut self);

    /// Recreate the fixed objects after a device loss
    fn device_restore(&mut self) -> Result<(), GpuError>;

    fn handle_event(&mut self, event: GraphicsEvent);

    /// Borrowed view over the device and caches; `None` when the backend
    /// renders nothing.
    fn resources(&mut self) -> Option<GpuResources<'_>>;

    fn debug_get_shader_ids(&self, kind: DebugShaderType) -> Vec<String>;

    fn debug_get_shader_string(&self, id: &str, kind: DebugShaderType, string_type: DebugShaderStringType) -> String;

    fn stats(&self) -> GpuStats;
}

/// Mutable view over a backend's device and caches
pub struct GpuResources<'a> {
    pub device: &'a mut dyn RenderDevice,
    pub depal: &'a mut DepalShaderCache,
    pub framebuffers: &'a mut FramebufferManager,
    pub(crate) draws_skipped: &'a mut u64,
}

impl GpuResources<'_> {
    /// Depalettize shader for the current CLUT mode, or `None` when the draw
    /// should sample the texture directly.
    pub fn depalettize_shader(&mut self, clut_mode: u32, pixel_format: PixelFormat) -> Option<ShaderHandle> {
        self.depal
            .get_depalettize_shader(self.device, clut_mode, pixel_format)
            .ok()
    }

    /// Upload (or reuse) and bind the CLUT texture. `None` means the draw
    /// must be skipped this frame.
    pub fn clut_texture(&mut self, format: GePaletteFormat, clut_hash: u32, raw: &[u8]) -> Option<TextureHandle> {
        match self.depal.get_clut_texture(self.device, format, clut_hash, raw) {
            Ok(texture) => Some(texture),
            Err(e) => {
                tracing::warn!("Skipping draw, CLUT texture unavailable: {}", e);
                self.skip_draw();
                None
            }
        }
    }

    /// Record a draw dropped for lack of a resource
    pub fn skip_draw(&mut self) {
        *self.draws_skipped += 1;
    }

    /// Release every depalettize shader and CLUT texture
    pub fn clear_depal_cache(&mut self) {
        self.depal.clear(self.device);
    }
}

/// Build the backend selected by `kind`.
///
/// Backends other than Null need a host context. Backends this build does
/// not provide report [`GpuError::BackendUnavailable`].
pub fn create_backend(
    kind: GpuBackend,
    context: Option<Arc<dyn GraphicsContext>>,
    memory: Arc<GuestMemory>,
    config: &Config,
) -> Result<Box<dyn GpuInterface>, GpuError> {
    if kind.requires_context() && context.is_none() {
        return Err(GpuError::MissingContext(kind));
    }

    match (kind, context) {
        (GpuBackend::Null, _) => Ok(Box::new(NullGpu::new())),
        (GpuBackend::Software, Some(context)) => software::create(context, memory, config),
        (GpuBackend::Vulkan, Some(context)) => vulkan::create(context, memory, config),
        (GpuBackend::Gles | GpuBackend::DirectX9 | GpuBackend::DirectX11 | GpuBackend::Gx2, _) => {
            tracing::error!("{} backend is not available in this build", kind.name());
            Err(GpuError::BackendUnavailable(kind))
        }
        (other, None) => Err(GpuError::MissingContext(other)),
    }
}
