//! Virtual framebuffer manager
//!
//! Owns the render targets materialized from guest memory, the offscreen
//! readback surfaces, the temporary copy targets and the fixed 2D blit
//! program. At most one virtual framebuffer is the current render target.

mod offscreen;
mod stencil;

pub use offscreen::surface_key;
pub use stencil::{stencil_bits_4444, stencil_bits_5551, stencil_bits_8888, StencilUploadFlags};

use crate::cache::ResourceCache;
use crate::context::GraphicsEvent;
use crate::debug::{GpuDebugBuffer, GpuDebugBufferFormat};
use crate::device::{
    Aspect, FramebufferDesc, FramebufferHandle, QuadPass, Rect, RenderDevice, ShaderHandle,
    ShaderStage, SurfaceHandle, TextureHandle, VertexDeclHandle, VertexElement,
};
use crate::ge_constants::GeBufferFormat;
use crate::shader::{generate_blit_pixel_shader, generate_depal_vertex_shader, ShaderLanguage};
use op_core::GpuError;
use op_memory::{mask_address, GuestMemory};
use std::fmt;
use std::sync::Arc;

/// Frames a framebuffer, temp copy or offscreen surface may go unused
pub const FBO_OLD_AGE: u64 = 5;

/// Height of the displayed frame
pub const PSP_DISPLAY_HEIGHT: u32 = 272;

bitflags::bitflags! {
    /// How a framebuffer may be bound for sampling
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct BindFlags: u32 {
        /// Sample the render target itself even while it is bound for writing
        const FORCE_SELF = 0x01;
        /// A copy is acceptable (and preferred) when sampling the render target
        const MAY_COPY = 0x02;
    }
}

/// Virtual framebuffer key (the masked guest address)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VfbId(pub u32);

impl fmt::Display for VfbId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:08x}", self.0)
    }
}

/// Render target standing in for a region of guest memory
#[derive(Debug, Clone)]
pub struct VirtualFramebuffer {
    pub fb_address: u32,
    /// Row stride in pixels
    pub fb_stride: u32,
    pub format: GeBufferFormat,
    /// Size the guest draws at
    pub width: u32,
    pub height: u32,
    /// Allocated size of the backing target
    pub buffer_width: u32,
    pub buffer_height: u32,
    pub fbo: Option<FramebufferHandle>,
    pub last_frame_render: u64,
    pub last_frame_used: u64,
    pub last_frame_displayed: u64,
}

impl VirtualFramebuffer {
    pub fn id(&self) -> VfbId {
        VfbId(self.fb_address)
    }

    fn last_activity(&self) -> u64 {
        self.last_frame_render
            .max(self.last_frame_used)
            .max(self.last_frame_displayed)
    }
}

/// Guest render target state for [`FramebufferManager::set_render_framebuffer`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenderFramebufferParams {
    pub fb_address: u32,
    pub fb_stride: u32,
    pub format: GeBufferFormat,
    pub width: u32,
    pub height: u32,
}

/// Display register state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct DisplayState {
    address: u32,
    stride: u32,
    format: GeBufferFormat,
}

pub(crate) struct OffscreenSurface {
    pub(crate) surface: SurfaceHandle,
    pub(crate) last_frame_used: u64,
}

pub(crate) struct TempFbo {
    pub(crate) fbo: FramebufferHandle,
    pub(crate) last_frame_used: u64,
}

/// Fixed objects recreated after a device restore
#[derive(Default)]
struct BlitProgram {
    vertex_shader: Option<ShaderHandle>,
    pixel_shader: Option<ShaderHandle>,
    vertex_decl: Option<VertexDeclHandle>,
}

/// Counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FramebufferStats {
    pub created: u64,
    pub resized: u64,
    pub decimated: u64,
    pub self_copies: u64,
    pub stencil_uploads: u64,
}

/// Owner of every framebuffer-related device object
pub struct FramebufferManager {
    memory: Arc<GuestMemory>,
    language: ShaderLanguage,
    vfbs: ResourceCache<VfbId, VirtualFramebuffer>,
    current_render: Option<VfbId>,
    display: Option<DisplayState>,
    display_vfb: Option<VfbId>,
    prev_display_vfb: Option<VfbId>,
    pub(crate) offscreen_surfaces: ResourceCache<u64, OffscreenSurface>,
    pub(crate) temp_fbos: ResourceCache<u64, TempFbo>,
    blit: BlitProgram,
    output_size: (u32, u32),
    current_frame: u64,
    stats: FramebufferStats,
}

impl FramebufferManager {
    pub fn new(memory: Arc<GuestMemory>, language: ShaderLanguage, output_width: u32, output_height: u32) -> Self {
        Self {
            memory,
            language,
            vfbs: ResourceCache::new(),
            current_render: None,
            display: None,
            display_vfb: None,
            prev_display_vfb: None,
            offscreen_surfaces: ResourceCache::new(),
            temp_fbos: ResourceCache::new(),
            blit: BlitProgram::default(),
            output_size: (output_width, output_height),
            current_frame: 0,
            stats: FramebufferStats::default(),
        }
    }

    pub fn memory(&self) -> &Arc<GuestMemory> {
        &self.memory
    }

    pub fn begin_frame(&mut self, frame: u64) {
        self.current_frame = frame;
    }

    pub fn current_frame(&self) -> u64 {
        self.current_frame
    }

    pub fn stats(&self) -> FramebufferStats {
        self.stats
    }

    pub fn current_render_vfb(&self) -> Option<VfbId> {
        self.current_render
    }

    pub fn vfb(&self, id: VfbId) -> Option<&VirtualFramebuffer> {
        self.vfbs.get(&id)
    }

    /// Find the framebuffer at a guest address (any mirror)
    pub fn vfb_at(&self, addr: u32) -> Option<&VirtualFramebuffer> {
        self.vfbs.get(&VfbId(mask_address(addr)))
    }

    pub fn vfb_count(&self) -> usize {
        self.vfbs.len()
    }

    pub fn offscreen_surface_count(&self) -> usize {
        self.offscreen_surfaces.len()
    }

    pub fn temp_fbo_count(&self) -> usize {
        self.temp_fbos.len()
    }

    pub fn output_size(&self) -> (u32, u32) {
        self.output_size
    }

    pub fn has_blit_program(&self) -> bool {
        self.blit.vertex_shader.is_some() && self.blit.pixel_shader.is_some()
    }

    fn create_fbo(
        &mut self,
        device: &mut dyn RenderDevice,
        width: u32,
        height: u32,
        tag: &'static str,
    ) -> Result<FramebufferHandle, GpuError> {
        device
            .create_framebuffer(&FramebufferDesc {
                width,
                height,
                with_stencil: true,
                tag,
            })
            .map_err(|e| {
                tracing::warn!("Failed to create {}x{} framebuffer ({}): {}", width, height, tag, e);
                e
            })
    }

    /// Make the framebuffer at `params.fb_address` the current render target,
    /// creating, reformatting or growing it as needed.
    pub fn set_render_framebuffer(
        &mut self,
        device: &mut dyn RenderDevice,
        params: RenderFramebufferParams,
    ) -> Result<VfbId, GpuError> {
        let id = VfbId(mask_address(params.fb_address));
        let width = params.width.max(1);
        let height = params.height.max(1);
        let frame = self.current_frame;

        let existing = self
            .vfbs
            .get(&id)
            .map(|vfb| (vfb.format, vfb.buffer_width, vfb.buffer_height, vfb.fbo));

        let fbo = match existing {
            Some((format, buffer_width, buffer_height, Some(old_fbo))) => {
                let mut fbo = old_fbo;
                if width > buffer_width || height > buffer_height {
                    let new_width = width.max(buffer_width);
                    let new_height = height.max(buffer_height);
                    let new_fbo = self.create_fbo(device, new_width, new_height, "vfb")?;
                    if let Err(e) = device.copy_framebuffer(
                        old_fbo,
                        Rect::new(0, 0, buffer_width, buffer_height),
                        new_fbo,
                        0,
                        0,
                        Aspect::COLOR | Aspect::STENCIL,
                    ) {
                        device.release(new_fbo.into());
                        return Err(e);
                    }
                    device.release(old_fbo.into());
                    tracing::debug!(
                        "Resized framebuffer {} from {}x{} to {}x{}",
                        id,
                        buffer_width,
                        buffer_height,
                        new_width,
                        new_height
                    );
                    self.stats.resized += 1;
                    if let Some(vfb) = self.vfbs.get_mut(&id) {
                        vfb.buffer_width = new_width;
                        vfb.buffer_height = new_height;
                        vfb.fbo = Some(new_fbo);
                    }
                    fbo = new_fbo;
                }

                device.bind_render_target(Some(fbo))?;
                if format != params.format {
                    tracing::debug!(
                        "Framebuffer {} changed format {:?} -> {:?}",
                        id,
                        format,
                        params.format
                    );
                    device.clear(Some(0), Some(0))?;
                }
                fbo
            }
            // A record whose target was lost or never created gets a fresh one
            _ => {
                let fbo = self.create_fbo(device, width, height, "vfb")?;
                device.bind_render_target(Some(fbo))?;
                device.clear(Some(0), Some(0))?;
                tracing::debug!(
                    "Created framebuffer {} ({}x{}, {:?}, stride {})",
                    id,
                    width,
                    height,
                    params.format,
                    params.fb_stride
                );
                self.stats.created += 1;
                let previous = self.vfbs.insert(
                    id,
                    VirtualFramebuffer {
                        fb_address: id.0,
                        fb_stride: params.fb_stride,
                        format: params.format,
                        width,
                        height,
                        buffer_width: width,
                        buffer_height: height,
                        fbo: Some(fbo),
                        last_frame_render: frame,
                        last_frame_used: frame,
                        last_frame_displayed: 0,
                    },
                );
                if let Some(stale) = previous.and_then(|vfb| vfb.fbo) {
                    device.release(stale.into());
                }
                fbo
            }
        };

        if let Some(vfb) = self.vfbs.get_mut(&id) {
            vfb.fb_stride = params.fb_stride;
            vfb.format = params.format;
            vfb.width = width;
            vfb.height = height;
            vfb.fbo = Some(fbo);
            vfb.last_frame_render = frame;
        }
        self.current_render = Some(id);
        Ok(id)
    }

    /// Bind a rendered framebuffer as a texture source for a later draw.
    ///
    /// Sampling the current render target goes through a temporary copy
    /// unless the device can fetch from a bound target or the caller forces
    /// a self-bind.
    pub fn bind_framebuffer_as_color_texture(
        &mut self,
        device: &mut dyn RenderDevice,
        stage: u32,
        id: VfbId,
        flags: BindFlags,
    ) -> Result<(), GpuError> {
        let frame = self.current_frame;
        let vfb = self.vfbs.get_mut(&id).ok_or(GpuError::InvalidHandle(id.0 as u64))?;
        let fbo = vfb.fbo.ok_or(GpuError::InvalidHandle(id.0 as u64))?;
        vfb.last_frame_used = frame;
        let (format, width, height) = (vfb.format, vfb.buffer_width, vfb.buffer_height);

        let is_render_target = self.current_render == Some(id);
        let needs_copy = is_render_target
            && !flags.contains(BindFlags::FORCE_SELF)
            && (flags.contains(BindFlags::MAY_COPY) || !device.caps().framebuffer_fetch);

        if needs_copy {
            let temp = self.get_temp_fbo(device, format, width, height)?;
            device.copy_framebuffer(fbo, Rect::new(0, 0, width, height), temp, 0, 0, Aspect::COLOR)?;
            self.stats.self_copies += 1;
            tracing::trace!("Sampling framebuffer {} through a copy", id);
            device.bind_framebuffer_as_texture(stage, temp)
        } else {
            device.bind_framebuffer_as_texture(stage, fbo)
        }
    }

    /// Copy a rectangle between two framebuffers.
    ///
    /// Coordinates are in units of `bpp` bytes and are rescaled to each
    /// framebuffer's own pixel size. A rectangle whose guest memory is not
    /// fully mapped is skipped.
    #[allow(clippy::too_many_arguments)]
    pub fn blit_framebuffer(
        &mut self,
        device: &mut dyn RenderDevice,
        dst: VfbId,
        dst_x: u32,
        dst_y: u32,
        src: VfbId,
        src_x: u32,
        src_y: u32,
        w: u32,
        h: u32,
        bpp: u32,
    ) -> Result<(), GpuError> {
        if w == 0 || h == 0 || bpp == 0 {
            return Ok(());
        }
        let (Some(src_vfb), Some(dst_vfb)) = (self.vfbs.get(&src), self.vfbs.get(&dst)) else {
            return Ok(());
        };
        let (Some(src_fbo), Some(dst_fbo)) = (src_vfb.fbo, dst_vfb.fbo) else {
            return Ok(());
        };

        if !self.range_is_mapped(src_vfb, src_x, src_y, w, h, bpp)
            || !self.range_is_mapped(dst_vfb, dst_x, dst_y, w, h, bpp)
        {
            tracing::debug!("Skipping blit {} -> {}: guest range not mapped", src, dst);
            return Ok(());
        }

        let src_bpp = src_vfb.format.bytes_per_pixel();
        let dst_bpp = dst_vfb.format.bytes_per_pixel();
        let sx = (src_x as u64 * bpp as u64 / src_bpp as u64) as u32;
        let dx = (dst_x as u64 * bpp as u64 / dst_bpp as u64) as u32;
        let sw = (w as u64 * bpp as u64 / src_bpp as u64) as u32;
        let dw = (w as u64 * bpp as u64 / dst_bpp as u64) as u32;

        // Clip to both surfaces
        let src_rect = Rect::new(sx, src_y, sw, h).clip_to(src_vfb.buffer_width, src_vfb.buffer_height);
        let dst_rect = Rect::new(dx, dst_y, dw, h).clip_to(dst_vfb.buffer_width, dst_vfb.buffer_height);
        let rect = Rect::new(
            src_rect.x,
            src_rect.y,
            src_rect.w.min(dst_rect.w),
            src_rect.h.min(dst_rect.h),
        );
        if rect.is_empty() {
            return Ok(());
        }
        let src_format = src_vfb.format;
        let frame = self.current_frame;

        if src == dst {
            let temp = self.get_temp_fbo(device, src_format, rect.w, rect.h)?;
            device.copy_framebuffer(src_fbo, rect, temp, 0, 0, Aspect::COLOR)?;
            device.copy_framebuffer(temp, Rect::new(0, 0, rect.w, rect.h), dst_fbo, dst_rect.x, dst_rect.y, Aspect::COLOR)?;
            self.stats.self_copies += 1;
        } else {
            device.copy_framebuffer(src_fbo, rect, dst_fbo, dst_rect.x, dst_rect.y, Aspect::COLOR)?;
        }

        if let Some(vfb) = self.vfbs.get_mut(&src) {
            vfb.last_frame_used = frame;
        }
        if let Some(vfb) = self.vfbs.get_mut(&dst) {
            vfb.last_frame_render = frame;
        }
        Ok(())
    }

    fn range_is_mapped(&self, vfb: &VirtualFramebuffer, x: u32, y: u32, w: u32, h: u32, bpp: u32) -> bool {
        let row_bytes = vfb.fb_stride as u64 * vfb.format.bytes_per_pixel() as u64;
        let start = vfb.fb_address as u64 + y as u64 * row_bytes + x as u64 * bpp as u64;
        let size = (h as u64 - 1) * row_bytes + w as u64 * bpp as u64;
        match (u32::try_from(start), u32::try_from(size)) {
            (Ok(start), Ok(size)) => self.memory.is_valid_range(start, size),
            _ => false,
        }
    }

    /// Record the framebuffer the display controller scans out
    pub fn set_display_framebuffer(&mut self, addr: u32, stride: u32, format: GeBufferFormat) {
        let address = mask_address(addr);
        let changed = self.display.map(|d| d.address) != Some(address);
        self.display = Some(DisplayState {
            address,
            stride,
            format,
        });
        if changed {
            self.prev_display_vfb = self.display_vfb;
            self.display_vfb = self.vfbs.contains(&VfbId(address)).then_some(VfbId(address));
            tracing::trace!("Display framebuffer set to {:08x}", address);
        }
    }

    /// Present the display framebuffer on the host backbuffer
    pub fn copy_display_to_output(&mut self, device: &mut dyn RenderDevice) -> Result<(), GpuError> {
        let (out_w, out_h) = self.output_size;
        device.bind_render_target(None)?;
        device.clear(Some(0xFF00_0000), None)?;
        self.current_render = None;
        if out_w == 0 || out_h == 0 {
            return Ok(());
        }
        let Some(display) = self.display else {
            return Ok(());
        };

        let frame = self.current_frame;
        let program = self.blit.vertex_shader.zip(self.blit.pixel_shader);
        let vertex_decl = self.blit.vertex_decl;
        let dst = Rect::new(0, 0, out_w, out_h);
        let id = VfbId(display.address);

        if let Some(vfb) = self.vfbs.get_mut(&id) {
            if let Some(fbo) = vfb.fbo {
                vfb.last_frame_displayed = frame;
                let uv = [
                    0.0,
                    0.0,
                    vfb.width as f32 / vfb.buffer_width as f32,
                    vfb.height as f32 / vfb.buffer_height as f32,
                ];
                self.display_vfb = Some(id);
                device.bind_framebuffer_as_texture(0, fbo)?;
                return device.draw_textured_quad(&QuadPass {
                    program,
                    vertex_decl,
                    uv,
                    dst,
                });
            }
        }

        // No render target at the address: draw straight from guest memory
        let width = display.stride.min(512);
        let Some(texture) = self.make_pixel_texture(device, display.address, display.stride, width, PSP_DISPLAY_HEIGHT, display.format)? else {
            return Ok(());
        };
        let result = device.bind_texture(0, texture).and_then(|_| {
            device.draw_textured_quad(&QuadPass {
                program,
                vertex_decl,
                uv: [0.0, 0.0, 1.0, 1.0],
                dst,
            })
        });
        device.release(texture.into());
        result
    }

    /// Upload a rectangle of guest pixels as a texture. `Ok(None)` when the
    /// address is unmapped or the guest stride spans more than the address
    /// space.
    pub(crate) fn make_pixel_texture(
        &self,
        device: &mut dyn RenderDevice,
        addr: u32,
        stride: u32,
        width: u32,
        height: u32,
        format: GeBufferFormat,
    ) -> Result<Option<TextureHandle>, GpuError> {
        if stride == 0 || width == 0 || height == 0 {
            return Ok(None);
        }
        let bpp = u64::from(format.bytes_per_pixel());
        let row_bytes = u64::from(stride) * bpp;
        let packed_row = u64::from(width) * bpp;
        let sizes = (
            row_bytes.checked_mul(u64::from(height)).and_then(|n| u32::try_from(n).ok()),
            packed_row.checked_mul(u64::from(height)).and_then(|n| u32::try_from(n).ok()),
        );
        let (Some(byte_len), Some(packed_len)) = sizes else {
            tracing::warn!(
                "Skipping {}x{} pixel upload at {:08x}: stride {} out of range",
                width,
                height,
                addr,
                stride
            );
            return Ok(None);
        };
        let (row_bytes, packed_row) = (row_bytes as usize, packed_row as usize);

        let Some(packed) = self.memory.with_slice(addr, byte_len, |src| {
            // Drop the stride padding so rows are tightly packed
            let mut packed = Vec::with_capacity(packed_len as usize);
            for row in src.chunks(row_bytes).take(height as usize) {
                let take = row.len().min(packed_row);
                packed.extend_from_slice(&row[..take]);
                packed.resize(packed.len() + packed_row - take, 0);
            }
            packed.resize(packed_len as usize, 0);
            packed
        }) else {
            return Ok(None);
        };

        let texture = device.create_texture(width, height, format.into())?;
        if let Err(e) = device.update_texture(texture, &packed) {
            device.release(texture.into());
            return Err(e);
        }
        Ok(Some(texture))
    }

    /// Release framebuffers, temp copies and surfaces unused for more than
    /// [`FBO_OLD_AGE`] frames. The render target and the current and previous
    /// display framebuffers are kept.
    pub fn decimate_fbos(&mut self, device: &mut dyn RenderDevice) -> usize {
        let frame = self.current_frame;
        let keep = [self.current_render, self.display_vfb, self.prev_display_vfb];

        let vfbs = self
            .vfbs
            .evict_if(|id, vfb| !keep.contains(&Some(*id)) && vfb.last_activity() + FBO_OLD_AGE < frame);
        for vfb in &vfbs {
            tracing::debug!("Decimating framebuffer {:08x}", vfb.fb_address);
            if let Some(fbo) = vfb.fbo {
                device.release(fbo.into());
            }
        }

        let temps = self
            .temp_fbos
            .evict_if(|_, temp| temp.last_frame_used + FBO_OLD_AGE < frame);
        for temp in &temps {
            device.release(temp.fbo.into());
        }

        let surfaces = self
            .offscreen_surfaces
            .evict_if(|_, surface| surface.last_frame_used + FBO_OLD_AGE < frame);
        for surface in &surfaces {
            device.release(surface.surface.into());
        }

        let total = vfbs.len() + temps.len() + surfaces.len();
        self.stats.decimated += total as u64;
        total
    }

    /// Release every framebuffer-related object
    pub fn destroy_all_fbos(&mut self, device: &mut dyn RenderDevice) {
        for vfb in self.vfbs.drain() {
            if let Some(fbo) = vfb.fbo {
                device.release(fbo.into());
            }
        }
        for temp in self.temp_fbos.drain() {
            device.release(temp.fbo.into());
        }
        for surface in self.offscreen_surfaces.drain() {
            device.release(surface.surface.into());
        }
        self.current_render = None;
        self.display_vfb = None;
        self.prev_display_vfb = None;
        if device.bind_render_target(None).is_err() {
            tracing::trace!("Backbuffer rebind failed while destroying framebuffers");
        }
    }

    /// Release everything, including the blit program
    pub fn shutdown(&mut self, device: &mut dyn RenderDevice) {
        self.destroy_all_fbos(device);
        let blit = std::mem::take(&mut self.blit);
        for shader in [blit.vertex_shader, blit.pixel_shader].into_iter().flatten() {
            device.release(shader.into());
        }
        if let Some(decl) = blit.vertex_decl {
            device.release(decl.into());
        }
    }

    /// Forget every device handle without releasing it
    pub fn device_lost(&mut self) {
        let vfbs = self.vfbs.forget_all();
        let temps = self.temp_fbos.forget_all();
        let surfaces = self.offscreen_surfaces.forget_all();
        self.blit = BlitProgram::default();
        self.current_render = None;
        self.display_vfb = None;
        self.prev_display_vfb = None;
        tracing::info!(
            "Framebuffer manager dropped {} framebuffers, {} temp copies, {} surfaces after device loss",
            vfbs,
            temps,
            surfaces
        );
    }

    /// Recreate the fixed objects needed before any draw.
    ///
    /// A device that can not compile the blit program falls back to its
    /// built-in copy when presenting.
    pub fn device_restore(&mut self, device: &mut dyn RenderDevice) -> Result<(), GpuError> {
        let old = std::mem::take(&mut self.blit);
        for shader in [old.vertex_shader, old.pixel_shader].into_iter().flatten() {
            device.release(shader.into());
        }
        if let Some(decl) = old.vertex_decl {
            device.release(decl.into());
        }

        let vertex_decl = device.create_vertex_decl(&[
            VertexElement::Position { components: 3 },
            VertexElement::TexCoord0,
        ])?;

        let vs = device.compile_shader(ShaderStage::Vertex, &generate_depal_vertex_shader(self.language));
        let ps = device.compile_shader(ShaderStage::Fragment, &generate_blit_pixel_shader(self.language));
        let (vertex_shader, pixel_shader) = match (vs, ps) {
            (Ok(vs), Ok(ps)) => (Some(vs), Some(ps)),
            (vs, ps) => {
                for shader in [vs.as_ref().ok(), ps.as_ref().ok()].into_iter().flatten() {
                    device.release((*shader).into());
                }
                let err = vs.err().or(ps.err());
                tracing::warn!(
                    "2D blit program unavailable on {} ({}), using device copy",
                    device.name(),
                    err.map(|e| e.to_string()).unwrap_or_default()
                );
                (None, None)
            }
        };

        self.blit = BlitProgram {
            vertex_shader,
            pixel_shader,
            vertex_decl: Some(vertex_decl),
        };
        Ok(())
    }

    /// React to backbuffer changes from the host
    pub fn handle_event(&mut self, device: &mut dyn RenderDevice, event: GraphicsEvent) {
        match event {
            GraphicsEvent::GotBackbuffer { width, height } => {
                tracing::debug!("Got backbuffer {}x{}", width, height);
                device.resize_backbuffer(width, height);
                self.output_size = (width, height);
            }
            GraphicsEvent::LostBackbuffer => {
                tracing::debug!("Lost backbuffer");
                self.output_size = (0, 0);
            }
        }
    }

    /// Snapshot the color plane of the framebuffer at `addr`
    pub fn get_framebuffer_debug(&mut self, device: &mut dyn RenderDevice, addr: u32) -> Option<GpuDebugBuffer> {
        let vfb = self.vfb_at(addr)?;
        let (fbo, width, height) = (vfb.fbo?, vfb.buffer_width, vfb.buffer_height);
        let surface = self
            .get_offscreen_surface(device, GeBufferFormat::Rgba8888, width, height)
            .ok()?;
        match device.read_framebuffer(fbo, Rect::new(0, 0, width, height), surface) {
            Ok(data) => Some(GpuDebugBuffer {
                width,
                height,
                format: GpuDebugBufferFormat::Rgba8888,
                data,
            }),
            Err(e) => {
                tracing::warn!("Framebuffer debug readback failed: {}", e);
                None
            }
        }
    }

    /// Snapshot the stencil plane of the framebuffer at `addr`
    pub fn get_stencilbuffer_debug(&mut self, device: &mut dyn RenderDevice, addr: u32) -> Option<GpuDebugBuffer> {
        let vfb = self.vfb_at(addr)?;
        let (fbo, width, height) = (vfb.fbo?, vfb.buffer_width, vfb.buffer_height);
        match device.read_stencil(fbo) {
            Ok(data) => Some(GpuDebugBuffer {
                width,
                height,
                format: GpuDebugBufferFormat::Stencil8,
                data,
            }),
            Err(e) => {
                tracing::warn!("Stencil debug readback failed: {}", e);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::software::BoundTexture;
    use crate::device::{DataFormat, SoftwareDevice};
    use op_core::ThreadPool;
    use op_memory::VRAM_BASE;

    fn setup() -> (SoftwareDevice, FramebufferManager) {
        let mut device = SoftwareDevice::new(Arc::new(ThreadPool::new(1)), 480, 272);
        let mut manager = FramebufferManager::new(GuestMemory::new(), ShaderLanguage::GlslEs300, 480, 272);
        manager.device_restore(&mut device).unwrap();
        (device, manager)
    }

    fn params(addr: u32, format: GeBufferFormat, width: u32, height: u32) -> RenderFramebufferParams {
        RenderFramebufferParams {
            fb_address: addr,
            fb_stride: 512,
            format,
            width,
            height,
        }
    }

    #[test]
    fn test_single_current_render_target() {
        let (mut dev, mut fbm) = setup();
        let a = fbm
            .set_render_framebuffer(&mut dev, params(VRAM_BASE, GeBufferFormat::Rgba8888, 480, 272))
            .unwrap();
        let b = fbm
            .set_render_framebuffer(&mut dev, params(VRAM_BASE + 0x88000, GeBufferFormat::Rgba8888, 480, 272))
            .unwrap();
        assert_ne!(a, b);
        assert_eq!(fbm.current_render_vfb(), Some(b));
        assert_eq!(dev.render_target(), fbm.vfb(b).and_then(|v| v.fbo));
        assert_eq!(fbm.vfb_count(), 2);
    }

    #[test]
    fn test_uncached_mirror_maps_to_same_vfb() {
        let (mut dev, mut fbm) = setup();
        let a = fbm
            .set_render_framebuffer(&mut dev, params(VRAM_BASE, GeBufferFormat::Rgb565, 480, 272))
            .unwrap();
        let b = fbm
            .set_render_framebuffer(&mut dev, params(0x4000_0000 | VRAM_BASE, GeBufferFormat::Rgb565, 480, 272))
            .unwrap();
        assert_eq!(a, b);
        assert_eq!(fbm.vfb_count(), 1);
    }

    #[test]
    fn test_growing_keeps_contents() {
        let (mut dev, mut fbm) = setup();
        let id = fbm
            .set_render_framebuffer(&mut dev, params(VRAM_BASE, GeBufferFormat::Rgba8888, 16, 16))
            .unwrap();
        dev.clear(Some(0xFF11_2233), None).unwrap();
        fbm.set_render_framebuffer(&mut dev, params(VRAM_BASE, GeBufferFormat::Rgba8888, 32, 8))
            .unwrap();

        let vfb = fbm.vfb(id).unwrap();
        assert_eq!((vfb.buffer_width, vfb.buffer_height), (32, 16));
        let debug = fbm.get_framebuffer_debug(&mut dev, VRAM_BASE).unwrap();
        assert_eq!(debug.pixel(0, 0), Some(0xFF11_2233));
        assert_eq!(debug.pixel(31, 0), Some(0));
        assert_eq!(fbm.stats().resized, 1);
    }

    #[test]
    fn test_bind_render_target_as_texture_copies() {
        let (mut dev, mut fbm) = setup();
        let id = fbm
            .set_render_framebuffer(&mut dev, params(VRAM_BASE, GeBufferFormat::Rgba8888, 64, 64))
            .unwrap();
        let fbo = fbm.vfb(id).unwrap().fbo.unwrap();

        fbm.bind_framebuffer_as_color_texture(&mut dev, 0, id, BindFlags::empty())
            .unwrap();
        assert_ne!(dev.bound_texture(0), Some(BoundTexture::Framebuffer(fbo)));
        assert_eq!(fbm.temp_fbo_count(), 1);

        fbm.bind_framebuffer_as_color_texture(&mut dev, 0, id, BindFlags::FORCE_SELF)
            .unwrap();
        assert_eq!(dev.bound_texture(0), Some(BoundTexture::Framebuffer(fbo)));
    }

    #[test]
    fn test_bind_with_framebuffer_fetch_is_direct() {
        let (mut dev, mut fbm) = setup();
        dev.set_framebuffer_fetch(true);
        let id = fbm
            .set_render_framebuffer(&mut dev, params(VRAM_BASE, GeBufferFormat::Rgba8888, 64, 64))
            .unwrap();
        let fbo = fbm.vfb(id).unwrap().fbo.unwrap();

        fbm.bind_framebuffer_as_color_texture(&mut dev, 0, id, BindFlags::empty())
            .unwrap();
        assert_eq!(dev.bound_texture(0), Some(BoundTexture::Framebuffer(fbo)));

        fbm.bind_framebuffer_as_color_texture(&mut dev, 0, id, BindFlags::MAY_COPY)
            .unwrap();
        assert_ne!(dev.bound_texture(0), Some(BoundTexture::Framebuffer(fbo)));
    }

    #[test]
    fn test_blit_unmapped_range_is_noop() {
        let (mut dev, mut fbm) = setup();
        // Ends past the top of VRAM
        let near_end = VRAM_BASE + 0x1F_F000;
        let src = fbm
            .set_render_framebuffer(&mut dev, params(near_end, GeBufferFormat::Rgba8888, 64, 64))
            .unwrap();
        let dst = fbm
            .set_render_framebuffer(&mut dev, params(VRAM_BASE, GeBufferFormat::Rgba8888, 64, 64))
            .unwrap();
        fbm.bind_render_target_clear(&mut dev, src, 0xFFFF_FFFF);

        fbm.blit_framebuffer(&mut dev, dst, 0, 0, src, 0, 0, 64, 64, 4).unwrap();
        let debug = fbm.get_framebuffer_debug(&mut dev, VRAM_BASE).unwrap();
        assert_eq!(debug.pixel(0, 0), Some(0));
    }

    #[test]
    fn test_self_blit_goes_through_temp() {
        let (mut dev, mut fbm) = setup();
        let id = fbm
            .set_render_framebuffer(&mut dev, params(VRAM_BASE, GeBufferFormat::Rgba8888, 8, 8))
            .unwrap();
        let fbo = fbm.vfb(id).unwrap().fbo.unwrap();
        let row: Vec<u8> = (1u32..=8).flat_map(|p| p.to_le_bytes()).collect();
        dev.write_framebuffer_pixels(fbo, Rect::new(0, 0, 8, 1), DataFormat::Rgba8888, &row)
            .unwrap();

        // Shift the first row right by two pixels (bpp 4 = one 8888 pixel)
        fbm.blit_framebuffer(&mut dev, id, 2, 0, id, 0, 0, 6, 1, 4).unwrap();
        let debug = fbm.get_framebuffer_debug(&mut dev, VRAM_BASE).unwrap();
        let px: Vec<u32> = (0..8).filter_map(|x| debug.pixel(x, 0)).collect();
        assert_eq!(px, vec![1, 2, 1, 2, 3, 4, 5, 6]);
        assert_eq!(fbm.stats().self_copies, 1);
    }

    #[test]
    fn test_blit_rescales_by_bpp() {
        let (mut dev, mut fbm) = setup();
        let src = fbm
            .set_render_framebuffer(&mut dev, params(VRAM_BASE, GeBufferFormat::Rgb565, 8, 1))
            .unwrap();
        let fbo = fbm.vfb(src).unwrap().fbo.unwrap();
        let row: Vec<u8> = (1u32..=8).flat_map(|p| (0xFF00_0000 | p).to_le_bytes()).collect();
        dev.write_framebuffer_pixels(fbo, Rect::new(0, 0, 8, 1), DataFormat::Rgba8888, &row)
            .unwrap();
        let dst = fbm
            .set_render_framebuffer(&mut dev, params(VRAM_BASE + 0x10000, GeBufferFormat::Rgb565, 8, 1))
            .unwrap();

        // 4 units of 4 bytes are 8 pixels of a 16-bit format
        fbm.blit_framebuffer(&mut dev, dst, 0, 0, src, 0, 0, 4, 1, 4).unwrap();
        let debug = fbm.get_framebuffer_debug(&mut dev, VRAM_BASE + 0x10000).unwrap();
        assert_eq!(debug.pixel(7, 0), Some(0xFF00_0008));
    }

    #[test]
    fn test_decimation_spares_render_and_display() {
        let (mut dev, mut fbm) = setup();
        let old = fbm
            .set_render_framebuffer(&mut dev, params(VRAM_BASE + 0x44000, GeBufferFormat::Rgba8888, 16, 16))
            .unwrap();
        let shown = fbm
            .set_render_framebuffer(&mut dev, params(VRAM_BASE, GeBufferFormat::Rgba8888, 16, 16))
            .unwrap();
        fbm.set_display_framebuffer(VRAM_BASE, 512, GeBufferFormat::Rgba8888);
        let current = fbm
            .set_render_framebuffer(&mut dev, params(VRAM_BASE + 0x88000, GeBufferFormat::Rgba8888, 16, 16))
            .unwrap();

        fbm.begin_frame(FBO_OLD_AGE + 1);
        assert_eq!(fbm.decimate_fbos(&mut dev), 1);
        assert!(fbm.vfb(old).is_none());
        assert!(fbm.vfb(shown).is_some());
        assert!(fbm.vfb(current).is_some());
    }

    #[test]
    fn test_present_draws_display_framebuffer() {
        let (mut dev, mut fbm) = setup();
        fbm.set_render_framebuffer(&mut dev, params(VRAM_BASE, GeBufferFormat::Rgba8888, 480, 272))
            .unwrap();
        dev.clear(Some(0xFF00_FF00), None).unwrap();
        fbm.set_display_framebuffer(VRAM_BASE, 512, GeBufferFormat::Rgba8888);
        fbm.copy_display_to_output(&mut dev).unwrap();

        assert_eq!(dev.render_target(), None);
        assert_eq!(fbm.current_render_vfb(), None);
        assert!(dev.backbuffer_pixels().iter().all(|&p| p == 0xFF00_FF00));
    }

    #[test]
    fn test_present_from_memory_without_vfb() {
        let (mut dev, mut fbm) = setup();
        let memory = fbm.memory().clone();
        let addr = VRAM_BASE + 0x10_0000;
        memory.fill(addr, 0xFF, 512 * 272 * 4).unwrap();
        fbm.set_display_framebuffer(addr, 512, GeBufferFormat::Rgba8888);
        let releases = dev.counters().releases;
        fbm.copy_display_to_output(&mut dev).unwrap();
        assert!(dev.backbuffer_pixels().iter().all(|&p| p == 0xFFFF_FFFF));
        assert_eq!(dev.counters().releases, releases + 1);
        assert_eq!(fbm.vfb_count(), 0);
    }

    #[test]
    fn test_device_lost_then_restore() {
        let (mut dev, mut fbm) = setup();
        fbm.set_render_framebuffer(&mut dev, params(VRAM_BASE, GeBufferFormat::Rgba8888, 16, 16))
            .unwrap();
        fbm.get_offscreen_surface(&mut dev, GeBufferFormat::Rgba8888, 16, 16)
            .unwrap();
        let releases = dev.counters().releases;

        dev.lose_device();
        fbm.device_lost();
        assert_eq!(dev.counters().releases, releases);
        assert_eq!(fbm.vfb_count(), 0);
        assert_eq!(fbm.offscreen_surface_count(), 0);
        assert!(!fbm.has_blit_program());

        dev.restore();
        fbm.device_restore(&mut dev).unwrap();
        assert!(fbm.has_blit_program());
        assert!(fbm
            .set_render_framebuffer(&mut dev, params(VRAM_BASE, GeBufferFormat::Rgba8888, 16, 16))
            .is_ok());
    }

    #[test]
    fn test_backbuffer_events() {
        let (mut dev, mut fbm) = setup();
        fbm.handle_event(&mut dev, GraphicsEvent::GotBackbuffer { width: 960, height: 544 });
        assert_eq!(fbm.output_size(), (960, 544));
        assert_eq!(dev.backbuffer_size(), (960, 544));
        fbm.handle_event(&mut dev, GraphicsEvent::LostBackbuffer);
        assert_eq!(fbm.output_size(), (0, 0));
        assert!(fbm.copy_display_to_output(&mut dev).is_ok());
    }

    #[test]
    fn test_blit_clips_to_both_targets() {
        let (mut dev, mut fbm) = setup();
        let src = fbm
            .set_render_framebuffer(&mut dev, params(VRAM_BASE, GeBufferFormat::Rgba8888, 64, 64))
            .unwrap();
        fbm.bind_render_target_clear(&mut dev, src, 0xFF11_2233);
        let dst = fbm
            .set_render_framebuffer(&mut dev, params(VRAM_BASE + 0x8_0000, GeBufferFormat::Rgba8888, 16, 16))
            .unwrap();

        // Destination overhang: only the 6x6 corner at (10, 10) fits
        fbm.blit_framebuffer(&mut dev, dst, 10, 10, src, 0, 0, 64, 64, 4).unwrap();
        let debug = fbm.get_framebuffer_debug(&mut dev, VRAM_BASE + 0x8_0000).unwrap();
        assert_eq!(debug.pixel(10, 10), Some(0xFF11_2233));
        assert_eq!(debug.pixel(15, 15), Some(0xFF11_2233));
        assert_eq!(debug.pixel(9, 10), Some(0));
        assert_eq!(debug.pixel(10, 9), Some(0));
        assert_eq!(debug.pixel(0, 0), Some(0));

        // Source overhang: only the 4x4 block left of (60, 60) is copied
        let other = fbm
            .set_render_framebuffer(&mut dev, params(VRAM_BASE + 0x10_0000, GeBufferFormat::Rgba8888, 16, 16))
            .unwrap();
        fbm.blit_framebuffer(&mut dev, other, 0, 0, src, 60, 60, 16, 16, 4).unwrap();
        let debug = fbm.get_framebuffer_debug(&mut dev, VRAM_BASE + 0x10_0000).unwrap();
        assert_eq!(debug.pixel(0, 0), Some(0xFF11_2233));
        assert_eq!(debug.pixel(3, 3), Some(0xFF11_2233));
        assert_eq!(debug.pixel(4, 0), Some(0));
        assert_eq!(debug.pixel(0, 4), Some(0));
        assert_eq!(debug.pixel(15, 15), Some(0));
    }

    #[test]
    fn test_present_with_huge_stride_is_skipped() {
        let (mut dev, mut fbm) = setup();
        for stride in [0x4000_0000, u32::MAX] {
            fbm.set_display_framebuffer(VRAM_BASE, stride, GeBufferFormat::Rgba8888);
            let releases = dev.counters().releases;
            assert!(fbm.copy_display_to_output(&mut dev).is_ok());
            assert_eq!(dev.counters().releases, releases);
        }
    }

    #[test]
    fn test_failed_resize_releases_new_framebuffer() {
        let (mut dev, mut fbm) = setup();
        let id = fbm
            .set_render_framebuffer(&mut dev, params(VRAM_BASE, GeBufferFormat::Rgba8888, 16, 16))
            .unwrap();
        // A stale handle makes the copy into the grown buffer fail
        let stale = fbm.vfb(id).and_then(|v| v.fbo).unwrap();
        dev.release(stale.into());
        let live = dev.live_objects();

        let result = fbm.set_render_framebuffer(&mut dev, params(VRAM_BASE, GeBufferFormat::Rgba8888, 32, 32));
        assert!(result.is_err());
        assert_eq!(dev.live_objects(), live);
        assert_eq!(fbm.stats().resized, 0);
    }

    impl FramebufferManager {
        fn bind_render_target_clear(&mut self, dev: &mut SoftwareDevice, id: VfbId, color: u32) {
            let fbo = self.vfb(id).and_then(|v| v.fbo).unwrap();
            dev.bind_render_target(Some(fbo)).unwrap();
            dev.clear(Some(color), None).unwrap();
        }
    }
}
