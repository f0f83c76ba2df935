//! Offscreen readback surfaces, temporary copy targets and readback to
//! guest memory

use super::{FramebufferManager, OffscreenSurface, TempFbo, VfbId};
use crate::device::{FramebufferDesc, FramebufferHandle, Rect, RenderDevice, SurfaceHandle};
use crate::ge_constants::GeBufferFormat;
use op_core::GpuError;

/// Pool key for a surface or temp target: `(format << 32) | (w << 16) | h`.
///
/// Sizes above 0xFFFF can not be keyed.
pub fn surface_key(format: GeBufferFormat, width: u32, height: u32) -> Option<u64> {
    if width > 0xFFFF || height > 0xFFFF {
        return None;
    }
    Some(((format as u64) << 32) | ((width as u64 & 0xFFFF) << 16) | (height as u64 & 0xFFFF))
}

fn key_or_err(format: GeBufferFormat, width: u32, height: u32) -> Result<u64, GpuError> {
    surface_key(format, width, height)
        .ok_or_else(|| GpuError::ResourceExhausted(format!("surface size {}x{} out of range", width, height)))
}

impl FramebufferManager {
    /// Readback surface of the given format and size, pooled by size
    pub fn get_offscreen_surface(
        &mut self,
        device: &mut dyn RenderDevice,
        format: GeBufferFormat,
        width: u32,
        height: u32,
    ) -> Result<SurfaceHandle, GpuError> {
        let key = key_or_err(format, width, height)?;
        let frame = self.current_frame;
        if let Some(entry) = self.offscreen_surfaces.get_mut(&key) {
            entry.last_frame_used = frame;
            return Ok(entry.surface);
        }

        let surface = device.create_offscreen_surface(width, height, format.into())?;
        tracing::trace!("Created offscreen surface {}x{} {:?}", width, height, format);
        self.offscreen_surfaces.insert(
            key,
            OffscreenSurface {
                surface,
                last_frame_used: frame,
            },
        );
        Ok(surface)
    }

    /// Scratch framebuffer for copies, pooled by format and size
    pub(crate) fn get_temp_fbo(
        &mut self,
        device: &mut dyn RenderDevice,
        format: GeBufferFormat,
        width: u32,
        height: u32,
    ) -> Result<FramebufferHandle, GpuError> {
        let key = key_or_err(format, width, height)?;
        let frame = self.current_frame;
        if let Some(entry) = self.temp_fbos.get_mut(&key) {
            entry.last_frame_used = frame;
            return Ok(entry.fbo);
        }

        let fbo = device.create_framebuffer(&FramebufferDesc {
            width,
            height,
            with_stencil: false,
            tag: "temp",
        })?;
        self.temp_fbos.insert(
            key,
            TempFbo {
                fbo,
                last_frame_used: frame,
            },
        );
        Ok(fbo)
    }

    /// Copy a rectangle of a framebuffer back into guest memory in its own
    /// pixel format. Rows whose guest address is unmapped are skipped.
    /// Returns the number of rows written.
    pub fn read_framebuffer_to_memory(
        &mut self,
        device: &mut dyn RenderDevice,
        id: VfbId,
        x: u32,
        y: u32,
        w: u32,
        h: u32,
    ) -> Result<u32, GpuError> {
        let vfb = self.vfbs.get(&id).ok_or(GpuError::InvalidHandle(id.0 as u64))?;
        let fbo = vfb.fbo.ok_or(GpuError::InvalidHandle(id.0 as u64))?;
        let (format, stride, address) = (vfb.format, vfb.fb_stride, vfb.fb_address);
        let rect = Rect::new(x, y, w, h).clip_to(vfb.buffer_width, vfb.buffer_height);
        if rect.is_empty() {
            return Ok(0);
        }

        let surface = self.get_offscreen_surface(device, format, rect.w, rect.h)?;
        let data = device.read_framebuffer(fbo, rect, surface)?;

        let bpp = format.bytes_per_pixel();
        let row_len = (rect.w * bpp) as usize;
        let mut written = 0;
        for (row, pixels) in data.chunks(row_len).enumerate() {
            let row_y = rect.y + row as u32;
            let dst = address as u64 + row_y as u64 * stride as u64 * bpp as u64 + rect.x as u64 * bpp as u64;
            let Ok(dst) = u32::try_from(dst) else {
                continue;
            };
            if !self.memory.is_valid_range(dst, pixels.len() as u32) {
                continue;
            }
            if self.memory.write_bytes(dst, pixels).is_ok() {
                written += 1;
            }
        }
        tracing::trace!("Read back {} rows of framebuffer {}", written, id);
        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::SoftwareDevice;
    use crate::framebuffer::RenderFramebufferParams;
    use crate::shader::ShaderLanguage;
    use op_core::ThreadPool;
    use op_memory::{GuestMemory, VRAM_BASE, VRAM_SIZE};
    use std::sync::Arc;

    fn setup() -> (SoftwareDevice, FramebufferManager) {
        let dev = SoftwareDevice::new(Arc::new(ThreadPool::new(1)), 480, 272);
        let fbm = FramebufferManager::new(GuestMemory::new(), ShaderLanguage::GlslEs300, 480, 272);
        (dev, fbm)
    }

    #[test]
    fn test_surface_key_packing() {
        assert_eq!(
            surface_key(GeBufferFormat::Rgba8888, 480, 272),
            Some((3u64 << 32) | (480 << 16) | 272)
        );
        assert_ne!(
            surface_key(GeBufferFormat::Rgb565, 480, 272),
            surface_key(GeBufferFormat::Rgba4444, 480, 272)
        );
        assert_eq!(surface_key(GeBufferFormat::Rgb565, 0x1_0000, 1), None);
    }

    #[test]
    fn test_offscreen_surfaces_are_pooled() {
        let (mut dev, mut fbm) = setup();
        let a = fbm.get_offscreen_surface(&mut dev, GeBufferFormat::Rgba8888, 480, 272).unwrap();
        let b = fbm.get_offscreen_surface(&mut dev, GeBufferFormat::Rgba8888, 480, 272).unwrap();
        let c = fbm.get_offscreen_surface(&mut dev, GeBufferFormat::Rgb565, 480, 272).unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(fbm.offscreen_surface_count(), 2);
        assert!(fbm
            .get_offscreen_surface(&mut dev, GeBufferFormat::Rgba8888, 70_000, 1)
            .is_err());
    }

    #[test]
    fn test_readback_writes_guest_rows() {
        let (mut dev, mut fbm) = setup();
        let id = fbm
            .set_render_framebuffer(
                &mut dev,
                RenderFramebufferParams {
                    fb_address: VRAM_BASE,
                    fb_stride: 16,
                    format: GeBufferFormat::Rgba8888,
                    width: 4,
                    height: 4,
                },
            )
            .unwrap();
        dev.clear(Some(0xAABB_CCDD), None).unwrap();

        assert_eq!(fbm.read_framebuffer_to_memory(&mut dev, id, 1, 1, 2, 2).unwrap(), 2);
        let memory = fbm.memory().clone();
        // Row 1, pixel 1 with a 16-pixel stride
        assert_eq!(memory.read::<u32>(VRAM_BASE + 16 * 4 + 4).unwrap(), 0xAABB_CCDD);
        assert_eq!(memory.read::<u32>(VRAM_BASE + 16 * 4).unwrap(), 0);
        assert_eq!(memory.read::<u32>(VRAM_BASE + 3 * 16 * 4 + 4).unwrap(), 0);
    }

    #[test]
    fn test_readback_skips_unmapped_rows() {
        let (mut dev, mut fbm) = setup();
        // The second row lands past the end of VRAM
        let addr = VRAM_BASE + VRAM_SIZE - 64;
        let id = fbm
            .set_render_framebuffer(
                &mut dev,
                RenderFramebufferParams {
                    fb_address: addr,
                    fb_stride: 16,
                    format: GeBufferFormat::Rgba8888,
                    width: 16,
                    height: 2,
                },
            )
            .unwrap();
        assert_eq!(fbm.read_framebuffer_to_memory(&mut dev, id, 0, 0, 16, 2).unwrap(), 1);
    }
}
