//! Stencil reconstruction from guest color data
//!
//! The GE keeps stencil in the alpha bits of the color buffer. When the guest
//! writes a framebuffer through memory, the stencil plane of the matching
//! render target is rebuilt with one pass per used stencil bit.

use super::FramebufferManager;
use crate::device::{RenderDevice, StencilPass};
use crate::ge_constants::GeBufferFormat;
use op_core::GpuError;
use op_memory::mask_address;

bitflags::bitflags! {
    /// Options for [`FramebufferManager::notify_stencil_upload`]
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct StencilUploadFlags: u32 {
        /// Zero the stencil plane before the bit passes
        const NEEDS_CLEAR = 0x01;
        /// The stencil plane is known to be zero already
        const STENCIL_IS_ZERO = 0x02;
    }
}

fn or_words(data: &[u8]) -> u32 {
    data.chunks(4).fold(0, |acc, chunk| {
        let mut word = [0u8; 4];
        word[..chunk.len()].copy_from_slice(chunk);
        acc | u32::from_le_bytes(word)
    })
}

/// 1 when any 5551 pixel has its alpha bit set
pub fn stencil_bits_5551(data: &[u8]) -> u32 {
    u32::from(or_words(data) & 0x8000_8000 != 0)
}

/// Union of the alpha nibbles of 4444 pixels
pub fn stencil_bits_4444(data: &[u8]) -> u32 {
    let bits = or_words(data);
    ((bits >> 12) & 0xF) | (bits >> 28)
}

/// Union of the alpha bytes of 8888 pixels
pub fn stencil_bits_8888(data: &[u8]) -> u32 {
    or_words(data) >> 24
}

impl FramebufferManager {
    /// Rebuild the stencil plane of the framebuffer at `addr` from `size`
    /// bytes of guest color data.
    ///
    /// Returns `false` when there is no framebuffer at the address or its
    /// format carries no stencil.
    pub fn notify_stencil_upload(
        &mut self,
        device: &mut dyn RenderDevice,
        addr: u32,
        size: u32,
        flags: StencilUploadFlags,
    ) -> Result<bool, GpuError> {
        let addr = mask_address(addr);
        let Some(vfb) = self.vfb_at(addr) else {
            return Ok(false);
        };
        let Some(fbo) = vfb.fbo else {
            return Ok(false);
        };
        let (format, stride, buffer_width, buffer_height) =
            (vfb.format, vfb.fb_stride, vfb.buffer_width, vfb.buffer_height);

        let size = self.memory.valid_size(addr, size);
        let data = self.memory.read_bytes(addr, size).unwrap_or_default();
        let (used_bits, values) = match format {
            GeBufferFormat::Rgb565 => return Ok(false),
            GeBufferFormat::Rgba5551 => (stencil_bits_5551(&data), 2u32),
            GeBufferFormat::Rgba4444 => (stencil_bits_4444(&data), 16),
            GeBufferFormat::Rgba8888 => (stencil_bits_8888(&data), 256),
        };
        self.stats.stencil_uploads += 1;

        device.bind_render_target(Some(fbo))?;
        let result = self.run_stencil_passes(
            device,
            addr,
            size,
            stride,
            (buffer_width, buffer_height),
            format,
            used_bits,
            values,
            flags,
        );

        let previous = self.current_render.and_then(|id| self.vfbs.get(&id)).and_then(|v| v.fbo);
        device.bind_render_target(previous)?;
        result.map(|_| true)
    }

    #[allow(clippy::too_many_arguments)]
    fn run_stencil_passes(
        &mut self,
        device: &mut dyn RenderDevice,
        addr: u32,
        size: u32,
        stride: u32,
        buffer_size: (u32, u32),
        format: GeBufferFormat,
        used_bits: u32,
        values: u32,
        flags: StencilUploadFlags,
    ) -> Result<(), GpuError> {
        if used_bits == 0 {
            if !flags.contains(StencilUploadFlags::STENCIL_IS_ZERO) {
                device.clear(None, Some(0))?;
            }
            tracing::trace!("Stencil upload at {:08x} uses no bits", addr);
            return Ok(());
        }
        if flags.contains(StencilUploadFlags::NEEDS_CLEAR) {
            device.clear(None, Some(0))?;
        }

        let row_bytes = u64::from(stride.max(1)) * u64::from(format.bytes_per_pixel());
        let rows = (u64::from(size) / row_bytes).min(u64::from(buffer_size.1)) as u32;
        let width = stride.min(buffer_size.0);
        let Some(texture) = self.make_pixel_texture(device, addr, stride, width, rows, format)? else {
            return Ok(());
        };

        let mut passes = 0;
        let mut bit = 1u32;
        let mut result = Ok(());
        while bit < values {
            if used_bits & bit != 0 {
                let (write_mask, test_value) = match format {
                    GeBufferFormat::Rgba5551 => (0xFF, 0x80),
                    GeBufferFormat::Rgba4444 => ((bit | (bit << 4)) as u8, (bit * 16) as u8),
                    _ => (bit as u8, bit as u8),
                };
                result = device.stencil_pass(&StencilPass {
                    source: texture,
                    write_mask,
                    test_value,
                });
                if result.is_err() {
                    break;
                }
                passes += 1;
            }
            bit <<= 1;
        }
        device.release(texture.into());
        tracing::trace!("Stencil upload at {:08x}: {} passes", addr, passes);
        result
    }
}
