//! Pixel format conversion
//!
//! Devices keep color as packed RGBA8 words (`r | g << 8 | b << 16 | a << 24`,
//! the little-endian layout of the GE 8888 format). 16-bit GE formats store
//! red in the low bits.

use super::DataFormat;
use crate::ge_constants::{GeBufferFormat, GePaletteFormat};

impl From<GeBufferFormat> for DataFormat {
    fn from(format: GeBufferFormat) -> Self {
        match format {
            GeBufferFormat::Rgb565 => Self::Rgb565,
            GeBufferFormat::Rgba5551 => Self::Rgba5551,
            GeBufferFormat::Rgba4444 => Self::Rgba4444,
            GeBufferFormat::Rgba8888 => Self::Rgba8888,
        }
    }
}

impl From<GePaletteFormat> for DataFormat {
    fn from(format: GePaletteFormat) -> Self {
        match format {
            GePaletteFormat::Bgr5650 => Self::Rgb565,
            GePaletteFormat::Abgr5551 => Self::Rgba5551,
            GePaletteFormat::Abgr4444 => Self::Rgba4444,
            GePaletteFormat::Abgr8888 => Self::Rgba8888,
        }
    }
}

#[inline]
pub fn pack_rgba(r: u32, g: u32, b: u32, a: u32) -> u32 {
    r | (g << 8) | (b << 16) | (a << 24)
}

#[inline]
fn expand5(v: u32) -> u32 {
    (v << 3) | (v >> 2)
}

#[inline]
fn expand6(v: u32) -> u32 {
    (v << 2) | (v >> 4)
}

/// Decode one pixel of `format` into RGBA8
#[inline]
pub fn decode_pixel(format: DataFormat, bytes: &[u8]) -> u32 {
    match format {
        DataFormat::Rgba8888 => u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]),
        DataFormat::R8 => pack_rgba(bytes[0] as u32, 0, 0, 0xFF),
        DataFormat::R8G8 => pack_rgba(bytes[0] as u32, bytes[1] as u32, 0, 0xFF),
        DataFormat::Rgb565 => {
            let v = u16::from_le_bytes([bytes[0], bytes[1]]) as u32;
            pack_rgba(expand5(v & 0x1F), expand6((v >> 5) & 0x3F), expand5(v >> 11), 0xFF)
        }
        DataFormat::Rgba5551 => {
            let v = u16::from_le_bytes([bytes[0], bytes[1]]) as u32;
            pack_rgba(
                expand5(v & 0x1F),
                expand5((v >> 5) & 0x1F),
                expand5((v >> 10) & 0x1F),
                if v & 0x8000 != 0 { 0xFF } else { 0 },
            )
        }
        DataFormat::Rgba4444 => {
            let v = u16::from_le_bytes([bytes[0], bytes[1]]) as u32;
            pack_rgba(
                (v & 0xF) * 17,
                ((v >> 4) & 0xF) * 17,
                ((v >> 8) & 0xF) * 17,
                ((v >> 12) & 0xF) * 17,
            )
        }
    }
}

/// Encode one RGBA8 pixel into `out` (exactly `bytes_per_pixel` long)
#[inline]
pub fn encode_pixel(format: DataFormat, rgba: u32, out: &mut [u8]) {
    let r = rgba & 0xFF;
    let g = (rgba >> 8) & 0xFF;
    let b = (rgba >> 16) & 0xFF;
    let a = rgba >> 24;
    match format {
        DataFormat::Rgba8888 => out.copy_from_slice(&rgba.to_le_bytes()),
        DataFormat::R8 => out[0] = r as u8,
        DataFormat::R8G8 => {
            out[0] = r as u8;
            out[1] = g as u8;
        }
        DataFormat::Rgb565 => {
            let v = (r >> 3) | ((g >> 2) << 5) | ((b >> 3) << 11);
            out.copy_from_slice(&(v as u16).to_le_bytes());
        }
        DataFormat::Rgba5551 => {
            let v = (r >> 3) | ((g >> 3) << 5) | ((b >> 3) << 10) | ((a >> 7) << 15);
            out.copy_from_slice(&(v as u16).to_le_bytes());
        }
        DataFormat::Rgba4444 => {
            let v = (r >> 4) | ((g >> 4) << 4) | ((b >> 4) << 8) | ((a >> 4) << 12);
            out.copy_from_slice(&(v as u16).to_le_bytes());
        }
    }
}

/// Decode a tightly packed buffer into `out`; missing source pixels decode as 0
pub fn decode_into(format: DataFormat, data: &[u8], out: &mut [u32]) {
    static ZEROES: [u8; 4] = [0; 4];
    let bpp = format.bytes_per_pixel() as usize;
    let padding = std::iter::repeat(&ZEROES[..bpp]);
    for (dst, src) in out.iter_mut().zip(data.chunks_exact(bpp).chain(padding)) {
        *dst = decode_pixel(format, src);
    }
}

/// Encode RGBA8 pixels into a tightly packed buffer
pub fn encode_from(format: DataFormat, pixels: &[u32]) -> Vec<u8> {
    let bpp = format.bytes_per_pixel() as usize;
    let mut out = vec![0u8; pixels.len() * bpp];
    for (chunk, &rgba) in out.chunks_exact_mut(bpp).zip(pixels) {
        encode_pixel(format, rgba, chunk);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_5551_alpha_bit() {
        assert_eq!(decode_pixel(DataFormat::Rgba5551, &[0x00, 0x80]) >> 24, 0xFF);
        assert_eq!(decode_pixel(DataFormat::Rgba5551, &[0x1F, 0x00]), 0x0000_00FF);
    }

    #[test]
    fn test_decode_4444_expands_nibbles() {
        // a=5 b=0 g=0 r=0xF
        assert_eq!(decode_pixel(DataFormat::Rgba4444, &[0x0F, 0x50]), 0x5500_00FF);
    }

    #[test]
    fn test_565_encode_keeps_channels() {
        let mut out = [0u8; 2];
        encode_pixel(DataFormat::Rgb565, pack_rgba(0xFF, 0, 0xFF, 0xFF), &mut out);
        assert_eq!(u16::from_le_bytes(out), 0xF81F);
        assert_eq!(decode_pixel(DataFormat::Rgb565, &out), pack_rgba(0xFF, 0, 0xFF, 0xFF));
    }

    #[test]
    fn test_decode_into_pads_short_input() {
        let mut out = [0xDEAD_BEEFu32; 3];
        decode_into(DataFormat::R8, &[7], &mut out);
        assert_eq!(out[0], pack_rgba(7, 0, 0, 0xFF));
        assert_eq!(out[2], pack_rgba(0, 0, 0, 0xFF));
    }
}
