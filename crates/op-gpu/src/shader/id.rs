//! Cache keys derived from GE register state

use crate::ge_constants::{ClutMode, GePaletteFormat, PixelFormat};
use std::fmt;

/// Key of a generated depalettize shader
///
/// Bits 0-23 hold the CLUT format register, bits 24-31 the source pixel
/// format. Both fields are stored losslessly, so two ids are equal exactly
/// when the inputs are.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ShaderId(pub u32);

impl ShaderId {
    pub fn generate(clut_mode: u32, pixel_format: PixelFormat) -> Self {
        Self((clut_mode & 0x00FF_FFFF) | ((pixel_format as u32) << 24))
    }

    pub fn clut_mode(self) -> ClutMode {
        ClutMode(self.0 & 0x00FF_FFFF)
    }

    pub fn pixel_format(self) -> Option<PixelFormat> {
        PixelFormat::from_raw(self.0 >> 24)
    }

    /// Parse the `%08x` form produced by `Display`
    pub fn from_hex(text: &str) -> Option<Self> {
        u32::from_str_radix(text.trim(), 16).ok().map(Self)
    }
}

impl fmt::Display for ShaderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:08x}", self.0)
    }
}

/// Key of an uploaded CLUT texture
///
/// The palette format sits above the full 32-bit content hash.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClutId(pub u64);

impl ClutId {
    pub fn new(format: GePaletteFormat, clut_hash: u32) -> Self {
        Self(((format as u64) << 32) | clut_hash as u64)
    }

    pub fn format(self) -> GePaletteFormat {
        GePaletteFormat::from_raw((self.0 >> 32) as u32)
    }

    pub fn hash(self) -> u32 {
        self.0 as u32
    }
}

impl fmt::Display for ClutId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:010x}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shader_id_layout() {
        let id = ShaderId::generate(0xAB12_3456, PixelFormat::Clut8);
        // High byte of the register is not part of the CLUT mode
        assert_eq!(id.0, 0x0512_3456);
        assert_eq!(id.clut_mode().raw(), 0x12_3456);
        assert_eq!(id.pixel_format(), Some(PixelFormat::Clut8));
    }

    #[test]
    fn test_shader_id_hex_roundtrip() {
        let id = ShaderId::generate(1, PixelFormat::Rgba8888);
        assert_eq!(id.to_string(), "03000001");
        assert_eq!(ShaderId::from_hex("03000001"), Some(id));
        assert_eq!(ShaderId::from_hex("not hex"), None);
    }

    #[test]
    fn test_clut_id_fields() {
        let id = ClutId::new(GePaletteFormat::Abgr4444, 0xFFFF_FFFF);
        assert_eq!(id.format(), GePaletteFormat::Abgr4444);
        assert_eq!(id.hash(), 0xFFFF_FFFF);
        assert_ne!(id, ClutId::new(GePaletteFormat::Abgr8888, 0xFFFF_FFFF));
        assert_ne!(id, ClutId::new(GePaletteFormat::Abgr4444, 0xFFFF_FFFE));
    }
}
