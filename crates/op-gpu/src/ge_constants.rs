//! GE register encodings used by the caches

/// Framebuffer pixel formats (FBP/FPF registers)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum GeBufferFormat {
    Rgb565 = 0,
    Rgba5551 = 1,
    Rgba4444 = 2,
    Rgba8888 = 3,
}

impl GeBufferFormat {
    /// Decode the low two bits of the pixel format register
    pub fn from_raw(raw: u32) -> Self {
        match raw & 3 {
            0 => Self::Rgb565,
            1 => Self::Rgba5551,
            2 => Self::Rgba4444,
            _ => Self::Rgba8888,
        }
    }

    /// Bytes per pixel
    pub fn bytes_per_pixel(self) -> u32 {
        match self {
            Self::Rgba8888 => 4,
            _ => 2,
        }
    }

    /// Whether the format carries any alpha (and therefore stencil) bits
    pub fn has_stencil_bits(self) -> bool {
        !matches!(self, Self::Rgb565)
    }
}

/// Palette entry formats (bits 0-1 of the CLUT format register)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum GePaletteFormat {
    Bgr5650 = 0,
    Abgr5551 = 1,
    Abgr4444 = 2,
    Abgr8888 = 3,
}

/// The raw CLUT is always 1024 bytes regardless of entry size
pub const CLUT_BYTES: usize = 1024;

impl GePaletteFormat {
    /// Decode the low two bits of the CLUT format register
    pub fn from_raw(raw: u32) -> Self {
        match raw & 3 {
            0 => Self::Bgr5650,
            1 => Self::Abgr5551,
            2 => Self::Abgr4444,
            _ => Self::Abgr8888,
        }
    }

    /// Whether entries are 32 bits wide
    pub fn is_32bit(self) -> bool {
        self == Self::Abgr8888
    }

    /// Number of entries the CLUT texture holds (1024 bytes / entry size)
    pub fn texture_width(self) -> u32 {
        if self.is_32bit() {
            256
        } else {
            512
        }
    }
}

/// Decoded CLUT format register (GE command 0xC5, 24-bit payload)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClutMode(pub u32);

impl ClutMode {
    /// Build a register value from its fields
    pub fn new(format: GePaletteFormat, shift: u32, mask: u32, start_pos: u32) -> Self {
        Self(
            (format as u32)
                | ((shift & 0x1F) << 2)
                | ((mask & 0xFF) << 8)
                | ((start_pos & 0x1F) << 16),
        )
    }

    /// The 24-bit register payload
    pub fn raw(self) -> u32 {
        self.0 & 0x00FF_FFFF
    }

    pub fn palette_format(self) -> GePaletteFormat {
        GePaletteFormat::from_raw(self.0)
    }

    /// Right shift applied to the sampled index
    pub fn index_shift(self) -> u32 {
        (self.0 >> 2) & 0x1F
    }

    /// Mask applied after the shift
    pub fn index_mask(self) -> u32 {
        (self.0 >> 8) & 0xFF
    }

    /// Start offset OR'd into the index, in entries
    pub fn index_start(self) -> u32 {
        ((self.0 >> 16) & 0x1F) << 4
    }
}

/// Source formats a depalettize pass can sample
///
/// The buffer formats cover framebuffers reinterpreted as indexed textures;
/// the CLUT formats cover indexed textures uploaded as raw index data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum PixelFormat {
    Rgb565 = 0,
    Rgba5551 = 1,
    Rgba4444 = 2,
    Rgba8888 = 3,
    Clut4 = 4,
    Clut8 = 5,
    Clut16 = 6,
    Clut32 = 7,
}

impl PixelFormat {
    pub const ALL: [PixelFormat; 8] = [
        PixelFormat::Rgb565,
        PixelFormat::Rgba5551,
        PixelFormat::Rgba4444,
        PixelFormat::Rgba8888,
        PixelFormat::Clut4,
        PixelFormat::Clut8,
        PixelFormat::Clut16,
        PixelFormat::Clut32,
    ];

    pub fn from_raw(raw: u32) -> Option<Self> {
        Self::ALL.get(raw as usize).copied()
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Rgb565 => "565",
            Self::Rgba5551 => "5551",
            Self::Rgba4444 => "4444",
            Self::Rgba8888 => "8888",
            Self::Clut4 => "CLUT4",
            Self::Clut8 => "CLUT8",
            Self::Clut16 => "CLUT16",
            Self::Clut32 => "CLUT32",
        }
    }
}

impl From<GeBufferFormat> for PixelFormat {
    fn from(format: GeBufferFormat) -> Self {
        match format {
            GeBufferFormat::Rgb565 => Self::Rgb565,
            GeBufferFormat::Rgba5551 => Self::Rgba5551,
            GeBufferFormat::Rgba4444 => Self::Rgba4444,
            GeBufferFormat::Rgba8888 => Self::Rgba8888,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clut_mode_fields() {
        let mode = ClutMode::new(GePaletteFormat::Abgr4444, 4, 0x0F, 2);
        assert_eq!(mode.palette_format(), GePaletteFormat::Abgr4444);
        assert_eq!(mode.index_shift(), 4);
        assert_eq!(mode.index_mask(), 0x0F);
        assert_eq!(mode.index_start(), 32);
        assert_eq!(mode.raw() & !0x00FF_FFFF, 0);
    }

    #[test]
    fn test_clut_texture_width() {
        assert_eq!(GePaletteFormat::Abgr8888.texture_width(), 256);
        assert_eq!(GePaletteFormat::Bgr5650.texture_width(), 512);
    }

    #[test]
    fn test_buffer_format_bpp() {
        assert_eq!(GeBufferFormat::Rgba8888.bytes_per_pixel(), 4);
        assert_eq!(GeBufferFormat::Rgba4444.bytes_per_pixel(), 2);
        assert!(!GeBufferFormat::Rgb565.has_stencil_bits());
    }

    #[test]
    fn test_pixel_format_raw() {
        for format in PixelFormat::ALL {
            assert_eq!(PixelFormat::from_raw(format as u32), Some(format));
        }
        assert_eq!(PixelFormat::from_raw(8), None);
        assert_eq!(PixelFormat::from(GeBufferFormat::Rgba5551), PixelFormat::Rgba5551);
    }
}
