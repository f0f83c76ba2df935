//! Read-only introspection types for external tooling

/// Which shader table a debug query targets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DebugShaderType {
    Vertex,
    Fragment,
    Geometry,
    VertexLoader,
    Pipeline,
    Depal,
}

/// What text to return for a shader id
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DebugShaderStringType {
    ShortDesc,
    SourceCode,
    Stats,
}

/// Pixel layout of a debug buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GpuDebugBufferFormat {
    /// Packed RGBA8 words (red in the low byte)
    Rgba8888,
    /// One stencil byte per pixel
    Stencil8,
}

/// Snapshot of a framebuffer plane
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GpuDebugBuffer {
    pub width: u32,
    pub height: u32,
    pub format: GpuDebugBufferFormat,
    pub data: Vec<u8>,
}

impl GpuDebugBuffer {
    /// Byte length of one row
    pub fn stride(&self) -> usize {
        let bpp = match self.format {
            GpuDebugBufferFormat::Rgba8888 => 4,
            GpuDebugBufferFormat::Stencil8 => 1,
        };
        self.width as usize * bpp
    }

    /// Read a pixel as a little-endian word (stencil is zero-extended)
    pub fn pixel(&self, x: u32, y: u32) -> Option<u32> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let row = y as usize * self.stride();
        match self.format {
            GpuDebugBufferFormat::Rgba8888 => {
                let i = row + x as usize * 4;
                let b = self.data.get(i..i + 4)?;
                Some(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            }
            GpuDebugBufferFormat::Stencil8 => self.data.get(row + x as usize).map(|&s| s as u32),
        }
    }
}
