//! Render device abstraction
//!
//! The caches and the framebuffer manager only ever talk to the host GPU
//! through [`RenderDevice`]. Handles are opaque ids that a device never hands
//! out twice, so a handle kept across a device loss can not alias a newer
//! object.

pub mod pixels;
pub mod raster;
pub mod software;
pub mod vulkan;

use crate::shader::ShaderLanguage;
use op_core::GpuError;

pub use software::SoftwareDevice;
pub use vulkan::VulkanDevice;

macro_rules! define_handle {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(pub(crate) u64);

        impl $name {
            /// Raw id, for logging and debug output
            pub fn raw(self) -> u64 {
                self.0
            }
        }
    };
}

define_handle!(
    /// Compiled shader program stage
    ShaderHandle
);
define_handle!(
    /// Vertex input layout
    VertexDeclHandle
);
define_handle!(
    /// Sampled texture
    TextureHandle
);
define_handle!(
    /// Render target (color plus optional stencil)
    FramebufferHandle
);
define_handle!(
    /// CPU-readable surface used for readback
    SurfaceHandle
);

/// Any device object, for release
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Resource {
    Shader(ShaderHandle),
    VertexDecl(VertexDeclHandle),
    Texture(TextureHandle),
    Framebuffer(FramebufferHandle),
    Surface(SurfaceHandle),
}

impl From<ShaderHandle> for Resource {
    fn from(handle: ShaderHandle) -> Self {
        Self::Shader(handle)
    }
}

impl From<VertexDeclHandle> for Resource {
    fn from(handle: VertexDeclHandle) -> Self {
        Self::VertexDecl(handle)
    }
}

impl From<TextureHandle> for Resource {
    fn from(handle: TextureHandle) -> Self {
        Self::Texture(handle)
    }
}

impl From<FramebufferHandle> for Resource {
    fn from(handle: FramebufferHandle) -> Self {
        Self::Framebuffer(handle)
    }
}

impl From<SurfaceHandle> for Resource {
    fn from(handle: SurfaceHandle) -> Self {
        Self::Surface(handle)
    }
}

/// Device capabilities the caches care about
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceCaps {
    pub shader_language: ShaderLanguage,
    /// Whether a render target may be sampled while bound for writing
    pub framebuffer_fetch: bool,
    pub max_texture_size: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShaderStage {
    Vertex,
    Fragment,
}

/// Pixel layout of texture, surface and readback data
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataFormat {
    Rgba8888,
    Rgba4444,
    Rgba5551,
    Rgb565,
    R8,
    R8G8,
}

impl DataFormat {
    pub fn bytes_per_pixel(self) -> u32 {
        match self {
            Self::Rgba8888 => 4,
            Self::R8 => 1,
            _ => 2,
        }
    }
}

/// Vertex input element
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VertexElement {
    Position { components: u8 },
    TexCoord0,
}

/// Integer rectangle in pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Rect {
    pub x: u32,
    pub y: u32,
    pub w: u32,
    pub h: u32,
}

impl Rect {
    pub fn new(x: u32, y: u32, w: u32, h: u32) -> Self {
        Self { x, y, w, h }
    }

    pub fn is_empty(&self) -> bool {
        self.w == 0 || self.h == 0
    }

    /// Intersect with a `width` x `height` surface anchored at the origin
    pub fn clip_to(&self, width: u32, height: u32) -> Rect {
        let x = self.x.min(width);
        let y = self.y.min(height);
        Rect {
            x,
            y,
            w: self.w.min(width - x),
            h: self.h.min(height - y),
        }
    }
}

/// Render target creation parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FramebufferDesc {
    pub width: u32,
    pub height: u32,
    pub with_stencil: bool,
    pub tag: &'static str,
}

bitflags::bitflags! {
    /// Planes touched by a framebuffer copy
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Aspect: u8 {
        const COLOR = 0x01;
        const STENCIL = 0x02;
    }
}

/// One stencil reconstruction pass into the current render target
///
/// Every pixel whose source alpha has `test_value` set gets the bits in
/// `write_mask` set in its stencil value; other pixels are left alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StencilPass {
    pub source: TextureHandle,
    pub write_mask: u8,
    pub test_value: u8,
}

/// Textured quad drawn from texture stage 0 into the current render target
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QuadPass {
    /// Vertex and pixel shader; `None` uses the device's built-in copy path
    pub program: Option<(ShaderHandle, ShaderHandle)>,
    pub vertex_decl: Option<VertexDeclHandle>,
    /// Source rectangle in normalized coordinates (u0, v0, u1, v1)
    pub uv: [f32; 4],
    pub dst: Rect,
}

/// Host GPU device
///
/// All calls happen on the emulation thread. A lost device fails every call
/// with [`GpuError::DeviceLost`] until the host restores it.
pub trait RenderDevice: Send {
    fn name(&self) -> &'static str;

    fn caps(&self) -> DeviceCaps;

    fn compile_shader(&mut self, stage: ShaderStage, source: &str) -> Result<ShaderHandle, GpuError>;

    fn create_vertex_decl(&mut self, elements: &[VertexElement]) -> Result<VertexDeclHandle, GpuError>;

    fn create_texture(&mut self, width: u32, height: u32, format: DataFormat) -> Result<TextureHandle, GpuError>;

    /// Replace the whole texture contents with `data` in the texture's format
    fn update_texture(&mut self, texture: TextureHandle, data: &[u8]) -> Result<(), GpuError>;

    fn bind_texture(&mut self, stage: u32, texture: TextureHandle) -> Result<(), GpuError>;

    fn create_framebuffer(&mut self, desc: &FramebufferDesc) -> Result<FramebufferHandle, GpuError>;

    /// Bind a render target (`None` = host backbuffer)
    fn bind_render_target(&mut self, target: Option<FramebufferHandle>) -> Result<(), GpuError>;

    fn bind_framebuffer_as_texture(&mut self, stage: u32, framebuffer: FramebufferHandle) -> Result<(), GpuError>;

    /// Copy a rectangle, clipped to both framebuffers
    fn copy_framebuffer(
        &mut self,
        src: FramebufferHandle,
        src_rect: Rect,
        dst: FramebufferHandle,
        dst_x: u32,
        dst_y: u32,
        aspect: Aspect,
    ) -> Result<(), GpuError>;

    fn create_offscreen_surface(&mut self, width: u32, height: u32, format: DataFormat) -> Result<SurfaceHandle, GpuError>;

    /// Read a color rectangle through `surface`, returned in the surface format
    fn read_framebuffer(
        &mut self,
        src: FramebufferHandle,
        rect: Rect,
        surface: SurfaceHandle,
    ) -> Result<Vec<u8>, GpuError>;

    /// Write `data` (tightly packed, `format`) into a color rectangle
    fn write_framebuffer_pixels(
        &mut self,
        dst: FramebufferHandle,
        rect: Rect,
        format: DataFormat,
        data: &[u8],
    ) -> Result<(), GpuError>;

    /// Read the stencil plane of a framebuffer (one byte per pixel)
    fn read_stencil(&mut self, src: FramebufferHandle) -> Result<Vec<u8>, GpuError>;

    /// Clear the current render target
    fn clear(&mut self, color: Option<u32>, stencil: Option<u8>) -> Result<(), GpuError>;

    fn stencil_pass(&mut self, pass: &StencilPass) -> Result<(), GpuError>;

    fn draw_textured_quad(&mut self, pass: &QuadPass) -> Result<(), GpuError>;

    fn resize_backbuffer(&mut self, width: u32, height: u32);

    /// Release one object. Unknown or stale handles are ignored.
    fn release(&mut self, resource: Resource);
}
