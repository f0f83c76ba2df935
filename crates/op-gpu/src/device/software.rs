//! CPU reference device
//!
//! Textures, framebuffers and surfaces are host-memory pixel stores. Shader
//! "compilation" validates the generated text without executing it; quad
//! draws are nearest-neighbour copies from texture stage 0. Large pixel
//! operations run on the shared parallel-loop pool.

use super::pixels::{decode_into, encode_from};
use super::raster;
use super::*;
use crate::shader::ShaderLanguage;
use op_core::{GpuError, ThreadPool};
use std::collections::HashMap;
use std::sync::Arc;

/// Texture stages tracked for binding
pub const MAX_TEXTURE_STAGES: usize = 4;

const MAX_TEXTURE_SIZE: u32 = 4096;

/// What is bound to a texture stage
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoundTexture {
    Texture(TextureHandle),
    Framebuffer(FramebufferHandle),
}

struct SoftTexture {
    width: u32,
    height: u32,
    format: DataFormat,
    pixels: Vec<u32>,
}

struct SoftFramebuffer {
    width: u32,
    height: u32,
    color: Vec<u32>,
    stencil: Option<Vec<u8>>,
}

impl SoftFramebuffer {
    fn new(width: u32, height: u32, with_stencil: bool) -> Self {
        let len = (width * height) as usize;
        Self {
            width,
            height,
            color: vec![0; len],
            stencil: with_stencil.then(|| vec![0; len]),
        }
    }

    fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }
}

struct SoftSurface {
    width: u32,
    height: u32,
    format: DataFormat,
    data: Vec<u8>,
}

/// Counters exposed for tests and stats
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeviceCounters {
    pub compiles: u64,
    pub uploads: u64,
    pub draws: u64,
    pub releases: u64,
}

/// CPU-backed [`RenderDevice`]
pub struct SoftwareDevice {
    pool: Arc<ThreadPool>,
    caps: DeviceCaps,
    next_id: u64,
    shaders: HashMap<u64, (ShaderStage, String)>,
    vertex_decls: HashMap<u64, Vec<VertexElement>>,
    textures: HashMap<u64, SoftTexture>,
    framebuffers: HashMap<u64, SoftFramebuffer>,
    surfaces: HashMap<u64, SoftSurface>,
    bound: [Option<BoundTexture>; MAX_TEXTURE_STAGES],
    render_target: Option<FramebufferHandle>,
    backbuffer: SoftFramebuffer,
    lost: bool,
    counters: DeviceCounters,
}

impl SoftwareDevice {
    /// Create a device with a `width` x `height` backbuffer
    pub fn new(pool: Arc<ThreadPool>, width: u32, height: u32) -> Self {
        Self {
            pool,
            caps: DeviceCaps {
                shader_language: ShaderLanguage::GlslEs300,
                framebuffer_fetch: false,
                max_texture_size: MAX_TEXTURE_SIZE,
            },
            next_id: 1,
            shaders: HashMap::new(),
            vertex_decls: HashMap::new(),
            textures: HashMap::new(),
            framebuffers: HashMap::new(),
            surfaces: HashMap::new(),
            bound: [None; MAX_TEXTURE_STAGES],
            render_target: None,
            backbuffer: SoftFramebuffer::new(width, height, false),
            lost: false,
            counters: DeviceCounters::default(),
        }
    }

    /// Pretend the host dropped the device: every object becomes invalid
    pub fn lose_device(&mut self) {
        tracing::warn!("Software device lost ({} objects dropped)", self.live_objects());
        self.lost = true;
        self.shaders.clear();
        self.vertex_decls.clear();
        self.textures.clear();
        self.framebuffers.clear();
        self.surfaces.clear();
        self.bound = [None; MAX_TEXTURE_STAGES];
        self.render_target = None;
    }

    /// Make the device usable again after [`Self::lose_device`]
    pub fn restore(&mut self) {
        self.lost = false;
    }

    pub fn is_lost(&self) -> bool {
        self.lost
    }

    /// Toggle whether render targets may be sampled while bound
    pub fn set_framebuffer_fetch(&mut self, enabled: bool) {
        self.caps.framebuffer_fetch = enabled;
    }

    pub fn counters(&self) -> DeviceCounters {
        self.counters
    }

    pub fn live_objects(&self) -> usize {
        self.shaders.len()
            + self.vertex_decls.len()
            + self.textures.len()
            + self.framebuffers.len()
            + self.surfaces.len()
    }

    pub fn bound_texture(&self, stage: u32) -> Option<BoundTexture> {
        self.bound.get(stage as usize).copied().flatten()
    }

    pub fn render_target(&self) -> Option<FramebufferHandle> {
        self.render_target
    }

    pub fn shader_source(&self, shader: ShaderHandle) -> Option<&str> {
        self.shaders.get(&shader.0).map(|(_, source)| source.as_str())
    }

    pub fn backbuffer_size(&self) -> (u32, u32) {
        self.backbuffer.size()
    }

    pub fn backbuffer_pixels(&self) -> &[u32] {
        &self.backbuffer.color
    }

    fn alloc_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn check_alive(&self) -> Result<(), GpuError> {
        if self.lost {
            Err(GpuError::DeviceLost)
        } else {
            Ok(())
        }
    }

    fn check_size(&self, width: u32, height: u32) -> Result<(), GpuError> {
        if width == 0 || height == 0 || width > self.caps.max_texture_size || height > self.caps.max_texture_size {
            return Err(GpuError::ResourceExhausted(format!(
                "{}x{} exceeds device limits",
                width, height
            )));
        }
        Ok(())
    }

    fn framebuffer(&self, handle: FramebufferHandle) -> Result<&SoftFramebuffer, GpuError> {
        self.framebuffers
            .get(&handle.0)
            .ok_or(GpuError::InvalidHandle(handle.0))
    }

    fn framebuffer_mut(&mut self, handle: FramebufferHandle) -> Result<&mut SoftFramebuffer, GpuError> {
        self.framebuffers
            .get_mut(&handle.0)
            .ok_or(GpuError::InvalidHandle(handle.0))
    }

    fn current_target_mut(&mut self) -> Result<&mut SoftFramebuffer, GpuError> {
        match self.render_target {
            Some(handle) => self.framebuffer_mut(handle),
            None => Ok(&mut self.backbuffer),
        }
    }

    /// Copy of the pixels bound to a texture stage
    fn sampled_pixels(&self, stage: usize) -> Result<(Vec<u32>, (u32, u32)), GpuError> {
        match self.bound[stage] {
            Some(BoundTexture::Texture(handle)) => {
                let tex = self
                    .textures
                    .get(&handle.0)
                    .ok_or(GpuError::InvalidHandle(handle.0))?;
                Ok((tex.pixels.clone(), (tex.width, tex.height)))
            }
            Some(BoundTexture::Framebuffer(handle)) => {
                let fb = self.framebuffer(handle)?;
                Ok((fb.color.clone(), fb.size()))
            }
            None => Err(GpuError::Unsupported(format!("no texture bound to stage {}", stage))),
        }
    }

    fn validate_source(&self, stage: ShaderStage, source: &str) -> Result<(), String> {
        let mut depth = 0i64;
        for c in source.chars() {
            match c {
                '{' => depth += 1,
                '}' => {
                    depth -= 1;
                    if depth < 0 {
                        return Err("unbalanced '}'".to_string());
                    }
                }
                _ => {}
            }
        }
        if depth != 0 {
            return Err("unterminated block".to_string());
        }

        let code = source
            .lines()
            .map(str::trim)
            .find(|line| !line.is_empty() && !line.starts_with("//"))
            .ok_or_else(|| "empty shader".to_string())?;
        if !code.starts_with("#version 300 es") {
            return Err(format!("expected '#version 300 es', found '{}'", code));
        }
        if !source.contains("void main(") {
            return Err("missing entry point".to_string());
        }
        if stage == ShaderStage::Fragment && !source.contains("fragColor") {
            return Err("fragment shader writes no color".to_string());
        }
        Ok(())
    }
}

impl RenderDevice for SoftwareDevice {
    fn name(&self) -> &'static str {
        "software"
    }

    fn caps(&self) -> DeviceCaps {
        self.caps
    }

    fn compile_shader(&mut self, stage: ShaderStage, source: &str) -> Result<ShaderHandle, GpuError> {
        self.check_alive()?;
        self.validate_source(stage, source)
            .map_err(GpuError::ShaderCompilation)?;
        let id = self.alloc_id();
        self.shaders.insert(id, (stage, source.to_string()));
        self.counters.compiles += 1;
        Ok(ShaderHandle(id))
    }

    fn create_vertex_decl(&mut self, elements: &[VertexElement]) -> Result<VertexDeclHandle, GpuError> {
        self.check_alive()?;
        let id = self.alloc_id();
        self.vertex_decls.insert(id, elements.to_vec());
        Ok(VertexDeclHandle(id))
    }

    fn create_texture(&mut self, width: u32, height: u32, format: DataFormat) -> Result<TextureHandle, GpuError> {
        self.check_alive()?;
        self.check_size(width, height)?;
        let id = self.alloc_id();
        self.textures.insert(
            id,
            SoftTexture {
                width,
                height,
                format,
                pixels: vec![0; (width * height) as usize],
            },
        );
        Ok(TextureHandle(id))
    }

    fn update_texture(&mut self, texture: TextureHandle, data: &[u8]) -> Result<(), GpuError> {
        self.check_alive()?;
        let pool = Arc::clone(&self.pool);
        let tex = self
            .textures
            .get_mut(&texture.0)
            .ok_or(GpuError::InvalidHandle(texture.0))?;
        let format = tex.format;
        let row_len = tex.width as usize;
        let row_bytes = row_len * format.bytes_per_pixel() as usize;
        pool.parallel_rows_mut(&mut tex.pixels, row_len, |first_row, rows| {
            let start = (first_row * row_bytes).min(data.len());
            decode_into(format, &data[start..], rows);
        });
        self.counters.uploads += 1;
        Ok(())
    }

    fn bind_texture(&mut self, stage: u32, texture: TextureHandle) -> Result<(), GpuError> {
        self.check_alive()?;
        if !self.textures.contains_key(&texture.0) {
            return Err(GpuError::InvalidHandle(texture.0));
        }
        let slot = self
            .bound
            .get_mut(stage as usize)
            .ok_or_else(|| GpuError::Unsupported(format!("texture stage {}", stage)))?;
        *slot = Some(BoundTexture::Texture(texture));
        Ok(())
    }

    fn create_framebuffer(&mut self, desc: &FramebufferDesc) -> Result<FramebufferHandle, GpuError> {
        self.check_alive()?;
        self.check_size(desc.width, desc.height)?;
        let id = self.alloc_id();
        tracing::trace!("Creating framebuffer {} ({}x{}, {})", id, desc.width, desc.height, desc.tag);
        self.framebuffers
            .insert(id, SoftFramebuffer::new(desc.width, desc.height, desc.with_stencil));
        Ok(FramebufferHandle(id))
    }

    fn bind_render_target(&mut self, target: Option<FramebufferHandle>) -> Result<(), GpuError> {
        self.check_alive()?;
        if let Some(handle) = target {
            self.framebuffer(handle)?;
        }
        self.render_target = target;
        Ok(())
    }

    fn bind_framebuffer_as_texture(&mut self, stage: u32, framebuffer: FramebufferHandle) -> Result<(), GpuError> {
        self.check_alive()?;
        self.framebuffer(framebuffer)?;
        let slot = self
            .bound
            .get_mut(stage as usize)
            .ok_or_else(|| GpuError::Unsupported(format!("texture stage {}", stage)))?;
        *slot = Some(BoundTexture::Framebuffer(framebuffer));
        Ok(())
    }

    fn copy_framebuffer(
        &mut self,
        src: FramebufferHandle,
        src_rect: Rect,
        dst: FramebufferHandle,
        dst_x: u32,
        dst_y: u32,
        aspect: Aspect,
    ) -> Result<(), GpuError> {
        self.check_alive()?;
        // Snapshot the source so self-copies read pre-copy pixels
        let (src_size, color, stencil) = {
            let fb = self.framebuffer(src)?;
            (fb.size(), fb.color.clone(), fb.stencil.clone())
        };
        let target = self.framebuffer_mut(dst)?;
        let dst_size = target.size();

        if aspect.contains(Aspect::COLOR) {
            raster::copy_rect(&color, src_size, src_rect, &mut target.color, dst_size, (dst_x, dst_y));
        }
        if aspect.contains(Aspect::STENCIL) {
            if let (Some(src_stencil), Some(dst_stencil)) = (stencil.as_ref(), target.stencil.as_mut()) {
                raster::copy_rect(src_stencil, src_size, src_rect, dst_stencil, dst_size, (dst_x, dst_y));
            }
        }
        Ok(())
    }

    fn create_offscreen_surface(&mut self, width: u32, height: u32, format: DataFormat) -> Result<SurfaceHandle, GpuError> {
        self.check_alive()?;
        self.check_size(width, height)?;
        let id = self.alloc_id();
        self.surfaces.insert(
            id,
            SoftSurface {
                width,
                height,
                format,
                data: vec![0; (width * height * format.bytes_per_pixel()) as usize],
            },
        );
        Ok(SurfaceHandle(id))
    }

    fn read_framebuffer(
        &mut self,
        src: FramebufferHandle,
        rect: Rect,
        surface: SurfaceHandle,
    ) -> Result<Vec<u8>, GpuError> {
        self.check_alive()?;
        let fb = self
            .framebuffers
            .get(&src.0)
            .ok_or(GpuError::InvalidHandle(src.0))?;
        let surf = self
            .surfaces
            .get_mut(&surface.0)
            .ok_or(GpuError::InvalidHandle(surface.0))?;

        let rect = rect.clip_to(fb.width, fb.height).clip_to(surf.width, surf.height);
        let mut pixels = vec![0u32; (rect.w * rect.h) as usize];
        raster::copy_rect(&fb.color, fb.size(), rect, &mut pixels, (rect.w, rect.h), (0, 0));

        let encoded = encode_from(surf.format, &pixels);
        let len = encoded.len();
        surf.data[..len].copy_from_slice(&encoded);
        Ok(surf.data[..len].to_vec())
    }

    fn write_framebuffer_pixels(
        &mut self,
        dst: FramebufferHandle,
        rect: Rect,
        format: DataFormat,
        data: &[u8],
    ) -> Result<(), GpuError> {
        self.check_alive()?;
        let mut pixels = vec![0u32; (rect.w * rect.h) as usize];
        decode_into(format, data, &mut pixels);
        let target = self.framebuffer_mut(dst)?;
        let size = target.size();
        raster::copy_rect(
            &pixels,
            (rect.w, rect.h),
            Rect::new(0, 0, rect.w, rect.h),
            &mut target.color,
            size,
            (rect.x, rect.y),
        );
        Ok(())
    }

    fn read_stencil(&mut self, src: FramebufferHandle) -> Result<Vec<u8>, GpuError> {
        self.check_alive()?;
        let fb = self.framebuffer(src)?;
        fb.stencil
            .clone()
            .ok_or_else(|| GpuError::Unsupported("framebuffer has no stencil plane".to_string()))
    }

    fn clear(&mut self, color: Option<u32>, stencil: Option<u8>) -> Result<(), GpuError> {
        self.check_alive()?;
        let target = self.current_target_mut()?;
        if let Some(color) = color {
            target.color.fill(color);
        }
        if let (Some(value), Some(plane)) = (stencil, target.stencil.as_mut()) {
            plane.fill(value);
        }
        Ok(())
    }

    fn stencil_pass(&mut self, pass: &StencilPass) -> Result<(), GpuError> {
        self.check_alive()?;
        let (color, color_size) = {
            let tex = self
                .textures
                .get(&pass.source.0)
                .ok_or(GpuError::InvalidHandle(pass.source.0))?;
            (tex.pixels.clone(), (tex.width, tex.height))
        };
        let target = self.current_target_mut()?;
        let size = target.size();
        let plane = target
            .stencil
            .as_mut()
            .ok_or_else(|| GpuError::Unsupported("render target has no stencil plane".to_string()))?;
        raster::stencil_pass(&color, color_size, plane, size, pass.write_mask, pass.test_value);
        self.counters.draws += 1;
        Ok(())
    }

    fn draw_textured_quad(&mut self, pass: &QuadPass) -> Result<(), GpuError> {
        self.check_alive()?;
        if let Some((vs, ps)) = pass.program {
            for shader in [vs, ps] {
                if !self.shaders.contains_key(&shader.0) {
                    return Err(GpuError::InvalidHandle(shader.0));
                }
            }
        }
        if let Some(decl) = pass.vertex_decl {
            if !self.vertex_decls.contains_key(&decl.0) {
                return Err(GpuError::InvalidHandle(decl.0));
            }
        }

        let (pixels, src_size) = self.sampled_pixels(0)?;
        let pool = Arc::clone(&self.pool);
        let target = self.current_target_mut()?;
        let size = target.size();
        raster::blit_scaled(&pool, &pixels, src_size, pass.uv, &mut target.color, size, pass.dst);
        self.counters.draws += 1;
        Ok(())
    }

    fn resize_backbuffer(&mut self, width: u32, height: u32) {
        self.backbuffer = SoftFramebuffer::new(width, height, false);
    }

    fn release(&mut self, resource: Resource) {
        self.counters.releases += 1;
        match resource {
            Resource::Shader(h) => {
                self.shaders.remove(&h.0);
            }
            Resource::VertexDecl(h) => {
                self.vertex_decls.remove(&h.0);
            }
            Resource::Texture(h) => {
                self.textures.remove(&h.0);
                for slot in self.bound.iter_mut() {
                    if *slot == Some(BoundTexture::Texture(h)) {
                        *slot = None;
                    }
                }
            }
            Resource::Framebuffer(h) => {
                self.framebuffers.remove(&h.0);
                for slot in self.bound.iter_mut() {
                    if *slot == Some(BoundTexture::Framebuffer(h)) {
                        *slot = None;
                    }
                }
                if self.render_target == Some(h) {
                    self.render_target = None;
                }
            }
            Resource::Surface(h) => {
                self.surfaces.remove(&h.0);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::pixels::pack_rgba;
    use crate::shader::{generate_depal_shader, generate_depal_vertex_shader, ShaderId};
    use crate::ge_constants::PixelFormat;

    fn device() -> SoftwareDevice {
        SoftwareDevice::new(Arc::new(ThreadPool::new(2)), 64, 32)
    }

    fn fb_desc(width: u32, height: u32) -> FramebufferDesc {
        FramebufferDesc {
            width,
            height,
            with_stencil: true,
            tag: "test",
        }
    }

    #[test]
    fn test_compiles_generated_sources() {
        let mut dev = device();
        let ps = generate_depal_shader(ShaderId::generate(0xFF00, PixelFormat::Clut8), ShaderLanguage::GlslEs300);
        let vs = generate_depal_vertex_shader(ShaderLanguage::GlslEs300);
        assert!(dev.compile_shader(ShaderStage::Fragment, &ps).is_ok());
        assert!(dev.compile_shader(ShaderStage::Vertex, &vs).is_ok());
        assert_eq!(dev.counters().compiles, 2);
    }

    #[test]
    fn test_rejects_broken_sources() {
        let mut dev = device();
        let hlsl = generate_depal_shader(ShaderId::generate(0xFF00, PixelFormat::Clut8), ShaderLanguage::HlslD3d11);
        assert!(matches!(
            dev.compile_shader(ShaderStage::Fragment, &hlsl),
            Err(GpuError::ShaderCompilation(_))
        ));
        assert!(dev
            .compile_shader(ShaderStage::Vertex, "#version 300 es\nvoid main() {")
            .is_err());
    }

    #[test]
    fn test_handles_are_never_reused() {
        let mut dev = device();
        let a = dev.create_texture(4, 4, DataFormat::Rgba8888).unwrap();
        dev.release(a.into());
        dev.lose_device();
        dev.restore();
        let b = dev.create_texture(4, 4, DataFormat::Rgba8888).unwrap();
        assert_ne!(a, b);
        assert!(dev.update_texture(a, &[0; 64]).is_err());
    }

    #[test]
    fn test_lost_device_fails_calls() {
        let mut dev = device();
        dev.lose_device();
        assert_eq!(dev.create_texture(4, 4, DataFormat::R8), Err(GpuError::DeviceLost));
        assert_eq!(dev.clear(Some(0), None), Err(GpuError::DeviceLost));
    }

    #[test]
    fn test_texture_upload_and_draw() {
        let mut dev = device();
        let tex = dev.create_texture(2, 1, DataFormat::Rgba8888).unwrap();
        let red = pack_rgba(0xFF, 0, 0, 0xFF);
        let blue = pack_rgba(0, 0, 0xFF, 0xFF);
        let data: Vec<u8> = [red, blue].iter().flat_map(|p| p.to_le_bytes()).collect();
        dev.update_texture(tex, &data).unwrap();
        dev.bind_texture(0, tex).unwrap();

        let fb = dev.create_framebuffer(&fb_desc(4, 2)).unwrap();
        dev.bind_render_target(Some(fb)).unwrap();
        dev.draw_textured_quad(&QuadPass {
            program: None,
            vertex_decl: None,
            uv: [0.0, 0.0, 1.0, 1.0],
            dst: Rect::new(0, 0, 4, 2),
        })
        .unwrap();

        let surface = dev.create_offscreen_surface(4, 2, DataFormat::Rgba8888).unwrap();
        let out = dev.read_framebuffer(fb, Rect::new(0, 0, 4, 1), surface).unwrap();
        let px: Vec<u32> = out
            .chunks_exact(4)
            .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect();
        assert_eq!(px, vec![red, red, blue, blue]);
    }

    #[test]
    fn test_copy_framebuffer_self_overlap() {
        let mut dev = device();
        let fb = dev.create_framebuffer(&fb_desc(4, 1)).unwrap();
        let data: Vec<u8> = (1u32..=4).flat_map(|p| p.to_le_bytes()).collect();
        dev.write_framebuffer_pixels(fb, Rect::new(0, 0, 4, 1), DataFormat::Rgba8888, &data)
            .unwrap();
        dev.copy_framebuffer(fb, Rect::new(0, 0, 3, 1), fb, 1, 0, Aspect::COLOR)
            .unwrap();

        let surface = dev.create_offscreen_surface(4, 1, DataFormat::Rgba8888).unwrap();
        let out = dev.read_framebuffer(fb, Rect::new(0, 0, 4, 1), surface).unwrap();
        let px: Vec<u32> = out
            .chunks_exact(4)
            .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect();
        assert_eq!(px, vec![1, 1, 2, 3]);
    }

    #[test]
    fn test_release_unbinds_and_counts() {
        let mut dev = device();
        let fb = dev.create_framebuffer(&fb_desc(4, 4)).unwrap();
        dev.bind_render_target(Some(fb)).unwrap();
        dev.bind_framebuffer_as_texture(0, fb).unwrap();
        dev.release(fb.into());
        assert_eq!(dev.render_target(), None);
        assert_eq!(dev.bound_texture(0), None);
        assert_eq!(dev.counters().releases, 1);
        assert_eq!(dev.live_objects(), 0);
    }

    #[test]
    fn test_oversized_texture_is_exhaustion() {
        let mut dev = device();
        assert!(matches!(
            dev.create_texture(MAX_TEXTURE_SIZE + 1, 1, DataFormat::R8),
            Err(GpuError::ResourceExhausted(_))
        ));
    }
}
