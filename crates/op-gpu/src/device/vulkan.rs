//! Vulkan device
//!
//! Every texture, framebuffer and readback surface lives in a persistently
//! mapped host-visible buffer, so copies and readback are plain memory
//! operations on the mapped ranges. There is no runtime GLSL compiler in this
//! build: `compile_shader` always fails and callers take their fallback path.

use super::pixels::{decode_into, encode_from};
use super::raster;
use super::*;
use crate::shader::ShaderLanguage;
use ash::vk;
use op_core::{GpuError, ThreadPool};
use std::collections::HashMap;
use std::sync::Arc;

fn vk_error(context: &str, result: vk::Result) -> GpuError {
    match result {
        vk::Result::ERROR_DEVICE_LOST => GpuError::DeviceLost,
        vk::Result::ERROR_OUT_OF_HOST_MEMORY | vk::Result::ERROR_OUT_OF_DEVICE_MEMORY => {
            GpuError::ResourceExhausted(format!("{}: {:?}", context, result))
        }
        other => GpuError::Vulkan(format!("{}: {:?}", context, other)),
    }
}

/// Mapped host-visible allocation
struct HostBuffer {
    buffer: vk::Buffer,
    memory: vk::DeviceMemory,
    ptr: *mut u8,
    len: usize,
}

impl HostBuffer {
    /// Placeholder that owns no Vulkan objects
    fn empty() -> Self {
        Self {
            buffer: vk::Buffer::null(),
            memory: vk::DeviceMemory::null(),
            ptr: std::ptr::NonNull::<u32>::dangling().as_ptr() as *mut u8,
            len: 0,
        }
    }

    fn bytes(&self) -> &[u8] {
        // SAFETY: `ptr` maps `len` bytes for the lifetime of the allocation
        unsafe { std::slice::from_raw_parts(self.ptr, self.len) }
    }

    fn bytes_mut(&mut self) -> &mut [u8] {
        // SAFETY: as above; `&mut self` makes the view unique
        unsafe { std::slice::from_raw_parts_mut(self.ptr, self.len) }
    }

    fn words(&self) -> &[u32] {
        // Mapped ranges are aligned to at least minMemoryMapAlignment (>= 64)
        bytemuck::cast_slice(self.bytes())
    }

    fn words_mut(&mut self) -> &mut [u32] {
        bytemuck::cast_slice_mut(self.bytes_mut())
    }
}

struct VkTexture {
    width: u32,
    height: u32,
    format: DataFormat,
    pixels: HostBuffer,
}

struct VkFramebuffer {
    width: u32,
    height: u32,
    color: HostBuffer,
    stencil: Option<HostBuffer>,
}

impl VkFramebuffer {
    fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }
}

struct VkSurface {
    width: u32,
    height: u32,
    format: DataFormat,
    data: HostBuffer,
}

enum Sampled {
    Texture(TextureHandle),
    Framebuffer(FramebufferHandle),
}

/// Vulkan-backed [`RenderDevice`]
pub struct VulkanDevice {
    _entry: ash::Entry,
    instance: ash::Instance,
    device: ash::Device,
    memory_properties: vk::PhysicalDeviceMemoryProperties,
    device_name: String,
    caps: DeviceCaps,
    pool: Arc<ThreadPool>,
    next_id: u64,
    vertex_decls: HashMap<u64, Vec<VertexElement>>,
    textures: HashMap<u64, VkTexture>,
    framebuffers: HashMap<u64, VkFramebuffer>,
    surfaces: HashMap<u64, VkSurface>,
    bound: [Option<Sampled>; 4],
    render_target: Option<FramebufferHandle>,
    backbuffer: VkFramebuffer,
}

// SAFETY: the mapped pointers are only dereferenced through `&self`/`&mut self`
// and the device is driven from one thread at a time.
unsafe impl Send for VulkanDevice {}

impl VulkanDevice {
    /// Load the Vulkan loader and open the first graphics-capable device
    pub fn new(pool: Arc<ThreadPool>, width: u32, height: u32) -> Result<Self, GpuError> {
        tracing::info!("Initializing Vulkan device");

        let entry = unsafe {
            ash::Entry::load().map_err(|e| GpuError::Vulkan(format!("Failed to load Vulkan library: {:?}", e)))?
        };
        let instance = Self::create_instance(&entry)?;

        let (physical_device, queue_family) = match Self::select_physical_device(&instance) {
            Ok(selected) => selected,
            Err(e) => {
                unsafe { instance.destroy_instance(None) };
                return Err(e);
            }
        };

        let device = match Self::create_device(&instance, physical_device, queue_family) {
            Ok(device) => device,
            Err(e) => {
                unsafe { instance.destroy_instance(None) };
                return Err(e);
            }
        };

        let (memory_properties, properties) = unsafe {
            (
                instance.get_physical_device_memory_properties(physical_device),
                instance.get_physical_device_properties(physical_device),
            )
        };
        let device_name = properties
            .device_name_as_c_str()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|_| "unknown".to_string());

        let mut this = Self {
            _entry: entry,
            instance,
            device,
            memory_properties,
            device_name,
            caps: DeviceCaps {
                shader_language: ShaderLanguage::Glsl450Vulkan,
                framebuffer_fetch: false,
                max_texture_size: properties.limits.max_image_dimension2_d,
            },
            pool,
            next_id: 1,
            vertex_decls: HashMap::new(),
            textures: HashMap::new(),
            framebuffers: HashMap::new(),
            surfaces: HashMap::new(),
            bound: [None, None, None, None],
            render_target: None,
            // Replaced below once allocation is possible
            backbuffer: VkFramebuffer {
                width: 0,
                height: 0,
                color: HostBuffer::empty(),
                stencil: None,
            },
        };
        this.backbuffer = this.alloc_framebuffer(width, height, false)?;

        tracing::info!("Vulkan device ready: {}", this.device_name);
        Ok(this)
    }

    pub fn device_name(&self) -> &str {
        &self.device_name
    }

    fn create_instance(entry: &ash::Entry) -> Result<ash::Instance, GpuError> {
        let app_info = vk::ApplicationInfo::default()
            .application_name(c"oxidized-psp GE")
            .application_version(vk::make_api_version(0, 1, 0, 0))
            .engine_name(c"oxidized-psp")
            .engine_version(vk::make_api_version(0, 1, 0, 0))
            .api_version(vk::API_VERSION_1_2);

        let create_info = vk::InstanceCreateInfo::default().application_info(&app_info);

        unsafe {
            entry
                .create_instance(&create_info, None)
                .map_err(|e| vk_error("Failed to create Vulkan instance", e))
        }
    }

    fn select_physical_device(instance: &ash::Instance) -> Result<(vk::PhysicalDevice, u32), GpuError> {
        unsafe {
            let devices = instance
                .enumerate_physical_devices()
                .map_err(|e| vk_error("Failed to enumerate physical devices", e))?;

            devices
                .iter()
                .find_map(|&physical_device| {
                    instance
                        .get_physical_device_queue_family_properties(physical_device)
                        .iter()
                        .position(|props| props.queue_flags.contains(vk::QueueFlags::GRAPHICS))
                        .map(|family| (physical_device, family as u32))
                })
                .ok_or_else(|| GpuError::Vulkan("No graphics-capable Vulkan device found".to_string()))
        }
    }

    fn create_device(
        instance: &ash::Instance,
        physical_device: vk::PhysicalDevice,
        queue_family: u32,
    ) -> Result<ash::Device, GpuError> {
        let queue_priorities = [1.0f32];
        let queue_create_info = vk::DeviceQueueCreateInfo::default()
            .queue_family_index(queue_family)
            .queue_priorities(&queue_priorities);

        let device_create_info =
            vk::DeviceCreateInfo::default().queue_create_infos(std::slice::from_ref(&queue_create_info));

        unsafe {
            instance
                .create_device(physical_device, &device_create_info, None)
                .map_err(|e| vk_error("Failed to create logical device", e))
        }
    }

    fn find_host_memory_type(&self, type_bits: u32) -> Option<u32> {
        let wanted = vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT;
        let count = self.memory_properties.memory_type_count as usize;
        self.memory_properties.memory_types[..count]
            .iter()
            .enumerate()
            .find(|(i, ty)| type_bits & (1 << i) != 0 && ty.property_flags.contains(wanted))
            .map(|(i, _)| i as u32)
    }

    fn alloc_host_buffer(&self, len: usize) -> Result<HostBuffer, GpuError> {
        let info = vk::BufferCreateInfo::default()
            .size(len as vk::DeviceSize)
            .usage(vk::BufferUsageFlags::TRANSFER_SRC | vk::BufferUsageFlags::TRANSFER_DST)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        unsafe {
            let buffer = self
                .device
                .create_buffer(&info, None)
                .map_err(|e| vk_error("Failed to create buffer", e))?;
            let requirements = self.device.get_buffer_memory_requirements(buffer);

            let Some(memory_type) = self.find_host_memory_type(requirements.memory_type_bits) else {
                self.device.destroy_buffer(buffer, None);
                return Err(GpuError::ResourceExhausted("no host-visible memory type".to_string()));
            };

            let alloc_info = vk::MemoryAllocateInfo::default()
                .allocation_size(requirements.size)
                .memory_type_index(memory_type);
            let memory = match self.device.allocate_memory(&alloc_info, None) {
                Ok(memory) => memory,
                Err(e) => {
                    self.device.destroy_buffer(buffer, None);
                    return Err(vk_error("Failed to allocate memory", e));
                }
            };

            let mapped = self
                .device
                .bind_buffer_memory(buffer, memory, 0)
                .and_then(|_| {
                    self.device
                        .map_memory(memory, 0, vk::WHOLE_SIZE, vk::MemoryMapFlags::empty())
                });
            match mapped {
                Ok(ptr) => {
                    std::ptr::write_bytes(ptr as *mut u8, 0, len);
                    Ok(HostBuffer {
                        buffer,
                        memory,
                        ptr: ptr as *mut u8,
                        len,
                    })
                }
                Err(e) => {
                    self.device.destroy_buffer(buffer, None);
                    self.device.free_memory(memory, None);
                    Err(vk_error("Failed to map memory", e))
                }
            }
        }
    }

    fn free_host_buffer(&self, buffer: HostBuffer) {
        if buffer.buffer == vk::Buffer::null() {
            return;
        }
        unsafe {
            self.device.unmap_memory(buffer.memory);
            self.device.destroy_buffer(buffer.buffer, None);
            self.device.free_memory(buffer.memory, None);
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

    fn alloc_framebuffer(&self, width: u32, height: u32, with_stencil: bool) -> Result<VkFramebuffer, GpuError> {
        self.check_size(width, height)?;
        let pixels = (width * height) as usize;
        let color = self.alloc_host_buffer(pixels * 4)?;
        let stencil = if with_stencil {
            match self.alloc_host_buffer(pixels) {
                Ok(buffer) => Some(buffer),
                Err(e) => {
                    self.free_host_buffer(color);
                    return Err(e);
                }
            }
        } else {
            None
        };
        Ok(VkFramebuffer {
            width,
            height,
            color,
            stencil,
        })
    }

    fn free_framebuffer(&self, fb: VkFramebuffer) {
        self.free_host_buffer(fb.color);
        if let Some(stencil) = fb.stencil {
            self.free_host_buffer(stencil);
        }
    }

    fn alloc_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn framebuffer(&self, handle: FramebufferHandle) -> Result<&VkFramebuffer, GpuError> {
        self.framebuffers
            .get(&handle.0)
            .ok_or(GpuError::InvalidHandle(handle.0))
    }

    fn current_target_mut(&mut self) -> Result<&mut VkFramebuffer, GpuError> {
        match self.render_target {
            Some(handle) => self
                .framebuffers
                .get_mut(&handle.0)
                .ok_or(GpuError::InvalidHandle(handle.0)),
            None => Ok(&mut self.backbuffer),
        }
    }

    fn sampled_pixels(&self, stage: usize) -> Result<(Vec<u32>, (u32, u32)), GpuError> {
        match &self.bound[stage] {
            Some(Sampled::Texture(handle)) => {
                let tex = self
                    .textures
                    .get(&handle.0)
                    .ok_or(GpuError::InvalidHandle(handle.0))?;
                Ok((tex.pixels.words().to_vec(), (tex.width, tex.height)))
            }
            Some(Sampled::Framebuffer(handle)) => {
                let fb = self.framebuffer(*handle)?;
                Ok((fb.color.words().to_vec(), fb.size()))
            }
            None => Err(GpuError::Unsupported(format!("no texture bound to stage {}", stage))),
        }
    }

    fn stage_slot(&mut self, stage: u32) -> Result<&mut Option<Sampled>, GpuError> {
        self.bound
            .get_mut(stage as usize)
            .ok_or_else(|| GpuError::Unsupported(format!("texture stage {}", stage)))
    }
}

impl RenderDevice for VulkanDevice {
    fn name(&self) -> &'static str {
        "vulkan"
    }

    fn caps(&self) -> DeviceCaps {
        self.caps
    }

    fn compile_shader(&mut self, stage: ShaderStage, source: &str) -> Result<ShaderHandle, GpuError> {
        tracing::debug!("Vulkan {:?} shader compile requested ({} bytes)", stage, source.len());
        Err(GpuError::ShaderCompilation(
            "runtime GLSL compilation is not available on the Vulkan device".to_string(),
        ))
    }

    fn create_vertex_decl(&mut self, elements: &[VertexElement]) -> Result<VertexDeclHandle, GpuError> {
        let id = self.alloc_id();
        self.vertex_decls.insert(id, elements.to_vec());
        Ok(VertexDeclHandle(id))
    }

    fn create_texture(&mut self, width: u32, height: u32, format: DataFormat) -> Result<TextureHandle, GpuError> {
        self.check_size(width, height)?;
        let pixels = self.alloc_host_buffer((width * height * 4) as usize)?;
        let id = self.alloc_id();
        self.textures.insert(
            id,
            VkTexture {
                width,
                height,
                format,
                pixels,
            },
        );
        Ok(TextureHandle(id))
    }

    fn update_texture(&mut self, texture: TextureHandle, data: &[u8]) -> Result<(), GpuError> {
        let tex = self
            .textures
            .get_mut(&texture.0)
            .ok_or(GpuError::InvalidHandle(texture.0))?;
        let format = tex.format;
        decode_into(format, data, tex.pixels.words_mut());
        Ok(())
    }

    fn bind_texture(&mut self, stage: u32, texture: TextureHandle) -> Result<(), GpuError> {
        if !self.textures.contains_key(&texture.0) {
            return Err(GpuError::InvalidHandle(texture.0));
        }
        *self.stage_slot(stage)? = Some(Sampled::Texture(texture));
        Ok(())
    }

    fn create_framebuffer(&mut self, desc: &FramebufferDesc) -> Result<FramebufferHandle, GpuError> {
        let fb = self.alloc_framebuffer(desc.width, desc.height, desc.with_stencil)?;
        let id = self.alloc_id();
        tracing::trace!("Creating framebuffer {} ({}x{}, {})", id, desc.width, desc.height, desc.tag);
        self.framebuffers.insert(id, fb);
        Ok(FramebufferHandle(id))
    }

    fn bind_render_target(&mut self, target: Option<FramebufferHandle>) -> Result<(), GpuError> {
        if let Some(handle) = target {
            self.framebuffer(handle)?;
        }
        self.render_target = target;
        Ok(())
    }

    fn bind_framebuffer_as_texture(&mut self, stage: u32, framebuffer: FramebufferHandle) -> Result<(), GpuError> {
        self.framebuffer(framebuffer)?;
        *self.stage_slot(stage)? = Some(Sampled::Framebuffer(framebuffer));
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
        let (src_size, color, stencil) = {
            let fb = self.framebuffer(src)?;
            (
                fb.size(),
                fb.color.words().to_vec(),
                fb.stencil.as_ref().map(|s| s.bytes().to_vec()),
            )
        };
        let target = self
            .framebuffers
            .get_mut(&dst.0)
            .ok_or(GpuError::InvalidHandle(dst.0))?;
        let dst_size = target.size();

        if aspect.contains(Aspect::COLOR) {
            raster::copy_rect(&color, src_size, src_rect, target.color.words_mut(), dst_size, (dst_x, dst_y));
        }
        if aspect.contains(Aspect::STENCIL) {
            if let (Some(src_stencil), Some(dst_stencil)) = (stencil.as_ref(), target.stencil.as_mut()) {
                raster::copy_rect(src_stencil, src_size, src_rect, dst_stencil.bytes_mut(), dst_size, (dst_x, dst_y));
            }
        }
        Ok(())
    }

    fn create_offscreen_surface(&mut self, width: u32, height: u32, format: DataFormat) -> Result<SurfaceHandle, GpuError> {
        self.check_size(width, height)?;
        let data = self.alloc_host_buffer((width * height * format.bytes_per_pixel()) as usize)?;
        let id = self.alloc_id();
        self.surfaces.insert(
            id,
            VkSurface {
                width,
                height,
                format,
                data,
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
        raster::copy_rect(fb.color.words(), fb.size(), rect, &mut pixels, (rect.w, rect.h), (0, 0));

        let encoded = encode_from(surf.format, &pixels);
        let len = encoded.len();
        surf.data.bytes_mut()[..len].copy_from_slice(&encoded);
        Ok(encoded)
    }

    fn write_framebuffer_pixels(
        &mut self,
        dst: FramebufferHandle,
        rect: Rect,
        format: DataFormat,
        data: &[u8],
    ) -> Result<(), GpuError> {
        let mut pixels = vec![0u32; (rect.w * rect.h) as usize];
        decode_into(format, data, &mut pixels);
        let target = self
            .framebuffers
            .get_mut(&dst.0)
            .ok_or(GpuError::InvalidHandle(dst.0))?;
        let size = target.size();
        raster::copy_rect(
            &pixels,
            (rect.w, rect.h),
            Rect::new(0, 0, rect.w, rect.h),
            target.color.words_mut(),
            size,
            (rect.x, rect.y),
        );
        Ok(())
    }

    fn read_stencil(&mut self, src: FramebufferHandle) -> Result<Vec<u8>, GpuError> {
        self.framebuffer(src)?
            .stencil
            .as_ref()
            .map(|s| s.bytes().to_vec())
            .ok_or_else(|| GpuError::Unsupported("framebuffer has no stencil plane".to_string()))
    }

    fn clear(&mut self, color: Option<u32>, stencil: Option<u8>) -> Result<(), GpuError> {
        let target = self.current_target_mut()?;
        if let Some(color) = color {
            target.color.words_mut().fill(color);
        }
        if let (Some(value), Some(plane)) = (stencil, target.stencil.as_mut()) {
            plane.bytes_mut().fill(value);
        }
        Ok(())
    }

    fn stencil_pass(&mut self, pass: &StencilPass) -> Result<(), GpuError> {
        let (color, color_size) = {
            let tex = self
                .textures
                .get(&pass.source.0)
                .ok_or(GpuError::InvalidHandle(pass.source.0))?;
            (tex.pixels.words().to_vec(), (tex.width, tex.height))
        };
        let target = self.current_target_mut()?;
        let size = target.size();
        let plane = target
            .stencil
            .as_mut()
            .ok_or_else(|| GpuError::Unsupported("render target has no stencil plane".to_string()))?;
        raster::stencil_pass(&color, color_size, plane.bytes_mut(), size, pass.write_mask, pass.test_value);
        Ok(())
    }

    fn draw_textured_quad(&mut self, pass: &QuadPass) -> Result<(), GpuError> {
        if let Some((vs, _)) = pass.program {
            // Nothing compiles on this device, so no program handle can be valid
            return Err(GpuError::InvalidHandle(vs.0));
        }
        let (pixels, src_size) = self.sampled_pixels(0)?;
        let pool = Arc::clone(&self.pool);
        let target = self.current_target_mut()?;
        let size = target.size();
        raster::blit_scaled(&pool, &pixels, src_size, pass.uv, target.color.words_mut(), size, pass.dst);
        Ok(())
    }

    fn resize_backbuffer(&mut self, width: u32, height: u32) {
        match self.alloc_framebuffer(width, height, false) {
            Ok(fb) => {
                let old = std::mem::replace(&mut self.backbuffer, fb);
                self.free_framebuffer(old);
            }
            Err(e) => tracing::error!("Failed to resize Vulkan backbuffer to {}x{}: {}", width, height, e),
        }
    }

    fn release(&mut self, resource: Resource) {
        match resource {
            Resource::Shader(_) => {}
            Resource::VertexDecl(h) => {
                self.vertex_decls.remove(&h.0);
            }
            Resource::Texture(h) => {
                if let Some(tex) = self.textures.remove(&h.0) {
                    self.free_host_buffer(tex.pixels);
                }
                for slot in self.bound.iter_mut() {
                    if matches!(slot, Some(Sampled::Texture(t)) if *t == h) {
                        *slot = None;
                    }
                }
            }
            Resource::Framebuffer(h) => {
                if let Some(fb) = self.framebuffers.remove(&h.0) {
                    self.free_framebuffer(fb);
                }
                for slot in self.bound.iter_mut() {
                    if matches!(slot, Some(Sampled::Framebuffer(f)) if *f == h) {
                        *slot = None;
                    }
                }
                if self.render_target == Some(h) {
                    self.render_target = None;
                }
            }
            Resource::Surface(h) => {
                if let Some(surface) = self.surfaces.remove(&h.0) {
                    self.free_host_buffer(surface.data);
                }
            }
        }
    }
}

impl Drop for VulkanDevice {
    fn drop(&mut self) {
        tracing::info!("Shutting down Vulkan device");
        unsafe {
            self.device.device_wait_idle().ok();
        }

        let textures: Vec<_> = self.textures.drain().map(|(_, t)| t.pixels).collect();
        let framebuffers: Vec<_> = self.framebuffers.drain().map(|(_, f)| f).collect();
        let surfaces: Vec<_> = self.surfaces.drain().map(|(_, s)| s.data).collect();
        for buffer in textures.into_iter().chain(surfaces) {
            self.free_host_buffer(buffer);
        }
        for fb in framebuffers {
            self.free_framebuffer(fb);
        }
        let backbuffer = std::mem::replace(
            &mut self.backbuffer,
            VkFramebuffer {
                width: 0,
                height: 0,
                color: HostBuffer::empty(),
                stencil: None,
            },
        );
        self.free_framebuffer(backbuffer);

        unsafe {
            self.device.destroy_device(None);
            self.instance.destroy_instance(None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vulkan_device_when_available() {
        // Machines without a Vulkan loader simply report an error
        let Ok(mut device) = VulkanDevice::new(Arc::new(ThreadPool::new(1)), 64, 64) else {
            return;
        };
        assert!(matches!(
            device.compile_shader(ShaderStage::Fragment, "#version 450\nvoid main() {}"),
            Err(GpuError::ShaderCompilation(_))
        ));

        let fb = device
            .create_framebuffer(&FramebufferDesc {
                width: 8,
                height: 8,
                with_stencil: true,
                tag: "test",
            })
            .unwrap();
        device.bind_render_target(Some(fb)).unwrap();
        device.clear(Some(0xFF00_00FF), Some(0x80)).unwrap();
        let surface = device.create_offscreen_surface(8, 8, DataFormat::Rgba8888).unwrap();
        let pixels = device.read_framebuffer(fb, Rect::new(0, 0, 1, 1), surface).unwrap();
        assert_eq!(pixels, 0xFF00_00FFu32.to_le_bytes().to_vec());
        assert!(device.read_stencil(fb).unwrap().iter().all(|&s| s == 0x80));
    }
}
