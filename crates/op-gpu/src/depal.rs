//! Depalettization shader and CLUT texture cache
//!
//! Shaders are keyed by [`ShaderId`] and live until the cache is cleared.
//! CLUT textures are keyed by [`ClutId`] and are decimated once they have not
//! been used for [`DEPAL_TEXTURE_OLD_AGE`] frames.

use crate::cache::ResourceCache;
use crate::debug::{DebugShaderStringType, DebugShaderType};
use crate::device::{RenderDevice, ShaderHandle, ShaderStage, TextureHandle};
use crate::ge_constants::{GePaletteFormat, PixelFormat, CLUT_BYTES};
use crate::shader::{
    depal_float_supported, generate_depal_shader, generate_depal_vertex_shader, ClutId, ShaderId,
    ShaderLanguage, CLUT_TEXTURE_STAGE,
};
use op_core::GpuError;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// Frames a CLUT texture may go unused before it is decimated
pub const DEPAL_TEXTURE_OLD_AGE: u64 = 120;

/// Compiled depalettize pixel shader
pub struct DepalShader {
    pub id: ShaderId,
    pub handle: ShaderHandle,
    pub code: String,
}

/// Uploaded palette
pub struct DepalTexture {
    pub handle: TextureHandle,
    pub last_frame: u64,
}

/// Shader sources generated ahead of time, consumed on first use
#[derive(Default)]
pub struct DepalSourceStash {
    sources: Mutex<HashMap<ShaderId, String>>,
}

impl DepalSourceStash {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn insert(&self, id: ShaderId, source: String) {
        self.sources.lock().insert(id, source);
    }

    pub fn take(&self, id: ShaderId) -> Option<String> {
        self.sources.lock().remove(&id)
    }

    pub fn len(&self) -> usize {
        self.sources.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Cache counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DepalStats {
    pub shader_compiles: u64,
    pub compile_failures: u64,
    pub stash_hits: u64,
    pub clut_uploads: u64,
    pub clut_evictions: u64,
}

/// Caches both depalettize shaders and palette textures
pub struct DepalShaderCache {
    language: ShaderLanguage,
    shaders: ResourceCache<ShaderId, DepalShader>,
    textures: ResourceCache<ClutId, DepalTexture>,
    vertex_shader: Option<ShaderHandle>,
    /// Ids whose compile failed; not retried until `clear`
    failed: HashSet<ShaderId>,
    float_warned: HashSet<ShaderId>,
    stash: Option<Arc<DepalSourceStash>>,
    current_frame: u64,
    stats: DepalStats,
}

impl DepalShaderCache {
    pub fn new(language: ShaderLanguage) -> Self {
        Self {
            language,
            shaders: ResourceCache::new(),
            textures: ResourceCache::new(),
            vertex_shader: None,
            failed: HashSet::new(),
            float_warned: HashSet::new(),
            stash: None,
            current_frame: 0,
            stats: DepalStats::default(),
        }
    }

    /// Use sources pregenerated by a warm-up worker
    pub fn with_source_stash(mut self, stash: Arc<DepalSourceStash>) -> Self {
        self.stash = Some(stash);
        self
    }

    pub fn language(&self) -> ShaderLanguage {
        self.language
    }

    pub fn begin_frame(&mut self, frame: u64) {
        self.current_frame = frame;
    }

    pub fn current_frame(&self) -> u64 {
        self.current_frame
    }

    pub fn stats(&self) -> DepalStats {
        self.stats
    }

    pub fn shader_count(&self) -> usize {
        self.shaders.len()
    }

    pub fn texture_count(&self) -> usize {
        self.textures.len()
    }

    pub fn has_clut_texture(&self, format: GePaletteFormat, clut_hash: u32) -> bool {
        self.textures.contains(&ClutId::new(format, clut_hash))
    }

    pub fn shader_source(&self, clut_mode: u32, pixel_format: PixelFormat) -> Option<&str> {
        self.shaders
            .get(&ShaderId::generate(clut_mode, pixel_format))
            .map(|s| s.code.as_str())
    }

    /// Look up or build the depalettize pixel shader for the current CLUT mode.
    ///
    /// A compile failure is returned as an error; the caller should sample the
    /// texture without depalettizing instead.
    pub fn get_depalettize_shader(
        &mut self,
        device: &mut dyn RenderDevice,
        clut_mode: u32,
        pixel_format: PixelFormat,
    ) -> Result<ShaderHandle, GpuError> {
        let id = ShaderId::generate(clut_mode, pixel_format);
        if let Some(shader) = self.shaders.get(&id) {
            return Ok(shader.handle);
        }
        if self.failed.contains(&id) {
            return Err(GpuError::ShaderCompilation(format!(
                "depal shader {} failed to compile earlier",
                id
            )));
        }

        let code = match self.stash.as_ref().and_then(|stash| stash.take(id)) {
            Some(code) => {
                self.stats.stash_hits += 1;
                code
            }
            None => generate_depal_shader(id, self.language),
        };

        if !self.language.has_integer_ops() && !depal_float_supported(id) && self.float_warned.insert(id) {
            tracing::warn!(
                "Depal shader {} ({}) uses a shift/mask the float path can not express",
                id,
                pixel_format.name()
            );
        }

        match device.compile_shader(ShaderStage::Fragment, &code) {
            Ok(handle) => {
                tracing::debug!("Compiled depal shader {} ({})", id, pixel_format.name());
                self.stats.shader_compiles += 1;
                self.shaders.insert(id, DepalShader { id, handle, code });
                Ok(handle)
            }
            Err(e) => {
                tracing::error!("Failed to compile depal shader {}: {}", id, e);
                tracing::trace!("Depal shader source:\n{}", code);
                self.stats.compile_failures += 1;
                self.failed.insert(id);
                Err(e)
            }
        }
    }

    /// The full-screen pass vertex shader, compiled on first use
    pub fn get_depalettize_vertex_shader(&mut self, device: &mut dyn RenderDevice) -> Result<ShaderHandle, GpuError> {
        if let Some(handle) = self.vertex_shader {
            return Ok(handle);
        }
        let code = generate_depal_vertex_shader(self.language);
        let handle = device.compile_shader(ShaderStage::Vertex, &code).map_err(|e| {
            tracing::error!("Failed to compile depal vertex shader: {}", e);
            e
        })?;
        self.vertex_shader = Some(handle);
        Ok(handle)
    }

    /// Look up or upload the palette and bind it to the CLUT texture stage.
    ///
    /// `raw_clut` is untrusted: it is truncated or zero-padded to the 1024-byte
    /// CLUT.
    pub fn get_clut_texture(
        &mut self,
        device: &mut dyn RenderDevice,
        clut_format: GePaletteFormat,
        clut_hash: u32,
        raw_clut: &[u8],
    ) -> Result<TextureHandle, GpuError> {
        let id = ClutId::new(clut_format, clut_hash);
        if let Some(texture) = self.textures.get_mut(&id) {
            texture.last_frame = self.current_frame;
            device.bind_texture(CLUT_TEXTURE_STAGE, texture.handle)?;
            return Ok(texture.handle);
        }

        let mut data = vec![0u8; CLUT_BYTES];
        let len = raw_clut.len().min(CLUT_BYTES);
        data[..len].copy_from_slice(&raw_clut[..len]);

        let handle = device
            .create_texture(clut_format.texture_width(), 1, clut_format.into())
            .map_err(|e| {
                tracing::warn!("Failed to create CLUT texture {}: {}", id, e);
                e
            })?;
        if let Err(e) = device.update_texture(handle, &data) {
            tracing::warn!("Failed to upload CLUT texture {}: {}", id, e);
            device.release(handle.into());
            return Err(e);
        }
        device.bind_texture(CLUT_TEXTURE_STAGE, handle)?;

        tracing::trace!("Uploaded CLUT {} ({:?})", id, clut_format);
        self.stats.clut_uploads += 1;
        self.textures.insert(
            id,
            DepalTexture {
                handle,
                last_frame: self.current_frame,
            },
        );
        Ok(handle)
    }

    /// Release CLUT textures unused for more than [`DEPAL_TEXTURE_OLD_AGE`] frames
    pub fn decimate(&mut self, device: &mut dyn RenderDevice) -> usize {
        let current = self.current_frame;
        let evicted = self
            .textures
            .evict_if(|_, tex| tex.last_frame + DEPAL_TEXTURE_OLD_AGE < current);
        for texture in &evicted {
            device.release(texture.handle.into());
        }
        if !evicted.is_empty() {
            tracing::debug!("Decimated {} CLUT textures at frame {}", evicted.len(), current);
        }
        self.stats.clut_evictions += evicted.len() as u64;
        evicted.len()
    }

    /// Release everything the cache owns
    pub fn clear(&mut self, device: &mut dyn RenderDevice) {
        for shader in self.shaders.drain() {
            device.release(shader.handle.into());
        }
        for texture in self.textures.drain() {
            device.release(texture.handle.into());
        }
        if let Some(vs) = self.vertex_shader.take() {
            device.release(vs.into());
        }
        self.failed.clear();
        self.float_warned.clear();
    }

    /// Drop every handle without releasing it; the device already lost them
    pub fn device_lost(&mut self) {
        let shaders = self.shaders.forget_all();
        let textures = self.textures.forget_all();
        self.vertex_shader = None;
        self.failed.clear();
        self.float_warned.clear();
        tracing::debug!("Depal cache forgot {} shaders and {} textures", shaders, textures);
    }

    pub fn debug_get_shader_ids(&self, kind: DebugShaderType) -> Vec<String> {
        if kind != DebugShaderType::Depal {
            return Vec::new();
        }
        let mut ids: Vec<ShaderId> = self.shaders.keys().copied().collect();
        ids.sort();
        ids.into_iter().map(|id| id.to_string()).collect()
    }

    pub fn debug_get_shader_string(
        &self,
        id: &str,
        kind: DebugShaderType,
        string_type: DebugShaderStringType,
    ) -> String {
        if kind != DebugShaderType::Depal {
            return String::new();
        }
        let Some(shader) = ShaderId::from_hex(id).and_then(|id| self.shaders.get(&id)) else {
            return String::new();
        };

        match string_type {
            DebugShaderStringType::ShortDesc => {
                let mode = shader.id.clut_mode();
                let format = shader.id.pixel_format().map_or("?", PixelFormat::name);
                format!(
                    "{} depal: {:?} palette, shift {}, mask {:02x}, start {}",
                    format,
                    mode.palette_format(),
                    mode.index_shift(),
                    mode.index_mask(),
                    mode.index_start()
                )
            }
            DebugShaderStringType::SourceCode => shader.code.clone(),
            DebugShaderStringType::Stats => format!("handle {}", shader.handle.raw()),
        }
    }
}
