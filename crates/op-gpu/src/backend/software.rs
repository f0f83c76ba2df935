//! Software backend
//!
//! Renders with the CPU reference device. Warm-up pregenerates depalettize
//! shader sources for the common CLUT modes on a background worker.

use super::{DeviceBackend, GpuInterface};
use crate::context::GraphicsContext;
use crate::depal::DepalSourceStash;
use crate::device::{RenderDevice, SoftwareDevice};
use crate::ge_constants::{ClutMode, GePaletteFormat, PixelFormat};
use crate::readiness::WarmUp;
use crate::shader::{generate_depal_shader, ShaderId, ShaderLanguage};
use op_core::{Config, GpuBackend, GpuError, ThreadPool};
use op_memory::GuestMemory;
use std::sync::Arc;

pub type SoftwareGpu = DeviceBackend<SoftwareDevice>;

/// Source formats pregenerated at startup, with the index mask each uses
const WARM_UP_FORMATS: [(PixelFormat, u32); 6] = [
    (PixelFormat::Clut4, 0x0F),
    (PixelFormat::Clut8, 0xFF),
    (PixelFormat::Rgba8888, 0xFF),
    (PixelFormat::Rgba5551, 0xFF),
    (PixelFormat::Rgba4444, 0xFF),
    (PixelFormat::Rgb565, 0xFF),
];

/// CLUT modes and source formats the warm-up worker pregenerates
pub fn warm_up_keys() -> Vec<(u32, PixelFormat)> {
    let palettes = [
        GePaletteFormat::Bgr5650,
        GePaletteFormat::Abgr5551,
        GePaletteFormat::Abgr4444,
        GePaletteFormat::Abgr8888,
    ];
    palettes
        .into_iter()
        .flat_map(|palette| {
            WARM_UP_FORMATS
                .iter()
                .map(move |&(format, mask)| (ClutMode::new(palette, 0, mask, 0).raw(), format))
        })
        .collect()
}

fn spawn_warm_up(stash: Arc<DepalSourceStash>, language: ShaderLanguage) -> WarmUp {
    WarmUp::spawn("depal-warmup", move |token| {
        let keys = warm_up_keys();
        let total = keys.len();
        for (done, (clut_mode, format)) in keys.into_iter().enumerate() {
            if token.is_cancelled() {
                tracing::debug!("Depal warm-up cancelled after {}/{} shaders", done, total);
                return;
            }
            let id = ShaderId::generate(clut_mode, format);
            stash.insert(id, generate_depal_shader(id, language));
        }
        tracing::debug!("Depal warm-up generated {} shader sources", total);
    })
}

/// Build the software backend for the context's surface
pub fn create(
    context: Arc<dyn GraphicsContext>,
    memory: Arc<GuestMemory>,
    config: &Config,
) -> Result<Box<dyn GpuInterface>, GpuError> {
    let pool = Arc::new(ThreadPool::new(config.general.parallel_threads as usize));
    let (width, height) = match context.surface_size() {
        (0, _) | (_, 0) => (config.gpu.render_width.max(1), config.gpu.render_height.max(1)),
        size => size,
    };
    let device = SoftwareDevice::new(pool, width, height);

    let (warm_up, stash) = if config.gpu.precompile_depal_shaders {
        let stash = DepalSourceStash::new();
        let warm_up = spawn_warm_up(Arc::clone(&stash), device.caps().shader_language);
        (warm_up, Some(stash))
    } else {
        (WarmUp::ready(), None)
    };

    let gpu: SoftwareGpu = DeviceBackend::new(GpuBackend::Software, device, context, memory, config, warm_up, stash)?;
    Ok(Box::new(gpu))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{create_context, WindowSystem};
    use std::time::{Duration, Instant};

    fn wait_ready(gpu: &dyn GpuInterface) {
        let deadline = Instant::now() + Duration::from_secs(10);
        while !gpu.is_ready() && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(1));
        }
        assert!(gpu.is_ready());
    }

    #[test]
    fn test_warm_up_keys_are_distinct() {
        let keys = warm_up_keys();
        assert_eq!(keys.len(), 24);
        let ids: std::collections::HashSet<ShaderId> =
            keys.iter().map(|&(mode, fmt)| ShaderId::generate(mode, fmt)).collect();
        assert_eq!(ids.len(), keys.len());
    }

    #[test]
    fn test_warm_up_feeds_the_depal_cache() {
        let context = create_context(WindowSystem::Headless, 480, 272).unwrap();
        let mut gpu = create(context, GuestMemory::new(), &Config::default()).unwrap();
        wait_ready(gpu.as_ref());

        let (mode, format) = warm_up_keys()[1];
        let mut res = gpu.resources().unwrap();
        assert!(res.depalettize_shader(mode, format).is_some());
        assert_eq!(res.depal.stats().stash_hits, 1);
    }

    #[test]
    fn test_without_precompile_is_ready_at_once() {
        let mut config = Config::default();
        config.gpu.precompile_depal_shaders = false;
        let context = create_context(WindowSystem::Headless, 480, 272).unwrap();
        let gpu = create(context, GuestMemory::new(), &config).unwrap();
        assert!(gpu.is_ready());
    }
}
