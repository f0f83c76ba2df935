//! Oxidized-PSP - GE emulation runner
//!
//! Brings the GPU up on a headless context, drives a fixed number of frames
//! through the depalettize and framebuffer paths, and shuts down.

use anyhow::{anyhow, Context};
use clap::Parser;
use op_core::{logging, Config, GpuBackend};
use op_gpu::framebuffer::RenderFramebufferParams;
use op_gpu::{
    create_context, probe_window_system, ClutMode, GeBufferFormat, GePaletteFormat, GpuSystem, GraphicsContext,
    GraphicsEvent, PixelFormat, WindowSystem,
};
use op_memory::{GuestMemory, USER_MEM_BASE, VRAM_BASE};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Palette variants cycled through by the runner
const PALETTE_VARIANTS: u32 = 4;

const READY_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Parser, Debug)]
#[command(name = "oxidized-psp", version, about = "PSP GE emulation runner")]
struct Args {
    /// GPU backend (null, gles, software, dx9, dx11, vulkan, gx2)
    #[arg(long)]
    backend: Option<String>,

    /// Frames to run before shutting down
    #[arg(long, default_value_t = 60)]
    frames: u64,

    /// Configuration file (defaults to the platform config directory)
    #[arg(long)]
    config: Option<PathBuf>,
}

fn load_config(args: &Args) -> anyhow::Result<Config> {
    let mut config = match &args.config {
        Some(path) => Config::load_from(path).map_err(|e| anyhow!("failed to load {}: {}", path.display(), e))?,
        None => Config::load().map_err(|e| anyhow!("failed to load configuration: {}", e))?,
    };
    if let Some(name) = &args.backend {
        config.gpu.backend = GpuBackend::from_name(name).ok_or_else(|| anyhow!("unknown backend '{}'", name))?;
    }
    Ok(config)
}

fn open_context(config: &Config) -> anyhow::Result<Option<Arc<dyn GraphicsContext>>> {
    if !config.gpu.backend.requires_context() {
        return Ok(None);
    }
    let (width, height) = (config.gpu.render_width, config.gpu.render_height);
    let system = probe_window_system();
    let context = match create_context(system, width, height) {
        Ok(context) => context,
        Err(e) => {
            tracing::warn!("No {:?} context ({}), running headless", system, e);
            create_context(WindowSystem::Headless, width, height).context("failed to create headless context")?
        }
    };
    Ok(Some(context))
}

/// Fill guest RAM with one 256-entry ABGR8888 palette per variant
fn write_palettes(memory: &GuestMemory) -> anyhow::Result<()> {
    for variant in 0..PALETTE_VARIANTS {
        let palette: Vec<u8> = (0..256u32)
            .flat_map(|i| {
                let shade = (i + variant * 64) & 0xFF;
                (0xFF00_0000 | (shade << 16) | (i << 8) | shade).to_le_bytes()
            })
            .collect();
        memory.write_bytes(USER_MEM_BASE + variant * 1024, &palette)?;
    }
    Ok(())
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let config = load_config(&args)?;
    logging::init(config.debug.log_level);

    tracing::info!("Starting oxidized-psp GE runner ({} backend)", config.gpu.backend.name());

    let memory = GuestMemory::new();
    write_palettes(&memory)?;

    let context = open_context(&config)?;
    let mut gpu = GpuSystem::new();
    gpu.init(context, Arc::clone(&memory), &config)
        .with_context(|| format!("failed to initialize the {} backend", config.gpu.backend.name()))?;

    let started = Instant::now();
    while !gpu.is_ready() {
        if started.elapsed() > READY_TIMEOUT {
            tracing::warn!("Backend still warming up after {:?}, continuing", READY_TIMEOUT);
            break;
        }
        std::thread::sleep(Duration::from_millis(1));
    }

    let backend = gpu.backend_mut().ok_or_else(|| anyhow!("GPU backend missing after init"))?;
    backend.handle_event(GraphicsEvent::GotBackbuffer {
        width: config.gpu.render_width,
        height: config.gpu.render_height,
    });

    let clut_mode = ClutMode::new(GePaletteFormat::Abgr8888, 0, 0xFF, 0).raw();
    let target = RenderFramebufferParams {
        fb_address: VRAM_BASE,
        fb_stride: 512,
        format: GeBufferFormat::Rgba8888,
        width: 480,
        height: 272,
    };

    for frame in 0..args.frames {
        backend.begin_frame();
        if let Some(mut res) = backend.resources() {
            if let Err(e) = res.framebuffers.set_render_framebuffer(res.device, target) {
                tracing::warn!("Frame {}: no render target: {}", frame, e);
                res.skip_draw();
            } else {
                let variant = (frame % PALETTE_VARIANTS as u64) as u32;
                let palette = memory.read_bytes(USER_MEM_BASE + variant * 1024, 1024)?;
                if res.depalettize_shader(clut_mode, PixelFormat::Clut8).is_none() {
                    tracing::debug!("Frame {}: sampling without depalettize", frame);
                }
                res.clut_texture(GePaletteFormat::Abgr8888, variant, &palette);
                res.framebuffers
                    .set_display_framebuffer(target.fb_address, target.fb_stride, target.format);
            }
        }
        backend.end_frame();
    }

    tracing::info!("Ran {} frames: {}", args.frames, backend.stats());
    gpu.shutdown();
    Ok(())
}
