//! End-to-end GPU lifecycle scenarios against the software backend

use op_core::{Config, GpuBackend, GpuError};
use op_gpu::framebuffer::RenderFramebufferParams;
use op_gpu::{
    create_context, DebugShaderStringType, DebugShaderType, GeBufferFormat, GpuSystem, GraphicsEvent,
    LifecycleState, PixelFormat, WindowSystem,
};
use op_memory::{GuestMemory, VRAM_BASE};
use std::thread;
use std::time::{Duration, Instant};

fn software_config() -> Config {
    let mut config = Config::default();
    config.gpu.backend = GpuBackend::Software;
    config
}

fn init_software() -> GpuSystem {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    let mut gpu = GpuSystem::new();
    let context = create_context(WindowSystem::Headless, 480, 272).unwrap();
    gpu.init(Some(context), GuestMemory::new(), &software_config()).unwrap();
    gpu
}

fn wait_ready(gpu: &GpuSystem) {
    let deadline = Instant::now() + Duration::from_secs(10);
    while !gpu.is_ready() {
        assert!(Instant::now() < deadline, "backend never became ready");
        thread::sleep(Duration::from_millis(1));
    }
}

#[test]
fn test_depal_scenario() {
    let mut gpu = init_software();
    wait_ready(&gpu);

    let backend = gpu.backend_mut().unwrap();
    let shader = {
        let mut res = backend.resources().unwrap();
        res.depalettize_shader(1, PixelFormat::Clut8)
    };
    assert!(shader.is_some());

    let ids = backend.debug_get_shader_ids(DebugShaderType::Depal);
    assert_eq!(ids.len(), 1);
    let source = backend.debug_get_shader_string(&ids[0], DebugShaderType::Depal, DebugShaderStringType::SourceCode);
    assert!(source.contains("pal"));
    let desc = backend.debug_get_shader_string(&ids[0], DebugShaderType::Depal, DebugShaderStringType::ShortDesc);
    assert!(desc.starts_with("CLUT8 depal"));

    backend.resources().unwrap().clear_depal_cache();
    assert!(backend.debug_get_shader_ids(DebugShaderType::Depal).is_empty());

    gpu.shutdown();
    assert!(gpu.backend().is_none());
}

#[test]
fn test_shutdown_waits_for_ready() {
    let mut gpu = init_software();
    let probe = gpu.ready_probe().unwrap();
    // Shutdown immediately, possibly while warm-up is still running
    gpu.shutdown();
    assert!(probe.is_ready());
    assert_eq!(gpu.state(), LifecycleState::Uninitialized);
    assert!(gpu.backend().is_none());
}

#[test]
fn test_reinit_after_shutdown() {
    let mut gpu = init_software();
    gpu.shutdown();
    let context = create_context(WindowSystem::Headless, 480, 272).unwrap();
    assert!(gpu.init(Some(context), GuestMemory::new(), &software_config()).is_ok());
    assert_eq!(gpu.state(), LifecycleState::Ready);
}

#[test]
fn test_frames_survive_device_loss() {
    let mut gpu = init_software();
    wait_ready(&gpu);
    let backend = gpu.backend_mut().unwrap();
    let params = RenderFramebufferParams {
        fb_address: VRAM_BASE,
        fb_stride: 512,
        format: GeBufferFormat::Rgba8888,
        width: 480,
        height: 272,
    };

    for _ in 0..3 {
        backend.begin_frame();
        let res = backend.resources().unwrap();
        res.framebuffers.set_render_framebuffer(res.device, params).unwrap();
        res.framebuffers.set_display_framebuffer(VRAM_BASE, 512, GeBufferFormat::Rgba8888);
        backend.end_frame();
    }
    assert_eq!(backend.frame(), 3);

    backend.device_lost();
    backend.device_restore().unwrap();
    backend.handle_event(GraphicsEvent::GotBackbuffer { width: 960, height: 544 });
    backend.begin_frame();
    let res = backend.resources().unwrap();
    assert_eq!(res.framebuffers.vfb_count(), 0);
    assert!(res.framebuffers.set_render_framebuffer(res.device, params).is_ok());
    backend.end_frame();
    assert_eq!(backend.stats().frames, 4);
}

#[test]
fn test_unavailable_backend_reports_error() {
    let mut gpu = GpuSystem::new();
    let mut config = Config::default();
    config.gpu.backend = GpuBackend::Gx2;
    let context = create_context(WindowSystem::Headless, 480, 272).unwrap();
    let result = gpu.init(Some(context), GuestMemory::new(), &config);
    assert!(matches!(result, Err(GpuError::BackendUnavailable(GpuBackend::Gx2))));
    assert!(!gpu.is_ready());
}
