//! Host graphics context
//!
//! The host windowing layer supplies the display and presentation surface the
//! backends render into. Platform implementations are picked by probing the
//! host at runtime instead of at compile time.

use op_core::GpuError;
use parking_lot::Mutex;
use std::sync::Arc;

/// Host windowing systems
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WindowSystem {
    Win32,
    Cocoa,
    Android,
    Wayland,
    X11,
    Headless,
}

/// Backbuffer notifications from the host
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GraphicsEvent {
    GotBackbuffer { width: u32, height: u32 },
    LostBackbuffer,
}

/// Platform display/surface provider
pub trait GraphicsContext: Send + Sync {
    fn window_system(&self) -> WindowSystem;

    fn open_display(&self) -> Result<(), GpuError>;

    fn create_surface(&self, width: u32, height: u32) -> Result<(), GpuError>;

    /// Current surface size, `(0, 0)` without a surface
    fn surface_size(&self) -> (u32, u32);

    fn teardown(&self);
}

/// Report the windowing system of the running host
pub fn probe_window_system() -> WindowSystem {
    if cfg!(target_os = "windows") {
        WindowSystem::Win32
    } else if cfg!(target_os = "macos") {
        WindowSystem::Cocoa
    } else if cfg!(target_os = "android") {
        WindowSystem::Android
    } else if std::env::var_os("WAYLAND_DISPLAY").is_some() {
        WindowSystem::Wayland
    } else if std::env::var_os("DISPLAY").is_some() {
        WindowSystem::X11
    } else {
        WindowSystem::Headless
    }
}

/// Build a context for `system` with an initial `width` x `height` surface
pub fn create_context(system: WindowSystem, width: u32, height: u32) -> Result<Arc<dyn GraphicsContext>, GpuError> {
    match system {
        WindowSystem::Headless => {
            let context = HeadlessContext::new();
            context.open_display()?;
            context.create_surface(width, height)?;
            Ok(Arc::new(context))
        }
        other => Err(GpuError::Unsupported(format!(
            "no graphics context implementation for {:?}",
            other
        ))),
    }
}

#[derive(Default)]
struct HeadlessState {
    display_open: bool,
    surface: Option<(u32, u32)>,
}

/// Context with an off-screen surface and no window
#[derive(Default)]
pub struct HeadlessContext {
    state: Mutex<HeadlessState>,
}

impl HeadlessContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_display_open(&self) -> bool {
        self.state.lock().display_open
    }
}

impl GraphicsContext for HeadlessContext {
    fn window_system(&self) -> WindowSystem {
        WindowSystem::Headless
    }

    fn open_display(&self) -> Result<(), GpuError> {
        self.state.lock().display_open = true;
        tracing::debug!("Headless display opened");
        Ok(())
    }

    fn create_surface(&self, width: u32, height: u32) -> Result<(), GpuError> {
        let mut state = self.state.lock();
        if !state.display_open {
            return Err(GpuError::Unsupported("surface requested before display was opened".to_string()));
        }
        if width == 0 || height == 0 {
            return Err(GpuError::ResourceExhausted(format!("invalid surface size {}x{}", width, height)));
        }
        state.surface = Some((width, height));
        Ok(())
    }

    fn surface_size(&self) -> (u32, u32) {
        self.state.lock().surface.unwrap_or((0, 0))
    }

    fn teardown(&self) {
        let mut state = self.state.lock();
        state.surface = None;
        state.display_open = false;
        tracing::debug!("Headless context torn down");
    }
}
