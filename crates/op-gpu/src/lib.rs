//! GE graphics emulation for oxidized-psp
//!
//! The GE's palette and framebuffer state is mapped onto a host render
//! device. Derived objects (depalettize shaders, CLUT textures, render
//! targets) are cached by keys computed from guest register state and
//! decimated by age once per frame.

pub mod backend;
pub mod cache;
pub mod context;
pub mod debug;
pub mod depal;
pub mod device;
pub mod framebuffer;
pub mod ge_constants;
pub mod lifecycle;
pub mod readiness;
pub mod shader;
pub mod stats;

pub use backend::{create_backend, GpuInterface, GpuResources};
pub use cache::ResourceCache;
pub use context::{create_context, probe_window_system, GraphicsContext, GraphicsEvent, HeadlessContext, WindowSystem};
pub use debug::{DebugShaderStringType, DebugShaderType, GpuDebugBuffer, GpuDebugBufferFormat};
pub use depal::{DepalShaderCache, DEPAL_TEXTURE_OLD_AGE};
pub use device::{RenderDevice, SoftwareDevice, VulkanDevice};
pub use framebuffer::{FramebufferManager, VfbId, FBO_OLD_AGE};
pub use ge_constants::{ClutMode, GeBufferFormat, GePaletteFormat, PixelFormat};
pub use lifecycle::{GpuSystem, LifecycleState};
pub use readiness::{CancelToken, ReadyProbe, WarmUp};
pub use shader::{ClutId, ShaderId, ShaderLanguage};
pub use stats::GpuStats;
