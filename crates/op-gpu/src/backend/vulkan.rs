//! Vulkan backend

use super::{DeviceBackend, GpuInterface};
use crate::context::GraphicsContext;
use crate::device::VulkanDevice;
use crate::readiness::WarmUp;
use op_core::{Config, GpuBackend, GpuError, ThreadPool};
use op_memory::GuestMemory;
use std::sync::Arc;

pub type VulkanGpu = DeviceBackend<VulkanDevice>;

/// Open a Vulkan device for the context's surface
pub fn create(
    context: Arc<dyn GraphicsContext>,
    memory: Arc<GuestMemory>,
    config: &Config,
) -> Result<Box<dyn GpuInterface>, GpuError> {
    let pool = Arc::new(ThreadPool::new(config.general.parallel_threads as usize));
    let (width, height) = context.surface_size();
    let device = VulkanDevice::new(pool, width.max(1), height.max(1)).map_err(|e| {
        tracing::error!("Vulkan device unavailable: {}", e);
        e
    })?;

    // No runtime shader compiler: nothing to warm up
    let gpu: VulkanGpu = DeviceBackend::new(GpuBackend::Vulkan, device, context, memory, config, WarmUp::ready(), None)?;
    Ok(Box::new(gpu))
}
