//! GPU memory allocation through gpu-allocator.

use ash::vk;
use gpu_allocator::vulkan::{Allocation, AllocationCreateDesc, AllocationScheme, Allocator, AllocatorCreateDesc};
use gpu_allocator::MemoryLocation;

use crate::error::{GpuError, GpuResult};

use super::device::VkContext;

pub fn create_allocator(
    instance: &ash::Instance,
    physical_device: vk::PhysicalDevice,
    device: ash::Device,
) -> GpuResult<Allocator> {
    Allocator::new(&AllocatorCreateDesc {
        instance: instance.clone(),
        device,
        physical_device,
        debug_settings: Default::default(),
        buffer_device_address: false,
        allocation_sizes: gpu_allocator::AllocationSizes::default(),
    })
    .map_err(|e| GpuError::Alloc(format!("Failed to create memory allocator: {}", e)))
}

/// Allocate memory for `requirements` at `location`.
pub fn allocate(
    ctx: &VkContext,
    name: &str,
    requirements: vk::MemoryRequirements,
    location: MemoryLocation,
    linear: bool,
) -> GpuResult<Allocation> {
    let allocation = ctx.allocator().lock().allocate(&AllocationCreateDesc {
        name,
        requirements,
        location,
        linear,
        allocation_scheme: AllocationScheme::GpuAllocatorManaged,
    })?;
    Ok(allocation)
}

pub fn free(ctx: &VkContext, allocation: Allocation) {
    if let Err(e) = ctx.allocator().lock().free(allocation) {
        log::error!("Failed to free GPU allocation: {}", e);
    }
}
