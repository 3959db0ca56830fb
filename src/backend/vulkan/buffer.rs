//! Linear GPU buffers.

use std::sync::Arc;

use ash::vk;
use gpu_allocator::vulkan::Allocation;
use gpu_allocator::MemoryLocation;
use parking_lot::{MappedMutexGuard, Mutex, MutexGuard};

use crate::error::{vk_err, GpuError, GpuResult};
use crate::types::BufferUsage;

use super::allocator;
use super::command::{CommandBuffer, CommandPool};
use super::conversion::convert_buffer_usage;
use super::device::VkContext;

/// Memory location implied by a buffer's usage.
pub fn memory_location(usage: BufferUsage) -> MemoryLocation {
    if usage.contains(BufferUsage::MAP_READ) {
        MemoryLocation::GpuToCpu
    } else if usage.intersects(BufferUsage::MAP_WRITE | BufferUsage::DYNAMIC) {
        MemoryLocation::CpuToGpu
    } else {
        MemoryLocation::GpuOnly
    }
}

/// A device buffer and the memory backing it.
pub struct Buffer {
    ctx: Arc<VkContext>,
    buffer: vk::Buffer,
    allocation: Mutex<Option<Allocation>>,
    size: u64,
    usage: BufferUsage,
}

impl std::fmt::Debug for Buffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Buffer")
            .field("buffer", &self.buffer)
            .field("size", &self.size)
            .field("usage", &self.usage)
            .finish()
    }
}

impl Buffer {
    pub fn new(ctx: &Arc<VkContext>, size: u64, usage: BufferUsage) -> GpuResult<Self> {
        if size == 0 {
            return Err(GpuError::InvalidArg("buffer size must be positive".to_string()));
        }

        let device = ctx.device();
        let buffer_info = vk::BufferCreateInfo::default()
            .size(size)
            .usage(convert_buffer_usage(usage))
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        let buffer = unsafe { device.create_buffer(&buffer_info, None) }
            .map_err(vk_err("create buffer"))?;

        let requirements = unsafe { device.get_buffer_memory_requirements(buffer) };
        let allocation =
            match allocator::allocate(ctx, "buffer", requirements, memory_location(usage), true) {
                Ok(allocation) => allocation,
                Err(e) => {
                    unsafe { device.destroy_buffer(buffer, None) };
                    return Err(e);
                }
            };

        if let Err(e) =
            unsafe { device.bind_buffer_memory(buffer, allocation.memory(), allocation.offset()) }
        {
            allocator::free(ctx, allocation);
            unsafe { device.destroy_buffer(buffer, None) };
            return Err(vk_err("bind buffer memory")(e));
        }

        Ok(Self {
            ctx: Arc::clone(ctx),
            buffer,
            allocation: Mutex::new(Some(allocation)),
            size,
            usage,
        })
    }

    pub fn handle(&self) -> vk::Buffer {
        self.buffer
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn usage(&self) -> BufferUsage {
        self.usage
    }

    pub fn is_host_visible(&self) -> bool {
        self.usage.is_host_visible()
    }

    fn check_range(&self, offset: u64, len: u64) -> GpuResult<()> {
        match offset.checked_add(len) {
            Some(end) if end <= self.size => Ok(()),
            _ => Err(GpuError::InvalidArg(format!(
                "range {}+{} exceeds buffer size {}",
                offset, len, self.size
            ))),
        }
    }

    /// Write `data` at `offset`.
    ///
    /// Host-visible buffers are written through their mapping; others go
    /// through a staging buffer and a synchronous transfer.
    pub fn upload(&self, pool: &Arc<CommandPool>, data: &[u8], offset: u64) -> GpuResult<()> {
        self.check_range(offset, data.len() as u64)?;
        if data.is_empty() {
            return Ok(());
        }

        if self.is_host_visible() {
            let mut mapped = self.map(offset, data.len() as u64)?;
            mapped.copy_from_slice(data);
            return Ok(());
        }

        if !self.usage.contains(BufferUsage::TRANSFER_DST) {
            return Err(GpuError::InvalidArg(
                "device-local buffer upload requires TRANSFER_DST usage".to_string(),
            ));
        }

        let staging = Buffer::new(
            &self.ctx,
            data.len() as u64,
            BufferUsage::TRANSFER_SRC | BufferUsage::MAP_WRITE,
        )?;
        staging.map(0, data.len() as u64)?.copy_from_slice(data);

        let cmd = CommandBuffer::begin_transient(pool)?;
        let region = vk::BufferCopy {
            src_offset: 0,
            dst_offset: offset,
            size: data.len() as u64,
        };
        unsafe {
            self.ctx
                .device()
                .cmd_copy_buffer(cmd.handle(), staging.buffer, self.buffer, &[region]);
        }
        cmd.execute_transient()
    }

    /// Borrow `size` mapped bytes starting at `offset`.
    pub fn map(&self, offset: u64, size: u64) -> GpuResult<MappedMutexGuard<'_, [u8]>> {
        self.check_range(offset, size)?;
        let start = offset as usize;
        let end = (offset + size) as usize;
        MutexGuard::try_map(self.allocation.lock(), |allocation| {
            allocation.as_mut()?.mapped_slice_mut()?.get_mut(start..end)
        })
        .map_err(|_| GpuError::InvalidArg("buffer memory is not host-visible".to_string()))
    }

    /// Allocations stay persistently mapped; releasing the guard is enough.
    pub fn unmap(&self) {}

    /// Copy the first `dst.len()` bytes of the buffer into `dst`.
    pub fn read(&self, dst: &mut [u8]) -> GpuResult<()> {
        let mapped = self.map(0, dst.len() as u64)?;
        dst.copy_from_slice(&mapped);
        Ok(())
    }
}

impl Drop for Buffer {
    fn drop(&mut self) {
        unsafe { self.ctx.device().destroy_buffer(self.buffer, None) };
        if let Some(allocation) = self.allocation.get_mut().take() {
            allocator::free(&self.ctx, allocation);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_location_from_usage() {
        assert_eq!(
            memory_location(BufferUsage::MAP_READ | BufferUsage::TRANSFER_DST),
            MemoryLocation::GpuToCpu
        );
        assert_eq!(
            memory_location(BufferUsage::MAP_WRITE | BufferUsage::TRANSFER_SRC),
            MemoryLocation::CpuToGpu
        );
        assert_eq!(
            memory_location(BufferUsage::DYNAMIC | BufferUsage::UNIFORM),
            MemoryLocation::CpuToGpu
        );
        assert_eq!(
            memory_location(BufferUsage::VERTEX | BufferUsage::TRANSFER_DST),
            MemoryLocation::GpuOnly
        );
    }
}
