//! Command pool and command buffers with their synchronization state.
//!
//! A command buffer keeps every object its recorded commands reference pinned
//! until its fence signals. Persistent buffers are reused once per frame slot;
//! transient ones serve a single operation and are waited on before returning.

use std::any::Any;
use std::sync::Arc;

use ash::vk;

use crate::error::{vk_err, GpuResult};

use super::device::VkContext;

/// Command pool owning every command buffer of a context.
pub struct CommandPool {
    ctx: Arc<VkContext>,
    pool: vk::CommandPool,
}

impl CommandPool {
    pub fn new(ctx: &Arc<VkContext>) -> GpuResult<Arc<Self>> {
        let pool_info = vk::CommandPoolCreateInfo::default()
            .queue_family_index(ctx.graphics_queue_family())
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER);

        let pool = unsafe { ctx.device().create_command_pool(&pool_info, None) }
            .map_err(vk_err("create command pool"))?;

        Ok(Arc::new(Self {
            ctx: Arc::clone(ctx),
            pool,
        }))
    }
}

impl Drop for CommandPool {
    fn drop(&mut self) {
        unsafe { self.ctx.device().destroy_command_pool(self.pool, None) };
    }
}

/// One primary command buffer plus its fence and submission state.
pub struct CommandBuffer {
    ctx: Arc<VkContext>,
    pool: Arc<CommandPool>,
    cmd_buf: vk::CommandBuffer,
    fence: vk::Fence,
    wait_semaphores: Vec<vk::Semaphore>,
    wait_stages: Vec<vk::PipelineStageFlags>,
    signal_semaphores: Vec<vk::Semaphore>,
    pins: Vec<Arc<dyn Any>>,
    submitted: bool,
}

impl CommandBuffer {
    pub fn new(pool: &Arc<CommandPool>) -> GpuResult<Self> {
        let ctx = Arc::clone(&pool.ctx);
        let device = ctx.device();

        let alloc_info = vk::CommandBufferAllocateInfo::default()
            .command_pool(pool.pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);
        let cmd_buf = unsafe { device.allocate_command_buffers(&alloc_info) }
            .map_err(vk_err("allocate command buffer"))?[0];

        // Signaled so the first wait on a fresh buffer returns immediately.
        let fence_info = vk::FenceCreateInfo::default().flags(vk::FenceCreateFlags::SIGNALED);
        let fence = match unsafe { device.create_fence(&fence_info, None) } {
            Ok(fence) => fence,
            Err(e) => {
                unsafe { device.free_command_buffers(pool.pool, &[cmd_buf]) };
                return Err(vk_err("create fence")(e));
            }
        };

        Ok(Self {
            ctx,
            pool: Arc::clone(pool),
            cmd_buf,
            fence,
            wait_semaphores: Vec::new(),
            wait_stages: Vec::new(),
            signal_semaphores: Vec::new(),
            pins: Vec::new(),
            submitted: false,
        })
    }

    /// Allocate and begin a one-shot command buffer.
    pub fn begin_transient(pool: &Arc<CommandPool>) -> GpuResult<Self> {
        let mut cmd = Self::new(pool)?;
        cmd.begin()?;
        Ok(cmd)
    }

    /// Submit, wait for completion and release a one-shot command buffer.
    pub fn execute_transient(mut self) -> GpuResult<()> {
        self.submit()?;
        self.wait()
    }

    pub fn handle(&self) -> vk::CommandBuffer {
        self.cmd_buf
    }

    pub fn add_wait_semaphore(&mut self, semaphore: vk::Semaphore, stage: vk::PipelineStageFlags) {
        self.wait_semaphores.push(semaphore);
        self.wait_stages.push(stage);
    }

    pub fn add_signal_semaphore(&mut self, semaphore: vk::Semaphore) {
        self.signal_semaphores.push(semaphore);
    }

    /// Keep `object` alive until this command buffer has executed.
    pub fn pin(&mut self, object: Arc<dyn Any>) {
        if !self.pins.iter().any(|p| Arc::ptr_eq(p, &object)) {
            self.pins.push(object);
        }
    }

    /// Start recording. Waits for a previous submission first.
    pub fn begin(&mut self) -> GpuResult<()> {
        self.wait()?;
        let begin_info = vk::CommandBufferBeginInfo::default()
            .flags(vk::CommandBufferUsageFlags::SIMULTANEOUS_USE);
        unsafe { self.ctx.device().begin_command_buffer(self.cmd_buf, &begin_info) }
            .map_err(vk_err("begin command buffer"))
    }

    /// End recording and submit to the graphics queue.
    pub fn submit(&mut self) -> GpuResult<()> {
        let device = self.ctx.device();
        unsafe { device.end_command_buffer(self.cmd_buf) }
            .map_err(vk_err("end command buffer"))?;
        unsafe { device.reset_fences(&[self.fence]) }.map_err(vk_err("reset fence"))?;

        let cmd_bufs = [self.cmd_buf];
        let submit_info = vk::SubmitInfo::default()
            .wait_semaphores(&self.wait_semaphores)
            .wait_dst_stage_mask(&self.wait_stages)
            .command_buffers(&cmd_bufs)
            .signal_semaphores(&self.signal_semaphores);

        unsafe {
            device.queue_submit(
                self.ctx.graphics_queue(),
                std::slice::from_ref(&submit_info),
                self.fence,
            )
        }
        .map_err(vk_err("submit command buffer"))?;

        self.submitted = true;
        self.wait_semaphores.clear();
        self.wait_stages.clear();
        self.signal_semaphores.clear();
        Ok(())
    }

    /// Drop everything recorded since `begin` without submitting.
    ///
    /// Returns the semaphores the buffer would have waited on.
    pub fn abort(&mut self) -> GpuResult<Vec<vk::Semaphore>> {
        let device = self.ctx.device();
        unsafe { device.end_command_buffer(self.cmd_buf) }
            .map_err(vk_err("end command buffer"))?;
        unsafe { device.reset_command_buffer(self.cmd_buf, vk::CommandBufferResetFlags::empty()) }
            .map_err(vk_err("reset command buffer"))?;

        self.wait_stages.clear();
        self.signal_semaphores.clear();
        self.pins.clear();
        Ok(std::mem::take(&mut self.wait_semaphores))
    }

    /// Block until the last submission completed, then release pinned objects.
    pub fn wait(&mut self) -> GpuResult<()> {
        if !self.submitted {
            return Ok(());
        }
        unsafe { self.ctx.device().wait_for_fences(&[self.fence], true, u64::MAX) }
            .map_err(vk_err("wait for fence"))?;
        self.submitted = false;
        self.pins.clear();
        Ok(())
    }
}

impl Drop for CommandBuffer {
    fn drop(&mut self) {
        if let Err(e) = self.wait() {
            log::error!("Failed to wait for command buffer on release: {}", e);
        }
        unsafe {
            let device = self.ctx.device();
            device.destroy_fence(self.fence, None);
            device.free_command_buffers(self.pool.pool, &[self.cmd_buf]);
        }
    }
}
