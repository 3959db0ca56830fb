//! The Vulkan GPU context: frame loop, default render targets, swapchain
//! management and the entry points of every resource operation.

use std::any::Any;
use std::sync::Arc;

use ash::vk;
use parking_lot::MappedMutexGuard;

use crate::backend::traits::{
    flip_cull_mode, mat4_mul, GpuBackend, IDENTITY_MATRIX, VK_CLIP_CORRECTION,
};
use crate::config::GpuConfig;
use crate::error::{vk_err, GpuError, GpuResult};
use crate::types::{
    BufferUsage, ColorAttachment, ColorAttachmentDesc, CullMode, DepthStencilAttachment,
    DepthStencilDesc, Features, Format, FormatFeatures, Limits, LoadOp, PipelineParams,
    PipelineResources, ProgramParams, RenderTargetDesc, RenderTargetParams, Scissor, StoreOp,
    TextureParams, TextureUsage, Viewport,
};

use super::buffer::Buffer;
use super::command::{CommandBuffer, CommandPool};
use super::conversion::{
    convert_format, convert_index_format, convert_vk_format, convert_vk_format_features,
};
use super::device::VkContext;
use super::layout::TextureLayout;
use super::pipeline::{DrawState, Pipeline};
use super::program::{Program, ShaderCompiler};
use super::rendertarget::RenderTarget;
use super::swapchain::{plan_rebuild, RebuildAction, Swapchain};
use super::texture::{Texture, TextureWrapParams};
use super::ycbcr::{YcbcrParams, YcbcrSampler, YcbcrSamplerCache, YcbcrSamplerSlot};

/// Format of offscreen default color attachments.
const OFFSCREEN_COLOR_FORMAT: Format = Format::R8G8B8A8Unorm;

/// Stages that wait on a previous update submission.
const UPDATE_WAIT_STAGES: vk::PipelineStageFlags = vk::PipelineStageFlags::from_raw(
    vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT.as_raw()
        | vk::PipelineStageFlags::COMPUTE_SHADER.as_raw()
        | vk::PipelineStageFlags::TRANSFER.as_raw(),
);

/// Full-size viewport when none (or an empty one) is given.
pub fn effective_viewport(viewport: Option<Viewport>, width: u32, height: u32) -> Viewport {
    match viewport {
        Some(viewport) if !viewport.is_empty() => viewport,
        _ => Viewport::new(0, 0, width as i32, height as i32),
    }
}

/// Command buffer currently recording.
enum CurrentCmd {
    None,
    Update,
    Draw,
    /// Opened by a render pass begun outside a frame.
    Transient(CommandBuffer),
}

/// Per in-flight frame synchronization objects.
struct FrameSlot {
    ctx: Arc<VkContext>,
    update_cmd: CommandBuffer,
    draw_cmd: CommandBuffer,
    image_available: vk::Semaphore,
    update_finished: vk::Semaphore,
    render_finished: vk::Semaphore,
}

impl FrameSlot {
    fn new(ctx: &Arc<VkContext>, pool: &Arc<CommandPool>) -> GpuResult<Self> {
        let update_cmd = CommandBuffer::new(pool)?;
        let draw_cmd = CommandBuffer::new(pool)?;
        let mut slot = Self {
            ctx: Arc::clone(ctx),
            update_cmd,
            draw_cmd,
            image_available: vk::Semaphore::null(),
            update_finished: vk::Semaphore::null(),
            render_finished: vk::Semaphore::null(),
        };
        slot.image_available = slot.create_semaphore()?;
        slot.update_finished = slot.create_semaphore()?;
        slot.render_finished = slot.create_semaphore()?;
        Ok(slot)
    }

    fn create_semaphore(&self) -> GpuResult<vk::Semaphore> {
        let info = vk::SemaphoreCreateInfo::default();
        unsafe { self.ctx.device().create_semaphore(&info, None) }
            .map_err(vk_err("create semaphore"))
    }

    fn wait(&mut self) -> GpuResult<()> {
        self.update_cmd.wait()?;
        self.draw_cmd.wait()
    }
}

impl Drop for FrameSlot {
    fn drop(&mut self) {
        if let Err(e) = self.wait() {
            log::error!("Failed to wait for frame commands on release: {}", e);
        }
        let device = self.ctx.device();
        for semaphore in [
            self.image_available,
            self.update_finished,
            self.render_finished,
        ] {
            if semaphore != vk::Semaphore::null() {
                unsafe { device.destroy_semaphore(semaphore, None) };
            }
        }
    }
}

/// Attachments and render targets behind one default render target slot.
struct RenderResources {
    color: Arc<Texture>,
    _ms_color: Option<Arc<Texture>>,
    _depth_stencil: Arc<Texture>,
    rt: Arc<RenderTarget>,
    rt_load: Arc<RenderTarget>,
}

/// Vulkan implementation of [`GpuBackend`].
pub struct GpuContextVk {
    config: GpuConfig,
    ctx: Arc<VkContext>,
    cmd_pool: Arc<CommandPool>,
    frames: Vec<FrameSlot>,
    cur_frame: usize,
    cur_cmd: CurrentCmd,
    /// Semaphores the next submission must wait on.
    pending_wait_sems: Vec<vk::Semaphore>,

    swapchain: Option<Swapchain>,
    need_swapchain_rebuild: bool,
    width: u32,
    height: u32,
    /// Default render target slot of the current frame.
    cur_resources: usize,
    resources: Vec<RenderResources>,
    default_rt_desc: RenderTargetDesc,
    current_rt: Option<Arc<RenderTarget>>,

    viewport: Viewport,
    scissor: Scissor,

    capture: Option<Arc<Buffer>>,
    capture_data: Vec<u8>,
    query_pool: vk::QueryPool,

    dummy_texture: Arc<Texture>,
    ycbcr_cache: YcbcrSamplerCache,
    shader_compiler: ShaderCompiler,
}

fn current_cmd<'a>(
    cur_cmd: &'a mut CurrentCmd,
    frame: &'a mut FrameSlot,
) -> Option<&'a mut CommandBuffer> {
    match cur_cmd {
        CurrentCmd::None => None,
        CurrentCmd::Update => Some(&mut frame.update_cmd),
        CurrentCmd::Draw => Some(&mut frame.draw_cmd),
        CurrentCmd::Transient(cmd) => Some(cmd),
    }
}

impl GpuContextVk {
    fn create_dummy_texture(
        ctx: &Arc<VkContext>,
        pool: &Arc<CommandPool>,
    ) -> GpuResult<Arc<Texture>> {
        let params = TextureParams::new_2d(
            1,
            1,
            Format::R8G8B8A8Unorm,
            TextureUsage::SAMPLED | TextureUsage::STORAGE | TextureUsage::TRANSFER_DST,
        );
        let texture = Texture::new(ctx, pool, &params)?;
        let mut cmd = CommandBuffer::begin_transient(pool)?;
        texture.upload(&mut cmd, &[0u8; 4], 0)?;
        cmd.execute_transient()?;
        Ok(texture)
    }

    fn create_query_pool(ctx: &VkContext) -> GpuResult<vk::QueryPool> {
        let info = vk::QueryPoolCreateInfo::default()
            .query_type(vk::QueryType::TIMESTAMP)
            .query_count(2);
        unsafe { ctx.device().create_query_pool(&info, None) }.map_err(vk_err("create query pool"))
    }

    fn color_format(&self) -> Format {
        match &self.swapchain {
            Some(swapchain) => convert_vk_format(swapchain.format()),
            None => OFFSCREEN_COLOR_FORMAT,
        }
    }

    fn build_default_rt_desc(&self) -> RenderTargetDesc {
        RenderTargetDesc {
            samples: self.config.samples,
            colors: vec![ColorAttachmentDesc {
                format: self.color_format(),
                resolve: self.config.samples > 0,
            }],
            depth_stencil: Some(DepthStencilDesc {
                format: self.ctx.preferred_depth_stencil_format(),
                resolve: false,
            }),
        }
    }

    fn create_render_resource(&self, color: Arc<Texture>) -> GpuResult<RenderResources> {
        let samples = self.config.samples;
        let depth_params = TextureParams::new_2d(
            self.width,
            self.height,
            self.ctx.preferred_depth_stencil_format(),
            TextureUsage::DEPTH_STENCIL_ATTACHMENT,
        )
        .with_samples(samples);
        let depth_stencil = Texture::new(&self.ctx, &self.cmd_pool, &depth_params)?;

        let ms_color = if samples > 0 {
            let params = TextureParams::new_2d(
                self.width,
                self.height,
                color.params().format,
                TextureUsage::COLOR_ATTACHMENT,
            )
            .with_samples(samples);
            Some(Texture::new(&self.ctx, &self.cmd_pool, &params)?)
        } else {
            None
        };

        let build = |load_op: LoadOp| -> GpuResult<Arc<RenderTarget>> {
            let target = ms_color.clone().unwrap_or_else(|| Arc::clone(&color));
            let mut attachment = ColorAttachment::new(target)
                .with_load_op(load_op)
                .with_clear_value(self.config.clear_color);
            if ms_color.is_some() {
                attachment = attachment.with_resolve_target(Arc::clone(&color));
            }
            let mut depth = DepthStencilAttachment::new(Arc::clone(&depth_stencil));
            depth.load_op = load_op;
            depth.store_op = StoreOp::Store;
            let params = RenderTargetParams {
                width: self.width,
                height: self.height,
                colors: vec![attachment],
                depth_stencil: Some(depth),
            };
            Ok(Arc::new(RenderTarget::new(&self.ctx, params)?))
        };

        let rt = build(LoadOp::Clear)?;
        let rt_load = build(LoadOp::Load)?;
        Ok(RenderResources {
            color,
            _ms_color: ms_color,
            _depth_stencil: depth_stencil,
            rt,
            rt_load,
        })
    }

    /// One resource set per in-flight frame offscreen, per swapchain image
    /// onscreen.
    fn create_render_resources(&mut self) -> GpuResult<()> {
        let mut colors = Vec::new();
        match &self.swapchain {
            Some(swapchain) => {
                let format = convert_vk_format(swapchain.format());
                for &image in swapchain.images() {
                    let params = TextureParams::new_2d(
                        self.width,
                        self.height,
                        format,
                        TextureUsage::COLOR_ATTACHMENT | TextureUsage::TRANSFER_SRC,
                    );
                    let wrap = TextureWrapParams::new(params, image, TextureLayout::Undefined);
                    colors.push(Texture::wrap(&self.ctx, wrap)?);
                }
            }
            None => {
                let params = TextureParams::new_2d(
                    self.width,
                    self.height,
                    OFFSCREEN_COLOR_FORMAT,
                    TextureUsage::COLOR_ATTACHMENT | TextureUsage::TRANSFER_SRC,
                );
                for _ in 0..self.frames.len() {
                    colors.push(Texture::new(&self.ctx, &self.cmd_pool, &params)?);
                }
            }
        }

        let resources = colors
            .into_iter()
            .map(|color| self.create_render_resource(color))
            .collect::<GpuResult<Vec<_>>>()?;
        self.resources = resources;
        self.default_rt_desc = self.build_default_rt_desc();
        Ok(())
    }

    fn create_capture_buffer(&mut self) -> GpuResult<()> {
        let size = self.width as u64 * self.height as u64 * 4;
        let buffer = Buffer::new(
            &self.ctx,
            size,
            BufferUsage::MAP_READ | BufferUsage::TRANSFER_DST,
        )?;
        self.capture = Some(Arc::new(buffer));
        self.capture_data = vec![0; size as usize];
        Ok(())
    }

    /// Recreate the swapchain and its render resources at the current size.
    ///
    /// A surface reporting a zero extent (minimized window) leaves everything
    /// untouched and keeps the rebuild pending.
    fn rebuild_swapchain(&mut self) -> GpuResult<()> {
        self.ctx.wait_idle()?;

        let caps = self.ctx.surface_capabilities()?;
        if plan_rebuild(caps.current_extent) == RebuildAction::Postpone {
            log::debug!("Surface has a zero extent, postponing swapchain rebuild");
            self.need_swapchain_rebuild = true;
            return Ok(());
        }

        for frame in &mut self.frames {
            frame.wait()?;
        }
        self.resources.clear();
        self.swapchain = None;

        let swapchain = Swapchain::new(
            &self.ctx,
            self.width,
            self.height,
            self.config.swap_interval,
        )?;
        let extent = swapchain.extent();
        self.width = extent.width;
        self.height = extent.height;
        self.swapchain = Some(swapchain);
        self.create_render_resources()?;
        self.need_swapchain_rebuild = false;
        Ok(())
    }

    fn acquire_image(&mut self) -> GpuResult<()> {
        if self.need_swapchain_rebuild {
            self.rebuild_swapchain()?;
        }

        let semaphore = self.frames[self.cur_frame].image_available;
        let acquired = match &self.swapchain {
            Some(swapchain) => swapchain.acquire(semaphore)?,
            None => return Err(GpuError::Generic("no swapchain to acquire from".to_string())),
        };
        let index = match acquired {
            Some(index) => index,
            None => {
                self.rebuild_swapchain()?;
                self.swapchain
                    .as_ref()
                    .map(|swapchain| swapchain.acquire(semaphore))
                    .transpose()?
                    .flatten()
                    .ok_or_else(|| {
                        GpuError::Generic("swapchain still out of date after rebuild".to_string())
                    })?
            }
        };
        self.cur_resources = index as usize;

        let frame = &mut self.frames[self.cur_frame];
        frame
            .draw_cmd
            .add_wait_semaphore(semaphore, vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT);
        frame.draw_cmd.add_signal_semaphore(frame.render_finished);
        Ok(())
    }

    fn add_pending_wait_semaphores(&mut self) {
        let frame = &mut self.frames[self.cur_frame];
        let Some(cmd) = current_cmd(&mut self.cur_cmd, frame) else {
            return;
        };
        for semaphore in self.pending_wait_sems.drain(..) {
            cmd.add_wait_semaphore(semaphore, UPDATE_WAIT_STAGES);
        }
    }

    fn cmd(&mut self) -> Option<&mut CommandBuffer> {
        current_cmd(&mut self.cur_cmd, &mut self.frames[self.cur_frame])
    }

    fn require_cmd(&mut self, what: &str) -> GpuResult<&mut CommandBuffer> {
        let frame = &mut self.frames[self.cur_frame];
        current_cmd(&mut self.cur_cmd, frame)
            .ok_or_else(|| GpuError::InvalidArg(format!("{} outside of a frame", what)))
    }

    /// Run `f` on the recording command buffer, or on a transient one that
    /// completes before returning.
    fn with_cmd<R>(&mut self, f: impl FnOnce(&mut CommandBuffer) -> GpuResult<R>) -> GpuResult<R> {
        if let Some(cmd) = self.cmd() {
            return f(cmd);
        }
        let mut cmd = CommandBuffer::begin_transient(&self.cmd_pool)?;
        let result = f(&mut cmd);
        let executed = cmd.execute_transient();
        let value = result?;
        executed?;
        Ok(value)
    }

    fn draw_state(&self) -> GpuResult<DrawState> {
        let rt = self
            .current_rt
            .as_ref()
            .ok_or_else(|| GpuError::InvalidArg("draw outside of a render pass".to_string()))?;
        Ok(DrawState {
            frame: self.cur_frame,
            viewport: self.viewport,
            scissor: self.scissor,
            rt_width: rt.width(),
            rt_height: rt.height(),
        })
    }

    pub fn vk_context(&self) -> &Arc<VkContext> {
        &self.ctx
    }

    pub fn nb_in_flight_frames(&self) -> usize {
        self.frames.len()
    }

    /// Frame slot being recorded, which selects the descriptor set.
    pub fn current_frame(&self) -> usize {
        self.cur_frame
    }

    pub fn dummy_texture(&self) -> &Arc<Texture> {
        &self.dummy_texture
    }

    /// Adopt an image created outside the context, such as a decoded video frame.
    pub fn wrap_texture(&mut self, wrap: TextureWrapParams) -> GpuResult<Arc<Texture>> {
        Texture::wrap(&self.ctx, wrap)
    }

    /// Shared sampler for `params`, created on first use.
    pub fn ycbcr_sampler(&mut self, params: &YcbcrParams) -> GpuResult<Arc<YcbcrSampler>> {
        if !self.ctx.ycbcr_supported() {
            return Err(GpuError::Unsupported(
                "YCbCr sampler conversion is not supported by the device".to_string(),
            ));
        }
        self.ycbcr_cache.get_or_create(&self.ctx, params)
    }

    /// Point `slot` at the sampler for `params`, keeping its current one when
    /// compatible.
    pub fn update_ycbcr_slot(
        &mut self,
        slot: &mut YcbcrSamplerSlot,
        params: &YcbcrParams,
    ) -> GpuResult<Arc<YcbcrSampler>> {
        if !self.ctx.ycbcr_supported() {
            return Err(GpuError::Unsupported(
                "YCbCr sampler conversion is not supported by the device".to_string(),
            ));
        }
        slot.update(&mut self.ycbcr_cache, &self.ctx, params)
    }

    pub fn ycbcr_sampler_cache(&self) -> &YcbcrSamplerCache {
        &self.ycbcr_cache
    }
}

impl GpuBackend for GpuContextVk {
    type Buffer = Buffer;
    type Texture = Texture;
    type Program = Program;
    type RenderTarget = RenderTarget;
    type Pipeline = Pipeline;

    fn new(config: GpuConfig) -> GpuResult<Self> {
        config.validate()?;

        let shader_compiler = ShaderCompiler::new()?;
        let ctx = Arc::new(VkContext::new(&config)?);
        let max_samples = ctx.limits().max_samples;
        if config.samples > max_samples {
            return Err(GpuError::InvalidArg(format!(
                "{} samples requested, the device supports up to {}",
                config.samples, max_samples
            )));
        }
        let cmd_pool = CommandPool::new(&ctx)?;
        let frames = (0..config.nb_in_flight_frames)
            .map(|_| FrameSlot::new(&ctx, &cmd_pool))
            .collect::<GpuResult<Vec<_>>>()?;
        let dummy_texture = Self::create_dummy_texture(&ctx, &cmd_pool)?;
        let query_pool = if config.hud {
            Self::create_query_pool(&ctx)?
        } else {
            vk::QueryPool::null()
        };

        let mut context = Self {
            ctx: Arc::clone(&ctx),
            cmd_pool,
            frames,
            cur_frame: 0,
            cur_cmd: CurrentCmd::None,
            pending_wait_sems: Vec::new(),
            swapchain: None,
            need_swapchain_rebuild: false,
            width: config.width,
            height: config.height,
            cur_resources: 0,
            resources: Vec::new(),
            default_rt_desc: RenderTargetDesc::default(),
            current_rt: None,
            viewport: Viewport::default(),
            scissor: Scissor::default(),
            capture: None,
            capture_data: Vec::new(),
            query_pool,
            dummy_texture,
            ycbcr_cache: YcbcrSamplerCache::new(),
            shader_compiler,
            config,
        };

        if !context.config.offscreen {
            let swapchain = Swapchain::new(
                &ctx,
                context.width,
                context.height,
                context.config.swap_interval,
            )?;
            let extent = swapchain.extent();
            context.width = extent.width;
            context.height = extent.height;
            context.swapchain = Some(swapchain);
        }
        context.create_render_resources()?;

        if context.config.offscreen && context.config.capture_buffer {
            context.create_capture_buffer()?;
        }

        context.viewport =
            effective_viewport(context.config.viewport, context.width, context.height);
        context.scissor = Scissor::new(0, 0, context.width as i32, context.height as i32);

        log::info!(
            "Created {} Vulkan context: {}x{}, {} samples, {} in-flight frames",
            if context.config.offscreen { "offscreen" } else { "onscreen" },
            context.width,
            context.height,
            context.config.samples,
            context.frames.len()
        );
        Ok(context)
    }

    fn config(&self) -> &GpuConfig {
        &self.config
    }

    fn resize(&mut self, width: u32, height: u32, viewport: Option<Viewport>) -> GpuResult<()> {
        if self.config.offscreen {
            log::error!("Offscreen contexts cannot be resized");
            return Err(GpuError::InvalidArg(
                "resize is not supported by offscreen contexts".to_string(),
            ));
        }
        self.need_swapchain_rebuild = true;
        self.width = width;
        self.height = height;
        self.config.width = width;
        self.config.height = height;
        self.viewport = effective_viewport(viewport, width, height);
        self.scissor = Scissor::new(0, 0, width as i32, height as i32);
        Ok(())
    }

    fn set_capture_buffer(&mut self, enabled: bool) -> GpuResult<()> {
        if !self.config.offscreen {
            log::error!("Capture buffers are not supported by onscreen contexts");
            return Err(GpuError::Unsupported(
                "capture buffers require an offscreen context".to_string(),
            ));
        }
        self.config.capture_buffer = enabled;
        if enabled {
            if self.capture.is_none() {
                self.create_capture_buffer()?;
            }
        } else {
            self.capture = None;
            self.capture_data.clear();
        }
        Ok(())
    }

    fn capture_buffer(&self) -> Option<&[u8]> {
        self.capture.as_ref().map(|_| self.capture_data.as_slice())
    }

    fn wait_idle(&self) -> GpuResult<()> {
        self.ctx.wait_idle()
    }

    fn begin_update(&mut self) -> GpuResult<()> {
        if !matches!(self.cur_cmd, CurrentCmd::None) {
            return Err(GpuError::InvalidArg(
                "begin_update called while commands are recording".to_string(),
            ));
        }

        self.frames[self.cur_frame].draw_cmd.wait()?;
        self.cur_frame = (self.cur_frame + 1) % self.frames.len();

        self.frames[self.cur_frame].update_cmd.begin()?;
        self.cur_cmd = CurrentCmd::Update;
        self.add_pending_wait_semaphores();
        Ok(())
    }

    fn end_update(&mut self) -> GpuResult<()> {
        if !matches!(self.cur_cmd, CurrentCmd::Update) {
            return Err(GpuError::InvalidArg(
                "end_update called without begin_update".to_string(),
            ));
        }
        let frame = &mut self.frames[self.cur_frame];
        let semaphore = frame.update_finished;
        frame.update_cmd.add_signal_semaphore(semaphore);
        self.cur_cmd = CurrentCmd::None;
        frame.update_cmd.submit()?;
        self.pending_wait_sems.push(semaphore);
        Ok(())
    }

    fn begin_draw(&mut self) -> GpuResult<()> {
        if !matches!(self.cur_cmd, CurrentCmd::None) {
            return Err(GpuError::InvalidArg(
                "begin_draw called while commands are recording".to_string(),
            ));
        }

        self.frames[self.cur_frame].draw_cmd.begin()?;
        self.cur_cmd = CurrentCmd::Draw;
        self.add_pending_wait_semaphores();

        if self.config.offscreen {
            self.cur_resources = self.cur_frame;
        } else if let Err(e) = self.acquire_image() {
            self.cur_cmd = CurrentCmd::None;
            // Leave the slot reusable and hand the update waits to the next frame.
            let waits = self.frames[self.cur_frame].draw_cmd.abort()?;
            self.pending_wait_sems.extend(waits);
            return Err(e);
        }

        if self.config.hud {
            let cmd = self.frames[self.cur_frame].draw_cmd.handle();
            let device = self.ctx.device();
            unsafe {
                device.cmd_reset_query_pool(cmd, self.query_pool, 0, 2);
                device.cmd_write_timestamp(
                    cmd,
                    vk::PipelineStageFlags::TOP_OF_PIPE,
                    self.query_pool,
                    0,
                );
            }
        }
        Ok(())
    }

    fn query_draw_time(&mut self) -> GpuResult<u64> {
        if !self.config.hud {
            return Err(GpuError::InvalidArg(
                "draw time queries require the hud to be enabled".to_string(),
            ));
        }
        if !matches!(self.cur_cmd, CurrentCmd::Draw) {
            return Err(GpuError::InvalidArg(
                "query_draw_time called outside of a draw".to_string(),
            ));
        }

        let query_pool = self.query_pool;
        let device = self.ctx.device().clone();
        let cmd = &mut self.frames[self.cur_frame].draw_cmd;
        unsafe {
            device.cmd_write_timestamp(
                cmd.handle(),
                vk::PipelineStageFlags::BOTTOM_OF_PIPE,
                query_pool,
                1,
            );
        }
        cmd.submit()?;
        cmd.wait()?;

        let mut results = [0u64; 2];
        unsafe {
            device.get_query_pool_results(
                query_pool,
                0,
                &mut results,
                vk::QueryResultFlags::TYPE_64 | vk::QueryResultFlags::WAIT,
            )
        }
        .map_err(vk_err("get query pool results"))?;

        cmd.begin()?;
        Ok(results[1].wrapping_sub(results[0]))
    }

    fn end_draw(&mut self) -> GpuResult<()> {
        if !matches!(self.cur_cmd, CurrentCmd::Draw) {
            return Err(GpuError::InvalidArg(
                "end_draw called without begin_draw".to_string(),
            ));
        }
        self.cur_cmd = CurrentCmd::None;

        let color = Arc::clone(&self.resources[self.cur_resources].color);
        let frame = &mut self.frames[self.cur_frame];

        match &self.swapchain {
            None => match &self.capture {
                Some(capture) => {
                    color.copy_to_buffer(&mut frame.draw_cmd, capture);
                    frame.draw_cmd.submit()?;
                    frame.draw_cmd.wait()?;
                    capture.read(&mut self.capture_data)?;
                }
                None => frame.draw_cmd.submit()?,
            },
            Some(swapchain) => {
                color.transition_layout(&mut frame.draw_cmd, TextureLayout::PresentSrc);
                frame.draw_cmd.submit()?;
                swapchain.present(frame.render_finished, self.cur_resources as u32)?;
            }
        }
        Ok(())
    }

    fn transform_cull_mode(&self, mode: CullMode) -> CullMode {
        flip_cull_mode(mode)
    }

    fn transform_projection_matrix(&self, matrix: &mut [f32; 16]) {
        *matrix = mat4_mul(&VK_CLIP_CORRECTION, matrix);
    }

    fn rendertarget_uvcoord_matrix(&self) -> [f32; 16] {
        IDENTITY_MATRIX
    }

    fn default_rendertarget(&self, load_op: LoadOp) -> Option<Arc<RenderTarget>> {
        let resources = self.resources.get(self.cur_resources)?;
        Some(match load_op {
            LoadOp::Load => Arc::clone(&resources.rt_load),
            LoadOp::Clear | LoadOp::DontCare => Arc::clone(&resources.rt),
        })
    }

    fn default_rendertarget_desc(&self) -> &RenderTargetDesc {
        &self.default_rt_desc
    }

    fn begin_render_pass(&mut self, rt: &Arc<RenderTarget>) -> GpuResult<()> {
        if self.current_rt.is_some() {
            return Err(GpuError::InvalidArg(
                "a render pass is already in progress".to_string(),
            ));
        }
        if matches!(self.cur_cmd, CurrentCmd::None) {
            self.cur_cmd = CurrentCmd::Transient(CommandBuffer::begin_transient(&self.cmd_pool)?);
        }
        let cmd = self.require_cmd("begin_render_pass")?;
        rt.begin(cmd);
        self.current_rt = Some(Arc::clone(rt));
        Ok(())
    }

    fn end_render_pass(&mut self) -> GpuResult<()> {
        let rt = self
            .current_rt
            .take()
            .ok_or_else(|| GpuError::InvalidArg("no render pass in progress".to_string()))?;
        if let Some(cmd) = self.cmd() {
            rt.end(cmd);
        }
        match std::mem::replace(&mut self.cur_cmd, CurrentCmd::None) {
            CurrentCmd::Transient(cmd) => cmd.execute_transient(),
            other => {
                self.cur_cmd = other;
                Ok(())
            }
        }
    }

    fn set_viewport(&mut self, viewport: Viewport) {
        self.viewport = viewport;
    }

    fn viewport(&self) -> Viewport {
        self.viewport
    }

    fn set_scissor(&mut self, scissor: Scissor) {
        self.scissor = scissor;
    }

    fn scissor(&self) -> Scissor {
        self.scissor
    }

    fn preferred_depth_format(&self) -> Format {
        self.ctx.preferred_depth_format()
    }

    fn preferred_depth_stencil_format(&self) -> Format {
        self.ctx.preferred_depth_stencil_format()
    }

    fn format_features(&self, format: Format) -> FormatFeatures {
        convert_vk_format_features(self.ctx.format_features(convert_format(format)))
    }

    fn limits(&self) -> Limits {
        self.ctx.limits()
    }

    fn features(&self) -> Features {
        self.ctx.engine_features()
    }

    fn create_buffer(&mut self, size: u64, usage: BufferUsage) -> GpuResult<Arc<Buffer>> {
        Ok(Arc::new(Buffer::new(&self.ctx, size, usage)?))
    }

    fn create_texture(&mut self, params: &TextureParams) -> GpuResult<Arc<Texture>> {
        Texture::new(&self.ctx, &self.cmd_pool, params)
    }

    fn create_program(&mut self, params: &ProgramParams) -> GpuResult<Arc<Program>> {
        Ok(Arc::new(Program::new(
            &self.ctx,
            &self.shader_compiler,
            params,
        )?))
    }

    fn create_rendertarget(
        &mut self,
        params: RenderTargetParams<Texture>,
    ) -> GpuResult<Arc<RenderTarget>> {
        Ok(Arc::new(RenderTarget::new(&self.ctx, params)?))
    }

    fn create_pipeline(&mut self, params: PipelineParams<Program>) -> GpuResult<Pipeline> {
        Pipeline::new(&self.ctx, params, self.frames.len(), &self.dummy_texture)
    }

    fn buffer_upload(&mut self, buffer: &Buffer, data: &[u8], offset: u64) -> GpuResult<()> {
        buffer.upload(&self.cmd_pool, data, offset)
    }

    fn buffer_map<'a>(
        &self,
        buffer: &'a Buffer,
        offset: u64,
        size: u64,
    ) -> GpuResult<MappedMutexGuard<'a, [u8]>> {
        buffer.map(offset, size)
    }

    fn buffer_unmap(&self, buffer: &Buffer) {
        buffer.unmap();
    }

    fn texture_upload(
        &mut self,
        texture: &Arc<Texture>,
        data: &[u8],
        linesize: u32,
    ) -> GpuResult<()> {
        self.with_cmd(|cmd| texture.upload(cmd, data, linesize))
    }

    fn texture_generate_mipmap(&mut self, texture: &Arc<Texture>) -> GpuResult<()> {
        self.with_cmd(|cmd| texture.generate_mipmap(cmd))
    }

    fn pipeline_set_resources(
        &mut self,
        pipeline: &mut Pipeline,
        resources: &PipelineResources<Buffer, Texture>,
    ) -> GpuResult<()> {
        pipeline.set_resources(self.cur_frame, resources, &self.dummy_texture)
    }

    fn pipeline_update_attribute(
        &mut self,
        pipeline: &mut Pipeline,
        index: i32,
        buffer: Option<Arc<Buffer>>,
    ) -> GpuResult<()> {
        pipeline.update_attribute(index, buffer)
    }

    fn pipeline_update_uniform(
        &mut self,
        _pipeline: &mut Pipeline,
        _index: i32,
        _data: &[u8],
    ) -> GpuResult<()> {
        Err(GpuError::Unsupported(
            "uniforms are bound through buffers".to_string(),
        ))
    }

    fn pipeline_update_texture(
        &mut self,
        pipeline: &mut Pipeline,
        index: i32,
        texture: Option<Arc<Texture>>,
    ) -> GpuResult<()> {
        pipeline.update_texture(self.cur_frame, index, texture, &self.dummy_texture)
    }

    fn pipeline_update_buffer(
        &mut self,
        pipeline: &mut Pipeline,
        index: i32,
        buffer: Option<Arc<Buffer>>,
        offset: u64,
        size: u64,
    ) -> GpuResult<()> {
        pipeline.update_buffer(self.cur_frame, index, buffer, offset, size)
    }

    fn pipeline_update_dynamic_offsets(
        &mut self,
        pipeline: &mut Pipeline,
        offsets: &[u32],
    ) -> GpuResult<()> {
        pipeline.update_dynamic_offsets(offsets)
    }

    fn draw(
        &mut self,
        pipeline: &mut Pipeline,
        nb_vertices: u32,
        nb_instances: u32,
    ) -> GpuResult<()> {
        let state = self.draw_state()?;
        let cmd = self.require_cmd("draw")?;
        pipeline.draw(cmd, &state, nb_vertices, nb_instances)
    }

    fn draw_indexed(
        &mut self,
        pipeline: &mut Pipeline,
        indices: &Arc<Buffer>,
        format: Format,
        nb_indices: u32,
        nb_instances: u32,
    ) -> GpuResult<()> {
        let index_type = convert_index_format(format)?;
        let state = self.draw_state()?;
        let cmd = self.require_cmd("draw_indexed")?;
        pipeline.draw_indexed(cmd, &state, indices, index_type, nb_indices, nb_instances)
    }

    fn dispatch(&mut self, pipeline: &mut Pipeline, groups: [u32; 3]) -> GpuResult<()> {
        if self.current_rt.is_some() {
            return Err(GpuError::InvalidArg(
                "dispatch inside a render pass".to_string(),
            ));
        }
        let frame = self.cur_frame;
        self.with_cmd(|cmd| pipeline.dispatch(cmd, frame, groups))
    }

    fn set_vertex_buffer(&mut self, index: u32, buffer: &Arc<Buffer>) -> GpuResult<()> {
        let device = self.ctx.device().clone();
        let cmd = self.require_cmd("set_vertex_buffer")?;
        cmd.pin(Arc::clone(buffer) as Arc<dyn Any>);
        unsafe { device.cmd_bind_vertex_buffers(cmd.handle(), index, &[buffer.handle()], &[0]) };
        Ok(())
    }

    fn set_index_buffer(&mut self, buffer: &Arc<Buffer>, format: Format) -> GpuResult<()> {
        let index_type = convert_index_format(format)?;
        let device = self.ctx.device().clone();
        let cmd = self.require_cmd("set_index_buffer")?;
        cmd.pin(Arc::clone(buffer) as Arc<dyn Any>);
        unsafe { device.cmd_bind_index_buffer(cmd.handle(), buffer.handle(), 0, index_type) };
        Ok(())
    }
}

impl Drop for GpuContextVk {
    fn drop(&mut self) {
        if let Err(e) = self.ctx.wait_idle() {
            log::error!("Failed to wait for device idle on context release: {}", e);
        }
        self.current_rt = None;
        self.cur_cmd = CurrentCmd::None;
        if self.query_pool != vk::QueryPool::null() {
            unsafe { self.ctx.device().destroy_query_pool(self.query_pool, None) };
        }
    }
}
