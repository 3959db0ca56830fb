//! Graphics and compute pipelines with their per-frame descriptor sets.
//!
//! Each in-flight frame slot owns one descriptor set. Binding updates only
//! mark the slot being recorded; other slots catch up the next time a draw or
//! dispatch targets them. A texture whose YCbCr sampler differs from the one
//! baked into the descriptor-set layout forces the whole pipeline to be
//! rebuilt.

use std::any::Any;
use std::sync::Arc;

use ash::vk;
use static_assertions::const_assert;

use crate::config::MAX_IN_FLIGHT_FRAMES;
use crate::error::{vk_err, GpuError, GpuResult};
use crate::types::{
    AttributeDesc, BufferBindingDesc, BufferBindingType, PipelineLayoutDesc, PipelineParams,
    PipelineResources, PipelineType, GraphicsPipelineDesc, Scissor, ShaderStage,
    TextureBindingDesc, TextureBindingType, Viewport,
};

use super::buffer::Buffer;
use super::command::CommandBuffer;
use super::conversion::{
    convert_blend_factor, convert_blend_op, convert_color_mask, convert_compare_op,
    convert_cull_mode, convert_format, convert_samples, convert_shader_stage, convert_stencil_op,
    convert_topology,
};
use super::device::VkContext;
use super::layout::TextureLayout;
use super::program::Program;
use super::rendertarget::CompatibleRenderPass;
use super::texture::Texture;
use super::ycbcr::YcbcrSampler;

const_assert!(MAX_IN_FLIGHT_FRAMES <= u8::BITS as usize);

/// Frame slots whose descriptor set must be rewritten for one binding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct DirtyFrames(u8);

impl DirtyFrames {
    /// Every slot among the first `nb_frames`.
    pub fn all(nb_frames: usize) -> Self {
        debug_assert!(nb_frames <= MAX_IN_FLIGHT_FRAMES);
        Self(((1u16 << nb_frames) - 1) as u8)
    }

    pub fn none() -> Self {
        Self(0)
    }

    pub fn mark(&mut self, frame: usize) {
        debug_assert!(frame < MAX_IN_FLIGHT_FRAMES);
        self.0 |= 1 << frame;
    }

    pub fn clear(&mut self, frame: usize) {
        self.0 &= !(1 << frame);
    }

    pub fn contains(self, frame: usize) -> bool {
        self.0 & (1 << frame) != 0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn bits(self) -> u8 {
        self.0
    }
}

/// Write tracking shared by buffer and texture bindings.
#[derive(Debug, Clone, Copy, Default)]
struct WriteTracker {
    dirty: DirtyFrames,
    generation: u64,
    written: [u64; MAX_IN_FLIGHT_FRAMES],
}

impl WriteTracker {
    fn new(nb_frames: usize) -> Self {
        Self {
            dirty: DirtyFrames::all(nb_frames),
            generation: 1,
            written: [0; MAX_IN_FLIGHT_FRAMES],
        }
    }

    /// A new resource was bound while recording `frame`.
    fn touch(&mut self, frame: usize) {
        self.generation += 1;
        self.dirty.mark(frame);
    }

    fn needs_write(&self, frame: usize) -> bool {
        self.dirty.contains(frame) || self.written[frame] != self.generation
    }

    fn written(&mut self, frame: usize) {
        self.dirty.clear(frame);
        self.written[frame] = self.generation;
    }

    fn invalidate(&mut self, nb_frames: usize) {
        self.dirty = DirtyFrames::all(nb_frames);
        self.written = [0; MAX_IN_FLIGHT_FRAMES];
    }
}

fn buffer_descriptor_type(ty: BufferBindingType) -> vk::DescriptorType {
    match ty {
        BufferBindingType::Uniform => vk::DescriptorType::UNIFORM_BUFFER,
        BufferBindingType::UniformDynamic => vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC,
        BufferBindingType::Storage => vk::DescriptorType::STORAGE_BUFFER,
        BufferBindingType::StorageDynamic => vk::DescriptorType::STORAGE_BUFFER_DYNAMIC,
    }
}

fn texture_descriptor_type(ty: TextureBindingType) -> vk::DescriptorType {
    match ty {
        TextureBindingType::Sampler => vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
        TextureBindingType::StorageImage => vk::DescriptorType::STORAGE_IMAGE,
    }
}

/// Pool sizes for `nb_frames` copies of every descriptor in `layout`.
pub fn descriptor_pool_sizes(
    layout: &PipelineLayoutDesc,
    nb_frames: usize,
) -> Vec<vk::DescriptorPoolSize> {
    let types = layout
        .buffers
        .iter()
        .map(|b| buffer_descriptor_type(b.ty))
        .chain(layout.textures.iter().map(|t| texture_descriptor_type(t.ty)));

    let mut sizes: Vec<vk::DescriptorPoolSize> = Vec::new();
    for ty in types {
        match sizes.iter_mut().find(|s| s.ty == ty) {
            Some(size) => size.descriptor_count += nb_frames as u32,
            None => sizes.push(vk::DescriptorPoolSize {
                ty,
                descriptor_count: nb_frames as u32,
            }),
        }
    }
    sizes
}

struct AttributeBinding {
    desc: AttributeDesc,
    buffer: Option<Arc<Buffer>>,
}

struct BufferBindingState {
    desc: BufferBindingDesc,
    buffer: Option<Arc<Buffer>>,
    offset: u64,
    size: u64,
    tracker: WriteTracker,
}

struct TextureBindingState {
    desc: TextureBindingDesc,
    texture: Arc<Texture>,
    /// Sampler baked into the descriptor-set layout for this binding.
    ycbcr_sampler: Option<Arc<YcbcrSampler>>,
    tracker: WriteTracker,
}

fn same_sampler(a: Option<&Arc<YcbcrSampler>>, b: Option<&Arc<YcbcrSampler>>) -> bool {
    match (a, b) {
        (None, None) => true,
        (Some(a), Some(b)) => Arc::ptr_eq(a, b),
        _ => false,
    }
}

/// Descriptor pool shared with the command buffers that use its sets.
struct DescriptorPool {
    ctx: Arc<VkContext>,
    pool: vk::DescriptorPool,
}

impl Drop for DescriptorPool {
    fn drop(&mut self) {
        unsafe { self.ctx.device().destroy_descriptor_pool(self.pool, None) };
    }
}

/// Native objects rebuilt on recreation.
struct PipelineCore {
    ctx: Arc<VkContext>,
    desc_set_layout: vk::DescriptorSetLayout,
    pipeline_layout: vk::PipelineLayout,
    pipeline: vk::Pipeline,
    /// Keeps baked YCbCr samplers alive as long as the layout uses them.
    _samplers: Vec<Arc<YcbcrSampler>>,
}

impl Drop for PipelineCore {
    fn drop(&mut self) {
        unsafe {
            let device = self.ctx.device();
            if self.pipeline != vk::Pipeline::null() {
                device.destroy_pipeline(self.pipeline, None);
            }
            if self.pipeline_layout != vk::PipelineLayout::null() {
                device.destroy_pipeline_layout(self.pipeline_layout, None);
            }
            if self.desc_set_layout != vk::DescriptorSetLayout::null() {
                device.destroy_descriptor_set_layout(self.desc_set_layout, None);
            }
        }
    }
}

/// Dynamic state a draw needs from the context.
#[derive(Debug, Clone, Copy)]
pub struct DrawState {
    pub frame: usize,
    pub viewport: Viewport,
    pub scissor: Scissor,
    pub rt_width: u32,
    pub rt_height: u32,
}

/// Scissor rectangle in framebuffer coordinates; the engine's origin is the
/// bottom-left corner.
pub fn flip_scissor(scissor: Scissor, rt_height: u32) -> vk::Rect2D {
    vk::Rect2D {
        offset: vk::Offset2D {
            x: scissor.x,
            y: (rt_height as i32 - scissor.y - scissor.height).max(0),
        },
        extent: vk::Extent2D {
            width: scissor.width.max(0) as u32,
            height: scissor.height.max(0) as u32,
        },
    }
}

pub struct Pipeline {
    ctx: Arc<VkContext>,
    ty: PipelineType,
    graphics: GraphicsPipelineDesc,
    program: Arc<Program>,
    nb_frames: usize,
    attributes: Vec<AttributeBinding>,
    buffers: Vec<BufferBindingState>,
    textures: Vec<TextureBindingState>,
    /// Buffer binding indices of dynamic buffers, sorted by binding number.
    dynamic_order: Vec<usize>,
    dynamic_offsets: Vec<u32>,
    pool: Option<Arc<DescriptorPool>>,
    desc_sets: Vec<vk::DescriptorSet>,
    core: Arc<PipelineCore>,
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("ty", &self.ty)
            .field("pipeline", &self.core.pipeline)
            .field("nb_desc_sets", &self.desc_sets.len())
            .finish()
    }
}

impl Pipeline {
    pub fn new(
        ctx: &Arc<VkContext>,
        params: PipelineParams<Program>,
        nb_frames: usize,
        dummy_texture: &Arc<Texture>,
    ) -> GpuResult<Self> {
        match params.ty {
            PipelineType::Graphics => {
                if params.program.module(ShaderStage::Vertex).is_none()
                    || params.program.module(ShaderStage::Fragment).is_none()
                {
                    return Err(GpuError::InvalidArg(
                        "graphics pipelines need a vertex and a fragment shader".to_string(),
                    ));
                }
            }
            PipelineType::Compute => {
                if params.program.module(ShaderStage::Compute).is_none() {
                    return Err(GpuError::InvalidArg(
                        "compute pipelines need a compute shader".to_string(),
                    ));
                }
                if !params.layout.attributes.is_empty() {
                    return Err(GpuError::InvalidArg(
                        "compute pipelines take no vertex attributes".to_string(),
                    ));
                }
            }
        }

        let layout = params.layout;
        let attributes = layout
            .attributes
            .iter()
            .map(|desc| AttributeBinding {
                desc: desc.clone(),
                buffer: None,
            })
            .collect();
        let buffers: Vec<BufferBindingState> = layout
            .buffers
            .iter()
            .map(|desc| BufferBindingState {
                desc: desc.clone(),
                buffer: None,
                offset: 0,
                size: 0,
                tracker: WriteTracker::new(nb_frames),
            })
            .collect();
        let textures = layout
            .textures
            .iter()
            .map(|desc| TextureBindingState {
                desc: desc.clone(),
                texture: Arc::clone(dummy_texture),
                ycbcr_sampler: None,
                tracker: WriteTracker::new(nb_frames),
            })
            .collect();

        let mut dynamic_order: Vec<usize> = buffers
            .iter()
            .enumerate()
            .filter(|(_, b)| b.desc.ty.is_dynamic())
            .map(|(i, _)| i)
            .collect();
        dynamic_order.sort_by_key(|&i| buffers[i].desc.binding);
        let dynamic_offsets = vec![0; dynamic_order.len()];

        let sizes = descriptor_pool_sizes(&layout, nb_frames);
        let pool = if sizes.is_empty() {
            None
        } else {
            let pool_info = vk::DescriptorPoolCreateInfo::default()
                .pool_sizes(&sizes)
                .max_sets(nb_frames as u32);
            let pool = unsafe { ctx.device().create_descriptor_pool(&pool_info, None) }
                .map_err(vk_err("create descriptor pool"))?;
            Some(Arc::new(DescriptorPool {
                ctx: Arc::clone(ctx),
                pool,
            }))
        };

        let mut pipeline = Self {
            ctx: Arc::clone(ctx),
            ty: params.ty,
            graphics: params.graphics,
            program: params.program,
            nb_frames,
            attributes,
            buffers,
            textures,
            dynamic_order,
            dynamic_offsets,
            pool,
            desc_sets: Vec::new(),
            core: Arc::new(PipelineCore {
                ctx: Arc::clone(ctx),
                desc_set_layout: vk::DescriptorSetLayout::null(),
                pipeline_layout: vk::PipelineLayout::null(),
                pipeline: vk::Pipeline::null(),
                _samplers: Vec::new(),
            }),
        };
        pipeline.build()?;
        Ok(pipeline)
    }

    /// Create the descriptor-set layout, the sets, the pipeline layout and
    /// the native pipeline.
    fn build(&mut self) -> GpuResult<()> {
        let device = self.ctx.device();

        let samplers: Vec<Option<Arc<YcbcrSampler>>> =
            self.textures.iter().map(|t| t.ycbcr_sampler.clone()).collect();
        let immutable: Vec<[vk::Sampler; 1]> = samplers
            .iter()
            .map(|s| [s.as_ref().map(|s| s.sampler()).unwrap_or_default()])
            .collect();

        let mut bindings: Vec<vk::DescriptorSetLayoutBinding> = self
            .buffers
            .iter()
            .map(|b| {
                vk::DescriptorSetLayoutBinding::default()
                    .binding(b.desc.binding)
                    .descriptor_type(buffer_descriptor_type(b.desc.ty))
                    .descriptor_count(1)
                    .stage_flags(convert_shader_stage(b.desc.stage))
            })
            .collect();
        for (i, t) in self.textures.iter().enumerate() {
            let mut binding = vk::DescriptorSetLayoutBinding::default()
                .binding(t.desc.binding)
                .descriptor_type(texture_descriptor_type(t.desc.ty))
                .descriptor_count(1)
                .stage_flags(convert_shader_stage(t.desc.stage));
            if samplers[i].is_some() {
                binding = binding.immutable_samplers(&immutable[i]);
            }
            bindings.push(binding);
        }

        let mut core = PipelineCore {
            ctx: Arc::clone(&self.ctx),
            desc_set_layout: vk::DescriptorSetLayout::null(),
            pipeline_layout: vk::PipelineLayout::null(),
            pipeline: vk::Pipeline::null(),
            _samplers: samplers.into_iter().flatten().collect(),
        };

        let set_layouts: Vec<vk::DescriptorSetLayout> = if bindings.is_empty() {
            Vec::new()
        } else {
            let layout_info = vk::DescriptorSetLayoutCreateInfo::default().bindings(&bindings);
            core.desc_set_layout = unsafe { device.create_descriptor_set_layout(&layout_info, None) }
                .map_err(vk_err("create descriptor set layout"))?;
            vec![core.desc_set_layout; self.nb_frames]
        };

        self.desc_sets = match &self.pool {
            Some(pool) if !set_layouts.is_empty() => {
                let alloc_info = vk::DescriptorSetAllocateInfo::default()
                    .descriptor_pool(pool.pool)
                    .set_layouts(&set_layouts);
                unsafe { device.allocate_descriptor_sets(&alloc_info) }
                    .map_err(vk_err("allocate descriptor sets"))?
            }
            _ => Vec::new(),
        };

        let layout_info =
            vk::PipelineLayoutCreateInfo::default().set_layouts(&set_layouts[..set_layouts.len().min(1)]);
        core.pipeline_layout = unsafe { device.create_pipeline_layout(&layout_info, None) }
            .map_err(vk_err("create pipeline layout"))?;

        core.pipeline = match self.ty {
            PipelineType::Graphics => self.create_graphics(core.pipeline_layout)?,
            PipelineType::Compute => self.create_compute(core.pipeline_layout)?,
        };

        self.core = Arc::new(core);
        Ok(())
    }

    fn create_graphics(&self, layout: vk::PipelineLayout) -> GpuResult<vk::Pipeline> {
        let graphics = &self.graphics;
        let state = &graphics.state;

        let vertex_bindings: Vec<vk::VertexInputBindingDescription> = self
            .attributes
            .iter()
            .enumerate()
            .map(|(i, a)| vk::VertexInputBindingDescription {
                binding: i as u32,
                stride: a.desc.stride,
                input_rate: if a.desc.rate != 0 {
                    vk::VertexInputRate::INSTANCE
                } else {
                    vk::VertexInputRate::VERTEX
                },
            })
            .collect();
        let vertex_attributes: Vec<vk::VertexInputAttributeDescription> = self
            .attributes
            .iter()
            .enumerate()
            .map(|(i, a)| vk::VertexInputAttributeDescription {
                location: a.desc.location,
                binding: i as u32,
                format: convert_format(a.desc.format),
                offset: a.desc.offset,
            })
            .collect();
        let vertex_input = vk::PipelineVertexInputStateCreateInfo::default()
            .vertex_binding_descriptions(&vertex_bindings)
            .vertex_attribute_descriptions(&vertex_attributes);

        let input_assembly = vk::PipelineInputAssemblyStateCreateInfo::default()
            .topology(convert_topology(graphics.topology));

        let viewport_state = vk::PipelineViewportStateCreateInfo::default()
            .viewport_count(1)
            .scissor_count(1);

        let rasterization = vk::PipelineRasterizationStateCreateInfo::default()
            .polygon_mode(vk::PolygonMode::FILL)
            .line_width(1.0)
            .cull_mode(convert_cull_mode(state.cull_mode))
            .front_face(vk::FrontFace::CLOCKWISE);

        let multisample = vk::PipelineMultisampleStateCreateInfo::default()
            .rasterization_samples(convert_samples(graphics.rt_desc.samples));

        let stencil = |s: &crate::types::StencilOpState| vk::StencilOpState {
            fail_op: convert_stencil_op(s.fail),
            pass_op: convert_stencil_op(s.depth_pass),
            depth_fail_op: convert_stencil_op(s.depth_fail),
            compare_op: convert_compare_op(s.func),
            compare_mask: s.read_mask,
            write_mask: s.write_mask,
            reference: s.reference,
        };
        let depth_stencil = vk::PipelineDepthStencilStateCreateInfo::default()
            .depth_test_enable(state.depth_test)
            .depth_write_enable(state.depth_write)
            .depth_compare_op(convert_compare_op(state.depth_func))
            .depth_bounds_test_enable(false)
            .stencil_test_enable(state.stencil_test)
            .front(stencil(&state.stencil_front))
            .back(stencil(&state.stencil_back));

        let blend_attachments: Vec<vk::PipelineColorBlendAttachmentState> = graphics
            .rt_desc
            .colors
            .iter()
            .map(|_| vk::PipelineColorBlendAttachmentState {
                blend_enable: state.blend.into(),
                src_color_blend_factor: convert_blend_factor(state.blend_src_factor),
                dst_color_blend_factor: convert_blend_factor(state.blend_dst_factor),
                color_blend_op: convert_blend_op(state.blend_op),
                src_alpha_blend_factor: convert_blend_factor(state.blend_src_factor_a),
                dst_alpha_blend_factor: convert_blend_factor(state.blend_dst_factor_a),
                alpha_blend_op: convert_blend_op(state.blend_op_a),
                color_write_mask: convert_color_mask(state.color_write_mask),
            })
            .collect();
        let color_blend =
            vk::PipelineColorBlendStateCreateInfo::default().attachments(&blend_attachments);

        let dynamic_states = [
            vk::DynamicState::VIEWPORT,
            vk::DynamicState::SCISSOR,
            vk::DynamicState::LINE_WIDTH,
        ];
        let dynamic_state =
            vk::PipelineDynamicStateCreateInfo::default().dynamic_states(&dynamic_states);

        let entry_point = self.program.entry_point();
        let stages = [
            vk::PipelineShaderStageCreateInfo::default()
                .stage(vk::ShaderStageFlags::VERTEX)
                .module(self.program.module(ShaderStage::Vertex).unwrap_or_default())
                .name(entry_point),
            vk::PipelineShaderStageCreateInfo::default()
                .stage(vk::ShaderStageFlags::FRAGMENT)
                .module(self.program.module(ShaderStage::Fragment).unwrap_or_default())
                .name(entry_point),
        ];

        let render_pass = CompatibleRenderPass::new(&self.ctx, &graphics.rt_desc)?;

        let create_info = vk::GraphicsPipelineCreateInfo::default()
            .stages(&stages)
            .vertex_input_state(&vertex_input)
            .input_assembly_state(&input_assembly)
            .viewport_state(&viewport_state)
            .rasterization_state(&rasterization)
            .multisample_state(&multisample)
            .depth_stencil_state(&depth_stencil)
            .color_blend_state(&color_blend)
            .dynamic_state(&dynamic_state)
            .layout(layout)
            .render_pass(render_pass.handle())
            .subpass(0);

        let pipelines = unsafe {
            self.ctx.device().create_graphics_pipelines(
                vk::PipelineCache::null(),
                std::slice::from_ref(&create_info),
                None,
            )
        }
        .map_err(|(_, e)| vk_err("create graphics pipeline")(e))?;
        Ok(pipelines[0])
    }

    fn create_compute(&self, layout: vk::PipelineLayout) -> GpuResult<vk::Pipeline> {
        let stage = vk::PipelineShaderStageCreateInfo::default()
            .stage(vk::ShaderStageFlags::COMPUTE)
            .module(self.program.module(ShaderStage::Compute).unwrap_or_default())
            .name(self.program.entry_point());
        let create_info = vk::ComputePipelineCreateInfo::default()
            .stage(stage)
            .layout(layout);

        let pipelines = unsafe {
            self.ctx.device().create_compute_pipelines(
                vk::PipelineCache::null(),
                std::slice::from_ref(&create_info),
                None,
            )
        }
        .map_err(|(_, e)| vk_err("create compute pipeline")(e))?;
        Ok(pipelines[0])
    }

    /// Rebuild every native object after a YCbCr sampler change.
    ///
    /// The descriptor pool is reset rather than destroyed, which invalidates
    /// every set; all bindings are therefore marked dirty for every frame.
    fn recreate(&mut self) -> GpuResult<()> {
        log::debug!("Recreating pipeline after a YCbCr sampler change");

        let pool_in_use = self
            .pool
            .as_ref()
            .is_some_and(|pool| Arc::strong_count(pool) > 1);
        if pool_in_use || Arc::strong_count(&self.core) > 1 {
            self.ctx.wait_idle()?;
        }

        if let Some(pool) = &self.pool {
            unsafe {
                self.ctx
                    .device()
                    .reset_descriptor_pool(pool.pool, vk::DescriptorPoolResetFlags::empty())
            }
            .map_err(vk_err("reset descriptor pool"))?;
        }
        self.desc_sets.clear();

        self.build()?;

        for binding in &mut self.buffers {
            binding.tracker.invalidate(self.nb_frames);
        }
        for binding in &mut self.textures {
            binding.tracker.invalidate(self.nb_frames);
        }
        Ok(())
    }

    pub fn ty(&self) -> PipelineType {
        self.ty
    }

    pub fn nb_descriptor_sets(&self) -> usize {
        self.desc_sets.len()
    }

    pub fn handle(&self) -> vk::Pipeline {
        self.core.pipeline
    }

    pub fn buffer_dirty_frames(&self, index: usize) -> Option<DirtyFrames> {
        self.buffers.get(index).map(|b| b.tracker.dirty)
    }

    pub fn texture_dirty_frames(&self, index: usize) -> Option<DirtyFrames> {
        self.textures.get(index).map(|t| t.tracker.dirty)
    }

    /// YCbCr sampler baked into the layout for texture binding `index`.
    pub fn texture_ycbcr_sampler(&self, index: usize) -> Option<&Arc<YcbcrSampler>> {
        self.textures.get(index).and_then(|t| t.ycbcr_sampler.as_ref())
    }

    fn check_index(index: i32, len: usize, what: &str) -> GpuResult<usize> {
        if index == -1 {
            return Err(GpuError::NotFound);
        }
        usize::try_from(index)
            .ok()
            .filter(|&i| i < len)
            .ok_or_else(|| GpuError::InvalidArg(format!("invalid {} index {}", what, index)))
    }

    pub fn update_attribute(&mut self, index: i32, buffer: Option<Arc<Buffer>>) -> GpuResult<()> {
        let index = Self::check_index(index, self.attributes.len(), "attribute")?;
        self.attributes[index].buffer = buffer;
        Ok(())
    }

    pub fn update_buffer(
        &mut self,
        frame: usize,
        index: i32,
        buffer: Option<Arc<Buffer>>,
        offset: u64,
        size: u64,
    ) -> GpuResult<()> {
        let index = Self::check_index(index, self.buffers.len(), "buffer")?;
        let binding = &mut self.buffers[index];
        binding.buffer = buffer;
        binding.offset = offset;
        binding.size = size;
        binding.tracker.touch(frame);
        Ok(())
    }

    /// Bind `texture`, or the dummy texture when `None`.
    pub fn update_texture(
        &mut self,
        frame: usize,
        index: i32,
        texture: Option<Arc<Texture>>,
        dummy_texture: &Arc<Texture>,
    ) -> GpuResult<()> {
        let index = Self::check_index(index, self.textures.len(), "texture")?;
        let texture = texture.unwrap_or_else(|| Arc::clone(dummy_texture));

        let binding = &mut self.textures[index];
        let layout_changed =
            !same_sampler(binding.ycbcr_sampler.as_ref(), texture.ycbcr_sampler());
        if layout_changed {
            binding.ycbcr_sampler = texture.ycbcr_sampler().cloned();
        }
        binding.texture = texture;
        binding.tracker.touch(frame);

        if layout_changed {
            self.recreate()?;
        }
        Ok(())
    }

    /// Offsets of the dynamic buffers, in declaration order.
    pub fn update_dynamic_offsets(&mut self, offsets: &[u32]) -> GpuResult<()> {
        if offsets.len() != self.dynamic_offsets.len() {
            return Err(GpuError::InvalidArg(format!(
                "expected {} dynamic offsets, got {}",
                self.dynamic_offsets.len(),
                offsets.len()
            )));
        }
        // Vulkan consumes dynamic offsets ordered by binding number.
        let declared: Vec<usize> = self
            .buffers
            .iter()
            .enumerate()
            .filter(|(_, b)| b.desc.ty.is_dynamic())
            .map(|(i, _)| i)
            .collect();
        for (slot, &buffer_index) in self.dynamic_order.iter().enumerate() {
            if let Some(pos) = declared.iter().position(|&i| i == buffer_index) {
                self.dynamic_offsets[slot] = offsets[pos];
            }
        }
        Ok(())
    }

    pub fn set_resources(
        &mut self,
        frame: usize,
        resources: &PipelineResources<Buffer, Texture>,
        dummy_texture: &Arc<Texture>,
    ) -> GpuResult<()> {
        if resources.attributes.len() != self.attributes.len()
            || resources.buffers.len() != self.buffers.len()
            || resources.textures.len() != self.textures.len()
        {
            return Err(GpuError::InvalidArg(
                "resource set does not match the pipeline layout".to_string(),
            ));
        }

        for (i, buffer) in resources.attributes.iter().enumerate() {
            self.update_attribute(i as i32, buffer.clone())?;
        }
        for (i, binding) in resources.buffers.iter().enumerate() {
            self.update_buffer(frame, i as i32, binding.buffer.clone(), binding.offset, binding.size)?;
        }
        for (i, texture) in resources.textures.iter().enumerate() {
            self.update_texture(frame, i as i32, texture.clone(), dummy_texture)?;
        }
        Ok(())
    }

    /// Write every stale descriptor of `frame`'s set and pin what it uses.
    fn update_descriptor_set(&mut self, cmd: &mut CommandBuffer, frame: usize) {
        let Some(&set) = self.desc_sets.get(frame) else {
            return;
        };

        let mut buffer_infos = Vec::new();
        let mut buffer_targets = Vec::new();
        for (i, binding) in self.buffers.iter().enumerate() {
            let Some(buffer) = &binding.buffer else {
                continue;
            };
            cmd.pin(Arc::clone(buffer) as Arc<dyn Any>);
            if !binding.tracker.needs_write(frame) {
                continue;
            }
            let range = if binding.size == 0 {
                vk::WHOLE_SIZE
            } else {
                binding.size
            };
            buffer_infos.push(vk::DescriptorBufferInfo {
                buffer: buffer.handle(),
                offset: binding.offset,
                range,
            });
            buffer_targets.push(i);
        }

        let mut image_infos = Vec::new();
        let mut image_targets = Vec::new();
        for (i, binding) in self.textures.iter().enumerate() {
            cmd.pin(Arc::clone(&binding.texture) as Arc<dyn Any>);
            if !binding.tracker.needs_write(frame) {
                continue;
            }
            let layout = match binding.desc.ty {
                TextureBindingType::StorageImage => TextureLayout::General,
                TextureBindingType::Sampler => binding.texture.default_layout(),
            };
            image_infos.push(vk::DescriptorImageInfo {
                sampler: binding.texture.sampler(),
                image_view: binding.texture.view(),
                image_layout: layout.to_vk(),
            });
            image_targets.push(i);
        }

        let mut writes = Vec::with_capacity(buffer_infos.len() + image_infos.len());
        for (info, &i) in buffer_infos.iter().zip(&buffer_targets) {
            let desc = &self.buffers[i].desc;
            writes.push(
                vk::WriteDescriptorSet::default()
                    .dst_set(set)
                    .dst_binding(desc.binding)
                    .descriptor_type(buffer_descriptor_type(desc.ty))
                    .buffer_info(std::slice::from_ref(info)),
            );
        }
        for (info, &i) in image_infos.iter().zip(&image_targets) {
            let desc = &self.textures[i].desc;
            writes.push(
                vk::WriteDescriptorSet::default()
                    .dst_set(set)
                    .dst_binding(desc.binding)
                    .descriptor_type(texture_descriptor_type(desc.ty))
                    .image_info(std::slice::from_ref(info)),
            );
        }

        if !writes.is_empty() {
            unsafe { self.ctx.device().update_descriptor_sets(&writes, &[]) };
        }

        for i in buffer_targets {
            self.buffers[i].tracker.written(frame);
        }
        for i in image_targets {
            self.textures[i].tracker.written(frame);
        }
    }

    fn bind(&mut self, cmd: &mut CommandBuffer, frame: usize, bind_point: vk::PipelineBindPoint) {
        self.update_descriptor_set(cmd, frame);

        cmd.pin(Arc::clone(&self.core) as Arc<dyn Any>);
        if let Some(pool) = &self.pool {
            cmd.pin(Arc::clone(pool) as Arc<dyn Any>);
        }

        let device = self.ctx.device();
        unsafe {
            device.cmd_bind_pipeline(cmd.handle(), bind_point, self.core.pipeline);
            if let Some(&set) = self.desc_sets.get(frame) {
                device.cmd_bind_descriptor_sets(
                    cmd.handle(),
                    bind_point,
                    self.core.pipeline_layout,
                    0,
                    &[set],
                    &self.dynamic_offsets,
                );
            }
        }
    }

    fn prepare_graphics(&mut self, cmd: &mut CommandBuffer, state: &DrawState) -> GpuResult<()> {
        if self.ty != PipelineType::Graphics {
            return Err(GpuError::InvalidArg(
                "draw called on a compute pipeline".to_string(),
            ));
        }
        self.bind(cmd, state.frame, vk::PipelineBindPoint::GRAPHICS);

        let viewport = vk::Viewport {
            x: state.viewport.x as f32,
            y: state.viewport.y as f32,
            width: state.viewport.width as f32,
            height: state.viewport.height as f32,
            min_depth: 0.0,
            max_depth: 1.0,
        };
        let scissor = if self.graphics.state.scissor_test {
            flip_scissor(state.scissor, state.rt_height)
        } else {
            vk::Rect2D {
                offset: vk::Offset2D::default(),
                extent: vk::Extent2D {
                    width: state.rt_width,
                    height: state.rt_height,
                },
            }
        };

        let device = self.ctx.device();
        unsafe {
            device.cmd_set_viewport(cmd.handle(), 0, &[viewport]);
            device.cmd_set_scissor(cmd.handle(), 0, &[scissor]);
            device.cmd_set_line_width(cmd.handle(), 1.0);
        }

        for (i, attribute) in self.attributes.iter().enumerate() {
            if let Some(buffer) = &attribute.buffer {
                cmd.pin(Arc::clone(buffer) as Arc<dyn Any>);
                unsafe {
                    device.cmd_bind_vertex_buffers(cmd.handle(), i as u32, &[buffer.handle()], &[0]);
                }
            }
        }
        Ok(())
    }

    pub fn draw(
        &mut self,
        cmd: &mut CommandBuffer,
        state: &DrawState,
        nb_vertices: u32,
        nb_instances: u32,
    ) -> GpuResult<()> {
        self.prepare_graphics(cmd, state)?;
        unsafe {
            self.ctx
                .device()
                .cmd_draw(cmd.handle(), nb_vertices, nb_instances, 0, 0)
        };
        Ok(())
    }

    pub fn draw_indexed(
        &mut self,
        cmd: &mut CommandBuffer,
        state: &DrawState,
        indices: &Arc<Buffer>,
        index_type: vk::IndexType,
        nb_indices: u32,
        nb_instances: u32,
    ) -> GpuResult<()> {
        self.prepare_graphics(cmd, state)?;
        cmd.pin(Arc::clone(indices) as Arc<dyn Any>);
        let device = self.ctx.device();
        unsafe {
            device.cmd_bind_index_buffer(cmd.handle(), indices.handle(), 0, index_type);
            device.cmd_draw_indexed(cmd.handle(), nb_indices, nb_instances, 0, 0, 0);
        }
        Ok(())
    }

    /// Run the compute shader, then make its writes visible to everything after.
    pub fn dispatch(
        &mut self,
        cmd: &mut CommandBuffer,
        frame: usize,
        groups: [u32; 3],
    ) -> GpuResult<()> {
        if self.ty != PipelineType::Compute {
            return Err(GpuError::InvalidArg(
                "dispatch called on a graphics pipeline".to_string(),
            ));
        }
        self.bind(cmd, frame, vk::PipelineBindPoint::COMPUTE);

        let barrier = vk::MemoryBarrier::default()
            .src_access_mask(vk::AccessFlags::SHADER_WRITE)
            .dst_access_mask(
                vk::AccessFlags::SHADER_READ
                    | vk::AccessFlags::SHADER_WRITE
                    | vk::AccessFlags::COLOR_ATTACHMENT_READ
                    | vk::AccessFlags::COLOR_ATTACHMENT_WRITE
                    | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_READ
                    | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE
                    | vk::AccessFlags::TRANSFER_READ
                    | vk::AccessFlags::TRANSFER_WRITE
                    | vk::AccessFlags::MEMORY_READ
                    | vk::AccessFlags::MEMORY_WRITE,
            );
        let device = self.ctx.device();
        unsafe {
            device.cmd_dispatch(cmd.handle(), groups[0], groups[1], groups[2]);
            device.cmd_pipeline_barrier(
                cmd.handle(),
                vk::PipelineStageFlags::COMPUTE_SHADER,
                vk::PipelineStageFlags::ALL_COMMANDS,
                vk::DependencyFlags::empty(),
                &[barrier],
                &[],
                &[],
            );
        }
        Ok(())
    }
}
