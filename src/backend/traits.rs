//! The operations a GPU backend offers to the scene-graph layer.

use std::sync::Arc;

use parking_lot::MappedMutexGuard;

use crate::config::GpuConfig;
use crate::error::GpuResult;
use crate::types::{
    BufferUsage, CullMode, Features, Format, FormatFeatures, Limits, LoadOp, PipelineParams,
    PipelineResources, ProgramParams, RenderTargetDesc, RenderTargetParams, Scissor,
    TextureParams, Viewport,
};

/// A GPU context: device, frame loop, resource factories and command recording.
///
/// Every call happens on one thread. Operations issued outside a frame
/// bracket run on a transient command buffer and complete before returning.
pub trait GpuBackend: Sized {
    type Buffer;
    type Texture;
    type Program;
    type RenderTarget;
    type Pipeline;

    /// Create and initialize the context.
    fn new(config: GpuConfig) -> GpuResult<Self>;

    fn config(&self) -> &GpuConfig;

    /// Schedule a swapchain rebuild for the new size. Offscreen contexts
    /// cannot be resized.
    fn resize(&mut self, width: u32, height: u32, viewport: Option<Viewport>) -> GpuResult<()>;

    fn set_capture_buffer(&mut self, enabled: bool) -> GpuResult<()>;

    /// RGBA pixels of the last captured frame.
    fn capture_buffer(&self) -> Option<&[u8]>;

    fn wait_idle(&self) -> GpuResult<()>;

    // Frame brackets

    fn begin_update(&mut self) -> GpuResult<()>;
    fn end_update(&mut self) -> GpuResult<()>;
    fn begin_draw(&mut self) -> GpuResult<()>;

    /// GPU time spent so far in the current draw, in device ticks.
    fn query_draw_time(&mut self) -> GpuResult<u64>;

    fn end_draw(&mut self) -> GpuResult<()>;

    // Coordinate conventions

    fn transform_cull_mode(&self, mode: CullMode) -> CullMode;

    /// Pre-multiply a column-major projection by the backend's clip-space correction.
    fn transform_projection_matrix(&self, matrix: &mut [f32; 16]);

    fn rendertarget_uvcoord_matrix(&self) -> [f32; 16];

    // Default render target

    fn default_rendertarget(&self, load_op: LoadOp) -> Option<Arc<Self::RenderTarget>>;
    fn default_rendertarget_desc(&self) -> &RenderTargetDesc;

    fn begin_render_pass(&mut self, rt: &Arc<Self::RenderTarget>) -> GpuResult<()>;
    fn end_render_pass(&mut self) -> GpuResult<()>;

    fn set_viewport(&mut self, viewport: Viewport);
    fn viewport(&self) -> Viewport;
    fn set_scissor(&mut self, scissor: Scissor);
    fn scissor(&self) -> Scissor;

    // Capabilities

    fn preferred_depth_format(&self) -> Format;
    fn preferred_depth_stencil_format(&self) -> Format;
    fn format_features(&self, format: Format) -> FormatFeatures;
    fn limits(&self) -> Limits;
    fn features(&self) -> Features;

    // Factories

    fn create_buffer(&mut self, size: u64, usage: BufferUsage) -> GpuResult<Arc<Self::Buffer>>;
    fn create_texture(&mut self, params: &TextureParams) -> GpuResult<Arc<Self::Texture>>;
    fn create_program(&mut self, params: &ProgramParams) -> GpuResult<Arc<Self::Program>>;
    fn create_rendertarget(
        &mut self,
        params: RenderTargetParams<Self::Texture>,
    ) -> GpuResult<Arc<Self::RenderTarget>>;
    fn create_pipeline(
        &mut self,
        params: PipelineParams<Self::Program>,
    ) -> GpuResult<Self::Pipeline>;

    // Resource mutation

    fn buffer_upload(&mut self, buffer: &Self::Buffer, data: &[u8], offset: u64) -> GpuResult<()>;
    fn buffer_map<'a>(
        &self,
        buffer: &'a Self::Buffer,
        offset: u64,
        size: u64,
    ) -> GpuResult<MappedMutexGuard<'a, [u8]>>;
    fn buffer_unmap(&self, buffer: &Self::Buffer);

    /// `linesize` is the row length of `data` in pixels, 0 meaning the width.
    fn texture_upload(
        &mut self,
        texture: &Arc<Self::Texture>,
        data: &[u8],
        linesize: u32,
    ) -> GpuResult<()>;
    fn texture_generate_mipmap(&mut self, texture: &Arc<Self::Texture>) -> GpuResult<()>;

    fn pipeline_set_resources(
        &mut self,
        pipeline: &mut Self::Pipeline,
        resources: &PipelineResources<Self::Buffer, Self::Texture>,
    ) -> GpuResult<()>;

    /// Binding updates take the index resolved from the layout; -1 (absent
    /// from the program) yields `NotFound`.
    fn pipeline_update_attribute(
        &mut self,
        pipeline: &mut Self::Pipeline,
        index: i32,
        buffer: Option<Arc<Self::Buffer>>,
    ) -> GpuResult<()>;
    fn pipeline_update_uniform(
        &mut self,
        pipeline: &mut Self::Pipeline,
        index: i32,
        data: &[u8],
    ) -> GpuResult<()>;
    fn pipeline_update_texture(
        &mut self,
        pipeline: &mut Self::Pipeline,
        index: i32,
        texture: Option<Arc<Self::Texture>>,
    ) -> GpuResult<()>;
    fn pipeline_update_buffer(
        &mut self,
        pipeline: &mut Self::Pipeline,
        index: i32,
        buffer: Option<Arc<Self::Buffer>>,
        offset: u64,
        size: u64,
    ) -> GpuResult<()>;
    fn pipeline_update_dynamic_offsets(
        &mut self,
        pipeline: &mut Self::Pipeline,
        offsets: &[u32],
    ) -> GpuResult<()>;

    // Commands

    fn draw(
        &mut self,
        pipeline: &mut Self::Pipeline,
        nb_vertices: u32,
        nb_instances: u32,
    ) -> GpuResult<()>;
    fn draw_indexed(
        &mut self,
        pipeline: &mut Self::Pipeline,
        indices: &Arc<Self::Buffer>,
        format: Format,
        nb_indices: u32,
        nb_instances: u32,
    ) -> GpuResult<()>;
    fn dispatch(&mut self, pipeline: &mut Self::Pipeline, groups: [u32; 3]) -> GpuResult<()>;
    fn set_vertex_buffer(&mut self, index: u32, buffer: &Arc<Self::Buffer>) -> GpuResult<()>;
    fn set_index_buffer(&mut self, buffer: &Arc<Self::Buffer>, format: Format) -> GpuResult<()>;
}

/// Vulkan clip space has Y pointing down and depth in [0, 1].
pub const VK_CLIP_CORRECTION: [f32; 16] = [
    1.0, 0.0, 0.0, 0.0, //
    0.0, -1.0, 0.0, 0.0, //
    0.0, 0.0, 0.5, 0.0, //
    0.0, 0.0, 0.5, 1.0, //
];

pub const IDENTITY_MATRIX: [f32; 16] = [
    1.0, 0.0, 0.0, 0.0, //
    0.0, 1.0, 0.0, 0.0, //
    0.0, 0.0, 1.0, 0.0, //
    0.0, 0.0, 0.0, 1.0, //
];

/// Column-major 4×4 product `a * b`.
pub fn mat4_mul(a: &[f32; 16], b: &[f32; 16]) -> [f32; 16] {
    let mut out = [0.0; 16];
    for col in 0..4 {
        for row in 0..4 {
            out[col * 4 + row] = (0..4).map(|k| a[k * 4 + row] * b[col * 4 + k]).sum();
        }
    }
    out
}

/// Swap front and back faces, undoing the Y flip of the clip correction.
pub fn flip_cull_mode(mode: CullMode) -> CullMode {
    match mode {
        CullMode::None => CullMode::None,
        CullMode::Front => CullMode::Back,
        CullMode::Back => CullMode::Front,
    }
}
