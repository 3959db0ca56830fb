//! Backend-neutral types exchanged with the scene-graph layer.

mod buffer;
mod format;
mod pipeline;
mod rendertarget;
mod texture;

pub use buffer::BufferUsage;
pub use format::{Format, FormatFeatures};
pub use pipeline::{
    AttributeDesc, BlendFactor, BlendOp, BufferBinding, BufferBindingDesc, BufferBindingType,
    ColorComponents, CompareOp, CullMode, GraphicsPipelineDesc, GraphicsState, PipelineLayoutDesc,
    PipelineParams, PipelineResources, PipelineType, PrimitiveTopology, ShaderStage,
    StencilOp, StencilOpState, TextureBindingDesc, TextureBindingType,
};
pub use rendertarget::{
    ColorAttachment, ColorAttachmentDesc, DepthStencilAttachment, DepthStencilDesc, LoadOp,
    RenderTargetDesc, RenderTargetParams, StoreOp,
};
pub use texture::{
    mip_level_extent, Filter, MipmapFilter, TextureParams, TextureType, TextureUsage, WrapMode,
};

/// Viewport rectangle in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Viewport {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

impl Viewport {
    pub fn new(x: i32, y: i32, width: i32, height: i32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.width <= 0 || self.height <= 0
    }
}

/// Scissor rectangle, origin at the bottom-left as seen by the engine.
pub type Scissor = Viewport;

/// Shader sources of a program. Compute programs only carry `compute`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProgramParams {
    pub label: Option<String>,
    pub vertex: Option<String>,
    pub fragment: Option<String>,
    pub compute: Option<String>,
}

/// Device limits reported to the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Limits {
    pub max_color_attachments: u32,
    pub max_draw_buffers: u32,
    pub max_texture_dimension_1d: u32,
    pub max_texture_dimension_2d: u32,
    pub max_texture_dimension_3d: u32,
    pub max_texture_dimension_cube: u32,
    pub max_texture_array_layers: u32,
    pub max_compute_work_group_count: [u32; 3],
    pub max_compute_work_group_size: [u32; 3],
    pub max_compute_work_group_invocations: u32,
    pub max_compute_shared_memory_size: u32,
    pub max_samples: u32,
    pub max_texture_image_units: u32,
    pub max_uniform_block_size: u32,
    pub max_storage_block_size: u32,
}

bitflags::bitflags! {
    /// Optional capabilities of the device.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct Features: u32 {
        const COMPUTE = 1 << 0;
        const INSTANCED_DRAW = 1 << 1;
        const COLOR_RESOLVE = 1 << 2;
        const DEPTH_STENCIL_RESOLVE = 1 << 3;
        const FLOAT_TEXTURES = 1 << 4;
        const STORAGE_BUFFER = 1 << 5;
        const YCBCR_CONVERSION = 1 << 6;
    }
}
