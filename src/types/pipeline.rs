//! Graphics state and pipeline layout descriptions.

use std::sync::Arc;

use bitflags::bitflags;

use super::format::Format;
use super::rendertarget::RenderTargetDesc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PrimitiveTopology {
    PointList,
    LineStrip,
    LineList,
    #[default]
    TriangleStrip,
    TriangleList,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlendFactor {
    Zero,
    One,
    SrcColor,
    OneMinusSrcColor,
    DstColor,
    OneMinusDstColor,
    SrcAlpha,
    OneMinusSrcAlpha,
    DstAlpha,
    OneMinusDstAlpha,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlendOp {
    Add,
    Subtract,
    ReverseSubtract,
    Min,
    Max,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompareOp {
    Never,
    Less,
    Equal,
    LessOrEqual,
    Greater,
    NotEqual,
    GreaterOrEqual,
    Always,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StencilOp {
    Keep,
    Zero,
    Replace,
    IncrementAndClamp,
    DecrementAndClamp,
    Invert,
    IncrementAndWrap,
    DecrementAndWrap,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum CullMode {
    #[default]
    None,
    Front,
    Back,
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ColorComponents: u8 {
        const R = 1 << 0;
        const G = 1 << 1;
        const B = 1 << 2;
        const A = 1 << 3;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StencilOpState {
    pub write_mask: u32,
    pub func: CompareOp,
    pub reference: u32,
    pub read_mask: u32,
    pub fail: StencilOp,
    pub depth_fail: StencilOp,
    pub depth_pass: StencilOp,
}

impl Default for StencilOpState {
    fn default() -> Self {
        Self {
            write_mask: 0xff,
            func: CompareOp::Always,
            reference: 0,
            read_mask: 0xff,
            fail: StencilOp::Keep,
            depth_fail: StencilOp::Keep,
            depth_pass: StencilOp::Keep,
        }
    }
}

/// Fixed-function state baked into a graphics pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GraphicsState {
    pub blend: bool,
    pub blend_src_factor: BlendFactor,
    pub blend_dst_factor: BlendFactor,
    pub blend_src_factor_a: BlendFactor,
    pub blend_dst_factor_a: BlendFactor,
    pub blend_op: BlendOp,
    pub blend_op_a: BlendOp,
    pub color_write_mask: ColorComponents,
    pub depth_test: bool,
    pub depth_write: bool,
    pub depth_func: CompareOp,
    pub stencil_test: bool,
    pub stencil_front: StencilOpState,
    pub stencil_back: StencilOpState,
    pub cull_mode: CullMode,
    pub scissor_test: bool,
}

impl Default for GraphicsState {
    fn default() -> Self {
        Self {
            blend: false,
            blend_src_factor: BlendFactor::One,
            blend_dst_factor: BlendFactor::Zero,
            blend_src_factor_a: BlendFactor::One,
            blend_dst_factor_a: BlendFactor::Zero,
            blend_op: BlendOp::Add,
            blend_op_a: BlendOp::Add,
            color_write_mask: ColorComponents::all(),
            depth_test: false,
            depth_write: true,
            depth_func: CompareOp::Less,
            stencil_test: false,
            stencil_front: StencilOpState::default(),
            stencil_back: StencilOpState::default(),
            cull_mode: CullMode::None,
            scissor_test: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShaderStage {
    Vertex,
    Fragment,
    Compute,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BufferBindingType {
    Uniform,
    UniformDynamic,
    Storage,
    StorageDynamic,
}

impl BufferBindingType {
    pub fn is_dynamic(self) -> bool {
        matches!(self, Self::UniformDynamic | Self::StorageDynamic)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TextureBindingType {
    /// Combined image + sampler.
    Sampler,
    StorageImage,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BufferBindingDesc {
    pub name: String,
    pub ty: BufferBindingType,
    pub binding: u32,
    pub stage: ShaderStage,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TextureBindingDesc {
    pub name: String,
    pub ty: TextureBindingType,
    pub binding: u32,
    pub stage: ShaderStage,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AttributeDesc {
    pub name: String,
    pub location: u32,
    pub format: Format,
    pub stride: u32,
    pub offset: u32,
    /// 0 is per-vertex, anything else per-instance.
    pub rate: u32,
}

/// Every resource slot a pipeline exposes to its shaders.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct PipelineLayoutDesc {
    pub buffers: Vec<BufferBindingDesc>,
    pub textures: Vec<TextureBindingDesc>,
    pub attributes: Vec<AttributeDesc>,
}

impl PipelineLayoutDesc {
    /// Index of a named buffer binding, or -1 when the program does not use it.
    pub fn buffer_index(&self, name: &str) -> i32 {
        position(self.buffers.iter().map(|b| b.name.as_str()), name)
    }

    pub fn texture_index(&self, name: &str) -> i32 {
        position(self.textures.iter().map(|t| t.name.as_str()), name)
    }

    pub fn attribute_index(&self, name: &str) -> i32 {
        position(self.attributes.iter().map(|a| a.name.as_str()), name)
    }
}

fn position<'a>(mut names: impl Iterator<Item = &'a str>, name: &str) -> i32 {
    names
        .position(|n| n == name)
        .map(|i| i as i32)
        .unwrap_or(-1)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PipelineType {
    #[default]
    Graphics,
    Compute,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct GraphicsPipelineDesc {
    pub topology: PrimitiveTopology,
    pub state: GraphicsState,
    pub rt_desc: RenderTargetDesc,
}

/// Parameters for creating a pipeline from a compiled program.
#[derive(Debug)]
pub struct PipelineParams<P> {
    pub ty: PipelineType,
    pub graphics: GraphicsPipelineDesc,
    pub program: Arc<P>,
    pub layout: PipelineLayoutDesc,
}

/// A buffer bound to a pipeline slot, with its descriptor range.
#[derive(Debug)]
pub struct BufferBinding<B> {
    pub buffer: Option<Arc<B>>,
    pub offset: u64,
    /// 0 means the whole buffer.
    pub size: u64,
}

impl<B> Clone for BufferBinding<B> {
    fn clone(&self) -> Self {
        Self {
            buffer: self.buffer.clone(),
            offset: self.offset,
            size: self.size,
        }
    }
}

impl<B> Default for BufferBinding<B> {
    fn default() -> Self {
        Self {
            buffer: None,
            offset: 0,
            size: 0,
        }
    }
}

/// A full set of resources applied with one call.
#[derive(Debug)]
pub struct PipelineResources<B, T> {
    pub attributes: Vec<Option<Arc<B>>>,
    pub buffers: Vec<BufferBinding<B>>,
    pub textures: Vec<Option<Arc<T>>>,
}

impl<B, T> Default for PipelineResources<B, T> {
    fn default() -> Self {
        Self {
            attributes: Vec::new(),
            buffers: Vec::new(),
            textures: Vec::new(),
        }
    }
}
