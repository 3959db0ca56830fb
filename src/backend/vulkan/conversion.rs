//! Type conversions between engine types and Vulkan types.

use ash::vk;

use crate::error::{GpuError, GpuResult};
use crate::types::{
    BlendFactor, BlendOp, BufferUsage, ColorComponents, CompareOp, CullMode, Filter, Format,
    FormatFeatures, LoadOp, MipmapFilter, PrimitiveTopology, ShaderStage, StencilOp, StoreOp,
    TextureUsage, WrapMode,
};

macro_rules! format_table {
    ($($ngl:ident <=> $vk:ident),* $(,)?) => {
        /// Convert an engine format to its Vulkan counterpart.
        pub fn convert_format(format: Format) -> vk::Format {
            match format {
                Format::Undefined => vk::Format::UNDEFINED,
                $(Format::$ngl => vk::Format::$vk,)*
            }
        }

        /// Convert a Vulkan format back to the engine format.
        ///
        /// Panics on formats outside the engine's table.
        pub fn convert_vk_format(format: vk::Format) -> Format {
            match format {
                vk::Format::UNDEFINED => Format::Undefined,
                $(vk::Format::$vk => Format::$ngl,)*
                other => panic!("Vulkan format {:?} has no engine counterpart", other),
            }
        }
    };
}

format_table! {
    R8Unorm <=> R8_UNORM,
    R8Snorm <=> R8_SNORM,
    R8Uint <=> R8_UINT,
    R8Sint <=> R8_SINT,
    R8G8Unorm <=> R8G8_UNORM,
    R8G8Snorm <=> R8G8_SNORM,
    R8G8Uint <=> R8G8_UINT,
    R8G8Sint <=> R8G8_SINT,
    R8G8B8Unorm <=> R8G8B8_UNORM,
    R8G8B8Snorm <=> R8G8B8_SNORM,
    R8G8B8Uint <=> R8G8B8_UINT,
    R8G8B8Sint <=> R8G8B8_SINT,
    R8G8B8Srgb <=> R8G8B8_SRGB,
    R8G8B8A8Unorm <=> R8G8B8A8_UNORM,
    R8G8B8A8Snorm <=> R8G8B8A8_SNORM,
    R8G8B8A8Uint <=> R8G8B8A8_UINT,
    R8G8B8A8Sint <=> R8G8B8A8_SINT,
    R8G8B8A8Srgb <=> R8G8B8A8_SRGB,
    B8G8R8A8Unorm <=> B8G8R8A8_UNORM,
    B8G8R8A8Snorm <=> B8G8R8A8_SNORM,
    B8G8R8A8Uint <=> B8G8R8A8_UINT,
    B8G8R8A8Sint <=> B8G8R8A8_SINT,
    R16Unorm <=> R16_UNORM,
    R16Snorm <=> R16_SNORM,
    R16Uint <=> R16_UINT,
    R16Sint <=> R16_SINT,
    R16Sfloat <=> R16_SFLOAT,
    R16G16Unorm <=> R16G16_UNORM,
    R16G16Snorm <=> R16G16_SNORM,
    R16G16Uint <=> R16G16_UINT,
    R16G16Sint <=> R16G16_SINT,
    R16G16Sfloat <=> R16G16_SFLOAT,
    R16G16B16Unorm <=> R16G16B16_UNORM,
    R16G16B16Snorm <=> R16G16B16_SNORM,
    R16G16B16Uint <=> R16G16B16_UINT,
    R16G16B16Sint <=> R16G16B16_SINT,
    R16G16B16Sfloat <=> R16G16B16_SFLOAT,
    R16G16B16A16Unorm <=> R16G16B16A16_UNORM,
    R16G16B16A16Snorm <=> R16G16B16A16_SNORM,
    R16G16B16A16Uint <=> R16G16B16A16_UINT,
    R16G16B16A16Sint <=> R16G16B16A16_SINT,
    R16G16B16A16Sfloat <=> R16G16B16A16_SFLOAT,
    R32Uint <=> R32_UINT,
    R32Sint <=> R32_SINT,
    R32Sfloat <=> R32_SFLOAT,
    R32G32Uint <=> R32G32_UINT,
    R32G32Sint <=> R32G32_SINT,
    R32G32Sfloat <=> R32G32_SFLOAT,
    R32G32B32Uint <=> R32G32B32_UINT,
    R32G32B32Sint <=> R32G32B32_SINT,
    R32G32B32Sfloat <=> R32G32B32_SFLOAT,
    R32G32B32A32Uint <=> R32G32B32A32_UINT,
    R32G32B32A32Sint <=> R32G32B32A32_SINT,
    R32G32B32A32Sfloat <=> R32G32B32A32_SFLOAT,
    D16Unorm <=> D16_UNORM,
    X8D24UnormPack32 <=> X8_D24_UNORM_PACK32,
    D32Sfloat <=> D32_SFLOAT,
    D24UnormS8Uint <=> D24_UNORM_S8_UINT,
    D32SfloatS8Uint <=> D32_SFLOAT_S8_UINT,
    S8Uint <=> S8_UINT,
}

pub fn convert_format_features(features: FormatFeatures) -> vk::FormatFeatureFlags {
    let mut flags = vk::FormatFeatureFlags::empty();
    if features.contains(FormatFeatures::SAMPLED_IMAGE) {
        flags |= vk::FormatFeatureFlags::SAMPLED_IMAGE;
    }
    if features.contains(FormatFeatures::SAMPLED_IMAGE_FILTER_LINEAR) {
        flags |= vk::FormatFeatureFlags::SAMPLED_IMAGE_FILTER_LINEAR;
    }
    if features.contains(FormatFeatures::COLOR_ATTACHMENT) {
        flags |= vk::FormatFeatureFlags::COLOR_ATTACHMENT;
    }
    if features.contains(FormatFeatures::COLOR_ATTACHMENT_BLEND) {
        flags |= vk::FormatFeatureFlags::COLOR_ATTACHMENT_BLEND;
    }
    if features.contains(FormatFeatures::DEPTH_STENCIL_ATTACHMENT) {
        flags |= vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT;
    }
    flags
}

pub fn convert_vk_format_features(flags: vk::FormatFeatureFlags) -> FormatFeatures {
    let mut features = FormatFeatures::empty();
    if flags.contains(vk::FormatFeatureFlags::SAMPLED_IMAGE) {
        features |= FormatFeatures::SAMPLED_IMAGE;
    }
    if flags.contains(vk::FormatFeatureFlags::SAMPLED_IMAGE_FILTER_LINEAR) {
        features |= FormatFeatures::SAMPLED_IMAGE_FILTER_LINEAR;
    }
    if flags.contains(vk::FormatFeatureFlags::COLOR_ATTACHMENT) {
        features |= FormatFeatures::COLOR_ATTACHMENT;
    }
    if flags.contains(vk::FormatFeatureFlags::COLOR_ATTACHMENT_BLEND) {
        features |= FormatFeatures::COLOR_ATTACHMENT_BLEND;
    }
    if flags.contains(vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT) {
        features |= FormatFeatures::DEPTH_STENCIL_ATTACHMENT;
    }
    features
}

/// Aspect of an image of the given format.
pub fn format_aspect(format: vk::Format) -> vk::ImageAspectFlags {
    match format {
        vk::Format::D16_UNORM | vk::Format::X8_D24_UNORM_PACK32 | vk::Format::D32_SFLOAT => {
            vk::ImageAspectFlags::DEPTH
        }
        vk::Format::D16_UNORM_S8_UINT
        | vk::Format::D24_UNORM_S8_UINT
        | vk::Format::D32_SFLOAT_S8_UINT => {
            vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL
        }
        _ => vk::ImageAspectFlags::COLOR,
    }
}

pub fn convert_index_format(format: Format) -> GpuResult<vk::IndexType> {
    match format {
        Format::R16Unorm | Format::R16Uint => Ok(vk::IndexType::UINT16),
        Format::R32Uint => Ok(vk::IndexType::UINT32),
        other => Err(GpuError::InvalidArg(format!(
            "{:?} is not an index format",
            other
        ))),
    }
}

/// Buffer usage flags; the mapping flags only affect the memory location.
pub fn convert_buffer_usage(usage: BufferUsage) -> vk::BufferUsageFlags {
    let mut result = vk::BufferUsageFlags::empty();

    if usage.contains(BufferUsage::TRANSFER_SRC) {
        result |= vk::BufferUsageFlags::TRANSFER_SRC;
    }
    if usage.contains(BufferUsage::TRANSFER_DST) {
        result |= vk::BufferUsageFlags::TRANSFER_DST;
    }
    if usage.contains(BufferUsage::UNIFORM) {
        result |= vk::BufferUsageFlags::UNIFORM_BUFFER;
    }
    if usage.contains(BufferUsage::STORAGE) {
        result |= vk::BufferUsageFlags::STORAGE_BUFFER;
    }
    if usage.contains(BufferUsage::INDEX) {
        result |= vk::BufferUsageFlags::INDEX_BUFFER;
    }
    if usage.contains(BufferUsage::VERTEX) {
        result |= vk::BufferUsageFlags::VERTEX_BUFFER;
    }

    result
}

pub fn convert_texture_usage(usage: TextureUsage) -> vk::ImageUsageFlags {
    let mut result = vk::ImageUsageFlags::empty();

    if usage.contains(TextureUsage::TRANSFER_SRC) {
        result |= vk::ImageUsageFlags::TRANSFER_SRC;
    }
    if usage.contains(TextureUsage::TRANSFER_DST) {
        result |= vk::ImageUsageFlags::TRANSFER_DST;
    }
    if usage.contains(TextureUsage::SAMPLED) {
        result |= vk::ImageUsageFlags::SAMPLED;
    }
    if usage.contains(TextureUsage::STORAGE) {
        result |= vk::ImageUsageFlags::STORAGE;
    }
    if usage.contains(TextureUsage::COLOR_ATTACHMENT) {
        result |= vk::ImageUsageFlags::COLOR_ATTACHMENT;
    }
    if usage.contains(TextureUsage::DEPTH_STENCIL_ATTACHMENT) {
        result |= vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT;
    }
    if usage.contains(TextureUsage::TRANSIENT_ATTACHMENT) {
        result |= vk::ImageUsageFlags::TRANSIENT_ATTACHMENT;
    }

    result
}

/// Format features a texture with `usage` needs from optimal tiling.
pub fn texture_usage_features(usage: vk::ImageUsageFlags) -> vk::FormatFeatureFlags {
    let mut features = vk::FormatFeatureFlags::empty();

    if usage.contains(vk::ImageUsageFlags::TRANSFER_SRC) {
        features |= vk::FormatFeatureFlags::TRANSFER_SRC;
    }
    if usage.contains(vk::ImageUsageFlags::TRANSFER_DST) {
        features |= vk::FormatFeatureFlags::TRANSFER_DST;
    }
    if usage.contains(vk::ImageUsageFlags::SAMPLED) {
        features |= vk::FormatFeatureFlags::SAMPLED_IMAGE;
    }
    if usage.contains(vk::ImageUsageFlags::STORAGE) {
        features |= vk::FormatFeatureFlags::STORAGE_IMAGE;
    }
    if usage.contains(vk::ImageUsageFlags::COLOR_ATTACHMENT) {
        features |= vk::FormatFeatureFlags::COLOR_ATTACHMENT;
    }
    if usage.contains(vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT) {
        features |= vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT;
    }

    features
}

pub fn convert_filter(filter: Filter) -> vk::Filter {
    match filter {
        Filter::Nearest => vk::Filter::NEAREST,
        Filter::Linear => vk::Filter::LINEAR,
    }
}

pub fn convert_mipmap_filter(filter: MipmapFilter) -> vk::SamplerMipmapMode {
    match filter {
        MipmapFilter::None | MipmapFilter::Nearest => vk::SamplerMipmapMode::NEAREST,
        MipmapFilter::Linear => vk::SamplerMipmapMode::LINEAR,
    }
}

pub fn convert_wrap_mode(wrap: WrapMode) -> vk::SamplerAddressMode {
    match wrap {
        WrapMode::ClampToEdge => vk::SamplerAddressMode::CLAMP_TO_EDGE,
        WrapMode::MirroredRepeat => vk::SamplerAddressMode::MIRRORED_REPEAT,
        WrapMode::Repeat => vk::SamplerAddressMode::REPEAT,
    }
}

/// Sample count flag for an engine sample count (0 and 1 are single-sampled).
pub fn convert_samples(samples: u32) -> vk::SampleCountFlags {
    match samples {
        0 | 1 => vk::SampleCountFlags::TYPE_1,
        2 => vk::SampleCountFlags::TYPE_2,
        4 => vk::SampleCountFlags::TYPE_4,
        8 => vk::SampleCountFlags::TYPE_8,
        16 => vk::SampleCountFlags::TYPE_16,
        32 => vk::SampleCountFlags::TYPE_32,
        64 => vk::SampleCountFlags::TYPE_64,
        other => panic!("invalid sample count {}", other),
    }
}

/// Largest sample count present in `flags`.
pub fn max_sample_count(flags: vk::SampleCountFlags) -> u32 {
    [64, 32, 16, 8, 4, 2]
        .into_iter()
        .find(|&n| flags.contains(convert_samples(n)))
        .unwrap_or(1)
}

pub fn convert_load_op(op: LoadOp) -> vk::AttachmentLoadOp {
    match op {
        LoadOp::Load => vk::AttachmentLoadOp::LOAD,
        LoadOp::Clear => vk::AttachmentLoadOp::CLEAR,
        LoadOp::DontCare => vk::AttachmentLoadOp::DONT_CARE,
    }
}

pub fn convert_store_op(op: StoreOp) -> vk::AttachmentStoreOp {
    match op {
        StoreOp::Store => vk::AttachmentStoreOp::STORE,
        StoreOp::DontCare => vk::AttachmentStoreOp::DONT_CARE,
    }
}

pub fn convert_topology(topology: PrimitiveTopology) -> vk::PrimitiveTopology {
    match topology {
        PrimitiveTopology::PointList => vk::PrimitiveTopology::POINT_LIST,
        PrimitiveTopology::LineStrip => vk::PrimitiveTopology::LINE_STRIP,
        PrimitiveTopology::LineList => vk::PrimitiveTopology::LINE_LIST,
        PrimitiveTopology::TriangleStrip => vk::PrimitiveTopology::TRIANGLE_STRIP,
        PrimitiveTopology::TriangleList => vk::PrimitiveTopology::TRIANGLE_LIST,
    }
}

pub fn convert_blend_factor(factor: BlendFactor) -> vk::BlendFactor {
    match factor {
        BlendFactor::Zero => vk::BlendFactor::ZERO,
        BlendFactor::One => vk::BlendFactor::ONE,
        BlendFactor::SrcColor => vk::BlendFactor::SRC_COLOR,
        BlendFactor::OneMinusSrcColor => vk::BlendFactor::ONE_MINUS_SRC_COLOR,
        BlendFactor::DstColor => vk::BlendFactor::DST_COLOR,
        BlendFactor::OneMinusDstColor => vk::BlendFactor::ONE_MINUS_DST_COLOR,
        BlendFactor::SrcAlpha => vk::BlendFactor::SRC_ALPHA,
        BlendFactor::OneMinusSrcAlpha => vk::BlendFactor::ONE_MINUS_SRC_ALPHA,
        BlendFactor::DstAlpha => vk::BlendFactor::DST_ALPHA,
        BlendFactor::OneMinusDstAlpha => vk::BlendFactor::ONE_MINUS_DST_ALPHA,
    }
}

pub fn convert_blend_op(op: BlendOp) -> vk::BlendOp {
    match op {
        BlendOp::Add => vk::BlendOp::ADD,
        BlendOp::Subtract => vk::BlendOp::SUBTRACT,
        BlendOp::ReverseSubtract => vk::BlendOp::REVERSE_SUBTRACT,
        BlendOp::Min => vk::BlendOp::MIN,
        BlendOp::Max => vk::BlendOp::MAX,
    }
}

pub fn convert_compare_op(op: CompareOp) -> vk::CompareOp {
    match op {
        CompareOp::Never => vk::CompareOp::NEVER,
        CompareOp::Less => vk::CompareOp::LESS,
        CompareOp::Equal => vk::CompareOp::EQUAL,
        CompareOp::LessOrEqual => vk::CompareOp::LESS_OR_EQUAL,
        CompareOp::Greater => vk::CompareOp::GREATER,
        CompareOp::NotEqual => vk::CompareOp::NOT_EQUAL,
        CompareOp::GreaterOrEqual => vk::CompareOp::GREATER_OR_EQUAL,
        CompareOp::Always => vk::CompareOp::ALWAYS,
    }
}

pub fn convert_stencil_op(op: StencilOp) -> vk::StencilOp {
    match op {
        StencilOp::Keep => vk::StencilOp::KEEP,
        StencilOp::Zero => vk::StencilOp::ZERO,
        StencilOp::Replace => vk::StencilOp::REPLACE,
        StencilOp::IncrementAndClamp => vk::StencilOp::INCREMENT_AND_CLAMP,
        StencilOp::DecrementAndClamp => vk::StencilOp::DECREMENT_AND_CLAMP,
        StencilOp::Invert => vk::StencilOp::INVERT,
        StencilOp::IncrementAndWrap => vk::StencilOp::INCREMENT_AND_WRAP,
        StencilOp::DecrementAndWrap => vk::StencilOp::DECREMENT_AND_WRAP,
    }
}

pub fn convert_cull_mode(mode: CullMode) -> vk::CullModeFlags {
    match mode {
        CullMode::None => vk::CullModeFlags::NONE,
        CullMode::Front => vk::CullModeFlags::FRONT,
        CullMode::Back => vk::CullModeFlags::BACK,
    }
}

pub fn convert_color_mask(mask: ColorComponents) -> vk::ColorComponentFlags {
    let mut flags = vk::ColorComponentFlags::empty();
    if mask.contains(ColorComponents::R) {
        flags |= vk::ColorComponentFlags::R;
    }
    if mask.contains(ColorComponents::G) {
        flags |= vk::ColorComponentFlags::G;
    }
    if mask.contains(ColorComponents::B) {
        flags |= vk::ColorComponentFlags::B;
    }
    if mask.contains(ColorComponents::A) {
        flags |= vk::ColorComponentFlags::A;
    }
    flags
}

pub fn convert_shader_stage(stage: ShaderStage) -> vk::ShaderStageFlags {
    match stage {
        ShaderStage::Vertex => vk::ShaderStageFlags::VERTEX,
        ShaderStage::Fragment => vk::ShaderStageFlags::FRAGMENT,
        ShaderStage::Compute => vk::ShaderStageFlags::COMPUTE,
    }
}
