//! Shared setup for GPU integration tests.
//!
//! Every test creates its own offscreen context and skips itself when no
//! Vulkan device is present on the machine.

#![allow(dead_code)]

use std::sync::Arc;

use ash::vk;
use ngpu_vk::backend::vulkan::{Buffer, GpuContextVk, Pipeline, Program, Texture, VkContext};
use ngpu_vk::types::{
    AttributeDesc, BufferBinding, BufferBindingDesc, BufferBindingType, BufferUsage, Format,
    GraphicsPipelineDesc, PipelineLayoutDesc, PipelineParams, PipelineResources, PipelineType,
    PrimitiveTopology, ProgramParams, ShaderStage, TextureBindingDesc, TextureBindingType,
};
use ngpu_vk::{GpuBackend, GpuConfig};

// ============================================================================
// Backend Enumeration
// ============================================================================

/// GPU backends the tests run against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Backend {
    /// Vulkan through ash.
    Vulkan,
}

impl Backend {
    pub fn name(&self) -> &'static str {
        match self {
            Backend::Vulkan => "vulkan",
        }
    }
}

// ============================================================================
// Test Context
// ============================================================================

pub const WIDTH: u32 = 64;
pub const HEIGHT: u32 = 64;

/// An offscreen context owned by one test.
pub struct TestContext {
    pub backend: Backend,
    pub gpu: GpuContextVk,
}

impl TestContext {
    /// 64×64 offscreen context with a capture buffer.
    ///
    /// Returns `None` if the backend cannot be initialized here.
    pub fn new(backend: Backend) -> Option<Self> {
        Self::with_config(
            backend,
            GpuConfig::offscreen(WIDTH, HEIGHT)
                .with_capture_buffer(true)
                .with_validation(false),
        )
    }

    pub fn with_config(backend: Backend, config: GpuConfig) -> Option<Self> {
        let _ = env_logger::builder().is_test(true).try_init();
        match backend {
            Backend::Vulkan => match GpuContextVk::new(config) {
                Ok(gpu) => Some(Self { backend, gpu }),
                Err(e) => {
                    eprintln!("Failed to create {} context: {}", backend.name(), e);
                    None
                }
            },
        }
    }

    /// Run an empty update then a draw that only renders `draw` into the
    /// default render target.
    pub fn render_frame(&mut self, draw: impl FnOnce(&mut GpuContextVk)) {
        self.gpu.begin_update().expect("begin_update failed");
        self.gpu.end_update().expect("end_update failed");
        self.gpu.begin_draw().expect("begin_draw failed");
        let rt = self
            .gpu
            .default_rendertarget(ngpu_vk::types::LoadOp::Clear)
            .expect("no default render target");
        self.gpu.begin_render_pass(&rt).expect("begin_render_pass failed");
        draw(&mut self.gpu);
        self.gpu.end_render_pass().expect("end_render_pass failed");
        self.gpu.end_draw().expect("end_draw failed");
    }

    pub fn create_buffer_with_data(&mut self, data: &[u8], usage: BufferUsage) -> Arc<Buffer> {
        let buffer = self
            .gpu
            .create_buffer(data.len() as u64, usage)
            .expect("Failed to create buffer");
        self.gpu
            .buffer_upload(&buffer, data, 0)
            .expect("Failed to upload buffer");
        buffer
    }
}

impl Drop for TestContext {
    fn drop(&mut self) {
        let _ = self.gpu.wait_idle();
    }
}

// ============================================================================
// Pixel Helpers
// ============================================================================

/// RGBA pixel at (x, y) of a tightly packed capture.
pub fn get_pixel(pixels: &[u8], width: u32, x: u32, y: u32) -> [u8; 4] {
    let offset = ((y * width + x) * 4) as usize;
    [
        pixels[offset],
        pixels[offset + 1],
        pixels[offset + 2],
        pixels[offset + 3],
    ]
}

pub fn assert_all_pixels(pixels: &[u8], expected: [u8; 4]) {
    for (i, pixel) in pixels.chunks_exact(4).enumerate() {
        assert_eq!(pixel, expected, "pixel {} differs", i);
    }
}

// ============================================================================
// Pipeline Helpers
// ============================================================================

pub const QUAD_VERTICES: [[f32; 2]; 4] = [[-1.0, -1.0], [1.0, -1.0], [-1.0, 1.0], [1.0, 1.0]];

pub const COLOR_VERTEX_SHADER: &str = r#"
layout(location = 0) in vec2 position;
void main() {
    gl_Position = vec4(position, 0.0, 1.0);
}
"#;

pub const COLOR_FRAGMENT_SHADER: &str = r#"
layout(std140, set = 0, binding = 0) uniform Params {
    vec4 tint;
};
layout(location = 0) out vec4 color;
void main() {
    color = tint;
}
"#;

pub const FILL_COMPUTE_SHADER: &str = r#"
layout(local_size_x = 4) in;
layout(std430, set = 0, binding = 0) buffer Data {
    uint values[4];
};
void main() {
    uint i = gl_GlobalInvocationID.x;
    values[i] = i * 2u + 1u;
}
"#;

pub fn color_layout() -> PipelineLayoutDesc {
    PipelineLayoutDesc {
        buffers: vec![BufferBindingDesc {
            name: "params".to_string(),
            ty: BufferBindingType::Uniform,
            binding: 0,
            stage: ShaderStage::Fragment,
        }],
        textures: Vec::new(),
        attributes: vec![AttributeDesc {
            name: "position".to_string(),
            location: 0,
            format: Format::R32G32Sfloat,
            stride: 8,
            offset: 0,
            rate: 0,
        }],
    }
}

/// Graphics pipeline filling the default render target with a uniform color.
pub fn create_color_pipeline(ctx: &mut TestContext) -> Pipeline {
    let program = ctx
        .gpu
        .create_program(&ProgramParams {
            label: Some("color".to_string()),
            vertex: Some(COLOR_VERTEX_SHADER.to_string()),
            fragment: Some(COLOR_FRAGMENT_SHADER.to_string()),
            compute: None,
        })
        .expect("Failed to create program");
    create_pipeline(ctx, program, PipelineType::Graphics, color_layout())
}

pub fn create_pipeline(
    ctx: &mut TestContext,
    program: Arc<Program>,
    ty: PipelineType,
    layout: PipelineLayoutDesc,
) -> Pipeline {
    let graphics = GraphicsPipelineDesc {
        topology: PrimitiveTopology::TriangleStrip,
        rt_desc: ctx.gpu.default_rendertarget_desc().clone(),
        ..Default::default()
    };
    ctx.gpu
        .create_pipeline(PipelineParams {
            ty,
            graphics,
            program,
            layout,
        })
        .expect("Failed to create pipeline")
}

/// Bind the quad vertices and a uniform buffer holding `tint`.
pub fn bind_color_resources(ctx: &mut TestContext, pipeline: &mut Pipeline, tint: [f32; 4]) {
    let vertices = ctx.create_buffer_with_data(
        bytemuck::cast_slice(&QUAD_VERTICES[..]),
        BufferUsage::VERTEX | BufferUsage::MAP_WRITE,
    );
    let uniforms = ctx.create_buffer_with_data(
        bytemuck::cast_slice(&tint[..]),
        BufferUsage::UNIFORM | BufferUsage::MAP_WRITE,
    );
    let resources = PipelineResources {
        attributes: vec![Some(vertices)],
        buffers: vec![BufferBinding {
            buffer: Some(uniforms),
            offset: 0,
            size: 0,
        }],
        textures: Vec::new(),
    };
    ctx.gpu
        .pipeline_set_resources(pipeline, &resources)
        .expect("Failed to set pipeline resources");
}

// ============================================================================
// Sampling Helpers
// ============================================================================

/// Full-screen triangle generated from the vertex index.
pub const SAMPLE_VERTEX_SHADER: &str = r#"
layout(location = 0) out vec2 uv;
void main() {
    vec2 pos = vec2(float((gl_VertexIndex << 1) & 2), float(gl_VertexIndex & 2));
    uv = pos;
    gl_Position = vec4(pos * 2.0 - 1.0, 0.0, 1.0);
}
"#;

pub const SAMPLE_FRAGMENT_SHADER: &str = r#"
layout(set = 0, binding = 0) uniform sampler2D tex;
layout(location = 0) in vec2 uv;
layout(location = 0) out vec4 color;
void main() {
    color = texture(tex, uv);
}
"#;

pub fn sample_layout() -> PipelineLayoutDesc {
    PipelineLayoutDesc {
        buffers: Vec::new(),
        textures: vec![TextureBindingDesc {
            name: "tex".to_string(),
            ty: TextureBindingType::Sampler,
            binding: 0,
            stage: ShaderStage::Fragment,
        }],
        attributes: Vec::new(),
    }
}

/// Graphics pipeline copying texture binding 0 over the whole render target.
pub fn create_sampling_pipeline(ctx: &mut TestContext) -> Pipeline {
    let program = ctx
        .gpu
        .create_program(&ProgramParams {
            label: Some("sample".to_string()),
            vertex: Some(SAMPLE_VERTEX_SHADER.to_string()),
            fragment: Some(SAMPLE_FRAGMENT_SHADER.to_string()),
            compute: None,
        })
        .expect("Failed to create sampling program");
    create_pipeline(ctx, program, PipelineType::Graphics, sample_layout())
}

pub fn bind_texture(ctx: &mut TestContext, pipeline: &mut Pipeline, texture: Arc<Texture>) {
    let resources = PipelineResources {
        attributes: Vec::new(),
        buffers: Vec::new(),
        textures: vec![Some(texture)],
    };
    ctx.gpu
        .pipeline_set_resources(pipeline, &resources)
        .expect("Failed to set pipeline resources");
}

pub const YCBCR_FORMAT: vk::Format = vk::Format::G8_B8R8_2PLANE_420_UNORM;

/// A two-plane 4:2:0 image allocated outside the engine, as a video decoder
/// would hand it over.
pub struct ExternalYcbcrImage {
    ctx: Arc<VkContext>,
    pub image: vk::Image,
    memory: vk::DeviceMemory,
}

impl ExternalYcbcrImage {
    /// Returns `None` when the device cannot sample the format through a
    /// conversion.
    pub fn new(ctx: &TestContext, width: u32, height: u32) -> Option<Self> {
        let vk_ctx = Arc::clone(ctx.gpu.vk_context());
        let required = vk::FormatFeatureFlags::SAMPLED_IMAGE
            | vk::FormatFeatureFlags::MIDPOINT_CHROMA_SAMPLES
            | vk::FormatFeatureFlags::SAMPLED_IMAGE_YCBCR_CONVERSION_LINEAR_FILTER;
        if !vk_ctx.ycbcr_supported() || !vk_ctx.format_features(YCBCR_FORMAT).contains(required) {
            return None;
        }

        let device = vk_ctx.device();
        let image_info = vk::ImageCreateInfo::default()
            .image_type(vk::ImageType::TYPE_2D)
            .format(YCBCR_FORMAT)
            .extent(vk::Extent3D {
                width,
                height,
                depth: 1,
            })
            .mip_levels(1)
            .array_layers(1)
            .samples(vk::SampleCountFlags::TYPE_1)
            .tiling(vk::ImageTiling::OPTIMAL)
            .usage(vk::ImageUsageFlags::SAMPLED)
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .initial_layout(vk::ImageLayout::UNDEFINED);
        let image = unsafe { device.create_image(&image_info, None) }.ok()?;

        let requirements = unsafe { device.get_image_memory_requirements(image) };
        let memory = vk_ctx
            .find_memory_type(
                requirements.memory_type_bits,
                vk::MemoryPropertyFlags::DEVICE_LOCAL,
            )
            .and_then(|type_index| {
                let alloc_info = vk::MemoryAllocateInfo::default()
                    .allocation_size(requirements.size)
                    .memory_type_index(type_index);
                unsafe { device.allocate_memory(&alloc_info, None) }.ok()
            });
        let Some(memory) = memory else {
            unsafe { device.destroy_image(image, None) };
            return None;
        };
        if unsafe { device.bind_image_memory(image, memory, 0) }.is_err() {
            unsafe {
                device.destroy_image(image, None);
                device.free_memory(memory, None);
            }
            return None;
        }

        Some(Self {
            ctx: vk_ctx,
            image,
            memory,
        })
    }
}

impl Drop for ExternalYcbcrImage {
    fn drop(&mut self) {
        let _ = self.ctx.wait_idle();
        let device = self.ctx.device();
        unsafe {
            device.destroy_image(self.image, None);
            device.free_memory(self.memory, None);
        }
    }
}
