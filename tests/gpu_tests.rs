//! GPU integration tests for the Vulkan context.
//!
//! Each test creates an offscreen context and skips itself when no Vulkan
//! device is available.
//!
//! ```bash
//! cargo test --test gpu_tests
//! ```

mod common;

use std::sync::Arc;

use rstest::rstest;

use ash::vk;
use common::{
    assert_all_pixels, bind_color_resources, bind_texture, create_color_pipeline, create_pipeline,
    create_sampling_pipeline, get_pixel, Backend, ExternalYcbcrImage, TestContext,
    FILL_COMPUTE_SHADER, HEIGHT, WIDTH, YCBCR_FORMAT,
};
use ngpu_vk::backend::vulkan::{
    CommandBuffer, CommandPool, DirtyFrames, Texture, TextureLayout, TextureWrapParams,
    YcbcrParams, YcbcrSamplerSlot,
};
use ngpu_vk::types::{
    BufferBinding, BufferBindingDesc, BufferBindingType, BufferUsage, CullMode, Features, Filter,
    Format, LoadOp, MipmapFilter, PipelineLayoutDesc, PipelineResources, PipelineType,
    ProgramParams, ShaderStage, TextureParams, TextureUsage, Viewport,
};
use ngpu_vk::backend::traits::{IDENTITY_MATRIX, VK_CLIP_CORRECTION};
use ngpu_vk::{GpuBackend, GpuConfig, GpuError};

// ============================================================================
// Frame Loop Tests
// ============================================================================

/// Clearing the default render target shows up in the capture buffer.
#[rstest]
#[case::vulkan(Backend::Vulkan)]
fn test_clear_is_captured(#[case] backend: Backend) {
    let config = GpuConfig::offscreen(WIDTH, HEIGHT)
        .with_capture_buffer(true)
        .with_clear_color([1.0, 1.0, 1.0, 1.0])
        .with_validation(false);
    let Some(mut ctx) = TestContext::with_config(backend, config) else {
        eprintln!("Backend {:?} not available, skipping", backend);
        return;
    };

    ctx.render_frame(|_| {});

    let pixels = ctx.gpu.capture_buffer().expect("capture buffer missing");
    assert_eq!(pixels.len(), (WIDTH * HEIGHT * 4) as usize);
    assert_all_pixels(pixels, [255, 255, 255, 255]);
}

/// Multisampled default targets resolve into the captured color.
#[rstest]
#[case::vulkan(Backend::Vulkan)]
fn test_multisampled_clear_is_resolved(#[case] backend: Backend) {
    let Some(caps) = TestContext::new(backend) else {
        eprintln!("Backend {:?} not available, skipping", backend);
        return;
    };
    if caps.gpu.limits().max_samples < 4 {
        eprintln!("4x MSAA not supported, skipping");
        return;
    }
    drop(caps);

    let config = GpuConfig::offscreen(WIDTH, HEIGHT)
        .with_capture_buffer(true)
        .with_samples(4)
        .with_clear_color([0.0, 0.0, 1.0, 1.0])
        .with_validation(false);
    let Some(mut ctx) = TestContext::with_config(backend, config) else {
        return;
    };
    assert_eq!(ctx.gpu.default_rendertarget_desc().samples, 4);
    assert!(ctx.gpu.default_rendertarget_desc().colors[0].resolve);

    ctx.render_frame(|_| {});

    let pixels = ctx.gpu.capture_buffer().expect("capture buffer missing");
    assert_all_pixels(pixels, [0, 0, 255, 255]);
}

/// A uniform-colored quad covers the whole default render target.
#[rstest]
#[case::vulkan(Backend::Vulkan)]
fn test_draw_colored_quad(#[case] backend: Backend) {
    let Some(mut ctx) = TestContext::new(backend) else {
        eprintln!("Backend {:?} not available, skipping", backend);
        return;
    };

    let mut pipeline = create_color_pipeline(&mut ctx);
    bind_color_resources(&mut ctx, &mut pipeline, [1.0, 0.0, 0.0, 1.0]);

    ctx.render_frame(|gpu| {
        gpu.draw(&mut pipeline, 4, 1).expect("draw failed");
    });

    let pixels = ctx.gpu.capture_buffer().expect("capture buffer missing");
    assert_eq!(get_pixel(pixels, WIDTH, 0, 0), [255, 0, 0, 255]);
    assert_eq!(get_pixel(pixels, WIDTH, WIDTH / 2, HEIGHT / 2), [255, 0, 0, 255]);
    assert_eq!(get_pixel(pixels, WIDTH, WIDTH - 1, HEIGHT - 1), [255, 0, 0, 255]);
}

/// Several frames in flight cycle through their frame slots.
#[rstest]
#[case::vulkan(Backend::Vulkan)]
fn test_in_flight_frames_cycle(#[case] backend: Backend) {
    let config = GpuConfig::offscreen(WIDTH, HEIGHT)
        .with_in_flight_frames(3)
        .with_validation(false);
    let Some(mut ctx) = TestContext::with_config(backend, config) else {
        eprintln!("Backend {:?} not available, skipping", backend);
        return;
    };

    assert_eq!(ctx.gpu.nb_in_flight_frames(), 3);
    let mut seen = Vec::new();
    for _ in 0..6 {
        ctx.render_frame(|_| {});
        seen.push(ctx.gpu.current_frame());
    }
    assert_eq!(seen, vec![1, 2, 0, 1, 2, 0]);
    assert!(ctx.gpu.capture_buffer().is_none());
}

#[rstest]
#[case::vulkan(Backend::Vulkan)]
fn test_draw_time_query(#[case] backend: Backend) {
    let config = GpuConfig::offscreen(WIDTH, HEIGHT)
        .with_hud(true)
        .with_validation(false);
    let Some(mut ctx) = TestContext::with_config(backend, config) else {
        eprintln!("Backend {:?} not available, skipping", backend);
        return;
    };

    ctx.gpu.begin_update().unwrap();
    ctx.gpu.end_update().unwrap();
    ctx.gpu.begin_draw().unwrap();
    let time = ctx.gpu.query_draw_time();
    assert!(time.is_ok(), "query failed: {:?}", time);
    ctx.gpu.end_draw().unwrap();
}

/// Indexed draws go through the index buffer.
#[rstest]
#[case::vulkan(Backend::Vulkan)]
fn test_draw_indexed_quad(#[case] backend: Backend) {
    let Some(mut ctx) = TestContext::new(backend) else {
        eprintln!("Backend {:?} not available, skipping", backend);
        return;
    };

    let mut pipeline = create_color_pipeline(&mut ctx);
    bind_color_resources(&mut ctx, &mut pipeline, [0.0, 1.0, 0.0, 1.0]);
    let indices: [u16; 4] = [0, 1, 2, 3];
    let index_buffer = ctx.create_buffer_with_data(
        bytemuck::cast_slice(&indices[..]),
        BufferUsage::INDEX | BufferUsage::MAP_WRITE,
    );

    ctx.render_frame(|gpu| {
        gpu.draw_indexed(&mut pipeline, &index_buffer, Format::R16Unorm, 4, 1)
            .expect("draw_indexed failed");
    });

    let pixels = ctx.gpu.capture_buffer().expect("capture buffer missing");
    assert_all_pixels(pixels, [0, 255, 0, 255]);
}

#[rstest]
#[case::vulkan(Backend::Vulkan)]
fn test_capture_buffer_toggle(#[case] backend: Backend) {
    let config = GpuConfig::offscreen(WIDTH, HEIGHT).with_validation(false);
    let Some(mut ctx) = TestContext::with_config(backend, config) else {
        eprintln!("Backend {:?} not available, skipping", backend);
        return;
    };

    assert!(ctx.gpu.capture_buffer().is_none());
    ctx.gpu.set_capture_buffer(true).unwrap();
    ctx.render_frame(|_| {});
    assert_eq!(
        ctx.gpu.capture_buffer().map(|pixels| pixels.len()),
        Some((WIDTH * HEIGHT * 4) as usize)
    );

    ctx.gpu.set_capture_buffer(false).unwrap();
    ctx.render_frame(|_| {});
    assert!(ctx.gpu.capture_buffer().is_none());
}

#[rstest]
#[case::vulkan(Backend::Vulkan)]
fn test_coordinate_conventions(#[case] backend: Backend) {
    let Some(ctx) = TestContext::new(backend) else {
        eprintln!("Backend {:?} not available, skipping", backend);
        return;
    };

    assert_eq!(ctx.gpu.transform_cull_mode(CullMode::Back), CullMode::Front);
    assert_eq!(ctx.gpu.rendertarget_uvcoord_matrix(), IDENTITY_MATRIX);

    let mut projection = IDENTITY_MATRIX;
    ctx.gpu.transform_projection_matrix(&mut projection);
    assert_eq!(projection, VK_CLIP_CORRECTION);

    let clear = ctx.gpu.default_rendertarget(LoadOp::Clear).unwrap();
    let load = ctx.gpu.default_rendertarget(LoadOp::Load).unwrap();
    assert!(!Arc::ptr_eq(&clear, &load));
    assert_eq!(clear.width(), WIDTH);
}

#[rstest]
#[case::vulkan(Backend::Vulkan)]
fn test_device_capabilities(#[case] backend: Backend) {
    let Some(ctx) = TestContext::new(backend) else {
        eprintln!("Backend {:?} not available, skipping", backend);
        return;
    };

    let features = ctx.gpu.features();
    assert!(features.contains(Features::COMPUTE | Features::INSTANCED_DRAW));
    assert_eq!(
        features.contains(Features::YCBCR_CONVERSION),
        ctx.gpu.vk_context().ycbcr_supported()
    );

    let limits = ctx.gpu.limits();
    assert!(limits.max_samples >= 1);
    assert!(limits.max_samples.is_power_of_two());
}

/// Asking for more samples than the device offers fails at creation.
#[rstest]
#[case::vulkan(Backend::Vulkan)]
fn test_unsupported_sample_count_is_rejected(#[case] backend: Backend) {
    let Some(caps) = TestContext::new(backend) else {
        eprintln!("Backend {:?} not available, skipping", backend);
        return;
    };
    let max_samples = caps.gpu.limits().max_samples;
    drop(caps);
    if max_samples >= 64 {
        eprintln!("Device supports every sample count, skipping");
        return;
    }

    let config = GpuConfig::offscreen(WIDTH, HEIGHT)
        .with_samples(max_samples * 2)
        .with_validation(false);
    assert!(matches!(
        ngpu_vk::backend::vulkan::GpuContextVk::new(config),
        Err(GpuError::InvalidArg(_))
    ));
}

// ============================================================================
// Error Path Tests
// ============================================================================

#[rstest]
#[case::vulkan(Backend::Vulkan)]
fn test_offscreen_resize_is_rejected(#[case] backend: Backend) {
    let Some(mut ctx) = TestContext::new(backend) else {
        eprintln!("Backend {:?} not available, skipping", backend);
        return;
    };

    let result = ctx.gpu.resize(128, 128, None);
    assert!(matches!(result, Err(GpuError::InvalidArg(_))));
    assert_eq!(ctx.gpu.viewport(), Viewport::new(0, 0, WIDTH as i32, HEIGHT as i32));
}

#[rstest]
#[case::vulkan(Backend::Vulkan)]
fn test_draw_time_requires_hud(#[case] backend: Backend) {
    let Some(mut ctx) = TestContext::new(backend) else {
        eprintln!("Backend {:?} not available, skipping", backend);
        return;
    };

    ctx.gpu.begin_update().unwrap();
    ctx.gpu.end_update().unwrap();
    ctx.gpu.begin_draw().unwrap();
    assert!(matches!(
        ctx.gpu.query_draw_time(),
        Err(GpuError::InvalidArg(_))
    ));
    ctx.gpu.end_draw().unwrap();
}

#[rstest]
#[case::vulkan(Backend::Vulkan)]
fn test_absent_binding_is_not_found(#[case] backend: Backend) {
    let Some(mut ctx) = TestContext::new(backend) else {
        eprintln!("Backend {:?} not available, skipping", backend);
        return;
    };

    let mut pipeline = create_color_pipeline(&mut ctx);
    let layout = common::color_layout();
    assert_eq!(layout.buffer_index("missing"), -1);

    let result = ctx.gpu.pipeline_update_buffer(
        &mut pipeline,
        layout.buffer_index("missing"),
        None,
        0,
        0,
    );
    assert_eq!(result, Err(GpuError::NotFound));

    let result = ctx.gpu.pipeline_update_texture(&mut pipeline, 5, None);
    assert!(matches!(result, Err(GpuError::InvalidArg(_))));
}

#[rstest]
#[case::vulkan(Backend::Vulkan)]
fn test_draw_outside_render_pass_is_rejected(#[case] backend: Backend) {
    let Some(mut ctx) = TestContext::new(backend) else {
        eprintln!("Backend {:?} not available, skipping", backend);
        return;
    };

    let mut pipeline = create_color_pipeline(&mut ctx);
    assert!(matches!(
        ctx.gpu.draw(&mut pipeline, 3, 1),
        Err(GpuError::InvalidArg(_))
    ));
}

// ============================================================================
// Descriptor Set Tests
// ============================================================================

/// Every frame slot starts dirty; an update only dirties the recording slot.
#[rstest]
#[case::vulkan(Backend::Vulkan)]
fn test_binding_updates_only_dirty_current_frame(#[case] backend: Backend) {
    let config = GpuConfig::offscreen(WIDTH, HEIGHT)
        .with_in_flight_frames(2)
        .with_validation(false);
    let Some(mut ctx) = TestContext::with_config(backend, config) else {
        eprintln!("Backend {:?} not available, skipping", backend);
        return;
    };

    let mut pipeline = create_color_pipeline(&mut ctx);
    assert_eq!(pipeline.nb_descriptor_sets(), 2);
    assert_eq!(pipeline.buffer_dirty_frames(0), Some(DirtyFrames::all(2)));

    bind_color_resources(&mut ctx, &mut pipeline, [0.0, 1.0, 0.0, 1.0]);

    // Drawing in both slots writes both descriptor sets.
    for _ in 0..2 {
        ctx.render_frame(|gpu| {
            gpu.draw(&mut pipeline, 4, 1).expect("draw failed");
        });
    }
    assert_eq!(pipeline.buffer_dirty_frames(0), Some(DirtyFrames::none()));

    let uniforms = ctx
        .gpu
        .create_buffer(16, BufferUsage::UNIFORM | BufferUsage::MAP_WRITE)
        .unwrap();
    ctx.gpu.begin_update().unwrap();
    let frame = ctx.gpu.current_frame();
    for _ in 0..2 {
        ctx.gpu
            .pipeline_update_buffer(&mut pipeline, 0, Some(Arc::clone(&uniforms)), 0, 0)
            .unwrap();
    }
    ctx.gpu.end_update().unwrap();

    let dirty = pipeline.buffer_dirty_frames(0).unwrap();
    assert!(dirty.contains(frame));
    assert_eq!(dirty.bits(), 1 << frame);
}

// ============================================================================
// Compute Tests
// ============================================================================

/// A dispatch outside any frame completes before returning.
#[rstest]
#[case::vulkan(Backend::Vulkan)]
fn test_compute_dispatch_writes_storage_buffer(#[case] backend: Backend) {
    let Some(mut ctx) = TestContext::new(backend) else {
        eprintln!("Backend {:?} not available, skipping", backend);
        return;
    };

    let program = ctx
        .gpu
        .create_program(&ProgramParams {
            label: Some("fill".to_string()),
            compute: Some(FILL_COMPUTE_SHADER.to_string()),
            ..Default::default()
        })
        .expect("Failed to create compute program");
    let layout = PipelineLayoutDesc {
        buffers: vec![BufferBindingDesc {
            name: "data".to_string(),
            ty: BufferBindingType::Storage,
            binding: 0,
            stage: ShaderStage::Compute,
        }],
        ..Default::default()
    };
    let mut pipeline = create_pipeline(&mut ctx, program, PipelineType::Compute, layout);

    let storage = ctx
        .gpu
        .create_buffer(16, BufferUsage::STORAGE | BufferUsage::MAP_READ)
        .unwrap();
    let resources = PipelineResources {
        attributes: Vec::new(),
        buffers: vec![BufferBinding {
            buffer: Some(Arc::clone(&storage)),
            offset: 0,
            size: 0,
        }],
        textures: Vec::new(),
    };
    ctx.gpu
        .pipeline_set_resources(&mut pipeline, &resources)
        .unwrap();
    ctx.gpu.dispatch(&mut pipeline, [1, 1, 1]).unwrap();

    let mapped = ctx.gpu.buffer_map(&storage, 0, 16).unwrap();
    let values: &[u32] = bytemuck::cast_slice(&mapped[..]);
    assert_eq!(values, &[1, 3, 5, 7]);
}

// ============================================================================
// Resource Tests
// ============================================================================

#[rstest]
#[case::vulkan(Backend::Vulkan)]
fn test_host_visible_buffer_roundtrip(#[case] backend: Backend) {
    let Some(mut ctx) = TestContext::new(backend) else {
        eprintln!("Backend {:?} not available, skipping", backend);
        return;
    };

    let data: Vec<u8> = (0..64u8).collect();
    let buffer = ctx.create_buffer_with_data(&data, BufferUsage::MAP_READ | BufferUsage::MAP_WRITE);
    {
        let mapped = ctx.gpu.buffer_map(&buffer, 16, 8).unwrap();
        assert_eq!(&mapped[..], &data[16..24]);
    }
    ctx.gpu.buffer_unmap(&buffer);

    assert!(matches!(
        ctx.gpu.buffer_upload(&buffer, &data, 32),
        Err(GpuError::InvalidArg(_))
    ));
}

/// Transitioning a texture to the layout it already holds records nothing.
#[rstest]
#[case::vulkan(Backend::Vulkan)]
fn test_layout_transition_is_idempotent(#[case] backend: Backend) {
    let Some(mut ctx) = TestContext::new(backend) else {
        eprintln!("Backend {:?} not available, skipping", backend);
        return;
    };

    let params = TextureParams::new_2d(
        16,
        16,
        Format::R8G8B8A8Unorm,
        TextureUsage::SAMPLED | TextureUsage::TRANSFER_DST,
    );
    let texture = ctx.gpu.create_texture(&params).unwrap();
    assert_eq!(texture.layout(), TextureLayout::ShaderReadOnly);

    let pool = CommandPool::new(ctx.gpu.vk_context()).unwrap();
    let mut cmd = CommandBuffer::begin_transient(&pool).unwrap();
    assert!(!texture.transition_layout(&mut cmd, TextureLayout::ShaderReadOnly));
    assert!(texture.transition_layout(&mut cmd, TextureLayout::TransferDst));
    assert!(!texture.transition_layout(&mut cmd, TextureLayout::TransferDst));
    assert!(texture.transition_to_default_layout(&mut cmd));
    cmd.execute_transient().unwrap();
    assert_eq!(texture.layout(), TextureLayout::ShaderReadOnly);
}

#[rstest]
#[case::vulkan(Backend::Vulkan)]
fn test_texture_upload_and_mipmaps(#[case] backend: Backend) {
    let Some(mut ctx) = TestContext::new(backend) else {
        eprintln!("Backend {:?} not available, skipping", backend);
        return;
    };

    let params = TextureParams::new_2d(
        64,
        32,
        Format::R8G8B8A8Unorm,
        TextureUsage::SAMPLED | TextureUsage::TRANSFER_SRC | TextureUsage::TRANSFER_DST,
    )
    .with_filters(Filter::Linear, Filter::Linear, MipmapFilter::Linear);
    let texture = ctx.gpu.create_texture(&params).unwrap();
    assert_eq!(texture.mip_levels(), 7);

    let data = vec![128u8; 64 * 32 * 4];
    ctx.gpu.texture_upload(&texture, &data, 0).unwrap();
    ctx.gpu.texture_generate_mipmap(&texture).unwrap();
    assert_eq!(texture.layout(), TextureLayout::ShaderReadOnly);

    let too_short = vec![0u8; 16];
    assert!(matches!(
        ctx.gpu.texture_upload(&texture, &too_short, 0),
        Err(GpuError::InvalidArg(_))
    ));
}

/// Identical YCbCr parameters share one sampler.
#[rstest]
#[case::vulkan(Backend::Vulkan)]
fn test_ycbcr_samplers_are_shared(#[case] backend: Backend) {
    let Some(mut ctx) = TestContext::new(backend) else {
        eprintln!("Backend {:?} not available, skipping", backend);
        return;
    };

    let params = YcbcrParams::default();
    let first = match ctx.gpu.ycbcr_sampler(&params) {
        Ok(sampler) => sampler,
        Err(GpuError::Unsupported(_)) => {
            eprintln!("YCbCr conversion not supported, skipping");
            return;
        }
        Err(e) => panic!("Failed to create YCbCr sampler: {}", e),
    };
    let second = ctx.gpu.ycbcr_sampler(&params).unwrap();
    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(ctx.gpu.ycbcr_sampler_cache().len(), 1);

    let full_range = YcbcrParams {
        range: vk::SamplerYcbcrRange::ITU_FULL,
        ..params
    };
    let third = ctx.gpu.ycbcr_sampler(&full_range).unwrap();
    assert!(!Arc::ptr_eq(&first, &third));
    assert_eq!(ctx.gpu.ycbcr_sampler_cache().len(), 2);

    drop(third);
    assert_eq!(ctx.gpu.ycbcr_sampler_cache().len(), 1);
}

/// A video slot keeps its sampler while frames stay compatible.
#[rstest]
#[case::vulkan(Backend::Vulkan)]
fn test_ycbcr_slot_replaces_incompatible_sampler(#[case] backend: Backend) {
    let Some(mut ctx) = TestContext::new(backend) else {
        eprintln!("Backend {:?} not available, skipping", backend);
        return;
    };

    let mut slot = YcbcrSamplerSlot::new();
    let params = YcbcrParams::default();
    let first = match ctx.gpu.update_ycbcr_slot(&mut slot, &params) {
        Ok(sampler) => sampler,
        Err(GpuError::Unsupported(_)) => {
            eprintln!("YCbCr conversion not supported, skipping");
            return;
        }
        Err(e) => panic!("Failed to update YCbCr slot: {}", e),
    };
    let again = ctx.gpu.update_ycbcr_slot(&mut slot, &params).unwrap();
    assert!(Arc::ptr_eq(&first, &again));
    drop(again);

    let nearest = YcbcrParams {
        filter: vk::Filter::NEAREST,
        ..params
    };
    let replaced = ctx.gpu.update_ycbcr_slot(&mut slot, &nearest).unwrap();
    assert!(!Arc::ptr_eq(&first, &replaced));
    assert!(Arc::ptr_eq(slot.current().unwrap(), &replaced));
    // Only the caller still holds the old sampler.
    assert_eq!(Arc::strong_count(&first), 1);

    drop(first);
    assert_eq!(ctx.gpu.ycbcr_sampler_cache().len(), 1);
    slot.reset();
    drop(replaced);
    assert!(ctx.gpu.ycbcr_sampler_cache().is_empty());
}

// ============================================================================
// Command Buffer Tests
// ============================================================================

/// An aborted recording releases its pins, hands back its waits and can be
/// begun again.
#[rstest]
#[case::vulkan(Backend::Vulkan)]
fn test_aborted_command_buffer_is_reusable(#[case] backend: Backend) {
    let Some(ctx) = TestContext::new(backend) else {
        eprintln!("Backend {:?} not available, skipping", backend);
        return;
    };

    let vk_ctx = ctx.gpu.vk_context();
    let device = vk_ctx.device();
    let wait_sem =
        unsafe { device.create_semaphore(&vk::SemaphoreCreateInfo::default(), None) }.unwrap();
    let signal_sem =
        unsafe { device.create_semaphore(&vk::SemaphoreCreateInfo::default(), None) }.unwrap();

    let pool = CommandPool::new(vk_ctx).unwrap();
    let mut cmd = CommandBuffer::begin_transient(&pool).unwrap();
    cmd.add_wait_semaphore(wait_sem, vk::PipelineStageFlags::ALL_COMMANDS);
    cmd.add_signal_semaphore(signal_sem);
    let pinned = Arc::new(5u32);
    cmd.pin(Arc::clone(&pinned) as Arc<dyn std::any::Any>);
    assert_eq!(Arc::strong_count(&pinned), 2);

    let waits = cmd.abort().unwrap();
    assert_eq!(waits, vec![wait_sem]);
    assert_eq!(Arc::strong_count(&pinned), 1);

    // Neither semaphore is referenced by the next submission.
    cmd.begin().unwrap();
    cmd.execute_transient().unwrap();

    unsafe {
        device.destroy_semaphore(wait_sem, None);
        device.destroy_semaphore(signal_sem, None);
    }
}

// ============================================================================
// Texture Sampling Tests
// ============================================================================

#[rstest]
#[case::vulkan(Backend::Vulkan)]
fn test_draw_sampled_texture(#[case] backend: Backend) {
    let Some(mut ctx) = TestContext::new(backend) else {
        eprintln!("Backend {:?} not available, skipping", backend);
        return;
    };

    let params = TextureParams::new_2d(
        WIDTH,
        HEIGHT,
        Format::R8G8B8A8Unorm,
        TextureUsage::SAMPLED | TextureUsage::TRANSFER_DST,
    );
    let texture = ctx.gpu.create_texture(&params).unwrap();
    let texels = [255u8, 0, 255, 255].repeat((WIDTH * HEIGHT) as usize);
    ctx.gpu.texture_upload(&texture, &texels, 0).unwrap();

    let mut pipeline = create_sampling_pipeline(&mut ctx);
    bind_texture(&mut ctx, &mut pipeline, texture);
    ctx.render_frame(|gpu| {
        gpu.draw(&mut pipeline, 3, 1).expect("draw failed");
    });

    let pixels = ctx.gpu.capture_buffer().expect("capture buffer missing");
    assert_all_pixels(pixels, [255, 0, 255, 255]);
}

fn wrap_ycbcr_texture(ctx: &mut TestContext, image: &ExternalYcbcrImage) -> Arc<Texture> {
    let sampler = ctx
        .gpu
        .ycbcr_sampler(&YcbcrParams::default())
        .expect("Failed to create YCbCr sampler");
    let params = TextureParams::new_2d(WIDTH, HEIGHT, Format::R8G8B8A8Unorm, TextureUsage::SAMPLED);
    let mut wrap = TextureWrapParams::new(params, image.image, TextureLayout::Undefined);
    wrap.format = Some(YCBCR_FORMAT);
    wrap.ycbcr_sampler = Some(sampler);
    let texture = ctx.gpu.wrap_texture(wrap).expect("Failed to wrap YCbCr image");

    let pool = CommandPool::new(ctx.gpu.vk_context()).unwrap();
    let mut cmd = CommandBuffer::begin_transient(&pool).unwrap();
    texture.transition_layout(&mut cmd, TextureLayout::ShaderReadOnly);
    cmd.execute_transient().unwrap();
    texture
}

/// Binding a frame with a new YCbCr sampler rebuilds the layout and dirties
/// every descriptor set.
#[rstest]
#[case::vulkan(Backend::Vulkan)]
fn test_ycbcr_texture_recreates_pipeline(#[case] backend: Backend) {
    let config = GpuConfig::offscreen(WIDTH, HEIGHT)
        .with_capture_buffer(true)
        .with_in_flight_frames(2)
        .with_validation(false);
    let Some(mut ctx) = TestContext::with_config(backend, config) else {
        eprintln!("Backend {:?} not available, skipping", backend);
        return;
    };
    let Some(image) = ExternalYcbcrImage::new(&ctx, WIDTH, HEIGHT) else {
        eprintln!("YCbCr sampling not supported, skipping");
        return;
    };

    let mut pipeline = create_sampling_pipeline(&mut ctx);
    for _ in 0..2 {
        ctx.render_frame(|gpu| {
            gpu.draw(&mut pipeline, 3, 1).expect("draw failed");
        });
    }
    assert_eq!(pipeline.texture_dirty_frames(0), Some(DirtyFrames::none()));
    assert!(pipeline.texture_ycbcr_sampler(0).is_none());

    let texture = wrap_ycbcr_texture(&mut ctx, &image);
    ctx.gpu.begin_update().unwrap();
    ctx.gpu
        .pipeline_update_texture(&mut pipeline, 0, Some(Arc::clone(&texture)))
        .unwrap();
    ctx.gpu.end_update().unwrap();

    assert_eq!(pipeline.nb_descriptor_sets(), 2);
    assert_eq!(pipeline.texture_dirty_frames(0), Some(DirtyFrames::all(2)));
    let baked = pipeline.texture_ycbcr_sampler(0).expect("no YCbCr sampler baked");
    assert!(Arc::ptr_eq(baked, texture.ycbcr_sampler().unwrap()));

    // The rebuilt pipeline draws with the converted texture.
    ctx.render_frame(|gpu| {
        gpu.draw(&mut pipeline, 3, 1).expect("draw failed");
    });

    // Back to a regular texture drops the conversion from the layout.
    ctx.gpu.begin_update().unwrap();
    ctx.gpu.pipeline_update_texture(&mut pipeline, 0, None).unwrap();
    ctx.gpu.end_update().unwrap();
    assert!(pipeline.texture_ycbcr_sampler(0).is_none());
}

/// Pipelines fed frames with identical conversion parameters share one
/// sampler, which outlives either pipeline.
#[rstest]
#[case::vulkan(Backend::Vulkan)]
fn test_pipelines_share_ycbcr_sampler(#[case] backend: Backend) {
    let Some(mut ctx) = TestContext::new(backend) else {
        eprintln!("Backend {:?} not available, skipping", backend);
        return;
    };
    let Some(image) = ExternalYcbcrImage::new(&ctx, WIDTH, HEIGHT) else {
        eprintln!("YCbCr sampling not supported, skipping");
        return;
    };

    let mut first = create_sampling_pipeline(&mut ctx);
    let mut second = create_sampling_pipeline(&mut ctx);
    let texture_a = wrap_ycbcr_texture(&mut ctx, &image);
    let texture_b = wrap_ycbcr_texture(&mut ctx, &image);
    bind_texture(&mut ctx, &mut first, texture_a);
    bind_texture(&mut ctx, &mut second, texture_b);

    let sampler = Arc::clone(first.texture_ycbcr_sampler(0).expect("no YCbCr sampler"));
    assert!(Arc::ptr_eq(
        &sampler,
        second.texture_ycbcr_sampler(0).expect("no YCbCr sampler")
    ));
    assert_eq!(ctx.gpu.ycbcr_sampler_cache().len(), 1);

    ctx.render_frame(|gpu| {
        gpu.draw(&mut first, 3, 1).expect("draw failed");
        gpu.draw(&mut second, 3, 1).expect("draw failed");
    });

    ctx.gpu.wait_idle().unwrap();
    drop(first);
    assert!(Arc::ptr_eq(
        &sampler,
        second.texture_ycbcr_sampler(0).expect("sampler released with the other pipeline")
    ));
    assert!(Arc::strong_count(&sampler) >= 2);
    assert_eq!(ctx.gpu.ycbcr_sampler_cache().len(), 1);
}
