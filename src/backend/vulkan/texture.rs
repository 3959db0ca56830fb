//! Images with their view, sampler and tracked layout.

use std::any::Any;
use std::sync::Arc;

use ash::vk;
use gpu_allocator::vulkan::Allocation;
use gpu_allocator::MemoryLocation;
use parking_lot::Mutex;

use crate::error::{vk_err, GpuError, GpuResult};
use crate::types::{mip_level_extent, BufferUsage, MipmapFilter, TextureParams, TextureType, TextureUsage};

use super::allocator;
use super::buffer::Buffer;
use super::command::{CommandBuffer, CommandPool};
use super::conversion::{
    convert_filter, convert_format, convert_mipmap_filter, convert_samples, convert_texture_usage,
    convert_wrap_mode, format_aspect, texture_usage_features,
};
use super::device::VkContext;
use super::layout::{LayoutTransition, TextureLayout};
use super::ycbcr::YcbcrSampler;

/// Layout a texture returns to between operations, picked from its usage.
///
/// Later checks override earlier ones: storage beats sampled, which beats
/// the attachment usages.
pub fn default_layout(usage: TextureUsage) -> TextureLayout {
    let mut layout = TextureLayout::General;
    if usage.contains(TextureUsage::COLOR_ATTACHMENT) {
        layout = TextureLayout::ColorAttachment;
    }
    if usage.contains(TextureUsage::DEPTH_STENCIL_ATTACHMENT) {
        layout = TextureLayout::DepthStencilAttachment;
    }
    if usage.contains(TextureUsage::SAMPLED) {
        layout = TextureLayout::ShaderReadOnly;
    }
    if usage.contains(TextureUsage::STORAGE) {
        layout = TextureLayout::General;
    }
    layout
}

fn image_type(ty: TextureType) -> vk::ImageType {
    match ty {
        TextureType::Texture2D | TextureType::Cube => vk::ImageType::TYPE_2D,
        TextureType::Texture3D => vk::ImageType::TYPE_3D,
    }
}

fn view_type(ty: TextureType) -> vk::ImageViewType {
    match ty {
        TextureType::Texture2D => vk::ImageViewType::TYPE_2D,
        TextureType::Texture3D => vk::ImageViewType::TYPE_3D,
        TextureType::Cube => vk::ImageViewType::CUBE,
    }
}

enum TextureMemory {
    Allocated(Allocation),
    /// Lazily-allocated memory for transient attachments, outside the allocator.
    Lazy(vk::DeviceMemory),
    /// The image belongs to someone else.
    External,
}

/// Parameters for adopting an image owned by someone else.
pub struct TextureWrapParams {
    pub params: TextureParams,
    pub image: vk::Image,
    pub layout: TextureLayout,
    /// Native format when it has no engine counterpart (multi-planar video).
    pub format: Option<vk::Format>,
    pub view: Option<vk::ImageView>,
    pub sampler: Option<vk::Sampler>,
    pub ycbcr_sampler: Option<Arc<YcbcrSampler>>,
}

impl TextureWrapParams {
    pub fn new(params: TextureParams, image: vk::Image, layout: TextureLayout) -> Self {
        Self {
            params,
            image,
            layout,
            format: None,
            view: None,
            sampler: None,
            ycbcr_sampler: None,
        }
    }
}

struct TextureState {
    layout: TextureLayout,
    staging: Option<Arc<Buffer>>,
    staging_linesize: u32,
}

/// An image, its full view and its sampler.
pub struct Texture {
    ctx: Arc<VkContext>,
    params: TextureParams,
    format: vk::Format,
    image: vk::Image,
    view: vk::ImageView,
    sampler: vk::Sampler,
    memory: TextureMemory,
    owns_view: bool,
    owns_sampler: bool,
    mip_levels: u32,
    array_layers: u32,
    default_layout: TextureLayout,
    ycbcr_sampler: Option<Arc<YcbcrSampler>>,
    state: Mutex<TextureState>,
}

impl std::fmt::Debug for Texture {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Texture")
            .field("image", &self.image)
            .field("format", &self.format)
            .field("width", &self.params.width)
            .field("height", &self.params.height)
            .field("layout", &self.state.lock().layout)
            .finish()
    }
}

impl Texture {
    /// Create an owned texture and move it into its default layout.
    pub fn new(
        ctx: &Arc<VkContext>,
        pool: &Arc<CommandPool>,
        params: &TextureParams,
    ) -> GpuResult<Arc<Self>> {
        if params.width == 0 || params.height == 0 {
            return Err(GpuError::InvalidArg(format!(
                "invalid texture size {}x{}",
                params.width, params.height
            )));
        }

        let format = convert_format(params.format);
        let usage = convert_texture_usage(params.usage);
        let required = texture_usage_features(usage);
        let supported = ctx.format_features(format);
        if !supported.contains(required) {
            log::error!(
                "Unsupported format {:?}, supported features: {:?}, requested features: {:?}",
                format,
                supported,
                required
            );
            return Err(GpuError::Unsupported(format!(
                "format {:?} lacks the features its usage needs",
                params.format
            )));
        }

        let mip_levels = params.mip_levels();
        let array_layers = params.array_layers();
        let flags = match params.ty {
            TextureType::Cube => vk::ImageCreateFlags::CUBE_COMPATIBLE,
            TextureType::Texture3D => vk::ImageCreateFlags::TYPE_2D_ARRAY_COMPATIBLE,
            TextureType::Texture2D => vk::ImageCreateFlags::empty(),
        };

        let image_info = vk::ImageCreateInfo::default()
            .flags(flags)
            .image_type(image_type(params.ty))
            .format(format)
            .extent(vk::Extent3D {
                width: params.width,
                height: params.height,
                depth: params.effective_depth(),
            })
            .mip_levels(mip_levels)
            .array_layers(array_layers)
            .samples(convert_samples(params.samples))
            .tiling(vk::ImageTiling::OPTIMAL)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .initial_layout(vk::ImageLayout::UNDEFINED);

        let device = ctx.device();
        let image = unsafe { device.create_image(&image_info, None) }
            .map_err(vk_err("create image"))?;

        let memory = match Self::bind_memory(ctx, image, params.usage) {
            Ok(memory) => memory,
            Err(e) => {
                unsafe { device.destroy_image(image, None) };
                return Err(e);
            }
        };

        // From here on Drop releases whatever was created.
        let mut texture = Self {
            ctx: Arc::clone(ctx),
            params: params.clone(),
            format,
            image,
            view: vk::ImageView::null(),
            sampler: vk::Sampler::null(),
            memory,
            owns_view: true,
            owns_sampler: true,
            mip_levels,
            array_layers,
            default_layout: default_layout(params.usage),
            ycbcr_sampler: None,
            state: Mutex::new(TextureState {
                layout: TextureLayout::Undefined,
                staging: None,
                staging_linesize: 0,
            }),
        };

        let mut cmd = CommandBuffer::begin_transient(pool)?;
        texture.record_transition(&mut cmd, texture.default_layout);
        cmd.execute_transient()?;

        texture.view = texture.create_view()?;
        texture.sampler = texture.create_sampler()?;

        Ok(Arc::new(texture))
    }

    fn bind_memory(
        ctx: &Arc<VkContext>,
        image: vk::Image,
        usage: TextureUsage,
    ) -> GpuResult<TextureMemory> {
        let device = ctx.device();
        let requirements = unsafe { device.get_image_memory_requirements(image) };

        let lazy_type = if usage.contains(TextureUsage::TRANSIENT_ATTACHMENT) {
            ctx.find_memory_type(
                requirements.memory_type_bits,
                vk::MemoryPropertyFlags::DEVICE_LOCAL | vk::MemoryPropertyFlags::LAZILY_ALLOCATED,
            )
        } else {
            None
        };

        if let Some(memory_type_index) = lazy_type {
            let alloc_info = vk::MemoryAllocateInfo::default()
                .allocation_size(requirements.size)
                .memory_type_index(memory_type_index);
            let memory = unsafe { device.allocate_memory(&alloc_info, None) }
                .map_err(vk_err("allocate lazy image memory"))?;
            if let Err(e) = unsafe { device.bind_image_memory(image, memory, 0) } {
                unsafe { device.free_memory(memory, None) };
                return Err(vk_err("bind image memory")(e));
            }
            return Ok(TextureMemory::Lazy(memory));
        }

        let allocation =
            allocator::allocate(ctx, "texture", requirements, MemoryLocation::GpuOnly, false)?;
        if let Err(e) =
            unsafe { device.bind_image_memory(image, allocation.memory(), allocation.offset()) }
        {
            allocator::free(ctx, allocation);
            return Err(vk_err("bind image memory")(e));
        }
        Ok(TextureMemory::Allocated(allocation))
    }

    /// Adopt an externally-owned image.
    ///
    /// The image is never destroyed by the texture; a view or sampler is only
    /// destroyed when the texture created it.
    pub fn wrap(ctx: &Arc<VkContext>, wrap: TextureWrapParams) -> GpuResult<Arc<Self>> {
        if wrap.ycbcr_sampler.is_some() && wrap.sampler.is_some() {
            return Err(GpuError::InvalidArg(
                "a wrapped texture takes either a sampler or a YCbCr sampler".to_string(),
            ));
        }

        let params = wrap.params;
        let format = wrap.format.unwrap_or_else(|| convert_format(params.format));
        let mut texture = Self {
            ctx: Arc::clone(ctx),
            mip_levels: params.mip_levels(),
            array_layers: params.array_layers(),
            default_layout: default_layout(params.usage),
            params,
            format,
            image: wrap.image,
            view: wrap.view.unwrap_or_default(),
            sampler: wrap.sampler.unwrap_or_default(),
            memory: TextureMemory::External,
            owns_view: wrap.view.is_none(),
            owns_sampler: wrap.sampler.is_none() && wrap.ycbcr_sampler.is_none(),
            ycbcr_sampler: wrap.ycbcr_sampler,
            state: Mutex::new(TextureState {
                layout: wrap.layout,
                staging: None,
                staging_linesize: 0,
            }),
        };

        if texture.owns_view {
            texture.view = texture.create_view()?;
        }
        if texture.owns_sampler {
            texture.sampler = texture.create_sampler()?;
        }

        Ok(Arc::new(texture))
    }

    fn create_view(&self) -> GpuResult<vk::ImageView> {
        let mut conversion_info = self
            .ycbcr_sampler
            .as_ref()
            .map(|s| vk::SamplerYcbcrConversionInfo::default().conversion(s.conversion()));

        let mut view_info = vk::ImageViewCreateInfo::default()
            .image(self.image)
            .view_type(view_type(self.params.ty))
            .format(self.format)
            .subresource_range(vk::ImageSubresourceRange {
                aspect_mask: self.aspect_mask(),
                base_mip_level: 0,
                level_count: self.mip_levels,
                base_array_layer: 0,
                layer_count: vk::REMAINING_ARRAY_LAYERS,
            });
        if let Some(info) = conversion_info.as_mut() {
            view_info = view_info.push_next(info);
        }

        unsafe { self.ctx.device().create_image_view(&view_info, None) }
            .map_err(vk_err("create image view"))
    }

    fn create_sampler(&self) -> GpuResult<vk::Sampler> {
        let params = &self.params;
        let sampler_info = vk::SamplerCreateInfo::default()
            .mag_filter(convert_filter(params.mag_filter))
            .min_filter(convert_filter(params.min_filter))
            .mipmap_mode(convert_mipmap_filter(params.mipmap_filter))
            .address_mode_u(convert_wrap_mode(params.wrap_s))
            .address_mode_v(convert_wrap_mode(params.wrap_t))
            .address_mode_w(convert_wrap_mode(params.wrap_r))
            .anisotropy_enable(false)
            .max_anisotropy(1.0)
            .border_color(vk::BorderColor::INT_OPAQUE_BLACK)
            .unnormalized_coordinates(false)
            .compare_enable(false)
            .compare_op(vk::CompareOp::ALWAYS)
            .min_lod(0.0)
            .max_lod(self.mip_levels as f32)
            .mip_lod_bias(0.0);

        unsafe { self.ctx.device().create_sampler(&sampler_info, None) }
            .map_err(vk_err("create sampler"))
    }

    pub fn params(&self) -> &TextureParams {
        &self.params
    }

    pub fn width(&self) -> u32 {
        self.params.width
    }

    pub fn height(&self) -> u32 {
        self.params.height
    }

    pub fn image(&self) -> vk::Image {
        self.image
    }

    pub fn view(&self) -> vk::ImageView {
        self.view
    }

    /// Sampler to bind: the shared YCbCr sampler when the texture has one.
    pub fn sampler(&self) -> vk::Sampler {
        match &self.ycbcr_sampler {
            Some(ycbcr) => ycbcr.sampler(),
            None => self.sampler,
        }
    }

    pub fn vk_format(&self) -> vk::Format {
        self.format
    }

    pub fn mip_levels(&self) -> u32 {
        self.mip_levels
    }

    pub fn array_layers(&self) -> u32 {
        self.array_layers
    }

    pub fn is_wrapped(&self) -> bool {
        matches!(self.memory, TextureMemory::External)
    }

    pub fn ycbcr_sampler(&self) -> Option<&Arc<YcbcrSampler>> {
        self.ycbcr_sampler.as_ref()
    }

    pub fn aspect_mask(&self) -> vk::ImageAspectFlags {
        format_aspect(self.format)
    }

    /// Layout the image is in right now.
    pub fn layout(&self) -> TextureLayout {
        self.state.lock().layout
    }

    pub fn default_layout(&self) -> TextureLayout {
        self.default_layout
    }

    /// Record a layout change done outside a barrier, e.g. by a render pass.
    pub(crate) fn set_layout(&self, layout: TextureLayout) {
        self.state.lock().layout = layout;
    }

    fn full_range(&self) -> vk::ImageSubresourceRange {
        vk::ImageSubresourceRange {
            aspect_mask: self.aspect_mask(),
            base_mip_level: 0,
            level_count: vk::REMAINING_MIP_LEVELS,
            base_array_layer: 0,
            layer_count: vk::REMAINING_ARRAY_LAYERS,
        }
    }

    /// Record a barrier moving the whole image to `target`. Returns whether
    /// anything was recorded.
    fn record_transition(&self, cmd: &mut CommandBuffer, target: TextureLayout) -> bool {
        let mut state = self.state.lock();
        let Some(transition) = LayoutTransition::plan(state.layout, target) else {
            return false;
        };
        unsafe {
            transition.record(self.ctx.device(), cmd.handle(), self.image, self.full_range());
        }
        state.layout = target;
        true
    }

    /// Move the image to `layout`; nothing is recorded when it is already there.
    pub fn transition_layout(
        self: &Arc<Self>,
        cmd: &mut CommandBuffer,
        layout: TextureLayout,
    ) -> bool {
        cmd.pin(Arc::clone(self) as Arc<dyn Any>);
        self.record_transition(cmd, layout)
    }

    pub fn transition_to_default_layout(self: &Arc<Self>, cmd: &mut CommandBuffer) -> bool {
        self.transition_layout(cmd, self.default_layout)
    }

    /// Copy mip level 0 of layer 0 into `buffer`, tightly packed.
    pub fn copy_to_buffer(self: &Arc<Self>, cmd: &mut CommandBuffer, buffer: &Arc<Buffer>) {
        self.transition_layout(cmd, TextureLayout::TransferSrc);
        cmd.pin(Arc::clone(buffer) as Arc<dyn Any>);

        let region = vk::BufferImageCopy {
            buffer_offset: 0,
            buffer_row_length: 0,
            buffer_image_height: 0,
            image_subresource: vk::ImageSubresourceLayers {
                aspect_mask: vk::ImageAspectFlags::COLOR,
                mip_level: 0,
                base_array_layer: 0,
                layer_count: 1,
            },
            image_offset: vk::Offset3D::default(),
            image_extent: vk::Extent3D {
                width: self.params.width,
                height: self.params.height,
                depth: 1,
            },
        };
        unsafe {
            self.ctx.device().cmd_copy_image_to_buffer(
                cmd.handle(),
                self.image,
                vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                buffer.handle(),
                &[region],
            );
        }
    }

    /// Bytes one upload of `linesize` pixels per row carries.
    fn upload_size(&self, linesize: u32) -> u64 {
        let layer = linesize as u64
            * self.params.height as u64
            * self.params.effective_depth() as u64
            * self.params.format.bytes_per_pixel() as u64;
        layer * self.array_layers as u64
    }

    /// Upload the full content of every layer.
    ///
    /// `linesize` is the row length of `data` in pixels, 0 meaning the
    /// texture width. Layers are laid out one after another.
    pub fn upload(self: &Arc<Self>, cmd: &mut CommandBuffer, data: &[u8], linesize: u32) -> GpuResult<()> {
        if self.is_wrapped() {
            return Err(GpuError::InvalidArg(
                "wrapped textures cannot be uploaded to".to_string(),
            ));
        }
        if !self.params.usage.contains(TextureUsage::TRANSFER_DST) {
            return Err(GpuError::InvalidArg(
                "texture upload requires TRANSFER_DST usage".to_string(),
            ));
        }
        if data.is_empty() {
            return Ok(());
        }

        let linesize = if linesize == 0 { self.params.width } else { linesize };
        let size = self.upload_size(linesize);
        if (data.len() as u64) < size {
            return Err(GpuError::InvalidArg(format!(
                "texture upload needs {} bytes, got {}",
                size,
                data.len()
            )));
        }

        let staging = {
            let mut state = self.state.lock();
            let reusable = state
                .staging
                .as_ref()
                .filter(|_| state.staging_linesize == linesize)
                .cloned();
            match reusable {
                Some(staging) => staging,
                None => {
                    let staging = Arc::new(Buffer::new(
                        &self.ctx,
                        size,
                        BufferUsage::DYNAMIC | BufferUsage::TRANSFER_SRC | BufferUsage::MAP_WRITE,
                    )?);
                    state.staging = Some(Arc::clone(&staging));
                    state.staging_linesize = linesize;
                    staging
                }
            }
        };
        staging
            .map(0, size)?
            .copy_from_slice(&data[..size as usize]);

        cmd.pin(Arc::clone(self) as Arc<dyn Any>);
        cmd.pin(Arc::clone(&staging) as Arc<dyn Any>);

        let restore = match self.layout() {
            TextureLayout::Undefined => self.default_layout,
            layout => layout,
        };
        self.record_transition(cmd, TextureLayout::TransferDst);

        let aspect_mask = self.aspect_mask();
        let layer_size = size / self.array_layers as u64;
        let regions: Vec<vk::BufferImageCopy> = (0..self.array_layers)
            .map(|layer| vk::BufferImageCopy {
                buffer_offset: layer as u64 * layer_size,
                buffer_row_length: linesize,
                buffer_image_height: 0,
                image_subresource: vk::ImageSubresourceLayers {
                    aspect_mask,
                    mip_level: 0,
                    base_array_layer: layer,
                    layer_count: 1,
                },
                image_offset: vk::Offset3D::default(),
                image_extent: vk::Extent3D {
                    width: self.params.width,
                    height: self.params.height,
                    depth: self.params.effective_depth(),
                },
            })
            .collect();

        unsafe {
            self.ctx.device().cmd_copy_buffer_to_image(
                cmd.handle(),
                staging.handle(),
                self.image,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                &regions,
            );
        }

        self.record_transition(cmd, restore);

        if self.params.mipmap_filter != MipmapFilter::None {
            self.generate_mipmap(cmd)?;
        }
        Ok(())
    }

    /// Fill levels 1.. by successive linear blits from the level above.
    pub fn generate_mipmap(self: &Arc<Self>, cmd: &mut CommandBuffer) -> GpuResult<()> {
        let usage = self.params.usage;
        if !usage.contains(TextureUsage::TRANSFER_SRC | TextureUsage::TRANSFER_DST) {
            return Err(GpuError::InvalidArg(
                "mipmap generation requires TRANSFER_SRC and TRANSFER_DST usage".to_string(),
            ));
        }

        cmd.pin(Arc::clone(self) as Arc<dyn Any>);
        self.record_transition(cmd, TextureLayout::TransferDst);

        let device = self.ctx.device();
        let final_layout = self.default_layout;
        let level_barrier = |level: u32, from: TextureLayout, to: TextureLayout| {
            vk::ImageMemoryBarrier::default()
                .src_access_mask(from.access_mask())
                .dst_access_mask(to.access_mask())
                .old_layout(from.to_vk())
                .new_layout(to.to_vk())
                .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                .image(self.image)
                .subresource_range(vk::ImageSubresourceRange {
                    aspect_mask: vk::ImageAspectFlags::COLOR,
                    base_mip_level: level,
                    level_count: 1,
                    base_array_layer: 0,
                    layer_count: self.array_layers,
                })
        };

        for level in 1..self.mip_levels {
            let (src_w, src_h) = mip_level_extent(self.params.width, self.params.height, level - 1);
            let (dst_w, dst_h) = mip_level_extent(self.params.width, self.params.height, level);

            let to_src = level_barrier(level - 1, TextureLayout::TransferDst, TextureLayout::TransferSrc);
            let blit = vk::ImageBlit {
                src_subresource: vk::ImageSubresourceLayers {
                    aspect_mask: vk::ImageAspectFlags::COLOR,
                    mip_level: level - 1,
                    base_array_layer: 0,
                    layer_count: self.array_layers,
                },
                src_offsets: [
                    vk::Offset3D::default(),
                    vk::Offset3D { x: src_w as i32, y: src_h as i32, z: 1 },
                ],
                dst_subresource: vk::ImageSubresourceLayers {
                    aspect_mask: vk::ImageAspectFlags::COLOR,
                    mip_level: level,
                    base_array_layer: 0,
                    layer_count: self.array_layers,
                },
                dst_offsets: [
                    vk::Offset3D::default(),
                    vk::Offset3D { x: dst_w as i32, y: dst_h as i32, z: 1 },
                ],
            };
            let to_final = level_barrier(level - 1, TextureLayout::TransferSrc, final_layout);

            unsafe {
                device.cmd_pipeline_barrier(
                    cmd.handle(),
                    vk::PipelineStageFlags::TRANSFER,
                    vk::PipelineStageFlags::TRANSFER,
                    vk::DependencyFlags::empty(),
                    &[],
                    &[],
                    &[to_src],
                );
                device.cmd_blit_image(
                    cmd.handle(),
                    self.image,
                    vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                    self.image,
                    vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                    &[blit],
                    vk::Filter::LINEAR,
                );
                device.cmd_pipeline_barrier(
                    cmd.handle(),
                    vk::PipelineStageFlags::TRANSFER,
                    vk::PipelineStageFlags::ALL_COMMANDS,
                    vk::DependencyFlags::empty(),
                    &[],
                    &[],
                    &[to_final],
                );
            }
        }

        let last = level_barrier(self.mip_levels - 1, TextureLayout::TransferDst, final_layout);
        unsafe {
            device.cmd_pipeline_barrier(
                cmd.handle(),
                vk::PipelineStageFlags::TRANSFER,
                vk::PipelineStageFlags::ALL_COMMANDS,
                vk::DependencyFlags::empty(),
                &[],
                &[],
                &[last],
            );
        }
        self.set_layout(final_layout);
        Ok(())
    }
}

impl Drop for Texture {
    fn drop(&mut self) {
        let device = self.ctx.device();
        unsafe {
            if self.owns_sampler && self.sampler != vk::Sampler::null() {
                device.destroy_sampler(self.sampler, None);
            }
            if self.owns_view && self.view != vk::ImageView::null() {
                device.destroy_image_view(self.view, None);
            }
        }
        match std::mem::replace(&mut self.memory, TextureMemory::External) {
            TextureMemory::Allocated(allocation) => {
                unsafe { device.destroy_image(self.image, None) };
                allocator::free(&self.ctx, allocation);
            }
            TextureMemory::Lazy(memory) => unsafe {
                device.destroy_image(self.image, None);
                device.free_memory(memory, None);
            },
            TextureMemory::External => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_layout_from_usage() {
        assert_eq!(
            default_layout(TextureUsage::COLOR_ATTACHMENT),
            TextureLayout::ColorAttachment
        );
        assert_eq!(
            default_layout(TextureUsage::DEPTH_STENCIL_ATTACHMENT),
            TextureLayout::DepthStencilAttachment
        );
        assert_eq!(
            default_layout(TextureUsage::SAMPLED | TextureUsage::COLOR_ATTACHMENT),
            TextureLayout::ShaderReadOnly
        );
        assert_eq!(
            default_layout(TextureUsage::SAMPLED | TextureUsage::STORAGE),
            TextureLayout::General
        );
        assert_eq!(
            default_layout(TextureUsage::TRANSFER_DST),
            TextureLayout::General
        );
    }

    #[test]
    fn test_view_and_image_types() {
        assert_eq!(view_type(TextureType::Cube), vk::ImageViewType::CUBE);
        assert_eq!(image_type(TextureType::Cube), vk::ImageType::TYPE_2D);
        assert_eq!(image_type(TextureType::Texture3D), vk::ImageType::TYPE_3D);
    }
}
