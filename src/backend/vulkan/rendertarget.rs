//! Render targets: attachments, render pass and framebuffer.

use std::any::Any;
use std::sync::Arc;

use ash::vk;

use crate::error::{vk_err, GpuError, GpuResult};
use crate::types::{
    ColorAttachmentDesc, DepthStencilDesc, LoadOp, RenderTargetDesc, RenderTargetParams, StoreOp,
    TextureUsage,
};

use super::command::CommandBuffer;
use super::conversion::{convert_format, convert_load_op, convert_samples, convert_store_op, format_aspect};
use super::device::VkContext;
use super::layout::TextureLayout;
use super::texture::Texture;

/// Load/store operations of one attachment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttachmentOps {
    pub load: vk::AttachmentLoadOp,
    pub store: vk::AttachmentStoreOp,
}

impl AttachmentOps {
    /// Operations of a compatible render pass, which never runs.
    pub const DONT_CARE: Self = Self {
        load: vk::AttachmentLoadOp::DONT_CARE,
        store: vk::AttachmentStoreOp::DONT_CARE,
    };

    pub fn new(load: LoadOp, store: StoreOp) -> Self {
        Self {
            load: convert_load_op(load),
            store: convert_store_op(store),
        }
    }
}

/// Attachment layout of a render target's parameters.
///
/// Every attachment must share one sample count; resolving depth is not
/// supported.
pub fn describe(params: &RenderTargetParams<Texture>) -> GpuResult<RenderTargetDesc> {
    let mut samples = None;
    let mut check_samples = |texture: &Texture| {
        let count = texture.params().sample_count();
        match samples {
            None => {
                samples = Some(count);
                Ok(())
            }
            Some(expected) if expected == count => Ok(()),
            Some(expected) => Err(GpuError::InvalidArg(format!(
                "render target attachments mix {} and {} samples",
                expected, count
            ))),
        }
    };

    let mut colors = Vec::with_capacity(params.colors.len());
    for color in &params.colors {
        check_samples(&color.attachment)?;
        colors.push(ColorAttachmentDesc {
            format: color.attachment.params().format,
            resolve: color.resolve_target.is_some(),
        });
    }

    let depth_stencil = match &params.depth_stencil {
        Some(ds) => {
            check_samples(&ds.attachment)?;
            Some(DepthStencilDesc {
                format: ds.attachment.params().format,
                resolve: ds.resolve_target.is_some(),
            })
        }
        None => None,
    };

    let samples = match samples {
        Some(1) | None => 0,
        Some(n) => n,
    };
    Ok(RenderTargetDesc {
        samples,
        colors,
        depth_stencil,
    })
}

/// Create a render pass for `desc`.
///
/// Without `ops` every attachment uses DONT_CARE, which yields a render pass
/// compatible with any target of the same layout.
pub fn create_render_pass(
    ctx: &VkContext,
    desc: &RenderTargetDesc,
    color_ops: Option<&[AttachmentOps]>,
    depth_ops: Option<AttachmentOps>,
) -> GpuResult<vk::RenderPass> {
    let samples = convert_samples(desc.samples);
    let mut attachments = Vec::new();
    let mut color_refs = Vec::with_capacity(desc.colors.len());
    let mut resolve_refs = Vec::with_capacity(desc.colors.len());
    let has_resolve = desc.colors.iter().any(|c| c.resolve);

    for (i, color) in desc.colors.iter().enumerate() {
        let format = convert_format(color.format);
        if !ctx
            .format_features(format)
            .contains(vk::FormatFeatureFlags::COLOR_ATTACHMENT)
        {
            return Err(GpuError::Unsupported(format!(
                "{:?} cannot be used as a color attachment",
                color.format
            )));
        }

        let ops = color_ops
            .and_then(|ops| ops.get(i).copied())
            .unwrap_or(AttachmentOps::DONT_CARE);

        color_refs.push(vk::AttachmentReference {
            attachment: attachments.len() as u32,
            layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
        });
        attachments.push(
            vk::AttachmentDescription::default()
                .format(format)
                .samples(samples)
                .load_op(ops.load)
                .store_op(ops.store)
                .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
                .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
                .initial_layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
                .final_layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL),
        );

        if color.resolve {
            resolve_refs.push(vk::AttachmentReference {
                attachment: attachments.len() as u32,
                layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
            });
            attachments.push(
                vk::AttachmentDescription::default()
                    .format(format)
                    .samples(vk::SampleCountFlags::TYPE_1)
                    .load_op(vk::AttachmentLoadOp::DONT_CARE)
                    .store_op(vk::AttachmentStoreOp::STORE)
                    .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
                    .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
                    .initial_layout(vk::ImageLayout::UNDEFINED)
                    .final_layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL),
            );
        } else {
            resolve_refs.push(vk::AttachmentReference {
                attachment: vk::ATTACHMENT_UNUSED,
                layout: vk::ImageLayout::UNDEFINED,
            });
        }
    }

    let mut depth_ref = None;
    if let Some(ds) = &desc.depth_stencil {
        if ds.resolve {
            return Err(GpuError::Unsupported(
                "resolving a depth/stencil attachment is not supported".to_string(),
            ));
        }
        let format = convert_format(ds.format);
        if !ctx
            .format_features(format)
            .contains(vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT)
        {
            return Err(GpuError::Unsupported(format!(
                "{:?} cannot be used as a depth/stencil attachment",
                ds.format
            )));
        }

        let ops = depth_ops.unwrap_or(AttachmentOps::DONT_CARE);
        depth_ref = Some(vk::AttachmentReference {
            attachment: attachments.len() as u32,
            layout: vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
        });
        attachments.push(
            vk::AttachmentDescription::default()
                .format(format)
                .samples(samples)
                .load_op(ops.load)
                .store_op(ops.store)
                .stencil_load_op(ops.load)
                .stencil_store_op(ops.store)
                .initial_layout(vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL)
                .final_layout(vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL),
        );
    }

    let mut subpass = vk::SubpassDescription::default()
        .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
        .color_attachments(&color_refs);
    if has_resolve {
        subpass = subpass.resolve_attachments(&resolve_refs);
    }
    if let Some(depth_ref) = depth_ref.as_ref() {
        subpass = subpass.depth_stencil_attachment(depth_ref);
    }

    let color_access =
        vk::AccessFlags::COLOR_ATTACHMENT_READ | vk::AccessFlags::COLOR_ATTACHMENT_WRITE;
    let dependencies = [
        vk::SubpassDependency {
            src_subpass: vk::SUBPASS_EXTERNAL,
            dst_subpass: 0,
            src_stage_mask: vk::PipelineStageFlags::BOTTOM_OF_PIPE,
            dst_stage_mask: vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
            src_access_mask: vk::AccessFlags::MEMORY_READ,
            dst_access_mask: color_access,
            dependency_flags: vk::DependencyFlags::BY_REGION,
        },
        vk::SubpassDependency {
            src_subpass: 0,
            dst_subpass: vk::SUBPASS_EXTERNAL,
            src_stage_mask: vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
            dst_stage_mask: vk::PipelineStageFlags::BOTTOM_OF_PIPE,
            src_access_mask: color_access,
            dst_access_mask: vk::AccessFlags::MEMORY_READ,
            dependency_flags: vk::DependencyFlags::BY_REGION,
        },
    ];

    let render_pass_info = vk::RenderPassCreateInfo::default()
        .attachments(&attachments)
        .subpasses(std::slice::from_ref(&subpass))
        .dependencies(&dependencies);

    unsafe { ctx.device().create_render_pass(&render_pass_info, None) }
        .map_err(vk_err("create render pass"))
}

/// A render pass only used to build pipelines against a target layout.
pub struct CompatibleRenderPass {
    ctx: Arc<VkContext>,
    render_pass: vk::RenderPass,
}

impl CompatibleRenderPass {
    pub fn new(ctx: &Arc<VkContext>, desc: &RenderTargetDesc) -> GpuResult<Self> {
        let render_pass = create_render_pass(ctx, desc, None, None)?;
        Ok(Self {
            ctx: Arc::clone(ctx),
            render_pass,
        })
    }

    pub fn handle(&self) -> vk::RenderPass {
        self.render_pass
    }
}

impl Drop for CompatibleRenderPass {
    fn drop(&mut self) {
        unsafe { self.ctx.device().destroy_render_pass(self.render_pass, None) };
    }
}

/// A set of attachments ready to be rendered into.
pub struct RenderTarget {
    ctx: Arc<VkContext>,
    params: RenderTargetParams<Texture>,
    desc: RenderTargetDesc,
    render_pass: vk::RenderPass,
    framebuffer: vk::Framebuffer,
    views: Vec<vk::ImageView>,
    clear_values: Vec<vk::ClearValue>,
}

impl std::fmt::Debug for RenderTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RenderTarget")
            .field("width", &self.params.width)
            .field("height", &self.params.height)
            .field("desc", &self.desc)
            .finish()
    }
}

impl RenderTarget {
    pub fn new(ctx: &Arc<VkContext>, params: RenderTargetParams<Texture>) -> GpuResult<Self> {
        if params.width == 0 || params.height == 0 {
            return Err(GpuError::InvalidArg(format!(
                "invalid render target size {}x{}",
                params.width, params.height
            )));
        }

        let desc = describe(&params)?;
        let color_ops: Vec<AttachmentOps> = params
            .colors
            .iter()
            .map(|c| AttachmentOps::new(c.load_op, c.store_op))
            .collect();
        let depth_ops = params
            .depth_stencil
            .as_ref()
            .map(|ds| AttachmentOps::new(ds.load_op, ds.store_op));

        let render_pass = create_render_pass(ctx, &desc, Some(&color_ops), depth_ops)?;

        let mut rt = Self {
            ctx: Arc::clone(ctx),
            params,
            desc,
            render_pass,
            framebuffer: vk::Framebuffer::null(),
            views: Vec::new(),
            clear_values: Vec::new(),
        };
        rt.create_attachments()?;
        Ok(rt)
    }

    fn create_attachments(&mut self) -> GpuResult<()> {
        let params = self.params.clone();

        for color in &params.colors {
            let clear = vk::ClearValue {
                color: vk::ClearColorValue {
                    float32: color.clear_value,
                },
            };
            self.add_attachment(&color.attachment, color.attachment_layer, clear)?;
            if let Some(resolve) = &color.resolve_target {
                self.add_attachment(resolve, color.resolve_target_layer, clear)?;
            }
        }

        if let Some(ds) = &params.depth_stencil {
            let clear = vk::ClearValue {
                depth_stencil: vk::ClearDepthStencilValue {
                    depth: 1.0,
                    stencil: 0,
                },
            };
            self.add_attachment(&ds.attachment, ds.attachment_layer, clear)?;
        }

        let framebuffer_info = vk::FramebufferCreateInfo::default()
            .render_pass(self.render_pass)
            .attachments(&self.views)
            .width(self.params.width)
            .height(self.params.height)
            .layers(1);
        self.framebuffer = unsafe { self.ctx.device().create_framebuffer(&framebuffer_info, None) }
            .map_err(vk_err("create framebuffer"))?;
        Ok(())
    }

    fn add_attachment(
        &mut self,
        texture: &Texture,
        layer: u32,
        clear: vk::ClearValue,
    ) -> GpuResult<()> {
        let mut usage = vk::ImageUsageFlags::empty();
        let texture_usage = texture.params().usage;
        if texture_usage.contains(TextureUsage::COLOR_ATTACHMENT) {
            usage |= vk::ImageUsageFlags::COLOR_ATTACHMENT;
        }
        if texture_usage.contains(TextureUsage::DEPTH_STENCIL_ATTACHMENT) {
            usage |= vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT;
        }
        let mut usage_info = vk::ImageViewUsageCreateInfo::default().usage(usage);

        let view_info = vk::ImageViewCreateInfo::default()
            .image(texture.image())
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(texture.vk_format())
            .subresource_range(vk::ImageSubresourceRange {
                aspect_mask: format_aspect(texture.vk_format()),
                base_mip_level: 0,
                level_count: 1,
                base_array_layer: layer,
                layer_count: 1,
            })
            .push_next(&mut usage_info);

        let view = unsafe { self.ctx.device().create_image_view(&view_info, None) }
            .map_err(vk_err("create attachment view"))?;
        self.views.push(view);
        self.clear_values.push(clear);
        Ok(())
    }

    pub fn params(&self) -> &RenderTargetParams<Texture> {
        &self.params
    }

    pub fn desc(&self) -> &RenderTargetDesc {
        &self.desc
    }

    pub fn width(&self) -> u32 {
        self.params.width
    }

    pub fn height(&self) -> u32 {
        self.params.height
    }

    pub fn render_pass(&self) -> vk::RenderPass {
        self.render_pass
    }

    pub fn framebuffer(&self) -> vk::Framebuffer {
        self.framebuffer
    }

    pub fn clear_values(&self) -> &[vk::ClearValue] {
        &self.clear_values
    }

    /// Every texture the target writes to.
    fn textures(&self) -> impl Iterator<Item = (&Arc<Texture>, TextureLayout)> + '_ {
        let colors = self.params.colors.iter().flat_map(|c| {
            std::iter::once(&c.attachment)
                .chain(c.resolve_target.iter())
                .map(|t| (t, TextureLayout::ColorAttachment))
        });
        let depth = self
            .params
            .depth_stencil
            .iter()
            .map(|ds| (&ds.attachment, TextureLayout::DepthStencilAttachment));
        colors.chain(depth)
    }

    /// Move the attachments into attachment layouts and begin the render pass.
    pub fn begin(self: &Arc<Self>, cmd: &mut CommandBuffer) {
        for (texture, layout) in self.textures() {
            texture.transition_layout(cmd, layout);
        }
        cmd.pin(Arc::clone(self) as Arc<dyn Any>);

        let begin_info = vk::RenderPassBeginInfo::default()
            .render_pass(self.render_pass)
            .framebuffer(self.framebuffer)
            .render_area(vk::Rect2D {
                offset: vk::Offset2D::default(),
                extent: vk::Extent2D {
                    width: self.params.width,
                    height: self.params.height,
                },
            })
            .clear_values(&self.clear_values);

        let device = self.ctx.device();
        let viewport = vk::Viewport {
            x: 0.0,
            y: 0.0,
            width: self.params.width as f32,
            height: self.params.height as f32,
            min_depth: 0.0,
            max_depth: 1.0,
        };
        let scissor = vk::Rect2D {
            offset: vk::Offset2D::default(),
            extent: vk::Extent2D {
                width: self.params.width,
                height: self.params.height,
            },
        };
        unsafe {
            device.cmd_begin_render_pass(cmd.handle(), &begin_info, vk::SubpassContents::INLINE);
            device.cmd_set_viewport(cmd.handle(), 0, &[viewport]);
            device.cmd_set_scissor(cmd.handle(), 0, &[scissor]);
            device.cmd_set_line_width(cmd.handle(), 1.0);
        }
    }

    /// End the render pass and return the attachments to their default layouts.
    pub fn end(&self, cmd: &mut CommandBuffer) {
        unsafe { self.ctx.device().cmd_end_render_pass(cmd.handle()) };
        for (texture, layout) in self.textures() {
            // The render pass leaves attachments in their attachment layout.
            texture.set_layout(layout);
            texture.transition_to_default_layout(cmd);
        }
    }
}

impl Drop for RenderTarget {
    fn drop(&mut self) {
        unsafe {
            let device = self.ctx.device();
            if self.framebuffer != vk::Framebuffer::null() {
                device.destroy_framebuffer(self.framebuffer, None);
            }
            for view in self.views.drain(..) {
                device.destroy_image_view(view, None);
            }
            device.destroy_render_pass(self.render_pass, None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dont_care_ops() {
        assert_eq!(
            AttachmentOps::DONT_CARE.load,
            vk::AttachmentLoadOp::DONT_CARE
        );
        let ops = AttachmentOps::new(LoadOp::Clear, StoreOp::Store);
        assert_eq!(ops.load, vk::AttachmentLoadOp::CLEAR);
        assert_eq!(ops.store, vk::AttachmentStoreOp::STORE);
    }
}
