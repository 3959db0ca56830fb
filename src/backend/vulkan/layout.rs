//! Image layout states and the barriers that move textures between them.
//!
//! Every texture tracks the layout its image is currently in. A transition to
//! the layout it already holds records nothing; any other transition records a
//! single image barrier built from the access-mask table below, with a
//! conservative ALL_COMMANDS → ALL_COMMANDS stage mask.

use ash::vk;

/// Image layout states a texture can be in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TextureLayout {
    /// Initial state, contents undefined.
    #[default]
    Undefined,
    /// Storage images and anything needing both read and write access.
    General,
    ColorAttachment,
    DepthStencilAttachment,
    DepthStencilReadOnly,
    ShaderReadOnly,
    TransferSrc,
    TransferDst,
    /// Host-written linear images.
    Preinitialized,
    PresentSrc,
}

impl TextureLayout {
    pub fn to_vk(self) -> vk::ImageLayout {
        match self {
            Self::Undefined => vk::ImageLayout::UNDEFINED,
            Self::General => vk::ImageLayout::GENERAL,
            Self::ColorAttachment => vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
            Self::DepthStencilAttachment => vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
            Self::DepthStencilReadOnly => vk::ImageLayout::DEPTH_STENCIL_READ_ONLY_OPTIMAL,
            Self::ShaderReadOnly => vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            Self::TransferSrc => vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
            Self::TransferDst => vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            Self::Preinitialized => vk::ImageLayout::PREINITIALIZED,
            Self::PresentSrc => vk::ImageLayout::PRESENT_SRC_KHR,
        }
    }

    /// Memory accesses the layout implies.
    ///
    /// `Undefined` can only be left, never entered, and `Preinitialized` can
    /// only be entered by host writes.
    pub fn access_mask(self) -> vk::AccessFlags {
        match self {
            Self::Undefined => vk::AccessFlags::empty(),
            Self::General => vk::AccessFlags::SHADER_READ | vk::AccessFlags::SHADER_WRITE,
            Self::ColorAttachment => {
                vk::AccessFlags::COLOR_ATTACHMENT_READ | vk::AccessFlags::COLOR_ATTACHMENT_WRITE
            }
            Self::DepthStencilAttachment => {
                vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_READ
                    | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE
            }
            Self::DepthStencilReadOnly => vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_READ,
            Self::ShaderReadOnly => {
                vk::AccessFlags::SHADER_READ | vk::AccessFlags::INPUT_ATTACHMENT_READ
            }
            Self::TransferSrc => vk::AccessFlags::TRANSFER_READ,
            Self::TransferDst => vk::AccessFlags::TRANSFER_WRITE,
            Self::Preinitialized => vk::AccessFlags::HOST_WRITE,
            Self::PresentSrc => vk::AccessFlags::MEMORY_READ,
        }
    }
}

/// A planned layout change for one image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LayoutTransition {
    pub old_layout: TextureLayout,
    pub new_layout: TextureLayout,
}

impl LayoutTransition {
    /// Plan the move from `current` to `target`; `None` when nothing must be recorded.
    pub fn plan(current: TextureLayout, target: TextureLayout) -> Option<Self> {
        if current == target {
            return None;
        }
        debug_assert!(
            target != TextureLayout::Undefined,
            "cannot transition an image to the undefined layout"
        );
        Some(Self {
            old_layout: current,
            new_layout: target,
        })
    }

    pub fn barrier(
        &self,
        image: vk::Image,
        range: vk::ImageSubresourceRange,
    ) -> vk::ImageMemoryBarrier<'static> {
        vk::ImageMemoryBarrier::default()
            .src_access_mask(self.old_layout.access_mask())
            .dst_access_mask(self.new_layout.access_mask())
            .old_layout(self.old_layout.to_vk())
            .new_layout(self.new_layout.to_vk())
            .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .image(image)
            .subresource_range(range)
    }

    /// Record the barrier into `cmd_buf`.
    ///
    /// # Safety
    ///
    /// `cmd_buf` must be in the recording state and `image` alive.
    pub unsafe fn record(
        &self,
        device: &ash::Device,
        cmd_buf: vk::CommandBuffer,
        image: vk::Image,
        range: vk::ImageSubresourceRange,
    ) {
        let barrier = self.barrier(image, range);
        unsafe {
            device.cmd_pipeline_barrier(
                cmd_buf,
                vk::PipelineStageFlags::ALL_COMMANDS,
                vk::PipelineStageFlags::ALL_COMMANDS,
                vk::DependencyFlags::empty(),
                &[],
                &[],
                std::slice::from_ref(&barrier),
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_layout_plans_nothing() {
        for layout in [
            TextureLayout::General,
            TextureLayout::ShaderReadOnly,
            TextureLayout::TransferDst,
            TextureLayout::PresentSrc,
        ] {
            assert_eq!(LayoutTransition::plan(layout, layout), None);
        }
    }

    #[test]
    fn test_repeated_transition_is_idempotent() {
        let mut current = TextureLayout::Undefined;
        let mut recorded = 0;
        for _ in 0..2 {
            if let Some(t) = LayoutTransition::plan(current, TextureLayout::TransferDst) {
                recorded += 1;
                current = t.new_layout;
            }
        }
        assert_eq!(recorded, 1);
        assert_eq!(current, TextureLayout::TransferDst);
    }

    #[test]
    fn test_barrier_access_masks() {
        let t = LayoutTransition::plan(TextureLayout::Undefined, TextureLayout::ShaderReadOnly)
            .unwrap();
        let barrier = t.barrier(vk::Image::null(), vk::ImageSubresourceRange::default());
        assert_eq!(barrier.src_access_mask, vk::AccessFlags::empty());
        assert_eq!(
            barrier.dst_access_mask,
            vk::AccessFlags::SHADER_READ | vk::AccessFlags::INPUT_ATTACHMENT_READ
        );
        assert_eq!(barrier.old_layout, vk::ImageLayout::UNDEFINED);
        assert_eq!(barrier.new_layout, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL);
    }

    #[test]
    fn test_present_layout_reads_memory() {
        assert_eq!(
            TextureLayout::PresentSrc.access_mask(),
            vk::AccessFlags::MEMORY_READ
        );
        assert_eq!(
            TextureLayout::TransferSrc.access_mask(),
            vk::AccessFlags::TRANSFER_READ
        );
    }
}
