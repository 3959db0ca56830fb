//! Window swapchain: surface format and present mode selection, image
//! acquisition and presentation.
//!
//! Rebuilding is driven by the context: it drops the images' render targets,
//! drops this object and creates a new one.

use std::sync::Arc;

use ash::vk;

use crate::error::{vk_err, GpuError, GpuResult};

use super::device::VkContext;

/// Pick an 8-bit UNORM surface format in the sRGB non-linear color space.
pub fn select_surface_format(formats: &[vk::SurfaceFormatKHR]) -> GpuResult<vk::SurfaceFormatKHR> {
    for format in formats {
        log::debug!(
            "Available surface format: {:?} ({:?})",
            format.format,
            format.color_space
        );
    }

    // A single UNDEFINED entry means the surface takes any format.
    if formats.iter().any(|f| f.format == vk::Format::UNDEFINED) {
        return Ok(vk::SurfaceFormatKHR {
            format: vk::Format::B8G8R8A8_UNORM,
            color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
        });
    }

    formats
        .iter()
        .find(|f| {
            matches!(
                f.format,
                vk::Format::B8G8R8A8_UNORM | vk::Format::R8G8B8A8_UNORM
            ) && f.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR
        })
        .copied()
        .ok_or_else(|| {
            GpuError::Unsupported("no 8-bit UNORM sRGB surface format available".to_string())
        })
}

/// FIFO unless vsync is disabled and the surface supports immediate mode.
pub fn select_present_mode(modes: &[vk::PresentModeKHR], swap_interval: i32) -> vk::PresentModeKHR {
    log::debug!("Available present modes: {:?}", modes);
    if swap_interval == 0 {
        if modes.contains(&vk::PresentModeKHR::IMMEDIATE) {
            return vk::PresentModeKHR::IMMEDIATE;
        }
        log::warn!("Immediate present mode is not supported, falling back to FIFO");
    }
    vk::PresentModeKHR::FIFO
}

pub fn select_composite_alpha(
    supported: vk::CompositeAlphaFlagsKHR,
) -> GpuResult<vk::CompositeAlphaFlagsKHR> {
    [
        vk::CompositeAlphaFlagsKHR::INHERIT,
        vk::CompositeAlphaFlagsKHR::OPAQUE,
    ]
    .into_iter()
    .find(|&flag| supported.contains(flag))
    .ok_or_else(|| GpuError::Unsupported("no usable composite alpha mode".to_string()))
}

/// One image more than the minimum, within the surface's maximum.
pub fn select_image_count(caps: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let count = caps.min_image_count + 1;
    if caps.max_image_count > 0 {
        count.min(caps.max_image_count)
    } else {
        count
    }
}

pub fn clamp_extent(width: u32, height: u32, caps: &vk::SurfaceCapabilitiesKHR) -> vk::Extent2D {
    vk::Extent2D {
        width: width.clamp(caps.min_image_extent.width, caps.max_image_extent.width),
        height: height.clamp(caps.min_image_extent.height, caps.max_image_extent.height),
    }
}

/// What a swapchain rebuild does for the surface's current extent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RebuildAction {
    Rebuild,
    /// Minimized surface: keep the old swapchain and the rebuild pending.
    Postpone,
}

pub fn plan_rebuild(current_extent: vk::Extent2D) -> RebuildAction {
    if current_extent.width == 0 || current_extent.height == 0 {
        RebuildAction::Postpone
    } else {
        RebuildAction::Rebuild
    }
}

pub struct Swapchain {
    ctx: Arc<VkContext>,
    swapchain: vk::SwapchainKHR,
    images: Vec<vk::Image>,
    surface_format: vk::SurfaceFormatKHR,
    present_mode: vk::PresentModeKHR,
    extent: vk::Extent2D,
}

impl Swapchain {
    pub fn new(
        ctx: &Arc<VkContext>,
        width: u32,
        height: u32,
        swap_interval: i32,
    ) -> GpuResult<Self> {
        let caps = ctx.surface_capabilities()?;
        let surface_format = select_surface_format(&ctx.surface_formats()?)?;
        let present_mode = select_present_mode(&ctx.surface_present_modes()?, swap_interval);
        let composite_alpha = select_composite_alpha(caps.supported_composite_alpha)?;
        let extent = clamp_extent(width, height, &caps);
        let image_count = select_image_count(&caps);

        log::debug!(
            "Swapchain image count: {} [{}-{}]",
            image_count,
            caps.min_image_count,
            caps.max_image_count
        );

        let mut create_info = vk::SwapchainCreateInfoKHR::default()
            .surface(ctx.surface())
            .min_image_count(image_count)
            .image_format(surface_format.format)
            .image_color_space(surface_format.color_space)
            .image_extent(extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::TRANSFER_SRC)
            .image_sharing_mode(vk::SharingMode::EXCLUSIVE)
            .pre_transform(caps.current_transform)
            .composite_alpha(composite_alpha)
            .present_mode(present_mode)
            .clipped(true);

        let graphics_family = ctx.graphics_queue_family();
        let present_family = ctx.present_queue_family().unwrap_or(graphics_family);
        let queue_families = [graphics_family, present_family];
        if graphics_family != present_family {
            create_info = create_info
                .image_sharing_mode(vk::SharingMode::CONCURRENT)
                .queue_family_indices(&queue_families);
        }

        let loader = ctx.swapchain_loader()?;
        let swapchain = unsafe { loader.create_swapchain(&create_info, None) }
            .map_err(vk_err("create swapchain"))?;

        let images = match unsafe { loader.get_swapchain_images(swapchain) } {
            Ok(images) => images,
            Err(e) => {
                unsafe { loader.destroy_swapchain(swapchain, None) };
                return Err(vk_err("get swapchain images")(e));
            }
        };

        log::info!(
            "Created swapchain: {}x{}, {} images, {:?}, {:?}",
            extent.width,
            extent.height,
            images.len(),
            surface_format.format,
            present_mode
        );

        Ok(Self {
            ctx: Arc::clone(ctx),
            swapchain,
            images,
            surface_format,
            present_mode,
            extent,
        })
    }

    pub fn images(&self) -> &[vk::Image] {
        &self.images
    }

    pub fn format(&self) -> vk::Format {
        self.surface_format.format
    }

    pub fn present_mode(&self) -> vk::PresentModeKHR {
        self.present_mode
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    /// Acquire the next image, signaling `semaphore` once it is available.
    ///
    /// Returns `None` when the swapchain is out of date and must be rebuilt.
    pub fn acquire(&self, semaphore: vk::Semaphore) -> GpuResult<Option<u32>> {
        let result = unsafe {
            self.ctx.swapchain_loader()?.acquire_next_image(
                self.swapchain,
                u64::MAX,
                semaphore,
                vk::Fence::null(),
            )
        };
        match result {
            Ok((index, suboptimal)) => {
                if suboptimal {
                    log::trace!("Swapchain is suboptimal");
                }
                Ok(Some(index))
            }
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(None),
            Err(e) => {
                log::error!("Failed to acquire swapchain image: {:?}", e);
                Err(vk_err("acquire swapchain image")(e))
            }
        }
    }

    /// Queue `image_index` for presentation once `wait` is signaled.
    ///
    /// An out-of-date swapchain is not an error: the next acquire rebuilds it.
    pub fn present(&self, wait: vk::Semaphore, image_index: u32) -> GpuResult<()> {
        let wait_semaphores = [wait];
        let swapchains = [self.swapchain];
        let image_indices = [image_index];
        let present_info = vk::PresentInfoKHR::default()
            .wait_semaphores(&wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);

        let result = unsafe {
            self.ctx
                .swapchain_loader()?
                .queue_present(self.ctx.present_queue(), &present_info)
        };
        match result {
            Ok(_) | Err(vk::Result::SUBOPTIMAL_KHR) => Ok(()),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => {
                log::debug!("Swapchain out of date at present, rebuilding on next acquire");
                Ok(())
            }
            Err(e) => {
                log::error!("Failed to present swapchain image: {:?}", e);
                Err(vk_err("present swapchain image")(e))
            }
        }
    }
}

impl Drop for Swapchain {
    fn drop(&mut self) {
        if let Ok(loader) = self.ctx.swapchain_loader() {
            unsafe { loader.destroy_swapchain(self.swapchain, None) };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn surface_format(format: vk::Format, color_space: vk::ColorSpaceKHR) -> vk::SurfaceFormatKHR {
        vk::SurfaceFormatKHR {
            format,
            color_space,
        }
    }

    #[test]
    fn test_surface_format_prefers_unorm_srgb() {
        let formats = [
            surface_format(vk::Format::A2B10G10R10_UNORM_PACK32, vk::ColorSpaceKHR::SRGB_NONLINEAR),
            surface_format(vk::Format::B8G8R8A8_UNORM, vk::ColorSpaceKHR::SRGB_NONLINEAR),
        ];
        let chosen = select_surface_format(&formats).unwrap();
        assert_eq!(chosen.format, vk::Format::B8G8R8A8_UNORM);
    }

    #[test]
    fn test_surface_format_undefined_means_any() {
        let formats = [surface_format(vk::Format::UNDEFINED, vk::ColorSpaceKHR::SRGB_NONLINEAR)];
        let chosen = select_surface_format(&formats).unwrap();
        assert_eq!(chosen.format, vk::Format::B8G8R8A8_UNORM);
    }

    #[test]
    fn test_surface_format_unsupported() {
        let formats = [surface_format(
            vk::Format::R16G16B16A16_SFLOAT,
            vk::ColorSpaceKHR::EXTENDED_SRGB_LINEAR_EXT,
        )];
        assert!(matches!(
            select_surface_format(&formats),
            Err(GpuError::Unsupported(_))
        ));
    }

    #[test]
    fn test_present_mode_selection() {
        let all = [vk::PresentModeKHR::FIFO, vk::PresentModeKHR::IMMEDIATE];
        assert_eq!(select_present_mode(&all, 0), vk::PresentModeKHR::IMMEDIATE);
        assert_eq!(select_present_mode(&all, 1), vk::PresentModeKHR::FIFO);
        assert_eq!(
            select_present_mode(&[vk::PresentModeKHR::FIFO], 0),
            vk::PresentModeKHR::FIFO
        );
    }

    #[test]
    fn test_composite_alpha_selection() {
        let both = vk::CompositeAlphaFlagsKHR::INHERIT | vk::CompositeAlphaFlagsKHR::OPAQUE;
        assert_eq!(
            select_composite_alpha(both).unwrap(),
            vk::CompositeAlphaFlagsKHR::INHERIT
        );
        assert_eq!(
            select_composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE).unwrap(),
            vk::CompositeAlphaFlagsKHR::OPAQUE
        );
        assert!(select_composite_alpha(vk::CompositeAlphaFlagsKHR::PRE_MULTIPLIED).is_err());
    }

    fn extent(width: u32, height: u32) -> vk::Extent2D {
        vk::Extent2D { width, height }
    }

    #[test]
    fn test_zero_extent_postpones_rebuild() {
        assert_eq!(plan_rebuild(extent(0, 0)), RebuildAction::Postpone);
        assert_eq!(plan_rebuild(extent(800, 0)), RebuildAction::Postpone);
        assert_eq!(plan_rebuild(extent(0, 600)), RebuildAction::Postpone);
        assert_eq!(plan_rebuild(extent(800, 600)), RebuildAction::Rebuild);
        // Surfaces whose size follows the swapchain report u32::MAX.
        assert_eq!(plan_rebuild(extent(u32::MAX, u32::MAX)), RebuildAction::Rebuild);
    }

    #[test]
    fn test_rebuild_stays_pending_until_surface_is_visible() {
        let mut pending = true;
        let mut rebuilds = 0;
        for current in [extent(0, 0), extent(0, 0), extent(1024, 768), extent(1024, 768)] {
            if !pending {
                continue;
            }
            match plan_rebuild(current) {
                RebuildAction::Postpone => {}
                RebuildAction::Rebuild => {
                    rebuilds += 1;
                    pending = false;
                }
            }
        }
        assert_eq!(rebuilds, 1);
        assert!(!pending);
    }

    #[test]
    fn test_image_count_and_extent() {
        let caps = vk::SurfaceCapabilitiesKHR {
            min_image_count: 2,
            max_image_count: 2,
            min_image_extent: vk::Extent2D {
                width: 1,
                height: 1,
            },
            max_image_extent: vk::Extent2D {
                width: 800,
                height: 600,
            },
            ..Default::default()
        };
        assert_eq!(select_image_count(&caps), 2);
        let unbounded = vk::SurfaceCapabilitiesKHR {
            max_image_count: 0,
            ..caps
        };
        assert_eq!(select_image_count(&unbounded), 3);

        let extent = clamp_extent(1024, 0, &caps);
        assert_eq!(extent.width, 800);
        assert_eq!(extent.height, 1);
    }
}
