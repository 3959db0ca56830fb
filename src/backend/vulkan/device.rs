//! Physical/logical device selection and the shared device context.

use std::ffi::{c_char, CStr};
use std::mem::ManuallyDrop;

use ash::vk;
use gpu_allocator::vulkan::Allocator;
use parking_lot::Mutex;

use crate::config::{GpuConfig, WindowHandles};
use crate::error::{vk_err, GpuError, GpuResult};
use crate::types::{Features, Format, Limits};

use super::allocator;
use super::conversion::{convert_vk_format, max_sample_count};
use super::instance::{self, InstanceBundle};

/// Depth formats in order of preference.
const DEPTH_FORMATS: [vk::Format; 3] = [
    vk::Format::D16_UNORM,
    vk::Format::X8_D24_UNORM_PACK32,
    vk::Format::D32_SFLOAT,
];

const DEPTH_STENCIL_FORMATS: [vk::Format; 2] = [
    vk::Format::D24_UNORM_S8_UINT,
    vk::Format::D32_SFLOAT_S8_UINT,
];

/// The engine samples at most this many textures per stage.
const MAX_TEXTURE_IMAGE_UNITS: u32 = 32;

/// Physical device picked for rendering, with the queue families it offers.
struct PhysicalDeviceChoice {
    physical_device: vk::PhysicalDevice,
    graphics_queue_family: u32,
    present_queue_family: Option<u32>,
    properties: vk::PhysicalDeviceProperties,
}

/// Everything tied to the lifetime of the Vulkan device.
///
/// Shared through `Arc` by every resource so the device outlives them all.
pub struct VkContext {
    #[allow(dead_code)]
    entry: ash::Entry,
    instance: ash::Instance,
    debug: Option<(ash::ext::debug_utils::Instance, vk::DebugUtilsMessengerEXT)>,
    surface_loader: Option<ash::khr::surface::Instance>,
    surface: vk::SurfaceKHR,
    physical_device: vk::PhysicalDevice,
    device: ash::Device,
    swapchain_loader: Option<ash::khr::swapchain::Device>,
    graphics_queue_family: u32,
    present_queue_family: Option<u32>,
    graphics_queue: vk::Queue,
    present_queue: vk::Queue,
    /// Dropped before the device in `Drop`.
    allocator: ManuallyDrop<Mutex<Allocator>>,
    properties: vk::PhysicalDeviceProperties,
    memory_properties: vk::PhysicalDeviceMemoryProperties,
    ycbcr_supported: bool,
    preferred_depth_format: vk::Format,
    preferred_depth_stencil_format: vk::Format,
}

impl VkContext {
    /// Load Vulkan, create the instance, the optional surface and the device.
    pub fn new(config: &GpuConfig) -> GpuResult<Self> {
        let entry = unsafe { ash::Entry::load() }
            .map_err(|e| GpuError::Unsupported(format!("Failed to load Vulkan: {}", e)))?;

        let window = if config.offscreen { None } else { config.window };
        let InstanceBundle { instance, debug } =
            instance::create_instance(&entry, config.validation, window.map(|w| w.display))?;

        let surface_loader = window.map(|_| ash::khr::surface::Instance::new(&entry, &instance));
        let surface = match window {
            Some(handles) => match create_surface(&entry, &instance, handles) {
                Ok(surface) => surface,
                Err(e) => {
                    unsafe { destroy_instance(&instance, &debug, None, vk::SurfaceKHR::null()) };
                    return Err(e);
                }
            },
            None => vk::SurfaceKHR::null(),
        };

        match Self::create_device_state(&instance, surface_loader.as_ref(), surface) {
            Ok((choice, device, allocator)) => {
                let physical_device = choice.physical_device;
                let graphics_queue = unsafe { device.get_device_queue(choice.graphics_queue_family, 0) };
                let present_queue = choice
                    .present_queue_family
                    .map(|family| unsafe { device.get_device_queue(family, 0) })
                    .unwrap_or(vk::Queue::null());
                let swapchain_loader =
                    window.map(|_| ash::khr::swapchain::Device::new(&instance, &device));
                let memory_properties =
                    unsafe { instance.get_physical_device_memory_properties(physical_device) };
                let ycbcr_supported = query_ycbcr_support(&instance, physical_device);

                let mut ctx = Self {
                    entry,
                    instance,
                    debug,
                    surface_loader,
                    surface,
                    physical_device,
                    device,
                    swapchain_loader,
                    graphics_queue_family: choice.graphics_queue_family,
                    present_queue_family: choice.present_queue_family,
                    graphics_queue,
                    present_queue,
                    allocator: ManuallyDrop::new(Mutex::new(allocator)),
                    properties: choice.properties,
                    memory_properties,
                    ycbcr_supported,
                    preferred_depth_format: vk::Format::UNDEFINED,
                    preferred_depth_stencil_format: vk::Format::UNDEFINED,
                };
                ctx.preferred_depth_format = ctx.find_supported_format(
                    &DEPTH_FORMATS,
                    vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT,
                );
                ctx.preferred_depth_stencil_format = ctx.find_supported_format(
                    &DEPTH_STENCIL_FORMATS,
                    vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT,
                );

                log::info!(
                    "Vulkan context initialized on {:?} (graphics queue: {}, present queue: {:?}, ycbcr: {})",
                    unsafe { CStr::from_ptr(ctx.properties.device_name.as_ptr()) },
                    ctx.graphics_queue_family,
                    ctx.present_queue_family,
                    ctx.ycbcr_supported
                );
                Ok(ctx)
            }
            Err(e) => {
                unsafe { destroy_instance(&instance, &debug, surface_loader.as_ref(), surface) };
                Err(e)
            }
        }
    }

    fn create_device_state(
        instance: &ash::Instance,
        surface_loader: Option<&ash::khr::surface::Instance>,
        surface: vk::SurfaceKHR,
    ) -> GpuResult<(PhysicalDeviceChoice, ash::Device, Allocator)> {
        let choice = select_physical_device(instance, surface_loader, surface)?;
        let device = create_logical_device(instance, &choice, surface_loader.is_some())?;
        match allocator::create_allocator(instance, choice.physical_device, device.clone()) {
            Ok(allocator) => Ok((choice, device, allocator)),
            Err(e) => {
                unsafe { device.destroy_device(None) };
                Err(e)
            }
        }
    }

    pub fn device(&self) -> &ash::Device {
        &self.device
    }

    pub fn instance(&self) -> &ash::Instance {
        &self.instance
    }

    pub fn physical_device(&self) -> vk::PhysicalDevice {
        self.physical_device
    }

    pub fn allocator(&self) -> &Mutex<Allocator> {
        &self.allocator
    }

    pub fn graphics_queue(&self) -> vk::Queue {
        self.graphics_queue
    }

    pub fn graphics_queue_family(&self) -> u32 {
        self.graphics_queue_family
    }

    pub fn present_queue(&self) -> vk::Queue {
        self.present_queue
    }

    pub fn present_queue_family(&self) -> Option<u32> {
        self.present_queue_family
    }

    pub fn surface(&self) -> vk::SurfaceKHR {
        self.surface
    }

    pub fn properties(&self) -> &vk::PhysicalDeviceProperties {
        &self.properties
    }

    pub fn ycbcr_supported(&self) -> bool {
        self.ycbcr_supported
    }

    pub(crate) fn surface_loader(&self) -> GpuResult<&ash::khr::surface::Instance> {
        self.surface_loader
            .as_ref()
            .ok_or_else(|| GpuError::InvalidArg("context has no surface".to_string()))
    }

    pub(crate) fn swapchain_loader(&self) -> GpuResult<&ash::khr::swapchain::Device> {
        self.swapchain_loader
            .as_ref()
            .ok_or_else(|| GpuError::InvalidArg("context has no swapchain support".to_string()))
    }

    /// Optimal-tiling features of a format.
    pub fn format_features(&self, format: vk::Format) -> vk::FormatFeatureFlags {
        let props = unsafe {
            self.instance
                .get_physical_device_format_properties(self.physical_device, format)
        };
        props.optimal_tiling_features
    }

    /// First format of `candidates` supporting `features` with optimal tiling.
    pub fn find_supported_format(
        &self,
        candidates: &[vk::Format],
        features: vk::FormatFeatureFlags,
    ) -> vk::Format {
        candidates
            .iter()
            .copied()
            .find(|&f| self.format_features(f).contains(features))
            .unwrap_or(vk::Format::UNDEFINED)
    }

    /// Index of a memory type allowed by `type_bits` with all of `props`.
    pub fn find_memory_type(&self, type_bits: u32, props: vk::MemoryPropertyFlags) -> Option<u32> {
        let count = self.memory_properties.memory_type_count as usize;
        self.memory_properties.memory_types[..count]
            .iter()
            .enumerate()
            .find(|(i, t)| type_bits & (1 << i) != 0 && t.property_flags.contains(props))
            .map(|(i, _)| i as u32)
    }

    pub fn preferred_depth_format(&self) -> Format {
        convert_vk_format(self.preferred_depth_format)
    }

    pub fn preferred_depth_stencil_format(&self) -> Format {
        convert_vk_format(self.preferred_depth_stencil_format)
    }

    pub fn limits(&self) -> Limits {
        let l = &self.properties.limits;
        let max_samples = max_sample_count(
            l.framebuffer_color_sample_counts
                & l.framebuffer_depth_sample_counts
                & l.framebuffer_stencil_sample_counts,
        );
        Limits {
            max_color_attachments: l.max_color_attachments,
            max_draw_buffers: l.max_color_attachments,
            max_texture_dimension_1d: l.max_image_dimension1_d,
            max_texture_dimension_2d: l.max_image_dimension2_d,
            max_texture_dimension_3d: l.max_image_dimension3_d,
            max_texture_dimension_cube: l.max_image_dimension_cube,
            max_texture_array_layers: l.max_image_array_layers,
            max_compute_work_group_count: l.max_compute_work_group_count,
            max_compute_work_group_size: l.max_compute_work_group_size,
            max_compute_work_group_invocations: l.max_compute_work_group_invocations,
            max_compute_shared_memory_size: l.max_compute_shared_memory_size,
            max_samples,
            max_texture_image_units: MAX_TEXTURE_IMAGE_UNITS,
            max_uniform_block_size: l.max_uniform_buffer_range,
            max_storage_block_size: l.max_storage_buffer_range,
        }
    }

    pub fn engine_features(&self) -> Features {
        let mut features = Features::COMPUTE
            | Features::INSTANCED_DRAW
            | Features::COLOR_RESOLVE
            | Features::FLOAT_TEXTURES
            | Features::STORAGE_BUFFER;
        if self.ycbcr_supported {
            features |= Features::YCBCR_CONVERSION;
        }
        features
    }

    pub fn surface_capabilities(&self) -> GpuResult<vk::SurfaceCapabilitiesKHR> {
        unsafe {
            self.surface_loader()?
                .get_physical_device_surface_capabilities(self.physical_device, self.surface)
        }
        .map_err(vk_err("query surface capabilities"))
    }

    pub fn surface_formats(&self) -> GpuResult<Vec<vk::SurfaceFormatKHR>> {
        unsafe {
            self.surface_loader()?
                .get_physical_device_surface_formats(self.physical_device, self.surface)
        }
        .map_err(vk_err("query surface formats"))
    }

    pub fn surface_present_modes(&self) -> GpuResult<Vec<vk::PresentModeKHR>> {
        unsafe {
            self.surface_loader()?
                .get_physical_device_surface_present_modes(self.physical_device, self.surface)
        }
        .map_err(vk_err("query surface present modes"))
    }

    pub fn wait_idle(&self) -> GpuResult<()> {
        unsafe { self.device.device_wait_idle() }.map_err(vk_err("wait for device idle"))
    }
}

impl Drop for VkContext {
    fn drop(&mut self) {
        unsafe {
            let _ = self.device.device_wait_idle();
            ManuallyDrop::drop(&mut self.allocator);
            self.device.destroy_device(None);
            destroy_instance(
                &self.instance,
                &self.debug,
                self.surface_loader.as_ref(),
                self.surface,
            );
        }
    }
}

/// # Safety
///
/// Every object created from `instance` other than the surface must already be gone.
unsafe fn destroy_instance(
    instance: &ash::Instance,
    debug: &Option<(ash::ext::debug_utils::Instance, vk::DebugUtilsMessengerEXT)>,
    surface_loader: Option<&ash::khr::surface::Instance>,
    surface: vk::SurfaceKHR,
) {
    unsafe {
        if let Some(loader) = surface_loader {
            if surface != vk::SurfaceKHR::null() {
                loader.destroy_surface(surface, None);
            }
        }
        if let Some((debug_utils, messenger)) = debug {
            debug_utils.destroy_debug_utils_messenger(*messenger, None);
        }
        instance.destroy_instance(None);
    }
}

fn create_surface(
    entry: &ash::Entry,
    instance: &ash::Instance,
    handles: WindowHandles,
) -> GpuResult<vk::SurfaceKHR> {
    unsafe { ash_window::create_surface(entry, instance, handles.display, handles.window, None) }
        .map_err(vk_err("create window surface"))
}

fn device_type_priority(ty: vk::PhysicalDeviceType) -> u32 {
    match ty {
        vk::PhysicalDeviceType::DISCRETE_GPU => 5,
        vk::PhysicalDeviceType::INTEGRATED_GPU => 4,
        vk::PhysicalDeviceType::VIRTUAL_GPU => 3,
        vk::PhysicalDeviceType::CPU => 2,
        _ => 1,
    }
}

/// Pick the highest-priority device with a graphics+compute queue (and a
/// present queue when rendering to a surface).
fn select_physical_device(
    instance: &ash::Instance,
    surface_loader: Option<&ash::khr::surface::Instance>,
    surface: vk::SurfaceKHR,
) -> GpuResult<PhysicalDeviceChoice> {
    let devices = unsafe { instance.enumerate_physical_devices() }
        .map_err(vk_err("enumerate physical devices"))?;

    let mut best: Option<(u32, PhysicalDeviceChoice)> = None;
    for physical_device in devices {
        let properties = unsafe { instance.get_physical_device_properties(physical_device) };
        if properties.api_version < instance::REQUIRED_API_VERSION {
            continue;
        }
        let families =
            unsafe { instance.get_physical_device_queue_family_properties(physical_device) };

        let mut graphics = None;
        let mut present = None;
        for (index, family) in families.iter().enumerate() {
            let index = index as u32;
            let flags = vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE;
            if graphics.is_none() && family.queue_flags.contains(flags) {
                graphics = Some(index);
            }
            if let Some(loader) = surface_loader {
                let supported = unsafe {
                    loader.get_physical_device_surface_support(physical_device, index, surface)
                }
                .unwrap_or(false);
                if supported && present.is_none() {
                    present = Some(index);
                }
            }
        }

        let Some(graphics_queue_family) = graphics else {
            continue;
        };
        if surface_loader.is_some() && present.is_none() {
            continue;
        }

        let priority = device_type_priority(properties.device_type);
        let name = unsafe { CStr::from_ptr(properties.device_name.as_ptr()) };
        log::info!(
            "Found GPU: {:?} (type: {:?}, priority: {})",
            name,
            properties.device_type,
            priority
        );

        if best.as_ref().map_or(true, |(p, _)| priority > *p) {
            best = Some((
                priority,
                PhysicalDeviceChoice {
                    physical_device,
                    graphics_queue_family,
                    present_queue_family: present,
                    properties,
                },
            ));
        }
    }

    best.map(|(_, choice)| choice)
        .ok_or_else(|| GpuError::Unsupported("No suitable Vulkan device found".to_string()))
}

fn query_ycbcr_support(instance: &ash::Instance, physical_device: vk::PhysicalDevice) -> bool {
    let mut ycbcr = vk::PhysicalDeviceSamplerYcbcrConversionFeatures::default();
    let mut features2 = vk::PhysicalDeviceFeatures2::default().push_next(&mut ycbcr);
    unsafe { instance.get_physical_device_features2(physical_device, &mut features2) };
    ycbcr.sampler_ycbcr_conversion == vk::TRUE
}

fn has_device_extension(
    instance: &ash::Instance,
    physical_device: vk::PhysicalDevice,
    name: &CStr,
) -> bool {
    let Ok(extensions) =
        (unsafe { instance.enumerate_device_extension_properties(physical_device) })
    else {
        return false;
    };
    extensions.iter().any(|ext| {
        let ext_name = unsafe { CStr::from_ptr(ext.extension_name.as_ptr()) };
        ext_name == name
    })
}

fn create_logical_device(
    instance: &ash::Instance,
    choice: &PhysicalDeviceChoice,
    onscreen: bool,
) -> GpuResult<ash::Device> {
    let queue_priorities = [1.0f32];
    let mut queue_infos = vec![vk::DeviceQueueCreateInfo::default()
        .queue_family_index(choice.graphics_queue_family)
        .queue_priorities(&queue_priorities)];
    if let Some(present) = choice.present_queue_family {
        if present != choice.graphics_queue_family {
            queue_infos.push(
                vk::DeviceQueueCreateInfo::default()
                    .queue_family_index(present)
                    .queue_priorities(&queue_priorities),
            );
        }
    }

    let mut extensions: Vec<*const c_char> = Vec::new();
    if onscreen {
        extensions.push(ash::khr::swapchain::NAME.as_ptr());
    }
    #[cfg(target_os = "macos")]
    {
        let name = ash::khr::portability_subset::NAME;
        if has_device_extension(instance, choice.physical_device, name) {
            extensions.push(name.as_ptr());
        }
    }
    if has_device_extension(
        instance,
        choice.physical_device,
        ash::khr::external_memory_fd::NAME,
    ) {
        extensions.push(ash::khr::external_memory_fd::NAME.as_ptr());
    }

    // Only enable what the device actually offers.
    let available = unsafe { instance.get_physical_device_features(choice.physical_device) };
    let features = vk::PhysicalDeviceFeatures::default()
        .sampler_anisotropy(available.sampler_anisotropy == vk::TRUE)
        .vertex_pipeline_stores_and_atomics(available.vertex_pipeline_stores_and_atomics == vk::TRUE)
        .fragment_stores_and_atomics(available.fragment_stores_and_atomics == vk::TRUE)
        .shader_storage_image_extended_formats(
            available.shader_storage_image_extended_formats == vk::TRUE,
        );

    let mut ycbcr = vk::PhysicalDeviceSamplerYcbcrConversionFeatures::default()
        .sampler_ycbcr_conversion(query_ycbcr_support(instance, choice.physical_device));

    let create_info = vk::DeviceCreateInfo::default()
        .queue_create_infos(&queue_infos)
        .enabled_extension_names(&extensions)
        .enabled_features(&features)
        .push_next(&mut ycbcr);

    unsafe { instance.create_device(choice.physical_device, &create_info, None) }
        .map_err(vk_err("create logical device"))
}
