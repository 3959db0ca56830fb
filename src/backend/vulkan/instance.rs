//! Vulkan instance creation.

use std::ffi::{c_char, CStr};

use ash::vk;
use raw_window_handle::RawDisplayHandle;

use crate::error::{vk_err, GpuResult};

use super::debug;

/// Vulkan 1.1 is the floor: it brings sampler YCbCr conversion into core and
/// SPIR-V 1.3 shaders.
pub const REQUIRED_API_VERSION: u32 = vk::make_api_version(0, 1, 1, 0);

const VALIDATION_LAYER_NAME: &CStr = c"VK_LAYER_KHRONOS_validation";

const APP_NAME: &CStr = c"ngpu";

/// Instance plus the optional validation messenger attached to it.
pub struct InstanceBundle {
    pub instance: ash::Instance,
    pub debug: Option<(ash::ext::debug_utils::Instance, vk::DebugUtilsMessengerEXT)>,
}

/// Create a Vulkan instance.
///
/// Surface extensions are only requested when a display is given (onscreen).
pub fn create_instance(
    entry: &ash::Entry,
    validation_enabled: bool,
    display: Option<RawDisplayHandle>,
) -> GpuResult<InstanceBundle> {
    let validation_available = validation_enabled && check_validation_layer_support(entry);
    if validation_enabled && !validation_available {
        log::warn!("Validation layers requested but not available");
    }

    let app_info = vk::ApplicationInfo::default()
        .application_name(APP_NAME)
        .application_version(vk::make_api_version(0, 0, 1, 0))
        .engine_name(APP_NAME)
        .engine_version(vk::make_api_version(0, 0, 1, 0))
        .api_version(REQUIRED_API_VERSION);

    let mut extensions: Vec<*const c_char> = Vec::new();
    if let Some(display) = display {
        let required = ash_window::enumerate_required_extensions(display)
            .map_err(vk_err("enumerate surface extensions"))?;
        extensions.extend_from_slice(required);
    }
    if validation_available {
        extensions.push(ash::ext::debug_utils::NAME.as_ptr());
    }

    #[allow(unused_mut)]
    let mut create_flags = vk::InstanceCreateFlags::empty();
    #[cfg(target_os = "macos")]
    {
        extensions.push(ash::khr::portability_enumeration::NAME.as_ptr());
        create_flags |= vk::InstanceCreateFlags::ENUMERATE_PORTABILITY_KHR;
    }

    let layer_names: Vec<*const c_char> = if validation_available {
        vec![VALIDATION_LAYER_NAME.as_ptr()]
    } else {
        vec![]
    };

    let create_info = vk::InstanceCreateInfo::default()
        .flags(create_flags)
        .application_info(&app_info)
        .enabled_extension_names(&extensions)
        .enabled_layer_names(&layer_names);

    let instance = unsafe { entry.create_instance(&create_info, None) }
        .map_err(vk_err("create Vulkan instance"))?;

    let debug = if validation_available {
        let debug_utils = ash::ext::debug_utils::Instance::new(entry, &instance);
        match debug::create_debug_messenger(&debug_utils) {
            Ok(messenger) => Some((debug_utils, messenger)),
            Err(e) => {
                unsafe { instance.destroy_instance(None) };
                return Err(e);
            }
        }
    } else {
        None
    };

    Ok(InstanceBundle { instance, debug })
}

fn check_validation_layer_support(entry: &ash::Entry) -> bool {
    let Ok(available_layers) = (unsafe { entry.enumerate_instance_layer_properties() }) else {
        return false;
    };

    available_layers.iter().any(|layer| {
        let name = unsafe { CStr::from_ptr(layer.layer_name.as_ptr()) };
        name == VALIDATION_LAYER_NAME
    })
}
