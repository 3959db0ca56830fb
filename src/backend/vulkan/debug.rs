//! Validation layer messages routed into the `log` facade.

use std::ffi::CStr;

use ash::vk;

use crate::error::{vk_err, GpuResult};

pub fn create_debug_messenger(
    debug_utils: &ash::ext::debug_utils::Instance,
) -> GpuResult<vk::DebugUtilsMessengerEXT> {
    let create_info = vk::DebugUtilsMessengerCreateInfoEXT::default()
        .message_severity(
            vk::DebugUtilsMessageSeverityFlagsEXT::ERROR
                | vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                | vk::DebugUtilsMessageSeverityFlagsEXT::INFO,
        )
        .message_type(
            vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
        )
        .pfn_user_callback(Some(debug_callback));

    unsafe { debug_utils.create_debug_utils_messenger(&create_info, None) }
        .map_err(vk_err("create debug messenger"))
}

unsafe extern "system" fn debug_callback(
    message_severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT,
    _user_data: *mut std::ffi::c_void,
) -> vk::Bool32 {
    // SAFETY: the driver hands us either null or a valid callback structure
    let message = if callback_data.is_null() {
        String::from("(no message)")
    } else {
        let data = unsafe { *callback_data };
        if data.p_message.is_null() {
            String::from("(null message)")
        } else {
            unsafe { CStr::from_ptr(data.p_message) }
                .to_string_lossy()
                .into_owned()
        }
    };

    let kind = match message_type {
        vk::DebugUtilsMessageTypeFlagsEXT::GENERAL => "general",
        vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION => "validation",
        vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE => "performance",
        _ => "unknown",
    };

    match message_severity {
        vk::DebugUtilsMessageSeverityFlagsEXT::ERROR => log::error!("[vk {}] {}", kind, message),
        vk::DebugUtilsMessageSeverityFlagsEXT::WARNING => log::warn!("[vk {}] {}", kind, message),
        vk::DebugUtilsMessageSeverityFlagsEXT::INFO => log::debug!("[vk {}] {}", kind, message),
        _ => log::trace!("[vk {}] {}", kind, message),
    }

    vk::FALSE
}
