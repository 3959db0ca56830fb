//! Error types shared by every GPU operation.

use ash::vk;
use thiserror::Error;

/// Errors returned by the GPU backend.
///
/// Native call failures are translated at their call site; nothing is retried
/// except the swapchain acquire after an implicit rebuild.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GpuError {
    /// Host or device memory exhausted.
    #[error("allocation failed: {0}")]
    Alloc(String),

    /// Missing format, feature or extension.
    #[error("unsupported: {0}")]
    Unsupported(String),

    /// Any other native failure.
    #[error("graphics error: {0}")]
    Generic(String),

    /// The requested binding does not exist in the program.
    #[error("binding not found")]
    NotFound,

    /// The caller misused the API.
    #[error("invalid argument: {0}")]
    InvalidArg(String),
}

pub type GpuResult<T> = Result<T, GpuError>;

/// Translate a native status into the backend error taxonomy.
pub fn vk_result_to_error(result: vk::Result, what: &str) -> GpuError {
    let msg = format!("Failed to {}: {:?}", what, result);
    match result {
        vk::Result::ERROR_OUT_OF_HOST_MEMORY
        | vk::Result::ERROR_OUT_OF_DEVICE_MEMORY
        | vk::Result::ERROR_OUT_OF_POOL_MEMORY => GpuError::Alloc(msg),
        vk::Result::ERROR_FORMAT_NOT_SUPPORTED
        | vk::Result::ERROR_FEATURE_NOT_PRESENT
        | vk::Result::ERROR_EXTENSION_NOT_PRESENT
        | vk::Result::ERROR_LAYER_NOT_PRESENT => GpuError::Unsupported(msg),
        _ => GpuError::Generic(msg),
    }
}

/// Shorthand used at native call sites: `.map_err(vk_err("create buffer"))`.
pub(crate) fn vk_err(what: &'static str) -> impl Fn(vk::Result) -> GpuError {
    move |e| vk_result_to_error(e, what)
}

impl From<gpu_allocator::AllocationError> for GpuError {
    fn from(e: gpu_allocator::AllocationError) -> Self {
        GpuError::Alloc(format!("{}", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_errors_map_to_alloc() {
        for r in [
            vk::Result::ERROR_OUT_OF_HOST_MEMORY,
            vk::Result::ERROR_OUT_OF_DEVICE_MEMORY,
            vk::Result::ERROR_OUT_OF_POOL_MEMORY,
        ] {
            assert!(matches!(vk_result_to_error(r, "x"), GpuError::Alloc(_)));
        }
    }

    #[test]
    fn test_missing_features_map_to_unsupported() {
        let err = vk_result_to_error(vk::Result::ERROR_FORMAT_NOT_SUPPORTED, "create image");
        assert!(matches!(err, GpuError::Unsupported(_)));
        assert!(err.to_string().contains("Failed to create image"));
    }

    #[test]
    fn test_other_errors_are_generic() {
        let err = vk_result_to_error(vk::Result::ERROR_DEVICE_LOST, "submit");
        assert!(matches!(err, GpuError::Generic(_)));
        assert_eq!(GpuError::NotFound.to_string(), "binding not found");
    }
}
