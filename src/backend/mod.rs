//! GPU backend abstraction and its Vulkan implementation.

pub mod traits;
pub mod vulkan;

pub use traits::GpuBackend;

/// Available GPU backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Backend {
    /// Vulkan through ash
    #[default]
    Vulkan,
}

impl Backend {
    pub fn name(&self) -> &'static str {
        match self {
            Backend::Vulkan => "Vulkan",
        }
    }
}
