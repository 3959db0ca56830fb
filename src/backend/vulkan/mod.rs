//! Vulkan backend built on ash.
//!
//! [`GpuContextVk`] owns the device context and the frame loop; every other
//! module implements one resource kind on top of [`VkContext`].

mod allocator;
mod context;
mod conversion;
mod debug;
mod device;
mod instance;

pub mod buffer;
pub mod command;
pub mod layout;
pub mod pipeline;
pub mod program;
pub mod rendertarget;
pub mod swapchain;
pub mod texture;
pub mod ycbcr;

pub use buffer::Buffer;
pub use command::{CommandBuffer, CommandPool};
pub use context::{effective_viewport, GpuContextVk};
pub use device::VkContext;
pub use layout::TextureLayout;
pub use pipeline::{DirtyFrames, Pipeline};
pub use program::{Program, ShaderCompiler};
pub use rendertarget::RenderTarget;
pub use texture::{Texture, TextureWrapParams};
pub use ycbcr::{YcbcrParams, YcbcrSampler, YcbcrSamplerCache, YcbcrSamplerSlot};
