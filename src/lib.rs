//! Vulkan GPU backend of a node-based scene-graph renderer.
//!
//! The crate exposes a [`GpuBackend`] trait describing everything the scene
//! graph needs from a GPU (frame brackets, resource factories, command
//! recording) and [`GpuContextVk`], its Vulkan implementation.
//!
//! ```no_run
//! use ngpu_vk::{GpuBackend, GpuConfig, GpuContextVk};
//!
//! let mut gpu = GpuContextVk::new(GpuConfig::offscreen(256, 256).with_capture_buffer(true))?;
//! gpu.begin_update()?;
//! gpu.end_update()?;
//! gpu.begin_draw()?;
//! gpu.end_draw()?;
//! let pixels = gpu.capture_buffer();
//! # Ok::<(), ngpu_vk::GpuError>(())
//! ```

pub mod backend;
pub mod config;
pub mod error;
pub mod types;

pub use backend::vulkan::GpuContextVk;
pub use backend::{Backend, GpuBackend};
pub use config::{GpuConfig, WindowHandles, MAX_IN_FLIGHT_FRAMES};
pub use error::{GpuError, GpuResult};
