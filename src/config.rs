//! Context configuration.

use raw_window_handle::{RawDisplayHandle, RawWindowHandle};

use crate::error::{GpuError, GpuResult};
use crate::types::Viewport;

/// Upper bound on frames the CPU may record ahead of the GPU.
pub const MAX_IN_FLIGHT_FRAMES: usize = 3;

/// Native handles of the window an onscreen context presents to.
#[derive(Debug, Clone, Copy)]
pub struct WindowHandles {
    pub display: RawDisplayHandle,
    pub window: RawWindowHandle,
}

/// Configuration supplied once when the context is created.
#[derive(Debug, Clone)]
pub struct GpuConfig {
    /// Mandatory for offscreen rendering.
    pub width: u32,
    pub height: u32,
    pub offscreen: bool,
    /// MSAA sample count; 0 disables multisampling.
    pub samples: u32,
    /// 0 requests immediate presentation when the surface supports it.
    pub swap_interval: i32,
    pub clear_color: [f32; 4],
    /// Read back every offscreen frame into a CPU-side RGBA buffer.
    pub capture_buffer: bool,
    pub viewport: Option<Viewport>,
    /// Enables GPU timestamp queries for `query_draw_time`.
    pub hud: bool,
    pub nb_in_flight_frames: usize,
    /// Route validation-layer messages into the log.
    pub validation: bool,
    pub window: Option<WindowHandles>,
}

impl Default for GpuConfig {
    fn default() -> Self {
        Self {
            width: 0,
            height: 0,
            offscreen: true,
            samples: 0,
            swap_interval: -1,
            clear_color: [0.0, 0.0, 0.0, 1.0],
            capture_buffer: false,
            viewport: None,
            hud: false,
            nb_in_flight_frames: 1,
            validation: cfg!(debug_assertions),
            window: None,
        }
    }
}

impl GpuConfig {
    /// Offscreen context of the given size.
    pub fn offscreen(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            ..Default::default()
        }
    }

    /// Onscreen context presenting to `window`.
    pub fn onscreen(window: WindowHandles, width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            offscreen: false,
            window: Some(window),
            ..Default::default()
        }
    }

    pub fn with_samples(mut self, samples: u32) -> Self {
        self.samples = samples;
        self
    }

    pub fn with_capture_buffer(mut self, enabled: bool) -> Self {
        self.capture_buffer = enabled;
        self
    }

    pub fn with_clear_color(mut self, color: [f32; 4]) -> Self {
        self.clear_color = color;
        self
    }

    pub fn with_swap_interval(mut self, interval: i32) -> Self {
        self.swap_interval = interval;
        self
    }

    pub fn with_hud(mut self, hud: bool) -> Self {
        self.hud = hud;
        self
    }

    pub fn with_in_flight_frames(mut self, count: usize) -> Self {
        self.nb_in_flight_frames = count;
        self
    }

    pub fn with_validation(mut self, validation: bool) -> Self {
        self.validation = validation;
        self
    }

    pub fn with_viewport(mut self, viewport: Viewport) -> Self {
        self.viewport = Some(viewport);
        self
    }

    /// Reject configurations no backend can honor.
    pub fn validate(&self) -> GpuResult<()> {
        if self.nb_in_flight_frames == 0 || self.nb_in_flight_frames > MAX_IN_FLIGHT_FRAMES {
            return Err(GpuError::InvalidArg(format!(
                "in-flight frame count must be within 1..={}, got {}",
                MAX_IN_FLIGHT_FRAMES, self.nb_in_flight_frames
            )));
        }
        if self.samples > 1 && (!self.samples.is_power_of_two() || self.samples > 64) {
            return Err(GpuError::InvalidArg(format!(
                "sample count must be a power of two up to 64, got {}",
                self.samples
            )));
        }
        if self.offscreen {
            if self.width == 0 || self.height == 0 {
                return Err(GpuError::InvalidArg(format!(
                    "offscreen dimensions must be positive, got {}x{}",
                    self.width, self.height
                )));
            }
        } else {
            if self.capture_buffer {
                return Err(GpuError::InvalidArg(
                    "capture buffers are only supported with offscreen rendering".to_string(),
                ));
            }
            if self.window.is_none() {
                return Err(GpuError::InvalidArg(
                    "onscreen rendering requires a window".to_string(),
                ));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_offscreen_needs_dimensions() {
        assert!(GpuConfig::offscreen(64, 64).validate().is_ok());
        assert!(matches!(
            GpuConfig::offscreen(0, 64).validate(),
            Err(GpuError::InvalidArg(_))
        ));
    }

    #[test]
    fn test_in_flight_frames_are_bounded() {
        let config = GpuConfig::offscreen(8, 8).with_in_flight_frames(MAX_IN_FLIGHT_FRAMES);
        assert!(config.validate().is_ok());
        let config = GpuConfig::offscreen(8, 8).with_in_flight_frames(MAX_IN_FLIGHT_FRAMES + 1);
        assert!(config.validate().is_err());
        let config = GpuConfig::offscreen(8, 8).with_in_flight_frames(0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_sample_count_must_be_power_of_two() {
        for samples in [0, 1, 2, 4, 8, 64] {
            let config = GpuConfig::offscreen(8, 8).with_samples(samples);
            assert!(config.validate().is_ok(), "{} samples", samples);
        }
        for samples in [3, 6, 128] {
            let config = GpuConfig::offscreen(8, 8).with_samples(samples);
            assert!(
                matches!(config.validate(), Err(GpuError::InvalidArg(_))),
                "{} samples",
                samples
            );
        }
    }

    #[test]
    fn test_onscreen_rejects_capture_buffer() {
        let mut config = GpuConfig::offscreen(8, 8).with_capture_buffer(true);
        config.offscreen = false;
        assert!(matches!(config.validate(), Err(GpuError::InvalidArg(_))));
    }

    #[test]
    fn test_onscreen_requires_window() {
        let mut config = GpuConfig::offscreen(8, 8);
        config.offscreen = false;
        assert!(config.validate().is_err());
    }
}
