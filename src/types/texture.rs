//! Texture creation parameters.

use bitflags::bitflags;

use super::format::Format;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TextureType {
    #[default]
    Texture2D,
    Texture3D,
    Cube,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Filter {
    #[default]
    Nearest,
    Linear,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum MipmapFilter {
    #[default]
    None,
    Nearest,
    Linear,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum WrapMode {
    #[default]
    ClampToEdge,
    MirroredRepeat,
    Repeat,
}

bitflags! {
    /// Usage flags for textures.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct TextureUsage: u32 {
        const TRANSFER_SRC = 1 << 0;
        const TRANSFER_DST = 1 << 1;
        const SAMPLED = 1 << 2;
        const STORAGE = 1 << 3;
        const COLOR_ATTACHMENT = 1 << 4;
        const DEPTH_STENCIL_ATTACHMENT = 1 << 5;
        /// Attachment content never leaves the render pass.
        const TRANSIENT_ATTACHMENT = 1 << 6;
    }
}

/// Parameters for creating a texture.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TextureParams {
    pub ty: TextureType,
    pub format: Format,
    pub width: u32,
    pub height: u32,
    /// Only meaningful for 3D textures.
    pub depth: u32,
    /// 0 and 1 both mean single-sampled.
    pub samples: u32,
    pub min_filter: Filter,
    pub mag_filter: Filter,
    pub mipmap_filter: MipmapFilter,
    pub wrap_s: WrapMode,
    pub wrap_t: WrapMode,
    pub wrap_r: WrapMode,
    pub usage: TextureUsage,
}

impl Default for TextureParams {
    fn default() -> Self {
        Self {
            ty: TextureType::Texture2D,
            format: Format::Undefined,
            width: 0,
            height: 0,
            depth: 1,
            samples: 0,
            min_filter: Filter::Nearest,
            mag_filter: Filter::Nearest,
            mipmap_filter: MipmapFilter::None,
            wrap_s: WrapMode::ClampToEdge,
            wrap_t: WrapMode::ClampToEdge,
            wrap_r: WrapMode::ClampToEdge,
            usage: TextureUsage::empty(),
        }
    }
}

impl TextureParams {
    /// A single-sampled 2D texture.
    pub fn new_2d(width: u32, height: u32, format: Format, usage: TextureUsage) -> Self {
        Self {
            width,
            height,
            format,
            usage,
            ..Default::default()
        }
    }

    pub fn with_filters(mut self, min: Filter, mag: Filter, mipmap: MipmapFilter) -> Self {
        self.min_filter = min;
        self.mag_filter = mag;
        self.mipmap_filter = mipmap;
        self
    }

    pub fn with_samples(mut self, samples: u32) -> Self {
        self.samples = samples;
        self
    }

    /// Image depth: 1 unless the texture is 3D.
    pub fn effective_depth(&self) -> u32 {
        match self.ty {
            TextureType::Texture3D => self.depth.max(1),
            _ => 1,
        }
    }

    /// Cube maps carry their six faces as array layers.
    pub fn array_layers(&self) -> u32 {
        match self.ty {
            TextureType::Cube => 6,
            _ => 1,
        }
    }

    /// Number of mip levels: floor(log2(max(w, h))) + 1 when mipmapping, else 1.
    pub fn mip_levels(&self) -> u32 {
        if self.mipmap_filter == MipmapFilter::None {
            return 1;
        }
        let mut levels = 1;
        while ((self.width | self.height) >> levels) != 0 {
            levels += 1;
        }
        levels
    }

    pub fn sample_count(&self) -> u32 {
        self.samples.max(1)
    }
}

/// Extent of mip level `level` for a `width`×`height` base.
pub fn mip_level_extent(width: u32, height: u32, level: u32) -> (u32, u32) {
    ((width >> level).max(1), (height >> level).max(1))
}
