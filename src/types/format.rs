//! Engine-neutral pixel and vertex formats.

use bitflags::bitflags;

macro_rules! declare_formats {
    ($($name:ident => $bytes:expr),* $(,)?) => {
        /// Pixel/vertex formats understood by the renderer.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
        pub enum Format {
            #[default]
            Undefined,
            $($name,)*
        }

        impl Format {
            /// Every declared format, `Undefined` included.
            pub const ALL: &'static [Format] = &[Format::Undefined, $(Format::$name,)*];

            /// Size of one texel (or one vertex component group) in bytes.
            pub fn bytes_per_pixel(self) -> u32 {
                match self {
                    Format::Undefined => 0,
                    $(Format::$name => $bytes,)*
                }
            }
        }
    };
}

declare_formats! {
    R8Unorm => 1,
    R8Snorm => 1,
    R8Uint => 1,
    R8Sint => 1,
    R8G8Unorm => 2,
    R8G8Snorm => 2,
    R8G8Uint => 2,
    R8G8Sint => 2,
    R8G8B8Unorm => 3,
    R8G8B8Snorm => 3,
    R8G8B8Uint => 3,
    R8G8B8Sint => 3,
    R8G8B8Srgb => 3,
    R8G8B8A8Unorm => 4,
    R8G8B8A8Snorm => 4,
    R8G8B8A8Uint => 4,
    R8G8B8A8Sint => 4,
    R8G8B8A8Srgb => 4,
    B8G8R8A8Unorm => 4,
    B8G8R8A8Snorm => 4,
    B8G8R8A8Uint => 4,
    B8G8R8A8Sint => 4,
    R16Unorm => 2,
    R16Snorm => 2,
    R16Uint => 2,
    R16Sint => 2,
    R16Sfloat => 2,
    R16G16Unorm => 4,
    R16G16Snorm => 4,
    R16G16Uint => 4,
    R16G16Sint => 4,
    R16G16Sfloat => 4,
    R16G16B16Unorm => 6,
    R16G16B16Snorm => 6,
    R16G16B16Uint => 6,
    R16G16B16Sint => 6,
    R16G16B16Sfloat => 6,
    R16G16B16A16Unorm => 8,
    R16G16B16A16Snorm => 8,
    R16G16B16A16Uint => 8,
    R16G16B16A16Sint => 8,
    R16G16B16A16Sfloat => 8,
    R32Uint => 4,
    R32Sint => 4,
    R32Sfloat => 4,
    R32G32Uint => 8,
    R32G32Sint => 8,
    R32G32Sfloat => 8,
    R32G32B32Uint => 12,
    R32G32B32Sint => 12,
    R32G32B32Sfloat => 12,
    R32G32B32A32Uint => 16,
    R32G32B32A32Sint => 16,
    R32G32B32A32Sfloat => 16,
    D16Unorm => 2,
    X8D24UnormPack32 => 4,
    D32Sfloat => 4,
    D24UnormS8Uint => 4,
    D32SfloatS8Uint => 8,
    S8Uint => 1,
}

impl Format {
    pub fn is_depth(self) -> bool {
        matches!(
            self,
            Format::D16Unorm
                | Format::X8D24UnormPack32
                | Format::D32Sfloat
                | Format::D24UnormS8Uint
                | Format::D32SfloatS8Uint
        )
    }

    pub fn has_stencil(self) -> bool {
        matches!(
            self,
            Format::D24UnormS8Uint | Format::D32SfloatS8Uint | Format::S8Uint
        )
    }
}

bitflags! {
    /// Capabilities a format offers with optimal tiling.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct FormatFeatures: u32 {
        const SAMPLED_IMAGE = 1 << 0;
        const SAMPLED_IMAGE_FILTER_LINEAR = 1 << 1;
        const COLOR_ATTACHMENT = 1 << 2;
        const COLOR_ATTACHMENT_BLEND = 1 << 3;
        const DEPTH_STENCIL_ATTACHMENT = 1 << 4;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bytes_per_pixel() {
        assert_eq!(Format::Undefined.bytes_per_pixel(), 0);
        assert_eq!(Format::R8G8B8A8Unorm.bytes_per_pixel(), 4);
        assert_eq!(Format::R16G16B16Sfloat.bytes_per_pixel(), 6);
        assert_eq!(Format::R32G32B32A32Sfloat.bytes_per_pixel(), 16);
        assert_eq!(Format::D32SfloatS8Uint.bytes_per_pixel(), 8);
    }

    #[test]
    fn test_depth_stencil_classification() {
        assert!(Format::D16Unorm.is_depth());
        assert!(!Format::D16Unorm.has_stencil());
        assert!(Format::D24UnormS8Uint.is_depth());
        assert!(Format::D24UnormS8Uint.has_stencil());
        assert!(!Format::R8G8B8A8Unorm.is_depth());
        assert!(!Format::S8Uint.is_depth());
    }

    #[test]
    fn test_all_lists_every_format_once() {
        let mut seen = std::collections::HashSet::new();
        for f in Format::ALL {
            assert!(seen.insert(*f), "{:?} listed twice", f);
        }
        assert_eq!(Format::ALL.len(), 61);
    }
}
