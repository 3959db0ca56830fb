//! Shared immutable samplers carrying a YCbCr conversion.
//!
//! Hardware video frames are sampled through an immutable sampler baked into
//! the pipeline's descriptor-set layout. Two frames can share a sampler only
//! when every conversion and sampler field matches exactly.

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use ash::vk;

use crate::error::{vk_err, GpuError, GpuResult};

use super::device::VkContext;

/// Everything that identifies a conversion + sampler pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct YcbcrParams {
    pub format: vk::Format,
    /// Non-zero for opaque Android hardware buffer formats.
    pub android_external_format: u64,
    pub model: vk::SamplerYcbcrModelConversion,
    pub range: vk::SamplerYcbcrRange,
    /// r, g, b, a swizzle.
    pub components: [vk::ComponentSwizzle; 4],
    pub x_chroma_offset: vk::ChromaLocation,
    pub y_chroma_offset: vk::ChromaLocation,
    pub filter: vk::Filter,
}

impl Default for YcbcrParams {
    fn default() -> Self {
        Self {
            format: vk::Format::G8_B8R8_2PLANE_420_UNORM,
            android_external_format: 0,
            model: vk::SamplerYcbcrModelConversion::YCBCR_709,
            range: vk::SamplerYcbcrRange::ITU_NARROW,
            components: [vk::ComponentSwizzle::IDENTITY; 4],
            x_chroma_offset: vk::ChromaLocation::MIDPOINT,
            y_chroma_offset: vk::ChromaLocation::MIDPOINT,
            filter: vk::Filter::LINEAR,
        }
    }
}

impl YcbcrParams {
    fn component_mapping(&self) -> vk::ComponentMapping {
        let [r, g, b, a] = self.components;
        vk::ComponentMapping { r, g, b, a }
    }
}

/// One conversion object and the immutable sampler using it.
///
/// Shared through `Arc`; the native objects go away with the last reference.
pub struct YcbcrSampler {
    ctx: Arc<VkContext>,
    params: YcbcrParams,
    conversion: vk::SamplerYcbcrConversion,
    sampler: vk::Sampler,
}

impl std::fmt::Debug for YcbcrSampler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("YcbcrSampler")
            .field("params", &self.params)
            .field("sampler", &self.sampler)
            .finish()
    }
}

impl YcbcrSampler {
    pub fn new(ctx: &Arc<VkContext>, params: &YcbcrParams) -> GpuResult<Self> {
        if !ctx.ycbcr_supported() {
            return Err(GpuError::Unsupported(
                "sampler YCbCr conversion is not supported by this device".to_string(),
            ));
        }
        let device = ctx.device();

        let mut external_format =
            vk::ExternalFormatANDROID::default().external_format(params.android_external_format);
        let mut conversion_info = vk::SamplerYcbcrConversionCreateInfo::default()
            .format(params.format)
            .ycbcr_model(params.model)
            .ycbcr_range(params.range)
            .components(params.component_mapping())
            .x_chroma_offset(params.x_chroma_offset)
            .y_chroma_offset(params.y_chroma_offset)
            .chroma_filter(params.filter)
            .force_explicit_reconstruction(false);
        if params.android_external_format != 0 {
            conversion_info = conversion_info.push_next(&mut external_format);
        }

        let conversion = unsafe { device.create_sampler_ycbcr_conversion(&conversion_info, None) }
            .map_err(vk_err("create YCbCr conversion"))?;

        let mut conversion_ref = vk::SamplerYcbcrConversionInfo::default().conversion(conversion);
        let sampler_info = vk::SamplerCreateInfo::default()
            .mag_filter(params.filter)
            .min_filter(params.filter)
            .mipmap_mode(vk::SamplerMipmapMode::NEAREST)
            .address_mode_u(vk::SamplerAddressMode::CLAMP_TO_EDGE)
            .address_mode_v(vk::SamplerAddressMode::CLAMP_TO_EDGE)
            .address_mode_w(vk::SamplerAddressMode::CLAMP_TO_EDGE)
            .mip_lod_bias(0.0)
            .anisotropy_enable(false)
            .max_anisotropy(1.0)
            .compare_enable(false)
            .compare_op(vk::CompareOp::NEVER)
            .min_lod(0.0)
            .max_lod(0.0)
            .border_color(vk::BorderColor::FLOAT_OPAQUE_BLACK)
            .unnormalized_coordinates(false)
            .push_next(&mut conversion_ref);

        let sampler = match unsafe { device.create_sampler(&sampler_info, None) } {
            Ok(sampler) => sampler,
            Err(e) => {
                unsafe { device.destroy_sampler_ycbcr_conversion(conversion, None) };
                return Err(vk_err("create YCbCr sampler")(e));
            }
        };

        Ok(Self {
            ctx: Arc::clone(ctx),
            params: *params,
            conversion,
            sampler,
        })
    }

    pub fn params(&self) -> &YcbcrParams {
        &self.params
    }

    pub fn conversion(&self) -> vk::SamplerYcbcrConversion {
        self.conversion
    }

    pub fn sampler(&self) -> vk::Sampler {
        self.sampler
    }

    /// Whether a frame with `params` can be sampled through this object.
    pub fn is_compatible(&self, params: &YcbcrParams) -> bool {
        self.params == *params
    }
}

impl Drop for YcbcrSampler {
    fn drop(&mut self) {
        unsafe {
            let device = self.ctx.device();
            device.destroy_sampler(self.sampler, None);
            device.destroy_sampler_ycbcr_conversion(self.conversion, None);
        }
    }
}

/// Lookup of live samplers by parameters.
///
/// Holds weak references only: a sampler lives as long as some texture or
/// pipeline binding still uses it.
#[derive(Default)]
pub struct YcbcrSamplerCache {
    entries: HashMap<YcbcrParams, Weak<YcbcrSampler>>,
}

impl YcbcrSamplerCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the live sampler for `params`, creating it when none exists.
    pub fn get_or_create(
        &mut self,
        ctx: &Arc<VkContext>,
        params: &YcbcrParams,
    ) -> GpuResult<Arc<YcbcrSampler>> {
        if let Some(sampler) = self.entries.get(params).and_then(Weak::upgrade) {
            log::debug!("Reusing YCbCr sampler for {:?}", params.format);
            return Ok(sampler);
        }

        self.entries.retain(|_, weak| weak.strong_count() > 0);

        log::debug!("Creating YCbCr sampler for {:?}", params.format);
        let sampler = Arc::new(YcbcrSampler::new(ctx, params)?);
        self.entries.insert(*params, Arc::downgrade(&sampler));
        Ok(sampler)
    }

    /// Number of samplers still alive.
    pub fn len(&self) -> usize {
        self.entries
            .values()
            .filter(|weak| weak.strong_count() > 0)
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// The sampler a hardware video mapper currently uses for its frames.
///
/// Keeps at most one sampler; a frame with incompatible parameters releases
/// the old one and installs a new one.
#[derive(Debug, Default)]
pub struct YcbcrSamplerSlot {
    sampler: Option<Arc<YcbcrSampler>>,
}

impl YcbcrSamplerSlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> Option<&Arc<YcbcrSampler>> {
        self.sampler.as_ref()
    }

    /// Sampler matching `params`, reusing the current one when compatible.
    pub fn update(
        &mut self,
        cache: &mut YcbcrSamplerCache,
        ctx: &Arc<VkContext>,
        params: &YcbcrParams,
    ) -> GpuResult<Arc<YcbcrSampler>> {
        if let Some(sampler) = &self.sampler {
            if sampler.is_compatible(params) {
                return Ok(Arc::clone(sampler));
            }
        }
        self.sampler = None;
        let sampler = cache.get_or_create(ctx, params)?;
        self.sampler = Some(Arc::clone(&sampler));
        Ok(sampler)
    }

    pub fn reset(&mut self) {
        self.sampler = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::hash_map::DefaultHasher;
    use std::hash::{Hash, Hasher};

    fn hash_of(params: &YcbcrParams) -> u64 {
        let mut hasher = DefaultHasher::new();
        params.hash(&mut hasher);
        hasher.finish()
    }

    #[test]
    fn test_identical_params_are_equal() {
        let a = YcbcrParams::default();
        let b = YcbcrParams::default();
        assert_eq!(a, b);
        assert_eq!(hash_of(&a), hash_of(&b));
    }

    #[test]
    fn test_filter_is_part_of_equality() {
        let a = YcbcrParams::default();
        let b = YcbcrParams {
            filter: vk::Filter::NEAREST,
            ..a
        };
        assert_ne!(a, b);
    }

    #[test]
    fn test_every_field_is_part_of_equality() {
        let base = YcbcrParams::default();
        let variants = [
            YcbcrParams {
                format: vk::Format::G8_B8_R8_3PLANE_420_UNORM,
                ..base
            },
            YcbcrParams {
                android_external_format: 42,
                ..base
            },
            YcbcrParams {
                model: vk::SamplerYcbcrModelConversion::YCBCR_601,
                ..base
            },
            YcbcrParams {
                range: vk::SamplerYcbcrRange::ITU_FULL,
                ..base
            },
            YcbcrParams {
                components: [
                    vk::ComponentSwizzle::B,
                    vk::ComponentSwizzle::G,
                    vk::ComponentSwizzle::R,
                    vk::ComponentSwizzle::A,
                ],
                ..base
            },
            YcbcrParams {
                x_chroma_offset: vk::ChromaLocation::COSITED_EVEN,
                ..base
            },
            YcbcrParams {
                y_chroma_offset: vk::ChromaLocation::COSITED_EVEN,
                ..base
            },
        ];
        for variant in variants {
            assert_ne!(variant, base);
        }
    }

    #[test]
    fn test_empty_cache() {
        let cache = YcbcrSamplerCache::new();
        assert!(cache.is_empty());
        let slot = YcbcrSamplerSlot::new();
        assert!(slot.current().is_none());
    }
}
