//! Sampler cache for GPU sampler reuse.
//!
//! Creating GPU samplers is expensive and sprite textures share a handful of
//! sampling configurations, so samplers are cached by [`SamplerParams`].

use std::sync::Arc;

use ahash::HashMap;
use parking_lot::RwLock;
use petal_core::profiling::profile_function;
use petal_test_utils::SamplerParams;

/// Descriptor for `params`.
///
/// Without a mip filter the LOD is clamped to the base level, so a texture
/// that has no mip chain always samples level 0.
pub fn sampler_descriptor(params: &SamplerParams) -> wgpu::SamplerDescriptor<'static> {
    let (mipmap_filter, lod_max_clamp) = match params.mipmap_filter {
        Some(filter) => (filter, 32.0),
        None => (wgpu::FilterMode::Nearest, 0.0),
    };
    wgpu::SamplerDescriptor {
        label: Some("petal_sprite_sampler"),
        address_mode_u: params.address_u,
        address_mode_v: params.address_v,
        address_mode_w: wgpu::AddressMode::ClampToEdge,
        mag_filter: params.mag_filter,
        min_filter: params.min_filter,
        mipmap_filter,
        lod_min_clamp: 0.0,
        lod_max_clamp,
        ..Default::default()
    }
}

/// A thread-safe cache of GPU samplers.
#[derive(Default)]
pub struct SamplerCache {
    cache: RwLock<HashMap<SamplerParams, Arc<wgpu::Sampler>>>,
}

impl SamplerCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the sampler for `params`, creating it on first use.
    pub fn get_or_create(&self, device: &wgpu::Device, params: &SamplerParams) -> Arc<wgpu::Sampler> {
        profile_function!();
        if let Some(sampler) = self.cache.read().get(params) {
            return Arc::clone(sampler);
        }

        let mut cache = self.cache.write();
        // Another thread may have inserted while we waited for the write lock.
        if let Some(sampler) = cache.get(params) {
            return Arc::clone(sampler);
        }

        let sampler = Arc::new(device.create_sampler(&sampler_descriptor(params)));
        cache.insert(*params, Arc::clone(&sampler));
        tracing::trace!(?params, "Created sampler");
        sampler
    }

    pub fn len(&self) -> usize {
        self.cache.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.read().is_empty()
    }

    /// Release every cached sampler.
    pub fn clear(&self) {
        self.cache.write().clear();
    }
}
