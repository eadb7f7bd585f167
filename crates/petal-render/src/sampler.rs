//! Texture sampling vocabulary and its translation to GPU sampler parameters.

use petal_test_utils::SamplerParams;

use crate::error::{RenderError, RenderResult};

/// Minification, magnification and mip filtering, in one value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TextureFilter {
    Point,
    #[default]
    Linear,
    Anisotropic,
    LinearMipPoint,
    PointMipLinear,
    MinLinearMagPointMipLinear,
    MinLinearMagPointMipPoint,
    MinPointMagLinearMipLinear,
    MinPointMagLinearMipPoint,
}

impl TextureFilter {
    /// `(min, mag, mip)` filters. Anisotropic filtering has no equivalent.
    pub fn filter_modes(self) -> RenderResult<(wgpu::FilterMode, wgpu::FilterMode, wgpu::FilterMode)> {
        use wgpu::FilterMode::{Linear, Nearest};
        Ok(match self {
            TextureFilter::Point => (Nearest, Nearest, Nearest),
            TextureFilter::Linear => (Linear, Linear, Linear),
            TextureFilter::Anisotropic => {
                return Err(RenderError::NotSupported("anisotropic texture filtering".to_string()));
            }
            TextureFilter::LinearMipPoint => (Linear, Linear, Nearest),
            TextureFilter::PointMipLinear => (Nearest, Nearest, Linear),
            TextureFilter::MinLinearMagPointMipLinear => (Linear, Nearest, Linear),
            TextureFilter::MinLinearMagPointMipPoint => (Linear, Nearest, Nearest),
            TextureFilter::MinPointMagLinearMipLinear => (Nearest, Linear, Linear),
            TextureFilter::MinPointMagLinearMipPoint => (Nearest, Linear, Nearest),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TextureAddressMode {
    #[default]
    Clamp,
    Mirror,
    Wrap,
}

impl TextureAddressMode {
    pub fn to_wgpu(self) -> wgpu::AddressMode {
        match self {
            TextureAddressMode::Clamp => wgpu::AddressMode::ClampToEdge,
            TextureAddressMode::Mirror => wgpu::AddressMode::MirrorRepeat,
            TextureAddressMode::Wrap => wgpu::AddressMode::Repeat,
        }
    }
}

/// Sampling state applied to every texture a session draws.
///
/// Sprites are 2D, so `address_w` must stay `None`; setting it makes every
/// texture apply fail with `NotSupported`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SamplerState {
    pub filter: TextureFilter,
    pub address_u: TextureAddressMode,
    pub address_v: TextureAddressMode,
    pub address_w: Option<TextureAddressMode>,
}

impl SamplerState {
    const fn preset(filter: TextureFilter, address: TextureAddressMode) -> Self {
        Self {
            filter,
            address_u: address,
            address_v: address,
            address_w: None,
        }
    }

    pub const POINT_CLAMP: Self = Self::preset(TextureFilter::Point, TextureAddressMode::Clamp);
    pub const POINT_WRAP: Self = Self::preset(TextureFilter::Point, TextureAddressMode::Wrap);
    pub const LINEAR_CLAMP: Self = Self::preset(TextureFilter::Linear, TextureAddressMode::Clamp);
    pub const LINEAR_WRAP: Self = Self::preset(TextureFilter::Linear, TextureAddressMode::Wrap);
    pub const ANISOTROPIC_CLAMP: Self = Self::preset(TextureFilter::Anisotropic, TextureAddressMode::Clamp);
    pub const ANISOTROPIC_WRAP: Self = Self::preset(TextureFilter::Anisotropic, TextureAddressMode::Wrap);

    /// Check the state can be applied without touching the GPU.
    pub fn validate(&self) -> RenderResult<()> {
        self.filter.filter_modes()?;
        if let Some(mode) = self.address_w {
            return Err(RenderError::NotSupported(format!(
                "address mode {:?} for the W coordinate of a 2D texture",
                mode
            )));
        }
        Ok(())
    }

    /// Sampler parameters for a texture with or without a mip chain.
    pub fn to_params(&self, mipmapped: bool) -> RenderResult<SamplerParams> {
        self.validate()?;
        let (min_filter, mag_filter, mip) = self.filter.filter_modes()?;
        Ok(SamplerParams {
            min_filter,
            mag_filter,
            mipmap_filter: mipmapped.then_some(mip),
            address_u: self.address_u.to_wgpu(),
            address_v: self.address_v.to_wgpu(),
        })
    }
}

impl Default for SamplerState {
    fn default() -> Self {
        Self::LINEAR_CLAMP
    }
}
