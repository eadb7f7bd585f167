//! Blend presets for sprite sessions.

/// How sprite colors combine with the render target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum BlendState {
    /// No blending - source completely replaces destination.
    Opaque,

    /// Blending for colors that are not premultiplied by alpha.
    ///
    /// Formula: `src * src.a + dst * (1 - src.a)`
    NonPremultiplied,

    /// Blending for premultiplied colors.
    ///
    /// Formula: `src + dst * (1 - src.a)`
    #[default]
    AlphaBlend,

    /// Additive blending weighted by source alpha.
    ///
    /// Formula: `src * src.a + dst`
    ///
    /// Use for: Glow effects, particles, light sources.
    Additive,
}

const fn uniform(src_factor: wgpu::BlendFactor, dst_factor: wgpu::BlendFactor) -> wgpu::BlendState {
    let component = wgpu::BlendComponent {
        src_factor,
        dst_factor,
        operation: wgpu::BlendOperation::Add,
    };
    wgpu::BlendState {
        color: component,
        alpha: component,
    }
}

impl BlendState {
    /// Convert to wgpu BlendState. `None` disables blending.
    pub fn to_blend_state(self) -> Option<wgpu::BlendState> {
        use wgpu::BlendFactor::*;
        match self {
            BlendState::Opaque => None,
            BlendState::NonPremultiplied => Some(uniform(SrcAlpha, OneMinusSrcAlpha)),
            BlendState::AlphaBlend => Some(uniform(One, OneMinusSrcAlpha)),
            BlendState::Additive => Some(uniform(SrcAlpha, One)),
        }
    }
}

impl From<BlendState> for Option<wgpu::BlendState> {
    fn from(state: BlendState) -> Self {
        state.to_blend_state()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_opaque_disables_blending() {
        assert_eq!(BlendState::Opaque.to_blend_state(), None);
        assert_eq!(Option::<wgpu::BlendState>::from(BlendState::Opaque), None);
    }

    #[test]
    fn test_alpha_blend_is_premultiplied() {
        assert_eq!(
            BlendState::AlphaBlend.to_blend_state(),
            Some(wgpu::BlendState::PREMULTIPLIED_ALPHA_BLENDING)
        );
        assert_eq!(BlendState::default(), BlendState::AlphaBlend);
    }

    #[test]
    fn test_additive_factors() {
        let state = BlendState::Additive.to_blend_state().unwrap();
        assert_eq!(state.color.src_factor, wgpu::BlendFactor::SrcAlpha);
        assert_eq!(state.color.dst_factor, wgpu::BlendFactor::One);
        assert_eq!(state.alpha, state.color);
    }
}
