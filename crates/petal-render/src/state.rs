//! Depth and rasterizer presets for sprite sessions.

/// Triangle winding treated as front-facing by every sprite draw.
pub const FRONT_FACE: wgpu::FrontFace = wgpu::FrontFace::Cw;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum DepthStencilState {
    /// No depth test, no depth writes.
    #[default]
    None,
    /// Test with less-or-equal and write depth.
    Default,
    /// Test with less-or-equal without writing.
    DepthRead,
}

impl DepthStencilState {
    /// Compare function (`None` disables the test) and depth write flag.
    pub fn depth_test(self) -> (Option<wgpu::CompareFunction>, bool) {
        match self {
            DepthStencilState::None => (None, false),
            DepthStencilState::Default => (Some(wgpu::CompareFunction::LessEqual), true),
            DepthStencilState::DepthRead => (Some(wgpu::CompareFunction::LessEqual), false),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum RasterizerState {
    CullNone,
    CullClockwise,
    #[default]
    CullCounterClockwise,
}

impl RasterizerState {
    /// Face to cull with [`FRONT_FACE`] winding.
    ///
    /// Offscreen targets are drawn y-up, which reverses the on-screen winding
    /// of every quad, so the culled face swaps as well.
    pub fn cull_face(self, offscreen: bool) -> Option<wgpu::Face> {
        let (screen, target) = match self {
            RasterizerState::CullNone => return None,
            RasterizerState::CullCounterClockwise => (wgpu::Face::Back, wgpu::Face::Front),
            RasterizerState::CullClockwise => (wgpu::Face::Front, wgpu::Face::Back),
        };
        Some(if offscreen { target } else { screen })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_depth_presets() {
        assert_eq!(DepthStencilState::None.depth_test(), (None, false));
        assert_eq!(
            DepthStencilState::DepthRead.depth_test(),
            (Some(wgpu::CompareFunction::LessEqual), false)
        );
    }

    #[test]
    fn test_cull_swaps_offscreen() {
        let state = RasterizerState::default();
        assert_eq!(state.cull_face(false), Some(wgpu::Face::Back));
        assert_eq!(state.cull_face(true), Some(wgpu::Face::Front));
        assert_eq!(RasterizerState::CullClockwise.cull_face(false), Some(wgpu::Face::Front));
        assert_eq!(RasterizerState::CullNone.cull_face(true), None);
    }
}
