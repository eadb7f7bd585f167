//! Petal Render
//!
//! Batched 2D sprite rendering on top of a [`RenderContext`].
//!
//! # Overview
//!
//! - [`Texture2D`] - GPU texture with CPU pixel transfer, mip chains and render targets
//! - [`SpriteBatch`] - Frame session collecting sprite draws between `begin` and `end`
//! - [`SpriteBatcher`] - Sorts queued sprites and turns them into one draw per texture run
//! - [`SpriteFont`] - Glyph table for drawing strings from a font texture
//! - [`WgpuRenderContext`] - `wgpu` device implementing [`RenderContext`]
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use petal_render::{Color, SpriteBatch, SurfaceFormat, Texture2D, WgpuRenderContext};
//! use petal_core::math::Vec2;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let ctx = WgpuRenderContext::new_owned_sync()?;
//! let mut texture = Texture2D::new(ctx.clone(), 16, 16, false, SurfaceFormat::Color)?;
//! texture.set_data(&[Color::WHITE; 256])?;
//!
//! let mut batch = SpriteBatch::new(ctx)?;
//! batch.begin_default()?;
//! batch.draw(&texture, Vec2::new(10.0, 20.0), Color::WHITE)?;
//! batch.end()?;
//! # Ok(())
//! # }
//! ```

pub mod backend;
pub mod batch;
pub mod blend;
pub mod color;
pub mod error;
pub mod font;
pub mod pixel;
pub mod readback;
pub mod sampler;
pub mod sampler_cache;
pub mod sprite_batch;
pub mod state;
pub mod texture;

pub use backend::{WgpuContextDescriptor, WgpuRenderContext};
pub use batch::{BatchItem, BatchItemPool, BatchStats, BatcherState, SortMode, SpriteBatcher};
pub use blend::BlendState;
pub use color::Color;
pub use error::{RenderError, RenderResult};
pub use font::{Glyph, GlyphPlacement, SpriteFont};
pub use pixel::{SurfaceFormat, decode_pixel, decode_pixels, encode_pixel, encode_pixels};
pub use sampler::{SamplerState, TextureAddressMode, TextureFilter};
pub use sprite_batch::{
    Destination, Effect, SPRITE_SHADER, SessionSettings, SpriteBatch, SpriteDraw, SpriteEffects, TextDraw,
    WVP_UNIFORM,
};
pub use state::{DepthStencilState, RasterizerState};
pub use texture::{Texture2D, TextureHandle};

// Re-export the GPU abstraction so callers need only this crate
pub use petal_test_utils::{GpuError, RenderContext, SpriteVertex, TextureId, Viewport};
#[cfg(feature = "mock")]
pub use petal_test_utils::{MockRenderContext, RenderCall};
