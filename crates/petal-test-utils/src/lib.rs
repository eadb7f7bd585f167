//! GPU command abstraction and test utilities for petal.
//!
//! # Overview
//!
//! - [`RenderContext`] - Trait abstracting the GPU operations a sprite renderer needs
//! - `MockRenderContext` - Recording implementation for testing (requires `mock` feature)
//! - Handle and descriptor types (`TextureId`, `TextureDesc`, `SpriteVertex`, ...)
//!
//! # Example
//!
//! ```rust
//! # #[cfg(feature = "mock")]
//! # {
//! use petal_test_utils::{MockRenderContext, RenderContext, ShaderStage};
//!
//! let mock = MockRenderContext::new();
//! let vs = mock.compile_shader(ShaderStage::Vertex, "vertex source").unwrap();
//! let fs = mock.compile_shader(ShaderStage::Fragment, "fragment source").unwrap();
//! let program = mock.link_program(vs, fs).unwrap();
//!
//! mock.use_program(program).unwrap();
//! assert_eq!(mock.count_draw_calls(), 0);
//! # }
//! ```
//!
//! # Design
//!
//! Handles are `Copy` integers, every method takes `&self`, and the trait is
//! object-safe so renderers hold an `Arc<dyn RenderContext>` whether they run
//! on a GPU or against the mock.

pub mod gpu_types;
#[cfg(feature = "mock")]
pub mod mock_render;
pub mod render_context;

// Re-export main types at crate root
pub use gpu_types::*;
#[cfg(feature = "mock")]
pub use mock_render::*;
pub use render_context::*;
