//! Trait abstracting the GPU command surface used by the sprite renderer.
//!
//! The `RenderContext` trait covers exactly what 2D batching needs: texture
//! storage and sampling, offscreen framebuffers for readback, shader programs,
//! fixed-function state and quad submission. A real `wgpu` implementation and
//! the recording `MockRenderContext` both sit behind it.

use crate::gpu_types::*;

/// GPU command surface.
///
/// # Borrow Checking Pattern
///
/// Methods take `&self` and hand out plain `Copy` handles instead of borrowed
/// resources, so:
/// - several owners can share one context (via `Arc<dyn RenderContext>`)
/// - implementations use interior mutability for their resource tables
/// - no lifetime parameters propagate into textures or batches
///
/// # Example
///
/// ```rust,no_run
/// use petal_test_utils::{RenderContext, TextureDesc};
///
/// fn upload_checker(ctx: &dyn RenderContext) -> Result<(), petal_test_utils::GpuError> {
///     let desc = TextureDesc {
///         width: 2,
///         height: 2,
///         format: wgpu::TextureFormat::Rgba8Unorm,
///         mip_level_count: 1,
///         render_target: false,
///     };
///     let texture = ctx.create_texture(&desc)?;
///     ctx.bind_texture(texture)?;
///     ctx.upload_texture(texture, 0, &[255u8; 16])
/// }
/// ```
pub trait RenderContext: Send + Sync {
    // Texture operations

    /// Allocate a texture. Its content is undefined until uploaded.
    fn create_texture(&self, desc: &TextureDesc) -> Result<TextureId, GpuError>;

    /// Whether `texture` still names a live resource.
    ///
    /// Handles become stale when the context loses its resources, for example
    /// when the device is recreated.
    fn is_texture_alive(&self, texture: TextureId) -> bool;

    /// Release a texture. Unknown handles are ignored.
    fn delete_texture(&self, texture: TextureId);

    fn bind_texture(&self, texture: TextureId) -> Result<(), GpuError>;

    fn set_texture_sampling(&self, texture: TextureId, params: &SamplerParams) -> Result<(), GpuError>;

    /// Replace a whole mip level with tightly packed texel rows.
    fn upload_texture(&self, texture: TextureId, level: u32, data: &[u8]) -> Result<(), GpuError>;

    /// Read mip level 0 back in native row order.
    fn read_texture(&self, texture: TextureId) -> Result<Vec<u8>, GpuError>;

    // Offscreen framebuffer operations

    fn create_framebuffer(&self) -> Result<FramebufferId, GpuError>;

    fn create_depth_renderbuffer(&self, width: u32, height: u32) -> Result<RenderbufferId, GpuError>;

    fn attach_color(&self, framebuffer: FramebufferId, texture: TextureId) -> Result<(), GpuError>;

    fn attach_depth(&self, framebuffer: FramebufferId, renderbuffer: RenderbufferId) -> Result<(), GpuError>;

    fn framebuffer_status(&self, framebuffer: FramebufferId) -> FramebufferStatus;

    /// Read the color attachment of a complete framebuffer in native row order.
    fn read_pixels(&self, framebuffer: FramebufferId) -> Result<Vec<u8>, GpuError>;

    fn delete_renderbuffer(&self, renderbuffer: RenderbufferId);

    fn delete_framebuffer(&self, framebuffer: FramebufferId);

    /// Make the window surface the framebuffer for subsequent operations.
    fn bind_default_framebuffer(&self);

    // Shader operations

    fn compile_shader(&self, stage: ShaderStage, source: &str) -> Result<ShaderId, GpuError>;

    fn link_program(&self, vertex: ShaderId, fragment: ShaderId) -> Result<ProgramId, GpuError>;

    fn use_program(&self, program: ProgramId) -> Result<(), GpuError>;

    /// Set a column-major 4x4 matrix uniform of `program`.
    fn set_uniform_matrix(&self, program: ProgramId, name: &str, value: &[f32; 16]) -> Result<(), GpuError>;

    // Fixed-function state

    /// `None` disables blending.
    fn set_blend(&self, blend: Option<wgpu::BlendState>);

    /// `None` disables face culling.
    fn set_cull(&self, front_face: wgpu::FrontFace, cull: Option<wgpu::Face>);

    /// `None` disables the depth test.
    fn set_depth(&self, compare: Option<wgpu::CompareFunction>, write: bool);

    fn viewport(&self) -> Viewport;

    fn set_viewport(&self, viewport: Viewport);

    // Draw target and submission

    /// Select the texture subsequent draws write to. `None` is the window.
    fn set_render_target(&self, target: Option<TextureId>) -> Result<(), GpuError>;

    fn render_target(&self) -> Option<TextureId>;

    /// Draw `vertices.len() / 4` quads sampling `texture`.
    ///
    /// Each quad is four corners in top-left, top-right, bottom-left,
    /// bottom-right order, triangulated as (0, 1, 2) and (1, 3, 2).
    fn draw_quads(&self, texture: TextureId, vertices: &[SpriteVertex]) -> Result<(), GpuError>;
}

/// Index pattern for one quad in the corner order `draw_quads` expects.
pub const QUAD_INDICES: [u16; 6] = [0, 1, 2, 1, 3, 2];

/// Index buffer contents for `quads` quads.
pub fn quad_indices(quads: usize) -> Vec<u32> {
    (0..quads as u32)
        .flat_map(|quad| QUAD_INDICES.iter().map(move |&i| quad * 4 + i as u32))
        .collect()
}
