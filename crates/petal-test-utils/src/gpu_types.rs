//! Handle and descriptor types shared by every `RenderContext` implementation.
//!
//! Handles are opaque non-zero integers so `Option<Handle>` stays the size of
//! the handle and a zeroed handle can never alias a live resource.

use std::fmt;
use std::num::NonZeroU32;

use bytemuck::{Pod, Zeroable};

macro_rules! gpu_handle {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(NonZeroU32);

        impl $name {
            /// Wrap a raw id. Zero is never a valid handle.
            pub fn from_raw(raw: u32) -> Option<Self> {
                NonZeroU32::new(raw).map(Self)
            }

            pub fn raw(self) -> u32 {
                self.0.get()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}#{}", stringify!($name), self.0)
            }
        }
    };
}

gpu_handle!(
    /// A GPU texture, sampled by draws or written as a render target.
    TextureId
);
gpu_handle!(
    /// An offscreen framebuffer object.
    FramebufferId
);
gpu_handle!(
    /// A depth renderbuffer attached to an offscreen framebuffer.
    RenderbufferId
);
gpu_handle!(ShaderId);
gpu_handle!(ProgramId);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShaderStage {
    Vertex,
    Fragment,
}

impl fmt::Display for ShaderStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShaderStage::Vertex => write!(f, "vertex"),
            ShaderStage::Fragment => write!(f, "fragment"),
        }
    }
}

/// Completeness of an offscreen framebuffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FramebufferStatus {
    Complete,
    IncompleteAttachment,
    MissingAttachment,
    IncompleteDimensions,
    Unsupported,
}

/// Pixel rectangle the next draws are mapped to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Viewport {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

impl Viewport {
    pub const fn new(x: i32, y: i32, width: u32, height: u32) -> Self {
        Self { x, y, width, height }
    }
}

/// Sampling parameters applied to a bound texture.
///
/// `mipmap_filter` is `None` for textures without a mip chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SamplerParams {
    pub min_filter: wgpu::FilterMode,
    pub mag_filter: wgpu::FilterMode,
    pub mipmap_filter: Option<wgpu::FilterMode>,
    pub address_u: wgpu::AddressMode,
    pub address_v: wgpu::AddressMode,
}

impl Default for SamplerParams {
    fn default() -> Self {
        Self {
            min_filter: wgpu::FilterMode::Linear,
            mag_filter: wgpu::FilterMode::Linear,
            mipmap_filter: None,
            address_u: wgpu::AddressMode::ClampToEdge,
            address_v: wgpu::AddressMode::ClampToEdge,
        }
    }
}

/// Texture allocation request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextureDesc {
    pub width: u32,
    pub height: u32,
    pub format: wgpu::TextureFormat,
    pub mip_level_count: u32,
    /// The texture will be drawn into as well as sampled.
    pub render_target: bool,
}

impl TextureDesc {
    /// Byte length of mip level 0 for formats with a fixed texel size.
    pub fn level0_len(&self) -> Option<usize> {
        let texel = self.format.block_copy_size(None)? as usize;
        Some(self.width as usize * self.height as usize * texel)
    }
}

/// One corner of a sprite quad, as uploaded to the vertex buffer.
///
/// ```text
/// Offset | Field     | Size
/// -------|-----------|------
/// 0      | position  | 8 bytes (2 x f32)
/// 8      | tex_coord | 8 bytes (2 x f32)
/// 16     | color     | 4 bytes (4 x u8, normalized in the shader)
/// Total: 20 bytes
/// ```
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Default, Pod, Zeroable)]
pub struct SpriteVertex {
    pub position: [f32; 2],
    pub tex_coord: [f32; 2],
    pub color: [u8; 4],
}

impl SpriteVertex {
    pub const ATTRIBUTES: [wgpu::VertexAttribute; 3] =
        wgpu::vertex_attr_array![0 => Float32x2, 1 => Float32x2, 2 => Unorm8x4];

    pub fn layout() -> wgpu::VertexBufferLayout<'static> {
        wgpu::VertexBufferLayout {
            array_stride: std::mem::size_of::<SpriteVertex>() as wgpu::BufferAddress,
            step_mode: wgpu::VertexStepMode::Vertex,
            attributes: &Self::ATTRIBUTES,
        }
    }
}

/// Errors reported by a `RenderContext`.
#[derive(Debug, Clone, PartialEq)]
pub enum GpuError {
    /// Shader source was rejected by the compiler.
    CompileFailed { stage: ShaderStage, log: String },
    /// Compiled stages could not be linked into a program.
    LinkFailed(String),
    /// The handle does not name a live resource.
    InvalidHandle(String),
    /// Upload size does not match the texture.
    SizeMismatch { expected: usize, actual: usize },
    /// The device was lost; every handle is invalid.
    ContextLost,
    /// Any other backend failure.
    Backend(String),
}

impl fmt::Display for GpuError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GpuError::CompileFailed { stage, log } => write!(f, "{} shader failed to compile: {}", stage, log),
            GpuError::LinkFailed(log) => write!(f, "Program failed to link: {}", log),
            GpuError::InvalidHandle(handle) => write!(f, "Invalid GPU handle: {}", handle),
            GpuError::SizeMismatch { expected, actual } => {
                write!(f, "Expected {} bytes of texel data, got {}", expected, actual)
            }
            GpuError::ContextLost => write!(f, "GPU context lost"),
            GpuError::Backend(msg) => write!(f, "Backend error: {}", msg),
        }
    }
}

impl std::error::Error for GpuError {}
