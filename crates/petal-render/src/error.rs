//! Error types for sprite rendering.

use std::fmt;
use std::path::PathBuf;

use petal_test_utils::{FramebufferStatus, GpuError, ShaderStage};

use crate::pixel::SurfaceFormat;

/// Errors that can occur while drawing sprites or moving texture data.
#[derive(Debug)]
pub enum RenderError {
    /// A caller-supplied value is out of range or refers to a released resource.
    InvalidArgument(String),

    /// The call is not valid in the current state (e.g. `draw` outside a session).
    InvalidOperation(String),

    /// The pixel format has no codec.
    UnsupportedFormat(SurfaceFormat),

    /// The requested sampler or state combination cannot be expressed.
    NotSupported(String),

    /// The offscreen framebuffer used for readback is incomplete.
    FramebufferError(FramebufferStatus),

    /// A shader stage failed to compile.
    CompileError {
        stage: ShaderStage,
        log: String,
    },

    /// Shader stages failed to link.
    LinkError(String),

    /// An image file could not be read or decoded.
    ContentLoad {
        path: PathBuf,
        message: String,
    },

    /// Any other failure reported by the render context.
    Gpu(GpuError),
}

impl fmt::Display for RenderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RenderError::InvalidArgument(msg) => write!(f, "Invalid argument: {}", msg),
            RenderError::InvalidOperation(msg) => write!(f, "Invalid operation: {}", msg),
            RenderError::UnsupportedFormat(format) => {
                write!(f, "Surface format {:?} is not supported", format)
            }
            RenderError::NotSupported(msg) => write!(f, "Not supported: {}", msg),
            RenderError::FramebufferError(status) => {
                write!(f, "Framebuffer is not complete: {:?}", status)
            }
            RenderError::CompileError { stage, log } => {
                write!(f, "Failed to compile {} shader: {}", stage, log)
            }
            RenderError::LinkError(log) => write!(f, "Failed to link shader program: {}", log),
            RenderError::ContentLoad { path, message } => {
                write!(f, "Failed to load '{}': {}", path.display(), message)
            }
            RenderError::Gpu(err) => write!(f, "GPU error: {}", err),
        }
    }
}

impl std::error::Error for RenderError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            RenderError::Gpu(err) => Some(err),
            _ => None,
        }
    }
}

impl From<GpuError> for RenderError {
    fn from(err: GpuError) -> Self {
        match err {
            GpuError::CompileFailed { stage, log } => RenderError::CompileError { stage, log },
            GpuError::LinkFailed(log) => RenderError::LinkError(log),
            other => RenderError::Gpu(other),
        }
    }
}

/// Result type alias for rendering operations.
pub type RenderResult<T> = Result<T, RenderError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gpu_errors_map_to_dedicated_variants() {
        let err: RenderError = GpuError::CompileFailed {
            stage: ShaderStage::Vertex,
            log: "bad".to_string(),
        }
        .into();
        assert!(matches!(err, RenderError::CompileError { stage: ShaderStage::Vertex, .. }));

        let err: RenderError = GpuError::LinkFailed("mismatch".to_string()).into();
        assert!(matches!(err, RenderError::LinkError(_)));

        let err: RenderError = GpuError::ContextLost.into();
        assert!(matches!(err, RenderError::Gpu(GpuError::ContextLost)));
    }

    #[test]
    fn test_display() {
        let err = RenderError::UnsupportedFormat(SurfaceFormat::Bgra4444);
        assert_eq!(err.to_string(), "Surface format Bgra4444 is not supported");
    }
}
