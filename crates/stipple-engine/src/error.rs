use crate::backend::PixelRect;
use crate::texture::TextureId;

/// Errors surfaced by the renderer and its backends.
///
/// Capacity exhaustion and context loss are not errors for draw callers:
/// the former flushes transparently, the latter is a state transition.
#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    #[error("shader `{name}` failed to compile: {message}")]
    ShaderCompile { name: String, message: String },

    #[error("GPU context lost")]
    ContextLost,

    #[error("shader `{shader}` has no uniform `{name}`")]
    UnknownUniform { shader: String, name: String },

    #[error("texture {0:?} is not known to the backend")]
    UnknownTexture(TextureId),

    #[error("pixel rect {0:?} lies outside the {1}x{2} target")]
    PixelBounds(PixelRect, u32, u32),

    #[error("pixel buffer holds {actual} bytes, expected {expected}")]
    PixelLength { expected: usize, actual: usize },

    #[error("backend error: {0}")]
    Backend(String),
}

pub type RenderResult<T> = Result<T, RenderError>;
