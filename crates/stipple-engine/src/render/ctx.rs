use crate::backend::RenderBackend;

use super::mask::MaskCompositor;
use super::programs::ProgramSet;
use super::shader::ShaderManager;

/// Everything a batcher needs to flush.
///
/// Borrowed from the renderer for the duration of one draw or flush.
pub struct FlushCtx<'a> {
    pub backend: &'a mut dyn RenderBackend,
    pub shaders: &'a mut ShaderManager,
    pub mask: &'a MaskCompositor,
    pub programs: &'a ProgramSet,
    /// `false` while the context is lost or restoring: flushes discard.
    pub active: bool,
}

impl<'a> FlushCtx<'a> {
    #[inline]
    pub fn new(
        backend: &'a mut dyn RenderBackend,
        shaders: &'a mut ShaderManager,
        mask: &'a MaskCompositor,
        programs: &'a ProgramSet,
        active: bool,
    ) -> Self {
        Self { backend, shaders, mask, programs, active }
    }
}
