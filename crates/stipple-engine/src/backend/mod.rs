//! GPU command seam.
//!
//! Batchers and the shader manager never talk to wgpu directly. They issue a
//! small, GL-shaped command set through [`RenderBackend`]:
//! - programs, buffers and textures are created and destroyed by handle
//! - state (program, blend, scissor, target, texture units) is set, then
//!   `draw_elements` captures it
//! - `submit` hands everything recorded since the previous submit to the GPU
//!
//! Implementations:
//! - [`WgpuBackend`]: production backend on wgpu
//! - [`RecordingBackend`]: CPU-side command recorder for tests and tooling

mod gpu;
mod recording;
mod types;

pub use gpu::{WgpuBackend, WgpuInit};
pub use recording::{BackendCall, RecordingBackend};
pub use types::{
    AttributeInfo, BufferId, BufferKind, ComponentType, PixelRect, ProgramId, ProgramLayout,
    VertexBinding,
};

use crate::error::{RenderError, RenderResult};
use crate::paint::{BlendMode, Color};
use crate::texture::{Texture, TextureId};

/// GPU context as seen by the renderer.
///
/// All handles become invalid when the context is lost. After
/// [`RenderBackend::reset_context`] the backend is empty and every owner
/// re-creates its resources (see `render::Restorable`).
pub trait RenderBackend {
    /// Whether the underlying context is known to be lost.
    fn is_context_lost(&self) -> bool;

    /// Re-acquires a usable context after loss. All previous handles are dropped.
    fn reset_context(&mut self) -> RenderResult<()>;

    /// Resizes the default render target.
    fn set_viewport(&mut self, width: u32, height: u32);

    fn compile_program(&mut self, layout: &ProgramLayout<'_>) -> RenderResult<ProgramId>;
    fn delete_program(&mut self, program: ProgramId);

    fn create_buffer(&mut self, kind: BufferKind, size: usize) -> RenderResult<BufferId>;
    fn delete_buffer(&mut self, buffer: BufferId);
    fn write_buffer(&mut self, buffer: BufferId, offset: usize, data: &[u8]);

    /// Makes `program` current and points its attributes at `binding`.
    fn use_program(&mut self, program: ProgramId, binding: &VertexBinding);

    /// Writes `values` into the program's uniform block at byte `offset`.
    fn set_uniform(&mut self, program: ProgramId, offset: usize, values: &[f32]);

    fn bind_texture(&mut self, unit: u32, texture: TextureId);
    fn set_blend_mode(&mut self, mode: BlendMode);

    /// `None` disables scissoring. An empty rect discards subsequent draws.
    fn set_scissor(&mut self, rect: Option<PixelRect>);

    /// `None` selects the default target (the canvas).
    fn set_render_target(&mut self, target: Option<TextureId>);

    /// Records one indexed triangle-list draw with the current state.
    fn draw_elements(&mut self, first_index: u32, index_count: u32);

    /// Submits everything recorded since the last submit.
    fn submit(&mut self);

    /// Clears the current render target.
    fn clear(&mut self, color: Color);

    fn has_texture(&self, texture: TextureId) -> bool;

    /// Creates (or re-creates) storage for `texture`, optionally uploading
    /// tightly packed RGBA8 `pixels` in storage row order.
    fn create_texture(&mut self, texture: &Texture, pixels: Option<&[u8]>) -> RenderResult<()>;
    fn delete_texture(&mut self, texture: TextureId);

    /// Uploads a whole tightly packed RGBA8 image and marks `texture` ready.
    ///
    /// Storage is created on first upload and overwritten afterwards.
    fn upload_texture(&mut self, texture: &Texture, pixels: &[u8]) -> RenderResult<()> {
        if pixels.len() != texture.byte_len() {
            return Err(RenderError::PixelLength { expected: texture.byte_len(), actual: pixels.len() });
        }
        if self.has_texture(texture.id()) {
            let rect = PixelRect::new(0, 0, texture.width(), texture.height());
            self.write_pixels(Some(texture.id()), rect, pixels)?;
        } else {
            self.create_texture(texture, Some(pixels))?;
        }
        texture.set_ready(true);
        Ok(())
    }

    /// Reads a block of storage rows into `out` (RGBA8, tightly packed).
    fn read_pixels(
        &mut self,
        source: Option<TextureId>,
        rect: PixelRect,
        out: &mut Vec<u8>,
    ) -> RenderResult<()>;

    /// Writes a block of storage rows (RGBA8, tightly packed).
    fn write_pixels(
        &mut self,
        target: Option<TextureId>,
        rect: PixelRect,
        data: &[u8],
    ) -> RenderResult<()>;
}
