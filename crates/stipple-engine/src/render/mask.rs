//! Alpha masking of subsequent draws by a texture.
//!
//! The mask is a texture frame placed in logical space by the transform
//! active when it was set. Its unit quad spans `[0, w] x [0, h]` where
//! `w, h` are the frame size in pixels. Masked programs compute the mask uv
//! per vertex from the logical position with one affine map, and drop
//! coverage outside the frame's uv bounds.

use std::cell::Cell;

use log::{debug, warn};

use crate::backend::RenderBackend;
use crate::coords::{Matrix, Rect};
use crate::error::RenderResult;
use crate::texture::Texture;

use super::restore::Restorable;
use super::shader::{ShaderId, ShaderManager};

/// Clip bounds that no uv satisfies.
const EMPTY_CLIP: [f32; 4] = [1.0, 1.0, 0.0, 0.0];

#[derive(Debug, Clone)]
struct MaskState {
    texture: Texture,
    transform: Matrix,
    frame: Rect,
    alpha: f32,
}

/// Current mask and its derived shader inputs.
#[derive(Debug, Default)]
pub struct MaskCompositor {
    state: Option<MaskState>,
    /// Column-major `mat3x4`: logical position -> mask uv.
    uv_transform: [f32; 12],
    clip: [f32; 4],
    warned_unready: Cell<bool>,
}

impl MaskCompositor {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn is_active(&self) -> bool {
        self.state.is_some()
    }

    /// Whether masked draws may sample the mask texture now.
    ///
    /// `false` while a mask is set whose texture is not ready; logged once
    /// per mask.
    pub fn ready_for_draw(&self) -> bool {
        let Some(state) = &self.state else {
            return true;
        };
        if state.texture.is_ready() {
            return true;
        }
        if !self.warned_unready.replace(true) {
            warn!("MaskCompositor: mask texture {:?} not ready; masked draws skipped", state.texture.id());
        }
        false
    }

    pub fn texture(&self) -> Option<&Texture> {
        self.state.as_ref().map(|s| &s.texture)
    }

    #[inline]
    pub fn uv_transform(&self) -> &[f32; 12] {
        &self.uv_transform
    }

    #[inline]
    pub fn clip(&self) -> [f32; 4] {
        self.clip
    }

    /// Whether [`Self::set`] with these inputs would change anything.
    pub fn would_change(&self, texture: Option<&Texture>, transform: &Matrix, frame: Rect, alpha: f32) -> bool {
        match (&self.state, texture) {
            (None, None) => false,
            (Some(s), Some(t)) => {
                s.texture != *t || s.transform != *transform || s.frame != frame || s.alpha != alpha
            }
            _ => true,
        }
    }

    /// Sets (`Some`) or clears (`None`) the mask. Returns whether state changed.
    ///
    /// `frame` is in normalized texture coordinates. Derived uniforms are
    /// recomputed only when an input changed.
    pub fn set(&mut self, texture: Option<&Texture>, transform: &Matrix, frame: Rect, alpha: f32) -> bool {
        if !self.would_change(texture, transform, frame, alpha) {
            return false;
        }
        self.warned_unready.set(false);
        match texture {
            None => self.state = None,
            Some(texture) => {
                match mask_uv_transform(texture, transform, frame) {
                    Some((uv, clip)) => {
                        self.uv_transform = uv;
                        self.clip = clip;
                    }
                    None => {
                        debug!("MaskCompositor: degenerate mask transform; everything is masked out");
                        self.uv_transform = [0.0; 12];
                        self.clip = EMPTY_CLIP;
                    }
                }
                self.state = Some(MaskState { texture: texture.clone(), transform: *transform, frame, alpha });
            }
        }
        true
    }

    /// Binds the mask texture to `unit` and pushes the mask uniforms of `shader`.
    ///
    /// Uniforms that did not change since the last push are skipped by the
    /// shader manager. Nothing is bound for a mask that is not ready.
    pub fn apply(
        &self,
        shaders: &mut ShaderManager,
        backend: &mut dyn RenderBackend,
        shader: ShaderId,
        unit: u32,
    ) -> RenderResult<()> {
        let Some(state) = &self.state else {
            return Ok(());
        };
        if !state.texture.is_ready() {
            return Ok(());
        }
        backend.bind_texture(unit, state.texture.id());
        shaders.set_uniform_mat3x4(backend, shader, "mask_uv", &self.uv_transform)?;
        shaders.set_uniform_vec4(backend, shader, "mask_clip", self.clip)?;
        shaders.set_uniform_f32(backend, shader, "mask_alpha", state.alpha.clamp(0.0, 1.0))?;
        Ok(())
    }
}

impl Restorable for MaskCompositor {
    fn invalidate(&mut self) {}

    /// The mask owns no backend resources; its uniforms live in the shader
    /// shadow and its texture belongs to the texture owner.
    fn restore(&mut self, _backend: &mut dyn RenderBackend) -> RenderResult<()> {
        if let Some(state) = &self.state
            && !state.texture.is_ready()
        {
            debug!("MaskCompositor: mask texture {:?} not yet restored", state.texture.id());
        }
        Ok(())
    }
}

/// Affine map from logical position to mask uv, plus the uv clip bounds.
///
/// The mask quad spans `[0, w] x [0, h]` in mask-local pixels, which map
/// linearly onto the frame's uv rect; composing that with the inverse of the
/// mask transform gives logical position -> uv. Render-target masks are
/// stored bottom-up, so their v is flipped. Returns `None` when the
/// transformed quad has no area.
pub fn mask_uv_transform(texture: &Texture, transform: &Matrix, frame: Rect) -> Option<([f32; 12], [f32; 4])> {
    let w = frame.size.x * texture.width() as f32;
    let h = frame.size.y * texture.height() as f32;
    let area = transform.determinant() * w * h;
    if !area.is_finite() || area.abs() < 1e-12 {
        return None;
    }
    let inverse = transform.invert()?;

    let (fx, fy, fw, fh) = (frame.origin.x, frame.origin.y, frame.size.x, frame.size.y);
    let (v_top, v_bottom) = if texture.is_render_target() { (1.0 - fy, 1.0 - fy - fh) } else { (fy, fy + fh) };
    let local_to_uv = Matrix::new(fw / w, 0.0, 0.0, (v_bottom - v_top) / h, fx, v_top);
    let m = local_to_uv.multiply(&inverse);

    let uv = [m.a, m.b, 0.0, 0.0, m.c, m.d, 0.0, 0.0, m.tx, m.ty, 1.0, 0.0];
    let clip = [fx.min(fx + fw), v_top.min(v_bottom), fx.max(fx + fw), v_top.max(v_bottom)];
    Some((uv, clip))
}
