//! Batched textured quads.

use log::{debug, trace, warn};

use crate::backend::{BufferId, BufferKind, RenderBackend};
use crate::coords::Rect;
use crate::error::RenderResult;
use crate::paint::{BlendMode, Color};
use crate::texture::{Texture, TextureId};

use super::buffer::RunList;
use super::ctx::FlushCtx;
use super::graphics::BatchStats;
use super::paint_state::PaintState;
use super::programs::{SPRITE_MASK_UNIT, SPRITE_TEXTURE_UNIT, SpriteVertex};
use super::restore::Restorable;

pub const DEFAULT_MAX_SPRITES: usize = 2000;
/// Largest sprite capacity addressable with 16-bit indices.
pub const MAX_SPRITES: usize = (u16::MAX as usize + 1) / 4;

const QUAD_INDICES: [u16; 6] = [0, 1, 2, 0, 2, 3];

/// State-run key of the sprite batch.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct SpriteKey {
    pub texture: TextureId,
    pub blend: BlendMode,
}

#[derive(Debug, Copy, Clone)]
struct GpuBuffers {
    vertex: BufferId,
    index: BufferId,
}

/// Indices for `max_sprites` quads: `4k + [0, 1, 2, 0, 2, 3]`.
pub fn quad_indices(max_sprites: usize) -> Vec<u16> {
    (0..max_sprites)
        .flat_map(|k| QUAD_INDICES.map(|i| (4 * k) as u16 + i))
        .collect()
}

/// Whether `frame` reaches outside `[0, 1]` and needs repeat wrapping.
fn frame_repeats(frame: Rect) -> bool {
    frame.origin.x < 0.0
        || frame.origin.y < 0.0
        || frame.origin.x + frame.size.x > 1.0
        || frame.origin.y + frame.size.y > 1.0
}

/// Four sprite corners in draw order: top-left, top-right, bottom-right,
/// bottom-left of the frame as displayed.
pub fn sprite_quad(paint: &PaintState, texture: &Texture, frame: Rect, tint: Color) -> [SpriteVertex; 4] {
    let m = &paint.transform;
    let w = frame.size.x * texture.width() as f32;
    let h = frame.size.y * texture.height() as f32;
    let color = tint.pack(paint.alpha);

    let (u0, u1) = (frame.origin.x, frame.origin.x + frame.size.x);
    let (mut v0, mut v1) = (frame.origin.y, frame.origin.y + frame.size.y);
    if texture.is_render_target() {
        (v0, v1) = (1.0 - v0, 1.0 - v1);
    }

    let corner = |x: f32, y: f32, u: f32, v: f32| {
        let (px, py) = m.transform_xy(x, y);
        SpriteVertex { pos: [px, py], uv: [u, v], color }
    };
    [
        corner(0.0, 0.0, u0, v0),
        corner(w, 0.0, u1, v0),
        corner(w, h, u1, v1),
        corner(0.0, h, u0, v1),
    ]
}

/// Accumulates quads and draws one call per (texture, blend) run.
#[derive(Debug)]
pub struct SpriteBatcher {
    vertices: Vec<SpriteVertex>,
    count: usize,
    max_sprites: usize,
    runs: RunList<SpriteKey>,
    gpu: Option<GpuBuffers>,
    stats: BatchStats,
    warned_npot: bool,
}

impl SpriteBatcher {
    pub fn new(max_sprites: usize) -> Self {
        let max_sprites = max_sprites.clamp(1, MAX_SPRITES);
        Self {
            vertices: vec![SpriteVertex::default(); max_sprites * 4],
            count: 0,
            max_sprites,
            runs: RunList::new(),
            gpu: None,
            stats: BatchStats::default(),
            warned_npot: false,
        }
    }

    #[inline]
    pub fn max_sprites(&self) -> usize {
        self.max_sprites
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.count
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Vertices of the pending sprites.
    pub fn vertices(&self) -> &[SpriteVertex] {
        &self.vertices[..self.count * 4]
    }

    pub fn runs(&self) -> &RunList<SpriteKey> {
        &self.runs
    }

    pub fn gpu_buffers(&self) -> Option<(BufferId, BufferId)> {
        self.gpu.map(|g| (g.vertex, g.index))
    }

    /// Counters since the last [`Self::take_stats`].
    #[inline]
    pub fn stats(&self) -> BatchStats {
        self.stats
    }

    pub fn take_stats(&mut self) -> BatchStats {
        std::mem::take(&mut self.stats)
    }

    /// Whether `frame` would need `texture` to repeat, which only power-of-two
    /// textures can.
    pub fn rejects_repeat(texture: &Texture, frame: Rect) -> bool {
        frame_repeats(frame) && !texture.is_power_of_two()
    }

    /// Whether the draw would produce a visible quad.
    pub fn accepts(&self, texture: &Texture, frame: Rect, tint: Color, paint: &PaintState) -> bool {
        texture.is_ready()
            && !Self::rejects_repeat(texture, frame)
            && tint.a * paint.alpha > 0.0
            && frame.is_finite()
            && frame.size.x != 0.0
            && frame.size.y != 0.0
    }

    /// Appends one textured quad. `frame` is in normalized texture coordinates.
    pub fn draw(
        &mut self,
        ctx: &mut FlushCtx<'_>,
        paint: &PaintState,
        texture: &Texture,
        frame: Rect,
        tint: Color,
    ) -> bool {
        if !texture.is_ready() {
            debug!("SpriteBatcher: texture {:?} not ready; skipped", texture.id());
            return false;
        }
        if Self::rejects_repeat(texture, frame) {
            if !self.warned_npot {
                warn!(
                    "SpriteBatcher: texture {:?} ({}x{}) is not a power of two and cannot repeat; skipped",
                    texture.id(),
                    texture.width(),
                    texture.height()
                );
                self.warned_npot = true;
            }
            return false;
        }
        if !self.accepts(texture, frame, tint, paint) {
            return false;
        }

        if self.count == self.max_sprites {
            self.flush(ctx);
        }
        let at = self.count * 4;
        self.vertices[at..at + 4].copy_from_slice(&sprite_quad(paint, texture, frame, tint));
        self.count += 1;
        self.runs.push(SpriteKey { texture: texture.id(), blend: paint.blend }, self.count as u32);
        true
    }

    /// Uploads pending quads and draws one call per run.
    pub fn flush(&mut self, ctx: &mut FlushCtx<'_>) {
        if self.count == 0 {
            return;
        }
        if !ctx.active {
            self.reset();
            return;
        }
        let Some(gpu) = self.gpu else {
            debug!("SpriteBatcher: no GPU buffers; dropping batch");
            self.reset();
            return;
        };

        let masked = ctx.mask.is_active();
        if masked && !ctx.mask.ready_for_draw() {
            self.reset();
            return;
        }
        let shader = ctx.programs.sprites(masked);
        if !ctx.shaders.use_shader(ctx.backend, shader, gpu.vertex, gpu.index) {
            debug!("SpriteBatcher: program not ready; dropping batch");
            self.reset();
            return;
        }
        if masked && let Err(err) = ctx.mask.apply(ctx.shaders, ctx.backend, shader, SPRITE_MASK_UNIT) {
            warn!("SpriteBatcher: mask not applied: {err}");
        }

        let upload = if self.count * 2 > self.max_sprites { &self.vertices[..] } else { self.vertices() };
        ctx.backend.write_buffer(gpu.vertex, 0, bytemuck::cast_slice(upload));

        let mut texture = None;
        let mut blend = None;
        for (key, range) in self.runs.ranges() {
            if texture != Some(key.texture) {
                ctx.backend.bind_texture(SPRITE_TEXTURE_UNIT, key.texture);
                texture = Some(key.texture);
            }
            if blend != Some(key.blend) {
                ctx.backend.set_blend_mode(key.blend);
                blend = Some(key.blend);
            }
            ctx.backend.draw_elements(range.start * 6, (range.end - range.start) * 6);
            self.stats.draw_calls += 1;
        }
        ctx.backend.submit();

        self.stats.flushes += 1;
        self.stats.vertices += (self.count * 4) as u64;
        trace!("SpriteBatcher: flushed {} sprites in {} runs", self.count, self.runs.len());
        self.reset();
    }

    /// Drops pending quads without drawing them.
    pub fn reset(&mut self) {
        self.count = 0;
        self.runs.clear();
    }
}

impl Restorable for SpriteBatcher {
    fn invalidate(&mut self) {
        self.gpu = None;
    }

    fn restore(&mut self, backend: &mut dyn RenderBackend) -> RenderResult<()> {
        let vertex = backend.create_buffer(BufferKind::Vertex, self.vertices.len() * std::mem::size_of::<SpriteVertex>())?;
        let indices = quad_indices(self.max_sprites);
        let index = backend.create_buffer(BufferKind::Index, indices.len() * 2)?;
        backend.write_buffer(index, 0, bytemuck::cast_slice(&indices));
        self.gpu = Some(GpuBuffers { vertex, index });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::BackendCall;
    use crate::coords::Matrix;
    use crate::render::graphics::tests::Harness;
    use crate::texture::TextureKind;

    fn ready(w: u32, h: u32, kind: TextureKind) -> Texture {
        let t = Texture::new(w, h, kind);
        t.set_ready(true);
        t
    }

    fn batcher(h: &mut Harness, max: usize) -> SpriteBatcher {
        let mut s = SpriteBatcher::new(max);
        s.restore(&mut h.backend).unwrap();
        h.backend.take_calls();
        s
    }

    // ── geometry ──────────────────────────────────────────────────────────

    #[test]
    fn quad_covers_frame_in_pixels() {
        let tex = ready(64, 32, TextureKind::Image);
        let paint = PaintState { transform: Matrix::translation(10.0, 5.0), ..Default::default() };
        let q = sprite_quad(&paint, &tex, Rect::new(0.0, 0.0, 0.5, 1.0), Color::WHITE);
        assert_eq!(q[0].pos, [10.0, 5.0]);
        assert_eq!(q[2].pos, [42.0, 37.0]);
        assert_eq!(q[2].uv, [0.5, 1.0]);
    }

    #[test]
    fn render_target_frames_flip_v() {
        let tex = ready(8, 8, TextureKind::RenderTarget);
        let q = sprite_quad(&PaintState::default(), &tex, Rect::UNIT, Color::WHITE);
        assert_eq!(q[0].uv, [0.0, 1.0]);
        assert_eq!(q[3].uv, [0.0, 0.0]);
    }

    #[test]
    fn tint_is_premultiplied_with_paint_alpha() {
        let tex = ready(8, 8, TextureKind::Image);
        let paint = PaintState { alpha: 0.5, ..Default::default() };
        let q = sprite_quad(&paint, &tex, Rect::UNIT, Color::rgb(1.0, 0.0, 0.0));
        assert_eq!(q[0].color, Color::rgb(1.0, 0.0, 0.0).pack(0.5));
    }

    #[test]
    fn static_indices() {
        assert_eq!(quad_indices(2), vec![0, 1, 2, 0, 2, 3, 4, 5, 6, 4, 6, 7]);
    }

    // ── batching ──────────────────────────────────────────────────────────

    #[test]
    fn same_texture_batches_into_one_draw() {
        let mut h = Harness::new();
        let mut s = batcher(&mut h, 100);
        let tex = ready(16, 16, TextureKind::Image);
        for _ in 0..10 {
            assert!(s.draw(&mut h.ctx(), &PaintState::default(), &tex, Rect::UNIT, Color::WHITE));
        }
        s.flush(&mut h.ctx());
        assert_eq!(h.backend.draw_call_count(), 1);
        assert!(h.backend.calls().contains(&BackendCall::DrawElements { first_index: 0, index_count: 60 }));
    }

    #[test]
    fn texture_and_blend_changes_split_runs() {
        let mut h = Harness::new();
        let mut s = batcher(&mut h, 100);
        let a = ready(16, 16, TextureKind::Image);
        let b = ready(16, 16, TextureKind::Image);
        let add = PaintState { blend: BlendMode::Add, ..Default::default() };
        s.draw(&mut h.ctx(), &PaintState::default(), &a, Rect::UNIT, Color::WHITE);
        s.draw(&mut h.ctx(), &PaintState::default(), &b, Rect::UNIT, Color::WHITE);
        s.draw(&mut h.ctx(), &add, &b, Rect::UNIT, Color::WHITE);
        s.flush(&mut h.ctx());
        assert_eq!(h.backend.draw_call_count(), 3);
        assert_eq!(h.backend.count(|c| matches!(c, BackendCall::BindTexture { .. })), 2);
        assert!(h.backend.calls().contains(&BackendCall::DrawElements { first_index: 12, index_count: 6 }));
    }

    #[test]
    fn full_batch_flushes_before_next_quad() {
        let mut h = Harness::new();
        let mut s = batcher(&mut h, 4);
        let tex = ready(16, 16, TextureKind::Image);
        for _ in 0..5 {
            s.draw(&mut h.ctx(), &PaintState::default(), &tex, Rect::UNIT, Color::WHITE);
        }
        assert_eq!(h.backend.submit_count(), 1);
        assert_eq!(s.len(), 1);
    }

    #[test]
    fn unready_texture_and_transparent_tint_are_skipped() {
        let mut h = Harness::new();
        let mut s = batcher(&mut h, 4);
        let pending = Texture::new(16, 16, TextureKind::Image);
        assert!(!s.draw(&mut h.ctx(), &PaintState::default(), &pending, Rect::UNIT, Color::WHITE));
        let tex = ready(16, 16, TextureKind::Image);
        assert!(!s.draw(&mut h.ctx(), &PaintState::default(), &tex, Rect::UNIT, Color::TRANSPARENT));
        assert!(s.is_empty());
    }

    #[test]
    fn repeating_frame_needs_power_of_two_texture() {
        let mut h = Harness::new();
        let mut s = batcher(&mut h, 4);
        let tiled = Rect::new(0.0, 0.0, 3.0, 3.0);
        let npot = ready(30, 16, TextureKind::Image);
        assert!(!s.draw(&mut h.ctx(), &PaintState::default(), &npot, tiled, Color::WHITE));
        assert!(s.draw(&mut h.ctx(), &PaintState::default(), &npot, Rect::UNIT, Color::WHITE));
        let pot = ready(32, 16, TextureKind::Image);
        assert!(s.draw(&mut h.ctx(), &PaintState::default(), &pot, tiled, Color::WHITE));
        assert_eq!(s.len(), 2);
    }

    #[test]
    fn restore_uploads_static_indices() {
        let mut h = Harness::new();
        let s = batcher(&mut h, 3);
        let (_, ibo) = s.gpu_buffers().unwrap();
        let indices: Vec<u16> = h
            .backend
            .buffer_data(ibo)
            .unwrap()
            .chunks_exact(2)
            .map(|b| u16::from_le_bytes([b[0], b[1]]))
            .collect();
        assert_eq!(&indices[6..12], &[4, 5, 6, 4, 6, 7]);
    }
}
