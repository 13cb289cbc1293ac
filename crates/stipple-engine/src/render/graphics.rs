//! Batched untextured vector geometry.

use log::{debug, trace, warn};

use crate::backend::{BufferId, BufferKind, RenderBackend};
use crate::coords::{Rect, Vec2};
use crate::error::RenderResult;

use super::buffer::{BatchBuffer, Need};
use super::ctx::FlushCtx;
use super::paint_state::PaintState;
use super::programs::{GraphicsVertex, PRIMITIVE_MASK_UNIT};
use super::restore::Restorable;
use super::shape::{Shape, ShapeGeometry, ShapeRecorder, emit_item, item_need};
use super::tessellate::{Primitive, Tessellator};

/// Default vertex capacity of the graphics batch.
pub const DEFAULT_MAX_VERTICES: usize = 6000;
/// Index capacity per vertex of capacity.
pub const INDICES_PER_VERTEX: usize = 3;

/// Counters accumulated between [`GraphicsBatcher::take_stats`] calls.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct BatchStats {
    pub flushes: u32,
    pub draw_calls: u32,
    pub vertices: u64,
}

impl std::ops::AddAssign for BatchStats {
    fn add_assign(&mut self, rhs: BatchStats) {
        self.flushes += rhs.flushes;
        self.draw_calls += rhs.draw_calls;
        self.vertices += rhs.vertices;
    }
}

#[derive(Debug, Copy, Clone)]
struct GpuBuffers {
    vertex: BufferId,
    index: BufferId,
}

/// Accumulates tessellated primitives and draws them in as few calls as the
/// blend-mode sequence allows.
///
/// A draw that does not fit the remaining space flushes first; a draw that
/// would not fit even an empty batch is rejected.
#[derive(Debug)]
pub struct GraphicsBatcher {
    buffer: BatchBuffer,
    gpu: Option<GpuBuffers>,
    tess: Tessellator,
    recorder: Option<ShapeRecorder>,
    /// Bumped whenever batch contents are flushed or dropped.
    epoch: u64,
    stats: BatchStats,
    warned_oversize: bool,
}

impl GraphicsBatcher {
    pub fn new(max_vertices: usize, tess: Tessellator) -> Self {
        Self {
            buffer: BatchBuffer::new(max_vertices, max_vertices * INDICES_PER_VERTEX),
            gpu: None,
            tess,
            recorder: None,
            epoch: 0,
            stats: BatchStats::default(),
            warned_oversize: false,
        }
    }

    #[inline]
    pub fn tessellator(&self) -> &Tessellator {
        &self.tess
    }

    #[inline]
    pub fn buffer(&self) -> &BatchBuffer {
        &self.buffer
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Backend vertex and index buffers, if live.
    pub fn gpu_buffers(&self) -> Option<(BufferId, BufferId)> {
        self.gpu.map(|g| (g.vertex, g.index))
    }

    /// Counters since the last [`Self::take_stats`].
    #[inline]
    pub fn stats(&self) -> BatchStats {
        self.stats
    }

    /// Returns and resets the counters.
    pub fn take_stats(&mut self) -> BatchStats {
        std::mem::take(&mut self.stats)
    }

    // ── drawing ───────────────────────────────────────────────────────────

    /// Whether `prim` under `paint` would produce geometry.
    pub fn accepts(&self, prim: &Primitive, paint: &PaintState) -> bool {
        self.tess.need(prim, paint).is_some()
    }

    /// Tessellates `prim` into the batch. Returns `false` if nothing was drawn.
    pub fn draw(&mut self, ctx: &mut FlushCtx<'_>, prim: Primitive, paint: &PaintState) -> bool {
        let Some(need) = self.tess.need(&prim, paint) else {
            return false;
        };
        if !self.reserve(ctx, need) {
            return false;
        }
        self.tess.emit(&prim, paint, &mut self.buffer);
        if let Some(rec) = &mut self.recorder {
            rec.push(ShapeGeometry::Primitive(prim), *paint);
        }
        true
    }

    pub fn draw_line(&mut self, ctx: &mut FlushCtx<'_>, paint: &PaintState, from: Vec2, to: Vec2) -> bool {
        self.draw(ctx, Primitive::Line { from, to }, paint)
    }

    pub fn draw_rect(&mut self, ctx: &mut FlushCtx<'_>, paint: &PaintState, rect: Rect) -> bool {
        self.draw(ctx, Primitive::Rect(rect), paint)
    }

    pub fn draw_circle(&mut self, ctx: &mut FlushCtx<'_>, paint: &PaintState, center: Vec2, radius: f32) -> bool {
        self.draw(ctx, Primitive::Circle { center, radius }, paint)
    }

    pub fn draw_ellipse(
        &mut self,
        ctx: &mut FlushCtx<'_>,
        paint: &PaintState,
        center: Vec2,
        rx: f32,
        ry: f32,
    ) -> bool {
        self.draw(ctx, Primitive::Ellipse { center, rx, ry }, paint)
    }

    #[allow(clippy::too_many_arguments)]
    pub fn draw_arc(
        &mut self,
        ctx: &mut FlushCtx<'_>,
        paint: &PaintState,
        center: Vec2,
        radius: f32,
        start: f32,
        end: f32,
        anticlockwise: bool,
    ) -> bool {
        self.draw(ctx, Primitive::Arc { center, radius, start, end, anticlockwise }, paint)
    }

    pub fn draw_poly(&mut self, ctx: &mut FlushCtx<'_>, paint: &PaintState, points: &[Vec2]) -> bool {
        self.draw(ctx, Primitive::polygon(points), paint)
    }

    fn reserve(&mut self, ctx: &mut FlushCtx<'_>, need: Need) -> bool {
        if !self.buffer.can_hold(need) {
            if !self.warned_oversize {
                warn!(
                    "GraphicsBatcher: primitive needs {} vertices / {} indices, capacity is {} / {}; skipped",
                    need.vertices,
                    need.indices,
                    self.buffer.max_vertices(),
                    self.buffer.max_indices()
                );
                self.warned_oversize = true;
            }
            return false;
        }
        if !self.buffer.fits(need) {
            self.flush(ctx);
        }
        true
    }

    // ── shapes ────────────────────────────────────────────────────────────

    #[inline]
    pub fn is_recording(&self) -> bool {
        self.recorder.is_some()
    }

    /// Starts recording subsequent draws into a shape.
    ///
    /// Returns `false` if a recording is already open.
    pub fn start_shape(&mut self) -> bool {
        if self.recorder.is_some() {
            warn!("GraphicsBatcher: start_shape while already recording; ignored");
            return false;
        }
        self.recorder = Some(ShapeRecorder::new(self.buffer.mark(), self.epoch));
        true
    }

    /// Closes the open recording.
    pub fn end_shape(&mut self) -> Option<Shape> {
        let rec = self.recorder.take()?;
        Some(rec.finish(&self.buffer, self.epoch))
    }

    pub fn accepts_shape(&self, shape: &Shape, paint: &PaintState) -> bool {
        paint.alpha > 0.0 && !shape.is_empty()
    }

    /// Replays `shape` with `paint`'s transform and alpha applied on top of
    /// what was recorded.
    pub fn draw_shape(&mut self, ctx: &mut FlushCtx<'_>, shape: &Shape, paint: &PaintState) -> bool {
        let geometry = ShapeGeometry::Shape(shape.clone());
        let Some(need) = item_need(&geometry, paint, &self.tess) else {
            return false;
        };

        let drawn = if self.buffer.can_hold(need) {
            if !self.buffer.fits(need) {
                self.flush(ctx);
            }
            emit_item(&geometry, paint, &self.tess, &mut self.buffer);
            true
        } else {
            debug!("GraphicsBatcher: shape of {} vertices replayed per item", need.vertices);
            let recorder = self.recorder.take();
            let mut any = false;
            for item in shape.items() {
                any |= self.draw_geometry(ctx, &item.geometry, &item.paint.under(paint));
            }
            self.recorder = recorder;
            any
        };

        if drawn && let Some(rec) = &mut self.recorder {
            rec.push(geometry, *paint);
        }
        drawn
    }

    fn draw_geometry(&mut self, ctx: &mut FlushCtx<'_>, geometry: &ShapeGeometry, paint: &PaintState) -> bool {
        match geometry {
            ShapeGeometry::Primitive(prim) => self.draw(ctx, prim.clone(), paint),
            ShapeGeometry::Shape(shape) => self.draw_shape(ctx, shape, paint),
        }
    }

    // ── flushing ──────────────────────────────────────────────────────────

    /// Uploads the batch and issues one draw call per blend run.
    ///
    /// While the context is not active the batch is dropped without any
    /// backend call.
    pub fn flush(&mut self, ctx: &mut FlushCtx<'_>) {
        if self.buffer.is_empty() {
            return;
        }
        self.epoch += 1;

        if !ctx.active {
            self.buffer.clear();
            return;
        }
        let Some(gpu) = self.gpu else {
            debug!("GraphicsBatcher: no GPU buffers; dropping batch");
            self.buffer.clear();
            return;
        };

        let masked = ctx.mask.is_active();
        if masked && !ctx.mask.ready_for_draw() {
            self.buffer.clear();
            return;
        }
        let shader = ctx.programs.graphics(masked);
        if !ctx.shaders.use_shader(ctx.backend, shader, gpu.vertex, gpu.index) {
            debug!("GraphicsBatcher: program not ready; dropping batch");
            self.buffer.clear();
            return;
        }
        if masked && let Err(err) = ctx.mask.apply(ctx.shaders, ctx.backend, shader, PRIMITIVE_MASK_UNIT) {
            warn!("GraphicsBatcher: mask not applied: {err}");
        }

        self.upload(ctx.backend, gpu);

        let mut blend = None;
        for (mode, range) in self.buffer.runs().ranges() {
            if blend != Some(mode) {
                ctx.backend.set_blend_mode(mode);
                blend = Some(mode);
            }
            ctx.backend.draw_elements(range.start, range.end - range.start);
            self.stats.draw_calls += 1;
        }
        ctx.backend.submit();

        self.stats.flushes += 1;
        self.stats.vertices += self.buffer.vertex_count() as u64;
        trace!(
            "GraphicsBatcher: flushed {} vertices in {} runs",
            self.buffer.vertex_count(),
            self.buffer.runs().len()
        );
        self.buffer.clear();
    }

    /// Whole storage when more than half full, otherwise only the used prefix.
    fn upload(&self, backend: &mut dyn RenderBackend, gpu: GpuBuffers) {
        let full = self.buffer.vertex_count() * 2 > self.buffer.max_vertices();
        let (vertices, indices) = if full {
            (self.buffer.vertex_storage(), self.buffer.index_storage())
        } else {
            (self.buffer.vertices(), self.buffer.indices())
        };
        backend.write_buffer(gpu.vertex, 0, bytemuck::cast_slice(vertices));
        backend.write_buffer(gpu.index, 0, bytemuck::cast_slice(indices));
    }

    /// Drops pending geometry without drawing it.
    pub fn reset(&mut self) {
        if !self.buffer.is_empty() {
            self.epoch += 1;
            self.buffer.clear();
        }
    }
}

impl Restorable for GraphicsBatcher {
    fn invalidate(&mut self) {
        self.gpu = None;
    }

    fn restore(&mut self, backend: &mut dyn RenderBackend) -> RenderResult<()> {
        let vertex = backend.create_buffer(
            BufferKind::Vertex,
            self.buffer.max_vertices() * std::mem::size_of::<GraphicsVertex>(),
        )?;
        let index = backend.create_buffer(BufferKind::Index, self.buffer.max_indices() * 2)?;
        self.gpu = Some(GpuBuffers { vertex, index });
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::backend::{BackendCall, RecordingBackend};
    use crate::coords::Matrix;
    use crate::paint::{BlendMode, Color};
    use crate::render::mask::MaskCompositor;
    use crate::render::programs::ProgramSet;
    use crate::render::shader::ShaderManager;

    pub(crate) struct Harness {
        pub backend: RecordingBackend,
        pub shaders: ShaderManager,
        pub mask: MaskCompositor,
        pub programs: ProgramSet,
        pub active: bool,
    }

    impl Harness {
        pub fn new() -> Self {
            let mut backend = RecordingBackend::new(64, 64);
            let mut shaders = ShaderManager::new();
            let programs = ProgramSet::load(&mut shaders, &mut backend).unwrap();
            Self { backend, shaders, mask: MaskCompositor::new(), programs, active: true }
        }

        pub fn ctx(&mut self) -> FlushCtx<'_> {
            FlushCtx::new(&mut self.backend, &mut self.shaders, &self.mask, &self.programs, self.active)
        }
    }

    fn batcher(h: &mut Harness, max_vertices: usize) -> GraphicsBatcher {
        let mut g = GraphicsBatcher::new(max_vertices, Tessellator::default());
        g.restore(&mut h.backend).unwrap();
        h.backend.take_calls();
        g
    }

    fn draws(backend: &RecordingBackend) -> Vec<u32> {
        backend
            .calls()
            .iter()
            .filter_map(|c| match c {
                BackendCall::DrawElements { index_count, .. } => Some(*index_count),
                _ => None,
            })
            .collect()
    }

    fn stroke() -> PaintState {
        PaintState { stroke_width: 1.0, stroke: Color::BLACK, ..Default::default() }
    }

    // ── batching ──────────────────────────────────────────────────────────

    #[test]
    fn single_rect_is_one_draw_of_four_vertices() {
        let mut h = Harness::new();
        let mut g = batcher(&mut h, DEFAULT_MAX_VERTICES);
        assert!(g.draw_rect(&mut h.ctx(), &PaintState::default(), Rect::new(10.0, 10.0, 50.0, 50.0)));
        g.flush(&mut h.ctx());

        assert_eq!(draws(&h.backend), vec![6]);
        let (vbo, ibo) = g.gpu_buffers().unwrap();
        assert!(h.backend.calls().contains(&BackendCall::WriteBuffer { buffer: vbo, offset: 0, len: 4 * 12 }));
        assert!(h.backend.calls().contains(&BackendCall::WriteBuffer { buffer: ibo, offset: 0, len: 12 }));
        assert_eq!(g.take_stats(), BatchStats { flushes: 1, draw_calls: 1, vertices: 4 });
    }

    #[test]
    fn blend_changes_split_runs() {
        let mut h = Harness::new();
        let mut g = batcher(&mut h, DEFAULT_MAX_VERTICES);
        let r = Rect::new(0.0, 0.0, 4.0, 4.0);
        for blend in [BlendMode::Normal, BlendMode::Add, BlendMode::Add, BlendMode::Normal] {
            g.draw_rect(&mut h.ctx(), &PaintState { blend, ..Default::default() }, r);
        }
        g.flush(&mut h.ctx());
        assert_eq!(draws(&h.backend), vec![6, 12, 6]);
        assert_eq!(h.backend.count(|c| matches!(c, BackendCall::SetBlendMode(_))), 3);
        assert_eq!(h.backend.submit_count(), 1);
    }

    #[test]
    fn capacity_overflow_flushes_before_append() {
        let mut h = Harness::new();
        let mut g = batcher(&mut h, DEFAULT_MAX_VERTICES);
        for i in 0..1501 {
            let y = i as f32;
            assert!(g.draw_line(&mut h.ctx(), &stroke(), Vec2::new(0.0, y), Vec2::new(10.0, y)));
        }
        // 1500 lines fill the batch exactly; the last one starts a new batch.
        assert_eq!(h.backend.submit_count(), 1);
        assert_eq!(g.buffer().vertex_count(), 4);
        g.flush(&mut h.ctx());
        assert_eq!(draws(&h.backend), vec![9000, 6]);
        assert_eq!(g.take_stats().flushes, 2);
    }

    #[test]
    fn upload_is_partial_until_half_full() {
        let mut h = Harness::new();
        let mut g = batcher(&mut h, 8);
        let (vbo, _) = g.gpu_buffers().unwrap();
        g.draw_rect(&mut h.ctx(), &PaintState::default(), Rect::new(0.0, 0.0, 1.0, 1.0));
        g.flush(&mut h.ctx());
        assert!(h.backend.calls().contains(&BackendCall::WriteBuffer { buffer: vbo, offset: 0, len: 48 }));

        h.backend.take_calls();
        g.draw_rect(&mut h.ctx(), &PaintState::default(), Rect::new(0.0, 0.0, 1.0, 1.0));
        g.draw_rect(&mut h.ctx(), &PaintState::default(), Rect::new(0.0, 0.0, 1.0, 1.0));
        g.flush(&mut h.ctx());
        assert!(h.backend.calls().contains(&BackendCall::WriteBuffer { buffer: vbo, offset: 0, len: 8 * 12 }));
    }

    #[test]
    fn oversize_primitive_is_rejected() {
        let mut h = Harness::new();
        let mut g = batcher(&mut h, 8);
        let points: Vec<Vec2> = (0..20).map(|i| Vec2::new((i as f32).cos(), (i as f32).sin())).collect();
        assert!(!g.draw_poly(&mut h.ctx(), &PaintState::default(), &points));
        assert!(g.is_empty());
    }

    #[test]
    fn invisible_draw_is_a_no_op() {
        let mut h = Harness::new();
        let mut g = batcher(&mut h, 64);
        let hidden = PaintState { alpha: 0.0, ..Default::default() };
        assert!(!g.draw_rect(&mut h.ctx(), &hidden, Rect::new(0.0, 0.0, 5.0, 5.0)));
        g.flush(&mut h.ctx());
        assert!(h.backend.calls().is_empty());
    }

    #[test]
    fn inactive_flush_discards_without_backend_calls() {
        let mut h = Harness::new();
        let mut g = batcher(&mut h, 64);
        g.draw_rect(&mut h.ctx(), &PaintState::default(), Rect::new(0.0, 0.0, 5.0, 5.0));
        h.active = false;
        g.flush(&mut h.ctx());
        assert!(g.is_empty());
        assert!(h.backend.calls().is_empty());
    }

    #[test]
    fn masked_flush_uses_masked_program() {
        let mut h = Harness::new();
        let mut g = batcher(&mut h, 64);
        let tex = crate::texture::Texture::new(4, 4, crate::texture::TextureKind::Image);
        tex.set_ready(true);
        h.mask.set(Some(&tex), &Matrix::IDENTITY, Rect::UNIT, 1.0);
        g.draw_rect(&mut h.ctx(), &PaintState::default(), Rect::new(0.0, 0.0, 5.0, 5.0));
        g.flush(&mut h.ctx());

        let masked = h.shaders.program(h.programs.primitive_masked).unwrap();
        assert!(h.backend.calls().iter().any(|c| matches!(c, BackendCall::UseProgram { program, .. } if *program == masked)));
        assert!(h.backend.calls().contains(&BackendCall::BindTexture { unit: PRIMITIVE_MASK_UNIT, texture: tex.id() }));
    }

    #[test]
    fn widest_polygon_fill_is_refused_as_oversize() {
        let mut h = Harness::new();
        let mut g = batcher(&mut h, u16::MAX as usize + 1);
        let points: Vec<Vec2> = (0..=u16::MAX as usize).map(|i| Vec2::new(i as f32, (i % 2) as f32)).collect();
        assert!(!g.draw_poly(&mut h.ctx(), &PaintState::default(), &points));
        assert!(g.is_empty());
        assert!(h.backend.calls().is_empty());
    }

    #[test]
    fn unready_mask_drops_the_batch() {
        let mut h = Harness::new();
        let mut g = batcher(&mut h, 64);
        let tex = crate::texture::Texture::new(4, 4, crate::texture::TextureKind::Image);
        h.mask.set(Some(&tex), &Matrix::IDENTITY, Rect::UNIT, 1.0);
        g.draw_rect(&mut h.ctx(), &PaintState::default(), Rect::new(0.0, 0.0, 5.0, 5.0));
        g.flush(&mut h.ctx());

        assert!(g.is_empty());
        assert!(draws(&h.backend).is_empty());
        assert_eq!(h.backend.count(|c| matches!(c, BackendCall::BindTexture { .. })), 0);
        assert_eq!(g.stats().flushes, 0);

        // Once the texture is back the same mask draws again.
        tex.set_ready(true);
        g.draw_rect(&mut h.ctx(), &PaintState::default(), Rect::new(0.0, 0.0, 5.0, 5.0));
        g.flush(&mut h.ctx());
        assert_eq!(draws(&h.backend), vec![6]);
        assert!(h.backend.calls().contains(&BackendCall::BindTexture { unit: PRIMITIVE_MASK_UNIT, texture: tex.id() }));
    }

    // ── shapes ────────────────────────────────────────────────────────────

    #[test]
    fn shape_replay_applies_transform_and_alpha() {
        let mut h = Harness::new();
        let mut g = batcher(&mut h, 64);
        assert!(g.start_shape());
        g.draw_rect(&mut h.ctx(), &PaintState::default(), Rect::new(0.0, 0.0, 2.0, 2.0));
        let shape = g.end_shape().unwrap();
        assert!(shape.is_frozen());
        g.reset();

        let paint = PaintState { transform: Matrix::translation(100.0, 0.0), alpha: 0.5, ..Default::default() };
        assert!(g.draw_shape(&mut h.ctx(), &shape, &paint));
        let v = g.buffer().vertices()[0];
        assert_eq!(v.pos, [100.0, 0.0]);
        assert_eq!(v.color, Color::WHITE.pack(1.0).scale_alpha(0.5));
    }

    #[test]
    fn shape_interrupted_by_flush_is_frozen_lazily() {
        let mut h = Harness::new();
        let mut g = batcher(&mut h, 8);
        g.start_shape();
        for x in [0.0, 10.0, 20.0] {
            g.draw_rect(&mut h.ctx(), &PaintState::default(), Rect::new(x, 0.0, 2.0, 2.0));
        }
        let shape = g.end_shape().unwrap();
        assert!(!shape.is_frozen());
        assert_eq!(shape.items().len(), 3);

        // 12 vertices exceed the batch: replayed item by item across flushes.
        g.reset();
        h.backend.take_calls();
        assert!(g.draw_shape(&mut h.ctx(), &shape, &PaintState::default()));
        g.flush(&mut h.ctx());
        assert_eq!(h.backend.submit_count(), 2);
    }

    #[test]
    fn nested_shapes_record_as_one_item() {
        let mut h = Harness::new();
        let mut g = batcher(&mut h, 64);
        g.start_shape();
        g.draw_rect(&mut h.ctx(), &PaintState::default(), Rect::new(0.0, 0.0, 1.0, 1.0));
        let inner = g.end_shape().unwrap();

        g.start_shape();
        g.draw_shape(&mut h.ctx(), &inner, &PaintState::default());
        g.draw_shape(&mut h.ctx(), &inner, &PaintState { transform: Matrix::translation(5.0, 0.0), ..Default::default() });
        let outer = g.end_shape().unwrap();
        assert_eq!(outer.items().len(), 2);
        assert_eq!(outer.frozen(g.tessellator()).unwrap().vertices.len(), 8);
    }

    #[test]
    fn second_start_shape_is_refused() {
        let mut g = GraphicsBatcher::new(16, Tessellator::default());
        assert!(g.start_shape());
        assert!(!g.start_shape());
        assert!(g.end_shape().is_some());
        assert!(g.end_shape().is_none());
    }
}
