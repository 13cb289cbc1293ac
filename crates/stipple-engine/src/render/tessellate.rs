//! CPU tessellation of vector primitives into indexed triangles.
//!
//! Geometry is generated in local space and transformed per vertex by the
//! paint transform. Fill and stroke of one primitive share a single blend
//! run. Every primitive reports its worst-case [`Need`] up front so the
//! batcher can flush before writing.

use std::f32::consts::TAU;

use crate::coords::{Matrix, Rect, Vec2};
use crate::paint::PackedColor;

use super::buffer::{BatchBuffer, Need, PrimitiveWriter};
use super::paint_state::PaintState;
use super::triangulate::ear_clip;

/// Default segments-per-sqrt(pixel) factor for curves.
pub const CURVE_SMOOTHING: f32 = 4.0;
pub const MIN_SEGMENTS: u32 = 8;
pub const MAX_SEGMENTS: u32 = 512;
/// Default miter length limit, in stroke half-widths.
pub const MITER_LIMIT: f32 = 4.0;
/// Largest polygon that can be filled; ear clipping indexes points with `u16`.
pub const MAX_FILL_POINTS: usize = u16::MAX as usize;

/// One drawable vector primitive in local coordinates.
#[derive(Debug, Clone, PartialEq)]
pub enum Primitive {
    Line { from: Vec2, to: Vec2 },
    Rect(Rect),
    Circle { center: Vec2, radius: f32 },
    Ellipse { center: Vec2, rx: f32, ry: f32 },
    /// Angles in radians, clockwise on screen unless `anticlockwise`.
    Arc { center: Vec2, radius: f32, start: f32, end: f32, anticlockwise: bool },
    /// Closed polygon. Build with [`Primitive::polygon`].
    Poly(Vec<Vec2>),
}

impl Primitive {
    /// Closed polygon with consecutive duplicates and the closing point removed.
    pub fn polygon(points: &[Vec2]) -> Primitive {
        let mut out: Vec<Vec2> = Vec::with_capacity(points.len());
        for &p in points {
            if out.last() != Some(&p) {
                out.push(p);
            }
        }
        while out.len() > 1 && out.first() == out.last() {
            out.pop();
        }
        Primitive::Poly(out)
    }
}

/// Signed sweep of an arc from `start` to `end`.
///
/// Clockwise sweeps lie in `[0, TAU]`, anticlockwise in `[-TAU, 0]`. A
/// difference of a full turn or more sweeps a full turn.
pub fn arc_sweep(start: f32, end: f32, anticlockwise: bool) -> f32 {
    let diff = end - start;
    if anticlockwise {
        if -diff >= TAU { -TAU } else { -(start - end).rem_euclid(TAU) }
    } else if diff >= TAU {
        TAU
    } else {
        diff.rem_euclid(TAU)
    }
}

/// Tessellation parameters.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct Tessellator {
    pub smoothing: f32,
    pub miter_limit: f32,
}

impl Default for Tessellator {
    fn default() -> Self {
        Self { smoothing: CURVE_SMOOTHING, miter_limit: MITER_LIMIT }
    }
}

impl Tessellator {
    pub fn new(smoothing: f32, miter_limit: f32) -> Self {
        Self { smoothing, miter_limit }
    }

    /// Segment count for a full ellipse of radii `rx`, `ry` under `transform`.
    pub fn segments(&self, transform: &Matrix, rx: f32, ry: f32) -> u32 {
        let r = (rx.abs() * transform.scale_x()).max(ry.abs() * transform.scale_y());
        let n = (self.smoothing * r.sqrt()).round();
        if !n.is_finite() {
            return MIN_SEGMENTS;
        }
        (n as u32).clamp(MIN_SEGMENTS, MAX_SEGMENTS)
    }

    fn arc_segments(&self, transform: &Matrix, radius: f32, sweep: f32) -> u32 {
        let full = self.segments(transform, radius, radius) as f32;
        ((full * sweep.abs() / TAU).ceil() as u32).max(1)
    }

    /// Worst-case buffer demand of `prim`, or `None` if it would draw nothing.
    pub fn need(&self, prim: &Primitive, paint: &PaintState) -> Option<Need> {
        let fill = paint.fill_color().is_some();
        let stroke = paint.stroke_style().is_some();
        let m = &paint.transform;

        let need = match prim {
            Primitive::Line { from, to } => {
                if !stroke || !from.is_finite() || !to.is_finite() || (*to - *from).length_squared() == 0.0 {
                    return None;
                }
                Need::new(4, 6)
            }
            Primitive::Rect(r) => {
                if !r.is_finite() || r.size.x == 0.0 || r.size.y == 0.0 {
                    return None;
                }
                pick(fill, Need::new(4, 6)) + pick(stroke, Need::new(8, 24))
            }
            Primitive::Circle { center, radius } => ellipse_need(self, m, *center, *radius, *radius, fill, stroke)?,
            Primitive::Ellipse { center, rx, ry } => ellipse_need(self, m, *center, *rx, *ry, fill, stroke)?,
            Primitive::Arc { center, radius, start, end, anticlockwise } => {
                let sweep = arc_sweep(*start, *end, *anticlockwise);
                if !center.is_finite() || !(*radius > 0.0) || !radius.is_finite() || sweep == 0.0 || !sweep.is_finite() {
                    return None;
                }
                let segs = self.arc_segments(m, *radius, sweep) as usize;
                let points = segs + 1;
                pick(fill, Need::new(points + 1, 3 * segs)) + pick(stroke, Need::new(2 * points, 6 * segs))
            }
            Primitive::Poly(points) => {
                let n = points.len();
                if n < 3 || points.iter().any(|p| !p.is_finite()) {
                    return None;
                }
                let fill_need = if n <= MAX_FILL_POINTS { Need::new(n, 3 * (n - 2)) } else { Need::UNBOUNDED };
                pick(fill, fill_need) + pick(stroke, Need::new(4 * n, 12 * n))
            }
        };
        (need.indices > 0).then_some(need)
    }

    /// Writes `prim` into `buf`. The caller has checked [`Self::need`] and capacity.
    pub fn emit(&self, prim: &Primitive, paint: &PaintState, buf: &mut BatchBuffer) {
        let fill = paint.fill_color();
        let stroke = paint.stroke_style();
        let m = paint.transform;
        let mut w = buf.begin(&m);

        match prim {
            Primitive::Line { from, to } => {
                if let Some((color, hw)) = stroke {
                    line(&mut w, *from, *to, hw, color);
                }
            }
            Primitive::Rect(r) => {
                let r = r.normalized();
                if let Some(color) = fill {
                    fill_rect(&mut w, r, color);
                }
                if let Some((color, hw)) = stroke {
                    stroke_rect(&mut w, r, hw, color);
                }
            }
            Primitive::Circle { center, radius } => {
                let n = self.segments(&m, *radius, *radius);
                ellipse(&mut w, *center, radius.abs(), radius.abs(), n, fill, stroke);
            }
            Primitive::Ellipse { center, rx, ry } => {
                let n = self.segments(&m, *rx, *ry);
                ellipse(&mut w, *center, rx.abs(), ry.abs(), n, fill, stroke);
            }
            Primitive::Arc { center, radius, start, end, anticlockwise } => {
                let sweep = arc_sweep(*start, *end, *anticlockwise);
                let segs = self.arc_segments(&m, *radius, sweep);
                arc(&mut w, *center, *radius, *start, sweep, segs, fill, stroke);
            }
            Primitive::Poly(points) => {
                if let Some(color) = fill {
                    fill_polygon(&mut w, points, color);
                }
                if let Some((color, hw)) = stroke {
                    stroke_polygon(&mut w, points, hw, self.miter_limit, color);
                }
            }
        }
        w.finish(paint.blend);
    }
}

#[inline]
fn pick(on: bool, need: Need) -> Need {
    if on { need } else { Need::default() }
}

fn ellipse_need(
    tess: &Tessellator,
    m: &Matrix,
    center: Vec2,
    rx: f32,
    ry: f32,
    fill: bool,
    stroke: bool,
) -> Option<Need> {
    if !center.is_finite() || !rx.is_finite() || !ry.is_finite() || rx == 0.0 || ry == 0.0 {
        return None;
    }
    let n = tess.segments(m, rx, ry) as usize;
    Some(pick(fill, Need::new(n + 1, 3 * n)) + pick(stroke, Need::new(2 * n, 6 * n)))
}

// ── emitters ──────────────────────────────────────────────────────────────

fn line(w: &mut PrimitiveWriter<'_>, from: Vec2, to: Vec2, hw: f32, color: PackedColor) {
    let n = (to - from).normalized().perp() * hw;
    let a = w.vertex(from + n, color);
    let b = w.vertex(to + n, color);
    let c = w.vertex(to - n, color);
    let d = w.vertex(from - n, color);
    w.quad(a, b, c, d);
}

fn fill_rect(w: &mut PrimitiveWriter<'_>, r: Rect, color: PackedColor) {
    let (p0, p1) = (r.min(), r.max());
    let a = w.vertex(p0, color);
    let b = w.vertex(Vec2::new(p1.x, p0.y), color);
    let c = w.vertex(p1, color);
    let d = w.vertex(Vec2::new(p0.x, p1.y), color);
    w.quad(a, b, c, d);
}

fn stroke_rect(w: &mut PrimitiveWriter<'_>, r: Rect, hw: f32, color: PackedColor) {
    let (p0, p1) = (r.min(), r.max());
    let mid = (p0 + p1) * 0.5;
    let outer = [
        Vec2::new(p0.x - hw, p0.y - hw),
        Vec2::new(p1.x + hw, p0.y - hw),
        Vec2::new(p1.x + hw, p1.y + hw),
        Vec2::new(p0.x - hw, p1.y + hw),
    ];
    let (ix0, ix1) = ((p0.x + hw).min(mid.x), (p1.x - hw).max(mid.x));
    let (iy0, iy1) = ((p0.y + hw).min(mid.y), (p1.y - hw).max(mid.y));
    let inner = [Vec2::new(ix0, iy0), Vec2::new(ix1, iy0), Vec2::new(ix1, iy1), Vec2::new(ix0, iy1)];
    ring(w, &outer, &inner, color);
}

/// Band between two closed loops of equal length.
fn ring(w: &mut PrimitiveWriter<'_>, outer: &[Vec2], inner: &[Vec2], color: PackedColor) {
    let n = outer.len();
    let mut first = None;
    for (o, i) in outer.iter().zip(inner) {
        let v = w.vertex(*o, color);
        w.vertex(*i, color);
        first.get_or_insert(v);
    }
    let Some(first) = first else { return };
    for k in 0..n as u16 {
        let next = (k + 1) % n as u16;
        let (o0, i0) = (first + 2 * k, first + 2 * k + 1);
        let (o1, i1) = (first + 2 * next, first + 2 * next + 1);
        w.quad(o0, o1, i1, i0);
    }
}

/// Open band through consecutive `(outer, inner)` point pairs.
fn band(w: &mut PrimitiveWriter<'_>, outer: impl Iterator<Item = (Vec2, Vec2)>, color: PackedColor) {
    let mut prev: Option<(u16, u16)> = None;
    for (o, i) in outer {
        let vo = w.vertex(o, color);
        let vi = w.vertex(i, color);
        if let Some((po, pi)) = prev {
            w.quad(po, vo, vi, pi);
        }
        prev = Some((vo, vi));
    }
}

fn ellipse(
    w: &mut PrimitiveWriter<'_>,
    c: Vec2,
    rx: f32,
    ry: f32,
    n: u32,
    fill: Option<PackedColor>,
    stroke: Option<(PackedColor, f32)>,
) {
    let dir = |k: u32| {
        let (s, co) = (TAU * k as f32 / n as f32).sin_cos();
        Vec2::new(co, s)
    };
    if let Some(color) = fill {
        let center = w.vertex(c, color);
        for k in 0..n {
            let d = dir(k);
            w.vertex(c + Vec2::new(d.x * rx, d.y * ry), color);
        }
        for k in 0..n as u16 {
            let next = (k + 1) % n as u16;
            w.triangle(center, center + 1 + k, center + 1 + next);
        }
    }
    if let Some((color, hw)) = stroke {
        let (ox, oy) = (rx + hw, ry + hw);
        let (ix, iy) = ((rx - hw).max(0.0), (ry - hw).max(0.0));
        let outer: Vec<Vec2> = (0..n).map(|k| c + scale(dir(k), ox, oy)).collect();
        let inner: Vec<Vec2> = (0..n).map(|k| c + scale(dir(k), ix, iy)).collect();
        ring(w, &outer, &inner, color);
    }
}

#[inline]
fn scale(v: Vec2, sx: f32, sy: f32) -> Vec2 {
    Vec2::new(v.x * sx, v.y * sy)
}

#[allow(clippy::too_many_arguments)]
fn arc(
    w: &mut PrimitiveWriter<'_>,
    c: Vec2,
    r: f32,
    start: f32,
    sweep: f32,
    segs: u32,
    fill: Option<PackedColor>,
    stroke: Option<(PackedColor, f32)>,
) {
    let dir = |j: u32| {
        let (s, co) = (start + sweep * j as f32 / segs as f32).sin_cos();
        Vec2::new(co, s)
    };
    if let Some(color) = fill {
        let center = w.vertex(c, color);
        for j in 0..=segs {
            w.vertex(c + dir(j) * r, color);
        }
        for j in 0..segs as u16 {
            w.triangle(center, center + 1 + j, center + 2 + j);
        }
    }
    if let Some((color, hw)) = stroke {
        let (ro, ri) = (r + hw, (r - hw).max(0.0));
        band(w, (0..=segs).map(|j| (c + dir(j) * ro, c + dir(j) * ri)), color);
    }
}

fn fill_polygon(w: &mut PrimitiveWriter<'_>, points: &[Vec2], color: PackedColor) {
    let mut first = None;
    for p in points {
        let v = w.vertex(*p, color);
        first.get_or_insert(v);
    }
    let Some(first) = first else { return };
    let mut tris = Vec::with_capacity(points.len().saturating_sub(2));
    ear_clip(points, &mut tris);
    for [a, b, c] in tris {
        w.triangle(first + a, first + b, first + c);
    }
}

/// Offset of the miter point from a joint, or `None` for a full reversal.
fn miter_offset(n_in: Vec2, n_out: Vec2, hw: f32) -> Option<Vec2> {
    let denom = 1.0 + n_in.dot(n_out);
    (denom > 1e-6).then(|| (n_in + n_out) * (hw / denom))
}

fn stroke_polygon(w: &mut PrimitiveWriter<'_>, points: &[Vec2], hw: f32, miter_limit: f32, color: PackedColor) {
    let n = points.len();
    let limit2 = (hw * miter_limit) * (hw * miter_limit);
    let mut outer = Vec::with_capacity(2 * n);
    let mut inner = Vec::with_capacity(2 * n);
    for i in 0..n {
        let (prev, p, next) = (points[(i + n - 1) % n], points[i], points[(i + 1) % n]);
        let n_in = (p - prev).normalized().perp();
        let n_out = (next - p).normalized().perp();
        match miter_offset(n_in, n_out, hw) {
            Some(m) if m.length_squared() <= limit2 => {
                outer.push(p + m);
                inner.push(p - m);
            }
            _ => {
                // Bevel.
                outer.push(p + n_in * hw);
                inner.push(p - n_in * hw);
                outer.push(p + n_out * hw);
                inner.push(p - n_out * hw);
            }
        }
    }
    ring(w, &outer, &inner, color);
}

#[cfg(test)]
mod tests {
    use std::f32::consts::PI;

    use super::*;
    use crate::paint::{BlendMode, Color};

    fn emit(prim: &Primitive, paint: &PaintState) -> BatchBuffer {
        let tess = Tessellator::default();
        let need = tess.need(prim, paint).expect("visible");
        let mut buf = BatchBuffer::new(need.vertices, need.indices);
        tess.emit(prim, paint, &mut buf);
        buf
    }

    fn stroked(width: f32) -> PaintState {
        PaintState { stroke_width: width, stroke: Color::BLACK, ..Default::default() }
    }

    // ── arc sweep ─────────────────────────────────────────────────────────

    #[test]
    fn sweep_clockwise_quarter() {
        assert!((arc_sweep(0.0, PI / 2.0, false) - PI / 2.0).abs() < 1e-6);
    }

    #[test]
    fn sweep_anticlockwise_goes_the_long_way() {
        assert!((arc_sweep(0.0, PI / 2.0, true) + 1.5 * PI).abs() < 1e-5);
    }

    #[test]
    fn sweep_full_turn_and_zero() {
        assert_eq!(arc_sweep(0.0, TAU, false), TAU);
        assert_eq!(arc_sweep(1.0, 1.0 + 3.0 * TAU, false), TAU);
        assert_eq!(arc_sweep(TAU, 0.0, true), -TAU);
        assert_eq!(arc_sweep(1.0, 1.0, false), 0.0);
    }

    // ── segments ──────────────────────────────────────────────────────────

    #[test]
    fn segments_are_clamped_and_grow_with_scale() {
        let tess = Tessellator::default();
        assert_eq!(tess.segments(&Matrix::IDENTITY, 0.5, 0.5), MIN_SEGMENTS);
        assert_eq!(tess.segments(&Matrix::IDENTITY, 1.0e9, 1.0e9), MAX_SEGMENTS);
        let small = tess.segments(&Matrix::IDENTITY, 50.0, 50.0);
        let zoomed = tess.segments(&Matrix::scaling(4.0, 4.0), 50.0, 50.0);
        assert!(zoomed > small);
    }

    // ── need ──────────────────────────────────────────────────────────────

    #[test]
    fn filled_rect_is_one_quad() {
        let buf = emit(&Primitive::Rect(Rect::new(10.0, 10.0, 50.0, 50.0)), &PaintState::default());
        assert_eq!(buf.vertex_count(), 4);
        assert_eq!(buf.index_count(), 6);
        assert_eq!(buf.vertices()[2].pos, [60.0, 60.0]);
    }

    #[test]
    fn invisible_primitives_need_nothing() {
        let tess = Tessellator::default();
        let hidden = PaintState { alpha: 0.0, ..Default::default() };
        let rect = Primitive::Rect(Rect::new(0.0, 0.0, 1.0, 1.0));
        assert!(tess.need(&rect, &hidden).is_none());
        // Lines only stroke.
        let line = Primitive::Line { from: Vec2::zero(), to: Vec2::new(1.0, 0.0) };
        assert!(tess.need(&line, &PaintState::default()).is_none());
        let zero = Primitive::Arc { center: Vec2::zero(), radius: 5.0, start: 1.0, end: 1.0, anticlockwise: false };
        assert!(tess.need(&zero, &PaintState::default()).is_none());
        assert!(tess.need(&Primitive::polygon(&[Vec2::zero(), Vec2::zero()]), &PaintState::default()).is_none());
    }

    #[test]
    fn emitted_counts_stay_within_need() {
        let tess = Tessellator::default();
        let paint = PaintState { stroke_width: 2.0, ..Default::default() };
        let prims = [
            Primitive::Rect(Rect::new(0.0, 0.0, 10.0, 5.0)),
            Primitive::Circle { center: Vec2::new(5.0, 5.0), radius: 30.0 },
            Primitive::Ellipse { center: Vec2::zero(), rx: 10.0, ry: 3.0 },
            Primitive::Arc { center: Vec2::zero(), radius: 20.0, start: 0.0, end: 2.0, anticlockwise: true },
            Primitive::polygon(&[Vec2::zero(), Vec2::new(10.0, 0.0), Vec2::new(0.5, 0.2), Vec2::new(0.0, 10.0)]),
        ];
        for prim in &prims {
            let need = tess.need(prim, &paint).unwrap();
            let mut buf = BatchBuffer::new(need.vertices, need.indices);
            tess.emit(prim, &paint, &mut buf);
            assert!(buf.vertex_count() <= need.vertices, "{prim:?}");
            assert!(buf.index_count() <= need.indices, "{prim:?}");
            assert!(buf.indices().iter().all(|&i| (i as usize) < buf.vertex_count()));
        }
    }

    #[test]
    fn fill_of_oversized_polygon_fits_no_buffer() {
        let tess = Tessellator::default();
        let points: Vec<Vec2> = (0..=MAX_FILL_POINTS).map(|i| Vec2::new(i as f32, (i % 2) as f32)).collect();
        let poly = Primitive::Poly(points);

        let need = tess.need(&poly, &PaintState::default()).unwrap();
        let widest = BatchBuffer::new(u16::MAX as usize + 1, 3 * (u16::MAX as usize + 1));
        assert!(!widest.can_hold(need));

        // Outline alone stays bounded.
        let outline = PaintState { fill: Color::TRANSPARENT, ..stroked(1.0) };
        assert_eq!(tess.need(&poly, &outline), Some(Need::new(4 * 65536, 12 * 65536)));
    }

    // ── shapes ────────────────────────────────────────────────────────────

    #[test]
    fn line_is_a_quad_of_stroke_width() {
        let buf = emit(&Primitive::Line { from: Vec2::zero(), to: Vec2::new(10.0, 0.0) }, &stroked(4.0));
        let ys: Vec<f32> = buf.vertices().iter().map(|v| v.pos[1]).collect();
        assert_eq!(ys, vec![2.0, 2.0, -2.0, -2.0]);
    }

    #[test]
    fn circle_fill_is_a_fan() {
        let tess = Tessellator::default();
        let paint = PaintState::default();
        let n = tess.segments(&paint.transform, 10.0, 10.0) as usize;
        let buf = emit(&Primitive::Circle { center: Vec2::zero(), radius: 10.0 }, &paint);
        assert_eq!(buf.vertex_count(), n + 1);
        assert_eq!(buf.index_count(), 3 * n);
        let r = buf.vertices()[1].pos;
        assert!(((r[0] * r[0] + r[1] * r[1]).sqrt() - 10.0).abs() < 1e-4);
    }

    #[test]
    fn square_stroke_uses_miters() {
        let paint = PaintState { fill: Color::TRANSPARENT, ..stroked(2.0) };
        let square = [Vec2::zero(), Vec2::new(10.0, 0.0), Vec2::new(10.0, 10.0), Vec2::new(0.0, 10.0)];
        let buf = emit(&Primitive::polygon(&square), &paint);
        // One outer and one inner point per corner.
        assert_eq!(buf.vertex_count(), 8);
        assert_eq!(buf.index_count(), 24);
    }

    #[test]
    fn sharp_corner_is_beveled() {
        let paint = PaintState { fill: Color::TRANSPARENT, ..stroked(2.0) };
        let spike = [Vec2::zero(), Vec2::new(100.0, 1.0), Vec2::new(0.0, 2.0)];
        let buf = emit(&Primitive::polygon(&spike), &paint);
        assert!(buf.vertex_count() > 6);
    }

    #[test]
    fn polygon_constructor_drops_duplicates() {
        let p = Primitive::polygon(&[Vec2::zero(), Vec2::zero(), Vec2::new(1.0, 0.0), Vec2::new(0.0, 1.0), Vec2::zero()]);
        assert_eq!(p, Primitive::Poly(vec![Vec2::zero(), Vec2::new(1.0, 0.0), Vec2::new(0.0, 1.0)]));
    }

    #[test]
    fn fill_and_stroke_share_one_run() {
        let paint = PaintState { blend: BlendMode::Add, ..stroked(1.0) };
        let buf = emit(&Primitive::Rect(Rect::new(0.0, 0.0, 4.0, 4.0)), &paint);
        assert_eq!(buf.runs().len(), 1);
        assert_eq!(buf.index_count(), 30);
    }
}
