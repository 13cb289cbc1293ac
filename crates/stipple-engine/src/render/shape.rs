//! Recorded, replayable groups of primitives.
//!
//! A [`Shape`] keeps two representations:
//! - the ordered draw items with the paint state each was drawn with
//! - a frozen geometry snapshot (vertices, indices, blend runs)
//!
//! The snapshot is sliced straight out of the live batch when the recording
//! was never interrupted by a flush. Otherwise it is built on first replay by
//! re-tessellating the items. Replay appends the snapshot with the caller's
//! transform and alpha applied.

use std::cell::OnceCell;
use std::rc::Rc;

use super::buffer::{BatchBuffer, FrozenShape, Mark, Need};
use super::paint_state::PaintState;
use super::tessellate::{Primitive, Tessellator};

/// What one recorded item draws.
#[derive(Debug, Clone)]
pub enum ShapeGeometry {
    Primitive(Primitive),
    /// A shape drawn while recording another.
    Shape(Shape),
}

/// One recorded draw and the paint it was made with.
#[derive(Debug, Clone)]
pub struct ShapeItem {
    pub geometry: ShapeGeometry,
    pub paint: PaintState,
}

#[derive(Debug)]
struct ShapeInner {
    items: Vec<ShapeItem>,
    /// `Some(None)` marks a shape too large for one 16-bit indexed snapshot.
    frozen: OnceCell<Option<FrozenShape>>,
}

/// Immutable recorded shape. Clones share storage.
#[derive(Debug, Clone)]
pub struct Shape(Rc<ShapeInner>);

impl Shape {
    fn new(items: Vec<ShapeItem>) -> Self {
        Shape(Rc::new(ShapeInner { items, frozen: OnceCell::new() }))
    }

    #[inline]
    pub fn items(&self) -> &[ShapeItem] {
        &self.0.items
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.0.items.is_empty()
    }

    /// Whether a geometry snapshot exists.
    pub fn is_frozen(&self) -> bool {
        matches!(self.0.frozen.get(), Some(Some(_)))
    }

    /// The geometry snapshot, built on first use.
    ///
    /// `None` if the shape cannot be addressed with 16-bit indices; such
    /// shapes are replayed item by item.
    pub fn frozen(&self, tess: &Tessellator) -> Option<&FrozenShape> {
        self.0.frozen.get_or_init(|| freeze(&self.0.items, tess)).as_ref()
    }

    /// Whether two handles refer to the same recording.
    #[inline]
    pub fn ptr_eq(&self, other: &Shape) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

/// Demand of one item drawn under `paint`, or `None` if it draws nothing.
pub(crate) fn item_need(geometry: &ShapeGeometry, paint: &PaintState, tess: &Tessellator) -> Option<Need> {
    match geometry {
        ShapeGeometry::Primitive(prim) => tess.need(prim, paint),
        ShapeGeometry::Shape(shape) => {
            if !(paint.alpha > 0.0) {
                return None;
            }
            match shape.frozen(tess) {
                Some(frozen) => (!frozen.is_empty()).then(|| frozen.need()),
                None => shape
                    .items()
                    .iter()
                    .filter_map(|item| item_need(&item.geometry, &item.paint.under(paint), tess))
                    .reduce(|a, b| a + b),
            }
        }
    }
}

/// Writes one item under `paint`. The caller has checked capacity for [`item_need`].
pub(crate) fn emit_item(geometry: &ShapeGeometry, paint: &PaintState, tess: &Tessellator, buf: &mut BatchBuffer) {
    match geometry {
        ShapeGeometry::Primitive(prim) => {
            if tess.need(prim, paint).is_some() {
                tess.emit(prim, paint, buf);
            }
        }
        ShapeGeometry::Shape(shape) => match shape.frozen(tess) {
            Some(frozen) => buf.append_frozen(frozen, &paint.transform, paint.alpha),
            None => {
                for item in shape.items() {
                    emit_item(&item.geometry, &item.paint.under(paint), tess, buf);
                }
            }
        },
    }
}

fn freeze(items: &[ShapeItem], tess: &Tessellator) -> Option<FrozenShape> {
    let need = items
        .iter()
        .filter_map(|item| item_need(&item.geometry, &item.paint, tess))
        .fold(Need::default(), |a, b| a + b);
    if need.vertices > u16::MAX as usize + 1 {
        log::debug!("Shape: {} vertices exceed one snapshot; replaying per item", need.vertices);
        return None;
    }
    let mut buf = BatchBuffer::new(need.vertices, need.indices);
    for item in items {
        emit_item(&item.geometry, &item.paint, tess, &mut buf);
    }
    Some(buf.into_frozen())
}

/// Open recording inside the graphics batcher.
#[derive(Debug)]
pub(crate) struct ShapeRecorder {
    items: Vec<ShapeItem>,
    start: Mark,
    epoch: u64,
}

impl ShapeRecorder {
    /// Starts recording at `start` in the live batch, whose flush epoch is `epoch`.
    pub fn new(start: Mark, epoch: u64) -> Self {
        Self { items: Vec::new(), start, epoch }
    }

    pub fn push(&mut self, geometry: ShapeGeometry, paint: PaintState) {
        self.items.push(ShapeItem { geometry, paint });
    }

    /// Finishes the recording.
    ///
    /// If the batch was not flushed since the start (`epoch` unchanged) the
    /// recorded vertices are still contiguous and become the snapshot.
    pub fn finish(self, batch: &BatchBuffer, epoch: u64) -> Shape {
        let contiguous = epoch == self.epoch;
        let shape = Shape::new(self.items);
        if contiguous {
            let _ = shape.0.frozen.set(Some(batch.snapshot_since(self.start)));
        }
        shape
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coords::{Matrix, Rect, Vec2};

    fn rect_item(x: f32) -> (ShapeGeometry, PaintState) {
        (ShapeGeometry::Primitive(Primitive::Rect(Rect::new(x, 0.0, 10.0, 10.0))), PaintState::default())
    }

    #[test]
    fn contiguous_recording_is_frozen_from_the_batch() {
        let tess = Tessellator::default();
        let mut batch = BatchBuffer::new(64, 192);
        let mut rec = ShapeRecorder::new(batch.mark(), 0);
        for x in [0.0, 20.0] {
            let (g, p) = rect_item(x);
            if let ShapeGeometry::Primitive(prim) = &g {
                tess.emit(prim, &p, &mut batch);
            }
            rec.push(g, p);
        }
        let shape = rec.finish(&batch, 0);
        assert!(shape.is_frozen());
        let frozen = shape.frozen(&tess).unwrap();
        assert_eq!(frozen.vertices.len(), 8);
        assert_eq!(frozen.indices.len(), 12);
    }

    #[test]
    fn interrupted_recording_freezes_lazily() {
        let tess = Tessellator::default();
        let batch = BatchBuffer::new(64, 192);
        let mut rec = ShapeRecorder::new(batch.mark(), 0);
        let (g, p) = rect_item(0.0);
        rec.push(g, p);
        let shape = rec.finish(&batch, 1);
        assert!(!shape.is_frozen());
        let frozen = shape.frozen(&tess).unwrap();
        assert_eq!(frozen.need(), Need::new(4, 6));
        assert!(shape.is_frozen());
    }

    #[test]
    fn lazy_freeze_matches_live_tessellation() {
        let tess = Tessellator::default();
        let paint = PaintState { transform: Matrix::rotation(0.3), stroke_width: 2.0, ..Default::default() };
        let prim = Primitive::Circle { center: Vec2::new(5.0, 5.0), radius: 12.0 };

        let mut live = BatchBuffer::new(512, 2048);
        tess.emit(&prim, &paint, &mut live);

        let mut rec = ShapeRecorder::new(Mark { vertices: 0, indices: 0 }, 0);
        rec.push(ShapeGeometry::Primitive(prim), paint);
        let shape = rec.finish(&live, 7);
        let frozen = shape.frozen(&tess).unwrap();
        assert_eq!(frozen.vertices.as_slice(), live.vertices());
        assert_eq!(frozen.indices.as_slice(), live.indices());
    }

    #[test]
    fn nested_shape_need_uses_snapshot() {
        let tess = Tessellator::default();
        let batch = BatchBuffer::new(64, 192);
        let mut inner = ShapeRecorder::new(batch.mark(), 0);
        let (g, p) = rect_item(0.0);
        inner.push(g, p);
        let inner = inner.finish(&batch, 1);

        let geometry = ShapeGeometry::Shape(inner);
        assert_eq!(item_need(&geometry, &PaintState::default(), &tess), Some(Need::new(4, 6)));
        let hidden = PaintState { alpha: 0.0, ..Default::default() };
        assert_eq!(item_need(&geometry, &hidden, &tess), None);
    }

    #[test]
    fn clones_share_the_recording() {
        let batch = BatchBuffer::new(4, 6);
        let shape = ShapeRecorder::new(batch.mark(), 0).finish(&batch, 0);
        assert!(shape.ptr_eq(&shape.clone()));
        assert!(shape.is_empty());
    }
}
