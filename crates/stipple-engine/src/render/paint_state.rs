use crate::coords::Matrix;
use crate::paint::{BlendMode, Color, PackedColor};

/// Drawing state captured by every draw call.
///
/// Colors are straight alpha here; they are premultiplied with `alpha` at
/// tessellation time.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct PaintState {
    pub transform: Matrix,
    pub alpha: f32,
    pub blend: BlendMode,
    pub fill: Color,
    pub stroke: Color,
    /// Zero disables stroking.
    pub stroke_width: f32,
}

impl Default for PaintState {
    fn default() -> Self {
        Self {
            transform: Matrix::IDENTITY,
            alpha: 1.0,
            blend: BlendMode::Normal,
            fill: Color::WHITE,
            stroke: Color::WHITE,
            stroke_width: 0.0,
        }
    }
}

impl PaintState {
    /// Packed fill color, or `None` if the fill would be invisible.
    pub fn fill_color(&self) -> Option<PackedColor> {
        (self.fill.a * self.alpha > 0.0).then(|| self.fill.pack(self.alpha))
    }

    /// Packed stroke color and half width, or `None` if there is no visible stroke.
    pub fn stroke_style(&self) -> Option<(PackedColor, f32)> {
        let visible = self.stroke.a * self.alpha > 0.0 && self.stroke_width > 0.0 && self.stroke_width.is_finite();
        visible.then(|| (self.stroke.pack(self.alpha), self.stroke_width * 0.5))
    }

    /// State for replaying something recorded under `self` beneath `outer`.
    ///
    /// Transforms compose (`outer` applied last), alphas multiply; colors,
    /// blend mode and stroke width stay as recorded.
    pub fn under(&self, outer: &PaintState) -> PaintState {
        PaintState {
            transform: outer.transform.multiply(&self.transform),
            alpha: outer.alpha * self.alpha,
            ..*self
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_paint_fills_without_stroke() {
        let p = PaintState::default();
        assert!(p.fill_color().is_some());
        assert!(p.stroke_style().is_none());
    }

    #[test]
    fn zero_alpha_hides_fill_and_stroke() {
        let p = PaintState { alpha: 0.0, stroke_width: 2.0, ..Default::default() };
        assert!(p.fill_color().is_none());
        assert!(p.stroke_style().is_none());
    }

    #[test]
    fn stroke_half_width() {
        let p = PaintState { stroke_width: 3.0, ..Default::default() };
        assert_eq!(p.stroke_style().map(|(_, hw)| hw), Some(1.5));
    }

    #[test]
    fn under_composes_transform_and_alpha() {
        let inner = PaintState {
            transform: Matrix::translation(1.0, 0.0),
            alpha: 0.5,
            blend: BlendMode::Add,
            ..Default::default()
        };
        let outer = PaintState {
            transform: Matrix::scaling(2.0, 2.0),
            alpha: 0.5,
            ..Default::default()
        };
        let p = inner.under(&outer);
        assert_eq!(p.transform.transform_xy(0.0, 0.0), (2.0, 0.0));
        assert_eq!(p.alpha, 0.25);
        assert_eq!(p.blend, BlendMode::Add);
    }
}
