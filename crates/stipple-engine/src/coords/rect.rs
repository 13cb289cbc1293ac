use super::Vec2;

/// Axis-aligned rectangle (top-left origin).
///
/// Used both in target pixels (clip rects, rect primitives) and in normalized
/// texture space (sprite and mask frames).
#[derive(Debug, Copy, Clone, Default, PartialEq)]
pub struct Rect {
    pub origin: Vec2,
    pub size: Vec2,
}

impl Rect {
    /// The whole texture in normalized texture space.
    pub const UNIT: Rect = Rect::new(0.0, 0.0, 1.0, 1.0);

    #[inline]
    pub const fn new(x: f32, y: f32, w: f32, h: f32) -> Self {
        Self {
            origin: Vec2::new(x, y),
            size: Vec2::new(w, h),
        }
    }

    #[inline]
    pub fn min(self) -> Vec2 {
        self.origin
    }

    #[inline]
    pub fn max(self) -> Vec2 {
        Vec2::new(self.origin.x + self.size.x, self.origin.y + self.size.y)
    }

    #[inline]
    pub fn is_empty(self) -> bool {
        self.size.x <= 0.0 || self.size.y <= 0.0
    }

    #[inline]
    pub fn is_finite(self) -> bool {
        self.origin.is_finite() && self.size.is_finite()
    }

    /// Normalizes the rectangle so width/height are non-negative.
    #[inline]
    pub fn normalized(self) -> Self {
        let mut x = self.origin.x;
        let mut y = self.origin.y;
        let mut w = self.size.x;
        let mut h = self.size.y;

        if w < 0.0 {
            x += w;
            w = -w;
        }
        if h < 0.0 {
            y += h;
            h = -h;
        }

        Rect::new(x, y, w, h)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn r(x: f32, y: f32, w: f32, h: f32) -> Rect {
        Rect::new(x, y, w, h)
    }

    #[test]
    fn normalized_negative_extent() {
        let n = r(10.0, 10.0, -4.0, -3.0).normalized();
        assert_eq!(n, r(6.0, 7.0, 4.0, 3.0));
    }

    #[test]
    fn normalized_keeps_positive_extent() {
        let rect = r(1.0, 2.0, 3.0, 4.0);
        assert_eq!(rect.normalized(), rect);
        assert_eq!(rect.max(), Vec2::new(4.0, 6.0));
    }

    #[test]
    fn non_finite_rects_are_detected() {
        assert!(Rect::UNIT.is_finite());
        assert!(!r(0.0, f32::NAN, 1.0, 1.0).is_finite());
    }

    #[test]
    fn unit_rect_is_not_empty() {
        assert!(!Rect::UNIT.is_empty());
        assert!(r(0.0, 0.0, 0.0, 5.0).is_empty());
    }
}
