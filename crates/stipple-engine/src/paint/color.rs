use super::PackedColor;

/// Straight-alpha RGBA color, components in `[0, 1]`.
///
/// This is the caller-facing representation. Vertex data never stores it
/// directly: colors are premultiplied and packed once via [`Color::pack`].
#[derive(Debug, Copy, Clone, Default, PartialEq)]
pub struct Color {
    pub r: f32,
    pub g: f32,
    pub b: f32,
    pub a: f32,
}

impl Color {
    pub const WHITE: Color = Color::new(1.0, 1.0, 1.0, 1.0);
    pub const BLACK: Color = Color::new(0.0, 0.0, 0.0, 1.0);
    pub const TRANSPARENT: Color = Color::new(0.0, 0.0, 0.0, 0.0);

    #[inline]
    pub const fn new(r: f32, g: f32, b: f32, a: f32) -> Self {
        Self { r, g, b, a }
    }

    #[inline]
    pub const fn rgb(r: f32, g: f32, b: f32) -> Self {
        Self::new(r, g, b, 1.0)
    }

    /// Creates a color from straight sRGB bytes (`0`–`255`).
    #[inline]
    pub fn from_u8(r: u8, g: u8, b: u8, a: u8) -> Self {
        Self::new(r as f32 / 255.0, g as f32 / 255.0, b as f32 / 255.0, a as f32 / 255.0)
    }

    /// Creates a color from `0xRRGGBB` with full opacity.
    #[inline]
    pub fn from_hex(rgb: u32) -> Self {
        Self::from_u8((rgb >> 16) as u8, (rgb >> 8) as u8, rgb as u8, 255)
    }

    #[inline]
    pub fn with_alpha(self, a: f32) -> Self {
        Self { a, ..self }
    }

    #[inline]
    pub fn is_finite(self) -> bool {
        self.r.is_finite() && self.g.is_finite() && self.b.is_finite() && self.a.is_finite()
    }

    /// Clamps all channels to `[0, 1]`.
    #[inline]
    pub fn clamped(self) -> Self {
        Self {
            r: self.r.clamp(0.0, 1.0),
            g: self.g.clamp(0.0, 1.0),
            b: self.b.clamp(0.0, 1.0),
            a: self.a.clamp(0.0, 1.0),
        }
    }

    /// Premultiplied components `[r*a, g*a, b*a, a]` after clamping.
    #[inline]
    pub fn premultiplied(self) -> [f32; 4] {
        let c = self.clamped();
        [c.r * c.a, c.g * c.a, c.b * c.a, c.a]
    }

    /// Premultiplies and packs the color, with `alpha` multiplied into `a` first.
    ///
    /// `alpha` is the paint-state alpha; passing `1.0` packs the color as is.
    #[inline]
    pub fn pack(self, alpha: f32) -> PackedColor {
        let a = (self.a * alpha).clamp(0.0, 1.0);
        PackedColor::from_premul(self.with_alpha(a).premultiplied())
    }
}
