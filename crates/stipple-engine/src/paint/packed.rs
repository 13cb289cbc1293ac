use bytemuck::{Pod, Zeroable};

/// Premultiplied RGBA8 color packed into one `u32`.
///
/// Byte order in memory is R, G, B, A (little-endian `r | g << 8 | b << 16 | a << 24`),
/// which the vertex layout reads as `Unorm8x4`.
///
/// Invariant: the value is always premultiplied. There is no way back to
/// straight alpha; re-tinting means packing a new [`super::Color`].
#[repr(transparent)]
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Hash, Pod, Zeroable)]
pub struct PackedColor(pub u32);

impl PackedColor {
    pub const TRANSPARENT: PackedColor = PackedColor(0);

    #[inline]
    fn quantize(v: f32) -> u32 {
        (v.clamp(0.0, 1.0) * 255.0).round() as u32
    }

    /// Packs already premultiplied components.
    #[inline]
    pub fn from_premul([r, g, b, a]: [f32; 4]) -> Self {
        PackedColor(
            Self::quantize(r)
                | (Self::quantize(g) << 8)
                | (Self::quantize(b) << 16)
                | (Self::quantize(a) << 24),
        )
    }

    /// Premultiplied components in `[0, 1]`.
    #[inline]
    pub fn unpack(self) -> [f32; 4] {
        let v = self.0;
        [
            (v & 0xff) as f32 / 255.0,
            ((v >> 8) & 0xff) as f32 / 255.0,
            ((v >> 16) & 0xff) as f32 / 255.0,
            (v >> 24) as f32 / 255.0,
        ]
    }

    #[inline]
    pub fn alpha(self) -> u8 {
        (self.0 >> 24) as u8
    }

    /// Multiplies every channel by `alpha`.
    ///
    /// Because the color is premultiplied, fading it means scaling RGB and A alike.
    #[inline]
    pub fn scale_alpha(self, alpha: f32) -> Self {
        if alpha >= 1.0 {
            return self;
        }
        let [r, g, b, a] = self.unpack();
        let k = alpha.max(0.0);
        Self::from_premul([r * k, g * k, b * k, a * k])
    }
}
