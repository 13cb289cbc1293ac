use crate::render::graphics::DEFAULT_MAX_VERTICES;
use crate::render::sprite::{DEFAULT_MAX_SPRITES, MAX_SPRITES};
use crate::render::tessellate::{CURVE_SMOOTHING, MITER_LIMIT, Tessellator};

/// Construction parameters for a [`crate::render::RenderCore`].
///
/// Defaults match a typical interactive canvas. Capacities are clamped by
/// [`RendererConfig::normalized`] to what 16-bit indices can address.
#[derive(Debug, Clone, PartialEq)]
pub struct RendererConfig {
    /// Vertex capacity of the graphics batch. Index capacity is three times this.
    pub graphics_max_vertices: usize,

    /// Quad capacity of the sprite batch.
    pub sprite_max_sprites: usize,

    /// Curve segment factor; segments grow with the square root of the radius.
    pub curve_smoothing: f32,

    /// Miter length limit in half stroke widths before a joint is beveled.
    pub miter_limit: f32,

    /// Initial viewport size in pixels.
    pub width: u32,
    pub height: u32,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            graphics_max_vertices: DEFAULT_MAX_VERTICES,
            sprite_max_sprites: DEFAULT_MAX_SPRITES,
            curve_smoothing: CURVE_SMOOTHING,
            miter_limit: MITER_LIMIT,
            width: 800,
            height: 600,
        }
    }
}

impl RendererConfig {
    pub fn with_size(width: u32, height: u32) -> Self {
        Self { width, height, ..Self::default() }
    }

    /// Copy with every field forced into its usable range.
    pub fn normalized(&self) -> Self {
        let finite_or = |v: f32, default: f32| if v.is_finite() && v > 0.0 { v } else { default };
        Self {
            // A quad and its six indices must always fit.
            graphics_max_vertices: self.graphics_max_vertices.clamp(4, u16::MAX as usize + 1),
            sprite_max_sprites: self.sprite_max_sprites.clamp(1, MAX_SPRITES),
            curve_smoothing: finite_or(self.curve_smoothing, CURVE_SMOOTHING),
            miter_limit: finite_or(self.miter_limit, MITER_LIMIT).max(1.0),
            width: self.width.max(1),
            height: self.height.max(1),
        }
    }

    pub(crate) fn tessellator(&self) -> Tessellator {
        Tessellator::new(self.curve_smoothing, self.miter_limit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_batch_capacities() {
        let c = RendererConfig::default();
        assert_eq!(c.graphics_max_vertices, 6000);
        assert_eq!(c.sprite_max_sprites, 2000);
        assert_eq!(c.curve_smoothing, 4.0);
        assert_eq!(c.normalized(), c);
    }

    #[test]
    fn normalized_clamps_out_of_range_values() {
        let c = RendererConfig {
            graphics_max_vertices: 1_000_000,
            sprite_max_sprites: 0,
            curve_smoothing: f32::NAN,
            miter_limit: 0.5,
            width: 0,
            height: 10,
        }
        .normalized();
        assert_eq!(c.graphics_max_vertices, 65536);
        assert_eq!(c.sprite_max_sprites, 1);
        assert_eq!(c.curve_smoothing, CURVE_SMOOTHING);
        assert_eq!(c.miter_limit, 1.0);
        assert_eq!((c.width, c.height), (1, 10));
    }
}
