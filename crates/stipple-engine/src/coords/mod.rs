//! Coordinate and geometry types shared by the batchers and the backend.
//!
//! Canonical CPU space:
//! - Logical pixels
//! - Origin top-left
//! - +X right, +Y down
//!
//! Batchers transform geometry on the CPU; shaders only map pixels to NDC
//! through the projection uniform.

mod matrix;
mod rect;
mod vec2;
mod viewport;

pub use matrix::Matrix;
pub use rect::Rect;
pub use vec2::Vec2;
pub use viewport::Viewport;
