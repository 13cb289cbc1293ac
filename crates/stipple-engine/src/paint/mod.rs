//! Paint model shared between the draw API and the batchers.
//!
//! Scope:
//! - straight-alpha colors as set by callers (`Color`)
//! - the packed premultiplied vertex color (`PackedColor`)
//! - blend modes, the only per-draw GPU state besides textures

pub mod blend;
pub mod color;
pub mod packed;

pub use blend::BlendMode;
pub use color::Color;
pub use packed::PackedColor;
