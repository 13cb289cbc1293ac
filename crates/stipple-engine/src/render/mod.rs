//! Batch renderer.
//!
//! Conventions:
//! - Geometry is transformed on the CPU into target pixels (top-left origin,
//!   +Y down); shaders only apply the projection uniform.
//! - Vertex colors are packed premultiplied RGBA8.
//! - Render targets are stored bottom-up: their projection, sprite v and mask
//!   v are flipped, and pixel transfers flip rows.

mod buffer;
mod core;
mod ctx;
pub mod graphics;
pub mod mask;
mod paint_state;
pub mod programs;
mod restore;
pub mod shader;
mod shape;
pub mod sprite;
pub mod tessellate;
pub mod triangulate;

pub use buffer::{BatchBuffer, FrozenShape, Need, RunList, StateRun};
pub use self::core::{ContextState, FrameStats, RenderCore};
pub use ctx::FlushCtx;
pub use graphics::{BatchStats, GraphicsBatcher};
pub use mask::MaskCompositor;
pub use paint_state::PaintState;
pub use programs::{GraphicsVertex, ProgramSet, SpriteVertex};
pub use restore::Restorable;
pub use shader::{ShaderId, ShaderManager};
pub use shape::{Shape, ShapeGeometry, ShapeItem};
pub use sprite::{SpriteBatcher, SpriteKey};
pub use tessellate::{Primitive, Tessellator};
