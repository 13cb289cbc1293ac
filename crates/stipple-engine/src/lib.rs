//! stipple engine crate.
//!
//! Immediate-mode 2D drawing on the GPU: vector primitives, textured sprites
//! and recorded shapes, batched into as few draw submissions as blend modes,
//! textures and masks allow.
//!
//! Entry point is [`render::RenderCore`], generic over a [`backend::RenderBackend`]:
//! [`backend::WgpuBackend`] for real rendering, [`backend::RecordingBackend`]
//! for tests and command inspection.

pub mod backend;
pub mod config;
pub mod coords;
pub mod error;
pub mod logging;
pub mod paint;
pub mod registry;
pub mod render;
pub mod texture;

pub use config::RendererConfig;
pub use error::{RenderError, RenderResult};
pub use registry::{RendererId, RendererRegistry};
pub use render::{ContextState, FrameStats, RenderCore, Shape};
