//! Texture references.
//!
//! Textures are owned by the texture-management collaborator (image loading,
//! atlas packing, render-target pools). The renderer only ever holds a
//! [`Texture`] reference and checks [`Texture::is_ready`] before each draw.
//! Backend-specific data lives in the backend's side-table keyed by
//! [`TextureId`].

use std::cell::Cell;
use std::rc::Rc;
use std::sync::atomic::{AtomicU32, Ordering};

static NEXT_TEXTURE_ID: AtomicU32 = AtomicU32::new(1);

/// Stable texture identity; survives context loss.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TextureId(pub u32);

impl TextureId {
    fn next() -> Self {
        TextureId(NEXT_TEXTURE_ID.fetch_add(1, Ordering::Relaxed))
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum TextureKind {
    /// Sampled image, stored top-down.
    Image,
    /// Offscreen render target, stored bottom-up; sampling flips v.
    RenderTarget,
}

/// Cheap, clonable reference to a collaborator-owned texture.
///
/// Clones share the readiness flag, so the owner can mark a texture as not
/// ready (unloaded, lost with the context) and every holder observes it.
#[derive(Debug, Clone)]
pub struct Texture {
    id: TextureId,
    width: u32,
    height: u32,
    kind: TextureKind,
    ready: Rc<Cell<bool>>,
}

impl Texture {
    /// Creates a reference with a fresh id. The texture starts not ready.
    pub fn new(width: u32, height: u32, kind: TextureKind) -> Self {
        Self {
            id: TextureId::next(),
            width: width.max(1),
            height: height.max(1),
            kind,
            ready: Rc::new(Cell::new(false)),
        }
    }

    #[inline]
    pub fn id(&self) -> TextureId {
        self.id
    }

    #[inline]
    pub fn width(&self) -> u32 {
        self.width
    }

    #[inline]
    pub fn height(&self) -> u32 {
        self.height
    }

    #[inline]
    pub fn kind(&self) -> TextureKind {
        self.kind
    }

    #[inline]
    pub fn is_render_target(&self) -> bool {
        self.kind == TextureKind::RenderTarget
    }

    #[inline]
    pub fn is_ready(&self) -> bool {
        self.ready.get()
    }

    #[inline]
    pub fn set_ready(&self, ready: bool) {
        self.ready.set(ready);
    }

    #[inline]
    pub fn is_power_of_two(&self) -> bool {
        self.width.is_power_of_two() && self.height.is_power_of_two()
    }

    /// Byte length of a tightly packed RGBA8 image of this texture's size.
    #[inline]
    pub fn byte_len(&self) -> usize {
        self.width as usize * self.height as usize * 4
    }
}

impl PartialEq for Texture {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Texture {}
