//! Live renderers owned by the application root.
//!
//! The window glue forwards context events here instead of reaching each
//! renderer through global state.

use log::warn;

use crate::backend::RenderBackend;
use crate::error::RenderError;
use crate::render::RenderCore;

/// Handle of a registered renderer. Never reused within one registry.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RendererId(u32);

/// Ordered set of render instances.
#[derive(Debug)]
pub struct RendererRegistry<B: RenderBackend> {
    entries: Vec<(RendererId, RenderCore<B>)>,
    next_id: u32,
}

impl<B: RenderBackend> Default for RendererRegistry<B> {
    fn default() -> Self {
        Self { entries: Vec::new(), next_id: 0 }
    }
}

impl<B: RenderBackend> RendererRegistry<B> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, core: RenderCore<B>) -> RendererId {
        let id = RendererId(self.next_id);
        self.next_id += 1;
        self.entries.push((id, core));
        id
    }

    pub fn get(&self, id: RendererId) -> Option<&RenderCore<B>> {
        self.entries.iter().find(|(i, _)| *i == id).map(|(_, c)| c)
    }

    pub fn get_mut(&mut self, id: RendererId) -> Option<&mut RenderCore<B>> {
        self.entries.iter_mut().find(|(i, _)| *i == id).map(|(_, c)| c)
    }

    /// Unregisters and returns the renderer.
    pub fn remove(&mut self, id: RendererId) -> Option<RenderCore<B>> {
        let at = self.entries.iter().position(|(i, _)| *i == id)?;
        Some(self.entries.remove(at).1)
    }

    /// Renderers in registration order.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = (RendererId, &mut RenderCore<B>)> {
        self.entries.iter_mut().map(|(id, core)| (*id, core))
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn notify_context_lost(&mut self) {
        for (_, core) in &mut self.entries {
            core.on_context_lost();
        }
    }

    /// Restores every renderer; one failure does not stop the others.
    ///
    /// Returns the renderers that failed, which stay in `ContextLost`.
    pub fn notify_context_restored(&mut self) -> Vec<(RendererId, RenderError)> {
        let mut failed = Vec::new();
        for (id, core) in &mut self.entries {
            if let Err(err) = core.on_context_restored() {
                warn!("RendererRegistry: renderer {id:?} not restored: {err}");
                failed.push((*id, err));
            }
        }
        failed
    }
}
