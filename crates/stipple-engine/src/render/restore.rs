use crate::backend::RenderBackend;
use crate::error::RenderResult;

/// Owner of GPU resources that must survive context loss.
///
/// On loss every owner forgets its handles (`invalidate`); on restore the
/// renderer calls `restore` on each owner in a fixed order, so programs
/// exist before the buffers that are bound to them.
pub trait Restorable {
    /// Drops every backend handle without touching the backend.
    fn invalidate(&mut self);

    /// Re-creates backend resources on a fresh context.
    fn restore(&mut self, backend: &mut dyn RenderBackend) -> RenderResult<()>;
}
