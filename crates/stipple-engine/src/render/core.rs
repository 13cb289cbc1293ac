//! Renderer front: paint state, flush ordering and the context lifecycle.
//!
//! `RenderCore` owns one backend and everything that allocates on it. Draw
//! calls read the current [`PaintState`] and go to one of two batchers. The
//! batchers never interleave inside a submission: a sprite draw flushes
//! pending geometry first and vice versa. Target, clip and mask changes flush
//! both.
//!
//! Context loss is a state transition, not an error:
//!
//! ```text
//! Active --lost--> ContextLost --restored--> Restoring --ok--> Active
//!                       ^                        |
//!                       +--------- error --------+
//! ```
//!
//! While not `Active` draws still run (and shapes still record) but flushes
//! drop their batch without touching the backend.

use log::{debug, info, warn};

use crate::backend::{PixelRect, RenderBackend};
use crate::config::RendererConfig;
use crate::coords::{Matrix, Rect, Vec2, Viewport};
use crate::error::RenderResult;
use crate::paint::{BlendMode, Color};
use crate::texture::Texture;

use super::ctx::FlushCtx;
use super::graphics::{BatchStats, GraphicsBatcher};
use super::mask::MaskCompositor;
use super::paint_state::PaintState;
use super::programs::ProgramSet;
use super::restore::Restorable;
use super::shader::ShaderManager;
use super::shape::Shape;
use super::sprite::SpriteBatcher;
use super::tessellate::Primitive;

/// Lifecycle state of the GPU context.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ContextState {
    Active,
    ContextLost,
    Restoring,
}

/// Counters of both batchers since the last [`RenderCore::begin_frame`].
pub type FrameStats = BatchStats;

/// Immediate-mode renderer over a [`RenderBackend`].
pub struct RenderCore<B: RenderBackend> {
    backend: B,
    config: RendererConfig,
    state: ContextState,

    shaders: ShaderManager,
    programs: ProgramSet,
    graphics: GraphicsBatcher,
    sprites: SpriteBatcher,
    mask: MaskCompositor,
    /// Restored after the built-in owners, in registration order.
    external: Vec<Box<dyn Restorable>>,

    paint: PaintState,
    paint_stack: Vec<PaintState>,

    viewport: Viewport,
    target: Option<Texture>,
    clip: Option<Rect>,

    /// Scratch for pixel transfers.
    pixels: Vec<u8>,
}

impl<B: RenderBackend> std::fmt::Debug for RenderCore<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RenderCore")
            .field("state", &self.state)
            .field("viewport", &self.viewport)
            .field("target", &self.target.as_ref().map(Texture::id))
            .field("clip", &self.clip)
            .field("paint", &self.paint)
            .field("external_restorables", &self.external.len())
            .finish_non_exhaustive()
    }
}

impl<B: RenderBackend> RenderCore<B> {
    /// Compiles the built-in programs and allocates the batch buffers.
    ///
    /// A backend that is already lost yields a core in `ContextLost`; the
    /// first [`Self::on_context_restored`] builds everything.
    pub fn new(mut backend: B, config: RendererConfig) -> RenderResult<Self> {
        let config = config.normalized();
        backend.set_viewport(config.width, config.height);

        let mut shaders = ShaderManager::new();
        let programs = ProgramSet::load(&mut shaders, &mut backend)?;
        let mut graphics = GraphicsBatcher::new(config.graphics_max_vertices, config.tessellator());
        let mut sprites = SpriteBatcher::new(config.sprite_max_sprites);

        let state = if backend.is_context_lost() {
            info!("RenderCore: created on a lost context; waiting for restore");
            ContextState::ContextLost
        } else {
            graphics.restore(&mut backend)?;
            sprites.restore(&mut backend)?;
            ContextState::Active
        };

        let viewport = Viewport::new(config.width as f32, config.height as f32);
        let mut core = Self {
            backend,
            config,
            state,
            shaders,
            programs,
            graphics,
            sprites,
            mask: MaskCompositor::new(),
            external: Vec::new(),
            paint: PaintState::default(),
            paint_stack: Vec::new(),
            viewport,
            target: None,
            clip: None,
            pixels: Vec::new(),
        };
        core.apply_target();
        debug!(
            "RenderCore: {}x{}, {} vertices, {} sprites",
            core.config.width, core.config.height, core.config.graphics_max_vertices, core.config.sprite_max_sprites
        );
        Ok(core)
    }

    // ── accessors ─────────────────────────────────────────────────────────

    #[inline]
    pub fn state(&self) -> ContextState {
        self.state
    }

    #[inline]
    pub fn is_active(&self) -> bool {
        self.state == ContextState::Active
    }

    #[inline]
    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Direct backend access for texture collaborators.
    ///
    /// Commands issued here bypass batching; call [`Self::flush`] first when
    /// ordering against pending draws matters.
    #[inline]
    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    #[inline]
    pub fn config(&self) -> &RendererConfig {
        &self.config
    }

    #[inline]
    pub fn viewport(&self) -> Viewport {
        self.viewport
    }

    #[inline]
    pub fn paint(&self) -> &PaintState {
        &self.paint
    }

    pub fn render_target(&self) -> Option<&Texture> {
        self.target.as_ref()
    }

    #[inline]
    pub fn clip(&self) -> Option<Rect> {
        self.clip
    }

    pub fn mask_texture(&self) -> Option<&Texture> {
        self.mask.texture()
    }

    #[inline]
    pub fn shaders(&self) -> &ShaderManager {
        &self.shaders
    }

    #[inline]
    pub fn programs(&self) -> &ProgramSet {
        &self.programs
    }

    #[inline]
    pub fn graphics(&self) -> &GraphicsBatcher {
        &self.graphics
    }

    #[inline]
    pub fn sprites(&self) -> &SpriteBatcher {
        &self.sprites
    }

    fn parts(&mut self) -> (FlushCtx<'_>, &mut GraphicsBatcher, &mut SpriteBatcher) {
        let active = self.state == ContextState::Active;
        let ctx = FlushCtx::new(&mut self.backend, &mut self.shaders, &self.mask, &self.programs, active);
        (ctx, &mut self.graphics, &mut self.sprites)
    }

    // ── paint state ───────────────────────────────────────────────────────

    pub fn set_transform(&mut self, transform: Matrix) {
        self.paint.transform = transform;
    }

    /// Translates subsequent draws in their local space.
    pub fn translate(&mut self, x: f32, y: f32) {
        self.paint.transform = self.paint.transform.multiply(&Matrix::translation(x, y));
    }

    pub fn scale(&mut self, sx: f32, sy: f32) {
        self.paint.transform = self.paint.transform.multiply(&Matrix::scaling(sx, sy));
    }

    pub fn rotate(&mut self, radians: f32) {
        self.paint.transform = self.paint.transform.multiply(&Matrix::rotation(radians));
    }

    /// Global alpha in `[0, 1]`; NaN counts as fully transparent.
    pub fn set_alpha(&mut self, alpha: f32) {
        self.paint.alpha = if alpha.is_nan() { 0.0 } else { alpha.clamp(0.0, 1.0) };
    }

    pub fn set_blend_mode(&mut self, blend: BlendMode) {
        self.paint.blend = blend;
    }

    pub fn set_fill(&mut self, color: Color) {
        self.paint.fill = color;
    }

    pub fn set_stroke(&mut self, color: Color) {
        self.paint.stroke = color;
    }

    /// Stroke width in local units. Zero disables stroking.
    pub fn set_stroke_width(&mut self, width: f32) {
        self.paint.stroke_width = if width.is_finite() { width.max(0.0) } else { 0.0 };
    }

    /// Pushes the paint state.
    pub fn save(&mut self) {
        self.paint_stack.push(self.paint);
    }

    /// Pops the paint state saved by the matching [`Self::save`].
    ///
    /// Returns `false` (and keeps the current state) if nothing was saved.
    pub fn restore(&mut self) -> bool {
        match self.paint_stack.pop() {
            Some(paint) => {
                self.paint = paint;
                true
            }
            None => {
                warn!("RenderCore: restore without matching save");
                false
            }
        }
    }

    // ── vector drawing ────────────────────────────────────────────────────

    fn draw_primitive(&mut self, prim: Primitive) -> bool {
        let paint = self.paint;
        let (mut ctx, graphics, sprites) = self.parts();
        if !graphics.accepts(&prim, &paint) {
            return false;
        }
        sprites.flush(&mut ctx);
        graphics.draw(&mut ctx, prim, &paint)
    }

    /// Strokes a line segment with the stroke color and width.
    pub fn line(&mut self, x1: f32, y1: f32, x2: f32, y2: f32) -> bool {
        self.draw_primitive(Primitive::Line { from: Vec2::new(x1, y1), to: Vec2::new(x2, y2) })
    }

    pub fn rect(&mut self, x: f32, y: f32, width: f32, height: f32) -> bool {
        self.draw_primitive(Primitive::Rect(Rect::new(x, y, width, height)))
    }

    pub fn circle(&mut self, x: f32, y: f32, radius: f32) -> bool {
        self.draw_primitive(Primitive::Circle { center: Vec2::new(x, y), radius })
    }

    pub fn ellipse(&mut self, x: f32, y: f32, rx: f32, ry: f32) -> bool {
        self.draw_primitive(Primitive::Ellipse { center: Vec2::new(x, y), rx, ry })
    }

    /// Arc from `start` to `end` radians; filled as a pie, stroked as an open band.
    pub fn arc(&mut self, x: f32, y: f32, radius: f32, start: f32, end: f32, anticlockwise: bool) -> bool {
        self.draw_primitive(Primitive::Arc { center: Vec2::new(x, y), radius, start, end, anticlockwise })
    }

    /// Closed polygon through `points`.
    pub fn poly(&mut self, points: &[Vec2]) -> bool {
        self.draw_primitive(Primitive::polygon(points))
    }

    // ── shapes ────────────────────────────────────────────────────────────

    /// Starts recording vector draws into a shape. Draws still render.
    pub fn start_shape(&mut self) -> bool {
        self.graphics.start_shape()
    }

    /// Closes the recording. `None` if none was open or nothing was recorded.
    pub fn end_shape(&mut self) -> Option<Shape> {
        self.graphics.end_shape().filter(|shape| !shape.is_empty())
    }

    /// Replays `shape` under the current transform and alpha.
    pub fn shape(&mut self, shape: &Shape) -> bool {
        let paint = self.paint;
        let (mut ctx, graphics, sprites) = self.parts();
        if !graphics.accepts_shape(shape, &paint) {
            return false;
        }
        sprites.flush(&mut ctx);
        graphics.draw_shape(&mut ctx, shape, &paint)
    }

    // ── sprites ───────────────────────────────────────────────────────────

    /// Draws `frame` of `texture` (normalized, whole texture by default) with
    /// its top-left corner at the local origin, tinted by `tint` (white by
    /// default).
    pub fn texture(&mut self, texture: &Texture, frame: Option<Rect>, tint: Option<Color>) -> bool {
        if self.target.as_ref() == Some(texture) {
            warn!("RenderCore: texture {:?} is the current render target; skipped", texture.id());
            return false;
        }
        if self.state == ContextState::Active && texture.is_ready() && !self.backend.has_texture(texture.id()) {
            debug!("RenderCore: texture {:?} has no backend storage; skipped", texture.id());
            return false;
        }
        let frame = frame.unwrap_or(Rect::UNIT);
        let tint = tint.unwrap_or(Color::WHITE);
        let paint = self.paint;
        let (mut ctx, graphics, sprites) = self.parts();
        if sprites.accepts(texture, frame, tint, &paint) {
            graphics.flush(&mut ctx);
        }
        sprites.draw(&mut ctx, &paint, texture, frame, tint)
    }

    // ── state that forces a flush ─────────────────────────────────────────

    /// Flushes both batchers.
    pub fn flush(&mut self) {
        let (mut ctx, graphics, sprites) = self.parts();
        graphics.flush(&mut ctx);
        sprites.flush(&mut ctx);
    }

    /// Redirects drawing into `target` (`None` for the canvas).
    ///
    /// Returns `false` if `target` is not a render target or is the current
    /// mask texture.
    pub fn set_render_target(&mut self, target: Option<&Texture>) -> bool {
        if let Some(t) = target {
            if !t.is_render_target() {
                warn!("RenderCore: texture {:?} is not a render target", t.id());
                return false;
            }
            if self.mask.texture() == Some(t) {
                warn!("RenderCore: texture {:?} is the current mask; cannot render into it", t.id());
                return false;
            }
        }
        if self.target.as_ref() == target {
            return true;
        }
        self.flush();
        self.target = target.cloned();
        self.apply_target();
        true
    }

    /// Restricts drawing to `clip` in target pixels (`None` disables clipping).
    pub fn set_clip(&mut self, clip: Option<Rect>) {
        let clip = clip.map(Rect::normalized);
        if clip == self.clip {
            return;
        }
        self.flush();
        self.clip = clip;
        self.apply_scissor();
    }

    /// Masks subsequent draws by `frame` (normalized, whole texture by default)
    /// of `texture`, placed with the current transform and faded by the
    /// current alpha. `None` clears the mask.
    ///
    /// Returns whether the mask changed.
    pub fn set_mask(&mut self, texture: Option<&Texture>, frame: Option<Rect>) -> bool {
        if let Some(t) = texture
            && self.target.as_ref() == Some(t)
        {
            warn!("RenderCore: texture {:?} is the current render target; cannot mask with it", t.id());
            return false;
        }
        let frame = frame.unwrap_or(Rect::UNIT);
        let (transform, alpha) = (self.paint.transform, self.paint.alpha);
        if !self.mask.would_change(texture, &transform, frame, alpha) {
            return false;
        }
        self.flush();
        self.mask.set(texture, &transform, frame, alpha)
    }

    /// Resizes the canvas.
    pub fn resize(&mut self, width: u32, height: u32) {
        let (width, height) = (width.max(1), height.max(1));
        if (width, height) == self.viewport.pixel_size() {
            return;
        }
        self.flush();
        self.viewport = Viewport::new(width as f32, height as f32);
        self.config.width = width;
        self.config.height = height;
        if self.state != ContextState::ContextLost {
            self.backend.set_viewport(width, height);
        }
        self.apply_target();
        debug!("RenderCore: resized to {width}x{height}");
    }

    /// Clears the current target after drawing what is pending.
    pub fn clear(&mut self, color: Color) {
        self.flush();
        if self.state == ContextState::Active {
            self.backend.clear(color);
        }
    }

    /// Binds the current target and pushes its projection and scissor.
    fn apply_target(&mut self) {
        let (width, height, flip_y) = match &self.target {
            Some(t) => (t.width() as f32, t.height() as f32, true),
            None => (self.viewport.width, self.viewport.height, false),
        };
        if self.state != ContextState::ContextLost {
            self.backend.set_render_target(self.target.as_ref().map(Texture::id));
        }
        // Shadowed only while lost: programs have no handles.
        self.shaders.set_projection(&mut self.backend, width, height, flip_y);
        self.apply_scissor();
    }

    fn apply_scissor(&mut self) {
        if self.state == ContextState::ContextLost {
            return;
        }
        let (width, height) = self.target_size();
        let bottom_up = self.target.is_some();
        let rect = self.clip.map(|clip| scissor_rect(clip, width, height, bottom_up));
        self.backend.set_scissor(rect);
    }

    fn target_size(&self) -> (u32, u32) {
        match &self.target {
            Some(t) => (t.width(), t.height()),
            None => self.viewport.pixel_size(),
        }
    }

    // ── frames ────────────────────────────────────────────────────────────

    /// Picks up a context loss reported by the backend and resets frame stats.
    pub fn begin_frame(&mut self) {
        self.poll_context();
        self.graphics.take_stats();
        self.sprites.take_stats();
    }

    /// Flushes both batchers and returns the frame's counters.
    pub fn end_frame(&mut self) -> FrameStats {
        self.flush();
        self.stats()
    }

    /// Counters since [`Self::begin_frame`].
    pub fn stats(&self) -> FrameStats {
        let mut stats = self.graphics.stats();
        stats += self.sprites.stats();
        stats
    }

    // ── context lifecycle ─────────────────────────────────────────────────

    /// Registers an owner of backend resources to be rebuilt after context loss.
    ///
    /// External owners are invalidated and restored after the renderer's own
    /// resources, in registration order.
    pub fn register_restorable(&mut self, restorable: Box<dyn Restorable>) {
        self.external.push(restorable);
    }

    /// Turns a loss reported by the backend into the `ContextLost` transition.
    pub fn poll_context(&mut self) -> ContextState {
        if self.state == ContextState::Active && self.backend.is_context_lost() {
            self.on_context_lost();
        }
        self.state
    }

    /// Drops pending batches and every backend handle.
    pub fn on_context_lost(&mut self) {
        if self.state == ContextState::ContextLost {
            return;
        }
        info!("RenderCore: GPU context lost");
        self.graphics.reset();
        self.sprites.reset();

        self.shaders.invalidate();
        self.graphics.invalidate();
        self.sprites.invalidate();
        self.mask.invalidate();
        for restorable in &mut self.external {
            restorable.invalidate();
        }
        self.state = ContextState::ContextLost;
    }

    /// Rebuilds every resource on a fresh context.
    ///
    /// On error the core stays in `ContextLost` and the call may be retried.
    pub fn on_context_restored(&mut self) -> RenderResult<()> {
        if self.state == ContextState::Active {
            debug!("RenderCore: restore requested while active; ignored");
            return Ok(());
        }
        self.state = ContextState::Restoring;
        info!("RenderCore: restoring GPU context");
        match self.restore_all() {
            Ok(()) => {
                self.state = ContextState::Active;
                info!("RenderCore: GPU context restored");
                Ok(())
            }
            Err(err) => {
                warn!("RenderCore: restore failed: {err}");
                self.state = ContextState::ContextLost;
                Err(err)
            }
        }
    }

    fn restore_all(&mut self) -> RenderResult<()> {
        self.backend.reset_context()?;
        let (width, height) = self.viewport.pixel_size();
        self.backend.set_viewport(width, height);

        self.shaders.restore(&mut self.backend)?;
        self.graphics.restore(&mut self.backend)?;
        self.sprites.restore(&mut self.backend)?;
        self.mask.restore(&mut self.backend)?;
        for restorable in &mut self.external {
            restorable.restore(&mut self.backend)?;
        }

        if let Some(t) = &self.target
            && !self.backend.has_texture(t.id())
        {
            warn!("RenderCore: render target {:?} was not restored; drawing to the canvas", t.id());
            self.target = None;
        }
        self.apply_target();
        Ok(())
    }

    // ── pixel access ──────────────────────────────────────────────────────

    /// Reads a block of pixels from `source` (the canvas when `None`).
    ///
    /// Rows are top-down RGBA8 regardless of how the target is stored.
    /// Pending draws are flushed first. `None` for empty or out-of-bounds
    /// rects, or while the context is not active.
    pub fn get_pixels(&mut self, source: Option<&Texture>, x: u32, y: u32, width: u32, height: u32) -> Option<&[u8]> {
        self.flush();
        if self.state != ContextState::Active {
            debug!("RenderCore: get_pixels while the context is not active");
            return None;
        }
        let (rect, bottom_up) = self.pixel_rect(source, x, y, width, height)?;
        let id = source.map(Texture::id);
        if let Err(err) = self.backend.read_pixels(id, rect, &mut self.pixels) {
            warn!("RenderCore: pixel read failed: {err}");
            return None;
        }
        if bottom_up {
            flip_rows(&mut self.pixels, width as usize * 4);
        }
        Some(&self.pixels)
    }

    /// Writes a block of top-down RGBA8 pixels into `target` (the canvas when `None`).
    ///
    /// Returns `false` if `data` does not hold exactly `width * height`
    /// pixels, the rect is empty or out of bounds, or the context is not
    /// active.
    pub fn set_pixels(
        &mut self,
        target: Option<&Texture>,
        x: u32,
        y: u32,
        width: u32,
        height: u32,
        data: &[u8],
    ) -> bool {
        let expected = width as usize * height as usize * 4;
        if data.len() != expected {
            debug!("RenderCore: set_pixels got {} bytes, expected {expected}", data.len());
            return false;
        }
        self.flush();
        if self.state != ContextState::Active {
            return false;
        }
        let Some((rect, bottom_up)) = self.pixel_rect(target, x, y, width, height) else {
            return false;
        };
        let id = target.map(Texture::id);
        let result = if bottom_up {
            self.pixels.clear();
            self.pixels.extend_from_slice(data);
            flip_rows(&mut self.pixels, width as usize * 4);
            self.backend.write_pixels(id, rect, &self.pixels)
        } else {
            self.backend.write_pixels(id, rect, data)
        };
        match result {
            Ok(()) => true,
            Err(err) => {
                warn!("RenderCore: pixel write failed: {err}");
                false
            }
        }
    }

    /// Storage rect for a top-down request, and whether storage is bottom-up.
    fn pixel_rect(&self, texture: Option<&Texture>, x: u32, y: u32, width: u32, height: u32) -> Option<(PixelRect, bool)> {
        let (tw, th, bottom_up) = match texture {
            Some(t) => (t.width(), t.height(), t.is_render_target()),
            None => {
                let (w, h) = self.viewport.pixel_size();
                (w, h, false)
            }
        };
        let rect = PixelRect::new(x, y, width, height);
        if rect.is_empty() || !rect.fits(tw, th) {
            debug!("RenderCore: pixel rect {rect:?} outside {tw}x{th}");
            return None;
        }
        let rect = if bottom_up { PixelRect::new(x, th - y - height, width, height) } else { rect };
        Some((rect, bottom_up))
    }
}

/// Scissor for a clip rect in target pixels, clamped to the target.
///
/// A clip that misses the target yields an empty rect, which discards draws.
fn scissor_rect(clip: Rect, width: u32, height: u32, bottom_up: bool) -> PixelRect {
    let clamp = |v: f32, max: u32| (v.max(0.0) as u32).min(max);
    let x0 = clamp(clip.origin.x.floor(), width);
    let y0 = clamp(clip.origin.y.floor(), height);
    let x1 = clamp((clip.origin.x + clip.size.x).ceil(), width);
    let y1 = clamp((clip.origin.y + clip.size.y).ceil(), height);
    let (w, h) = (x1.saturating_sub(x0), y1.saturating_sub(y0));
    let y = if bottom_up { height - y0 - h } else { y0 };
    PixelRect::new(x0, y, w, h)
}

/// Reverses the row order of a tightly packed image in place.
fn flip_rows(data: &mut [u8], row_bytes: usize) {
    if row_bytes == 0 {
        return;
    }
    let rows = data.len() / row_bytes;
    for i in 0..rows / 2 {
        let (top, bottom) = data.split_at_mut((rows - 1 - i) * row_bytes);
        top[i * row_bytes..(i + 1) * row_bytes].swap_with_slice(&mut bottom[..row_bytes]);
    }
}
