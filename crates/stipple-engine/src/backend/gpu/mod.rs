//! wgpu implementation of [`RenderBackend`].
//!
//! Design:
//! - the device is headless; the default target is an owned canvas texture
//!   that window glue copies or samples for presentation
//! - state-setting calls only update [`DrawState`]; `draw_elements` snapshots it
//!   into a [`DrawOp`]
//! - `submit` uploads dirty uniform blocks, builds missing pipelines, and
//!   encodes one render pass per consecutive render target
//!
//! Uniform blocks are latched at submit time: the batchers set uniforms once
//! per flush and submit at the end of it, which matches this model.

mod init;
mod program;
mod readback;

pub use init::WgpuInit;

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Context, Result};

use crate::error::{RenderError, RenderResult};
use crate::paint::{BlendMode, Color};
use crate::texture::{Texture, TextureId};

use super::{BufferId, BufferKind, PixelRect, ProgramId, ProgramLayout, RenderBackend, VertexBinding};
use program::{GpuProgram, TARGET_FORMAT};

const MAX_TEXTURE_UNITS: usize = 4;

struct GpuBuffer {
    buffer: wgpu::Buffer,
}

struct GpuTexture {
    texture: wgpu::Texture,
    view: wgpu::TextureView,
    bind_group: wgpu::BindGroup,
    width: u32,
    height: u32,
}

/// Pipeline state captured by the next `draw_elements`.
#[derive(Debug, Clone, Copy, Default)]
struct DrawState {
    program: Option<ProgramId>,
    binding: Option<VertexBinding>,
    blend: BlendMode,
    scissor: Option<PixelRect>,
    target: Option<TextureId>,
    units: [Option<TextureId>; MAX_TEXTURE_UNITS],
}

#[derive(Debug, Clone, Copy)]
struct DrawOp {
    state: DrawState,
    program: ProgramId,
    binding: VertexBinding,
    first_index: u32,
    index_count: u32,
}

/// Device-lifetime objects shared by every program and texture.
struct DeviceObjects {
    device: wgpu::Device,
    queue: wgpu::Queue,
    texture_bgl: wgpu::BindGroupLayout,
    sampler: wgpu::Sampler,
}

pub struct WgpuBackend {
    init: WgpuInit,
    instance: wgpu::Instance,
    objects: DeviceObjects,
    lost: Arc<AtomicBool>,

    canvas: GpuTexture,
    programs: HashMap<ProgramId, GpuProgram>,
    buffers: HashMap<BufferId, GpuBuffer>,
    textures: HashMap<TextureId, GpuTexture>,

    state: DrawState,
    pending: Vec<DrawOp>,
    next_id: u32,
}

impl WgpuBackend {
    /// Creates a headless backend with a `width x height` canvas.
    ///
    /// Adapter/device acquisition is asynchronous under wgpu.
    pub async fn new(init: WgpuInit, width: u32, height: u32) -> Result<Self> {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: init.backends,
            ..Default::default()
        });

        let lost = Arc::new(AtomicBool::new(false));
        let objects = DeviceObjects::acquire(&instance, &init, &lost).await?;
        let canvas = objects.create_texture("stipple canvas", width.max(1), height.max(1));

        log::info!("wgpu backend ready ({}x{})", canvas.width, canvas.height);

        Ok(Self {
            init,
            instance,
            objects,
            lost,
            canvas,
            programs: HashMap::new(),
            buffers: HashMap::new(),
            textures: HashMap::new(),
            state: DrawState::default(),
            pending: Vec::new(),
            next_id: 1,
        })
    }

    /// Blocking variant of [`Self::new`].
    pub fn new_blocking(init: WgpuInit, width: u32, height: u32) -> Result<Self> {
        pollster::block_on(Self::new(init, width, height))
    }

    pub fn device(&self) -> &wgpu::Device {
        &self.objects.device
    }

    pub fn queue(&self) -> &wgpu::Queue {
        &self.objects.queue
    }

    /// The default render target. Window glue presents from here.
    pub fn canvas_texture(&self) -> &wgpu::Texture {
        &self.canvas.texture
    }

    pub fn canvas_view(&self) -> &wgpu::TextureView {
        &self.canvas.view
    }

    fn alloc_id(&mut self) -> u32 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn target(&self, id: Option<TextureId>) -> Option<&GpuTexture> {
        match id {
            None => Some(&self.canvas),
            Some(id) => self.textures.get(&id),
        }
    }

    fn encode_pending(&mut self, ops: &[DrawOp]) {
        let objects = &self.objects;

        for op in ops {
            if let Some(program) = self.programs.get_mut(&op.program) {
                program.ensure_pipeline(&objects.device, op.state.blend);
                program.upload_uniforms(&objects.queue);
            }
        }

        let mut encoder = objects.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("stipple flush encoder"),
        });

        for group in ops.chunk_by(|a, b| a.state.target == b.state.target) {
            let target_id = group[0].state.target;
            let Some(target) = self.target(target_id) else {
                log::debug!("render target {target_id:?} is gone; dropping {} draws", group.len());
                continue;
            };

            let mut rpass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("stipple batch pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &target.view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Load,
                        store: wgpu::StoreOp::Store,
                    },
                    depth_slice: None,
                })],
                depth_stencil_attachment: None,
                timestamp_writes: None,
                occlusion_query_set: None,
                multiview_mask: None,
            });

            'ops: for op in group {
                let Some(program) = self.programs.get(&op.program) else { continue };
                let Some(pipeline) = program.pipeline(op.state.blend) else { continue };
                let Some(vbo) = self.buffers.get(&op.binding.vertex_buffer) else { continue };
                let Some(ibo) = self.buffers.get(&op.binding.index_buffer) else { continue };
                let Some((sx, sy, sw, sh)) =
                    clamp_scissor(op.state.scissor, target.width, target.height)
                else {
                    continue;
                };

                rpass.set_pipeline(pipeline);
                rpass.set_bind_group(0, program.uniform_bind_group(), &[]);
                for unit in 0..program.texture_units() as usize {
                    let bound = op.state.units.get(unit).copied().flatten();
                    let Some(texture) = bound.and_then(|id| self.textures.get(&id)) else {
                        log::debug!("texture unit {unit} is unbound; skipping draw");
                        continue 'ops;
                    };
                    rpass.set_bind_group(1 + unit as u32, &texture.bind_group, &[]);
                }
                rpass.set_vertex_buffer(0, vbo.buffer.slice(..));
                rpass.set_index_buffer(ibo.buffer.slice(..), wgpu::IndexFormat::Uint16);
                rpass.set_scissor_rect(sx, sy, sw, sh);
                rpass.draw_indexed(op.first_index..op.first_index + op.index_count, 0, 0..1);
            }
        }

        objects.queue.submit(std::iter::once(encoder.finish()));
    }
}

/// Clamps a pixel scissor rect to the target.
///
/// Returns `None` if the result is zero-area (the draw must be skipped).
/// `None` input means "no scissor" and yields the full target.
fn clamp_scissor(rect: Option<PixelRect>, width: u32, height: u32) -> Option<(u32, u32, u32, u32)> {
    let (x, y, w, h) = match rect {
        None => (0, 0, width, height),
        Some(r) => {
            let x = r.x.min(width);
            let y = r.y.min(height);
            let x2 = r.x.saturating_add(r.width).min(width);
            let y2 = r.y.saturating_add(r.height).min(height);
            (x, y, x2 - x, y2 - y)
        }
    };

    if w == 0 || h == 0 { None } else { Some((x, y, w, h)) }
}

impl DeviceObjects {
    async fn acquire(
        instance: &wgpu::Instance,
        init: &WgpuInit,
        lost: &Arc<AtomicBool>,
    ) -> Result<Self> {
        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: init.power_preference,
                compatible_surface: None,
                force_fallback_adapter: init.force_fallback_adapter,
            })
            .await
            .context("failed to find a suitable GPU adapter")?;

        let (device, queue) = adapter
            .request_device(&wgpu::DeviceDescriptor {
                label: Some("stipple device"),
                required_features: init.required_features,
                required_limits: init.required_limits.clone(),
                experimental_features: wgpu::ExperimentalFeatures::disabled(),
                memory_hints: wgpu::MemoryHints::Performance,
                trace: wgpu::Trace::Off,
            })
            .await
            .context("failed to create wgpu device/queue")?;

        let flag = Arc::clone(lost);
        device.set_device_lost_callback(move |reason, message| {
            log::warn!("GPU device lost ({reason:?}): {message}");
            flag.store(true, Ordering::SeqCst);
        });
        device.on_uncaptured_error(Arc::new(|error: wgpu::Error| {
            log::error!("wgpu error: {error}");
        }));

        let texture_bgl = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("stipple texture bgl"),
            entries: &[
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Texture {
                        sample_type: wgpu::TextureSampleType::Float { filterable: true },
                        view_dimension: wgpu::TextureViewDimension::D2,
                        multisampled: false,
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 1,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                    count: None,
                },
            ],
        });

        // Repeat addressing: tiling frames on power-of-two textures wrap.
        let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("stipple sampler"),
            address_mode_u: wgpu::AddressMode::Repeat,
            address_mode_v: wgpu::AddressMode::Repeat,
            address_mode_w: wgpu::AddressMode::ClampToEdge,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            ..Default::default()
        });

        Ok(Self { device, queue, texture_bgl, sampler })
    }

    fn create_texture(&self, label: &str, width: u32, height: u32) -> GpuTexture {
        let texture = self.device.create_texture(&wgpu::TextureDescriptor {
            label: Some(label),
            size: wgpu::Extent3d { width, height, depth_or_array_layers: 1 },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: TARGET_FORMAT,
            usage: wgpu::TextureUsages::TEXTURE_BINDING
                | wgpu::TextureUsages::RENDER_ATTACHMENT
                | wgpu::TextureUsages::COPY_SRC
                | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("stipple texture bind group"),
            layout: &self.texture_bgl,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::TextureView(&view),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::Sampler(&self.sampler),
                },
            ],
        });
        GpuTexture { texture, view, bind_group, width, height }
    }
}

impl RenderBackend for WgpuBackend {
    fn is_context_lost(&self) -> bool {
        self.lost.load(Ordering::SeqCst)
    }

    fn reset_context(&mut self) -> RenderResult<()> {
        let objects = pollster::block_on(DeviceObjects::acquire(&self.instance, &self.init, &self.lost))
            .map_err(|e| RenderError::Backend(format!("{e:#}")))?;

        let (width, height) = (self.canvas.width, self.canvas.height);
        self.canvas = objects.create_texture("stipple canvas", width, height);
        self.objects = objects;
        self.programs.clear();
        self.buffers.clear();
        self.textures.clear();
        self.pending.clear();
        self.state = DrawState::default();
        self.lost.store(false, Ordering::SeqCst);

        log::info!("wgpu context re-acquired");
        Ok(())
    }

    fn set_viewport(&mut self, width: u32, height: u32) {
        let (width, height) = (width.max(1), height.max(1));
        if (width, height) == (self.canvas.width, self.canvas.height) {
            return;
        }
        self.submit();
        self.canvas = self.objects.create_texture("stipple canvas", width, height);
    }

    fn compile_program(&mut self, layout: &ProgramLayout<'_>) -> RenderResult<ProgramId> {
        if self.is_context_lost() {
            return Err(RenderError::ContextLost);
        }
        let program = GpuProgram::new(&self.objects.device, layout, &self.objects.texture_bgl)?;
        let id = ProgramId(self.alloc_id());
        self.programs.insert(id, program);
        Ok(id)
    }

    fn delete_program(&mut self, program: ProgramId) {
        self.programs.remove(&program);
    }

    fn create_buffer(&mut self, kind: BufferKind, size: usize) -> RenderResult<BufferId> {
        if self.is_context_lost() {
            return Err(RenderError::ContextLost);
        }
        let usage = match kind {
            BufferKind::Vertex => wgpu::BufferUsages::VERTEX,
            BufferKind::Index => wgpu::BufferUsages::INDEX,
        };
        let buffer = self.objects.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(match kind {
                BufferKind::Vertex => "stipple vbo",
                BufferKind::Index => "stipple ibo",
            }),
            // wgpu requires COPY_BUFFER_ALIGNMENT-sized writes.
            size: (size as u64).next_multiple_of(wgpu::COPY_BUFFER_ALIGNMENT),
            usage: usage | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let id = BufferId(self.alloc_id());
        self.buffers.insert(id, GpuBuffer { buffer });
        Ok(id)
    }

    fn delete_buffer(&mut self, buffer: BufferId) {
        self.buffers.remove(&buffer);
    }

    fn write_buffer(&mut self, buffer: BufferId, offset: usize, data: &[u8]) {
        let Some(gpu) = self.buffers.get(&buffer) else { return };
        // Writes must be 4-byte multiples; u16 index uploads can be odd-length.
        if data.len() % wgpu::COPY_BUFFER_ALIGNMENT as usize == 0 {
            self.objects.queue.write_buffer(&gpu.buffer, offset as u64, data);
        } else {
            let mut padded = data.to_vec();
            padded.resize(data.len().next_multiple_of(wgpu::COPY_BUFFER_ALIGNMENT as usize), 0);
            self.objects.queue.write_buffer(&gpu.buffer, offset as u64, &padded);
        }
    }

    fn use_program(&mut self, program: ProgramId, binding: &VertexBinding) {
        self.state.program = Some(program);
        self.state.binding = Some(*binding);
    }

    fn set_uniform(&mut self, program: ProgramId, offset: usize, values: &[f32]) {
        if let Some(p) = self.programs.get_mut(&program) {
            p.write_uniform(offset, values);
        }
    }

    fn bind_texture(&mut self, unit: u32, texture: TextureId) {
        if let Some(slot) = self.state.units.get_mut(unit as usize) {
            *slot = Some(texture);
        }
    }

    fn set_blend_mode(&mut self, mode: BlendMode) {
        self.state.blend = mode;
    }

    fn set_scissor(&mut self, rect: Option<PixelRect>) {
        self.state.scissor = rect;
    }

    fn set_render_target(&mut self, target: Option<TextureId>) {
        self.state.target = target;
    }

    fn draw_elements(&mut self, first_index: u32, index_count: u32) {
        let (Some(program), Some(binding)) = (self.state.program, self.state.binding) else {
            log::debug!("draw_elements without a program in use; ignored");
            return;
        };
        self.pending.push(DrawOp {
            state: self.state,
            program,
            binding,
            first_index,
            index_count,
        });
    }

    fn submit(&mut self) {
        if self.pending.is_empty() {
            return;
        }
        let ops = std::mem::take(&mut self.pending);
        if !self.is_context_lost() {
            self.encode_pending(&ops);
        }
        // Keep the allocation for the next batch.
        self.pending = ops;
        self.pending.clear();
    }

    fn clear(&mut self, color: Color) {
        self.submit();
        let Some(target) = self.target(self.state.target) else { return };
        let [r, g, b, a] = color.premultiplied();

        let mut encoder = self.objects.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("stipple clear encoder"),
        });
        {
            let _rpass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("stipple clear"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &target.view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(wgpu::Color {
                            r: r as f64,
                            g: g as f64,
                            b: b as f64,
                            a: a as f64,
                        }),
                        store: wgpu::StoreOp::Store,
                    },
                    depth_slice: None,
                })],
                depth_stencil_attachment: None,
                timestamp_writes: None,
                occlusion_query_set: None,
                multiview_mask: None,
            });
        }
        self.objects.queue.submit(std::iter::once(encoder.finish()));
    }

    fn has_texture(&self, texture: TextureId) -> bool {
        self.textures.contains_key(&texture)
    }

    fn create_texture(&mut self, texture: &Texture, pixels: Option<&[u8]>) -> RenderResult<()> {
        if self.is_context_lost() {
            return Err(RenderError::ContextLost);
        }
        if let Some(pixels) = pixels {
            if pixels.len() != texture.byte_len() {
                return Err(RenderError::Backend(format!(
                    "texture upload of {} bytes for {}x{}",
                    pixels.len(),
                    texture.width(),
                    texture.height()
                )));
            }
        }
        let gpu = self.objects.create_texture("stipple texture", texture.width(), texture.height());
        if let Some(pixels) = pixels {
            readback::upload_rows(
                &self.objects.queue,
                &gpu.texture,
                PixelRect::new(0, 0, gpu.width, gpu.height),
                pixels,
            );
        }
        self.textures.insert(texture.id(), gpu);
        Ok(())
    }

    fn delete_texture(&mut self, texture: TextureId) {
        self.textures.remove(&texture);
    }

    fn read_pixels(
        &mut self,
        source: Option<TextureId>,
        rect: PixelRect,
        out: &mut Vec<u8>,
    ) -> RenderResult<()> {
        self.submit();
        let target = match source {
            None => &self.canvas,
            Some(id) => self.textures.get(&id).ok_or(RenderError::UnknownTexture(id))?,
        };
        if !rect.fits(target.width, target.height) {
            return Err(RenderError::Backend("read outside texture bounds".to_owned()));
        }
        readback::read_rows(&self.objects.device, &self.objects.queue, &target.texture, rect, out)
    }

    fn write_pixels(
        &mut self,
        target: Option<TextureId>,
        rect: PixelRect,
        data: &[u8],
    ) -> RenderResult<()> {
        self.submit();
        let dst = match target {
            None => &self.canvas,
            Some(id) => self.textures.get(&id).ok_or(RenderError::UnknownTexture(id))?,
        };
        if !rect.fits(dst.width, dst.height) || data.len() != rect.byte_len() {
            return Err(RenderError::Backend("write outside texture bounds".to_owned()));
        }
        readback::upload_rows(&self.objects.queue, &dst.texture, rect, data);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scissor_none_is_full_target() {
        assert_eq!(clamp_scissor(None, 800, 600), Some((0, 0, 800, 600)));
    }

    #[test]
    fn scissor_is_clamped_to_target() {
        let r = PixelRect::new(700, 500, 300, 300);
        assert_eq!(clamp_scissor(Some(r), 800, 600), Some((700, 500, 100, 100)));
    }

    #[test]
    fn scissor_outside_target_skips_draws() {
        let r = PixelRect::new(900, 0, 10, 10);
        assert_eq!(clamp_scissor(Some(r), 800, 600), None);
        assert_eq!(clamp_scissor(Some(PixelRect::new(0, 0, 0, 10)), 800, 600), None);
    }
}
