use std::collections::HashMap;

use crate::backend::ProgramLayout;
use crate::error::{RenderError, RenderResult};
use crate::paint::BlendMode;

/// Color format of the canvas and of every texture the backend creates.
pub(super) const TARGET_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8Unorm;

/// A compiled program: shader module, layouts, uniform block, and one
/// pipeline per blend mode (wgpu bakes blend state into the pipeline).
pub(super) struct GpuProgram {
    label: String,
    module: wgpu::ShaderModule,
    layout: wgpu::PipelineLayout,
    attributes: Vec<wgpu::VertexAttribute>,
    stride: u64,

    uniform_buffer: wgpu::Buffer,
    uniform_bind_group: wgpu::BindGroup,
    uniform_data: Vec<u8>,
    uniform_dirty: bool,

    texture_units: u32,
    pipelines: HashMap<BlendMode, wgpu::RenderPipeline>,
}

impl GpuProgram {
    pub(super) fn new(
        device: &wgpu::Device,
        layout: &ProgramLayout<'_>,
        texture_bgl: &wgpu::BindGroupLayout,
    ) -> RenderResult<Self> {
        let mut attributes = Vec::with_capacity(layout.attributes.len());
        for attr in layout.attributes {
            let format = attr.vertex_format().ok_or_else(|| RenderError::ShaderCompile {
                name: layout.name.to_owned(),
                message: format!("unsupported attribute layout for `{}`", attr.name),
            })?;
            attributes.push(wgpu::VertexAttribute {
                format,
                offset: u64::from(attr.offset),
                shader_location: attr.location,
            });
        }

        let module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some(layout.name),
            source: wgpu::ShaderSource::Wgsl(layout.source.into()),
        });

        let info = pollster::block_on(module.get_compilation_info());
        let errors: Vec<String> = info
            .messages
            .iter()
            .filter(|m| matches!(m.message_type, wgpu::CompilationMessageType::Error))
            .map(|m| m.message.clone())
            .collect();
        if !errors.is_empty() {
            return Err(RenderError::ShaderCompile {
                name: layout.name.to_owned(),
                message: errors.join("\n"),
            });
        }

        let uniform_size = layout.uniform_block_size.max(16).next_multiple_of(16);

        let uniform_bgl = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("stipple uniform bgl"),
            entries: &[wgpu::BindGroupLayoutEntry {
                binding: 0,
                visibility: wgpu::ShaderStages::VERTEX | wgpu::ShaderStages::FRAGMENT,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Uniform,
                    has_dynamic_offset: false,
                    min_binding_size: None,
                },
                count: None,
            }],
        });

        let uniform_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("stipple uniform ubo"),
            size: uniform_size as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let uniform_bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("stipple uniform bind group"),
            layout: &uniform_bgl,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: uniform_buffer.as_entire_binding(),
            }],
        });

        let mut groups: Vec<&wgpu::BindGroupLayout> = vec![&uniform_bgl];
        groups.extend(std::iter::repeat_n(texture_bgl, layout.texture_units as usize));

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("stipple pipeline layout"),
            bind_group_layouts: &groups,
            immediate_size: 0,
        });

        Ok(Self {
            label: layout.name.to_owned(),
            module,
            layout: pipeline_layout,
            attributes,
            stride: u64::from(layout.stride),
            uniform_buffer,
            uniform_bind_group,
            uniform_data: vec![0; uniform_size],
            uniform_dirty: true,
            texture_units: layout.texture_units,
            pipelines: HashMap::new(),
        })
    }

    #[inline]
    pub(super) fn texture_units(&self) -> u32 {
        self.texture_units
    }

    #[inline]
    pub(super) fn uniform_bind_group(&self) -> &wgpu::BindGroup {
        &self.uniform_bind_group
    }

    #[inline]
    pub(super) fn pipeline(&self, blend: BlendMode) -> Option<&wgpu::RenderPipeline> {
        self.pipelines.get(&blend)
    }

    /// Shadows `values` into the CPU copy of the uniform block.
    pub(super) fn write_uniform(&mut self, offset: usize, values: &[f32]) {
        let bytes: &[u8] = bytemuck::cast_slice(values);
        let Some(dst) = self.uniform_data.get_mut(offset..offset + bytes.len()) else {
            log::warn!("{}: uniform write at {offset} overflows the block", self.label);
            return;
        };
        dst.copy_from_slice(bytes);
        self.uniform_dirty = true;
    }

    /// Uploads the uniform block if it changed since the last upload.
    pub(super) fn upload_uniforms(&mut self, queue: &wgpu::Queue) {
        if self.uniform_dirty {
            queue.write_buffer(&self.uniform_buffer, 0, &self.uniform_data);
            self.uniform_dirty = false;
        }
    }

    pub(super) fn ensure_pipeline(&mut self, device: &wgpu::Device, blend: BlendMode) {
        if self.pipelines.contains_key(&blend) {
            return;
        }

        let buffers = [wgpu::VertexBufferLayout {
            array_stride: self.stride,
            step_mode: wgpu::VertexStepMode::Vertex,
            attributes: &self.attributes,
        }];

        let pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some(&self.label),
            layout: Some(&self.layout),
            vertex: wgpu::VertexState {
                module: &self.module,
                entry_point: Some("vs_main"),
                compilation_options: Default::default(),
                buffers: &buffers,
            },
            fragment: Some(wgpu::FragmentState {
                module: &self.module,
                entry_point: Some("fs_main"),
                compilation_options: Default::default(),
                targets: &[Some(wgpu::ColorTargetState {
                    format: TARGET_FORMAT,
                    blend: Some(blend.to_wgpu()),
                    write_mask: wgpu::ColorWrites::ALL,
                })],
            }),
            primitive: wgpu::PrimitiveState {
                topology: wgpu::PrimitiveTopology::TriangleList,
                strip_index_format: None,
                front_face: wgpu::FrontFace::Ccw,
                cull_mode: None,
                polygon_mode: wgpu::PolygonMode::Fill,
                unclipped_depth: false,
                conservative: false,
            },
            depth_stencil: None,
            multisample: wgpu::MultisampleState::default(),
            multiview_mask: None,
            cache: None,
        });

        self.pipelines.insert(blend, pipeline);
    }
}
