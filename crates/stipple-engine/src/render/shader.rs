//! Program compilation, attribute layout and uniform storage.
//!
//! Every program is described statically by a [`ProgramDescriptor`]. The
//! manager resolves the descriptor once into attribute offsets and a uniform
//! block layout, compiles it through the backend and keeps a CPU shadow of
//! all uniform values. The shadow serves two purposes:
//! - unchanged uniforms are not re-sent to the backend
//! - after context loss every value is replayed into the fresh program
//!
//! Uniform layout: uniforms occupy consecutive 16-byte slots in declaration
//! order. Scalars and `vec2` take a whole slot; WGSL declares them as `vec4`.

use std::collections::HashMap;

use log::{debug, warn};

use crate::backend::{
    AttributeInfo, BufferId, ComponentType, ProgramId, ProgramLayout, RenderBackend, VertexBinding,
};
use crate::error::{RenderError, RenderResult};

use super::restore::Restorable;

/// Uniform value shape.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum UniformKind {
    Float,
    Vec2,
    Vec4,
    /// Three `vec4` columns.
    Mat3x4,
}

impl UniformKind {
    /// Number of floats a caller supplies.
    pub const fn components(self) -> usize {
        match self {
            UniformKind::Float => 1,
            UniformKind::Vec2 => 2,
            UniformKind::Vec4 => 4,
            UniformKind::Mat3x4 => 12,
        }
    }

    /// Bytes reserved in the uniform block.
    pub const fn slot_size(self) -> usize {
        match self {
            UniformKind::Float | UniformKind::Vec2 | UniformKind::Vec4 => 16,
            UniformKind::Mat3x4 => 48,
        }
    }
}

#[derive(Debug, Copy, Clone)]
pub struct UniformDesc {
    pub name: &'static str,
    pub kind: UniformKind,
}

#[derive(Debug, Copy, Clone)]
pub struct AttributeDesc {
    pub name: &'static str,
    pub component: ComponentType,
    pub count: u32,
}

/// Static description of one program.
#[derive(Debug)]
pub struct ProgramDescriptor {
    pub name: &'static str,
    pub source: &'static str,
    /// Attributes in location order, tightly packed in the vertex.
    pub attributes: &'static [AttributeDesc],
    pub uniforms: &'static [UniformDesc],
    pub texture_units: u32,
}

/// Handle of a program registered with a [`ShaderManager`].
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct ShaderId(usize);

#[derive(Debug, Clone)]
struct UniformSlot {
    name: &'static str,
    kind: UniformKind,
    offset: usize,
    /// Backend copy matches the shadow.
    synced: bool,
}

#[derive(Debug)]
struct Shader {
    descriptor: &'static ProgramDescriptor,
    program: Option<ProgramId>,
    attributes: Vec<AttributeInfo>,
    stride: u32,
    uniforms: Vec<UniformSlot>,
    block_size: usize,
    /// Shadow of the uniform block, one float per 4 bytes.
    values: Vec<f32>,
}

impl Shader {
    fn resolve(descriptor: &'static ProgramDescriptor) -> Self {
        let mut offset = 0;
        let attributes = descriptor
            .attributes
            .iter()
            .enumerate()
            .map(|(location, a)| {
                let info = AttributeInfo {
                    name: a.name,
                    location: location as u32,
                    component: a.component,
                    count: a.count,
                    offset,
                };
                offset += info.byte_size();
                info
            })
            .collect();
        let stride = offset;

        let mut block_size = 0;
        let uniforms = descriptor
            .uniforms
            .iter()
            .map(|u| {
                let slot = UniformSlot { name: u.name, kind: u.kind, offset: block_size, synced: false };
                block_size += u.kind.slot_size();
                slot
            })
            .collect();

        Self {
            descriptor,
            program: None,
            attributes,
            stride,
            uniforms,
            block_size,
            values: vec![0.0; block_size / 4],
        }
    }

    fn layout(&self) -> ProgramLayout<'_> {
        ProgramLayout {
            name: self.descriptor.name,
            source: self.descriptor.source,
            attributes: &self.attributes,
            stride: self.stride,
            uniform_block_size: self.block_size,
            texture_units: self.descriptor.texture_units,
        }
    }

    fn slot(&self, name: &str) -> Option<usize> {
        self.uniforms.iter().position(|u| u.name == name)
    }

    fn compile(&mut self, backend: &mut dyn RenderBackend) -> RenderResult<()> {
        let program = backend.compile_program(&self.layout())?;
        self.program = Some(program);
        for slot in &mut self.uniforms {
            let range = slot.offset / 4..slot.offset / 4 + slot.kind.components();
            backend.set_uniform(program, slot.offset, &self.values[range]);
            slot.synced = true;
        }
        Ok(())
    }
}

/// Owns every compiled program and its uniform shadow.
#[derive(Debug, Default)]
pub struct ShaderManager {
    shaders: Vec<Shader>,
    by_name: HashMap<&'static str, ShaderId>,
    projection: Option<[f32; 4]>,
}

impl ShaderManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the program for `descriptor`, compiling it on first request.
    ///
    /// Compile failures are returned, except while the context is lost: the
    /// program is then registered without a handle and built on restore.
    pub fn get(
        &mut self,
        backend: &mut dyn RenderBackend,
        descriptor: &'static ProgramDescriptor,
    ) -> RenderResult<ShaderId> {
        if let Some(&id) = self.by_name.get(descriptor.name) {
            return Ok(id);
        }

        let mut shader = Shader::resolve(descriptor);
        if let Some(projection) = self.projection
            && let Some(i) = shader.slot("projection")
        {
            let at = shader.uniforms[i].offset / 4;
            shader.values[at..at + 4].copy_from_slice(&projection);
        }

        match shader.compile(backend) {
            Ok(()) => debug!("ShaderManager: compiled `{}`", descriptor.name),
            Err(err) if backend.is_context_lost() => {
                debug!("ShaderManager: deferring `{}` until restore: {err}", descriptor.name);
            }
            Err(err) => return Err(err),
        }

        let id = ShaderId(self.shaders.len());
        self.shaders.push(shader);
        self.by_name.insert(descriptor.name, id);
        Ok(id)
    }

    /// Makes `shader` current with the given buffers feeding its attributes.
    ///
    /// Returns `false` if the program has no live handle.
    pub fn use_shader(
        &self,
        backend: &mut dyn RenderBackend,
        shader: ShaderId,
        vertex_buffer: BufferId,
        index_buffer: BufferId,
    ) -> bool {
        let Some(s) = self.shaders.get(shader.0) else {
            return false;
        };
        let Some(program) = s.program else {
            return false;
        };
        backend.use_program(program, &VertexBinding { vertex_buffer, index_buffer, stride: s.stride });
        true
    }

    /// Stores a uniform value and forwards it to the backend if it changed.
    pub fn set_uniform(
        &mut self,
        backend: &mut dyn RenderBackend,
        shader: ShaderId,
        name: &str,
        values: &[f32],
    ) -> RenderResult<()> {
        let s = self
            .shaders
            .get_mut(shader.0)
            .ok_or_else(|| RenderError::UnknownUniform { shader: format!("{shader:?}"), name: name.to_owned() })?;
        let Some(i) = s.slot(name) else {
            return Err(RenderError::UnknownUniform {
                shader: s.descriptor.name.to_owned(),
                name: name.to_owned(),
            });
        };
        let slot = &mut s.uniforms[i];
        let n = slot.kind.components();
        if values.len() != n {
            warn!(
                "ShaderManager: `{}`.{name} expects {n} floats, got {}",
                s.descriptor.name,
                values.len()
            );
            return Ok(());
        }

        let range = slot.offset / 4..slot.offset / 4 + n;
        if slot.synced && s.values[range.clone()] == *values {
            return Ok(());
        }
        s.values[range].copy_from_slice(values);
        match s.program {
            Some(program) => {
                backend.set_uniform(program, slot.offset, values);
                slot.synced = true;
            }
            None => slot.synced = false,
        }
        Ok(())
    }

    #[inline]
    pub fn set_uniform_f32(
        &mut self,
        backend: &mut dyn RenderBackend,
        shader: ShaderId,
        name: &str,
        v: f32,
    ) -> RenderResult<()> {
        self.set_uniform(backend, shader, name, &[v])
    }

    #[inline]
    pub fn set_uniform_vec2(
        &mut self,
        backend: &mut dyn RenderBackend,
        shader: ShaderId,
        name: &str,
        v: [f32; 2],
    ) -> RenderResult<()> {
        self.set_uniform(backend, shader, name, &v)
    }

    #[inline]
    pub fn set_uniform_vec4(
        &mut self,
        backend: &mut dyn RenderBackend,
        shader: ShaderId,
        name: &str,
        v: [f32; 4],
    ) -> RenderResult<()> {
        self.set_uniform(backend, shader, name, &v)
    }

    #[inline]
    pub fn set_uniform_mat3x4(
        &mut self,
        backend: &mut dyn RenderBackend,
        shader: ShaderId,
        name: &str,
        m: &[f32; 12],
    ) -> RenderResult<()> {
        self.set_uniform(backend, shader, name, m)
    }

    /// Updates the `projection` uniform of every program that has one.
    ///
    /// Maps `[0, width] x [0, height]` (+Y down) to NDC. With `flip_y` the
    /// logical origin lands at the bottom of the target, matching the
    /// bottom-up storage of render targets.
    pub fn set_projection(&mut self, backend: &mut dyn RenderBackend, width: f32, height: f32, flip_y: bool) {
        let (w, h) = (width.max(1.0), height.max(1.0));
        let projection = if flip_y {
            [2.0 / w, 2.0 / h, -1.0, -1.0]
        } else {
            [2.0 / w, -2.0 / h, -1.0, 1.0]
        };
        self.projection = Some(projection);
        for i in 0..self.shaders.len() {
            if self.shaders[i].slot("projection").is_some() {
                // Infallible: the slot exists and the length matches.
                let _ = self.set_uniform(backend, ShaderId(i), "projection", &projection);
            }
        }
    }

    #[inline]
    pub fn projection(&self) -> Option<[f32; 4]> {
        self.projection
    }

    pub fn name(&self, shader: ShaderId) -> Option<&'static str> {
        self.shaders.get(shader.0).map(|s| s.descriptor.name)
    }

    pub fn program(&self, shader: ShaderId) -> Option<ProgramId> {
        self.shaders.get(shader.0).and_then(|s| s.program)
    }

    pub fn attributes(&self, shader: ShaderId) -> &[AttributeInfo] {
        self.shaders.get(shader.0).map_or(&[], |s| s.attributes.as_slice())
    }

    pub fn stride(&self, shader: ShaderId) -> u32 {
        self.shaders.get(shader.0).map_or(0, |s| s.stride)
    }

    /// Shadow value of a uniform.
    pub fn uniform(&self, shader: ShaderId, name: &str) -> Option<&[f32]> {
        let s = self.shaders.get(shader.0)?;
        let slot = &s.uniforms[s.slot(name)?];
        Some(&s.values[slot.offset / 4..slot.offset / 4 + slot.kind.components()])
    }

    pub fn len(&self) -> usize {
        self.shaders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shaders.is_empty()
    }
}

impl Restorable for ShaderManager {
    fn invalidate(&mut self) {
        for s in &mut self.shaders {
            s.program = None;
            for slot in &mut s.uniforms {
                slot.synced = false;
            }
        }
    }

    fn restore(&mut self, backend: &mut dyn RenderBackend) -> RenderResult<()> {
        for s in &mut self.shaders {
            s.compile(backend)?;
        }
        debug!("ShaderManager: restored {} programs", self.shaders.len());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{BackendCall, RecordingBackend};

    const ATTRS: &[AttributeDesc] = &[
        AttributeDesc { name: "position", component: ComponentType::F32, count: 2 },
        AttributeDesc { name: "color", component: ComponentType::U8Norm, count: 4 },
    ];

    static TEST_PROGRAM: ProgramDescriptor = ProgramDescriptor {
        name: "test",
        source: "",
        attributes: ATTRS,
        uniforms: &[
            UniformDesc { name: "projection", kind: UniformKind::Vec4 },
            UniformDesc { name: "matrix", kind: UniformKind::Mat3x4 },
            UniformDesc { name: "alpha", kind: UniformKind::Float },
        ],
        texture_units: 0,
    };

    fn uniform_calls(backend: &RecordingBackend) -> usize {
        backend.count(|c| matches!(c, BackendCall::SetUniform { .. }))
    }

    // ── layout ────────────────────────────────────────────────────────────

    #[test]
    fn attributes_are_packed_in_order() {
        let mut backend = RecordingBackend::new(8, 8);
        let mut shaders = ShaderManager::new();
        let id = shaders.get(&mut backend, &TEST_PROGRAM).unwrap();
        let attrs = shaders.attributes(id);
        assert_eq!(attrs[0].offset, 0);
        assert_eq!(attrs[1].offset, 8);
        assert_eq!(attrs[1].location, 1);
        assert_eq!(shaders.stride(id), 12);
    }

    #[test]
    fn uniforms_take_16_byte_slots() {
        let mut backend = RecordingBackend::new(8, 8);
        let mut shaders = ShaderManager::new();
        let id = shaders.get(&mut backend, &TEST_PROGRAM).unwrap();
        backend.take_calls();
        shaders.set_uniform_f32(&mut backend, id, "alpha", 0.5).unwrap();
        assert!(backend.calls().iter().any(|c| matches!(
            c,
            BackendCall::SetUniform { offset: 64, values, .. } if values == &vec![0.5]
        )));
    }

    // ── caching ───────────────────────────────────────────────────────────

    #[test]
    fn get_compiles_once() {
        let mut backend = RecordingBackend::new(8, 8);
        let mut shaders = ShaderManager::new();
        let a = shaders.get(&mut backend, &TEST_PROGRAM).unwrap();
        let b = shaders.get(&mut backend, &TEST_PROGRAM).unwrap();
        assert_eq!(a, b);
        assert_eq!(backend.count(|c| matches!(c, BackendCall::CompileProgram { .. })), 1);
    }

    #[test]
    fn unchanged_uniform_is_not_resent() {
        let mut backend = RecordingBackend::new(8, 8);
        let mut shaders = ShaderManager::new();
        let id = shaders.get(&mut backend, &TEST_PROGRAM).unwrap();
        backend.take_calls();
        shaders.set_uniform_f32(&mut backend, id, "alpha", 0.25).unwrap();
        shaders.set_uniform_f32(&mut backend, id, "alpha", 0.25).unwrap();
        assert_eq!(uniform_calls(&backend), 1);
        shaders.set_uniform_f32(&mut backend, id, "alpha", 0.75).unwrap();
        assert_eq!(uniform_calls(&backend), 2);
    }

    #[test]
    fn unknown_uniform_is_an_error() {
        let mut backend = RecordingBackend::new(8, 8);
        let mut shaders = ShaderManager::new();
        let id = shaders.get(&mut backend, &TEST_PROGRAM).unwrap();
        let err = shaders.set_uniform_f32(&mut backend, id, "nope", 1.0).unwrap_err();
        assert!(matches!(err, RenderError::UnknownUniform { .. }));
    }

    #[test]
    fn compile_failure_is_reported() {
        let mut backend = RecordingBackend::new(8, 8);
        backend.fail_program("test");
        let mut shaders = ShaderManager::new();
        let err = shaders.get(&mut backend, &TEST_PROGRAM).unwrap_err();
        assert!(matches!(err, RenderError::ShaderCompile { .. }));
        assert!(shaders.is_empty());
    }

    // ── projection ────────────────────────────────────────────────────────

    #[test]
    fn projection_maps_corners_to_ndc() {
        let mut backend = RecordingBackend::new(8, 8);
        let mut shaders = ShaderManager::new();
        let id = shaders.get(&mut backend, &TEST_PROGRAM).unwrap();
        shaders.set_projection(&mut backend, 200.0, 100.0, false);
        let p = shaders.uniform(id, "projection").unwrap().to_vec();
        let ndc = |x: f32, y: f32| (x * p[0] + p[2], y * p[1] + p[3]);
        let close = |(a, b): (f32, f32), (x, y): (f32, f32)| (a - x).abs() < 1e-5 && (b - y).abs() < 1e-5;
        assert!(close(ndc(0.0, 0.0), (-1.0, 1.0)));
        assert!(close(ndc(200.0, 100.0), (1.0, -1.0)));

        shaders.set_projection(&mut backend, 200.0, 100.0, true);
        let p = shaders.uniform(id, "projection").unwrap().to_vec();
        assert_eq!(0.0 * p[1] + p[3], -1.0);
    }

    #[test]
    fn projection_applies_to_later_programs() {
        let mut backend = RecordingBackend::new(8, 8);
        let mut shaders = ShaderManager::new();
        shaders.set_projection(&mut backend, 10.0, 10.0, false);
        let id = shaders.get(&mut backend, &TEST_PROGRAM).unwrap();
        assert_eq!(shaders.uniform(id, "projection").unwrap(), &[0.2, -0.2, -1.0, 1.0]);
    }

    // ── restore ───────────────────────────────────────────────────────────

    #[test]
    fn restore_recompiles_and_replays_uniforms() {
        let mut backend = RecordingBackend::new(8, 8);
        let mut shaders = ShaderManager::new();
        let id = shaders.get(&mut backend, &TEST_PROGRAM).unwrap();
        shaders.set_uniform_f32(&mut backend, id, "alpha", 0.5).unwrap();

        backend.lose_context();
        shaders.invalidate();
        assert!(shaders.program(id).is_none());
        // Accepted while lost; replayed on restore.
        shaders.set_uniform_f32(&mut backend, id, "alpha", 0.125).unwrap();

        backend.reset_context().unwrap();
        backend.take_calls();
        shaders.restore(&mut backend).unwrap();
        assert!(shaders.program(id).is_some());
        assert!(backend.calls().iter().any(|c| matches!(
            c,
            BackendCall::SetUniform { offset: 64, values, .. } if values == &vec![0.125]
        )));
    }

    #[test]
    fn get_while_lost_defers_compile() {
        let mut backend = RecordingBackend::new(8, 8);
        backend.lose_context();
        let mut shaders = ShaderManager::new();
        let id = shaders.get(&mut backend, &TEST_PROGRAM).unwrap();
        assert!(shaders.program(id).is_none());
        assert!(!shaders.use_shader(&mut backend, id, BufferId(1), BufferId(2)));
    }
}
