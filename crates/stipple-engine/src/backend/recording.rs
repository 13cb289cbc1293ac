use std::collections::{HashMap, HashSet};

use crate::error::{RenderError, RenderResult};
use crate::paint::{BlendMode, Color};
use crate::texture::{Texture, TextureId};

use super::{BufferId, BufferKind, PixelRect, ProgramId, ProgramLayout, RenderBackend, VertexBinding};

/// One command received by a [`RecordingBackend`].
#[derive(Debug, Clone, PartialEq)]
pub enum BackendCall {
    ResetContext,
    SetViewport { width: u32, height: u32 },
    CompileProgram { program: ProgramId, name: String },
    DeleteProgram(ProgramId),
    CreateBuffer { buffer: BufferId, kind: BufferKind, size: usize },
    DeleteBuffer(BufferId),
    WriteBuffer { buffer: BufferId, offset: usize, len: usize },
    UseProgram { program: ProgramId, binding: VertexBinding },
    SetUniform { program: ProgramId, offset: usize, values: Vec<f32> },
    BindTexture { unit: u32, texture: TextureId },
    SetBlendMode(BlendMode),
    SetScissor(Option<PixelRect>),
    SetRenderTarget(Option<TextureId>),
    DrawElements { first_index: u32, index_count: u32 },
    Submit,
    Clear(Color),
    CreateTexture(TextureId),
    DeleteTexture(TextureId),
    ReadPixels { source: Option<TextureId>, rect: PixelRect },
    WritePixels { target: Option<TextureId>, rect: PixelRect },
}

#[derive(Debug, Clone)]
struct PixelStore {
    width: u32,
    height: u32,
    data: Vec<u8>,
}

impl PixelStore {
    fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            data: vec![0; width as usize * height as usize * 4],
        }
    }

    fn row_range(&self, x: u32, y: u32, width: u32) -> std::ops::Range<usize> {
        let start = (y as usize * self.width as usize + x as usize) * 4;
        start..start + width as usize * 4
    }
}

/// Backend that records commands and keeps pixels in CPU memory.
///
/// No rasterization happens: draws are recorded, not rendered. Buffer uploads
/// and pixel transfers are stored, so the uploaded vertex data and
/// `write_pixels`/`read_pixels` round trips can be inspected.
#[derive(Debug)]
pub struct RecordingBackend {
    calls: Vec<BackendCall>,
    lost: bool,
    next_id: u32,
    programs: HashMap<ProgramId, String>,
    buffers: HashMap<BufferId, Vec<u8>>,
    textures: HashMap<TextureId, PixelStore>,
    canvas: PixelStore,
    target: Option<TextureId>,
    failing_programs: HashSet<String>,
}

impl RecordingBackend {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            calls: Vec::new(),
            lost: false,
            next_id: 1,
            programs: HashMap::new(),
            buffers: HashMap::new(),
            textures: HashMap::new(),
            canvas: PixelStore::new(width.max(1), height.max(1)),
            target: None,
            failing_programs: HashSet::new(),
        }
    }

    /// Every command received since creation or the last [`Self::take_calls`].
    pub fn calls(&self) -> &[BackendCall] {
        &self.calls
    }

    pub fn take_calls(&mut self) -> Vec<BackendCall> {
        std::mem::take(&mut self.calls)
    }

    /// Number of recorded calls matching `pred`.
    pub fn count(&self, pred: impl Fn(&BackendCall) -> bool) -> usize {
        self.calls.iter().filter(|c| pred(c)).count()
    }

    pub fn draw_call_count(&self) -> usize {
        self.count(|c| matches!(c, BackendCall::DrawElements { .. }))
    }

    pub fn submit_count(&self) -> usize {
        self.count(|c| matches!(c, BackendCall::Submit))
    }

    /// Current contents of a buffer.
    pub fn buffer_data(&self, buffer: BufferId) -> Option<&[u8]> {
        self.buffers.get(&buffer).map(Vec::as_slice)
    }

    /// Name of a live program.
    pub fn program_name(&self, program: ProgramId) -> Option<&str> {
        self.programs.get(&program).map(String::as_str)
    }

    pub fn live_program_count(&self) -> usize {
        self.programs.len()
    }

    /// Simulates a lost context: handles stay allocated but are unusable.
    pub fn lose_context(&mut self) {
        self.lost = true;
    }

    /// Makes every future compile of the named program fail.
    pub fn fail_program(&mut self, name: &str) {
        self.failing_programs.insert(name.to_owned());
    }

    fn alloc_id(&mut self) -> u32 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn store_mut(&mut self, id: Option<TextureId>) -> RenderResult<&mut PixelStore> {
        match id {
            None => Ok(&mut self.canvas),
            Some(id) => self.textures.get_mut(&id).ok_or(RenderError::UnknownTexture(id)),
        }
    }
}

impl RenderBackend for RecordingBackend {
    fn is_context_lost(&self) -> bool {
        self.lost
    }

    fn reset_context(&mut self) -> RenderResult<()> {
        self.calls.push(BackendCall::ResetContext);
        self.lost = false;
        self.programs.clear();
        self.buffers.clear();
        self.textures.clear();
        self.target = None;
        self.canvas = PixelStore::new(self.canvas.width, self.canvas.height);
        Ok(())
    }

    fn set_viewport(&mut self, width: u32, height: u32) {
        self.calls.push(BackendCall::SetViewport { width, height });
        let (width, height) = (width.max(1), height.max(1));
        if (width, height) != (self.canvas.width, self.canvas.height) {
            self.canvas = PixelStore::new(width, height);
        }
    }

    fn compile_program(&mut self, layout: &ProgramLayout<'_>) -> RenderResult<ProgramId> {
        if self.lost {
            return Err(RenderError::ShaderCompile {
                name: layout.name.to_owned(),
                message: "context lost".to_owned(),
            });
        }
        if self.failing_programs.contains(layout.name) {
            return Err(RenderError::ShaderCompile {
                name: layout.name.to_owned(),
                message: "forced failure".to_owned(),
            });
        }
        let program = ProgramId(self.alloc_id());
        self.programs.insert(program, layout.name.to_owned());
        self.calls.push(BackendCall::CompileProgram { program, name: layout.name.to_owned() });
        Ok(program)
    }

    fn delete_program(&mut self, program: ProgramId) {
        self.programs.remove(&program);
        self.calls.push(BackendCall::DeleteProgram(program));
    }

    fn create_buffer(&mut self, kind: BufferKind, size: usize) -> RenderResult<BufferId> {
        if self.lost {
            return Err(RenderError::ContextLost);
        }
        let buffer = BufferId(self.alloc_id());
        self.buffers.insert(buffer, vec![0; size]);
        self.calls.push(BackendCall::CreateBuffer { buffer, kind, size });
        Ok(buffer)
    }

    fn delete_buffer(&mut self, buffer: BufferId) {
        self.buffers.remove(&buffer);
        self.calls.push(BackendCall::DeleteBuffer(buffer));
    }

    fn write_buffer(&mut self, buffer: BufferId, offset: usize, data: &[u8]) {
        if let Some(store) = self.buffers.get_mut(&buffer) {
            let end = (offset + data.len()).min(store.len());
            if offset < end {
                store[offset..end].copy_from_slice(&data[..end - offset]);
            }
        }
        self.calls.push(BackendCall::WriteBuffer { buffer, offset, len: data.len() });
    }

    fn use_program(&mut self, program: ProgramId, binding: &VertexBinding) {
        self.calls.push(BackendCall::UseProgram { program, binding: *binding });
    }

    fn set_uniform(&mut self, program: ProgramId, offset: usize, values: &[f32]) {
        self.calls.push(BackendCall::SetUniform { program, offset, values: values.to_vec() });
    }

    fn bind_texture(&mut self, unit: u32, texture: TextureId) {
        self.calls.push(BackendCall::BindTexture { unit, texture });
    }

    fn set_blend_mode(&mut self, mode: BlendMode) {
        self.calls.push(BackendCall::SetBlendMode(mode));
    }

    fn set_scissor(&mut self, rect: Option<PixelRect>) {
        self.calls.push(BackendCall::SetScissor(rect));
    }

    fn set_render_target(&mut self, target: Option<TextureId>) {
        self.target = target;
        self.calls.push(BackendCall::SetRenderTarget(target));
    }

    fn draw_elements(&mut self, first_index: u32, index_count: u32) {
        self.calls.push(BackendCall::DrawElements { first_index, index_count });
    }

    fn submit(&mut self) {
        self.calls.push(BackendCall::Submit);
    }

    fn clear(&mut self, color: Color) {
        self.calls.push(BackendCall::Clear(color));
        let [r, g, b, a] = color.premultiplied();
        let px = [r, g, b, a].map(|v| (v * 255.0).round() as u8);
        if let Ok(store) = self.store_mut(self.target) {
            for chunk in store.data.chunks_exact_mut(4) {
                chunk.copy_from_slice(&px);
            }
        }
    }

    fn has_texture(&self, texture: TextureId) -> bool {
        self.textures.contains_key(&texture)
    }

    fn create_texture(&mut self, texture: &Texture, pixels: Option<&[u8]>) -> RenderResult<()> {
        if self.lost {
            return Err(RenderError::ContextLost);
        }
        let mut store = PixelStore::new(texture.width(), texture.height());
        if let Some(pixels) = pixels {
            if pixels.len() != store.data.len() {
                return Err(RenderError::Backend(format!(
                    "texture upload of {} bytes for {}x{}",
                    pixels.len(),
                    texture.width(),
                    texture.height()
                )));
            }
            store.data.copy_from_slice(pixels);
        }
        self.textures.insert(texture.id(), store);
        self.calls.push(BackendCall::CreateTexture(texture.id()));
        Ok(())
    }

    fn delete_texture(&mut self, texture: TextureId) {
        self.textures.remove(&texture);
        self.calls.push(BackendCall::DeleteTexture(texture));
    }

    fn read_pixels(
        &mut self,
        source: Option<TextureId>,
        rect: PixelRect,
        out: &mut Vec<u8>,
    ) -> RenderResult<()> {
        self.calls.push(BackendCall::ReadPixels { source, rect });
        let store = self.store_mut(source)?;
        if !rect.fits(store.width, store.height) {
            return Err(RenderError::Backend("read outside texture bounds".to_owned()));
        }
        out.clear();
        for row in rect.y..rect.y + rect.height {
            out.extend_from_slice(&store.data[store.row_range(rect.x, row, rect.width)]);
        }
        Ok(())
    }

    fn write_pixels(
        &mut self,
        target: Option<TextureId>,
        rect: PixelRect,
        data: &[u8],
    ) -> RenderResult<()> {
        self.calls.push(BackendCall::WritePixels { target, rect });
        let store = self.store_mut(target)?;
        if !rect.fits(store.width, store.height) || data.len() != rect.byte_len() {
            return Err(RenderError::Backend("write outside texture bounds".to_owned()));
        }
        let row_bytes = rect.width as usize * 4;
        for (i, row) in (rect.y..rect.y + rect.height).enumerate() {
            let range = store.row_range(rect.x, row, rect.width);
            store.data[range].copy_from_slice(&data[i * row_bytes..(i + 1) * row_bytes]);
        }
        Ok(())
    }
}
