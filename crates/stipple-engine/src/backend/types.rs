/// Backend handle of a compiled program.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct ProgramId(pub u32);

/// Backend handle of a GPU buffer.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct BufferId(pub u32);

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum BufferKind {
    Vertex,
    Index,
}

/// Scalar type of one vertex attribute component.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum ComponentType {
    F32,
    /// Unsigned byte normalized to `[0, 1]`.
    U8Norm,
}

impl ComponentType {
    #[inline]
    pub const fn byte_size(self) -> u32 {
        match self {
            ComponentType::F32 => 4,
            ComponentType::U8Norm => 1,
        }
    }
}

/// Resolved vertex attribute: where it lives in the vertex and how to read it.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct AttributeInfo {
    pub name: &'static str,
    pub location: u32,
    pub component: ComponentType,
    pub count: u32,
    pub offset: u32,
}

impl AttributeInfo {
    #[inline]
    pub const fn byte_size(&self) -> u32 {
        self.component.byte_size() * self.count
    }

    /// Matching wgpu vertex format, if the combination is representable.
    pub fn vertex_format(&self) -> Option<wgpu::VertexFormat> {
        use wgpu::VertexFormat as F;
        match (self.component, self.count) {
            (ComponentType::F32, 1) => Some(F::Float32),
            (ComponentType::F32, 2) => Some(F::Float32x2),
            (ComponentType::F32, 3) => Some(F::Float32x3),
            (ComponentType::F32, 4) => Some(F::Float32x4),
            (ComponentType::U8Norm, 2) => Some(F::Unorm8x2),
            (ComponentType::U8Norm, 4) => Some(F::Unorm8x4),
            _ => None,
        }
    }
}

/// Everything a backend needs to build a program.
#[derive(Debug, Clone, Copy)]
pub struct ProgramLayout<'a> {
    pub name: &'a str,
    pub source: &'a str,
    pub attributes: &'a [AttributeInfo],
    pub stride: u32,
    /// Size in bytes of the uniform block bound at group 0.
    pub uniform_block_size: usize,
    /// Texture units sampled by the program, bound at groups `1..=texture_units`.
    pub texture_units: u32,
}

/// Buffers fed to the attributes of the program in use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VertexBinding {
    pub vertex_buffer: BufferId,
    pub index_buffer: BufferId,
    pub stride: u32,
}

/// Pixel-space rectangle for scissor and pixel transfers.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct PixelRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl PixelRect {
    #[inline]
    pub const fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self { x, y, width, height }
    }

    #[inline]
    pub fn is_empty(self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Whether the rect lies fully inside a `width x height` surface.
    #[inline]
    pub fn fits(self, width: u32, height: u32) -> bool {
        self.x.checked_add(self.width).is_some_and(|x1| x1 <= width)
            && self.y.checked_add(self.height).is_some_and(|y1| y1 <= height)
    }

    /// Byte length of a tightly packed RGBA8 block of this size.
    #[inline]
    pub fn byte_len(self) -> usize {
        self.width as usize * self.height as usize * 4
    }
}
