//! Vertex formats and the fixed program set.

use bytemuck::{Pod, Zeroable};

use crate::backend::{ComponentType, RenderBackend};
use crate::error::RenderResult;
use crate::paint::PackedColor;

use super::shader::{AttributeDesc, ProgramDescriptor, ShaderId, ShaderManager, UniformDesc, UniformKind};

// ── vertices ──────────────────────────────────────────────────────────────

/// Graphics batch vertex: logical position and premultiplied color.
#[repr(C)]
#[derive(Debug, Copy, Clone, Default, PartialEq, Pod, Zeroable)]
pub struct GraphicsVertex {
    pub pos: [f32; 2],
    pub color: PackedColor,
}

/// Sprite batch vertex: logical position, texture uv and premultiplied tint.
#[repr(C)]
#[derive(Debug, Copy, Clone, Default, PartialEq, Pod, Zeroable)]
pub struct SpriteVertex {
    pub pos: [f32; 2],
    pub uv: [f32; 2],
    pub color: PackedColor,
}

// ── texture units ─────────────────────────────────────────────────────────

/// Unit of the mask texture in the masked primitive program.
pub const PRIMITIVE_MASK_UNIT: u32 = 0;
/// Unit of the sprite texture in both sprite programs.
pub const SPRITE_TEXTURE_UNIT: u32 = 0;
/// Unit of the mask texture in the masked sprite program.
pub const SPRITE_MASK_UNIT: u32 = 1;

// ── descriptors ───────────────────────────────────────────────────────────

const POSITION: AttributeDesc = AttributeDesc { name: "position", component: ComponentType::F32, count: 2 };
const UV: AttributeDesc = AttributeDesc { name: "uv", component: ComponentType::F32, count: 2 };
const COLOR: AttributeDesc = AttributeDesc { name: "color", component: ComponentType::U8Norm, count: 4 };

const PROJECTION: UniformDesc = UniformDesc { name: "projection", kind: UniformKind::Vec4 };
const MASK_UNIFORMS: [UniformDesc; 4] = [
    PROJECTION,
    UniformDesc { name: "mask_uv", kind: UniformKind::Mat3x4 },
    UniformDesc { name: "mask_clip", kind: UniformKind::Vec4 },
    UniformDesc { name: "mask_alpha", kind: UniformKind::Float },
];

pub static PRIMITIVE: ProgramDescriptor = ProgramDescriptor {
    name: "primitive",
    source: include_str!("shaders/primitive.wgsl"),
    attributes: &[POSITION, COLOR],
    uniforms: &[PROJECTION],
    texture_units: 0,
};

pub static PRIMITIVE_MASKED: ProgramDescriptor = ProgramDescriptor {
    name: "primitive_masked",
    source: include_str!("shaders/primitive_masked.wgsl"),
    attributes: &[POSITION, COLOR],
    uniforms: &MASK_UNIFORMS,
    texture_units: 1,
};

pub static SPRITE: ProgramDescriptor = ProgramDescriptor {
    name: "sprite",
    source: include_str!("shaders/sprite.wgsl"),
    attributes: &[POSITION, UV, COLOR],
    uniforms: &[PROJECTION],
    texture_units: 1,
};

pub static SPRITE_MASKED: ProgramDescriptor = ProgramDescriptor {
    name: "sprite_masked",
    source: include_str!("shaders/sprite_masked.wgsl"),
    attributes: &[POSITION, UV, COLOR],
    uniforms: &MASK_UNIFORMS,
    texture_units: 2,
};

/// Handles of the four programs the batchers draw with.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct ProgramSet {
    pub primitive: ShaderId,
    pub primitive_masked: ShaderId,
    pub sprite: ShaderId,
    pub sprite_masked: ShaderId,
}

impl ProgramSet {
    pub fn load(shaders: &mut ShaderManager, backend: &mut dyn RenderBackend) -> RenderResult<Self> {
        Ok(Self {
            primitive: shaders.get(backend, &PRIMITIVE)?,
            primitive_masked: shaders.get(backend, &PRIMITIVE_MASKED)?,
            sprite: shaders.get(backend, &SPRITE)?,
            sprite_masked: shaders.get(backend, &SPRITE_MASKED)?,
        })
    }

    #[inline]
    pub fn graphics(&self, masked: bool) -> ShaderId {
        if masked { self.primitive_masked } else { self.primitive }
    }

    #[inline]
    pub fn sprites(&self, masked: bool) -> ShaderId {
        if masked { self.sprite_masked } else { self.sprite }
    }
}
