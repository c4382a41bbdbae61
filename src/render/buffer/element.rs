//! Vertex element descriptions

use crate::core::error::Error;
use crate::core::Result;

/// Data type of one vertex element
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum VertexElementType {
    Int = 0,
    Float,
    Vector2,
    Vector3,
    Vector4,
    UByte4,
    UByte4Norm,
}

impl VertexElementType {
    /// Size in bytes
    pub const fn size(self) -> u32 {
        match self {
            Self::Int | Self::Float | Self::UByte4 | Self::UByte4Norm => 4,
            Self::Vector2 => 8,
            Self::Vector3 => 12,
            Self::Vector4 => 16,
        }
    }

    pub fn from_u8(value: u8) -> Option<Self> {
        Some(match value {
            0 => Self::Int,
            1 => Self::Float,
            2 => Self::Vector2,
            3 => Self::Vector3,
            4 => Self::Vector4,
            5 => Self::UByte4,
            6 => Self::UByte4Norm,
            _ => return None,
        })
    }
}

/// Meaning of one vertex element
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum VertexElementSemantic {
    Position = 0,
    Normal,
    Binormal,
    Tangent,
    TexCoord,
    Color,
    BlendWeights,
    BlendIndices,
    ObjectIndex,
}

impl VertexElementSemantic {
    pub fn from_u8(value: u8) -> Option<Self> {
        Some(match value {
            0 => Self::Position,
            1 => Self::Normal,
            2 => Self::Binormal,
            3 => Self::Tangent,
            4 => Self::TexCoord,
            5 => Self::Color,
            6 => Self::BlendWeights,
            7 => Self::BlendIndices,
            8 => Self::ObjectIndex,
            _ => return None,
        })
    }
}

/// One element of an interleaved vertex
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct VertexElement {
    pub ty: VertexElementType,
    pub semantic: VertexElementSemantic,
    /// Semantic index, e.g. the second texture coordinate set is 1
    pub index: u8,
    pub per_instance: bool,
    /// Byte offset inside the vertex, filled in by `update_offsets`
    pub offset: u32,
}

impl VertexElement {
    pub const fn new(ty: VertexElementType, semantic: VertexElementSemantic, index: u8) -> Self {
        Self { ty, semantic, index, per_instance: false, offset: 0 }
    }

    const fn instanced(ty: VertexElementType, semantic: VertexElementSemantic, index: u8) -> Self {
        Self { ty, semantic, index, per_instance: true, offset: 0 }
    }

    /// Packed descriptor used by the UMD2 model format
    pub fn to_desc(&self) -> u32 {
        self.ty as u32 | (self.semantic as u32) << 8 | (self.index as u32) << 16
    }

    /// Decode a UMD2 descriptor
    pub fn from_desc(desc: u32) -> Result<Self> {
        let ty = VertexElementType::from_u8((desc & 0xff) as u8)
            .ok_or_else(|| Error::Model(format!("unknown vertex element type in descriptor {:#x}", desc)))?;
        let semantic = VertexElementSemantic::from_u8(((desc >> 8) & 0xff) as u8)
            .ok_or_else(|| Error::Model(format!("unknown vertex element semantic in descriptor {:#x}", desc)))?;
        Ok(Self::new(ty, semantic, ((desc >> 16) & 0xff) as u8))
    }
}

/// Legacy element mask bits
pub mod mask {
    pub const POSITION: u32 = 0x1;
    pub const NORMAL: u32 = 0x2;
    pub const COLOR: u32 = 0x4;
    pub const TEXCOORD1: u32 = 0x8;
    pub const TEXCOORD2: u32 = 0x10;
    pub const CUBE_TEXCOORD1: u32 = 0x20;
    pub const CUBE_TEXCOORD2: u32 = 0x40;
    pub const TANGENT: u32 = 0x80;
    pub const BLEND_WEIGHTS: u32 = 0x100;
    pub const BLEND_INDICES: u32 = 0x200;
    pub const INSTANCE_MATRIX1: u32 = 0x400;
    pub const INSTANCE_MATRIX2: u32 = 0x800;
    pub const INSTANCE_MATRIX3: u32 = 0x1000;
    pub const OBJECT_INDEX: u32 = 0x2000;
}

use VertexElementSemantic as S;
use VertexElementType as T;

/// Element for each legacy mask bit, in bit order
pub const LEGACY_ELEMENTS: [VertexElement; 14] = [
    VertexElement::new(T::Vector3, S::Position, 0),
    VertexElement::new(T::Vector3, S::Normal, 0),
    VertexElement::new(T::UByte4Norm, S::Color, 0),
    VertexElement::new(T::Vector2, S::TexCoord, 0),
    VertexElement::new(T::Vector2, S::TexCoord, 1),
    VertexElement::new(T::Vector3, S::TexCoord, 0),
    VertexElement::new(T::Vector3, S::TexCoord, 1),
    VertexElement::new(T::Vector4, S::Tangent, 0),
    VertexElement::new(T::Vector4, S::BlendWeights, 0),
    VertexElement::new(T::UByte4, S::BlendIndices, 0),
    VertexElement::instanced(T::Vector4, S::TexCoord, 4),
    VertexElement::instanced(T::Vector4, S::TexCoord, 5),
    VertexElement::instanced(T::Vector4, S::TexCoord, 6),
    VertexElement::new(T::Int, S::ObjectIndex, 0),
];

/// Expand a legacy mask into an element list with offsets
pub fn elements_from_mask(element_mask: u32) -> Vec<VertexElement> {
    let mut elements: Vec<VertexElement> = LEGACY_ELEMENTS
        .iter()
        .enumerate()
        .filter(|(bit, _)| element_mask & (1 << bit) != 0)
        .map(|(_, e)| *e)
        .collect();
    update_offsets(&mut elements);
    elements
}

/// Legacy mask describing `elements`; elements with no legacy bit are ignored
pub fn mask_from_elements(elements: &[VertexElement]) -> u32 {
    let mut result = 0;
    for element in elements {
        for (bit, legacy) in LEGACY_ELEMENTS.iter().enumerate() {
            if legacy.ty == element.ty
                && legacy.semantic == element.semantic
                && legacy.index == element.index
                && legacy.per_instance == element.per_instance
            {
                result |= 1 << bit;
            }
        }
    }
    result
}

/// Lay the elements out back to back; returns the vertex size
pub fn update_offsets(elements: &mut [VertexElement]) -> u32 {
    let mut offset = 0;
    for element in elements.iter_mut() {
        element.offset = offset;
        offset += element.ty.size();
    }
    offset
}

/// Total size of one vertex
pub fn vertex_size(elements: &[VertexElement]) -> u32 {
    elements.iter().map(|e| e.ty.size()).sum()
}

/// Find an element by type, semantic and index
pub fn find_element(
    elements: &[VertexElement],
    ty: VertexElementType,
    semantic: VertexElementSemantic,
    index: u8,
) -> Option<&VertexElement> {
    elements
        .iter()
        .find(|e| e.ty == ty && e.semantic == semantic && e.index == index)
}
