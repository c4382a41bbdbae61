//! Draw batches handed to a renderer

use std::sync::Arc;

use crate::core::types::Mat4;
use crate::render::geometry::Geometry;
use crate::terrain::PatchId;

/// Opaque reference to a material owned by the renderer.
///
/// Terrain code only stores and forwards it.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct MaterialHandle(Arc<str>);

impl MaterialHandle {
    pub fn new(name: impl Into<Arc<str>>) -> Self {
        Self(name.into())
    }

    pub fn name(&self) -> &str {
        &self.0
    }
}

/// One patch geometry to draw this frame
#[derive(Clone, Copy, Debug)]
pub struct DrawBatch<'a> {
    pub patch: PatchId,
    pub geometry: &'a Geometry,
    pub material: Option<&'a MaterialHandle>,
    pub world_transform: Mat4,
    /// Camera distance to the patch bounds centre
    pub distance: f32,
    pub lod_distance: f32,
}
