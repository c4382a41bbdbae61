//! Terrain patches

use std::sync::{Arc, RwLock};

use bytemuck::{Pod, Zeroable};

use crate::core::error::Error;
use crate::core::types::{IVec2, Mat4, Vec3};
use crate::core::Result;
use crate::math::Aabb;
use crate::render::buffer::element::mask;
use crate::render::buffer::{read_lock, write_lock, SharedIndexBuffer, SharedVertexBuffer, VertexBuffer};
use crate::render::device::GraphicsDevice;
use crate::render::geometry::{Geometry, PrimitiveType};

use super::heightfield::Heightfield;
use super::index_table::IndexTable;
use super::lod::draw_range_index;
use super::world::PatchId;

/// Vertex layout of terrain patches
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct TerrainVertex {
    /// Patch-local position (12 bytes, offset 0)
    pub position: [f32; 3],
    /// (12 bytes, offset 12)
    pub normal: [f32; 3],
    /// Heightmap-wide texture coordinate (8 bytes, offset 24)
    pub uv: [f32; 2],
    /// Tangent along +X, w = 1 (16 bytes, offset 32)
    pub tangent: [f32; 4],
}

impl TerrainVertex {
    /// Legacy element mask matching the field order
    pub const ELEMENT_MASK: u32 = mask::POSITION | mask::NORMAL | mask::TEXCOORD1 | mask::TANGENT;
}

/// CPU-side results of building one patch, ready for upload
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PatchVertexData {
    pub vertices: Vec<TerrainVertex>,
    /// Positions only, for ray queries
    pub positions: Vec<[f32; 3]>,
    /// Positions lowered to the neighbourhood minimum on occlusion LOD vertices
    pub occlusion: Vec<[f32; 3]>,
    /// Patch-local bounds
    pub bbox: Aabb,
}

/// Build the vertices of the patch at `coords`.
///
/// Vertex `(x, z)` is at index `z * (patch_size + 1) + x`. Pure read of the
/// heightfield, safe to run for many patches in parallel.
pub fn build_patch_vertices(
    heightfield: &Heightfield,
    coords: IVec2,
    patch_size: i32,
    occlusion_lod: u32,
) -> PatchVertexData {
    let spacing = heightfield.spacing();
    let size = heightfield.size();
    let row = (patch_size + 1) as usize;
    let uv_scale = (size - IVec2::ONE).max(IVec2::ONE).as_vec2();

    let occlusion_mask = (1i32 << occlusion_lod) - 1;
    let half_expand = (1i32 << occlusion_lod) / 2;

    let mut data = PatchVertexData {
        vertices: Vec::with_capacity(row * row),
        positions: Vec::with_capacity(row * row),
        occlusion: Vec::with_capacity(row * row),
        bbox: Aabb::EMPTY,
    };

    for z in 0..=patch_size {
        for x in 0..=patch_size {
            let x_pos = coords.x * patch_size + x;
            let z_pos = coords.y * patch_size + z;

            let position = Vec3::new(
                x as f32 * spacing.x,
                heightfield.raw_height(x_pos, z_pos),
                z as f32 * spacing.z,
            );
            let normal = heightfield.raw_normal(x_pos, z_pos);
            let tangent = (Vec3::X - normal * normal.dot(Vec3::X)).normalize_or(Vec3::X);

            data.vertices.push(TerrainVertex {
                position: position.to_array(),
                normal: normal.to_array(),
                uv: [x_pos as f32 / uv_scale.x, 1.0 - z_pos as f32 / uv_scale.y],
                tangent: tangent.extend(1.0).to_array(),
            });
            data.positions.push(position.to_array());
            data.bbox.expand(position);

            // Occlusion geometry must never poke above the visible surface
            let mut min_height = position.y;
            if half_expand > 0 && x & occlusion_mask == 0 && z & occlusion_mask == 0 {
                for nz in (z_pos - half_expand).max(0)..=(z_pos + half_expand).min(size.y - 1) {
                    for nx in (x_pos - half_expand).max(0)..=(x_pos + half_expand).min(size.x - 1) {
                        min_height = min_height.min(heightfield.raw_height(nx, nz));
                    }
                }
            }
            data.occlusion.push([position.x, min_height, position.z]);
        }
    }

    data
}

/// One tile of a terrain with its own vertex buffer and three views of it
#[derive(Debug)]
pub struct TerrainPatch {
    coords: IVec2,
    position: Vec3,
    lod_errors: Vec<f32>,
    lod_level: u32,
    stitch_mask: u8,
    pub(crate) neighbors: [Option<PatchId>; 4],
    /// Last applied LOD of each neighbour, so a terrain can restitch
    /// without access to linked terrains
    pub(crate) neighbor_lods: [Option<u32>; 4],
    vertex_buffer: SharedVertexBuffer,
    geometry: Geometry,
    max_lod_geometry: Geometry,
    occlusion_geometry: Geometry,
    bbox: Aabb,
    distance: f32,
    lod_distance: f32,
}

impl TerrainPatch {
    /// Empty patch at grid `coords`, placed at terrain-local `position`
    pub fn new(device: &GraphicsDevice, coords: IVec2, position: Vec3) -> Self {
        let vertex_buffer = Arc::new(RwLock::new(VertexBuffer::new(device)));
        let view = |vb: &SharedVertexBuffer| Geometry::with_vertex_buffer(vb.clone());
        Self {
            coords,
            position,
            lod_errors: Vec::new(),
            lod_level: 0,
            stitch_mask: 0,
            neighbors: [None; 4],
            neighbor_lods: [None; 4],
            geometry: view(&vertex_buffer),
            max_lod_geometry: view(&vertex_buffer),
            occlusion_geometry: view(&vertex_buffer),
            vertex_buffer,
            bbox: Aabb::EMPTY,
            distance: 0.0,
            lod_distance: 0.0,
        }
    }

    /// Upload built vertices and point all three geometries at them.
    ///
    /// The visible and max-LOD geometries draw full resolution, the occlusion
    /// geometry draws `occlusion_lod` over the lowered snapshot.
    pub fn apply_vertex_data(
        &mut self,
        data: &PatchVertexData,
        index_buffer: &SharedIndexBuffer,
        raw_indices: &Arc<[u8]>,
        table: &IndexTable,
        occlusion_lod: u32,
    ) -> Result<()> {
        {
            let mut vb = write_lock(&self.vertex_buffer);
            let count = data.vertices.len() as u32;
            if vb.vertex_count() != count || vb.element_mask() != TerrainVertex::ELEMENT_MASK {
                vb.set_size_mask(count, TerrainVertex::ELEMENT_MASK, false)?;
            }
            vb.set_data(bytemuck::cast_slice(&data.vertices))?;
        }

        let positions: Arc<[u8]> = Arc::from(bytemuck::cast_slice::<[f32; 3], u8>(&data.positions));
        let occlusion: Arc<[u8]> = Arc::from(bytemuck::cast_slice::<[f32; 3], u8>(&data.occlusion));

        let full = table.draw_range(0).unwrap_or_default();
        let occlusion_range = table.draw_range(draw_range_index(occlusion_lod, 0)).unwrap_or(full);

        for (geometry, raw, (start, count)) in [
            (&mut self.geometry, &positions, full),
            (&mut self.max_lod_geometry, &positions, full),
            (&mut self.occlusion_geometry, &occlusion, occlusion_range),
        ] {
            geometry.set_index_buffer(Some(index_buffer.clone()));
            geometry.set_raw_vertex_data_mask(raw.clone(), mask::POSITION);
            geometry.set_raw_index_data(raw_indices.clone(), 2)?;
            geometry.set_draw_range(PrimitiveType::TriangleList, start, count, false)?;
        }

        self.bbox = data.bbox;
        self.lod_level = 0;
        self.stitch_mask = 0;
        write_lock(&self.vertex_buffer).clear_data_lost();
        Ok(())
    }

    /// Switch the visible geometry to a LOD level and stitch variant
    pub(crate) fn set_lod(&mut self, lod: u32, stitch_mask: u8, table: &IndexTable) -> Result<()> {
        let (start, count) = table
            .draw_range(draw_range_index(lod, stitch_mask))
            .ok_or_else(|| Error::OutOfRange(format!("LOD {} with stitch mask {:#x}", lod, stitch_mask)))?;
        self.geometry.set_draw_range(PrimitiveType::TriangleList, start, count, false)?;
        self.lod_level = lod;
        self.stitch_mask = stitch_mask;
        Ok(())
    }

    pub(crate) fn set_lod_errors(&mut self, errors: Vec<f32>) {
        self.lod_errors = errors;
    }

    pub(crate) fn set_distances(&mut self, distance: f32, lod_distance: f32) {
        self.distance = distance;
        self.lod_distance = lod_distance;
    }

    pub fn coords(&self) -> IVec2 {
        self.coords
    }

    /// Offset from the terrain origin
    pub fn position(&self) -> Vec3 {
        self.position
    }

    /// Maximum height deviation per LOD level; level 0 is always zero
    pub fn lod_errors(&self) -> &[f32] {
        &self.lod_errors
    }

    pub fn lod_level(&self) -> u32 {
        self.lod_level
    }

    pub fn stitch_mask(&self) -> u8 {
        self.stitch_mask
    }

    /// Neighbour patches in North, South, West, East order
    pub fn neighbors(&self) -> [Option<PatchId>; 4] {
        self.neighbors
    }

    /// Neighbour LODs used for the current stitch mask
    pub fn neighbor_lods(&self) -> [Option<u32>; 4] {
        self.neighbor_lods
    }

    pub fn vertex_buffer(&self) -> &SharedVertexBuffer {
        &self.vertex_buffer
    }

    /// Geometry drawn this frame
    pub fn geometry(&self) -> &Geometry {
        &self.geometry
    }

    /// Full resolution geometry
    pub fn max_lod_geometry(&self) -> &Geometry {
        &self.max_lod_geometry
    }

    /// Coarse conservative geometry for occlusion rendering
    pub fn occlusion_geometry(&self) -> &Geometry {
        &self.occlusion_geometry
    }

    /// Patch-local bounds
    pub fn bounding_box(&self) -> Aabb {
        self.bbox
    }

    /// Patch to terrain-local transform
    pub fn local_transform(&self) -> Mat4 {
        Mat4::from_translation(self.position)
    }

    /// Bounds in world space given the terrain transform
    pub fn world_bounding_box(&self, terrain_transform: &Mat4) -> Aabb {
        if !self.bbox.is_valid() {
            return self.bbox;
        }
        self.bbox.transformed(&(*terrain_transform * self.local_transform()))
    }

    /// Camera distance from the last LOD update
    pub fn distance(&self) -> f32 {
        self.distance
    }

    pub fn lod_distance(&self) -> f32 {
        self.lod_distance
    }

    pub fn is_data_lost(&self) -> bool {
        read_lock(&self.vertex_buffer).is_data_lost()
    }
}
