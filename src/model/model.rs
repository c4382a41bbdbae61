//! Binary model container: vertex/index buffers, LOD geometries, morphs and skeleton

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;
use std::sync::{Arc, RwLock};

use crate::core::error::Error;
use crate::core::types::Vec3;
use crate::core::Result;
use crate::math::Aabb;
use crate::render::buffer::element::{self, mask, VertexElement};
use crate::render::buffer::{read_lock, IndexBuffer, SharedIndexBuffer, SharedVertexBuffer, VertexBuffer};
use crate::render::device::GraphicsDevice;
use crate::render::geometry::{Geometry, PrimitiveType};

use super::io::*;
use super::skeleton::{Bone, Skeleton};

const MAGIC_LEGACY: &[u8; 4] = b"UMDL";
const MAGIC: &[u8; 4] = b"UMD2";

/// Vertex deltas of one morph target for one vertex buffer
#[derive(Clone, Debug, PartialEq)]
pub struct MorphBuffer {
    pub buffer_index: u32,
    /// Legacy mask; only position, normal and tangent are meaningful
    pub element_mask: u32,
    pub vertex_count: u32,
    /// Per vertex: u32 index then a Vector3 per masked element
    pub data: Vec<u8>,
}

impl MorphBuffer {
    /// Bytes per morphed vertex
    pub fn stride(element_mask: u32) -> usize {
        let sets = [mask::POSITION, mask::NORMAL, mask::TANGENT]
            .iter()
            .filter(|&&bit| element_mask & bit != 0)
            .count();
        4 + 12 * sets
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct ModelMorph {
    pub name: String,
    pub buffers: Vec<MorphBuffer>,
}

/// A mesh resource made of shared buffers and per-LOD geometries
#[derive(Debug, Default)]
pub struct Model {
    vertex_buffers: Vec<SharedVertexBuffer>,
    morph_ranges: Vec<(u32, u32)>,
    index_buffers: Vec<SharedIndexBuffer>,
    /// `geometries[i][lod]`
    geometries: Vec<Vec<Geometry>>,
    bone_mappings: Vec<Vec<u32>>,
    geometry_centers: Vec<Vec3>,
    morphs: Vec<ModelMorph>,
    skeleton: Skeleton,
    bounding_box: Aabb,
}

impl Model {
    pub fn new() -> Self {
        Self { bounding_box: Aabb::EMPTY, ..Default::default() }
    }

    pub fn load_file(device: &GraphicsDevice, path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let mut reader = BufReader::new(File::open(path)?);
        let model = Self::load(device, &mut reader)?;
        log::info!(
            "Loaded model {}: {} geometries, {} bones",
            path.display(),
            model.num_geometries(),
            model.skeleton.bone_count()
        );
        Ok(model)
    }

    /// Read a `UMDL` or `UMD2` container, creating shadowed buffers on `device`
    pub fn load(device: &GraphicsDevice, reader: &mut impl Read) -> Result<Self> {
        let magic = read_array::<4>(reader)?;
        let has_descriptors = match &magic {
            m if m == MAGIC => true,
            m if m == MAGIC_LEGACY => false,
            m => return Err(Error::Model(format!("unknown model format {:?}", String::from_utf8_lossy(m)))),
        };

        let mut model = Self::new();

        // Vertex buffers, with a CPU copy kept for geometry queries
        let mut raw_vertices: Vec<(Arc<[u8]>, Vec<VertexElement>)> = Vec::new();
        let num_vertex_buffers = read_u32(reader)?;
        for _ in 0..num_vertex_buffers {
            let vertex_count = read_u32(reader)?;
            let elements = if has_descriptors {
                let num_elements = read_u32(reader)?;
                let mut elements = Vec::new();
                for _ in 0..num_elements {
                    elements.push(VertexElement::from_desc(read_u32(reader)?)?);
                }
                elements
            } else {
                element::elements_from_mask(read_u32(reader)?)
            };
            let morph_range = (read_u32(reader)?, read_u32(reader)?);

            let vertex_size = element::vertex_size(&elements) as usize;
            let data = read_bytes(reader, vertex_count as usize * vertex_size)?;
            let mut buffer = VertexBuffer::new(device);
            buffer.set_size(vertex_count, &elements, false)?;
            buffer.set_data(&data)?;

            raw_vertices.push((Arc::from(data), buffer.elements().to_vec()));
            model.vertex_buffers.push(Arc::new(RwLock::new(buffer)));
            model.morph_ranges.push(morph_range);
        }

        let mut raw_indices: Vec<(Arc<[u8]>, u32)> = Vec::new();
        let num_index_buffers = read_u32(reader)?;
        for _ in 0..num_index_buffers {
            let index_count = read_u32(reader)?;
            let index_size = read_u32(reader)?;
            if index_size != 2 && index_size != 4 {
                return Err(Error::Model(format!("index size must be 2 or 4, got {}", index_size)));
            }
            let data = read_bytes(reader, index_count as usize * index_size as usize)?;
            let mut buffer = IndexBuffer::new(device);
            buffer.set_size(index_count, index_size == 4, false)?;
            buffer.set_data(&data)?;

            raw_indices.push((Arc::from(data), index_size));
            model.index_buffers.push(Arc::new(RwLock::new(buffer)));
        }

        let num_geometries = read_u32(reader)?;
        for g in 0..num_geometries {
            let num_mappings = read_u32(reader)?;
            let mut mapping = Vec::new();
            for _ in 0..num_mappings {
                mapping.push(read_u32(reader)?);
            }

            let num_lod_levels = read_u32(reader)?;
            let mut lods = Vec::new();
            for lod in 0..num_lod_levels {
                let distance = read_f32(reader)?;
                let primitive = read_u32(reader)?;
                let primitive = PrimitiveType::from_u32(primitive)
                    .ok_or_else(|| Error::Model(format!("unknown primitive type {}", primitive)))?;
                let vb_ref = read_u32(reader)? as usize;
                let ib_ref = read_u32(reader)? as usize;
                let index_start = read_u32(reader)?;
                let index_count = read_u32(reader)?;

                let (Some(vb), Some(ib)) = (model.vertex_buffers.get(vb_ref), model.index_buffers.get(ib_ref)) else {
                    return Err(Error::Model(format!(
                        "geometry {} LOD {} references buffers {}/{} out of {}/{}",
                        g,
                        lod,
                        vb_ref,
                        ib_ref,
                        model.vertex_buffers.len(),
                        model.index_buffers.len()
                    )));
                };
                if index_start as u64 + index_count as u64 > read_lock(ib).index_count() as u64 {
                    return Err(Error::Model(format!(
                        "geometry {} LOD {} draws indices {}+{} past the end of its index buffer",
                        g, lod, index_start, index_count
                    )));
                }

                let mut geometry = Geometry::new();
                geometry.set_vertex_buffer(0, vb.clone())?;
                geometry.set_index_buffer(Some(ib.clone()));
                geometry.set_draw_range(primitive, index_start, index_count, true)?;
                geometry.set_lod_distance(distance);
                let (vertices, elements) = &raw_vertices[vb_ref];
                geometry.set_raw_vertex_data(vertices.clone(), elements);
                let (indices, index_size) = &raw_indices[ib_ref];
                geometry.set_raw_index_data(indices.clone(), *index_size)?;
                lods.push(geometry);
            }

            model.geometries.push(lods);
            model.bone_mappings.push(mapping);
        }

        let num_morphs = read_u32(reader)?;
        for _ in 0..num_morphs {
            let name = read_cstring(reader)?;
            let num_buffers = read_u32(reader)?;
            let mut buffers = Vec::new();
            for _ in 0..num_buffers {
                let buffer_index = read_u32(reader)?;
                if buffer_index as usize >= model.vertex_buffers.len() {
                    return Err(Error::Model(format!("morph {} references vertex buffer {}", name, buffer_index)));
                }
                let element_mask = read_u32(reader)?;
                let vertex_count = read_u32(reader)?;
                let data = read_bytes(reader, vertex_count as usize * MorphBuffer::stride(element_mask))?;
                buffers.push(MorphBuffer { buffer_index, element_mask, vertex_count, data });
            }
            model.morphs.push(ModelMorph { name, buffers });
        }

        let num_bones = read_u32(reader)?;
        let mut bones = Vec::new();
        for index in 0..num_bones {
            let name = read_cstring(reader)?;
            // A bone that is its own parent is a root
            let parent = read_u32(reader)?;
            let mut bone = Bone::new(name, (parent != index).then_some(parent as usize));
            bone.initial_position = read_vec3(reader)?;
            bone.initial_rotation = read_quat(reader)?;
            bone.initial_scale = read_vec3(reader)?;
            bone.offset_matrix = read_matrix3x4(reader)?;
            let collision = read_u8(reader)?;
            if collision & 1 != 0 {
                bone.radius = Some(read_f32(reader)?);
            }
            if collision & 2 != 0 {
                bone.bounding_box = Some(read_aabb(reader)?);
            }
            bones.push(bone);
        }
        model.skeleton = Skeleton::from_bones(bones)?;

        model.bounding_box = read_aabb(reader)?;

        // Geometry centers are optional trailing data
        let mut rest = Vec::new();
        reader.read_to_end(&mut rest)?;
        model.geometry_centers = vec![Vec3::ZERO; model.geometries.len()];
        for (center, chunk) in model.geometry_centers.iter_mut().zip(rest.chunks_exact(12)) {
            let mut cursor = chunk;
            *center = read_vec3(&mut cursor)?;
        }

        log::debug!(
            "Read model: {} vertex buffers, {} index buffers, {} geometries, {} morphs",
            model.vertex_buffers.len(),
            model.index_buffers.len(),
            model.geometries.len(),
            model.morphs.len()
        );
        Ok(model)
    }

    pub fn save_file(&self, path: impl AsRef<Path>) -> Result<()> {
        let mut writer = BufWriter::new(File::create(path)?);
        self.save(&mut writer)?;
        writer.flush()?;
        Ok(())
    }

    /// Write the model as `UMD2`
    pub fn save(&self, writer: &mut impl Write) -> Result<()> {
        writer.write_all(MAGIC)?;

        write_u32(writer, self.vertex_buffers.len() as u32)?;
        for (buffer, &(morph_start, morph_count)) in self.vertex_buffers.iter().zip(&self.morph_ranges) {
            let buffer = read_lock(buffer);
            write_u32(writer, buffer.vertex_count())?;
            write_u32(writer, buffer.elements().len() as u32)?;
            for element in buffer.elements() {
                write_u32(writer, element.to_desc())?;
            }
            write_u32(writer, morph_start)?;
            write_u32(writer, morph_count)?;
            writer.write_all(&buffer.read(0, buffer.vertex_count())?)?;
        }

        write_u32(writer, self.index_buffers.len() as u32)?;
        for buffer in &self.index_buffers {
            let buffer = read_lock(buffer);
            write_u32(writer, buffer.index_count())?;
            write_u32(writer, buffer.index_size())?;
            writer.write_all(&buffer.read(0, buffer.index_count())?)?;
        }

        write_u32(writer, self.geometries.len() as u32)?;
        for (g, lods) in self.geometries.iter().enumerate() {
            let mapping = self.bone_mappings.get(g).map(Vec::as_slice).unwrap_or_default();
            write_u32(writer, mapping.len() as u32)?;
            for &bone in mapping {
                write_u32(writer, bone)?;
            }

            write_u32(writer, lods.len() as u32)?;
            for (lod, geometry) in lods.iter().enumerate() {
                let vb_ref = geometry
                    .vertex_buffer(0)
                    .and_then(|vb| self.vertex_buffers.iter().position(|b| Arc::ptr_eq(b, vb)));
                let ib_ref = geometry
                    .index_buffer()
                    .and_then(|ib| self.index_buffers.iter().position(|b| Arc::ptr_eq(b, ib)));
                let (Some(vb_ref), Some(ib_ref)) = (vb_ref, ib_ref) else {
                    return Err(Error::Model(format!(
                        "geometry {} LOD {} uses buffers that do not belong to the model",
                        g, lod
                    )));
                };
                write_f32(writer, geometry.lod_distance())?;
                write_u32(writer, geometry.primitive_type() as u32)?;
                write_u32(writer, vb_ref as u32)?;
                write_u32(writer, ib_ref as u32)?;
                write_u32(writer, geometry.index_start())?;
                write_u32(writer, geometry.index_count())?;
            }
        }

        write_u32(writer, self.morphs.len() as u32)?;
        for morph in &self.morphs {
            write_cstring(writer, &morph.name)?;
            write_u32(writer, morph.buffers.len() as u32)?;
            for buffer in &morph.buffers {
                write_u32(writer, buffer.buffer_index)?;
                write_u32(writer, buffer.element_mask)?;
                write_u32(writer, buffer.vertex_count)?;
                writer.write_all(&buffer.data)?;
            }
        }

        let bones = self.skeleton.bones();
        write_u32(writer, bones.len() as u32)?;
        for (index, bone) in bones.iter().enumerate() {
            write_cstring(writer, &bone.name)?;
            write_u32(writer, bone.parent_index.unwrap_or(index) as u32)?;
            write_vec3(writer, bone.initial_position)?;
            write_quat(writer, bone.initial_rotation)?;
            write_vec3(writer, bone.initial_scale)?;
            write_matrix3x4(writer, &bone.offset_matrix)?;
            let collision = bone.radius.is_some() as u8 | (bone.bounding_box.is_some() as u8) << 1;
            write_u8(writer, collision)?;
            if let Some(radius) = bone.radius {
                write_f32(writer, radius)?;
            }
            if let Some(bounds) = &bone.bounding_box {
                write_aabb(writer, bounds)?;
            }
        }

        write_aabb(writer, &self.bounding_box)?;
        for g in 0..self.geometries.len() {
            write_vec3(writer, self.geometry_center(g))?;
        }
        Ok(())
    }

    // ---- Construction ----

    /// Add a vertex buffer with its morphable vertex range. Returns its index.
    pub fn add_vertex_buffer(&mut self, buffer: SharedVertexBuffer, morph_range: (u32, u32)) -> usize {
        self.vertex_buffers.push(buffer);
        self.morph_ranges.push(morph_range);
        self.vertex_buffers.len() - 1
    }

    pub fn add_index_buffer(&mut self, buffer: SharedIndexBuffer) -> usize {
        self.index_buffers.push(buffer);
        self.index_buffers.len() - 1
    }

    /// Add a geometry given its LOD levels, finest first. Returns its index.
    pub fn add_geometry(&mut self, lods: Vec<Geometry>, bone_mapping: Vec<u32>, center: Vec3) -> usize {
        self.geometries.push(lods);
        self.bone_mappings.push(bone_mapping);
        self.geometry_centers.push(center);
        self.geometries.len() - 1
    }

    pub fn add_morph(&mut self, morph: ModelMorph) -> Result<()> {
        if let Some(b) = morph.buffers.iter().find(|b| b.buffer_index as usize >= self.vertex_buffers.len()) {
            return Err(Error::OutOfRange(format!("morph {} references vertex buffer {}", morph.name, b.buffer_index)));
        }
        self.morphs.push(morph);
        Ok(())
    }

    pub fn set_skeleton(&mut self, skeleton: Skeleton) {
        self.skeleton = skeleton;
    }

    pub fn set_bounding_box(&mut self, bounding_box: Aabb) {
        self.bounding_box = bounding_box;
    }

    // ---- Access ----

    pub fn vertex_buffers(&self) -> &[SharedVertexBuffer] {
        &self.vertex_buffers
    }

    pub fn index_buffers(&self) -> &[SharedIndexBuffer] {
        &self.index_buffers
    }

    /// `(start, count)` of the vertices morphs may touch
    pub fn morph_range(&self, vertex_buffer: usize) -> Option<(u32, u32)> {
        self.morph_ranges.get(vertex_buffer).copied()
    }

    pub fn num_geometries(&self) -> usize {
        self.geometries.len()
    }

    pub fn num_geometry_lod_levels(&self, index: usize) -> usize {
        self.geometries.get(index).map_or(0, Vec::len)
    }

    pub fn geometry(&self, index: usize, lod: usize) -> Option<&Geometry> {
        self.geometries.get(index)?.get(lod)
    }

    /// Coarsest LOD whose switch distance has been reached
    pub fn geometry_for_distance(&self, index: usize, distance: f32) -> Option<&Geometry> {
        let lods = self.geometries.get(index)?;
        lods.iter().rev().find(|g| distance >= g.lod_distance()).or(lods.first())
    }

    pub fn geometry_bone_mapping(&self, index: usize) -> Option<&[u32]> {
        self.bone_mappings.get(index).map(Vec::as_slice)
    }

    pub fn geometry_center(&self, index: usize) -> Vec3 {
        self.geometry_centers.get(index).copied().unwrap_or(Vec3::ZERO)
    }

    pub fn morphs(&self) -> &[ModelMorph] {
        &self.morphs
    }

    pub fn skeleton(&self) -> &Skeleton {
        &self.skeleton
    }

    pub fn bounding_box(&self) -> Aabb {
        self.bounding_box
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{Mat4, Quat};
    use crate::math::Ray;
    use crate::render::buffer::write_lock;
    use std::io::Cursor;

    /// A unit quad in the xz plane facing +y, two LODs sharing buffers
    fn quad_bytes(magic: &[u8; 4]) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(magic);

        write_u32(&mut out, 1).unwrap();
        write_u32(&mut out, 4).unwrap();
        if magic == MAGIC {
            let elements = element::elements_from_mask(mask::POSITION | mask::NORMAL);
            write_u32(&mut out, elements.len() as u32).unwrap();
            for e in &elements {
                write_u32(&mut out, e.to_desc()).unwrap();
            }
        } else {
            write_u32(&mut out, mask::POSITION | mask::NORMAL).unwrap();
        }
        write_u32(&mut out, 0).unwrap();
        write_u32(&mut out, 4).unwrap();
        for p in [[0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [0.0, 0.0, 1.0], [1.0, 0.0, 1.0]] {
            write_vec3(&mut out, Vec3::from_array(p)).unwrap();
            write_vec3(&mut out, Vec3::Y).unwrap();
        }

        write_u32(&mut out, 1).unwrap();
        write_u32(&mut out, 6).unwrap();
        write_u32(&mut out, 2).unwrap();
        for i in [0u16, 2, 1, 1, 2, 3] {
            out.extend_from_slice(&i.to_le_bytes());
        }

        write_u32(&mut out, 1).unwrap();
        write_u32(&mut out, 2).unwrap();
        write_u32(&mut out, 0).unwrap();
        write_u32(&mut out, 1).unwrap();
        write_u32(&mut out, 2).unwrap();
        for (distance, start, count) in [(0.0, 0, 6), (50.0, 0, 3)] {
            write_f32(&mut out, distance).unwrap();
            write_u32(&mut out, PrimitiveType::TriangleList as u32).unwrap();
            write_u32(&mut out, 0).unwrap();
            write_u32(&mut out, 0).unwrap();
            write_u32(&mut out, start).unwrap();
            write_u32(&mut out, count).unwrap();
        }

        // One morph moving vertex 3 up
        write_u32(&mut out, 1).unwrap();
        write_cstring(&mut out, "bump").unwrap();
        write_u32(&mut out, 1).unwrap();
        write_u32(&mut out, 0).unwrap();
        write_u32(&mut out, mask::POSITION).unwrap();
        write_u32(&mut out, 1).unwrap();
        write_u32(&mut out, 3).unwrap();
        write_vec3(&mut out, Vec3::Y).unwrap();

        // Root bone plus a child with a collision sphere
        write_u32(&mut out, 2).unwrap();
        for (i, name) in ["root", "tip"].iter().enumerate() {
            write_cstring(&mut out, name).unwrap();
            write_u32(&mut out, 0).unwrap();
            write_vec3(&mut out, Vec3::new(0.0, i as f32, 0.0)).unwrap();
            write_quat(&mut out, Quat::IDENTITY).unwrap();
            write_vec3(&mut out, Vec3::ONE).unwrap();
            write_matrix3x4(&mut out, &Mat4::IDENTITY).unwrap();
            if i == 1 {
                write_u8(&mut out, 1).unwrap();
                write_f32(&mut out, 0.25).unwrap();
            } else {
                write_u8(&mut out, 0).unwrap();
            }
        }

        write_aabb(&mut out, &Aabb::new(Vec3::ZERO, Vec3::new(1.0, 0.0, 1.0))).unwrap();
        out
    }

    #[test]
    fn test_load_umd2() {
        let device = GraphicsDevice::headless();
        let model = Model::load(&device, &mut Cursor::new(quad_bytes(MAGIC))).unwrap();

        assert_eq!(model.num_geometries(), 1);
        assert_eq!(model.num_geometry_lod_levels(0), 2);
        assert_eq!(model.geometry_bone_mapping(0), Some(&[1u32][..]));
        assert_eq!(model.morph_range(0), Some((0, 4)));
        assert_eq!(model.morphs()[0].name, "bump");
        assert_eq!(model.bounding_box().max, Vec3::new(1.0, 0.0, 1.0));
        // No trailing centers in the file
        assert_eq!(model.geometry_center(0), Vec3::ZERO);

        let lod1 = model.geometry(0, 1).unwrap();
        assert_eq!((lod1.index_start(), lod1.index_count()), (0, 3));
        assert_eq!((lod1.vertex_start(), lod1.vertex_count()), (0, 3));
        assert_eq!(lod1.lod_distance(), 50.0);
        assert!(read_lock(&model.vertex_buffers()[0]).is_shadowed());

        let skeleton = model.skeleton();
        assert_eq!(skeleton.bone_count(), 2);
        assert_eq!(skeleton.root_bone(), Some(0));
        assert_eq!(skeleton.bone(1).unwrap().parent_index, Some(0));
        assert_eq!(skeleton.bone(1).unwrap().radius, Some(0.25));
    }

    #[test]
    fn test_load_legacy_mask() {
        let device = GraphicsDevice::headless();
        let model = Model::load(&device, &mut Cursor::new(quad_bytes(MAGIC_LEGACY))).unwrap();
        let vb = read_lock(&model.vertex_buffers()[0]);
        assert_eq!(vb.element_mask(), mask::POSITION | mask::NORMAL);
        assert_eq!(vb.vertex_size(), 24);
    }

    #[test]
    fn test_lod_for_distance() {
        let device = GraphicsDevice::headless();
        let model = Model::load(&device, &mut Cursor::new(quad_bytes(MAGIC))).unwrap();
        assert_eq!(model.geometry_for_distance(0, 10.0).unwrap().index_count(), 6);
        assert_eq!(model.geometry_for_distance(0, 80.0).unwrap().index_count(), 3);
        assert!(model.geometry_for_distance(1, 10.0).is_none());
    }

    #[test]
    fn test_geometry_raycast_uses_raw_data() {
        let device = GraphicsDevice::headless();
        let model = Model::load(&device, &mut Cursor::new(quad_bytes(MAGIC))).unwrap();
        // Raw snapshots survive changes to the GPU-side buffer
        write_lock(&model.vertex_buffers()[0]).set_shadowed(false).unwrap();

        let geometry = model.geometry(0, 0).unwrap();
        let ray = Ray::new(Vec3::new(0.75, 2.0, 0.75), Vec3::NEG_Y);
        let hit = geometry.raycast(&ray, false).unwrap();
        assert!((hit.distance - 2.0).abs() < 1e-5);
        assert!(hit.normal.abs_diff_eq(Vec3::Y, 1e-5));
    }

    #[test]
    fn test_save_round_trip() {
        let device = GraphicsDevice::headless();
        let mut model = Model::load(&device, &mut Cursor::new(quad_bytes(MAGIC_LEGACY))).unwrap();
        model.geometry_centers[0] = Vec3::new(0.5, 0.0, 0.5);

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("quad.mdl");
        model.save_file(&path).unwrap();

        let bytes = std::fs::read(&path).unwrap();
        assert_eq!(&bytes[..4], MAGIC);
        let loaded = Model::load_file(&device, &path).unwrap();
        assert_eq!(loaded.geometry_center(0), Vec3::new(0.5, 0.0, 0.5));
        assert_eq!(loaded.morphs(), model.morphs());
        assert_eq!(loaded.skeleton(), model.skeleton());
        assert_eq!(
            read_lock(&loaded.vertex_buffers()[0]).shadow_data(),
            read_lock(&model.vertex_buffers()[0]).shadow_data()
        );
        assert_eq!(loaded.geometry(0, 1).unwrap().lod_distance(), 50.0);

        // Saving again is byte-identical
        let mut again = Vec::new();
        loaded.save(&mut again).unwrap();
        assert_eq!(again, bytes);
    }

    #[test]
    fn test_malformed_models() {
        let device = GraphicsDevice::headless();
        assert!(matches!(Model::load(&device, &mut Cursor::new(b"ABCD".to_vec())), Err(Error::Model(_))));

        let bytes = quad_bytes(MAGIC);
        let truncated = &bytes[..bytes.len() / 2];
        assert!(matches!(Model::load(&device, &mut Cursor::new(truncated.to_vec())), Err(Error::Model(_))));

        // Point the second LOD at a vertex buffer that does not exist
        let mut bad = bytes.clone();
        let lod_offset = bytes.windows(4).position(|w| w == 50.0f32.to_le_bytes()).unwrap();
        bad[lod_offset + 8..lod_offset + 12].copy_from_slice(&7u32.to_le_bytes());
        assert!(matches!(Model::load(&device, &mut Cursor::new(bad)), Err(Error::Model(_))));
    }

    #[test]
    fn test_save_rejects_foreign_buffers() {
        let device = GraphicsDevice::headless();
        let source = Model::load(&device, &mut Cursor::new(quad_bytes(MAGIC))).unwrap();
        let mut geometry = Geometry::new();
        geometry.set_vertex_buffer(0, source.vertex_buffers()[0].clone()).unwrap();
        geometry.set_index_buffer(Some(source.index_buffers()[0].clone()));

        let mut model = Model::new();
        model.add_geometry(vec![geometry], Vec::new(), Vec3::ZERO);
        assert!(matches!(model.save(&mut Vec::new()), Err(Error::Model(_))));
    }
}
