//! Draw-range descriptor over vertex and index buffers

use std::sync::Arc;

use crate::core::error::Error;
use crate::core::types::{Vec2, Vec3};
use crate::core::Result;
use crate::math::Ray;
use crate::render::buffer::element::{self, VertexElement, VertexElementSemantic, VertexElementType};
use crate::render::buffer::index_buffer::read_index;
use crate::render::buffer::{read_lock, SharedIndexBuffer, SharedVertexBuffer};

/// Maximum vertex buffers bound to one geometry
pub const MAX_VERTEX_STREAMS: usize = 8;

/// How indices or vertices are assembled into primitives
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum PrimitiveType {
    #[default]
    TriangleList = 0,
    LineList,
    PointList,
    TriangleStrip,
    LineStrip,
    TriangleFan,
}

impl PrimitiveType {
    pub fn from_u32(value: u32) -> Option<Self> {
        Some(match value {
            0 => Self::TriangleList,
            1 => Self::LineList,
            2 => Self::PointList,
            3 => Self::TriangleStrip,
            4 => Self::LineStrip,
            5 => Self::TriangleFan,
            _ => return None,
        })
    }
}

/// Nearest triangle hit of a ray against CPU-side geometry data
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct GeometryHit {
    pub distance: f32,
    /// Normalized face normal
    pub normal: Vec3,
    /// Interpolated texture coordinate, zero if not requested or not available
    pub uv: Vec2,
}

/// One drawable piece of a mesh.
///
/// Several geometries may reference the same buffers with different draw
/// ranges, e.g. the visible, max-LOD and occlusion views of a terrain patch.
#[derive(Debug, Default)]
pub struct Geometry {
    vertex_buffers: Vec<Option<SharedVertexBuffer>>,
    index_buffer: Option<SharedIndexBuffer>,
    primitive_type: PrimitiveType,
    index_start: u32,
    index_count: u32,
    vertex_start: u32,
    vertex_count: u32,
    lod_distance: f32,
    raw_vertex_data: Option<Arc<[u8]>>,
    raw_elements: Vec<VertexElement>,
    raw_vertex_size: u32,
    raw_index_data: Option<Arc<[u8]>>,
    raw_index_size: u32,
}

impl Geometry {
    /// Geometry with one empty vertex buffer slot
    pub fn new() -> Self {
        Self {
            vertex_buffers: vec![None],
            ..Default::default()
        }
    }

    /// Geometry drawing from a single vertex buffer in slot 0
    pub fn with_vertex_buffer(buffer: SharedVertexBuffer) -> Self {
        Self {
            vertex_buffers: vec![Some(buffer)],
            ..Default::default()
        }
    }

    /// Resize the vertex buffer slot list
    pub fn set_num_vertex_buffers(&mut self, num: usize) -> Result<()> {
        if num > MAX_VERTEX_STREAMS {
            log::error!("Too many vertex streams: {}", num);
            return Err(Error::OutOfRange(format!("{} vertex streams, max {}", num, MAX_VERTEX_STREAMS)));
        }
        self.vertex_buffers.resize(num, None);
        Ok(())
    }

    pub fn num_vertex_buffers(&self) -> usize {
        self.vertex_buffers.len()
    }

    pub fn set_vertex_buffer(&mut self, index: usize, buffer: SharedVertexBuffer) -> Result<()> {
        let slots = self.vertex_buffers.len();
        let slot = self.vertex_buffers.get_mut(index).ok_or_else(|| {
            log::error!("Stream index {} out of bounds", index);
            Error::OutOfRange(format!("vertex stream {} of {}", index, slots))
        })?;
        *slot = Some(buffer);
        Ok(())
    }

    pub fn vertex_buffer(&self, index: usize) -> Option<&SharedVertexBuffer> {
        self.vertex_buffers.get(index)?.as_ref()
    }

    pub fn set_index_buffer(&mut self, buffer: Option<SharedIndexBuffer>) {
        self.index_buffer = buffer;
    }

    pub fn index_buffer(&self) -> Option<&SharedIndexBuffer> {
        self.index_buffer.as_ref()
    }

    /// Set an indexed draw range.
    ///
    /// With `get_used_vertex_range` and a shadowed index buffer the vertex range is
    /// the tight bound of the referenced vertices, otherwise the whole first vertex buffer.
    pub fn set_draw_range(
        &mut self,
        primitive_type: PrimitiveType,
        index_start: u32,
        index_count: u32,
        get_used_vertex_range: bool,
    ) -> Result<()> {
        if self.index_buffer.is_none() && self.raw_index_data.is_none() {
            log::error!("Null index buffer and no raw index data, can not define indexed draw range");
            return Err(Error::Buffer("no index data for an indexed draw range".into()));
        }
        if let Some(ib) = &self.index_buffer {
            let available = read_lock(ib).index_count();
            if index_start as u64 + index_count as u64 > available as u64 {
                log::error!("Illegal draw range {} to {}, index buffer has {} indices", index_start, index_start + index_count, available);
                return Err(Error::OutOfRange(format!(
                    "draw range {}+{} exceeds {} indices",
                    index_start, index_count, available
                )));
            }
        }

        self.primitive_type = primitive_type;
        self.index_start = index_start;
        self.index_count = index_count;

        if index_count == 0 {
            self.vertex_start = 0;
            self.vertex_count = 0;
            return Ok(());
        }

        // Whole first buffer as a fallback when the index data cannot be scanned
        self.vertex_start = 0;
        self.vertex_count = self.vertex_buffer(0).map_or(0, |vb| read_lock(vb).vertex_count());
        if get_used_vertex_range {
            if let Some(ib) = &self.index_buffer {
                if let Ok((start, count)) = read_lock(ib).used_vertex_range(index_start, index_count) {
                    self.vertex_start = start;
                    self.vertex_count = count;
                }
            }
        }
        Ok(())
    }

    /// Set a draw range with an explicit vertex range; `index_count` 0 means non-indexed.
    ///
    /// `check_illegal` false allows a range the buffers will only grow into later.
    pub fn set_draw_range_explicit(
        &mut self,
        primitive_type: PrimitiveType,
        index_start: u32,
        index_count: u32,
        vertex_start: u32,
        vertex_count: u32,
        check_illegal: bool,
    ) -> Result<()> {
        let (index_start, index_count) = match &self.index_buffer {
            Some(ib) => {
                let available = read_lock(ib).index_count();
                if check_illegal && index_start as u64 + index_count as u64 > available as u64 {
                    log::error!("Illegal draw range {} to {}, index buffer has {} indices", index_start, index_start + index_count, available);
                    return Err(Error::OutOfRange(format!(
                        "draw range {}+{} exceeds {} indices",
                        index_start, index_count, available
                    )));
                }
                (index_start, index_count)
            }
            None if self.raw_index_data.is_some() => (index_start, index_count),
            None => (0, 0),
        };

        if check_illegal {
            let available = self.vertex_buffer(0).map_or(0, |vb| read_lock(vb).vertex_count());
            if vertex_start as u64 + vertex_count as u64 > available as u64 {
                log::error!("Illegal draw range {} to {}, vertex buffer has {} vertices", vertex_start, vertex_start + vertex_count, available);
                return Err(Error::OutOfRange(format!(
                    "vertex range {}+{} exceeds {} vertices",
                    vertex_start, vertex_count, available
                )));
            }
        }

        self.primitive_type = primitive_type;
        self.index_start = index_start;
        self.index_count = index_count;
        self.vertex_start = vertex_start;
        self.vertex_count = vertex_count;
        Ok(())
    }

    pub fn primitive_type(&self) -> PrimitiveType {
        self.primitive_type
    }

    pub fn index_start(&self) -> u32 {
        self.index_start
    }

    pub fn index_count(&self) -> u32 {
        self.index_count
    }

    pub fn vertex_start(&self) -> u32 {
        self.vertex_start
    }

    pub fn vertex_count(&self) -> u32 {
        self.vertex_count
    }

    pub fn is_empty(&self) -> bool {
        self.index_count == 0 && self.vertex_count == 0
    }

    /// Distance from which this LOD is used
    pub fn lod_distance(&self) -> f32 {
        self.lod_distance
    }

    pub fn set_lod_distance(&mut self, distance: f32) {
        self.lod_distance = distance.max(0.0);
    }

    /// Attach a CPU-only vertex snapshot for spatial queries
    pub fn set_raw_vertex_data(&mut self, data: Arc<[u8]>, elements: &[VertexElement]) {
        let mut elements = elements.to_vec();
        self.raw_vertex_size = element::update_offsets(&mut elements);
        self.raw_elements = elements;
        self.raw_vertex_data = Some(data);
    }

    /// Same as `set_raw_vertex_data` with a legacy element mask
    pub fn set_raw_vertex_data_mask(&mut self, data: Arc<[u8]>, element_mask: u32) {
        self.set_raw_vertex_data(data, &element::elements_from_mask(element_mask));
    }

    /// Attach a CPU-only index snapshot for spatial queries
    pub fn set_raw_index_data(&mut self, data: Arc<[u8]>, index_size: u32) -> Result<()> {
        if index_size != 2 && index_size != 4 {
            return Err(Error::InvalidArgument(format!("index size must be 2 or 4, got {}", index_size)));
        }
        self.raw_index_data = Some(data);
        self.raw_index_size = index_size;
        Ok(())
    }

    pub fn raw_vertex_data(&self) -> Option<(&Arc<[u8]>, &[VertexElement], u32)> {
        self.raw_vertex_data
            .as_ref()
            .map(|d| (d, self.raw_elements.as_slice(), self.raw_vertex_size))
    }

    pub fn raw_index_data(&self) -> Option<(&Arc<[u8]>, u32)> {
        self.raw_index_data.as_ref().map(|d| (d, self.raw_index_size))
    }

    /// Distance to the nearest front-facing triangle, infinity on a miss or without CPU data
    pub fn hit_distance(&self, ray: &Ray) -> f32 {
        self.raycast(ray, false).map_or(f32::INFINITY, |hit| hit.distance)
    }

    /// Nearest triangle hit in the geometry's local space.
    ///
    /// Raw snapshots take precedence over buffer shadows. Without either the
    /// geometry cannot be hit.
    pub fn raycast(&self, ray: &Ray, want_uv: bool) -> Option<GeometryHit> {
        if self.primitive_type != PrimitiveType::TriangleList {
            return None;
        }

        let vb_guard = match (&self.raw_vertex_data, self.vertex_buffer(0)) {
            (None, Some(vb)) => Some(read_lock(vb)),
            _ => None,
        };
        let ib_guard = match (&self.raw_index_data, &self.index_buffer) {
            (None, Some(ib)) => Some(read_lock(ib)),
            _ => None,
        };

        let (vertex_data, elements, vertex_size): (&[u8], &[VertexElement], u32) = match &self.raw_vertex_data {
            Some(data) => (&data[..], self.raw_elements.as_slice(), self.raw_vertex_size),
            None => {
                let vb = vb_guard.as_ref()?;
                (vb.shadow_data()?, vb.elements(), vb.vertex_size())
            }
        };
        let index_data: Option<(&[u8], u32)> = match &self.raw_index_data {
            Some(data) => Some((&data[..], self.raw_index_size)),
            None => ib_guard
                .as_ref()
                .and_then(|ib| ib.shadow_data().map(|d| (d, ib.index_size()))),
        };

        let position_offset = element::find_element(elements, VertexElementType::Vector3, VertexElementSemantic::Position, 0)
            .map_or(0, |e| e.offset) as usize;
        let uv_offset = if want_uv {
            let uv = element::find_element(elements, VertexElementType::Vector2, VertexElementSemantic::TexCoord, 0);
            if uv.is_none() {
                log::warn!("UV return requested on vertex data without UV coordinates");
            }
            uv.map(|e| e.offset as usize)
        } else {
            None
        };

        let stride = vertex_size as usize;
        let position = |v: usize| read_vec3(vertex_data, v * stride + position_offset);
        let uv = |v: usize, offset: usize| read_vec2(vertex_data, v * stride + offset);

        let triangles: Box<dyn Iterator<Item = [usize; 3]> + '_> = match index_data {
            Some((indices, index_size)) => {
                let start = self.index_start as usize;
                let end = start + self.index_count as usize;
                Box::new((start..end.saturating_sub(2)).step_by(3).filter_map(move |i| {
                    Some([
                        read_index(indices, index_size, i)? as usize,
                        read_index(indices, index_size, i + 1)? as usize,
                        read_index(indices, index_size, i + 2)? as usize,
                    ])
                }))
            }
            None => {
                let start = self.vertex_start as usize;
                let end = start + self.vertex_count as usize;
                Box::new((start..end.saturating_sub(2)).step_by(3).map(|v| [v, v + 1, v + 2]))
            }
        };

        let mut nearest: Option<GeometryHit> = None;
        for [a, b, c] in triangles {
            let (Some(v0), Some(v1), Some(v2)) = (position(a), position(b), position(c)) else {
                continue;
            };
            let Some((distance, normal, bary)) = ray.intersects_triangle(v0, v1, v2) else {
                continue;
            };
            if nearest.is_some_and(|n| n.distance <= distance) {
                continue;
            }
            let hit_uv = uv_offset
                .and_then(|offset| Some(uv(a, offset)? * bary.x + uv(b, offset)? * bary.y + uv(c, offset)? * bary.z))
                .unwrap_or(Vec2::ZERO);
            nearest = Some(GeometryHit {
                distance,
                normal: normal.normalize_or_zero(),
                uv: hit_uv,
            });
        }
        nearest
    }
}

fn read_vec3(data: &[u8], offset: usize) -> Option<Vec3> {
    let bytes = data.get(offset..offset + 12)?;
    Some(Vec3::from_array(bytemuck::pod_read_unaligned::<[f32; 3]>(bytes)))
}

fn read_vec2(data: &[u8], offset: usize) -> Option<Vec2> {
    let bytes = data.get(offset..offset + 8)?;
    Some(Vec2::from_array(bytemuck::pod_read_unaligned::<[f32; 2]>(bytes)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::buffer::element::mask;
    use crate::render::buffer::{write_lock, IndexBuffer, VertexBuffer};
    use crate::render::device::GraphicsDevice;
    use std::sync::RwLock;

    /// Unit quad in the XZ plane facing +Y, with UVs
    fn quad(device: &GraphicsDevice) -> (SharedVertexBuffer, SharedIndexBuffer) {
        let vertices: [[f32; 5]; 4] = [
            [0.0, 0.0, 0.0, 0.0, 0.0],
            [1.0, 0.0, 0.0, 1.0, 0.0],
            [0.0, 0.0, 1.0, 0.0, 1.0],
            [1.0, 0.0, 1.0, 1.0, 1.0],
        ];
        let vb = Arc::new(RwLock::new(VertexBuffer::new(device)));
        {
            let mut vb = write_lock(&vb);
            vb.set_size_mask(4, mask::POSITION | mask::TEXCOORD1, false).unwrap();
            vb.set_data(bytemuck::cast_slice(&vertices)).unwrap();
        }
        let ib = Arc::new(RwLock::new(IndexBuffer::new(device)));
        {
            let mut ib = write_lock(&ib);
            ib.set_size(6, false, false).unwrap();
            ib.set_data(bytemuck::cast_slice(&[2u16, 1, 0, 2, 3, 1])).unwrap();
        }
        (vb, ib)
    }

    fn quad_geometry(device: &GraphicsDevice) -> Geometry {
        let (vb, ib) = quad(device);
        let mut geometry = Geometry::with_vertex_buffer(vb);
        geometry.set_index_buffer(Some(ib));
        geometry.set_draw_range(PrimitiveType::TriangleList, 0, 6, true).unwrap();
        geometry
    }

    #[test]
    fn test_draw_range_uses_tight_vertex_range() {
        let device = GraphicsDevice::headless();
        let mut geometry = quad_geometry(&device);
        assert_eq!((geometry.vertex_start(), geometry.vertex_count()), (0, 4));

        geometry.set_draw_range(PrimitiveType::TriangleList, 3, 3, true).unwrap();
        assert_eq!((geometry.vertex_start(), geometry.vertex_count()), (1, 3));

        geometry.set_draw_range(PrimitiveType::TriangleList, 3, 3, false).unwrap();
        assert_eq!((geometry.vertex_start(), geometry.vertex_count()), (0, 4));
    }

    #[test]
    fn test_illegal_draw_ranges() {
        let device = GraphicsDevice::headless();
        let mut geometry = quad_geometry(&device);
        assert!(geometry.set_draw_range(PrimitiveType::TriangleList, 4, 6, true).is_err());
        assert!(geometry
            .set_draw_range_explicit(PrimitiveType::TriangleList, 0, 6, 2, 4, true)
            .is_err());
        // Unchecked ranges are accepted for buffers filled later
        assert!(geometry
            .set_draw_range_explicit(PrimitiveType::TriangleList, 0, 12, 0, 8, false)
            .is_ok());
        assert_eq!(geometry.index_count(), 12);

        assert_eq!(geometry.num_vertex_buffers(), 1);
        assert!(geometry.set_vertex_buffer(1, quad(&device).0).is_err());

        let mut empty = Geometry::new();
        assert!(empty.vertex_buffer(0).is_none());
        assert!(empty.set_draw_range(PrimitiveType::TriangleList, 0, 3, true).is_err());
        assert!(empty.set_num_vertex_buffers(MAX_VERTEX_STREAMS + 1).is_err());
    }

    #[test]
    fn test_hit_distance_from_shadow() {
        let device = GraphicsDevice::headless();
        let geometry = quad_geometry(&device);
        let ray = Ray::new(Vec3::new(0.25, 5.0, 0.5), -Vec3::Y);
        let hit = geometry.raycast(&ray, true).unwrap();
        assert!((hit.distance - 5.0).abs() < 1e-5);
        assert!((hit.normal - Vec3::Y).length() < 1e-5);
        assert!((hit.uv - Vec2::new(0.25, 0.5)).length() < 1e-5);

        // From below only back faces are seen
        let below = Ray::new(Vec3::new(0.25, -5.0, 0.75), Vec3::Y);
        assert_eq!(geometry.hit_distance(&below), f32::INFINITY);
    }

    #[test]
    fn test_hit_distance_without_cpu_data_is_infinite() {
        let device = GraphicsDevice::headless();
        let (vb, ib) = quad(&device);
        write_lock(&vb).set_shadowed(false).unwrap();
        let mut geometry = Geometry::new();
        geometry.set_vertex_buffer(0, vb).unwrap();
        geometry.set_index_buffer(Some(ib));
        geometry.set_draw_range(PrimitiveType::TriangleList, 0, 6, true).unwrap();
        let ray = Ray::new(Vec3::new(0.5, 1.0, 0.5), -Vec3::Y);
        assert_eq!(geometry.hit_distance(&ray), f32::INFINITY);
    }

    #[test]
    fn test_raw_data_takes_precedence() {
        let device = GraphicsDevice::headless();
        let mut geometry = quad_geometry(&device);
        // Same quad raised to y = 2, positions only
        let raised: [[f32; 3]; 4] = [[0.0, 2.0, 0.0], [1.0, 2.0, 0.0], [0.0, 2.0, 1.0], [1.0, 2.0, 1.0]];
        let data: Arc<[u8]> = Arc::from(bytemuck::cast_slice::<[f32; 3], u8>(&raised));
        geometry.set_raw_vertex_data_mask(data, mask::POSITION);

        let ray = Ray::new(Vec3::new(0.25, 5.0, 0.5), -Vec3::Y);
        assert!((geometry.hit_distance(&ray) - 3.0).abs() < 1e-5);

        // No UVs in the raw layout: hit still reported, UV zero
        let hit = geometry.raycast(&ray, true).unwrap();
        assert_eq!(hit.uv, Vec2::ZERO);
    }

    #[test]
    fn test_non_indexed_hit() {
        let triangle: [[f32; 3]; 3] = [[0.0, 0.0, 1.0], [1.0, 0.0, 0.0], [0.0, 0.0, 0.0]];
        let mut geometry = Geometry::new();
        geometry.set_raw_vertex_data_mask(Arc::from(bytemuck::cast_slice::<[f32; 3], u8>(&triangle)), mask::POSITION);
        geometry
            .set_draw_range_explicit(PrimitiveType::TriangleList, 0, 0, 0, 3, false)
            .unwrap();
        let ray = Ray::new(Vec3::new(0.2, 1.0, 0.2), -Vec3::Y);
        assert!((geometry.hit_distance(&ray) - 1.0).abs() < 1e-5);
    }
}
