//! A heightmap-driven terrain tile built from LOD patches

use std::sync::{Arc, RwLock};

use rayon::prelude::*;

use crate::core::camera::Camera;
use crate::core::error::Error;
use crate::core::types::{IVec2, Mat4, Vec2, Vec3};
use crate::core::Result;
use crate::math::Ray;
use crate::render::batch::{DrawBatch, MaterialHandle};
use crate::render::buffer::{read_lock, write_lock, IndexBuffer, SharedIndexBuffer};
use crate::render::device::GraphicsDevice;

use super::config::{TerrainConfig, MAX_LOD_LEVELS_LIMIT, MIN_PATCH_SIZE};
use super::heightfield::Heightfield;
use super::heightmap::HeightMap;
use super::index_table::IndexTable;
use super::lod::{self, Direction};
use super::patch::{build_patch_vertices, TerrainPatch};
use super::world::{PatchId, TerrainId};

/// How precisely `Terrain::raycast` tests patches
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum RayQueryLevel {
    /// Patch bounding boxes only
    Aabb,
    /// Triangles of the currently drawn LOD
    #[default]
    Triangle,
}

/// Nearest ray hit on a terrain
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RayHit {
    pub distance: f32,
    pub position: Vec3,
    pub normal: Vec3,
    pub patch: PatchId,
}

/// Another terrain bordering this one, as last seen
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TerrainLink {
    pub id: TerrainId,
    pub num_patches: IVec2,
    pub generation: u64,
}

/// Parameters that force every patch to be recreated when they change
#[derive(Clone, Copy, Debug, PartialEq)]
struct LayoutKey {
    patch_size: u32,
    spacing: Vec3,
    num_lod_levels: u32,
    occlusion_lod_level: u32,
    smoothing: bool,
    num_vertices: IVec2,
}

/// Heightmap terrain split into square patches with per-patch LOD.
///
/// Local space has the terrain centred on the origin in x and z; `transform`
/// places it in the world.
#[derive(Debug)]
pub struct Terrain {
    id: TerrainId,
    device: GraphicsDevice,
    config: TerrainConfig,
    transform: Mat4,
    material: Option<MaterialHandle>,
    height_map: Option<HeightMap>,
    heightfield: Heightfield,
    num_patches: IVec2,
    num_vertices: IVec2,
    num_lod_levels: u32,
    patch_world_size: Vec2,
    patch_world_origin: Vec2,
    patches: Vec<TerrainPatch>,
    index_table: IndexTable,
    raw_indices: Arc<[u8]>,
    index_buffer: SharedIndexBuffer,
    pub(crate) neighbor_ids: [Option<TerrainId>; 4],
    links: [Option<TerrainLink>; 4],
    layout: Option<LayoutKey>,
    generation: u64,
}

impl Terrain {
    /// Empty terrain. Nothing is built until a heightmap is set.
    pub fn new(device: &GraphicsDevice, config: TerrainConfig) -> Result<Self> {
        config.validate()?;
        let material = config.material.as_deref().map(MaterialHandle::new);
        Ok(Self {
            id: TerrainId::default(),
            device: device.clone(),
            config,
            transform: Mat4::IDENTITY,
            material,
            height_map: None,
            heightfield: Heightfield::default(),
            num_patches: IVec2::ZERO,
            num_vertices: IVec2::ZERO,
            num_lod_levels: 1,
            patch_world_size: Vec2::ZERO,
            patch_world_origin: Vec2::ZERO,
            patches: Vec::new(),
            index_table: IndexTable::default(),
            raw_indices: Arc::from(Vec::new()),
            index_buffer: Arc::new(RwLock::new(IndexBuffer::new(device))),
            neighbor_ids: [None; 4],
            links: [None; 4],
            layout: None,
            generation: 0,
        })
    }

    /// Create a terrain and build it from the config's heightmap, if it names one
    pub fn from_config(device: &GraphicsDevice, config: TerrainConfig) -> Result<Self> {
        let path = config.height_map.clone();
        let mut terrain = Self::new(device, config)?;
        if let Some(path) = path {
            terrain.set_height_map(HeightMap::load(&path)?)?;
        }
        Ok(terrain)
    }

    pub fn id(&self) -> TerrainId {
        self.id
    }

    pub(crate) fn set_id(&mut self, id: TerrainId) {
        self.id = id;
        self.link_patches();
    }

    pub fn config(&self) -> &TerrainConfig {
        &self.config
    }

    pub fn device(&self) -> &GraphicsDevice {
        &self.device
    }

    /// Bumped every time patches are created, rebuilt or cleared
    pub fn generation(&self) -> u64 {
        self.generation
    }

    // ---- Parameters ----

    /// Set the patch edge length; rebuilds on change
    pub fn set_patch_size(&mut self, patch_size: u32) -> Result<()> {
        let config = TerrainConfig { patch_size, ..self.config.clone() };
        config.validate()?;
        if patch_size != self.config.patch_size {
            self.config.patch_size = patch_size;
            self.rebuild()?;
        }
        Ok(())
    }

    /// Set sample spacing; y scales heights. Rebuilds on change.
    pub fn set_spacing(&mut self, spacing: Vec3) -> Result<()> {
        let config = TerrainConfig { spacing: spacing.to_array(), ..self.config.clone() };
        config.validate()?;
        if spacing != self.config.spacing() {
            self.config.spacing = spacing.to_array();
            self.rebuild()?;
        }
        Ok(())
    }

    /// Cap the number of LOD levels, clamped to `[1, 4]`. Rebuilds on change.
    pub fn set_max_lod_levels(&mut self, levels: u32) -> Result<()> {
        let levels = levels.clamp(1, MAX_LOD_LEVELS_LIMIT);
        if levels != self.config.max_lod_levels {
            self.config.max_lod_levels = levels;
            self.rebuild()?;
        }
        Ok(())
    }

    /// Set the occlusion geometry's LOD level. Rebuilds on change.
    pub fn set_occlusion_lod_level(&mut self, level: u32) -> Result<()> {
        if level != self.config.occlusion_lod_level {
            self.config.occlusion_lod_level = level;
            self.rebuild()?;
        }
        Ok(())
    }

    /// Enable or disable heightmap smoothing. Rebuilds on change.
    pub fn set_smoothing(&mut self, enable: bool) -> Result<()> {
        if enable != self.config.smoothing {
            self.config.smoothing = enable;
            self.rebuild()?;
        }
        Ok(())
    }

    pub fn set_lod_bias(&mut self, bias: f32) -> Result<()> {
        if !bias.is_finite() || bias <= 0.0 {
            return Err(Error::InvalidArgument(format!("LOD bias must be positive, got {}", bias)));
        }
        self.config.lod_bias = bias;
        Ok(())
    }

    pub fn set_material(&mut self, material: Option<MaterialHandle>) {
        self.config.material = material.as_ref().map(|m| m.name().to_string());
        self.material = material;
    }

    pub fn material(&self) -> Option<&MaterialHandle> {
        self.material.as_ref()
    }

    /// Local to world transform
    pub fn set_transform(&mut self, transform: Mat4) {
        self.transform = transform;
    }

    pub fn transform(&self) -> Mat4 {
        self.transform
    }

    /// Replace the heightmap and build.
    ///
    /// A heightmap of the same size with unchanged parameters only rebuilds
    /// the patches around changed samples.
    pub fn set_height_map(&mut self, height_map: HeightMap) -> Result<()> {
        self.height_map = Some(height_map);
        self.create_geometry()
    }

    pub fn height_map(&self) -> Option<&HeightMap> {
        self.height_map.as_ref()
    }

    fn rebuild(&mut self) -> Result<()> {
        if self.height_map.is_some() {
            self.create_geometry()?;
        }
        Ok(())
    }

    // ---- Geometry ----

    /// Build or update patch geometry from the current heightmap.
    ///
    /// On failure the terrain is left without patches.
    pub fn create_geometry(&mut self) -> Result<()> {
        let result = self.build_geometry();
        if let Err(e) = &result {
            log::error!("Failed to create terrain geometry: {}", e);
            self.patches.clear();
            self.num_patches = IVec2::ZERO;
            self.layout = None;
            self.generation += 1;
        }
        result
    }

    fn build_geometry(&mut self) -> Result<()> {
        let had_patches = !self.patches.is_empty();
        let Some(height_map) = self.height_map.as_ref() else {
            self.clear_geometry(had_patches);
            return Ok(());
        };

        let patch_size = self.config.patch_size as i32;
        let spacing = self.config.spacing();

        // Count levels down to the minimum patch size
        let mut num_lod_levels = 1;
        let mut lod_size = self.config.patch_size;
        while lod_size > MIN_PATCH_SIZE && num_lod_levels < self.config.max_lod_levels {
            lod_size >>= 1;
            num_lod_levels += 1;
        }

        let map_size = IVec2::new(height_map.width() as i32, height_map.height() as i32);
        let num_patches = ((map_size - IVec2::ONE) / patch_size).max(IVec2::ZERO);
        if num_patches.x == 0 || num_patches.y == 0 {
            log::warn!(
                "Heightmap of {}x{} is too small for patch size {}",
                map_size.x,
                map_size.y,
                patch_size
            );
            self.clear_geometry(had_patches);
            return Ok(());
        }
        let num_vertices = num_patches * patch_size + IVec2::ONE;

        let layout = LayoutKey {
            patch_size: self.config.patch_size,
            spacing,
            num_lod_levels,
            occlusion_lod_level: self.config.occlusion_lod_level,
            smoothing: self.config.smoothing,
            num_vertices,
        };
        let full_rebuild = self.layout != Some(layout) || self.patches.is_empty();

        self.num_lod_levels = num_lod_levels;
        self.num_patches = num_patches;
        self.num_vertices = num_vertices;
        self.patch_world_size = Vec2::new(spacing.x, spacing.z) * patch_size as f32;
        self.patch_world_origin = -0.5 * num_patches.as_vec2() * self.patch_world_size;

        if full_rebuild {
            self.heightfield = Heightfield::new(num_vertices, spacing, self.config.smoothing);
        }

        // Copy heights, tracking the region that changed. Image row 0 is the far edge.
        let mut changed: Option<(IVec2, IVec2)> = None;
        for z in 0..num_vertices.y {
            let row = (num_vertices.y - 1 - z) as u32;
            for x in 0..num_vertices.x {
                let height = height_map.sample(x as u32, row) * spacing.y;
                if self.heightfield.set_input_height(x, z, height) {
                    let p = IVec2::new(x, z);
                    changed = Some(changed.map_or((p, p), |(min, max)| (min.min(p), max.max(p))));
                }
            }
        }

        let dirty: Vec<usize> = if full_rebuild {
            self.patches = (0..num_patches.y)
                .flat_map(|z| (0..num_patches.x).map(move |x| IVec2::new(x, z)))
                .map(|coords| {
                    let offset = self.patch_world_origin + coords.as_vec2() * self.patch_world_size;
                    TerrainPatch::new(&self.device, coords, Vec3::new(offset.x, 0.0, offset.y))
                })
                .collect();
            (0..self.patches.len()).collect()
        } else {
            match changed {
                Some((min, max)) => self.patches_in_region(min, max),
                None => Vec::new(),
            }
        };

        if full_rebuild {
            self.build_index_table()?;
        }

        if self.heightfield.is_smoothed() {
            for &i in &dirty {
                let start = self.patches[i].coords() * patch_size;
                self.heightfield.smooth_region(start, start + IVec2::splat(patch_size));
            }
        }

        let occlusion_lod = self.config.occlusion_lod_level.min(num_lod_levels - 1);
        let heightfield = &self.heightfield;
        let coords: Vec<IVec2> = dirty.iter().map(|&i| self.patches[i].coords()).collect();
        let built: Vec<_> = coords
            .par_iter()
            .map(|&c| {
                (
                    build_patch_vertices(heightfield, c, patch_size, occlusion_lod),
                    heightfield.lod_errors(c * patch_size, patch_size, num_lod_levels),
                )
            })
            .collect();

        for (&i, (data, errors)) in dirty.iter().zip(built) {
            let patch = &mut self.patches[i];
            patch.apply_vertex_data(&data, &self.index_buffer, &self.raw_indices, &self.index_table, occlusion_lod)?;
            patch.set_lod_errors(errors);
        }

        self.layout = Some(layout);
        self.link_patches();
        if !dirty.is_empty() || full_rebuild {
            self.generation += 1;
        }

        log::info!(
            "Terrain geometry {}: {}x{} patches, {} LOD levels, {} patches updated",
            if full_rebuild { "created" } else { "updated" },
            num_patches.x,
            num_patches.y,
            num_lod_levels,
            dirty.len()
        );
        Ok(())
    }

    fn clear_geometry(&mut self, had_patches: bool) {
        self.patches.clear();
        self.num_patches = IVec2::ZERO;
        self.num_vertices = IVec2::ZERO;
        self.heightfield = Heightfield::default();
        self.layout = None;
        if had_patches {
            self.generation += 1;
        }
    }

    /// Patch indices whose geometry or LOD errors depend on samples in `min..=max`
    fn patches_in_region(&self, min: IVec2, max: IVec2) -> Vec<usize> {
        let expand = 1i32 << (self.num_lod_levels - 1);
        let patch_size = self.config.patch_size as i32;
        let last = self.num_patches - IVec2::ONE;
        // Low edge vertices are shared with the previous patch, so both sides
        // need the extra sample
        let start = ((min - IVec2::splat(expand + 1)).max(IVec2::ZERO) / patch_size).min(last);
        let end = ((max + IVec2::splat(expand + 1)) / patch_size).min(last);

        (start.y..=end.y)
            .flat_map(|z| (start.x..=end.x).map(move |x| (z * self.num_patches.x + x) as usize))
            .collect()
    }

    fn build_index_table(&mut self) -> Result<()> {
        let table = IndexTable::build(self.config.patch_size, self.num_lod_levels)?;
        {
            let mut ib = write_lock(&self.index_buffer);
            ib.set_size(table.indices().len() as u32, false, false)?;
            ib.set_data(bytemuck::cast_slice(table.indices()))?;
        }
        self.raw_indices = Arc::from(bytemuck::cast_slice::<u16, u8>(table.indices()));
        self.index_table = table;
        Ok(())
    }

    /// Re-resolve every patch's neighbours, including across terrain borders
    pub(crate) fn link_patches(&mut self) {
        for i in 0..self.patches.len() {
            let c = self.patches[i].coords();
            let neighbors = Direction::ALL.map(|dir| {
                let (dx, dz) = dir.offset();
                self.neighbor_patch(c.x + dx, c.y + dz)
            });
            let patch = &mut self.patches[i];
            for (dir, neighbor) in neighbors.iter().enumerate() {
                if patch.neighbors[dir] != *neighbor {
                    patch.neighbor_lods[dir] = None;
                }
            }
            patch.neighbors = neighbors;
        }
    }

    /// Patch at grid coordinates, which may lie one step outside this terrain
    /// in a linked neighbour terrain
    pub fn neighbor_patch(&self, x: i32, z: i32) -> Option<PatchId> {
        let np = self.num_patches;
        let (link, x, z) = if z >= np.y {
            let link = self.links[Direction::North as usize]?;
            (link, x, z - np.y)
        } else if z < 0 {
            let link = self.links[Direction::South as usize]?;
            (link, x, z + link.num_patches.y)
        } else if x < 0 {
            let link = self.links[Direction::West as usize]?;
            (link, x + link.num_patches.x, z)
        } else if x >= np.x {
            let link = self.links[Direction::East as usize]?;
            (link, x - np.x, z)
        } else {
            return Some(PatchId { terrain: self.id, index: (z * np.x + x) as u32 });
        };

        let size = link.num_patches;
        if x < 0 || z < 0 || x >= size.x || z >= size.y {
            return None;
        }
        Some(PatchId { terrain: link.id, index: (z * size.x + x) as u32 })
    }

    /// Neighbour terrains in North, South, West, East order
    pub fn neighbor_terrains(&self) -> [Option<TerrainId>; 4] {
        self.neighbor_ids
    }

    pub fn links(&self) -> [Option<TerrainLink>; 4] {
        self.links
    }

    pub(crate) fn set_links(&mut self, links: [Option<TerrainLink>; 4]) {
        self.links = links;
        self.link_patches();
    }

    // ---- Accessors ----

    pub fn num_patches(&self) -> IVec2 {
        self.num_patches
    }

    pub fn num_vertices(&self) -> IVec2 {
        self.num_vertices
    }

    pub fn num_lod_levels(&self) -> u32 {
        self.num_lod_levels
    }

    pub fn patch_world_size(&self) -> Vec2 {
        self.patch_world_size
    }

    /// Local x/z of the first patch's corner
    pub fn patch_world_origin(&self) -> Vec2 {
        self.patch_world_origin
    }

    pub fn heightfield(&self) -> &Heightfield {
        &self.heightfield
    }

    pub fn patches(&self) -> &[TerrainPatch] {
        &self.patches
    }

    pub fn patch(&self, index: usize) -> Option<&TerrainPatch> {
        self.patches.get(index)
    }

    pub fn patch_at(&self, x: i32, z: i32) -> Option<&TerrainPatch> {
        if x < 0 || z < 0 || x >= self.num_patches.x || z >= self.num_patches.y {
            return None;
        }
        self.patches.get((z * self.num_patches.x + x) as usize)
    }

    pub fn index_table(&self) -> &IndexTable {
        &self.index_table
    }

    pub fn index_buffer(&self) -> &SharedIndexBuffer {
        &self.index_buffer
    }

    // ---- Queries ----

    /// Fractional heightfield coordinates of a world position, clamped to the grid
    fn sample_coords(&self, world: Vec3) -> (Vec3, f32, f32) {
        let local = self.transform.inverse().transform_point3(world);
        let spacing = self.config.spacing();
        let max = (self.num_vertices - IVec2::ONE).max(IVec2::ZERO).as_vec2();
        let x = ((local.x - self.patch_world_origin.x) / spacing.x).clamp(0.0, max.x);
        let z = ((local.z - self.patch_world_origin.y) / spacing.z).clamp(0.0, max.y);
        (local, x, z)
    }

    /// World height of the full resolution surface under a world position
    pub fn height(&self, world: Vec3) -> f32 {
        if self.heightfield.is_empty() {
            return 0.0;
        }
        let (local, x, z) = self.sample_coords(world);
        let height = self.heightfield.interpolated_height(x, z);
        self.transform.transform_point3(Vec3::new(local.x, height, local.z)).y
    }

    /// World surface normal under a world position
    pub fn normal(&self, world: Vec3) -> Vec3 {
        if self.heightfield.is_empty() {
            return Vec3::Y;
        }
        let (_, x, z) = self.sample_coords(world);
        let (_, rotation, _) = self.transform.to_scale_rotation_translation();
        rotation * self.heightfield.interpolated_normal(x, z)
    }

    /// Heightmap pixel nearest to a world position
    pub fn world_to_height_map(&self, world: Vec3) -> IVec2 {
        if self.heightfield.is_empty() {
            return IVec2::ZERO;
        }
        let (_, x, z) = self.sample_coords(world);
        let x = x.round() as i32;
        let z = z.round() as i32;
        IVec2::new(x, self.num_vertices.y - 1 - z)
    }

    /// World position of a heightmap pixel, on the surface
    pub fn height_map_to_world(&self, pixel: IVec2) -> Vec3 {
        if self.heightfield.is_empty() {
            return self.transform.transform_point3(Vec3::ZERO);
        }
        let max = self.num_vertices - IVec2::ONE;
        let x = pixel.x.clamp(0, max.x);
        let z = (max.y - pixel.y).clamp(0, max.y);
        let spacing = self.config.spacing();
        let local = Vec3::new(
            x as f32 * spacing.x + self.patch_world_origin.x,
            0.0,
            z as f32 * spacing.z + self.patch_world_origin.y,
        );
        let mut world = self.transform.transform_point3(local);
        world.y = self.height(world);
        world
    }

    /// Nearest hit within `max_distance` of a world-space ray
    pub fn raycast(&self, ray: &Ray, max_distance: f32, level: RayQueryLevel) -> Option<RayHit> {
        let mut nearest: Option<RayHit> = None;
        for (i, patch) in self.patches.iter().enumerate() {
            let to_world = self.transform * patch.local_transform();
            let local_ray = ray.transform(&to_world.inverse());
            let box_distance = local_ray.hit_distance_aabb(&patch.bounding_box());
            if !box_distance.is_finite() {
                continue;
            }

            let (local_distance, normal) = match level {
                RayQueryLevel::Aabb => (box_distance, -ray.direction),
                RayQueryLevel::Triangle => match patch.geometry().raycast(&local_ray, false) {
                    Some(hit) => (hit.distance, to_world.transform_vector3(hit.normal).normalize_or_zero()),
                    None => continue,
                },
            };

            let position = to_world.transform_point3(local_ray.at(local_distance));
            let distance = (position - ray.origin).length();
            if distance >= max_distance || nearest.is_some_and(|n| n.distance <= distance) {
                continue;
            }
            nearest = Some(RayHit {
                distance,
                position,
                normal,
                patch: PatchId { terrain: self.id, index: i as u32 },
            });
        }
        nearest
    }

    // ---- LOD ----

    /// Choose, clamp and apply LOD levels for a camera.
    ///
    /// Patches of linked terrains count with the LOD they had when this
    /// terrain was last stitched against them. Their own stitching is only
    /// refreshed by [`TerrainWorld::update_lod`](super::TerrainWorld::update_lod).
    pub fn update_lod(&mut self, camera: &Camera) -> Result<()> {
        let mut lods = self.select_lods(camera);
        let own = self.id;

        // Linked patches become fixed entries past the end of `lods`
        let mut neighbors: Vec<[Option<usize>; 4]> = Vec::with_capacity(self.patches.len());
        for patch in &self.patches {
            let mut entry = [None; 4];
            for (dir, slot) in entry.iter_mut().enumerate() {
                *slot = match patch.neighbors[dir] {
                    Some(n) if n.terrain == own => Some(n.index as usize),
                    Some(_) => patch.neighbor_lods[dir].map(|lod| {
                        lods.push(lod);
                        lods.len() - 1
                    }),
                    None => None,
                };
            }
            neighbors.push(entry);
        }
        neighbors.resize(lods.len(), [None; 4]);
        lod::clamp_to_neighbors(&mut lods, &neighbors);

        let count = self.patches.len();
        let neighbor_lods: Vec<[Option<u32>; 4]> = neighbors
            .iter()
            .take(count)
            .map(|entry| entry.map(|n| n.map(|i| lods[i])))
            .collect();
        self.apply_lods(&lods[..count], &neighbor_lods)
    }

    /// Unclamped LOD choice per patch; records camera distances on the patches
    pub(crate) fn select_lods(&mut self, camera: &Camera) -> Vec<u32> {
        let spacing = self.config.spacing();
        let bias = self.config.lod_bias;
        let transform = self.transform;
        self.patches
            .iter_mut()
            .map(|patch| {
                let bounds = patch.world_bounding_box(&transform);
                let distance = camera.distance(bounds.center());
                let scale = bounds.size().dot(Vec3::splat(1.0 / 3.0));
                let lod_distance = camera.lod_distance(distance, scale, bias);
                patch.set_distances(distance, lod_distance);
                lod::select_lod(patch.lod_errors(), lod_distance, spacing)
            })
            .collect()
    }

    /// Apply final LOD levels, stitching towards coarser neighbours
    pub(crate) fn apply_lods(&mut self, lods: &[u32], neighbor_lods: &[[Option<u32>; 4]]) -> Result<()> {
        for (i, (&lod, &around)) in lods.iter().zip(neighbor_lods).enumerate() {
            self.restitch(i, lod, around)?;
        }
        Ok(())
    }

    /// Force one patch's LOD, restitching it and its neighbours in this terrain.
    ///
    /// Neighbours in linked terrains keep their last applied LOD and are not
    /// restitched; [`TerrainWorld::set_patch_lod`](super::TerrainWorld::set_patch_lod)
    /// updates both sides of a border.
    pub fn set_patch_lod(&mut self, index: usize, lod: u32) -> Result<()> {
        self.check_patch_lod(index, lod)?;
        let own = self.id;
        let mut lods: Vec<u32> = self.patches.iter().map(|p| p.lod_level()).collect();
        lods[index] = lod;

        let mut affected = vec![index];
        affected.extend(
            self.patches[index]
                .neighbors
                .iter()
                .flatten()
                .filter(|n| n.terrain == own)
                .map(|n| n.index as usize),
        );
        for i in affected {
            let patch = &self.patches[i];
            let around = std::array::from_fn(|dir| match patch.neighbors[dir] {
                Some(n) if n.terrain == own => lods.get(n.index as usize).copied(),
                Some(_) => patch.neighbor_lods[dir],
                None => None,
            });
            self.restitch(i, lods[i], around)?;
        }
        Ok(())
    }

    pub(crate) fn check_patch_lod(&self, index: usize, lod: u32) -> Result<()> {
        if index >= self.patches.len() {
            return Err(Error::OutOfRange(format!("patch {} of {}", index, self.patches.len())));
        }
        if lod >= self.num_lod_levels {
            return Err(Error::OutOfRange(format!("LOD {} of {}", lod, self.num_lod_levels)));
        }
        Ok(())
    }

    /// Set a patch's LOD against known neighbour LODs (North, South, West, East)
    pub(crate) fn restitch(&mut self, index: usize, lod: u32, neighbor_lods: [Option<u32>; 4]) -> Result<()> {
        let mask = lod::stitch_mask(lod, self.num_lod_levels, neighbor_lods);
        let patch = self
            .patches
            .get_mut(index)
            .ok_or_else(|| Error::OutOfRange(format!("patch {}", index)))?;
        patch.set_lod(lod, mask, &self.index_table)?;
        patch.neighbor_lods = neighbor_lods;
        Ok(())
    }

    /// Draw batches for patches inside the camera frustum
    pub fn batches(&self, camera: &Camera) -> Vec<DrawBatch<'_>> {
        let frustum = camera.frustum();
        self.patches
            .iter()
            .enumerate()
            .filter(|(_, p)| !p.geometry().is_empty())
            .filter(|(_, p)| frustum.intersects_aabb(&p.world_bounding_box(&self.transform)))
            .map(|(i, p)| DrawBatch {
                patch: PatchId { terrain: self.id, index: i as u32 },
                geometry: p.geometry(),
                material: self.material.as_ref(),
                world_transform: self.transform * p.local_transform(),
                distance: p.distance(),
                lod_distance: p.lod_distance(),
            })
            .collect()
    }

    // ---- Device loss ----

    /// Drop GPU resources after the device was lost; shadows are kept
    pub fn on_device_lost(&mut self) {
        write_lock(&self.index_buffer).on_device_lost();
        for patch in &self.patches {
            write_lock(patch.vertex_buffer()).on_device_lost();
        }
    }

    /// Recreate GPU resources, regenerating any content that could not be restored
    pub fn on_device_reset(&mut self) -> Result<()> {
        let index_lost = {
            let mut ib = write_lock(&self.index_buffer);
            ib.on_device_reset()?;
            ib.is_data_lost()
        };
        if index_lost {
            log::warn!("Terrain index data lost on reset, rebuilding index table");
            {
                let mut ib = write_lock(&self.index_buffer);
                ib.set_data(bytemuck::cast_slice(self.index_table.indices()))?;
                ib.clear_data_lost();
            }
        }

        let mut lost = Vec::new();
        for (i, patch) in self.patches.iter().enumerate() {
            let mut vb = write_lock(patch.vertex_buffer());
            vb.on_device_reset()?;
            if vb.is_data_lost() {
                lost.push(i);
            }
        }
        if lost.is_empty() {
            return Ok(());
        }

        log::warn!("Regenerating {} terrain patches after device reset", lost.len());
        let patch_size = self.config.patch_size as i32;
        let occlusion_lod = self.config.occlusion_lod_level.min(self.num_lod_levels.saturating_sub(1));
        for i in lost {
            let data = build_patch_vertices(&self.heightfield, self.patches[i].coords(), patch_size, occlusion_lod);
            let (lod, mask) = (self.patches[i].lod_level(), self.patches[i].stitch_mask());
            let patch = &mut self.patches[i];
            patch.apply_vertex_data(&data, &self.index_buffer, &self.raw_indices, &self.index_table, occlusion_lod)?;
            patch.set_lod(lod, mask, &self.index_table)?;
        }
        Ok(())
    }

    /// True if any buffer of this terrain is waiting for a device reset
    pub fn is_data_pending(&self) -> bool {
        read_lock(&self.index_buffer).is_data_pending()
            || self.patches.iter().any(|p| read_lock(p.vertex_buffer()).is_data_pending())
    }
}
