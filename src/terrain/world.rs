//! Multi-terrain worlds with seamless borders

use std::collections::{BTreeMap, HashMap};

use crate::core::camera::Camera;
use crate::core::error::Error;
use crate::core::Result;
use crate::math::Ray;
use crate::render::batch::DrawBatch;

use super::lod;
use super::patch::TerrainPatch;
use super::tile::{RayHit, RayQueryLevel, Terrain, TerrainLink};

/// Handle of a terrain in a [`TerrainWorld`]. Never reused after removal.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TerrainId(pub u32);

/// A patch of a specific terrain
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PatchId {
    pub terrain: TerrainId,
    /// `z * num_patches.x + x` within the terrain
    pub index: u32,
}

/// Owns terrains and keeps their shared borders consistent
#[derive(Debug, Default)]
pub struct TerrainWorld {
    terrains: BTreeMap<TerrainId, Terrain>,
    next_id: u32,
}

impl TerrainWorld {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take ownership of a terrain and give it an id
    pub fn add(&mut self, mut terrain: Terrain) -> TerrainId {
        self.next_id += 1;
        let id = TerrainId(self.next_id);
        terrain.set_id(id);
        self.terrains.insert(id, terrain);
        log::debug!("Added terrain {:?}", id);
        self.relink(id);
        id
    }

    /// Remove a terrain. Terrains bordering it lose the link.
    pub fn remove(&mut self, id: TerrainId) -> Option<Terrain> {
        let terrain = self.terrains.remove(&id)?;
        let affected: Vec<TerrainId> = self
            .terrains
            .iter()
            .filter(|(_, t)| t.neighbor_ids.contains(&Some(id)))
            .map(|(other, _)| *other)
            .collect();
        for other in affected {
            self.relink(other);
        }
        log::debug!("Removed terrain {:?}", id);
        Some(terrain)
    }

    pub fn get(&self, id: TerrainId) -> Option<&Terrain> {
        self.terrains.get(&id)
    }

    /// Mutable access. Call [`sync_neighbors`](Self::sync_neighbors) after rebuilding.
    pub fn get_mut(&mut self, id: TerrainId) -> Option<&mut Terrain> {
        self.terrains.get_mut(&id)
    }

    pub fn len(&self) -> usize {
        self.terrains.len()
    }

    pub fn is_empty(&self) -> bool {
        self.terrains.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (TerrainId, &Terrain)> {
        self.terrains.iter().map(|(id, t)| (*id, t))
    }

    pub fn patch(&self, id: PatchId) -> Option<&TerrainPatch> {
        self.terrains.get(&id.terrain)?.patch(id.index as usize)
    }

    /// Set the terrains bordering `id` in North, South, West, East order.
    ///
    /// Links are one-way; call again on each neighbour for the reverse side.
    pub fn set_neighbors(&mut self, id: TerrainId, neighbors: [Option<TerrainId>; 4]) -> Result<()> {
        let terrain = self
            .terrains
            .get_mut(&id)
            .ok_or_else(|| Error::InvalidArgument(format!("unknown terrain {:?}", id)))?;
        terrain.neighbor_ids = neighbors;
        self.relink(id);
        for other in neighbors.into_iter().flatten() {
            if other != id && self.terrains.contains_key(&other) {
                self.relink(other);
            }
        }
        Ok(())
    }

    /// Resolve a terrain's neighbour ids to links and refresh its edge patches
    fn relink(&mut self, id: TerrainId) {
        let Some(ids) = self.terrains.get(&id).map(|t| t.neighbor_ids) else {
            return;
        };
        let links = ids.map(|n| {
            let other = self.terrains.get(&n?)?;
            Some(TerrainLink { id: other.id(), num_patches: other.num_patches(), generation: other.generation() })
        });
        if let Some(terrain) = self.terrains.get_mut(&id) {
            terrain.set_links(links);
        }
    }

    /// Re-link every terrain whose neighbours were rebuilt, added or removed
    /// since it last linked. Returns how many terrains were re-linked.
    pub fn sync_neighbors(&mut self) -> usize {
        let stale: Vec<TerrainId> = self
            .terrains
            .iter()
            .filter(|(_, terrain)| {
                terrain.neighbor_ids.iter().zip(terrain.links()).any(|(id, link)| {
                    let current = id.and_then(|id| self.terrains.get(&id)).map(|t| t.generation());
                    current != link.map(|l| l.generation)
                })
            })
            .map(|(id, _)| *id)
            .collect();
        for id in &stale {
            log::debug!("Re-linking edge patches of terrain {:?}", id);
            self.relink(*id);
        }
        stale.len()
    }

    /// Select LODs for every terrain, then clamp and stitch across borders
    pub fn update_lod(&mut self, camera: &Camera) -> Result<()> {
        self.sync_neighbors();

        let mut offsets: HashMap<TerrainId, usize> = HashMap::new();
        let mut lods: Vec<u32> = Vec::new();
        for (id, terrain) in self.terrains.iter_mut() {
            offsets.insert(*id, lods.len());
            lods.extend(terrain.select_lods(camera));
        }

        let flat = |p: PatchId| offsets.get(&p.terrain).map(|o| o + p.index as usize);
        let neighbors: Vec<[Option<usize>; 4]> = self
            .terrains
            .values()
            .flat_map(|t| t.patches().iter())
            .map(|p| p.neighbors().map(|n| n.and_then(flat).filter(|&i| i < lods.len())))
            .collect();
        lod::clamp_to_neighbors(&mut lods, &neighbors);

        for (id, terrain) in self.terrains.iter_mut() {
            let start = offsets[id];
            let end = start + terrain.patches().len();
            let neighbor_lods: Vec<[Option<u32>; 4]> = terrain
                .patches()
                .iter()
                .map(|p| p.neighbors().map(|n| n.and_then(flat).and_then(|i| lods.get(i).copied())))
                .collect();
            terrain.apply_lods(&lods[start..end], &neighbor_lods)?;
        }
        Ok(())
    }

    /// Force one patch's LOD and restitch it and its neighbours, across borders
    pub fn set_patch_lod(&mut self, id: PatchId, lod: u32) -> Result<()> {
        let terrain = self
            .terrains
            .get(&id.terrain)
            .ok_or_else(|| Error::InvalidArgument(format!("unknown terrain {:?}", id.terrain)))?;
        terrain.check_patch_lod(id.index as usize, lod)?;

        let current = |p: PatchId| if p == id { Some(lod) } else { self.patch(p).map(|p| p.lod_level()) };
        let neighbors = self.patch(id).map(|p| p.neighbors()).unwrap_or_default();
        let mut updates = Vec::new();
        for p in std::iter::once(id).chain(neighbors.into_iter().flatten()) {
            let (Some(patch), Some(level)) = (self.patch(p), current(p)) else {
                continue;
            };
            updates.push((p, level, patch.neighbors().map(|n| n.and_then(current))));
        }

        for (p, level, neighbor_lods) in updates {
            if let Some(terrain) = self.terrains.get_mut(&p.terrain) {
                terrain.restitch(p.index as usize, level, neighbor_lods)?;
            }
        }
        Ok(())
    }

    /// Frustum-culled draw batches of all terrains
    pub fn batches(&self, camera: &Camera) -> Vec<DrawBatch<'_>> {
        self.terrains.values().flat_map(|t| t.batches(camera)).collect()
    }

    /// Nearest hit over all terrains
    pub fn raycast(&self, ray: &Ray, max_distance: f32, level: RayQueryLevel) -> Option<RayHit> {
        self.terrains
            .values()
            .filter_map(|t| t.raycast(ray, max_distance, level))
            .min_by(|a, b| a.distance.total_cmp(&b.distance))
    }

    pub fn on_device_lost(&mut self) {
        for terrain in self.terrains.values_mut() {
            terrain.on_device_lost();
        }
    }

    pub fn on_device_reset(&mut self) -> Result<()> {
        for terrain in self.terrains.values_mut() {
            terrain.on_device_reset()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{Mat4, Vec3};
    use crate::render::device::GraphicsDevice;
    use crate::terrain::config::TerrainConfig;
    use crate::terrain::heightmap::HeightMap;
    use crate::terrain::lod::{Direction, STITCH_EAST, STITCH_WEST};

    fn flat_terrain(device: &GraphicsDevice) -> Terrain {
        let config = TerrainConfig { patch_size: 16, spacing: [1.0, 1.0, 1.0], ..Default::default() };
        let mut terrain = Terrain::new(device, config).unwrap();
        terrain.set_height_map(HeightMap::from_luma8(33, 33, vec![0; 33 * 33]).unwrap()).unwrap();
        terrain
    }

    /// Two 2x2-patch terrains side by side, `west` at x < 0
    fn pair() -> (TerrainWorld, TerrainId, TerrainId) {
        let device = GraphicsDevice::headless();
        let mut world = TerrainWorld::new();
        let mut west = flat_terrain(&device);
        west.set_transform(Mat4::from_translation(Vec3::new(-16.0, 0.0, 0.0)));
        let mut east = flat_terrain(&device);
        east.set_transform(Mat4::from_translation(Vec3::new(16.0, 0.0, 0.0)));
        let west = world.add(west);
        let east = world.add(east);
        world.set_neighbors(west, [None, None, None, Some(east)]).unwrap();
        world.set_neighbors(east, [None, None, Some(west), None]).unwrap();
        (world, west, east)
    }

    #[test]
    fn test_ids_not_reused() {
        let device = GraphicsDevice::headless();
        let mut world = TerrainWorld::new();
        let a = world.add(flat_terrain(&device));
        assert!(world.remove(a).is_some());
        let b = world.add(flat_terrain(&device));
        assert_ne!(a, b);
        assert!(world.get(a).is_none());
        assert_eq!(world.get(b).unwrap().id(), b);
        assert_eq!(world.len(), 1);
    }

    #[test]
    fn test_cross_terrain_links() {
        let (world, west, east) = pair();
        // Patch (1, 0) of west borders patch (0, 0) of east
        let edge = world.patch(PatchId { terrain: west, index: 1 }).unwrap();
        assert_eq!(edge.neighbors()[Direction::East as usize], Some(PatchId { terrain: east, index: 0 }));
        let other = world.patch(PatchId { terrain: east, index: 2 }).unwrap();
        assert_eq!(other.neighbors()[Direction::West as usize], Some(PatchId { terrain: west, index: 3 }));
        // Outer edges stay open
        assert_eq!(world.patch(PatchId { terrain: west, index: 0 }).unwrap().neighbors()[Direction::West as usize], None);
    }

    #[test]
    fn test_removed_neighbor_resolves_to_none() {
        let (mut world, west, east) = pair();
        world.remove(east);
        let edge = world.patch(PatchId { terrain: west, index: 1 }).unwrap();
        assert_eq!(edge.neighbors()[Direction::East as usize], None);
        assert_eq!(world.sync_neighbors(), 0);
    }

    #[test]
    fn test_sync_after_rebuild() {
        let (mut world, west, east) = pair();
        assert_eq!(world.sync_neighbors(), 0);

        // Rebuild east with a different patch size
        world.get_mut(east).unwrap().set_patch_size(32).unwrap();
        assert_eq!(world.sync_neighbors(), 1);
        let edge = world.patch(PatchId { terrain: west, index: 3 }).unwrap();
        // West patch (1, 1) now looks at a 1x1 terrain that has no row 1
        assert_eq!(edge.neighbors()[Direction::East as usize], None);
        let edge = world.patch(PatchId { terrain: west, index: 1 }).unwrap();
        assert_eq!(edge.neighbors()[Direction::East as usize], Some(PatchId { terrain: east, index: 0 }));
    }

    #[test]
    fn test_stitch_across_border() {
        let (mut world, west, east) = pair();
        world.set_patch_lod(PatchId { terrain: east, index: 0 }, 1).unwrap();
        let edge = world.patch(PatchId { terrain: west, index: 1 }).unwrap();
        assert_eq!(edge.stitch_mask(), STITCH_EAST);
        assert_eq!(world.patch(PatchId { terrain: east, index: 0 }).unwrap().stitch_mask(), 0);

        assert!(world.set_patch_lod(PatchId { terrain: east, index: 0 }, 7).is_err());
        assert!(world.set_patch_lod(PatchId { terrain: TerrainId(99), index: 0 }, 0).is_err());
    }

    #[test]
    fn test_terrain_lod_change_keeps_border_stitch() {
        let (mut world, west, east) = pair();
        world.set_patch_lod(PatchId { terrain: east, index: 0 }, 1).unwrap();
        assert_eq!(world.patch(PatchId { terrain: west, index: 1 }).unwrap().stitch_mask(), STITCH_EAST);

        // Restitching inside the west terrain alone still sees the coarser east patch
        world.get_mut(west).unwrap().set_patch_lod(3, 0).unwrap();
        let edge = world.patch(PatchId { terrain: west, index: 1 }).unwrap();
        assert_eq!(edge.stitch_mask(), STITCH_EAST);
        assert_eq!(edge.neighbor_lods()[Direction::East as usize], Some(1));

        world.get_mut(west).unwrap().set_patch_lod(1, 1).unwrap();
        assert_eq!(world.patch(PatchId { terrain: west, index: 1 }).unwrap().stitch_mask(), 0);
    }

    #[test]
    fn test_terrain_update_lod_clamps_to_linked_patches() {
        let (mut world, west, east) = pair();
        let near = Camera { position: Vec3::new(0.0, 50.0, 0.0), lod_bias: 1000.0, ..Default::default() };
        world.update_lod(&near).unwrap();
        assert!(world.iter().all(|(_, t)| t.patches().iter().all(|p| p.lod_level() == 0)));

        // Only the west terrain goes coarse; its east column is held next to the finer east terrain
        let far = Camera { lod_bias: 0.0001, ..near };
        world.get_mut(west).unwrap().update_lod(&far).unwrap();
        let level = |terrain, index| world.patch(PatchId { terrain, index }).unwrap().lod_level();
        assert_eq!([level(west, 0), level(west, 1), level(west, 2), level(west, 3)], [2, 1, 2, 1]);
        assert_eq!(level(east, 0), 0);
        let edge = world.patch(PatchId { terrain: west, index: 1 }).unwrap();
        assert_eq!(edge.stitch_mask(), STITCH_WEST);
    }

    #[test]
    fn test_update_lod_clamps_across_border() {
        let (mut world, west, east) = pair();
        // Camera near the west edge of the west terrain, far LOD distances elsewhere
        let camera = Camera {
            position: Vec3::new(-32.0, 1.0, 8.0),
            lod_bias: 0.01,
            ..Default::default()
        };
        world.update_lod(&camera).unwrap();

        let lods: Vec<(PatchId, u32)> = world
            .iter()
            .flat_map(|(id, t)| {
                t.patches()
                    .iter()
                    .enumerate()
                    .map(move |(i, p)| (PatchId { terrain: id, index: i as u32 }, p.lod_level()))
            })
            .collect();
        for (id, level) in &lods {
            let patch = world.patch(*id).unwrap();
            for n in patch.neighbors().into_iter().flatten() {
                let other = world.patch(n).unwrap().lod_level();
                assert!(level.abs_diff(other) <= 1);
            }
        }

        let near = world.patch(PatchId { terrain: west, index: 2 }).unwrap();
        let far = world.patch(PatchId { terrain: east, index: 1 }).unwrap();
        assert_eq!((near.lod_level(), far.lod_level()), (0, 2));

        // The finer west side stitches towards the coarser east terrain, never the reverse
        let west_edge = world.patch(PatchId { terrain: west, index: 1 }).unwrap();
        let east_edge = world.patch(PatchId { terrain: east, index: 0 }).unwrap();
        assert_eq!((west_edge.lod_level(), east_edge.lod_level()), (1, 2));
        assert_eq!(west_edge.stitch_mask() & STITCH_EAST, STITCH_EAST);
        assert_eq!(east_edge.stitch_mask() & STITCH_WEST, 0);
    }

    #[test]
    fn test_world_raycast() {
        let (world, _, east) = pair();
        let ray = Ray::new(Vec3::new(20.4, 5.0, 4.3), Vec3::new(-1.0, -1.0, 0.0).normalize());
        let hit = world.raycast(&ray, 1000.0, RayQueryLevel::Triangle).unwrap();
        assert_eq!(hit.patch, PatchId { terrain: east, index: 2 });
        assert!((hit.position - Vec3::new(15.4, 0.0, 4.3)).length() < 1e-4);
        assert!((hit.distance - 5.0 * std::f32::consts::SQRT_2).abs() < 1e-4);
    }
}
