//! Heightfield terrain split into LOD patches

pub mod config;
pub mod heightfield;
pub mod heightmap;
pub mod index_table;
pub mod lod;
pub mod patch;
pub mod tile;
pub mod world;

pub use config::TerrainConfig;
pub use heightfield::Heightfield;
pub use heightmap::{load_height_map_async, HeightMap};
pub use index_table::IndexTable;
pub use lod::Direction;
pub use patch::{TerrainPatch, TerrainVertex};
pub use tile::{RayHit, RayQueryLevel, Terrain, TerrainLink};
pub use world::{PatchId, TerrainId, TerrainWorld};
