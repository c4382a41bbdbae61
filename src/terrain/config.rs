//! Terrain build parameters, loadable from JSON

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::core::error::Error;
use crate::core::types::Vec3;
use crate::core::Result;

/// Smallest patch edge in samples; also the coarsest LOD's edge length
pub const MIN_PATCH_SIZE: u32 = 4;
/// Largest patch edge in samples
pub const MAX_PATCH_SIZE: u32 = 128;
/// Upper bound for `max_lod_levels`
pub const MAX_LOD_LEVELS_LIMIT: u32 = 4;

/// Parameters a terrain is built from
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TerrainConfig {
    /// Patch edge length in height samples, a power of two in `[4, 128]`
    pub patch_size: u32,
    /// World distance between samples on x and z; y scales heightmap values
    pub spacing: [f32; 3],
    /// Cap on LOD levels, `[1, 4]`
    pub max_lod_levels: u32,
    /// LOD level used for occlusion geometry, clamped to the coarsest level
    pub occlusion_lod_level: u32,
    /// Run a 3x3 smoothing pass over the heightmap
    pub smoothing: bool,
    /// Higher values keep finer LODs further away
    pub lod_bias: f32,
    /// Material name forwarded to draw batches
    pub material: Option<String>,
    /// Heightmap image to build from
    pub height_map: Option<PathBuf>,
}

impl Default for TerrainConfig {
    fn default() -> Self {
        Self {
            patch_size: 32,
            spacing: [1.0, 0.25, 1.0],
            max_lod_levels: 4,
            occlusion_lod_level: 3,
            smoothing: false,
            lod_bias: 1.0,
            material: None,
            height_map: None,
        }
    }
}

impl TerrainConfig {
    pub fn spacing(&self) -> Vec3 {
        Vec3::from_array(self.spacing)
    }

    /// Check every parameter is in range
    pub fn validate(&self) -> Result<()> {
        if !self.patch_size.is_power_of_two() || !(MIN_PATCH_SIZE..=MAX_PATCH_SIZE).contains(&self.patch_size) {
            return Err(Error::Config(format!(
                "patch_size must be a power of two in [{}, {}], got {}",
                MIN_PATCH_SIZE, MAX_PATCH_SIZE, self.patch_size
            )));
        }
        if !(1..=MAX_LOD_LEVELS_LIMIT).contains(&self.max_lod_levels) {
            return Err(Error::Config(format!(
                "max_lod_levels must be in [1, {}], got {}",
                MAX_LOD_LEVELS_LIMIT, self.max_lod_levels
            )));
        }
        if self.spacing.iter().any(|s| !s.is_finite() || *s <= 0.0) {
            return Err(Error::Config(format!("spacing must be positive, got {:?}", self.spacing)));
        }
        if !self.lod_bias.is_finite() || self.lod_bias <= 0.0 {
            return Err(Error::Config(format!("lod_bias must be positive, got {}", self.lod_bias)));
        }
        Ok(())
    }

    /// Load and validate a JSON config
    pub fn load(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&json)?;
        config.validate()?;
        Ok(config)
    }

    /// Write as pretty JSON, creating parent directories
    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, json)?;
        Ok(())
    }
}
