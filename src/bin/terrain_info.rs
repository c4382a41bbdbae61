//! Terrain inspector — builds a terrain from a heightmap and reports patch and LOD statistics.
//!
//! Usage: cargo run --release --bin terrain_info -- <HEIGHTMAP> [OPTIONS]
//!
//! Options:
//!   --config <PATH>       JSON terrain config (heightmap argument overrides its path)
//!   --patch-size <N>      Patch edge in samples, power of two in [4, 128]
//!   --camera <X,Y,Z>      Camera position for LOD selection (default: above the centre)
//!   --lod-bias <BIAS>     Camera LOD bias (default: 1.0)
//!   --gpu                 Upload through wgpu instead of the headless backend
//!   --save-config <PATH>  Write the effective config as JSON

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Instant;

use terrace::core::camera::Camera;
use terrace::core::logging;
use terrace::core::types::Vec3;
use terrace::core::{Error, Result};
use terrace::render::GraphicsDevice;
use terrace::terrain::{Terrain, TerrainConfig};

fn main() -> Result<()> {
    logging::init();

    let args: Vec<String> = std::env::args().collect();
    let mut config = match parse_str_arg(&args, "--config") {
        Some(path) => TerrainConfig::load(&PathBuf::from(path))?,
        None => TerrainConfig::default(),
    };
    if let Some(path) = args.get(1).filter(|a| !a.starts_with("--")) {
        config.height_map = Some(PathBuf::from(path));
    }
    if let Some(patch_size) = parse_u32_arg(&args, "--patch-size") {
        config.patch_size = patch_size;
    }
    if config.height_map.is_none() {
        eprintln!("Usage: terrain_info <HEIGHTMAP> [--config PATH] [--patch-size N] [--camera X,Y,Z] [--gpu]");
        return Err(Error::InvalidArgument("no heightmap given".into()));
    }
    if let Some(path) = parse_str_arg(&args, "--save-config") {
        config.save(&PathBuf::from(path))?;
    }

    let device = if args.iter().any(|a| a == "--gpu") {
        GraphicsDevice::wgpu()?
    } else {
        GraphicsDevice::headless()
    };
    log::info!("Using {} backend", device.backend_name());

    let start = Instant::now();
    let mut terrain = Terrain::from_config(&device, config)?;
    let build_time = start.elapsed();

    let num_patches = terrain.num_patches();
    let num_vertices = terrain.num_vertices();
    println!("=== Terrain ===");
    println!("Samples:     {}x{}", num_vertices.x, num_vertices.y);
    println!("Patches:     {}x{} of {}", num_patches.x, num_patches.y, terrain.config().patch_size);
    println!("LOD levels:  {}", terrain.num_lod_levels());
    println!(
        "Index table: {} indices, {} draw ranges",
        terrain.index_table().indices().len(),
        terrain.index_table().draw_ranges().len()
    );
    println!("GPU buffers: {}", device.buffer_count());
    println!("Build time:  {:.2?}", build_time);

    if terrain.patches().is_empty() {
        println!("Heightmap too small for a single patch");
        return Ok(());
    }

    // Largest error per level over all patches
    let mut max_errors = vec![0.0f32; terrain.num_lod_levels() as usize];
    for patch in terrain.patches() {
        for (max, error) in max_errors.iter_mut().zip(patch.lod_errors()) {
            *max = max.max(*error);
        }
    }
    println!("Max LOD error per level: {:?}", max_errors);

    let size = terrain.patch_world_size() * num_patches.as_vec2();
    let default_camera = Vec3::new(0.0, size.max_element() * 0.25, 0.0);
    let camera = Camera {
        position: parse_vec3_arg(&args, "--camera").unwrap_or(default_camera),
        lod_bias: parse_f32_arg(&args, "--lod-bias").unwrap_or(1.0),
        ..Default::default()
    };

    let start = Instant::now();
    terrain.update_lod(&camera)?;
    let lod_time = start.elapsed();

    let mut histogram: BTreeMap<u32, usize> = BTreeMap::new();
    let mut stitched = 0;
    for patch in terrain.patches() {
        *histogram.entry(patch.lod_level()).or_default() += 1;
        if patch.stitch_mask() != 0 {
            stitched += 1;
        }
    }
    let drawn_indices: u64 = terrain.patches().iter().map(|p| p.geometry().index_count() as u64).sum();

    println!();
    println!("=== LOD from camera at {} ===", camera.position);
    for (level, count) in &histogram {
        println!("  LOD {}: {} patches", level, count);
    }
    println!("Stitched patches: {}", stitched);
    println!("Triangles:        {}", drawn_indices / 3);
    println!("Visible batches:  {}", terrain.batches(&camera).len());
    println!("LOD update time:  {:.2?}", lod_time);
    Ok(())
}

fn parse_u32_arg(args: &[String], flag: &str) -> Option<u32> {
    args.iter().position(|a| a == flag)
        .and_then(|i| args.get(i + 1))
        .and_then(|s| s.parse().ok())
}

fn parse_f32_arg(args: &[String], flag: &str) -> Option<f32> {
    args.iter().position(|a| a == flag)
        .and_then(|i| args.get(i + 1))
        .and_then(|s| s.parse().ok())
}

fn parse_str_arg(args: &[String], flag: &str) -> Option<String> {
    args.iter().position(|a| a == flag)
        .and_then(|i| args.get(i + 1))
        .cloned()
}

fn parse_vec3_arg(args: &[String], flag: &str) -> Option<Vec3> {
    let values: Vec<f32> = parse_str_arg(args, flag)?
        .split(',')
        .map(|s| s.trim().parse().ok())
        .collect::<Option<_>>()?;
    match values[..] {
        [x, y, z] => Some(Vec3::new(x, y, z)),
        _ => None,
    }
}
