//! Heightmap generator — writes fractal noise as a 16-bit greyscale PNG.
//!
//! Usage: cargo run --release --bin generate_heightmap -- [OPTIONS]
//!
//! Options:
//!   --size <PIXELS>     Image edge length (default: 513, i.e. 16 patches of 32 + 1)
//!   --seed <SEED>       Random seed (default: 12345)
//!   --scale <PIXELS>    Feature size in pixels (default: 200.0)
//!   --octaves <N>       Noise octaves (default: 6)
//!   --output <PATH>     Output file (default: heightmap.png)

use std::path::PathBuf;
use std::time::Instant;

use image::{ImageBuffer, Luma};
use noise::{Fbm, MultiFractal, NoiseFn, Perlin};
use rayon::prelude::*;

use terrace::core::logging;
use terrace::core::Result;

fn main() -> Result<()> {
    logging::init();

    let args: Vec<String> = std::env::args().collect();
    let size = parse_u32_arg(&args, "--size").unwrap_or(513).max(2);
    let seed = parse_u32_arg(&args, "--seed").unwrap_or(12345);
    let scale = parse_f64_arg(&args, "--scale").unwrap_or(200.0).max(1.0);
    let octaves = parse_u32_arg(&args, "--octaves").unwrap_or(6).clamp(1, 12);
    let output = parse_str_arg(&args, "--output").map(PathBuf::from).unwrap_or_else(|| PathBuf::from("heightmap.png"));

    println!("=== Terrace Heightmap Generator ===");
    println!("Size:    {}x{}", size, size);
    println!("Seed:    {}", seed);
    println!("Scale:   {}, Octaves: {}", scale, octaves);
    println!("Output:  {}", output.display());

    let start = Instant::now();
    let noise = Fbm::<Perlin>::new(seed)
        .set_octaves(octaves as usize)
        .set_persistence(0.5)
        .set_lacunarity(2.0);

    let pixels: Vec<u16> = (0..size * size)
        .into_par_iter()
        .map(|i| {
            let (x, y) = ((i % size) as f64, (i / size) as f64);
            // [-1, 1] to the full 16-bit range
            let value = noise.get([x / scale, y / scale]).clamp(-1.0, 1.0);
            ((value + 1.0) * 0.5 * u16::MAX as f64).round() as u16
        })
        .collect();

    let (min, max) = pixels.iter().fold((u16::MAX, 0), |(lo, hi), &p| (lo.min(p), hi.max(p)));
    let image: ImageBuffer<Luma<u16>, Vec<u16>> = ImageBuffer::from_raw(size, size, pixels)
        .ok_or_else(|| terrace::core::Error::HeightMap("pixel buffer does not match image size".into()))?;
    if let Some(parent) = output.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    image.save(&output)?;

    log::info!("Wrote {} in {:.2?}", output.display(), start.elapsed());
    println!("Height range: {} .. {} of {}", min, max, u16::MAX);
    Ok(())
}

fn parse_u32_arg(args: &[String], flag: &str) -> Option<u32> {
    args.iter().position(|a| a == flag)
        .and_then(|i| args.get(i + 1))
        .and_then(|s| s.parse().ok())
}

fn parse_f64_arg(args: &[String], flag: &str) -> Option<f64> {
    args.iter().position(|a| a == flag)
        .and_then(|i| args.get(i + 1))
        .and_then(|s| s.parse().ok())
}

fn parse_str_arg(args: &[String], flag: &str) -> Option<String> {
    args.iter().position(|a| a == flag)
        .and_then(|i| args.get(i + 1))
        .cloned()
}
