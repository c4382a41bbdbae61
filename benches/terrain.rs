use criterion::{criterion_group, criterion_main, Criterion, black_box};

use terrace::core::camera::Camera;
use terrace::core::types::Vec3;
use terrace::math::Ray;
use terrace::render::GraphicsDevice;
use terrace::terrain::{HeightMap, IndexTable, RayQueryLevel, Terrain, TerrainConfig};

/// Rolling hills heightmap of `size` pixels
fn hills(size: u32) -> HeightMap {
    let mut data = Vec::with_capacity((size * size) as usize);
    for y in 0..size {
        for x in 0..size {
            let h = (x as f32 * 0.05).sin() * (y as f32 * 0.07).cos();
            data.push(((h + 1.0) * 127.5) as u8);
        }
    }
    HeightMap::from_luma8(size, size, data).unwrap()
}

fn build_terrain(size: u32) -> Terrain {
    let device = GraphicsDevice::headless();
    let mut terrain = Terrain::new(&device, TerrainConfig::default()).unwrap();
    terrain.set_height_map(hills(size)).unwrap();
    terrain
}

fn bench_index_table(c: &mut Criterion) {
    c.bench_function("index_table_64x4", |b| {
        b.iter(|| IndexTable::build(black_box(64), black_box(4)).unwrap());
    });
}

fn bench_terrain_build_257(c: &mut Criterion) {
    let device = GraphicsDevice::headless();
    let map = hills(257);

    c.bench_function("terrain_build_257", |b| {
        b.iter(|| {
            let mut terrain = Terrain::new(&device, TerrainConfig::default()).unwrap();
            terrain.set_height_map(black_box(map.clone())).unwrap();
            terrain
        });
    });
}

fn bench_update_lod(c: &mut Criterion) {
    let mut terrain = build_terrain(513);

    c.bench_function("update_lod_513", |b| {
        let mut frame = 0u32;
        b.iter(|| {
            frame += 1;
            let camera = Camera {
                position: Vec3::new(
                    (frame as f32 * 0.1).sin() * 200.0,
                    40.0,
                    (frame as f32 * 0.1).cos() * 200.0,
                ),
                ..Default::default()
            };
            terrain.update_lod(black_box(&camera)).unwrap();
        });
    });
}

fn bench_raycast(c: &mut Criterion) {
    let terrain = build_terrain(257);
    let ray = Ray::new(Vec3::new(-100.0, 200.0, -100.0), Vec3::new(1.0, -1.0, 1.0).normalize());

    c.bench_function("raycast_triangle_257", |b| {
        b.iter(|| terrain.raycast(black_box(&ray), 1000.0, RayQueryLevel::Triangle));
    });
}

criterion_group!(
    benches,
    bench_index_table,
    bench_terrain_build_257,
    bench_update_lod,
    bench_raycast,
);
criterion_main!(benches);
