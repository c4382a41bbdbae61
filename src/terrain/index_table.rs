//! Shared triangle lists for every LOD level and stitch combination

use crate::core::error::Error;
use crate::core::Result;

use super::lod::{STITCH_EAST, STITCH_NORTH, STITCH_SOUTH, STITCH_WEST};

/// Index data for all patches of one terrain.
///
/// Every LOD level except the coarsest has 16 variants, one per combination
/// of edges that must stitch to a coarser neighbour. Look up a variant with
/// [`draw_range_index`](super::lod::draw_range_index).
#[derive(Clone, Debug, Default, PartialEq)]
pub struct IndexTable {
    patch_size: u32,
    num_lod_levels: u32,
    indices: Vec<u16>,
    draw_ranges: Vec<(u32, u32)>,
}

impl IndexTable {
    /// Build the table for square patches of `patch_size` cells.
    ///
    /// Fails when a patch has more vertices than 16-bit indices can address.
    pub fn build(patch_size: u32, num_lod_levels: u32) -> Result<Self> {
        let row = patch_size + 1;
        if (row as u64) * (row as u64) > 65536 {
            return Err(Error::OutOfRange(format!(
                "patch size {} needs {} vertices, more than 16-bit indices allow",
                patch_size,
                row as u64 * row as u64
            )));
        }
        if num_lod_levels == 0 || patch_size >> (num_lod_levels - 1) < 2 {
            return Err(Error::InvalidArgument(format!(
                "{} LOD levels do not fit a patch of {}",
                num_lod_levels, patch_size
            )));
        }

        let patch = patch_size as i32;
        let row = row as i32;
        let mut indices: Vec<u16> = Vec::new();
        let mut draw_ranges = Vec::new();

        // Emit one triangle given (x, z) corners
        let tri = |indices: &mut Vec<u16>, a: (i32, i32), b: (i32, i32), c: (i32, i32)| {
            for (x, z) in [a, b, c] {
                indices.push((z * row + x) as u16);
            }
        };

        for lod in 0..num_lod_levels {
            let combinations = if lod < num_lod_levels - 1 { 16 } else { 1 };
            let s = 1i32 << lod;

            for mask in 0..combinations as u8 {
                let start = indices.len() as u32;

                let z_start = if mask & STITCH_SOUTH != 0 { s } else { 0 };
                let z_end = if mask & STITCH_NORTH != 0 { patch - s } else { patch };
                let x_start = if mask & STITCH_WEST != 0 { s } else { 0 };
                let x_end = if mask & STITCH_EAST != 0 { patch - s } else { patch };

                // Main grid
                for z in (z_start..z_end).step_by(s as usize) {
                    for x in (x_start..x_end).step_by(s as usize) {
                        tri(&mut indices, (x, z + s), (x + s, z), (x, z));
                        tri(&mut indices, (x, z + s), (x + s, z + s), (x + s, z));
                    }
                }

                let west_open = |i: i32| i > 0 || mask & STITCH_WEST == 0;
                let east_open = |i: i32| i < patch - 2 * s || mask & STITCH_EAST == 0;
                let south_open = |i: i32| i > 0 || mask & STITCH_SOUTH == 0;
                let north_open = |i: i32| i < patch - 2 * s || mask & STITCH_NORTH == 0;

                if mask & STITCH_NORTH != 0 {
                    let z = patch - s;
                    for x in (0..patch).step_by(2 * s as usize) {
                        if west_open(x) {
                            tri(&mut indices, (x, z + s), (x + s, z), (x, z));
                        }
                        tri(&mut indices, (x, z + s), (x + 2 * s, z + s), (x + s, z));
                        if east_open(x) {
                            tri(&mut indices, (x + 2 * s, z + s), (x + 2 * s, z), (x + s, z));
                        }
                    }
                }

                if mask & STITCH_SOUTH != 0 {
                    let z = 0;
                    for x in (0..patch).step_by(2 * s as usize) {
                        if west_open(x) {
                            tri(&mut indices, (x, z + s), (x + s, z + s), (x, z));
                        }
                        tri(&mut indices, (x, z), (x + s, z + s), (x + 2 * s, z));
                        if east_open(x) {
                            tri(&mut indices, (x + s, z + s), (x + 2 * s, z + s), (x + 2 * s, z));
                        }
                    }
                }

                if mask & STITCH_WEST != 0 {
                    let x = 0;
                    for z in (0..patch).step_by(2 * s as usize) {
                        if south_open(z) {
                            tri(&mut indices, (x, z), (x + s, z + s), (x + s, z));
                        }
                        tri(&mut indices, (x, z + 2 * s), (x + s, z + s), (x, z));
                        if north_open(z) {
                            tri(&mut indices, (x, z + 2 * s), (x + s, z + 2 * s), (x + s, z + s));
                        }
                    }
                }

                if mask & STITCH_EAST != 0 {
                    let x = patch - s;
                    for z in (0..patch).step_by(2 * s as usize) {
                        if south_open(z) {
                            tri(&mut indices, (x, z), (x, z + s), (x + s, z));
                        }
                        tri(&mut indices, (x, z + s), (x + s, z + 2 * s), (x + s, z));
                        if north_open(z) {
                            tri(&mut indices, (x, z + s), (x, z + 2 * s), (x + s, z + 2 * s));
                        }
                    }
                }

                draw_ranges.push((start, indices.len() as u32 - start));
            }
        }

        log::debug!(
            "Built terrain index table: {} indices, {} draw ranges",
            indices.len(),
            draw_ranges.len()
        );

        Ok(Self { patch_size, num_lod_levels, indices, draw_ranges })
    }

    pub fn patch_size(&self) -> u32 {
        self.patch_size
    }

    pub fn num_lod_levels(&self) -> u32 {
        self.num_lod_levels
    }

    pub fn indices(&self) -> &[u16] {
        &self.indices
    }

    /// `(index_start, index_count)` at a draw range index
    pub fn draw_range(&self, index: usize) -> Option<(u32, u32)> {
        self.draw_ranges.get(index).copied()
    }

    pub fn draw_ranges(&self) -> &[(u32, u32)] {
        &self.draw_ranges
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::terrain::lod::draw_range_index;
    use std::collections::HashSet;

    fn triangles(table: &IndexTable, range: (u32, u32)) -> Vec<[u16; 3]> {
        let (start, count) = range;
        table.indices()[start as usize..(start + count) as usize]
            .chunks(3)
            .map(|t| [t[0], t[1], t[2]])
            .collect()
    }

    /// Twice the signed area in the xz plane; negative for the table's winding
    fn area2(row: i32, t: [u16; 3]) -> i32 {
        let p = |i: u16| (i as i32 % row, i as i32 / row);
        let (a, b, c) = (p(t[0]), p(t[1]), p(t[2]));
        (b.0 - a.0) * (c.1 - a.1) - (b.1 - a.1) * (c.0 - a.0)
    }

    #[test]
    fn test_draw_range_layout() {
        let table = IndexTable::build(32, 4).unwrap();
        assert_eq!(table.draw_ranges().len(), 3 * 16 + 1);
        // Level 0 without stitching: 32 * 32 cells, two triangles each
        assert_eq!(table.draw_range(0), Some((0, 32 * 32 * 6)));
        // Coarsest level has only the unstitched variant
        let coarsest = draw_range_index(3, 0);
        assert_eq!(coarsest, table.draw_ranges().len() - 1);
        assert_eq!(table.draw_range(coarsest).unwrap().1, 4 * 4 * 6);
    }

    #[test]
    fn test_indices_in_range() {
        for patch in [4u32, 16, 64, 128] {
            let levels = 1 + (patch / 4).ilog2().min(3);
            let table = IndexTable::build(patch, levels).unwrap();
            let limit = (patch + 1) * (patch + 1);
            assert!(table.indices().iter().all(|&i| (i as u32) < limit));
            for &(start, count) in table.draw_ranges() {
                assert_eq!(count % 3, 0);
                let unique: HashSet<u16> = table.indices()[start as usize..(start + count) as usize]
                    .iter()
                    .copied()
                    .collect();
                assert!(unique.len() <= 65535);
            }
        }
    }

    #[test]
    fn test_rejects_oversized_patch() {
        assert!(matches!(IndexTable::build(256, 1), Err(Error::OutOfRange(_))));
        assert!(IndexTable::build(4, 3).is_err());
    }

    #[test]
    fn test_every_variant_covers_patch_area() {
        // All triangles share one winding and tile the whole patch exactly once
        let patch = 16;
        let row = patch as i32 + 1;
        let table = IndexTable::build(patch, 3).unwrap();
        for (i, &range) in table.draw_ranges().iter().enumerate() {
            let tris = triangles(&table, range);
            let mut total = 0;
            for t in &tris {
                let a = area2(row, *t);
                assert!(a < 0, "variant {} has a triangle with the wrong winding: {:?}", i, t);
                total += -a;
            }
            assert_eq!(total, 2 * (patch * patch) as i32, "variant {} does not cover the patch", i);
        }
    }

    #[test]
    fn test_stitched_edge_uses_only_coarse_vertices() {
        let patch = 16i32;
        let row = patch + 1;
        let table = IndexTable::build(patch as u32, 3).unwrap();
        let range = table.draw_range(draw_range_index(0, STITCH_NORTH | STITCH_EAST)).unwrap();
        for t in triangles(&table, range) {
            for i in t {
                let (x, z) = (i as i32 % row, i as i32 / row);
                if z == patch {
                    assert_eq!(x % 2, 0, "north edge vertex ({}, {}) is not on the coarser grid", x, z);
                }
                if x == patch {
                    assert_eq!(z % 2, 0, "east edge vertex ({}, {}) is not on the coarser grid", x, z);
                }
            }
        }
    }
}
