//! Per-patch LOD selection and edge stitching

use crate::core::types::Vec3;

/// Largest tolerated ratio of geometric error to LOD distance
pub const LOD_CONSTANT: f32 = 1.0 / 150.0;

pub const STITCH_NORTH: u8 = 1;
pub const STITCH_SOUTH: u8 = 2;
pub const STITCH_WEST: u8 = 4;
pub const STITCH_EAST: u8 = 8;

/// Patch neighbour direction. North is +z, east is +x.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Direction {
    North = 0,
    South = 1,
    West = 2,
    East = 3,
}

impl Direction {
    /// In neighbour array order
    pub const ALL: [Direction; 4] = [Direction::North, Direction::South, Direction::West, Direction::East];

    pub fn stitch_bit(self) -> u8 {
        match self {
            Direction::North => STITCH_NORTH,
            Direction::South => STITCH_SOUTH,
            Direction::West => STITCH_WEST,
            Direction::East => STITCH_EAST,
        }
    }

    pub fn opposite(self) -> Direction {
        match self {
            Direction::North => Direction::South,
            Direction::South => Direction::North,
            Direction::West => Direction::East,
            Direction::East => Direction::West,
        }
    }

    /// Step in patch grid coordinates `(dx, dz)`
    pub fn offset(self) -> (i32, i32) {
        match self {
            Direction::North => (0, 1),
            Direction::South => (0, -1),
            Direction::West => (-1, 0),
            Direction::East => (1, 0),
        }
    }
}

/// Index into the draw range table for a level and stitch mask
pub fn draw_range_index(lod: u32, stitch_mask: u8) -> usize {
    ((lod as usize) << 4) | (stitch_mask & 0xf) as usize
}

/// Error a level must stay under to be chosen.
///
/// Level 0 is always acceptable. Coarser levels are never assumed better
/// than half their own vertex spacing, so flat ground does not stretch out
/// to the coarsest level right in front of the camera.
pub fn lod_threshold(lod_errors: &[f32], level: usize, spacing: Vec3) -> f32 {
    if level == 0 {
        return 0.0;
    }
    let floor = 0.25 * (spacing.x + spacing.z) * (1u32 << level) as f32;
    lod_errors.get(level).copied().unwrap_or(f32::INFINITY).max(floor)
}

/// Coarsest level whose threshold, and every finer level's, stays within
/// `LOD_CONSTANT` of `lod_distance`
pub fn select_lod(lod_errors: &[f32], lod_distance: f32, spacing: Vec3) -> u32 {
    let mut lod = 0;
    for level in 1..lod_errors.len() {
        if lod_threshold(lod_errors, level, spacing) / lod_distance > LOD_CONSTANT {
            break;
        }
        lod = level as u32;
    }
    lod
}

/// Lower LODs until no patch is more than one level coarser than any neighbour.
///
/// `neighbors[i]` lists the indices of patch `i`'s neighbours. Returns the
/// number of relaxation sweeps.
pub fn clamp_to_neighbors(lods: &mut [u32], neighbors: &[[Option<usize>; 4]]) -> usize {
    let mut sweeps = 0;
    loop {
        sweeps += 1;
        let mut changed = false;
        for i in 0..lods.len() {
            let Some(links) = neighbors.get(i) else {
                continue;
            };
            for n in links.iter().flatten() {
                if let Some(&other) = lods.get(*n) {
                    if lods[i] > other + 1 {
                        lods[i] = other + 1;
                        changed = true;
                    }
                }
            }
        }
        if !changed {
            return sweeps;
        }
    }
}

/// Edges to stitch: those whose neighbour is strictly coarser.
///
/// The coarsest level never stitches.
pub fn stitch_mask(lod: u32, num_lod_levels: u32, neighbor_lods: [Option<u32>; 4]) -> u8 {
    if lod + 1 >= num_lod_levels {
        return 0;
    }
    Direction::ALL
        .iter()
        .zip(neighbor_lods)
        .filter(|(_, n)| n.is_some_and(|n| n > lod))
        .fold(0, |mask, (dir, _)| mask | dir.stitch_bit())
}

#[cfg(test)]
mod tests {
    use super::*;

    const SPACING: Vec3 = Vec3::ONE;

    #[test]
    fn test_threshold_floor() {
        let errors = [0.0, 0.0, 3.0, 0.5];
        assert_eq!(lod_threshold(&errors, 0, SPACING), 0.0);
        assert_eq!(lod_threshold(&errors, 1, SPACING), 1.0);
        assert_eq!(lod_threshold(&errors, 2, SPACING), 3.0);
        assert_eq!(lod_threshold(&errors, 3, SPACING), 4.0);
    }

    #[test]
    fn test_select_lod_thresholds() {
        let errors = [0.0, 5.0, 7.5, 8.75];
        assert_eq!(select_lod(&errors, 1.0, SPACING), 0);
        for level in 1..4 {
            let switch = lod_threshold(&errors, level, SPACING) / LOD_CONSTANT;
            assert_eq!(select_lod(&errors, switch * 0.999, SPACING), level as u32 - 1);
            assert_eq!(select_lod(&errors, switch * 1.001, SPACING), level as u32);
        }
    }

    #[test]
    fn test_select_lod_stops_at_first_failure() {
        // Level 2 is cheap but level 1 is not acceptable yet
        let errors = [0.0, 10.0, 2.0];
        assert_eq!(select_lod(&errors, 500.0, SPACING), 0);
    }

    #[test]
    fn test_clamp_chain() {
        // 0 - 1 - 2 - 3 in a row
        let neighbors = [
            [None, None, None, Some(1)],
            [None, None, Some(0), Some(2)],
            [None, None, Some(1), Some(3)],
            [None, None, Some(2), None],
        ];
        let mut lods = [0, 3, 3, 3];
        clamp_to_neighbors(&mut lods, &neighbors);
        assert_eq!(lods, [0, 1, 2, 3]);
    }

    #[test]
    fn test_clamp_propagates_backwards() {
        let neighbors = [
            [None, None, None, Some(1)],
            [None, None, Some(0), Some(2)],
            [None, None, Some(1), None],
        ];
        let mut lods = [3, 3, 0];
        let sweeps = clamp_to_neighbors(&mut lods, &neighbors);
        assert_eq!(lods, [2, 1, 0]);
        assert!(sweeps >= 2);
    }

    #[test]
    fn test_stitch_mask() {
        let mask = stitch_mask(1, 4, [Some(2), Some(1), None, Some(0)]);
        assert_eq!(mask, STITCH_NORTH);
        let all = stitch_mask(0, 4, [Some(1); 4]);
        assert_eq!(all, STITCH_NORTH | STITCH_SOUTH | STITCH_WEST | STITCH_EAST);
        assert_eq!(stitch_mask(3, 4, [Some(3); 4]), 0);
    }

    #[test]
    fn test_draw_range_index() {
        assert_eq!(draw_range_index(0, 0), 0);
        assert_eq!(draw_range_index(2, STITCH_WEST | STITCH_EAST), 32 + 12);
        assert_eq!(Direction::North.opposite(), Direction::South);
        assert_eq!(Direction::East.offset(), (1, 0));
    }
}
