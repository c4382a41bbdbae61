//! Height samples and the surface they describe

use crate::core::types::{IVec2, Vec3};

/// Grid of height samples with an optional unsmoothed source copy.
///
/// Sample `(x, z)` lives at `z * size.x + x`; `z` grows towards +z in world space.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Heightfield {
    size: IVec2,
    spacing: Vec3,
    heights: Vec<f32>,
    source: Option<Vec<f32>>,
}

impl Heightfield {
    /// Flat heightfield of `size` samples
    pub fn new(size: IVec2, spacing: Vec3, smoothing: bool) -> Self {
        let count = (size.x.max(0) * size.y.max(0)) as usize;
        Self {
            size,
            spacing,
            heights: vec![0.0; count],
            source: smoothing.then(|| vec![0.0; count]),
        }
    }

    pub fn size(&self) -> IVec2 {
        self.size
    }

    pub fn spacing(&self) -> Vec3 {
        self.spacing
    }

    pub fn is_empty(&self) -> bool {
        self.heights.is_empty()
    }

    pub fn is_smoothed(&self) -> bool {
        self.source.is_some()
    }

    pub fn heights(&self) -> &[f32] {
        &self.heights
    }

    fn index(&self, x: i32, z: i32) -> usize {
        let x = x.clamp(0, self.size.x - 1);
        let z = z.clamp(0, self.size.y - 1);
        (z * self.size.x + x) as usize
    }

    /// Height at a sample, clamped to the grid
    pub fn raw_height(&self, x: i32, z: i32) -> f32 {
        if self.heights.is_empty() {
            return 0.0;
        }
        self.heights[self.index(x, z)]
    }

    /// Unsmoothed height; same as `raw_height` without smoothing
    pub fn source_height(&self, x: i32, z: i32) -> f32 {
        match &self.source {
            Some(source) if !source.is_empty() => source[self.index(x, z)],
            _ => self.raw_height(x, z),
        }
    }

    /// Store a new input height. Writes the source copy when smoothing.
    ///
    /// Returns true if the stored value changed.
    pub fn set_input_height(&mut self, x: i32, z: i32, height: f32) -> bool {
        if x < 0 || z < 0 || x >= self.size.x || z >= self.size.y {
            return false;
        }
        let i = self.index(x, z);
        let slot = match &mut self.source {
            Some(source) => &mut source[i],
            None => &mut self.heights[i],
        };
        let changed = *slot != height;
        *slot = height;
        changed
    }

    /// Height of the surface a LOD level renders, at sample `(x, z)`.
    ///
    /// The point is located in the LOD grid cell containing it, then
    /// interpolated on the cell triangle the index table draws there.
    pub fn lod_height(&self, x: i32, z: i32, lod: u32) -> f32 {
        let offset = 1i32 << lod;
        let divisor = offset as f32;
        let x0 = x - x.rem_euclid(offset);
        let z0 = z - z.rem_euclid(offset);
        let x_frac = (x - x0) as f32 / divisor;
        let z_frac = (z - z0) as f32 / divisor;
        self.triangle_height(x0, z0, offset, x_frac, z_frac)
    }

    /// Interpolate inside the cell at `(x0, z0)` of edge `step`, split along
    /// the diagonal from `(x0 + step, z0)` to `(x0, z0 + step)`
    fn triangle_height(&self, x0: i32, z0: i32, step: i32, x_frac: f32, z_frac: f32) -> f32 {
        let (h1, h2, h3, xf, zf) = if x_frac + z_frac >= 1.0 {
            (
                self.raw_height(x0 + step, z0 + step),
                self.raw_height(x0, z0 + step),
                self.raw_height(x0 + step, z0),
                1.0 - x_frac,
                1.0 - z_frac,
            )
        } else {
            (
                self.raw_height(x0, z0),
                self.raw_height(x0 + step, z0),
                self.raw_height(x0, z0 + step),
                x_frac,
                z_frac,
            )
        };
        h1 * (1.0 - xf - zf) + h2 * xf + h3 * zf
    }

    /// Height at fractional sample coordinates on the full resolution surface
    pub fn interpolated_height(&self, x: f32, z: f32) -> f32 {
        let (x0, z0) = (x.floor(), z.floor());
        self.triangle_height(x0 as i32, z0 as i32, 1, x - x0, z - z0)
    }

    /// Normal at fractional sample coordinates, using the same triangle choice as the height
    pub fn interpolated_normal(&self, x: f32, z: f32) -> Vec3 {
        let (x0, z0) = (x.floor(), z.floor());
        let (xi, zi) = (x0 as i32, z0 as i32);
        let (x_frac, z_frac) = (x - x0, z - z0);
        let (n1, n2, n3, xf, zf) = if x_frac + z_frac >= 1.0 {
            (
                self.raw_normal(xi + 1, zi + 1),
                self.raw_normal(xi, zi + 1),
                self.raw_normal(xi + 1, zi),
                1.0 - x_frac,
                1.0 - z_frac,
            )
        } else {
            (
                self.raw_normal(xi, zi),
                self.raw_normal(xi + 1, zi),
                self.raw_normal(xi, zi + 1),
                x_frac,
                z_frac,
            )
        };
        (n1 * (1.0 - xf - zf) + n2 * xf + n3 * zf).normalize_or(Vec3::Y)
    }

    /// Normal from the slopes to all eight neighbours, summed unweighted
    pub fn raw_normal(&self, x: i32, z: i32) -> Vec3 {
        let base = self.raw_height(x, z);
        let n = self.raw_height(x, z - 1) - base;
        let ne = self.raw_height(x + 1, z - 1) - base;
        let e = self.raw_height(x + 1, z) - base;
        let se = self.raw_height(x + 1, z + 1) - base;
        let s = self.raw_height(x, z + 1) - base;
        let sw = self.raw_height(x - 1, z + 1) - base;
        let w = self.raw_height(x - 1, z) - base;
        let nw = self.raw_height(x - 1, z - 1) - base;
        let up = 0.5 * (self.spacing.x + self.spacing.z);

        (Vec3::new(0.0, up, n)
            + Vec3::new(-ne, up, ne)
            + Vec3::new(-e, up, 0.0)
            + Vec3::new(-se, up, -se)
            + Vec3::new(0.0, up, -s)
            + Vec3::new(sw, up, -sw)
            + Vec3::new(w, up, 0.0)
            + Vec3::new(nw, up, nw))
        .normalize_or(Vec3::Y)
    }

    /// Recompute smoothed heights in the inclusive sample rectangle `min..=max`
    /// from the source copy. Does nothing without smoothing.
    pub fn smooth_region(&mut self, min: IVec2, max: IVec2) {
        if self.source.is_none() {
            return;
        }
        let min = min.max(IVec2::ZERO);
        let max = max.min(self.size - IVec2::ONE);
        for z in min.y..=max.y {
            for x in min.x..=max.x {
                let h = |dx: i32, dz: i32| self.source_height(x + dx, z + dz);
                let smoothed = (h(-1, -1) + h(0, -1) * 2.0 + h(1, -1)
                    + h(-1, 0) * 2.0 + h(0, 0) * 4.0 + h(1, 0) * 2.0
                    + h(-1, 1) + h(0, 1) * 2.0 + h(1, 1))
                    / 16.0;
                let i = self.index(x, z);
                self.heights[i] = smoothed;
            }
        }
    }

    /// Maximum vertical deviation of each LOD level from the full resolution
    /// surface over the patch whose first sample is `origin`, edges included.
    ///
    /// Level 0 is always zero.
    pub fn lod_errors(&self, origin: IVec2, patch_size: i32, num_lod_levels: u32) -> Vec<f32> {
        (0..num_lod_levels)
            .map(|lod| {
                if lod == 0 {
                    return 0.0;
                }
                let divisor = 1i32 << lod;
                let mut max_error = 0.0f32;
                for z in origin.y..=origin.y + patch_size {
                    for x in origin.x..=origin.x + patch_size {
                        if x % divisor != 0 || z % divisor != 0 {
                            let error = (self.lod_height(x, z, lod) - self.raw_height(x, z)).abs();
                            max_error = max_error.max(error);
                        }
                    }
                }
                max_error
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn field(size: i32, f: impl Fn(i32, i32) -> f32) -> Heightfield {
        let mut hf = Heightfield::new(IVec2::splat(size), Vec3::ONE, false);
        for z in 0..size {
            for x in 0..size {
                hf.set_input_height(x, z, f(x, z));
            }
        }
        hf
    }

    #[test]
    fn test_raw_height_clamps() {
        let hf = field(3, |x, z| (x + 10 * z) as f32);
        assert_eq!(hf.raw_height(2, 1), 12.0);
        assert_eq!(hf.raw_height(-4, 1), 10.0);
        assert_eq!(hf.raw_height(9, 9), 22.0);
    }

    #[test]
    fn test_lod_height_on_plane_is_exact() {
        // Any planar surface is reproduced by every LOD
        let hf = field(17, |x, z| 0.5 * x as f32 - 0.25 * z as f32 + 3.0);
        for lod in 0..4 {
            for z in 0..16 {
                for x in 0..16 {
                    assert!((hf.lod_height(x, z, lod) - hf.raw_height(x, z)).abs() < 1e-4);
                }
            }
        }
    }

    #[test]
    fn test_lod_height_diagonal_choice() {
        // Single raised sample at (2, 2). At level 1 only the cells whose
        // diagonal passes through it see the spike at their centre.
        let hf = field(5, |x, z| if x == 2 && z == 2 { 4.0 } else { 0.0 });
        assert_eq!(hf.lod_height(3, 1, 1), 2.0);
        assert_eq!(hf.lod_height(1, 3, 1), 2.0);
        assert_eq!(hf.lod_height(1, 1, 1), 0.0);
        assert_eq!(hf.lod_height(3, 3, 1), 0.0);
        // Edge midpoint between (2,2) and (4,2)
        assert_eq!(hf.lod_height(3, 2, 1), 2.0);
    }

    #[test]
    fn test_interpolated_height_at_grid_points() {
        let hf = field(5, |x, z| (x * x + z) as f32);
        for z in 0..5 {
            for x in 0..5 {
                assert_eq!(hf.interpolated_height(x as f32, z as f32), hf.raw_height(x, z));
            }
        }
    }

    #[test]
    fn test_flat_normal_is_up() {
        let hf = field(4, |_, _| 2.0);
        assert_eq!(hf.raw_normal(1, 1), Vec3::Y);
        assert_eq!(hf.interpolated_normal(1.5, 0.2), Vec3::Y);
    }

    #[test]
    fn test_normal_leans_away_from_slope() {
        let hf = field(5, |x, _| x as f32);
        let n = hf.raw_normal(2, 2);
        assert!(n.x < 0.0);
        assert!(n.z.abs() < 1e-6);
    }

    #[test]
    fn test_smoothing_is_idempotent() {
        let mut hf = Heightfield::new(IVec2::splat(6), Vec3::ONE, true);
        hf.set_input_height(3, 3, 16.0);
        hf.smooth_region(IVec2::ZERO, IVec2::splat(5));
        let once = hf.heights().to_vec();
        assert_eq!(hf.raw_height(3, 3), 4.0);
        assert_eq!(hf.raw_height(2, 3), 2.0);
        assert_eq!(hf.raw_height(2, 2), 1.0);
        assert_eq!(hf.source_height(3, 3), 16.0);

        hf.smooth_region(IVec2::ZERO, IVec2::splat(5));
        assert_eq!(hf.heights(), once.as_slice());
    }

    #[test]
    fn test_lod_errors_level_zero() {
        let hf = field(9, |x, z| ((x * 7 + z * 3) % 5) as f32);
        let errors = hf.lod_errors(IVec2::ZERO, 8, 3);
        assert_eq!(errors.len(), 3);
        assert_eq!(errors[0], 0.0);
        assert!(errors[1] > 0.0);
    }
}
