//! Axis-aligned bounding box

use crate::core::types::{Mat4, Vec3};

/// Axis-aligned box between two corners
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Aabb {
    pub min: Vec3,
    pub max: Vec3,
}

impl Aabb {
    /// Inverted box that becomes valid after the first `expand`
    pub const EMPTY: Aabb = Aabb {
        min: Vec3::splat(f32::INFINITY),
        max: Vec3::splat(f32::NEG_INFINITY),
    };

    pub fn new(min: Vec3, max: Vec3) -> Self {
        Self { min, max }
    }

    pub fn center(&self) -> Vec3 {
        (self.min + self.max) * 0.5
    }

    pub fn size(&self) -> Vec3 {
        self.max - self.min
    }

    /// Grow to include a point
    pub fn expand(&mut self, point: Vec3) {
        self.min = self.min.min(point);
        self.max = self.max.max(point);
    }

    /// True once at least one point has been merged in
    pub fn is_valid(&self) -> bool {
        self.min.cmple(self.max).all()
    }

    /// Corner `i`; bit 0 selects max x, bit 1 max y, bit 2 max z
    pub fn corner(&self, i: u8) -> Vec3 {
        Vec3::new(
            if i & 1 != 0 { self.max.x } else { self.min.x },
            if i & 2 != 0 { self.max.y } else { self.min.y },
            if i & 4 != 0 { self.max.z } else { self.min.z },
        )
    }

    /// Box enclosing this box after an affine transform
    pub fn transformed(&self, matrix: &Mat4) -> Aabb {
        if !self.is_valid() {
            return *self;
        }
        let mut out = Aabb::EMPTY;
        for i in 0..8 {
            out.expand(matrix.transform_point3(self.corner(i)));
        }
        out
    }
}
