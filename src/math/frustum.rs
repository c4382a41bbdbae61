//! View frustum for patch culling

use crate::core::types::{Mat4, Vec3, Vec4};
use super::aabb::Aabb;

/// Plane `normal · p + d = 0`; points in front have positive distance
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Plane {
    pub normal: Vec3,
    pub d: f32,
}

impl Plane {
    /// Normalize a `(a, b, c, d)` plane equation
    fn from_equation(v: Vec4) -> Self {
        let len = v.truncate().length().max(f32::EPSILON);
        Self { normal: v.truncate() / len, d: v.w / len }
    }

    pub fn distance(&self, point: Vec3) -> f32 {
        self.normal.dot(point) + self.d
    }
}

/// How a box relates to a frustum
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Intersection {
    Outside,
    Intersects,
    Inside,
}

/// Six inward-facing planes: left, right, bottom, top, near, far
#[derive(Clone, Copy, Debug)]
pub struct Frustum {
    pub planes: [Plane; 6],
}

impl Frustum {
    /// Planes of a right-handed view-projection with a `[0, 1]` depth range
    pub fn from_view_projection(vp: &Mat4) -> Self {
        let (r0, r1, r2, r3) = (vp.row(0), vp.row(1), vp.row(2), vp.row(3));
        Self {
            planes: [r3 + r0, r3 - r0, r3 + r1, r3 - r1, r2, r3 - r2].map(Plane::from_equation),
        }
    }

    /// Classify a box using its nearest and farthest corners against each plane
    pub fn classify_aabb(&self, aabb: &Aabb) -> Intersection {
        let center = aabb.center();
        let half = aabb.size() * 0.5;
        let mut all_inside = true;
        for plane in &self.planes {
            let distance = plane.distance(center);
            let radius = half.dot(plane.normal.abs());
            if distance < -radius {
                return Intersection::Outside;
            }
            if distance < radius {
                all_inside = false;
            }
        }
        if all_inside {
            Intersection::Inside
        } else {
            Intersection::Intersects
        }
    }

    /// Conservative visibility test
    pub fn intersects_aabb(&self, aabb: &Aabb) -> bool {
        self.classify_aabb(aabb) != Intersection::Outside
    }
}
