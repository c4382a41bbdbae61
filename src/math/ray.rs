//! Rays for picking against patch bounds and triangles

use crate::core::types::{Vec3, Mat4, EPSILON};
use super::aabb::Aabb;

/// Half-line from `origin` along a unit `direction`
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Ray {
    pub origin: Vec3,
    pub direction: Vec3,
}

impl Ray {
    pub fn new(origin: Vec3, direction: Vec3) -> Self {
        Self { origin, direction }
    }

    pub fn at(&self, t: f32) -> Vec3 {
        self.origin + self.direction * t
    }

    /// Entry and exit parameters of the slab test, entry clamped to zero
    pub fn aabb_range(&self, aabb: &Aabb) -> Option<(f32, f32)> {
        if !aabb.is_valid() {
            return None;
        }
        let inv = self.direction.recip();
        let t1 = (aabb.min - self.origin) * inv;
        let t2 = (aabb.max - self.origin) * inv;
        // NaN from a zero direction component on a slab face is ignored by min/max
        let t_near = t1.min(t2).max_element();
        let t_far = t1.max(t2).min_element();
        (t_near <= t_far && t_far >= 0.0).then(|| (t_near.max(0.0), t_far))
    }

    /// Distance to an AABB, zero when the origin is inside, infinity on a miss
    pub fn hit_distance_aabb(&self, aabb: &Aabb) -> f32 {
        self.aabb_range(aabb).map_or(f32::INFINITY, |(t_near, _)| t_near)
    }

    /// Ray-triangle intersection (Moller-Trumbore), back faces rejected.
    ///
    /// Returns the distance, the unnormalized face normal `edge1 x edge2`
    /// and the barycentric weights of `v0`, `v1`, `v2`.
    pub fn intersects_triangle(&self, v0: Vec3, v1: Vec3, v2: Vec3) -> Option<(f32, Vec3, Vec3)> {
        let edge1 = v1 - v0;
        let edge2 = v2 - v0;

        let p = self.direction.cross(edge2);
        let det = edge1.dot(p);
        if det < EPSILON {
            return None;
        }

        let t = self.origin - v0;
        let u = t.dot(p);
        if u < 0.0 || u > det {
            return None;
        }

        let q = t.cross(edge1);
        let v = self.direction.dot(q);
        if v < 0.0 || u + v > det {
            return None;
        }

        let distance = edge2.dot(q) / det;
        if distance < 0.0 {
            return None;
        }

        let bary = Vec3::new(1.0 - u / det - v / det, u / det, v / det);
        Some((distance, edge1.cross(edge2), bary))
    }

    /// Ray in another space; the direction is renormalized so distances stay metric
    pub fn transform(&self, matrix: &Mat4) -> Ray {
        Ray::new(
            matrix.transform_point3(self.origin),
            matrix.transform_vector3(self.direction).normalize_or_zero(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_aabb_range() {
        let ray = Ray::new(Vec3::new(-2.0, 0.5, 0.5), Vec3::X);
        let (t_near, t_far) = ray.aabb_range(&Aabb::new(Vec3::ZERO, Vec3::ONE)).unwrap();
        assert!((t_near - 2.0).abs() < 0.001);
        assert!((t_far - 3.0).abs() < 0.001);
        // Starting inside
        let inside = Ray::new(Vec3::splat(0.5), Vec3::X);
        assert_eq!(inside.hit_distance_aabb(&Aabb::new(Vec3::ZERO, Vec3::ONE)), 0.0);
    }

    #[test]
    fn test_vertical_ray_hits_flat_patch_box() {
        let patch = Aabb::new(Vec3::new(0.0, 2.0, 0.0), Vec3::new(16.0, 2.0, 16.0));
        let ray = Ray::new(Vec3::new(4.0, 10.0, 4.0), Vec3::NEG_Y);
        assert!((ray.hit_distance_aabb(&patch) - 8.0).abs() < 1e-5);
        let beside = Ray::new(Vec3::new(20.0, 10.0, 4.0), Vec3::NEG_Y);
        assert_eq!(beside.hit_distance_aabb(&patch), f32::INFINITY);
        assert_eq!(ray.hit_distance_aabb(&Aabb::EMPTY), f32::INFINITY);
    }

    #[test]
    fn test_triangle_hit_from_above() {
        // Winding matches a terrain grid cell seen from +Y
        let v0 = Vec3::new(0.0, 0.0, 1.0);
        let v1 = Vec3::new(1.0, 0.0, 0.0);
        let v2 = Vec3::new(0.0, 0.0, 0.0);
        let ray = Ray::new(Vec3::new(0.25, 5.0, 0.25), -Vec3::Y);
        let (distance, normal, bary) = ray.intersects_triangle(v0, v1, v2).unwrap();
        assert!((distance - 5.0).abs() < 0.0001);
        assert!(normal.normalize().y > 0.99);
        assert!((bary.x + bary.y + bary.z - 1.0).abs() < 0.0001);
        assert_eq!(ray.at(distance).y, 0.0);
    }

    #[test]
    fn test_triangle_back_face_rejected() {
        let v0 = Vec3::new(0.0, 0.0, 1.0);
        let v1 = Vec3::new(1.0, 0.0, 0.0);
        let v2 = Vec3::new(0.0, 0.0, 0.0);
        let ray = Ray::new(Vec3::new(0.25, -5.0, 0.25), Vec3::Y);
        assert!(ray.intersects_triangle(v0, v1, v2).is_none());
    }

    #[test]
    fn test_transform_keeps_unit_direction() {
        let ray = Ray::new(Vec3::ZERO, Vec3::X);
        let scaled = ray.transform(&Mat4::from_scale(Vec3::splat(2.0)));
        assert!((scaled.direction.length() - 1.0).abs() < 1e-6);
    }
}
