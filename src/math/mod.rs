//! Bounding volumes, rays and frustums

pub mod aabb;
pub mod frustum;
pub mod ray;

pub use aabb::Aabb;
pub use frustum::{Frustum, Intersection, Plane};
pub use ray::Ray;
