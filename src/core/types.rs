//! Math re-exports shared by terrain, model and render code

pub use glam::{IVec2, Mat4, Quat, Vec2, Vec3, Vec4};

/// Crate-wide result
pub type Result<T> = std::result::Result<T, crate::core::error::Error>;

/// Smallest positive value treated as non-zero in geometric tests
pub const EPSILON: f32 = 0.000001;
