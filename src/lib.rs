//! Terrace - Heightfield terrain with seamless patch LOD over shadowed GPU buffers

pub mod core;
pub mod math;
pub mod render;
pub mod model;
pub mod terrain;
