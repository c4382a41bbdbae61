//! Mesh resources loaded from the binary model container

pub mod io;
pub mod model;
pub mod skeleton;

pub use model::{Model, ModelMorph, MorphBuffer};
pub use skeleton::{Bone, Skeleton};
