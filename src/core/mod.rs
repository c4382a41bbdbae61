//! Shared types: errors, logging, math aliases and the LOD camera

pub mod camera;
pub mod error;
pub mod logging;
pub mod types;

pub use error::Error;
pub use types::*;
