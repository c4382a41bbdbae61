//! GPU device, buffers and geometry

pub mod backend;
pub mod batch;
pub mod buffer;
pub mod device;
pub mod geometry;

pub use backend::{GpuBackend, HeadlessBackend, WgpuBackend};
pub use batch::{DrawBatch, MaterialHandle};
pub use buffer::{IndexBuffer, SharedIndexBuffer, SharedVertexBuffer, VertexBuffer};
pub use device::GraphicsDevice;
pub use geometry::{Geometry, GeometryHit, PrimitiveType};
