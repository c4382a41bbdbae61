//! GPU buffer management

pub mod element;
mod gpu_buffer;
pub mod index_buffer;
pub mod vertex_buffer;

use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

pub use element::{VertexElement, VertexElementSemantic, VertexElementType};
pub use index_buffer::IndexBuffer;
pub use vertex_buffer::VertexBuffer;

/// Vertex buffer referenced by several geometries
pub type SharedVertexBuffer = Arc<RwLock<VertexBuffer>>;

/// Index buffer referenced by several geometries
pub type SharedIndexBuffer = Arc<RwLock<IndexBuffer>>;

/// Read access that survives a poisoned lock
pub fn read_lock<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|e| e.into_inner())
}

/// Write access that survives a poisoned lock
pub fn write_lock<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|e| e.into_inner())
}
