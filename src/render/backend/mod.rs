//! GPU backends behind a small capability trait
//!
//! Buffers never talk to a graphics API directly. They go through the
//! [`GraphicsDevice`](crate::render::GraphicsDevice), which owns exactly one
//! boxed [`GpuBackend`] chosen at startup.

pub mod headless;
pub mod wgpu_backend;

pub use headless::HeadlessBackend;
pub use wgpu_backend::WgpuBackend;

use crate::core::Result;

/// Opaque GPU resource handle issued by a backend
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct GpuHandle(pub u64);

/// What a GPU buffer is bound as
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BufferKind {
    Vertex,
    Index,
}

impl BufferKind {
    pub fn label(self) -> &'static str {
        match self {
            BufferKind::Vertex => "vertex buffer",
            BufferKind::Index => "index buffer",
        }
    }
}

/// Capability set every graphics backend provides to the buffer layer
pub trait GpuBackend: Send {
    /// Short backend name for logs
    fn name(&self) -> &'static str;

    /// True while the device is lost and resources cannot be created
    fn is_device_lost(&self) -> bool;

    /// Drop every GPU resource and enter the lost state
    fn lose_device(&mut self);

    /// Leave the lost state; previously issued handles stay invalid
    fn restore_device(&mut self) -> Result<()>;

    /// Allocate a buffer of `size` bytes
    fn create_buffer(&mut self, kind: BufferKind, size: u64, dynamic: bool) -> Result<GpuHandle>;

    /// Free a buffer. Unknown handles are ignored.
    fn release_buffer(&mut self, handle: GpuHandle);

    /// Write `data` at byte `offset`. `discard` allows the driver to orphan old contents.
    fn upload(&mut self, handle: GpuHandle, offset: u64, data: &[u8], discard: bool) -> Result<()>;

    /// Read back `size` bytes starting at `offset`
    fn read(&mut self, handle: GpuHandle, offset: u64, size: u64) -> Result<Vec<u8>>;

    /// Number of live buffers (diagnostics)
    fn buffer_count(&self) -> usize;
}
