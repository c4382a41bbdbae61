//! Graphics device handle passed explicitly to every GPU resource

use std::sync::{Arc, Mutex, MutexGuard};

use super::backend::{BufferKind, GpuBackend, GpuHandle, HeadlessBackend, WgpuBackend};
use crate::core::Result;

/// Pool of reusable host buffers handed out while unshadowed buffers are locked
#[derive(Debug, Default)]
pub struct ScratchPool {
    free: Vec<Vec<u8>>,
    reserved: usize,
    max_request: usize,
}

impl ScratchPool {
    /// Take a zeroed buffer of exactly `size` bytes
    pub fn reserve(&mut self, size: usize) -> Vec<u8> {
        self.max_request = self.max_request.max(size);
        self.reserved += 1;

        // Prefer a free buffer that is already large enough, then any free buffer
        let pick = self
            .free
            .iter()
            .position(|b| b.capacity() >= size)
            .or_else(|| if self.free.is_empty() { None } else { Some(0) });

        let mut buffer = match pick {
            Some(i) => self.free.swap_remove(i),
            None => Vec::with_capacity(size),
        };
        buffer.clear();
        buffer.resize(size, 0);
        buffer
    }

    /// Return a buffer obtained from `reserve`
    pub fn free(&mut self, buffer: Vec<u8>) {
        self.reserved = self.reserved.saturating_sub(1);
        self.free.push(buffer);
    }

    /// Shrink free buffers that are much larger than recent requests
    pub fn cleanup(&mut self) {
        let limit = self.max_request * 2;
        for buffer in &mut self.free {
            if buffer.capacity() > limit {
                buffer.clear();
                buffer.shrink_to(self.max_request);
            }
        }
        self.max_request = 0;
    }

    /// Buffers currently lent out
    pub fn reserved_count(&self) -> usize {
        self.reserved
    }

    /// Buffers waiting for reuse
    pub fn free_count(&self) -> usize {
        self.free.len()
    }
}

struct DeviceInner {
    backend: Mutex<Box<dyn GpuBackend>>,
    scratch: Mutex<ScratchPool>,
}

/// Cloneable handle to the one graphics device of the process.
///
/// Resources keep a clone and route all GPU work through it.
#[derive(Clone)]
pub struct GraphicsDevice {
    inner: Arc<DeviceInner>,
}

impl std::fmt::Debug for GraphicsDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GraphicsDevice")
            .field("backend", &self.backend_name())
            .field("lost", &self.is_lost())
            .finish()
    }
}

impl GraphicsDevice {
    /// Wrap a backend selected at startup
    pub fn new(backend: impl GpuBackend + 'static) -> Self {
        Self {
            inner: Arc::new(DeviceInner {
                backend: Mutex::new(Box::new(backend)),
                scratch: Mutex::new(ScratchPool::default()),
            }),
        }
    }

    /// Device backed by host memory
    pub fn headless() -> Self {
        Self::new(HeadlessBackend::new())
    }

    /// Device backed by the best available wgpu adapter
    pub fn wgpu() -> Result<Self> {
        Ok(Self::new(WgpuBackend::new()?))
    }

    fn backend(&self) -> MutexGuard<'_, Box<dyn GpuBackend>> {
        self.inner.backend.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn scratch(&self) -> MutexGuard<'_, ScratchPool> {
        self.inner.scratch.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Backend name for logs
    pub fn backend_name(&self) -> &'static str {
        self.backend().name()
    }

    /// True while the device is lost
    pub fn is_lost(&self) -> bool {
        self.backend().is_device_lost()
    }

    /// Put the device into the lost state, dropping all GPU resources.
    ///
    /// Owners must then call their resources' `on_device_lost`.
    pub fn lose(&self) {
        log::warn!("Graphics device lost");
        self.backend().lose_device();
    }

    /// Leave the lost state. Owners must then call `on_device_reset`.
    pub fn reset(&self) -> Result<()> {
        self.backend().restore_device()?;
        log::info!("Graphics device reset");
        Ok(())
    }

    /// Number of live GPU buffers
    pub fn buffer_count(&self) -> usize {
        self.backend().buffer_count()
    }

    pub(crate) fn create_buffer(&self, kind: BufferKind, size: u64, dynamic: bool) -> Result<GpuHandle> {
        self.backend().create_buffer(kind, size, dynamic)
    }

    pub(crate) fn release_buffer(&self, handle: GpuHandle) {
        self.backend().release_buffer(handle);
    }

    pub(crate) fn upload(&self, handle: GpuHandle, offset: u64, data: &[u8], discard: bool) -> Result<()> {
        self.backend().upload(handle, offset, data, discard)
    }

    pub(crate) fn read(&self, handle: GpuHandle, offset: u64, size: u64) -> Result<Vec<u8>> {
        self.backend().read(handle, offset, size)
    }

    /// Borrow a scratch buffer of `size` bytes from the pool
    pub fn reserve_scratch(&self, size: usize) -> Vec<u8> {
        self.scratch().reserve(size)
    }

    /// Give a scratch buffer back to the pool
    pub fn free_scratch(&self, buffer: Vec<u8>) {
        self.scratch().free(buffer);
    }

    /// Shrink oversized scratch buffers; call once per frame or after loading
    pub fn cleanup_scratch(&self) {
        self.scratch().cleanup();
    }

    /// Scratch buffers currently lent out
    pub fn scratch_in_use(&self) -> usize {
        self.scratch().reserved_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scratch_reuse() {
        let mut pool = ScratchPool::default();
        let a = pool.reserve(64);
        assert_eq!(a.len(), 64);
        assert_eq!(pool.reserved_count(), 1);
        pool.free(a);
        assert_eq!(pool.free_count(), 1);

        // Smaller request reuses the same allocation
        let b = pool.reserve(16);
        assert_eq!(b.len(), 16);
        assert!(b.capacity() >= 64);
        assert_eq!(pool.free_count(), 0);
        pool.free(b);
    }

    #[test]
    fn test_scratch_is_zeroed() {
        let mut pool = ScratchPool::default();
        let mut a = pool.reserve(8);
        a.fill(0xff);
        pool.free(a);
        let b = pool.reserve(8);
        assert!(b.iter().all(|&x| x == 0));
    }

    #[test]
    fn test_scratch_cleanup_shrinks() {
        let mut pool = ScratchPool::default();
        let big = pool.reserve(4096);
        pool.free(big);
        pool.cleanup();
        let small = pool.reserve(8);
        pool.free(small);
        pool.cleanup();
        assert!(pool.free.iter().all(|b| b.capacity() <= 4096));
    }

    #[test]
    fn test_headless_device_loss_cycle() {
        let device = GraphicsDevice::headless();
        assert_eq!(device.backend_name(), "headless");
        let handle = device.create_buffer(BufferKind::Vertex, 16, false).unwrap();
        assert_eq!(device.buffer_count(), 1);

        device.lose();
        assert!(device.is_lost());
        assert!(device.read(handle, 0, 4).is_err());

        device.reset().unwrap();
        assert!(!device.is_lost());
        assert_eq!(device.buffer_count(), 0);
    }
}
