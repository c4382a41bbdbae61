//! CPU-memory backend for tools, servers and tests

use std::collections::HashMap;

use super::{BufferKind, GpuBackend, GpuHandle};
use crate::core::error::Error;
use crate::core::Result;

struct HeadlessBuffer {
    kind: BufferKind,
    dynamic: bool,
    data: Vec<u8>,
}

/// Backend that keeps "GPU" buffers in host memory.
///
/// Supports simulated device loss and an optional memory budget so that
/// allocation failure paths can be exercised without a GPU.
pub struct HeadlessBackend {
    buffers: HashMap<GpuHandle, HeadlessBuffer>,
    next_handle: u64,
    memory_budget: Option<u64>,
    used_memory: u64,
    lost: bool,
}

impl HeadlessBackend {
    /// Create a backend with unlimited memory
    pub fn new() -> Self {
        Self {
            buffers: HashMap::new(),
            next_handle: 1,
            memory_budget: None,
            used_memory: 0,
            lost: false,
        }
    }

    /// Fail allocations once `bytes` are in use
    pub fn with_memory_budget(mut self, bytes: u64) -> Self {
        self.memory_budget = Some(bytes);
        self
    }

    /// Bytes currently allocated
    pub fn used_memory(&self) -> u64 {
        self.used_memory
    }

    fn buffer_mut(&mut self, handle: GpuHandle) -> Result<&mut HeadlessBuffer> {
        if self.lost {
            return Err(Error::DeviceLost("headless device is lost".into()));
        }
        self.buffers
            .get_mut(&handle)
            .ok_or_else(|| Error::Buffer(format!("unknown buffer handle {:?}", handle)))
    }
}

impl Default for HeadlessBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl GpuBackend for HeadlessBackend {
    fn name(&self) -> &'static str {
        "headless"
    }

    fn is_device_lost(&self) -> bool {
        self.lost
    }

    fn lose_device(&mut self) {
        self.lost = true;
        self.buffers.clear();
        self.used_memory = 0;
    }

    fn restore_device(&mut self) -> Result<()> {
        self.lost = false;
        Ok(())
    }

    fn create_buffer(&mut self, kind: BufferKind, size: u64, dynamic: bool) -> Result<GpuHandle> {
        if self.lost {
            return Err(Error::DeviceLost(format!("cannot create {} while device is lost", kind.label())));
        }
        if let Some(budget) = self.memory_budget {
            if self.used_memory + size > budget {
                return Err(Error::Gpu(format!(
                    "out of memory allocating {} bytes for {} ({} of {} in use)",
                    size,
                    kind.label(),
                    self.used_memory,
                    budget
                )));
            }
        }

        let handle = GpuHandle(self.next_handle);
        self.next_handle += 1;
        self.used_memory += size;
        self.buffers.insert(handle, HeadlessBuffer {
            kind,
            dynamic,
            data: vec![0; size as usize],
        });
        Ok(handle)
    }

    fn release_buffer(&mut self, handle: GpuHandle) {
        if let Some(buffer) = self.buffers.remove(&handle) {
            self.used_memory -= buffer.data.len() as u64;
        }
    }

    fn upload(&mut self, handle: GpuHandle, offset: u64, data: &[u8], _discard: bool) -> Result<()> {
        let buffer = self.buffer_mut(handle)?;
        let start = offset as usize;
        let end = start + data.len();
        if end > buffer.data.len() {
            return Err(Error::OutOfRange(format!(
                "upload of {} bytes at {} exceeds {} of {} bytes (dynamic: {})",
                data.len(),
                offset,
                buffer.kind.label(),
                buffer.data.len(),
                buffer.dynamic
            )));
        }
        buffer.data[start..end].copy_from_slice(data);
        Ok(())
    }

    fn read(&mut self, handle: GpuHandle, offset: u64, size: u64) -> Result<Vec<u8>> {
        let buffer = self.buffer_mut(handle)?;
        let start = offset as usize;
        let end = start + size as usize;
        if end > buffer.data.len() {
            return Err(Error::OutOfRange(format!(
                "read of {} bytes at {} exceeds {} bytes",
                size,
                offset,
                buffer.data.len()
            )));
        }
        Ok(buffer.data[start..end].to_vec())
    }

    fn buffer_count(&self) -> usize {
        self.buffers.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_upload_read() {
        let mut backend = HeadlessBackend::new();
        let handle = backend.create_buffer(BufferKind::Vertex, 8, false).unwrap();
        backend.upload(handle, 2, &[1, 2, 3], false).unwrap();
        assert_eq!(backend.read(handle, 0, 8).unwrap(), vec![0, 0, 1, 2, 3, 0, 0, 0]);
    }

    #[test]
    fn test_memory_budget() {
        let mut backend = HeadlessBackend::new().with_memory_budget(16);
        let first = backend.create_buffer(BufferKind::Index, 12, false).unwrap();
        assert!(backend.create_buffer(BufferKind::Index, 8, false).is_err());
        backend.release_buffer(first);
        assert!(backend.create_buffer(BufferKind::Index, 8, false).is_ok());
    }

    #[test]
    fn test_device_loss_drops_everything() {
        let mut backend = HeadlessBackend::new();
        let handle = backend.create_buffer(BufferKind::Vertex, 4, false).unwrap();
        backend.lose_device();
        assert!(backend.is_device_lost());
        assert_eq!(backend.buffer_count(), 0);
        assert!(matches!(backend.read(handle, 0, 4), Err(Error::DeviceLost(_))));
        assert!(backend.create_buffer(BufferKind::Vertex, 4, false).is_err());

        backend.restore_device().unwrap();
        // Old handles do not come back
        assert!(backend.read(handle, 0, 4).is_err());
        assert!(backend.create_buffer(BufferKind::Vertex, 4, false).is_ok());
    }

    #[test]
    fn test_out_of_range_upload() {
        let mut backend = HeadlessBackend::new();
        let handle = backend.create_buffer(BufferKind::Vertex, 4, true).unwrap();
        assert!(matches!(backend.upload(handle, 2, &[0; 4], false), Err(Error::OutOfRange(_))));
    }
}
