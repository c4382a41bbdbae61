//! Index buffer with 16 or 32 bit indices

use super::gpu_buffer::BufferStorage;
use crate::core::error::Error;
use crate::core::Result;
use crate::render::backend::{BufferKind, GpuHandle};
use crate::render::device::GraphicsDevice;

/// Triangle/line/point indices into a vertex buffer
#[derive(Debug)]
pub struct IndexBuffer {
    storage: BufferStorage,
}

impl IndexBuffer {
    /// Create an empty, shadowed index buffer
    pub fn new(device: &GraphicsDevice) -> Self {
        Self {
            storage: BufferStorage::new(device.clone(), BufferKind::Index),
        }
    }

    /// Allocate `index_count` indices, 4 bytes each if `large_indices`, else 2
    pub fn set_size(&mut self, index_count: u32, large_indices: bool, dynamic: bool) -> Result<()> {
        self.storage.set_size(index_count, if large_indices { 4 } else { 2 }, dynamic)
    }

    pub fn index_count(&self) -> u32 {
        self.storage.count()
    }

    /// 2 or 4 (0 before the first `set_size`)
    pub fn index_size(&self) -> u32 {
        self.storage.stride()
    }

    pub fn is_dynamic(&self) -> bool {
        self.storage.is_dynamic()
    }

    pub fn is_shadowed(&self) -> bool {
        self.storage.is_shadowed()
    }

    pub fn set_shadowed(&mut self, enable: bool) -> Result<()> {
        self.storage.set_shadowed(enable)
    }

    pub fn is_locked(&self) -> bool {
        self.storage.is_locked()
    }

    pub fn shadow_data(&self) -> Option<&[u8]> {
        self.storage.shadow_data()
    }

    pub fn gpu_handle(&self) -> Option<GpuHandle> {
        self.storage.handle()
    }

    pub fn is_data_pending(&self) -> bool {
        self.storage.is_data_pending()
    }

    pub fn is_data_lost(&self) -> bool {
        self.storage.is_data_lost()
    }

    pub fn clear_data_lost(&mut self) {
        self.storage.clear_data_lost();
    }

    pub fn set_data(&mut self, data: &[u8]) -> Result<()> {
        self.storage.set_data(data)
    }

    pub fn set_data_range(&mut self, data: &[u8], start: u32, count: u32, discard: bool) -> Result<()> {
        self.storage.set_data_range(data, start, count, discard)
    }

    /// Lock `count` indices from `start` for writing
    pub fn lock(&mut self, start: u32, count: u32, discard: bool) -> Option<&mut [u8]> {
        self.storage.lock(start, count, discard)
    }

    pub fn unlock(&mut self) -> Result<()> {
        self.storage.unlock()
    }

    pub fn read(&self, start: u32, count: u32) -> Result<Vec<u8>> {
        self.storage.read(start, count)
    }

    /// Index value at `i` from the shadow copy
    pub fn index(&self, i: u32) -> Option<u32> {
        let data = self.shadow_data()?;
        read_index(data, self.index_size(), i as usize)
    }

    /// Smallest vertex referenced in `[start, start + count)` and the number of
    /// vertices up to and including the largest one.
    ///
    /// Needs shadow data. An empty range yields `(0, 0)`.
    pub fn used_vertex_range(&self, start: u32, count: u32) -> Result<(u32, u32)> {
        let Some(data) = self.shadow_data() else {
            log::error!("Used vertex range can only be queried from an index buffer with shadow data");
            return Err(Error::Buffer("index buffer has no shadow data".into()));
        };
        if start as u64 + count as u64 > self.index_count() as u64 {
            log::error!("Illegal index range {}+{} for querying used vertices", start, count);
            return Err(Error::OutOfRange(format!(
                "index range {}+{} exceeds {} indices",
                start,
                count,
                self.index_count()
            )));
        }
        if count == 0 {
            return Ok((0, 0));
        }

        let size = self.index_size();
        let mut min_vertex = u32::MAX;
        let mut max_vertex = 0;
        for i in start as usize..(start + count) as usize {
            let index = read_index(data, size, i).unwrap_or(0);
            min_vertex = min_vertex.min(index);
            max_vertex = max_vertex.max(index);
        }
        Ok((min_vertex, max_vertex + 1 - min_vertex))
    }

    pub fn release(&mut self) {
        self.storage.release();
    }

    pub fn on_device_lost(&mut self) {
        self.storage.on_device_lost();
    }

    pub fn on_device_reset(&mut self) -> Result<()> {
        self.storage.on_device_reset()
    }
}

/// Little-endian index `i` from raw index bytes
pub fn read_index(data: &[u8], index_size: u32, i: usize) -> Option<u32> {
    match index_size {
        2 => {
            let b = data.get(i * 2..i * 2 + 2)?;
            Some(u16::from_le_bytes([b[0], b[1]]) as u32)
        }
        4 => {
            let b = data.get(i * 4..i * 4 + 4)?;
            Some(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        }
        _ => None,
    }
}
