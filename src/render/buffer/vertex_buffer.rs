//! Vertex buffer with CPU shadow and device-loss recovery

use super::element::{self, VertexElement, VertexElementSemantic, VertexElementType};
use super::gpu_buffer::BufferStorage;
use crate::core::Result;
use crate::render::backend::{BufferKind, GpuHandle};
use crate::render::device::GraphicsDevice;

/// Interleaved vertex data described by a list of elements
#[derive(Debug)]
pub struct VertexBuffer {
    storage: BufferStorage,
    elements: Vec<VertexElement>,
    vertex_size: u32,
}

impl VertexBuffer {
    /// Create an empty, shadowed vertex buffer
    pub fn new(device: &GraphicsDevice) -> Self {
        Self {
            storage: BufferStorage::new(device.clone(), BufferKind::Vertex),
            elements: Vec::new(),
            vertex_size: 0,
        }
    }

    /// Allocate `vertex_count` vertices of the given layout. Existing data and locks are dropped.
    pub fn set_size(&mut self, vertex_count: u32, elements: &[VertexElement], dynamic: bool) -> Result<()> {
        let mut elements = elements.to_vec();
        self.vertex_size = element::update_offsets(&mut elements);
        self.elements = elements;
        self.storage.set_size(vertex_count, self.vertex_size, dynamic)
    }

    /// Allocate using a legacy element mask
    pub fn set_size_mask(&mut self, vertex_count: u32, element_mask: u32, dynamic: bool) -> Result<()> {
        self.set_size(vertex_count, &element::elements_from_mask(element_mask), dynamic)
    }

    pub fn vertex_count(&self) -> u32 {
        self.storage.count()
    }

    pub fn vertex_size(&self) -> u32 {
        self.vertex_size
    }

    pub fn elements(&self) -> &[VertexElement] {
        &self.elements
    }

    /// Legacy mask for the current layout
    pub fn element_mask(&self) -> u32 {
        element::mask_from_elements(&self.elements)
    }

    pub fn has_element(&self, ty: VertexElementType, semantic: VertexElementSemantic, index: u8) -> bool {
        element::find_element(&self.elements, ty, semantic, index).is_some()
    }

    /// Byte offset of an element inside a vertex
    pub fn element_offset(&self, ty: VertexElementType, semantic: VertexElementSemantic, index: u8) -> Option<u32> {
        element::find_element(&self.elements, ty, semantic, index).map(|e| e.offset)
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

    /// Shadow copy, if shadowing is enabled
    pub fn shadow_data(&self) -> Option<&[u8]> {
        self.storage.shadow_data()
    }

    pub fn gpu_handle(&self) -> Option<GpuHandle> {
        self.storage.handle()
    }

    pub fn is_data_pending(&self) -> bool {
        self.storage.is_data_pending()
    }

    /// True after a device reset when the content could not be restored
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

    /// Lock `count` vertices from `start` for writing
    pub fn lock(&mut self, start: u32, count: u32, discard: bool) -> Option<&mut [u8]> {
        self.storage.lock(start, count, discard)
    }

    pub fn unlock(&mut self) -> Result<()> {
        self.storage.unlock()
    }

    pub fn read(&self, start: u32, count: u32) -> Result<Vec<u8>> {
        self.storage.read(start, count)
    }

    /// Free GPU memory and shadow
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::buffer::element::mask;

    #[test]
    fn test_layout_from_mask() {
        let device = GraphicsDevice::headless();
        let mut vb = VertexBuffer::new(&device);
        vb.set_size_mask(3, mask::POSITION | mask::NORMAL | mask::TEXCOORD1, false).unwrap();
        assert_eq!(vb.vertex_size(), 32);
        assert_eq!(vb.element_mask(), mask::POSITION | mask::NORMAL | mask::TEXCOORD1);
        assert_eq!(
            vb.element_offset(VertexElementType::Vector2, VertexElementSemantic::TexCoord, 0),
            Some(24)
        );
        assert_eq!(vb.shadow_data().unwrap().len(), 96);
    }

    #[test]
    fn test_device_loss_during_set_data() {
        let device = GraphicsDevice::headless();
        let mut vb = VertexBuffer::new(&device);
        vb.set_size_mask(4, mask::POSITION, false).unwrap();

        let positions: Vec<f32> = (0..12).map(|i| i as f32).collect();
        let bytes: &[u8] = bytemuck::cast_slice(&positions);

        device.lose();
        vb.on_device_lost();
        vb.set_data(bytes).unwrap();
        assert!(vb.is_data_pending());
        assert!(vb.gpu_handle().is_none());

        device.reset().unwrap();
        vb.on_device_reset().unwrap();
        assert!(!vb.is_data_pending());
        assert!(!vb.is_data_lost());

        // Compare GPU content directly, bypassing the shadow
        let handle = vb.gpu_handle().unwrap();
        assert_eq!(device.read(handle, 0, bytes.len() as u64).unwrap(), bytes);
    }

    #[test]
    fn test_lock_writes_reach_gpu() {
        let device = GraphicsDevice::headless();
        let mut vb = VertexBuffer::new(&device);
        vb.set_size_mask(2, mask::OBJECT_INDEX, true).unwrap();
        vb.lock(1, 1, false).unwrap().copy_from_slice(&7i32.to_le_bytes());
        vb.unlock().unwrap();
        let handle = vb.gpu_handle().unwrap();
        assert_eq!(device.read(handle, 4, 4).unwrap(), 7i32.to_le_bytes());
    }
}
