//! Backend over a real `wgpu` device

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use super::{BufferKind, GpuBackend, GpuHandle};
use crate::core::error::Error;
use crate::core::Result;

/// wgpu requires copy offsets and sizes to be multiples of this
const COPY_ALIGN: u64 = wgpu::COPY_BUFFER_ALIGNMENT;

fn align_down(value: u64) -> u64 {
    value & !(COPY_ALIGN - 1)
}

fn align_up(value: u64) -> u64 {
    (value + COPY_ALIGN - 1) & !(COPY_ALIGN - 1)
}

/// GPU backend owning a headless `wgpu` device and queue
pub struct WgpuBackend {
    adapter: wgpu::Adapter,
    device: wgpu::Device,
    queue: wgpu::Queue,
    buffers: HashMap<GpuHandle, wgpu::Buffer>,
    next_handle: u64,
    /// Set from the device-lost callback, possibly on another thread
    lost: Arc<AtomicBool>,
}

impl WgpuBackend {
    /// Create a backend on the best available adapter, blocking until ready
    pub fn new() -> Result<Self> {
        pollster::block_on(Self::new_async())
    }

    /// Create a backend on the best available adapter
    pub async fn new_async() -> Result<Self> {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::PRIMARY,
            ..Default::default()
        });

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: None,
                force_fallback_adapter: false,
            })
            .await
            .map_err(|e| Error::Gpu(format!("No suitable adapter found: {:?}", e)))?;

        let lost = Arc::new(AtomicBool::new(false));
        let (device, queue) = Self::request_device(&adapter, &lost).await?;

        log::info!("wgpu backend on {:?}", adapter.get_info().name);

        Ok(Self {
            adapter,
            device,
            queue,
            buffers: HashMap::new(),
            next_handle: 1,
            lost,
        })
    }

    async fn request_device(
        adapter: &wgpu::Adapter,
        lost: &Arc<AtomicBool>,
    ) -> Result<(wgpu::Device, wgpu::Queue)> {
        let device_desc = wgpu::DeviceDescriptor {
            label: Some("terrace_device"),
            required_features: wgpu::Features::empty(),
            required_limits: wgpu::Limits::default(),
            memory_hints: wgpu::MemoryHints::Performance,
            experimental_features: Default::default(),
            trace: Default::default(),
        };

        let (device, queue) = adapter
            .request_device(&device_desc)
            .await
            .map_err(|e| Error::Gpu(e.to_string()))?;

        let flag = Arc::clone(lost);
        device.set_device_lost_callback(move |reason, message| {
            log::warn!("wgpu device lost ({:?}): {}", reason, message);
            flag.store(true, Ordering::Release);
        });

        Ok((device, queue))
    }

    /// Underlying device, for renderers that bind these buffers
    pub fn device(&self) -> &wgpu::Device {
        &self.device
    }

    /// Raw buffer for a handle
    pub fn buffer(&self, handle: GpuHandle) -> Option<&wgpu::Buffer> {
        self.buffers.get(&handle)
    }

    fn get(&self, handle: GpuHandle) -> Result<&wgpu::Buffer> {
        if self.is_device_lost() {
            return Err(Error::DeviceLost("wgpu device is lost".into()));
        }
        self.buffers
            .get(&handle)
            .ok_or_else(|| Error::Buffer(format!("unknown buffer handle {:?}", handle)))
    }

    /// Copy an aligned window of a buffer into host memory
    fn read_aligned(&self, buffer: &wgpu::Buffer, offset: u64, size: u64) -> Result<Vec<u8>> {
        let staging = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("terrace_readback"),
            size,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let mut encoder = self.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("terrace_readback_encoder"),
        });
        encoder.copy_buffer_to_buffer(buffer, offset, &staging, 0, size);
        self.queue.submit(Some(encoder.finish()));

        let slice = staging.slice(..);
        let (tx, rx) = std::sync::mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = tx.send(result);
        });
        let _ = self.device.poll(wgpu::PollType::Wait { submission_index: None, timeout: None });

        match rx.recv() {
            Ok(Ok(())) => {
                let data = slice.get_mapped_range().to_vec();
                staging.unmap();
                Ok(data)
            }
            Ok(Err(e)) => Err(Error::Gpu(format!("buffer map failed: {}", e))),
            Err(_) => Err(Error::Gpu("buffer map callback dropped".into())),
        }
    }
}

impl GpuBackend for WgpuBackend {
    fn name(&self) -> &'static str {
        "wgpu"
    }

    fn is_device_lost(&self) -> bool {
        self.lost.load(Ordering::Acquire)
    }

    fn lose_device(&mut self) {
        self.buffers.clear();
        self.device.destroy();
        self.lost.store(true, Ordering::Release);
    }

    fn restore_device(&mut self) -> Result<()> {
        if !self.is_device_lost() {
            return Ok(());
        }
        let (device, queue) = pollster::block_on(Self::request_device(&self.adapter, &self.lost))?;
        self.device = device;
        self.queue = queue;
        self.buffers.clear();
        self.lost.store(false, Ordering::Release);
        log::info!("wgpu device restored");
        Ok(())
    }

    fn create_buffer(&mut self, kind: BufferKind, size: u64, dynamic: bool) -> Result<GpuHandle> {
        if self.is_device_lost() {
            return Err(Error::DeviceLost(format!("cannot create {} while device is lost", kind.label())));
        }
        let usage = match kind {
            BufferKind::Vertex => wgpu::BufferUsages::VERTEX,
            BufferKind::Index => wgpu::BufferUsages::INDEX,
        } | wgpu::BufferUsages::COPY_DST
            | wgpu::BufferUsages::COPY_SRC;

        let buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(if dynamic { "terrace_dynamic_buffer" } else { "terrace_buffer" }),
            size: align_up(size),
            usage,
            mapped_at_creation: false,
        });

        let handle = GpuHandle(self.next_handle);
        self.next_handle += 1;
        self.buffers.insert(handle, buffer);
        Ok(handle)
    }

    fn release_buffer(&mut self, handle: GpuHandle) {
        if let Some(buffer) = self.buffers.remove(&handle) {
            buffer.destroy();
        }
    }

    fn upload(&mut self, handle: GpuHandle, offset: u64, data: &[u8], _discard: bool) -> Result<()> {
        let buffer = self.get(handle)?;
        let end = offset + data.len() as u64;
        if end > buffer.size() {
            return Err(Error::OutOfRange(format!(
                "upload of {} bytes at {} exceeds buffer of {} bytes",
                data.len(),
                offset,
                buffer.size()
            )));
        }

        let start = align_down(offset);
        let aligned_end = align_up(end);
        if start == offset && aligned_end == end {
            self.queue.write_buffer(buffer, offset, data);
            return Ok(());
        }

        // Unaligned write (e.g. an odd number of 16-bit indices): merge with current contents
        let mut window = self.read_aligned(buffer, start, aligned_end - start)?;
        let at = (offset - start) as usize;
        window[at..at + data.len()].copy_from_slice(data);
        self.queue.write_buffer(buffer, start, &window);
        Ok(())
    }

    fn read(&mut self, handle: GpuHandle, offset: u64, size: u64) -> Result<Vec<u8>> {
        let buffer = self.get(handle)?;
        let start = align_down(offset);
        let end = align_up(offset + size);
        if end > buffer.size() {
            return Err(Error::OutOfRange(format!(
                "read of {} bytes at {} exceeds buffer of {} bytes",
                size,
                offset,
                buffer.size()
            )));
        }
        let window = self.read_aligned(buffer, start, end - start)?;
        let at = (offset - start) as usize;
        Ok(window[at..at + size as usize].to_vec())
    }

    fn buffer_count(&self) -> usize {
        self.buffers.len()
    }
}
