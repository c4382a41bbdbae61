//! Shadow/GPU storage shared by vertex and index buffers

use crate::core::error::Error;
use crate::core::Result;
use crate::render::backend::{BufferKind, GpuHandle};
use crate::render::device::GraphicsDevice;

/// Outstanding lock on a buffer
#[derive(Debug)]
enum LockState {
    None,
    /// Caller writes straight into the shadow copy
    Shadow { start: u32, count: u32, discard: bool },
    /// Caller writes into a pooled scratch buffer (unshadowed buffers)
    Scratch { start: u32, count: u32, discard: bool, data: Vec<u8> },
}

/// Write issued while the device was lost, kept for unshadowed buffers only
#[derive(Debug)]
struct PendingWrite {
    offset: usize,
    data: Vec<u8>,
}

/// Element-addressed byte storage with an optional CPU shadow and a GPU handle.
///
/// The shadow, when present, is the source of truth for reads. Writes made
/// while the device is lost land in the shadow (or a replay queue) and are
/// uploaded again on `on_device_reset`.
#[derive(Debug)]
pub(crate) struct BufferStorage {
    device: GraphicsDevice,
    kind: BufferKind,
    count: u32,
    stride: u32,
    dynamic: bool,
    shadowed: bool,
    shadow: Vec<u8>,
    handle: Option<GpuHandle>,
    lock: LockState,
    pending: Vec<PendingWrite>,
    data_pending: bool,
    data_lost: bool,
}

impl BufferStorage {
    pub fn new(device: GraphicsDevice, kind: BufferKind) -> Self {
        Self {
            device,
            kind,
            count: 0,
            stride: 0,
            dynamic: false,
            shadowed: true,
            shadow: Vec::new(),
            handle: None,
            lock: LockState::None,
            pending: Vec::new(),
            data_pending: false,
            data_lost: false,
        }
    }

    pub fn device(&self) -> &GraphicsDevice {
        &self.device
    }

    pub fn count(&self) -> u32 {
        self.count
    }

    pub fn stride(&self) -> u32 {
        self.stride
    }

    pub fn size_bytes(&self) -> usize {
        self.count as usize * self.stride as usize
    }

    pub fn is_dynamic(&self) -> bool {
        self.dynamic
    }

    pub fn is_shadowed(&self) -> bool {
        self.shadowed
    }

    pub fn is_locked(&self) -> bool {
        !matches!(self.lock, LockState::None)
    }

    pub fn is_data_pending(&self) -> bool {
        self.data_pending
    }

    pub fn is_data_lost(&self) -> bool {
        self.data_lost
    }

    pub fn clear_data_lost(&mut self) {
        self.data_lost = false;
    }

    pub fn handle(&self) -> Option<GpuHandle> {
        self.handle
    }

    pub fn shadow_data(&self) -> Option<&[u8]> {
        if self.shadowed { Some(&self.shadow) } else { None }
    }

    /// Enable or disable the CPU shadow; refused while locked
    pub fn set_shadowed(&mut self, enable: bool) -> Result<()> {
        if enable == self.shadowed {
            return Ok(());
        }
        if self.is_locked() {
            log::error!("Cannot change shadowing of a locked {}", self.kind.label());
            return Err(Error::Buffer("buffer is locked".into()));
        }
        self.shadowed = enable;
        self.shadow = if enable { vec![0; self.size_bytes()] } else { Vec::new() };
        Ok(())
    }

    /// Reallocate for `count` elements of `stride` bytes, dropping any lock and content
    pub fn set_size(&mut self, count: u32, stride: u32, dynamic: bool) -> Result<()> {
        self.invalidate_lock();
        self.release_gpu();

        self.count = count;
        self.stride = stride;
        self.dynamic = dynamic;
        self.pending.clear();
        self.data_pending = false;
        self.data_lost = false;
        self.shadow = if self.shadowed { vec![0; self.size_bytes()] } else { Vec::new() };

        self.create()
    }

    fn create(&mut self) -> Result<()> {
        if self.size_bytes() == 0 {
            return Ok(());
        }
        if self.device.is_lost() {
            log::debug!("Deferring creation of {} until device reset", self.kind.label());
            return Ok(());
        }

        match self.device.create_buffer(self.kind, self.size_bytes() as u64, self.dynamic) {
            Ok(handle) => {
                log::debug!(
                    "Created {} {:?}: {} x {} bytes{}",
                    self.kind.label(),
                    handle,
                    self.count,
                    self.stride,
                    if self.dynamic { " (dynamic)" } else { "" }
                );
                self.handle = Some(handle);
                Ok(())
            }
            Err(e) => {
                log::error!("Failed to create {}: {}", self.kind.label(), e);
                Err(e)
            }
        }
    }

    fn release_gpu(&mut self) {
        if let Some(handle) = self.handle.take() {
            self.device.release_buffer(handle);
        }
    }

    fn invalidate_lock(&mut self) {
        if let LockState::Scratch { data, .. } = std::mem::replace(&mut self.lock, LockState::None) {
            self.device.free_scratch(data);
        }
    }

    /// Release GPU memory and shadow, becoming empty
    pub fn release(&mut self) {
        self.invalidate_lock();
        self.release_gpu();
        self.count = 0;
        self.shadow.clear();
        self.pending.clear();
        self.data_pending = false;
    }

    fn byte_range(&self, start: u32, count: u32) -> Result<std::ops::Range<usize>> {
        if start as u64 + count as u64 > self.count as u64 {
            log::error!(
                "Illegal range {}..{} for {} of {} elements",
                start,
                start as u64 + count as u64,
                self.kind.label(),
                self.count
            );
            return Err(Error::OutOfRange(format!(
                "range {}+{} exceeds {} elements",
                start, count, self.count
            )));
        }
        let stride = self.stride as usize;
        Ok(start as usize * stride..(start + count) as usize * stride)
    }

    /// Upload now if possible; Ok(false) when the device is lost or the GPU buffer is missing
    fn try_upload(&self, offset: usize, data: &[u8], discard: bool) -> Result<bool> {
        let Some(handle) = self.handle else {
            return Ok(false);
        };
        if self.device.is_lost() {
            return Ok(false);
        }
        match self.device.upload(handle, offset as u64, data, discard) {
            Ok(()) => Ok(true),
            Err(Error::DeviceLost(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    fn defer(&mut self, write: Option<PendingWrite>) {
        log::warn!("{} updated while device is lost, upload deferred", self.kind.label());
        self.data_pending = true;
        if let Some(write) = write {
            // A full write supersedes everything queued before it
            if write.offset == 0 && write.data.len() == self.size_bytes() {
                self.pending.clear();
            }
            self.pending.push(write);
        }
    }

    /// Replace the whole content
    pub fn set_data(&mut self, data: &[u8]) -> Result<()> {
        if data.len() != self.size_bytes() {
            return Err(Error::InvalidArgument(format!(
                "{} data is {} bytes, expected {}",
                self.kind.label(),
                data.len(),
                self.size_bytes()
            )));
        }
        self.set_data_range(data, 0, self.count, true)
    }

    /// Replace `count` elements starting at `start`
    pub fn set_data_range(&mut self, data: &[u8], start: u32, count: u32, discard: bool) -> Result<()> {
        if count == 0 {
            return Ok(());
        }
        let range = self.byte_range(start, count)?;
        if data.len() != range.len() {
            return Err(Error::InvalidArgument(format!(
                "{} data is {} bytes, expected {}",
                self.kind.label(),
                data.len(),
                range.len()
            )));
        }

        if self.shadowed {
            self.shadow[range.clone()].copy_from_slice(data);
            if !self.try_upload(range.start, &self.shadow[range.clone()], discard)? {
                self.defer(None);
            }
        } else if !self.try_upload(range.start, data, discard)? {
            self.defer(Some(PendingWrite { offset: range.start, data: data.to_vec() }));
        }
        Ok(())
    }

    /// Open a writable window; None if already locked or the range is illegal
    pub fn lock(&mut self, start: u32, count: u32, discard: bool) -> Option<&mut [u8]> {
        if self.is_locked() {
            log::error!("{} already locked", self.kind.label());
            return None;
        }
        if count == 0 {
            log::error!("Cannot lock zero elements of {}", self.kind.label());
            return None;
        }
        let range = self.byte_range(start, count).ok()?;

        if self.shadowed {
            self.lock = LockState::Shadow { start, count, discard };
            Some(&mut self.shadow[range])
        } else {
            let data = self.device.reserve_scratch(range.len());
            self.lock = LockState::Scratch { start, count, discard, data };
            match &mut self.lock {
                LockState::Scratch { data, .. } => Some(data.as_mut_slice()),
                _ => None,
            }
        }
    }

    /// Commit the locked window to the GPU
    pub fn unlock(&mut self) -> Result<()> {
        match std::mem::replace(&mut self.lock, LockState::None) {
            LockState::None => Ok(()),
            LockState::Shadow { start, count, discard } => {
                let range = self.byte_range(start, count)?;
                if !self.try_upload(range.start, &self.shadow[range.clone()], discard)? {
                    self.defer(None);
                }
                Ok(())
            }
            LockState::Scratch { start, count, discard, data } => {
                let result = self.set_data_range(&data, start, count, discard);
                self.device.free_scratch(data);
                result
            }
        }
    }

    /// Read `count` elements from `start`.
    ///
    /// Unshadowed buffers read back from the GPU and fail while the device is lost.
    pub fn read(&self, start: u32, count: u32) -> Result<Vec<u8>> {
        let range = self.byte_range(start, count)?;
        if self.shadowed {
            return Ok(self.shadow[range].to_vec());
        }
        if range.is_empty() {
            return Ok(Vec::new());
        }
        match self.handle {
            Some(handle) if !self.device.is_lost() => {
                self.device.read(handle, range.start as u64, range.len() as u64)
            }
            _ => Err(Error::DeviceLost(format!(
                "{} has no shadow data and no GPU buffer to read from",
                self.kind.label()
            ))),
        }
    }

    /// The backend dropped all resources; forget our handle
    pub fn on_device_lost(&mut self) {
        self.handle = None;
    }

    /// Recreate the GPU buffer and restore its content
    pub fn on_device_reset(&mut self) -> Result<()> {
        if self.size_bytes() == 0 {
            self.data_pending = false;
            return Ok(());
        }
        if self.handle.is_none() {
            self.create()?;
        }
        let Some(handle) = self.handle else {
            return Err(Error::DeviceLost(format!("{} recreated while device is lost", self.kind.label())));
        };

        if self.shadowed {
            self.device.upload(handle, 0, &self.shadow, true)?;
            self.data_lost = false;
        } else {
            let size = self.size_bytes();
            let pending = std::mem::take(&mut self.pending);
            let complete = pending.iter().any(|w| w.offset == 0 && w.data.len() == size);
            for write in &pending {
                self.device.upload(handle, write.offset as u64, &write.data, false)?;
            }
            self.data_lost = !complete;
            if self.data_lost {
                log::warn!("{} content lost on device reset", self.kind.label());
            }
        }
        self.data_pending = false;
        Ok(())
    }
}

impl Drop for BufferStorage {
    fn drop(&mut self) {
        self.invalidate_lock();
        self.release_gpu();
    }
}
