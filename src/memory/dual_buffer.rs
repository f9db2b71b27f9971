//! Dual host/device memory buffer
//!
//! A [`DualBuffer`] is one logical allocation that can live on the
//! accelerator and in a host mirror at the same time. Synchronization between
//! the two copies is explicit: nothing is transferred unless the caller asks
//! for it.
//!
//! # Pointer validity
//!
//! Pointers from [`DualBuffer::device_ptr`] and [`DualBuffer::host_ptr`] stay
//! valid until the next `resize`, `destroy` or `swap`. Slices are tied to the
//! buffer borrow.
//!
//! # Example
//!
//! ```rust,ignore
//! let mut buf = DualBuffer::new()?;
//! buf.allocate(100)?;
//! buf.fill(0xAA)?;
//! buf.device_to_host()?;
//! assert_eq!(buf.host_slice()?[50], 0xAA);
//! ```

use std::panic::Location;
use std::sync::Arc;

use crate::backend::{global_backend, Backend, CopyKind, DevicePtr, MemorySpace, SENTINEL_BYTE};
use crate::error::{MemError, MemResult};
use crate::memory::{Allocation, MemoryKind, MemoryLike};

/// Extra bytes reserved past the logical end of every allocation.
///
/// Kernels that read a few bytes beyond the last element stay inside the
/// allocation. Never part of [`DualBuffer::size`].
pub const GUARD_BYTES: usize = 32;

fn misuse(err: MemError) -> MemError {
    tracing::warn!("{}", err);
    err
}

/// `size + GUARD_BYTES`, or `AllocationFailed` when that overflows
fn padded_size(size: usize, space: MemorySpace) -> MemResult<usize> {
    size.checked_add(GUARD_BYTES).ok_or_else(|| {
        tracing::error!("DualBuffer: {} byte request overflows guard padding", size);
        MemError::AllocationFailed { size, space }
    })
}

/// Device allocation plus lazily created host mirror
#[derive(Debug)]
pub struct DualBuffer {
    backend: Arc<Backend>,
    device: Option<Allocation>,
    host: Option<Allocation>,
    size: usize,
    host_synced: bool,
    ref_count: usize,
}

impl DualBuffer {
    /// Empty buffer on the process-wide backend
    pub fn new() -> MemResult<Self> {
        Ok(Self::with_backend(global_backend()?))
    }

    /// Empty buffer on an explicit backend
    pub fn with_backend(backend: Arc<Backend>) -> Self {
        DualBuffer {
            backend,
            device: None,
            host: None,
            size: 0,
            host_synced: false,
            ref_count: 0,
        }
    }

    pub fn backend(&self) -> &Arc<Backend> {
        &self.backend
    }

    /// Usable bytes
    pub fn size(&self) -> usize {
        self.size
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    /// Reserved bytes per allocation, guard included; 0 when unallocated
    pub fn capacity(&self) -> usize {
        self.device.as_ref().map(Allocation::capacity).unwrap_or(0)
    }

    pub fn has_device(&self) -> bool {
        self.device.is_some()
    }

    pub fn has_host(&self) -> bool {
        self.host.is_some()
    }

    /// True when the last full-range transfer left both copies equal
    pub fn is_host_synced(&self) -> bool {
        self.host_synced
    }

    pub fn memory_kind(&self) -> MemoryKind {
        MemoryKind::Dual(self.backend.kind())
    }

    fn alloc_device(&self, size: usize) -> MemResult<Allocation> {
        let padded = padded_size(size, MemorySpace::Device)?;
        let device = Allocation::new(self.backend.clone(), padded, MemorySpace::Device)?;
        if self.backend.sentinel_fill() {
            unsafe {
                self.backend
                    .driver()
                    .memset(device.ptr(), SENTINEL_BYTE, device.capacity())?;
            }
        }
        Ok(device)
    }

    fn alloc_host(&self, size: usize) -> MemResult<Allocation> {
        let padded = padded_size(size, MemorySpace::PinnedHost)?;
        Allocation::new(self.backend.clone(), padded, MemorySpace::PinnedHost)
    }

    fn ensure_host(&mut self) -> MemResult<()> {
        if self.host.is_none() && self.device.is_some() {
            tracing::debug!("DualBuffer: creating {} byte host mirror", self.size);
            self.host = Some(self.alloc_host(self.size)?);
        }
        Ok(())
    }

    #[track_caller]
    fn check_range(&self, start: usize, stop: usize, size: usize) -> MemResult<()> {
        if start > stop || stop > size {
            return Err(misuse(MemError::RangeOutOfBounds {
                start,
                stop,
                size,
                location: Location::caller(),
            }));
        }
        Ok(())
    }

    /// Reserve `size` bytes of device memory.
    ///
    /// Repeating the call with the current size does nothing. A different
    /// size on an allocated buffer is rejected with
    /// [`MemError::SizeMismatch`]; use [`DualBuffer::resize`] instead.
    #[track_caller]
    pub fn allocate(&mut self, size: usize) -> MemResult<()> {
        if self.device.is_some() {
            if size == self.size {
                return Ok(());
            }
            return Err(misuse(MemError::SizeMismatch {
                current: self.size,
                requested: size,
                location: Location::caller(),
            }));
        }
        if size == 0 {
            return Ok(());
        }

        self.device = Some(self.alloc_device(size)?);
        self.size = size;
        self.host_synced = false;
        Ok(())
    }

    /// Grow to `size` bytes, keeping the current contents.
    ///
    /// Shrinking is a no-op. On failure the buffer keeps its previous
    /// storage and contents. Raw pointers obtained earlier become invalid.
    #[track_caller]
    pub fn resize(&mut self, size: usize) -> MemResult<()> {
        let old_device = match &self.device {
            None => return self.allocate(size),
            Some(device) => device.ptr(),
        };
        if size <= self.size {
            return Ok(());
        }

        let driver = self.backend.driver();

        let new_device = self.alloc_device(size)?;
        unsafe {
            driver.memcpy(new_device.ptr(), old_device, self.size, CopyKind::DeviceToDevice)?;
        }

        let new_host = match &self.host {
            Some(host) => {
                let new_host = self.alloc_host(size)?;
                unsafe {
                    driver.memcpy(new_host.ptr(), host.ptr(), self.size, CopyKind::HostToHost)?;
                }
                Some(new_host)
            }
            None => None,
        };

        tracing::debug!("DualBuffer::resize: {} -> {} bytes", self.size, size);

        // Previous allocations are released when dropped here.
        self.device = Some(new_device);
        if new_host.is_some() {
            self.host = new_host;
        }
        self.size = size;
        self.host_synced = false;
        Ok(())
    }

    /// Release both allocations and reset the size to zero
    pub fn destroy(&mut self) -> MemResult<()> {
        let device = self.device.take();
        let host = self.host.take();
        self.size = 0;
        self.host_synced = false;

        let device_result = device.map(Allocation::release).unwrap_or(Ok(()));
        let host_result = host.map(Allocation::release).unwrap_or(Ok(()));
        device_result.and(host_result)
    }

    /// Push the whole host mirror to the device, if both exist
    pub fn flush(&mut self) -> MemResult<()> {
        if let (Some(device), Some(host)) = (&self.device, &self.host) {
            unsafe {
                self.backend.driver().memcpy(
                    device.ptr(),
                    host.ptr(),
                    self.size,
                    CopyKind::HostToDevice,
                )?;
            }
            self.host_synced = true;
        }
        Ok(())
    }

    /// Copy the whole device allocation into the host mirror
    #[track_caller]
    pub fn device_to_host(&mut self) -> MemResult<()> {
        self.device_to_host_range(0, self.size)
    }

    /// Copy device bytes `[start, stop)` into the host mirror
    #[track_caller]
    pub fn device_to_host_range(&mut self, start: usize, stop: usize) -> MemResult<()> {
        self.check_range(start, stop, self.size)?;
        self.ensure_host()?;

        if let (Some(device), Some(host)) = (&self.device, &self.host) {
            tracing::trace!("DualBuffer: device -> host [{}, {})", start, stop);
            unsafe {
                self.backend.driver().memcpy(
                    host.ptr().offset(start),
                    device.ptr().offset(start),
                    stop - start,
                    CopyKind::DeviceToHost,
                )?;
            }
            if start == 0 && stop == self.size {
                self.host_synced = true;
            }
        }
        Ok(())
    }

    /// Copy the whole host mirror to the device
    #[track_caller]
    pub fn host_to_device(&mut self) -> MemResult<()> {
        self.host_to_device_range(0, self.size)
    }

    /// Copy host bytes `[start, stop)` to the device
    #[track_caller]
    pub fn host_to_device_range(&mut self, start: usize, stop: usize) -> MemResult<()> {
        self.check_range(start, stop, self.size)?;
        self.ensure_host()?;

        if let (Some(device), Some(host)) = (&self.device, &self.host) {
            tracing::trace!("DualBuffer: host -> device [{}, {})", start, stop);
            unsafe {
                self.backend.driver().memcpy(
                    device.ptr().offset(start),
                    host.ptr().offset(start),
                    stop - start,
                    CopyKind::HostToDevice,
                )?;
            }
            if start == 0 && stop == self.size {
                self.host_synced = true;
            }
        }
        Ok(())
    }

    /// Copy `src` device bytes `[start, stop)` to this buffer's device
    /// memory at `dest_offset`, without going through the host.
    #[track_caller]
    pub fn device_to_device(
        &mut self,
        src: &DualBuffer,
        start: usize,
        stop: usize,
        dest_offset: usize,
    ) -> MemResult<()> {
        if src.backend.kind() != self.backend.kind() {
            return Err(misuse(MemError::BackendMismatch {
                source_kind: src.backend.kind(),
                dest_kind: self.backend.kind(),
                location: Location::caller(),
            }));
        }
        src.check_range(start, stop, src.size)?;
        let len = stop - start;
        let dest_stop = dest_offset.checked_add(len).unwrap_or(usize::MAX);
        self.check_range(dest_offset, dest_stop, self.size)?;

        if len == 0 {
            return Ok(());
        }

        if let (Some(dst), Some(src_device)) = (&self.device, &src.device) {
            tracing::trace!(
                "DualBuffer: device -> device [{}, {}) at offset {}",
                start,
                stop,
                dest_offset
            );
            unsafe {
                self.backend.driver().memcpy(
                    dst.ptr().offset(dest_offset),
                    src_device.ptr().offset(start),
                    len,
                    CopyKind::DeviceToDevice,
                )?;
            }
            self.host_synced = false;
        }
        Ok(())
    }

    /// Copy the contents of `other` into the start of this buffer.
    ///
    /// Fails with [`MemError::CapacityExceeded`] when `other` is larger,
    /// leaving this buffer untouched. Buffers on the same backend are copied
    /// device to device; anything else goes through the host mirror.
    #[track_caller]
    pub fn copy(&mut self, other: &mut dyn MemoryLike) -> MemResult<()> {
        let len = other.size();
        if len > self.size {
            return Err(misuse(MemError::CapacityExceeded {
                source_size: len,
                capacity: self.size,
                location: Location::caller(),
            }));
        }
        if len == 0 {
            return Ok(());
        }

        if other.memory_kind() == self.memory_kind() {
            if let Some(src) = other.as_dual_buffer() {
                return self.device_to_device(src, 0, len, 0);
            }
        }

        let bytes = other.host_bytes()?;
        self.ensure_host()?;
        if let Some(host) = self.host.as_mut() {
            host.as_mut_slice(len).copy_from_slice(&bytes[..len]);
        }
        self.host_to_device_range(0, len)
    }

    /// Set every usable byte of the device allocation, and of the host
    /// mirror if present, to `value`
    pub fn fill(&mut self, value: u8) -> MemResult<()> {
        let Some(device) = &self.device else {
            return Ok(());
        };
        unsafe {
            self.backend.driver().memset(device.ptr(), value, self.size)?;
        }
        if let Some(host) = self.host.as_mut() {
            host.as_mut_slice(self.size).fill(value);
            self.host_synced = true;
        }
        Ok(())
    }

    /// Exchange all state with `other`
    pub fn swap(&mut self, other: &mut DualBuffer) {
        std::mem::swap(self, other);
    }

    /// Host mirror contents, creating the mirror if needed.
    ///
    /// Does not pull from the device; call [`DualBuffer::device_to_host`]
    /// first when the device copy is newer.
    pub fn host_slice(&mut self) -> MemResult<&[u8]> {
        self.ensure_host()?;
        let size = self.size;
        Ok(self.host.as_ref().map(|h| h.as_slice(size)).unwrap_or(&[]))
    }

    /// Mutable host mirror contents, creating the mirror if needed
    pub fn host_slice_mut(&mut self) -> MemResult<&mut [u8]> {
        self.ensure_host()?;
        let size = self.size;
        Ok(match self.host.as_mut() {
            Some(host) => host.as_mut_slice(size),
            None => &mut [],
        })
    }

    /// Raw host mirror pointer, creating the mirror if needed; null when empty
    pub fn host_ptr(&mut self) -> MemResult<*mut u8> {
        self.ensure_host()?;
        Ok(self
            .host
            .as_ref()
            .map(|h| h.ptr().as_mut_ptr())
            .unwrap_or(std::ptr::null_mut()))
    }

    /// Raw device pointer; null when unallocated
    pub fn device_ptr(&self) -> DevicePtr {
        self.device
            .as_ref()
            .map(Allocation::ptr)
            .unwrap_or_else(DevicePtr::null)
    }

    pub fn inc_ref(&mut self) {
        self.ref_count += 1;
    }

    pub fn dec_ref(&mut self) {
        self.ref_count = self.ref_count.saturating_sub(1);
    }

    pub fn ref_count(&self) -> usize {
        self.ref_count
    }
}

impl MemoryLike for DualBuffer {
    fn memory_kind(&self) -> MemoryKind {
        DualBuffer::memory_kind(self)
    }

    fn size(&self) -> usize {
        self.size
    }

    /// Current host mirror; not synchronized from the device
    fn host_bytes(&mut self) -> MemResult<&[u8]> {
        self.host_slice()
    }

    fn as_dual_buffer(&self) -> Option<&DualBuffer> {
        Some(self)
    }
}
