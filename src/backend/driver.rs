//! Driver abstraction shared by every backend
//!
//! A [`Driver`] is the narrow set of runtime calls the buffers and contexts
//! need: raw allocation in a memory space, blocking copies, memset, streams,
//! events and device queries. The native HIP runtime and the CPU emulation
//! modes each provide one implementation.

use std::fmt;
use std::sync::Arc;

use crate::backend::BackendKind;
use crate::error::MemResult;

/// A raw pointer into device or host memory.
///
/// Stored as an address so it can cross threads; dereferencing is the
/// driver's business. A null pointer means "no allocation".
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub struct DevicePtr(usize);

impl DevicePtr {
    /// Create a null pointer
    pub const fn null() -> Self {
        DevicePtr(0)
    }

    /// Wrap a raw address
    pub fn from_raw(ptr: *mut u8) -> Self {
        DevicePtr(ptr as usize)
    }

    /// Check if this is a null pointer
    pub const fn is_null(self) -> bool {
        self.0 == 0
    }

    /// Raw address
    pub const fn addr(self) -> usize {
        self.0
    }

    /// Raw pointer for FFI calls and host access
    pub fn as_mut_ptr(self) -> *mut u8 {
        self.0 as *mut u8
    }

    /// Offset the pointer by a number of bytes
    pub const fn offset(self, bytes: usize) -> Self {
        DevicePtr(self.0 + bytes)
    }
}

/// Where a raw allocation lives
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MemorySpace {
    /// Accelerator-resident memory
    Device,
    /// Page-locked host memory reachable by the transfer engine
    PinnedHost,
}

impl fmt::Display for MemorySpace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MemorySpace::Device => write!(f, "device"),
            MemorySpace::PinnedHost => write!(f, "pinned host"),
        }
    }
}

/// Direction of a blocking copy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CopyKind {
    HostToHost,
    HostToDevice,
    DeviceToHost,
    DeviceToDevice,
}

/// Opaque stream handle. The default handle is the device's null stream.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub struct StreamHandle(pub(crate) usize);

impl StreamHandle {
    /// The implicit per-device stream
    pub const DEFAULT: StreamHandle = StreamHandle(0);

    /// True for the implicit per-device stream
    pub const fn is_default(self) -> bool {
        self.0 == 0
    }

    /// Raw handle value
    pub const fn as_raw(self) -> usize {
        self.0
    }
}

/// Opaque event handle
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct EventHandle(pub(crate) usize);

impl EventHandle {
    /// Raw handle value
    pub const fn as_raw(self) -> usize {
        self.0
    }
}

/// Capability snapshot of one device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceProps {
    pub name: String,
    pub total_global_mem: u64,
    pub multi_processor_count: i32,
    pub warp_size: i32,
    pub max_threads_per_block: i32,
    pub shared_mem_per_block: usize,
    /// Instruction-set version, `major * 10 + minor`
    pub isa_version: i32,
}

impl fmt::Display for DeviceProps {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} : {} MB global memory, {} compute units, warp size {}, \
             {} threads/block, {} KB shared/block, ISA {}.{}",
            self.name,
            self.total_global_mem / (1024 * 1024),
            self.multi_processor_count,
            self.warp_size,
            self.max_threads_per_block,
            self.shared_mem_per_block / 1024,
            self.isa_version / 10,
            self.isa_version % 10
        )
    }
}

/// Runtime calls every backend provides.
///
/// All calls block the calling thread until the operation has completed.
pub trait Driver: fmt::Debug + Send + Sync {
    /// Backend this driver implements
    fn kind(&self) -> BackendKind;

    /// Number of visible devices
    fn device_count(&self) -> MemResult<usize>;

    /// Make `ordinal` the current device of the calling thread
    fn set_device(&self, ordinal: usize) -> MemResult<()>;

    /// Current device of the calling thread
    fn current_device(&self) -> MemResult<usize>;

    /// Capability snapshot of `ordinal`
    fn device_props(&self, ordinal: usize) -> MemResult<DeviceProps>;

    /// Allocate `size` bytes in `space`. A zero size yields a null pointer.
    fn malloc(&self, size: usize, space: MemorySpace) -> MemResult<DevicePtr>;

    /// Release memory obtained from [`Driver::malloc`]. Null is a no-op.
    ///
    /// # Safety
    /// `ptr` must come from `malloc` on this driver with the same `space`
    /// and must not be used afterwards.
    unsafe fn free(&self, ptr: DevicePtr, space: MemorySpace) -> MemResult<()>;

    /// Copy `len` bytes from `src` to `dst`.
    ///
    /// # Safety
    /// Both ranges must lie inside live allocations of the kinds named by `kind`.
    unsafe fn memcpy(
        &self,
        dst: DevicePtr,
        src: DevicePtr,
        len: usize,
        kind: CopyKind,
    ) -> MemResult<()>;

    /// Set `len` bytes at `dst` (device memory) to `value`.
    ///
    /// # Safety
    /// The range must lie inside a live device allocation.
    unsafe fn memset(&self, dst: DevicePtr, value: u8, len: usize) -> MemResult<()>;

    fn stream_create(&self) -> MemResult<StreamHandle>;

    fn stream_destroy(&self, stream: StreamHandle) -> MemResult<()>;

    /// Wait for all work issued on `stream`
    fn stream_synchronize(&self, stream: StreamHandle) -> MemResult<()>;

    /// Wait for all work on the current device
    fn device_synchronize(&self) -> MemResult<()>;

    fn event_create(&self) -> MemResult<EventHandle>;

    fn event_destroy(&self, event: EventHandle) -> MemResult<()>;

    fn event_record(&self, event: EventHandle, stream: StreamHandle) -> MemResult<()>;

    fn event_synchronize(&self, event: EventHandle) -> MemResult<()>;

    /// Milliseconds between two recorded events
    fn event_elapsed_ms(&self, start: EventHandle, end: EventHandle) -> MemResult<f32>;
}

/// Shared drivers, so callers can keep a handle for inspection
impl<D: Driver + ?Sized> Driver for Arc<D> {
    fn kind(&self) -> BackendKind {
        (**self).kind()
    }

    fn device_count(&self) -> MemResult<usize> {
        (**self).device_count()
    }

    fn set_device(&self, ordinal: usize) -> MemResult<()> {
        (**self).set_device(ordinal)
    }

    fn current_device(&self) -> MemResult<usize> {
        (**self).current_device()
    }

    fn device_props(&self, ordinal: usize) -> MemResult<DeviceProps> {
        (**self).device_props(ordinal)
    }

    fn malloc(&self, size: usize, space: MemorySpace) -> MemResult<DevicePtr> {
        (**self).malloc(size, space)
    }

    unsafe fn free(&self, ptr: DevicePtr, space: MemorySpace) -> MemResult<()> {
        (**self).free(ptr, space)
    }

    unsafe fn memcpy(
        &self,
        dst: DevicePtr,
        src: DevicePtr,
        len: usize,
        kind: CopyKind,
    ) -> MemResult<()> {
        (**self).memcpy(dst, src, len, kind)
    }

    unsafe fn memset(&self, dst: DevicePtr, value: u8, len: usize) -> MemResult<()> {
        (**self).memset(dst, value, len)
    }

    fn stream_create(&self) -> MemResult<StreamHandle> {
        (**self).stream_create()
    }

    fn stream_destroy(&self, stream: StreamHandle) -> MemResult<()> {
        (**self).stream_destroy(stream)
    }

    fn stream_synchronize(&self, stream: StreamHandle) -> MemResult<()> {
        (**self).stream_synchronize(stream)
    }

    fn device_synchronize(&self) -> MemResult<()> {
        (**self).device_synchronize()
    }

    fn event_create(&self) -> MemResult<EventHandle> {
        (**self).event_create()
    }

    fn event_destroy(&self, event: EventHandle) -> MemResult<()> {
        (**self).event_destroy(event)
    }

    fn event_record(&self, event: EventHandle, stream: StreamHandle) -> MemResult<()> {
        (**self).event_record(event, stream)
    }

    fn event_synchronize(&self, event: EventHandle) -> MemResult<()> {
        (**self).event_synchronize(event)
    }

    fn event_elapsed_ms(&self, start: EventHandle, end: EventHandle) -> MemResult<f32> {
        (**self).event_elapsed_ms(start, end)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_ptr() {
        let ptr = DevicePtr::null();
        assert!(ptr.is_null());
        assert_eq!(ptr.addr(), 0);

        let mut byte = 0u8;
        let ptr = DevicePtr::from_raw(&mut byte as *mut u8);
        assert!(!ptr.is_null());
        assert_eq!(ptr.offset(16).addr(), ptr.addr() + 16);
    }

    #[test]
    fn test_default_stream() {
        assert!(StreamHandle::DEFAULT.is_default());
        assert!(StreamHandle::default().is_default());
        assert!(!StreamHandle(7).is_default());
    }

    #[test]
    fn test_props_display() {
        let props = DeviceProps {
            name: "gfx1100".to_string(),
            total_global_mem: 20 * 1024 * 1024 * 1024,
            multi_processor_count: 84,
            warp_size: 32,
            max_threads_per_block: 1024,
            shared_mem_per_block: 65536,
            isa_version: 110,
        };
        let text = props.to_string();
        assert!(text.contains("gfx1100"));
        assert!(text.contains("20480 MB"));
        assert!(text.contains("ISA 11.0"));
    }
}
