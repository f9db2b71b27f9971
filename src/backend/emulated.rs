//! CPU emulation driver
//!
//! Serves both emulation backends. "Device" memory is ordinary heap memory,
//! so every copy direction is a plain `memmove`. Streams complete work
//! synchronously and events are host timestamps.

use std::alloc::{self, Layout};
use std::collections::HashMap;
use std::ptr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Instant;

use crate::backend::driver::{
    CopyKind, DeviceProps, DevicePtr, Driver, EventHandle, MemorySpace, StreamHandle,
};
use crate::backend::BackendKind;
use crate::error::{MemError, MemResult};

/// Alignment of every emulated allocation, matching the native allocator
const ALLOC_ALIGN: usize = 256;

/// ISA version the emulation reports to callers that select code paths by it
pub const EMULATED_ISA_VERSION: i32 = 60;

#[derive(Debug)]
struct Block {
    layout: Layout,
    space: MemorySpace,
}

/// Driver for the CPU emulation backends
#[derive(Debug)]
pub struct EmulatedDriver {
    kind: BackendKind,
    devices: usize,
    workers: usize,
    current: AtomicUsize,
    next_handle: AtomicUsize,
    blocks: Mutex<HashMap<usize, Block>>,
    events: Mutex<HashMap<usize, Option<Instant>>>,
}

impl EmulatedDriver {
    /// Create a driver reporting `devices` devices backed by `workers` lanes
    pub fn new(kind: BackendKind, devices: usize, workers: usize) -> Self {
        EmulatedDriver {
            kind,
            devices,
            workers,
            current: AtomicUsize::new(0),
            next_handle: AtomicUsize::new(1),
            blocks: Mutex::new(HashMap::new()),
            events: Mutex::new(HashMap::new()),
        }
    }

    /// Number of allocations not yet freed
    pub fn live_allocations(&self) -> usize {
        self.blocks.lock().map(|blocks| blocks.len()).unwrap_or(0)
    }

    /// Total bytes held by live allocations
    pub fn live_bytes(&self) -> usize {
        self.blocks
            .lock()
            .map(|blocks| blocks.values().map(|b| b.layout.size()).sum())
            .unwrap_or(0)
    }

    fn handle(&self) -> usize {
        self.next_handle.fetch_add(1, Ordering::Relaxed)
    }

    fn check_ordinal(&self, ordinal: usize) -> MemResult<()> {
        if self.devices == 0 {
            return Err(MemError::NoDevice(self.kind));
        }
        if ordinal >= self.devices {
            return Err(MemError::driver(
                "set_device",
                101,
                format!("invalid device ordinal {} of {}", ordinal, self.devices),
            ));
        }
        Ok(())
    }
}

impl Driver for EmulatedDriver {
    fn kind(&self) -> BackendKind {
        self.kind
    }

    fn device_count(&self) -> MemResult<usize> {
        Ok(self.devices)
    }

    fn set_device(&self, ordinal: usize) -> MemResult<()> {
        self.check_ordinal(ordinal)?;
        self.current.store(ordinal, Ordering::Relaxed);
        Ok(())
    }

    fn current_device(&self) -> MemResult<usize> {
        Ok(self.current.load(Ordering::Relaxed))
    }

    fn device_props(&self, ordinal: usize) -> MemResult<DeviceProps> {
        self.check_ordinal(ordinal)?;
        Ok(DeviceProps {
            name: format!("memforge {} emulator #{}", self.kind, ordinal),
            total_global_mem: 0,
            multi_processor_count: self.workers as i32,
            warp_size: 32,
            max_threads_per_block: 1024,
            shared_mem_per_block: 48 * 1024,
            isa_version: EMULATED_ISA_VERSION,
        })
    }

    fn malloc(&self, size: usize, space: MemorySpace) -> MemResult<DevicePtr> {
        if size == 0 {
            return Ok(DevicePtr::null());
        }

        let layout = Layout::from_size_align(size, ALLOC_ALIGN)
            .map_err(|_| MemError::AllocationFailed { size, space })?;
        let raw = unsafe { alloc::alloc_zeroed(layout) };
        if raw.is_null() {
            tracing::error!("EmulatedDriver::malloc: {} bytes of {} memory failed", size, space);
            return Err(MemError::AllocationFailed { size, space });
        }

        self.blocks
            .lock()?
            .insert(raw as usize, Block { layout, space });
        tracing::trace!("EmulatedDriver::malloc: {} bytes of {} memory at {:?}", size, space, raw);
        Ok(DevicePtr::from_raw(raw))
    }

    unsafe fn free(&self, ptr: DevicePtr, space: MemorySpace) -> MemResult<()> {
        if ptr.is_null() {
            return Ok(());
        }

        let mut blocks = self.blocks.lock()?;
        match blocks.get(&ptr.addr()).map(|block| block.space) {
            None => {
                return Err(MemError::driver(
                    "free",
                    1,
                    format!("{:?} is not a live allocation", ptr),
                ))
            }
            Some(allocated) if allocated != space => {
                return Err(MemError::driver(
                    "free",
                    1,
                    format!("{:?} was allocated as {} memory, not {}", ptr, allocated, space),
                ))
            }
            Some(_) => {}
        }

        if let Some(block) = blocks.remove(&ptr.addr()) {
            alloc::dealloc(ptr.as_mut_ptr(), block.layout);
        }
        Ok(())
    }

    unsafe fn memcpy(
        &self,
        dst: DevicePtr,
        src: DevicePtr,
        len: usize,
        _kind: CopyKind,
    ) -> MemResult<()> {
        if len == 0 {
            return Ok(());
        }
        ptr::copy(src.as_mut_ptr() as *const u8, dst.as_mut_ptr(), len);
        Ok(())
    }

    unsafe fn memset(&self, dst: DevicePtr, value: u8, len: usize) -> MemResult<()> {
        if len == 0 {
            return Ok(());
        }
        ptr::write_bytes(dst.as_mut_ptr(), value, len);
        Ok(())
    }

    fn stream_create(&self) -> MemResult<StreamHandle> {
        Ok(StreamHandle(self.handle()))
    }

    fn stream_destroy(&self, _stream: StreamHandle) -> MemResult<()> {
        Ok(())
    }

    fn stream_synchronize(&self, _stream: StreamHandle) -> MemResult<()> {
        Ok(())
    }

    fn device_synchronize(&self) -> MemResult<()> {
        Ok(())
    }

    fn event_create(&self) -> MemResult<EventHandle> {
        let handle = self.handle();
        self.events.lock()?.insert(handle, None);
        Ok(EventHandle(handle))
    }

    fn event_destroy(&self, event: EventHandle) -> MemResult<()> {
        self.events.lock()?.remove(&event.as_raw());
        Ok(())
    }

    fn event_record(&self, event: EventHandle, _stream: StreamHandle) -> MemResult<()> {
        let mut events = self.events.lock()?;
        match events.get_mut(&event.as_raw()) {
            Some(stamp) => {
                *stamp = Some(Instant::now());
                Ok(())
            }
            None => Err(MemError::driver("event_record", 400, "invalid event handle")),
        }
    }

    fn event_synchronize(&self, event: EventHandle) -> MemResult<()> {
        if self.events.lock()?.contains_key(&event.as_raw()) {
            Ok(())
        } else {
            Err(MemError::driver("event_synchronize", 400, "invalid event handle"))
        }
    }

    fn event_elapsed_ms(&self, start: EventHandle, end: EventHandle) -> MemResult<f32> {
        let events = self.events.lock()?;
        let stamp = |event: EventHandle| match events.get(&event.as_raw()) {
            Some(Some(instant)) => Ok(*instant),
            Some(None) => Err(MemError::driver(
                "event_elapsed_ms",
                600,
                "event has not been recorded",
            )),
            None => Err(MemError::driver("event_elapsed_ms", 400, "invalid event handle")),
        };
        let start = stamp(start)?;
        let end = stamp(end)?;
        Ok(end.saturating_duration_since(start).as_secs_f32() * 1000.0)
    }
}

impl Drop for EmulatedDriver {
    fn drop(&mut self) {
        let blocks = match self.blocks.get_mut() {
            Ok(blocks) => blocks,
            Err(poisoned) => poisoned.into_inner(),
        };
        if !blocks.is_empty() {
            tracing::warn!(
                "EmulatedDriver::drop: releasing {} leaked allocations",
                blocks.len()
            );
        }
        for (addr, block) in blocks.drain() {
            unsafe { alloc::dealloc(addr as *mut u8, block.layout) };
        }
    }
}
