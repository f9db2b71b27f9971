//! Scoped ownership of one raw allocation

use std::sync::Arc;

use crate::backend::{Backend, DevicePtr, MemorySpace};
use crate::error::MemResult;

/// One raw allocation in a memory space, released exactly once
///
/// Release happens through [`Allocation::release`] (errors propagate) or on
/// drop (errors are logged).
#[derive(Debug)]
pub struct Allocation {
    backend: Arc<Backend>,
    ptr: DevicePtr,
    capacity: usize,
    space: MemorySpace,
}

impl Allocation {
    /// Allocate `capacity` bytes in `space`
    pub fn new(backend: Arc<Backend>, capacity: usize, space: MemorySpace) -> MemResult<Self> {
        let ptr = backend.driver().malloc(capacity, space)?;
        tracing::debug!(
            "Allocation::new: {} bytes of {} memory at {:#x}",
            capacity,
            space,
            ptr.addr()
        );
        Ok(Allocation {
            backend,
            ptr,
            capacity,
            space,
        })
    }

    pub fn ptr(&self) -> DevicePtr {
        self.ptr
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn space(&self) -> MemorySpace {
        self.space
    }

    /// Host view of a pinned host allocation
    pub(crate) fn as_slice(&self, len: usize) -> &[u8] {
        debug_assert_eq!(self.space, MemorySpace::PinnedHost);
        debug_assert!(len <= self.capacity);
        if self.ptr.is_null() || len == 0 {
            return &[];
        }
        unsafe { std::slice::from_raw_parts(self.ptr.as_mut_ptr(), len) }
    }

    /// Mutable host view of a pinned host allocation
    pub(crate) fn as_mut_slice(&mut self, len: usize) -> &mut [u8] {
        debug_assert_eq!(self.space, MemorySpace::PinnedHost);
        debug_assert!(len <= self.capacity);
        if self.ptr.is_null() || len == 0 {
            return &mut [];
        }
        unsafe { std::slice::from_raw_parts_mut(self.ptr.as_mut_ptr(), len) }
    }

    /// Free the allocation now and report driver failures
    pub fn release(mut self) -> MemResult<()> {
        let ptr = std::mem::replace(&mut self.ptr, DevicePtr::null());
        unsafe { self.backend.driver().free(ptr, self.space) }
    }
}

impl Drop for Allocation {
    fn drop(&mut self) {
        if self.ptr.is_null() {
            return;
        }
        tracing::debug!(
            "Allocation::drop: freeing {} bytes of {} memory at {:#x}",
            self.capacity,
            self.space,
            self.ptr.addr()
        );
        if let Err(e) = unsafe { self.backend.driver().free(self.ptr, self.space) } {
            tracing::error!("Allocation::drop: {}", e);
        }
        self.ptr = DevicePtr::null();
    }
}
