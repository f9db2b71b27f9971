//! Native driver over the HIP runtime

use std::ffi::c_void;
use std::ptr;

use crate::backend::driver::{
    CopyKind, DeviceProps, DevicePtr, Driver, EventHandle, MemorySpace, StreamHandle,
};
use crate::backend::BackendKind;
use crate::error::{MemError, MemResult};

use super::device::{get_error_string, HipDeviceProp};
use super::ffi;

fn check(op: &'static str, result: i32) -> MemResult<()> {
    if result == ffi::HIP_SUCCESS {
        Ok(())
    } else {
        let message = get_error_string(result);
        tracing::error!("{} failed with code {}: {}", op, result, message);
        Err(MemError::driver(op, result, message))
    }
}

fn copy_kind(kind: CopyKind) -> i32 {
    match kind {
        CopyKind::HostToHost => ffi::HIP_MEMCPY_HOST_TO_HOST,
        CopyKind::HostToDevice => ffi::HIP_MEMCPY_HOST_TO_DEVICE,
        CopyKind::DeviceToHost => ffi::HIP_MEMCPY_DEVICE_TO_HOST,
        CopyKind::DeviceToDevice => ffi::HIP_MEMCPY_DEVICE_TO_DEVICE,
    }
}

/// Driver for AMD accelerators through `libamdhip64`
#[derive(Debug, Default)]
pub struct HipDriver;

impl HipDriver {
    pub fn new() -> Self {
        HipDriver
    }
}

impl Driver for HipDriver {
    fn kind(&self) -> BackendKind {
        BackendKind::Native
    }

    fn device_count(&self) -> MemResult<usize> {
        let mut count: i32 = 0;
        let result = unsafe { ffi::hipGetDeviceCount(&mut count) };
        // hipErrorNoDevice (100) means zero devices, not a broken runtime
        if result == 100 {
            return Ok(0);
        }
        check("hipGetDeviceCount", result)?;
        Ok(count.max(0) as usize)
    }

    fn set_device(&self, ordinal: usize) -> MemResult<()> {
        check("hipSetDevice", unsafe { ffi::hipSetDevice(ordinal as i32) })
    }

    fn current_device(&self) -> MemResult<usize> {
        let mut ordinal: i32 = 0;
        check("hipGetDevice", unsafe { ffi::hipGetDevice(&mut ordinal) })?;
        Ok(ordinal.max(0) as usize)
    }

    fn device_props(&self, ordinal: usize) -> MemResult<DeviceProps> {
        let mut prop = HipDeviceProp::default();
        check("hipGetDeviceProperties", unsafe {
            ffi::hipGetDeviceProperties(&mut prop, ordinal as i32)
        })?;
        Ok(prop.to_props())
    }

    fn malloc(&self, size: usize, space: MemorySpace) -> MemResult<DevicePtr> {
        if size == 0 {
            return Ok(DevicePtr::null());
        }

        let mut raw: *mut c_void = ptr::null_mut();
        let (op, result) = unsafe {
            match space {
                MemorySpace::Device => ("hipMalloc", ffi::hipMalloc(&mut raw, size)),
                MemorySpace::PinnedHost => (
                    "hipHostMalloc",
                    ffi::hipHostMalloc(&mut raw, size, ffi::HIP_HOST_MALLOC_DEFAULT),
                ),
            }
        };

        check(op, result)?;
        if raw.is_null() {
            tracing::error!("HipDriver::malloc: {} returned null for {} bytes", op, size);
            return Err(MemError::AllocationFailed { size, space });
        }

        tracing::trace!("HipDriver::malloc: {} bytes of {} memory at {:?}", size, space, raw);
        Ok(DevicePtr::from_raw(raw as *mut u8))
    }

    unsafe fn free(&self, ptr: DevicePtr, space: MemorySpace) -> MemResult<()> {
        if ptr.is_null() {
            return Ok(());
        }
        let raw = ptr.as_mut_ptr() as *mut c_void;
        match space {
            MemorySpace::Device => check("hipFree", ffi::hipFree(raw)),
            MemorySpace::PinnedHost => check("hipHostFree", ffi::hipHostFree(raw)),
        }
    }

    unsafe fn memcpy(
        &self,
        dst: DevicePtr,
        src: DevicePtr,
        len: usize,
        kind: CopyKind,
    ) -> MemResult<()> {
        if len == 0 {
            return Ok(());
        }
        check(
            "hipMemcpy",
            ffi::hipMemcpy(
                dst.as_mut_ptr() as *mut c_void,
                src.as_mut_ptr() as *const c_void,
                len,
                copy_kind(kind),
            ),
        )
    }

    unsafe fn memset(&self, dst: DevicePtr, value: u8, len: usize) -> MemResult<()> {
        if len == 0 {
            return Ok(());
        }
        check(
            "hipMemset",
            ffi::hipMemset(dst.as_mut_ptr() as *mut c_void, value as i32, len),
        )
    }

    fn stream_create(&self) -> MemResult<StreamHandle> {
        let mut stream: *mut c_void = ptr::null_mut();
        check("hipStreamCreate", unsafe { ffi::hipStreamCreate(&mut stream) })?;
        if stream.is_null() {
            return Err(MemError::driver(
                "hipStreamCreate",
                -1,
                "returned null stream",
            ));
        }
        Ok(StreamHandle(stream as usize))
    }

    fn stream_destroy(&self, stream: StreamHandle) -> MemResult<()> {
        if stream.is_default() {
            return Ok(());
        }
        check("hipStreamDestroy", unsafe {
            ffi::hipStreamDestroy(stream.as_raw() as *mut c_void)
        })
    }

    fn stream_synchronize(&self, stream: StreamHandle) -> MemResult<()> {
        check("hipStreamSynchronize", unsafe {
            ffi::hipStreamSynchronize(stream.as_raw() as *mut c_void)
        })
    }

    fn device_synchronize(&self) -> MemResult<()> {
        check("hipDeviceSynchronize", unsafe { ffi::hipDeviceSynchronize() })
    }

    fn event_create(&self) -> MemResult<EventHandle> {
        let mut event: *mut c_void = ptr::null_mut();
        check("hipEventCreate", unsafe { ffi::hipEventCreate(&mut event) })?;
        if event.is_null() {
            return Err(MemError::driver("hipEventCreate", -1, "returned null event"));
        }
        Ok(EventHandle(event as usize))
    }

    fn event_destroy(&self, event: EventHandle) -> MemResult<()> {
        check("hipEventDestroy", unsafe {
            ffi::hipEventDestroy(event.as_raw() as *mut c_void)
        })
    }

    fn event_record(&self, event: EventHandle, stream: StreamHandle) -> MemResult<()> {
        check("hipEventRecord", unsafe {
            ffi::hipEventRecord(
                event.as_raw() as *mut c_void,
                stream.as_raw() as *mut c_void,
            )
        })
    }

    fn event_synchronize(&self, event: EventHandle) -> MemResult<()> {
        check("hipEventSynchronize", unsafe {
            ffi::hipEventSynchronize(event.as_raw() as *mut c_void)
        })
    }

    fn event_elapsed_ms(&self, start: EventHandle, end: EventHandle) -> MemResult<f32> {
        let mut ms: f32 = 0.0;
        check("hipEventElapsedTime", unsafe {
            ffi::hipEventElapsedTime(
                &mut ms,
                start.as_raw() as *mut c_void,
                end.as_raw() as *mut c_void,
            )
        })?;
        Ok(ms)
    }
}
