//! Execution context
//!
//! An [`ExecutionContext`] is one logical unit of accelerator work: the
//! selected device, the stream work is issued on, a pair of timing events, a
//! signalling event, and three scratch buffers that reduction and sort
//! primitives reuse between calls.
//!
//! When the backend reports no devices the context is *inert*: it still
//! constructs, but synchronization and timing do nothing.

use std::sync::Arc;

use crate::backend::{
    global_backend, lanes, Backend, DeviceProps, DevicePtr, Dim3, Event, LaneContext,
    MemorySpace, StreamHandle,
};
use crate::error::{MemError, MemResult};
use crate::memory::DualBuffer;

/// ISA version reported when no device properties are available
pub const FALLBACK_ISA_VERSION: i32 = 60;

/// How a context treats the device at construction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ContextOption {
    /// Select the device quietly
    #[default]
    NoPrintProps,
    /// Select the device and log its properties
    PrintProps,
    /// Leave the current device unchanged and describe it instead;
    /// `device_index` is ignored
    Dummy,
}

#[derive(Debug)]
struct ActiveDevice {
    props: DeviceProps,
    timer: [Event; 2],
    event: Event,
    timer_started: bool,
}

/// Device selection, stream, timing and scratch storage for one unit of work
#[derive(Debug)]
pub struct ExecutionContext {
    backend: Arc<Backend>,
    stream: StreamHandle,
    device_ordinal: usize,
    device_count: usize,
    active: Option<ActiveDevice>,
    scratch: [DualBuffer; 3],
}

impl ExecutionContext {
    /// Context on the process-wide backend
    pub fn new(option: ContextOption, device_index: usize, stream: StreamHandle) -> MemResult<Self> {
        Self::with_backend(global_backend()?, option, device_index, stream)
    }

    /// Context on an explicit backend.
    ///
    /// `device_index` is taken modulo the device count, except under
    /// [`ContextOption::Dummy`]. `stream` is borrowed,
    /// not owned; [`StreamHandle::DEFAULT`] means the device's null stream.
    pub fn with_backend(
        backend: Arc<Backend>,
        option: ContextOption,
        device_index: usize,
        stream: StreamHandle,
    ) -> MemResult<Self> {
        let driver = backend.driver();
        let device_count = driver.device_count()?;
        let scratch = std::array::from_fn(|_| DualBuffer::with_backend(backend.clone()));

        if device_count == 0 {
            tracing::warn!(
                "ExecutionContext: {} backend reports no devices, context is inert",
                backend.kind()
            );
            return Ok(ExecutionContext {
                backend,
                stream,
                device_ordinal: 0,
                device_count,
                active: None,
                scratch,
            });
        }

        if option != ContextOption::Dummy {
            driver.set_device(device_index % device_count)?;
        }
        // Dummy contexts describe whatever device is already current
        let device_ordinal = driver.current_device()?;

        let props = driver.device_props(device_ordinal)?;
        if option == ContextOption::PrintProps {
            tracing::info!("Device {} of {}: {}", device_ordinal, device_count, props);
        }

        let active = ActiveDevice {
            props,
            timer: [Event::new(backend.clone())?, Event::new(backend.clone())?],
            event: Event::new(backend.clone())?,
            timer_started: false,
        };

        tracing::debug!(
            "ExecutionContext: device {} of {}, stream {:?}",
            device_ordinal,
            device_count,
            stream
        );

        Ok(ExecutionContext {
            backend,
            stream,
            device_ordinal,
            device_count,
            active: Some(active),
            scratch,
        })
    }

    pub fn backend(&self) -> &Arc<Backend> {
        &self.backend
    }

    /// True when the backend had no devices at construction
    pub fn is_inert(&self) -> bool {
        self.active.is_none()
    }

    /// Selected device ordinal
    pub fn device(&self) -> usize {
        self.device_ordinal
    }

    /// Devices visible at construction
    pub fn device_count(&self) -> usize {
        self.device_count
    }

    pub fn stream(&self) -> StreamHandle {
        self.stream
    }

    /// Device properties captured at construction
    pub fn props(&self) -> Option<&DeviceProps> {
        self.active.as_ref().map(|a| &a.props)
    }

    /// ISA version of the selected device, `major * 10 + minor`
    pub fn isa_version(&self) -> i32 {
        self.props()
            .map(|p| p.isa_version)
            .unwrap_or(FALLBACK_ISA_VERSION)
    }

    /// Signalling event for callers coordinating with this context's stream
    pub fn event(&self) -> Option<&Event> {
        self.active.as_ref().map(|a| &a.event)
    }

    /// Allocate `size` bytes in `space`.
    ///
    /// Zero bytes, or any request on an inert context, yields a null pointer.
    pub fn alloc(&self, size: usize, space: MemorySpace) -> MemResult<DevicePtr> {
        if size == 0 {
            return Ok(DevicePtr::null());
        }
        if self.is_inert() {
            tracing::debug!("ExecutionContext::alloc: inert context, {} bytes not allocated", size);
            return Ok(DevicePtr::null());
        }
        self.backend.driver().malloc(size, space)
    }

    /// Release memory obtained from [`ExecutionContext::alloc`]. Null is a no-op.
    ///
    /// # Safety
    /// `ptr` must come from `alloc` with the same `space` on a context of the
    /// same backend, and must not be used afterwards.
    pub unsafe fn free(&self, ptr: DevicePtr, space: MemorySpace) -> MemResult<()> {
        if ptr.is_null() {
            return Ok(());
        }
        self.backend.driver().free(ptr, space)
    }

    /// Wait for the bound stream, or the whole device without one
    pub fn synchronize(&self) -> MemResult<()> {
        if self.is_inert() {
            return Ok(());
        }
        let driver = self.backend.driver();
        if self.stream.is_default() {
            driver.device_synchronize()
        } else {
            driver.stream_synchronize(self.stream)
        }
    }

    /// Start the elapsed-time measurement on the context's stream
    pub fn timer_begin(&mut self) -> MemResult<()> {
        let stream = self.stream;
        if let Some(active) = self.active.as_mut() {
            active.timer[0].record(stream)?;
            active.timer_started = true;
        }
        Ok(())
    }

    /// Seconds since the matching [`ExecutionContext::timer_begin`]
    pub fn timer_end(&mut self) -> MemResult<f64> {
        let stream = self.stream;
        let Some(active) = self.active.as_mut() else {
            return Ok(0.0);
        };
        if !active.timer_started {
            tracing::warn!("ExecutionContext::timer_end called without timer_begin");
            return Err(MemError::TimerNotStarted);
        }

        active.timer[1].record(stream)?;
        active.timer[1].synchronize()?;
        let ms = active.timer[0].elapsed_ms(&active.timer[1])?;
        active.timer_started = false;
        Ok(ms as f64 / 1e3)
    }

    pub fn scratch_1(&mut self) -> &mut DualBuffer {
        &mut self.scratch[0]
    }

    pub fn scratch_2(&mut self) -> &mut DualBuffer {
        &mut self.scratch[1]
    }

    pub fn scratch_3(&mut self) -> &mut DualBuffer {
        &mut self.scratch[2]
    }

    /// Run `kernel` over a `grid × block` launch on the emulation backends
    pub fn launch<F>(&self, grid: impl Into<Dim3>, block: impl Into<Dim3>, kernel: F) -> MemResult<()>
    where
        F: Fn(&LaneContext) + Send + Sync,
    {
        if self.is_inert() {
            return Ok(());
        }
        lanes::launch(&self.backend, grid, block, kernel)
    }
}
