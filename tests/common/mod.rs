//! Common test utilities
//!
//! Every integration test builds its own emulated backend so tests never
//! depend on the process-wide one. Tests that do touch the global backend
//! must be `#[serial]`.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use memforge::backend::{CopyKind, EventHandle};
use memforge::{
    Backend, BackendConfig, BackendKind, DeviceProps, DevicePtr, Driver, DualBuffer,
    EmulatedDriver, MemError, MemResult, MemorySpace, StreamHandle,
};
use once_cell::sync::Lazy;
pub use serial_test::serial;

/// Shared thread-pool backend for tests that only need "some backend"
pub static THREAD_BACKEND: Lazy<Arc<Backend>> = Lazy::new(|| {
    memforge::init_logging_default();
    Arc::new(
        Backend::new(
            BackendConfig::for_kind(BackendKind::CpuThreads)
                .with_workers(4)
                .with_sentinel_fill(false),
        )
        .expect("thread backend"),
    )
});

/// Backend plus a handle on its driver for leak checks
pub struct TrackedBackend {
    pub backend: Arc<Backend>,
    pub driver: Arc<EmulatedDriver>,
}

impl TrackedBackend {
    pub fn new(kind: BackendKind, devices: usize) -> Self {
        let driver = Arc::new(EmulatedDriver::new(kind, devices, 2));
        let backend = Arc::new(
            Backend::with_driver(
                BackendConfig::for_kind(kind)
                    .with_workers(2)
                    .with_sentinel_fill(false)
                    .with_emulated_devices(devices),
                Box::new(driver.clone()),
            )
            .expect("tracked backend"),
        );
        TrackedBackend { backend, driver }
    }

    pub fn buffer(&self) -> DualBuffer {
        DualBuffer::with_backend(self.backend.clone())
    }

    pub fn assert_no_leak(&self) {
        assert_eq!(
            self.driver.live_allocations(),
            0,
            "{} bytes still allocated",
            self.driver.live_bytes()
        );
    }
}

/// Emulated backend of `kind`, sentinel fill off
pub fn emulated_backend(kind: BackendKind) -> Arc<Backend> {
    Arc::new(
        Backend::new(BackendConfig::for_kind(kind).with_sentinel_fill(false)).expect("backend"),
    )
}

/// Buffer of `size` bytes with every byte set to `value` on both copies
pub fn filled(backend: &Arc<Backend>, size: usize, value: u8) -> anyhow::Result<DualBuffer> {
    let mut buf = DualBuffer::with_backend(backend.clone());
    buf.allocate(size)?;
    buf.fill(value)?;
    buf.device_to_host()?;
    Ok(buf)
}

/// Device contents of `buf`, read back through the host mirror
pub fn device_bytes(buf: &mut DualBuffer) -> anyhow::Result<Vec<u8>> {
    buf.device_to_host()?;
    Ok(buf.host_slice()?.to_vec())
}

/// Emulated driver whose `malloc` fails once `budget` allocations succeeded
#[derive(Debug)]
pub struct FailingDriver {
    inner: EmulatedDriver,
    budget: AtomicUsize,
}

impl FailingDriver {
    pub fn new(budget: usize) -> Self {
        FailingDriver {
            inner: EmulatedDriver::new(BackendKind::Fibers, 1, 1),
            budget: AtomicUsize::new(budget),
        }
    }

    /// Allow `n` more allocations
    pub fn refill(&self, n: usize) {
        self.budget.store(n, Ordering::SeqCst);
    }

    pub fn live_allocations(&self) -> usize {
        self.inner.live_allocations()
    }
}

impl Driver for FailingDriver {
    fn kind(&self) -> BackendKind {
        self.inner.kind()
    }

    fn device_count(&self) -> MemResult<usize> {
        self.inner.device_count()
    }

    fn set_device(&self, ordinal: usize) -> MemResult<()> {
        self.inner.set_device(ordinal)
    }

    fn current_device(&self) -> MemResult<usize> {
        self.inner.current_device()
    }

    fn device_props(&self, ordinal: usize) -> MemResult<DeviceProps> {
        self.inner.device_props(ordinal)
    }

    fn malloc(&self, size: usize, space: MemorySpace) -> MemResult<DevicePtr> {
        let granted = self
            .budget
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if !granted {
            return Err(MemError::AllocationFailed { size, space });
        }
        self.inner.malloc(size, space)
    }

    unsafe fn free(&self, ptr: DevicePtr, space: MemorySpace) -> MemResult<()> {
        self.inner.free(ptr, space)
    }

    unsafe fn memcpy(
        &self,
        dst: DevicePtr,
        src: DevicePtr,
        len: usize,
        kind: CopyKind,
    ) -> MemResult<()> {
        self.inner.memcpy(dst, src, len, kind)
    }

    unsafe fn memset(&self, dst: DevicePtr, value: u8, len: usize) -> MemResult<()> {
        self.inner.memset(dst, value, len)
    }

    fn stream_create(&self) -> MemResult<StreamHandle> {
        self.inner.stream_create()
    }

    fn stream_destroy(&self, stream: StreamHandle) -> MemResult<()> {
        self.inner.stream_destroy(stream)
    }

    fn stream_synchronize(&self, stream: StreamHandle) -> MemResult<()> {
        self.inner.stream_synchronize(stream)
    }

    fn device_synchronize(&self) -> MemResult<()> {
        self.inner.device_synchronize()
    }

    fn event_create(&self) -> MemResult<EventHandle> {
        self.inner.event_create()
    }

    fn event_destroy(&self, event: EventHandle) -> MemResult<()> {
        self.inner.event_destroy(event)
    }

    fn event_record(&self, event: EventHandle, stream: StreamHandle) -> MemResult<()> {
        self.inner.event_record(event, stream)
    }

    fn event_synchronize(&self, event: EventHandle) -> MemResult<()> {
        self.inner.event_synchronize(event)
    }

    fn event_elapsed_ms(&self, start: EventHandle, end: EventHandle) -> MemResult<f32> {
        self.inner.event_elapsed_ms(start, end)
    }
}

/// Backend around a [`FailingDriver`] with the given allocation budget
pub fn failing_backend(budget: usize) -> (Arc<Backend>, Arc<FailingDriver>) {
    let driver = Arc::new(FailingDriver::new(budget));
    let backend = Arc::new(
        Backend::with_driver(
            BackendConfig::for_kind(BackendKind::Fibers).with_sentinel_fill(false),
            Box::new(driver.clone()),
        )
        .expect("failing backend"),
    );
    (backend, driver)
}
