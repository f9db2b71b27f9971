//! Execution backends
//!
//! A [`Backend`] pairs a [`BackendConfig`] with the [`Driver`] that serves it
//! and, for the thread emulation, the worker pool that runs lanes. Buffers and
//! contexts hold an `Arc<Backend>`; the process-wide instance is reached
//! through [`global_backend`].

mod config;
pub mod driver;
pub mod emulated;
mod event;
pub mod lanes;
mod stream;

#[cfg(feature = "rocm")]
pub mod hip_backend;

use std::sync::Arc;

use once_cell::sync::OnceCell;

pub use config::{BackendConfig, BackendKind};
pub use driver::{CopyKind, DeviceProps, DevicePtr, Driver, EventHandle, MemorySpace, StreamHandle};
pub use emulated::EmulatedDriver;
pub use event::Event;
pub use lanes::{launch, Dim3, LaneContext};
pub use stream::Stream;

use crate::error::{MemError, MemResult};

/// Byte pattern written into fresh device allocations when sentinel fill is on
pub const SENTINEL_BYTE: u8 = 0xFF;

static GLOBAL_BACKEND: OnceCell<Arc<Backend>> = OnceCell::new();

/// Active backend: configuration, driver, and emulation worker pool
#[derive(Debug)]
pub struct Backend {
    config: BackendConfig,
    driver: Box<dyn Driver>,
    pool: Option<rayon::ThreadPool>,
}

impl Backend {
    /// Build the driver selected by `config`
    pub fn new(config: BackendConfig) -> MemResult<Self> {
        config.validate()?;

        let driver: Box<dyn Driver> = match config.kind {
            BackendKind::Native => native_driver()?,
            kind => Box::new(EmulatedDriver::new(
                kind,
                config.emulated_devices,
                config.workers,
            )),
        };

        Self::with_driver(config, driver)
    }

    /// Build a backend around an arbitrary driver.
    ///
    /// The driver's kind wins over `config.kind`.
    pub fn with_driver(mut config: BackendConfig, driver: Box<dyn Driver>) -> MemResult<Self> {
        config.validate()?;
        config.kind = driver.kind();

        let pool = match config.kind {
            BackendKind::CpuThreads => Some(
                rayon::ThreadPoolBuilder::new()
                    .num_threads(config.workers)
                    .thread_name(|i| format!("memforge-lane-{}", i))
                    .build()
                    .map_err(|e| {
                        MemError::InvalidConfiguration(format!("worker pool: {}", e))
                    })?,
            ),
            _ => None,
        };

        tracing::debug!(
            "Backend::with_driver: kind={}, workers={}, sentinel_fill={}",
            config.kind,
            config.workers,
            config.sentinel_fill
        );

        Ok(Backend {
            config,
            driver,
            pool,
        })
    }

    pub fn config(&self) -> &BackendConfig {
        &self.config
    }

    pub fn kind(&self) -> BackendKind {
        self.config.kind
    }

    pub fn driver(&self) -> &dyn Driver {
        self.driver.as_ref()
    }

    pub fn is_emulation(&self) -> bool {
        self.config.kind.is_emulation()
    }

    pub fn workers(&self) -> usize {
        self.config.workers
    }

    pub fn sentinel_fill(&self) -> bool {
        self.config.sentinel_fill
    }

    pub(crate) fn pool(&self) -> Option<&rayon::ThreadPool> {
        self.pool.as_ref()
    }
}

#[cfg(feature = "rocm")]
fn native_driver() -> MemResult<Box<dyn Driver>> {
    Ok(Box::new(hip_backend::HipDriver::new()))
}

#[cfg(not(feature = "rocm"))]
fn native_driver() -> MemResult<Box<dyn Driver>> {
    Err(MemError::NotSupported(
        "native backend requires the `rocm` feature".to_string(),
    ))
}

/// Set the process-wide backend.
///
/// Repeating the call with an equal config returns the existing backend; a
/// different config fails with [`MemError::AlreadyInitialized`].
pub fn init_backend(config: BackendConfig) -> MemResult<Arc<Backend>> {
    let mut created = false;
    let backend = GLOBAL_BACKEND.get_or_try_init(|| {
        created = true;
        Backend::new(config.clone()).map(Arc::new)
    })?;

    if !created && backend.config() != &config {
        return Err(MemError::AlreadyInitialized(backend.kind()));
    }
    if created {
        tracing::info!(
            "Initialized {} backend with {} workers",
            backend.kind(),
            backend.workers()
        );
    }
    Ok(Arc::clone(backend))
}

/// The process-wide backend, initialised from `MEMFORGE_*` variables on first use
pub fn global_backend() -> MemResult<Arc<Backend>> {
    GLOBAL_BACKEND
        .get_or_try_init(|| {
            let config = BackendConfig::from_env()?;
            let backend = Backend::new(config)?;
            tracing::info!(
                "Initialized {} backend with {} workers from environment",
                backend.kind(),
                backend.workers()
            );
            Ok(Arc::new(backend))
        })
        .map(Arc::clone)
}

/// True when the process-wide backend emulates the accelerator on the CPU
pub fn is_emulation_active() -> MemResult<bool> {
    Ok(global_backend()?.is_emulation())
}

/// Emulation worker count of the process-wide backend
pub fn worker_count() -> MemResult<usize> {
    Ok(global_backend()?.workers())
}
