//! memforge - dual host/device memory for AMD accelerators and CPU emulation
//!
//! A [`DualBuffer`] is one logical allocation that can back accelerator
//! memory and a host mirror at the same time, with explicit transfers between
//! the two. An [`ExecutionContext`] selects a device, binds a stream, times
//! work and owns scratch buffers for reduction and sort primitives.
//!
//! The same API runs on three backends:
//! - native ROCm/HIP (`rocm` feature)
//! - CPU emulation on a worker thread pool
//! - CPU emulation with cooperative lanes on the calling thread
//!
//! ```rust,ignore
//! use memforge::{init_backend, BackendConfig, BackendKind, DualBuffer};
//!
//! init_backend(BackendConfig::for_kind(BackendKind::CpuThreads))?;
//! let mut buf = DualBuffer::new()?;
//! buf.allocate(1024)?;
//! buf.fill(0)?;
//! ```

#![allow(clippy::missing_safety_doc)] // FFI bindings documented at module level

pub mod backend;
pub mod context;
pub mod error;
pub mod logging;
pub mod memory;

pub use backend::{
    global_backend, init_backend, is_emulation_active, launch, worker_count, Backend,
    BackendConfig, BackendKind, DeviceProps, DevicePtr, Dim3, Driver, EmulatedDriver, LaneContext,
    MemorySpace, Stream, StreamHandle, SENTINEL_BYTE,
};
pub use context::{ContextOption, ExecutionContext};
pub use error::{ErrorCategory, MemError, MemResult};
pub use logging::{init_logging_default, init_logging_from_env, init_with_config, LoggingConfig};
pub use memory::{Allocation, DualBuffer, HostMemory, MemoryKind, MemoryLike, GUARD_BYTES};
