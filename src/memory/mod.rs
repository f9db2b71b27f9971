//! Memory management
//!
//! - [`DualBuffer`]: device allocation plus lazily created host mirror
//! - [`HostMemory`]: plain host bytes that can be copied into a `DualBuffer`
//! - [`Allocation`]: scoped ownership of one raw allocation

mod allocation;
mod dual_buffer;
mod host;

pub use allocation::Allocation;
pub use dual_buffer::{DualBuffer, GUARD_BYTES};
pub use host::HostMemory;

use crate::backend::BackendKind;
use crate::error::MemResult;

/// What kind of storage backs a [`MemoryLike`] value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MemoryKind {
    /// Device allocation plus host mirror on the given backend
    Dual(BackendKind),
    /// Host-only bytes
    Host,
}

/// Anything a [`DualBuffer`] can copy from
pub trait MemoryLike {
    fn memory_kind(&self) -> MemoryKind;

    /// Logical size in bytes
    fn size(&self) -> usize;

    /// Host view of the contents, materialized on demand
    fn host_bytes(&mut self) -> MemResult<&[u8]>;

    /// Downcast used by the device-to-device copy path
    fn as_dual_buffer(&self) -> Option<&DualBuffer> {
        None
    }
}
