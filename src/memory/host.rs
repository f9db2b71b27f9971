//! Host-only memory

use crate::error::MemResult;
use crate::memory::{MemoryKind, MemoryLike};

/// Heap bytes with no device counterpart
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HostMemory {
    data: Vec<u8>,
}

impl HostMemory {
    pub fn new(data: Vec<u8>) -> Self {
        HostMemory { data }
    }

    /// `len` zero bytes
    pub fn zeroed(len: usize) -> Self {
        HostMemory { data: vec![0; len] }
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.data
    }

    pub fn into_inner(self) -> Vec<u8> {
        self.data
    }
}

impl From<Vec<u8>> for HostMemory {
    fn from(data: Vec<u8>) -> Self {
        HostMemory::new(data)
    }
}

impl From<&[u8]> for HostMemory {
    fn from(data: &[u8]) -> Self {
        HostMemory::new(data.to_vec())
    }
}

impl MemoryLike for HostMemory {
    fn memory_kind(&self) -> MemoryKind {
        MemoryKind::Host
    }

    fn size(&self) -> usize {
        self.data.len()
    }

    fn host_bytes(&mut self) -> MemResult<&[u8]> {
        Ok(&self.data)
    }
}
