//! Owned driver stream

use std::sync::Arc;

use crate::backend::driver::StreamHandle;
use crate::backend::Backend;
use crate::error::MemResult;

/// Driver stream destroyed on drop
///
/// Contexts borrow a stream through its [`StreamHandle`]; the `Stream` must
/// outlive every context bound to it.
#[derive(Debug)]
pub struct Stream {
    backend: Arc<Backend>,
    handle: StreamHandle,
}

impl Stream {
    /// Create a new stream on the current device
    pub fn new(backend: Arc<Backend>) -> MemResult<Self> {
        let handle = backend.driver().stream_create()?;
        tracing::debug!("Stream::new: created {:?}", handle);
        Ok(Stream { backend, handle })
    }

    /// Block until all work issued on the stream has completed
    pub fn synchronize(&self) -> MemResult<()> {
        self.backend.driver().stream_synchronize(self.handle)
    }

    pub fn handle(&self) -> StreamHandle {
        self.handle
    }
}

impl Drop for Stream {
    fn drop(&mut self) {
        if let Err(e) = self.backend.driver().stream_destroy(self.handle) {
            tracing::error!("Stream::drop: failed to destroy {:?}: {}", self.handle, e);
        }
    }
}
