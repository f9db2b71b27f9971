//! Owned driver event

use std::sync::Arc;

use crate::backend::driver::{EventHandle, StreamHandle};
use crate::backend::Backend;
use crate::error::MemResult;

/// Driver event destroyed on drop
///
/// Events mark a point in a stream. The host can block on them or measure the
/// time between two of them.
#[derive(Debug)]
pub struct Event {
    backend: Arc<Backend>,
    handle: EventHandle,
}

impl Event {
    /// Create a new event with timing enabled
    pub fn new(backend: Arc<Backend>) -> MemResult<Self> {
        let handle = backend.driver().event_create()?;
        tracing::trace!("Event::new: created {:?}", handle);
        Ok(Event { backend, handle })
    }

    /// Record this event in `stream`
    pub fn record(&self, stream: StreamHandle) -> MemResult<()> {
        self.backend.driver().event_record(self.handle, stream)
    }

    /// Block until the work captured by the last `record` has completed
    pub fn synchronize(&self) -> MemResult<()> {
        self.backend.driver().event_synchronize(self.handle)
    }

    /// Milliseconds from `self` (start) to `end`.
    ///
    /// Both events must have been recorded.
    pub fn elapsed_ms(&self, end: &Event) -> MemResult<f32> {
        self.backend.driver().event_elapsed_ms(self.handle, end.handle)
    }

    pub fn handle(&self) -> EventHandle {
        self.handle
    }
}

impl Drop for Event {
    fn drop(&mut self) {
        if let Err(e) = self.backend.driver().event_destroy(self.handle) {
            tracing::error!("Event::drop: failed to destroy {:?}: {}", self.handle, e);
        }
    }
}
