//! Unified error handling for memforge
//!
//! Every fallible operation returns [`MemResult`]. Errors fall into three
//! categories:
//! - Backend errors (fatal: the accelerator driver or allocator failed)
//! - Misuse errors (recoverable: the call was rejected and nothing changed)
//! - Configuration errors (invalid backend setup)

use std::fmt;
use std::panic::Location;

use crate::backend::{BackendKind, MemorySpace};

/// Unified error type for memforge
#[derive(Debug, thiserror::Error)]
pub enum MemError {
    // ========== Backend Errors ==========
    /// A driver call reported failure
    #[error("{op} failed with driver error code {code}: {message}")]
    Driver {
        op: &'static str,
        code: i32,
        message: String,
    },

    /// Allocation of raw memory failed
    #[error("allocation of {size} bytes of {space} memory failed")]
    AllocationFailed { size: usize, space: MemorySpace },

    /// No accelerator device is available
    #[error("no device available for the {0} backend")]
    NoDevice(BackendKind),

    /// Operation is not available on this backend
    #[error("operation not supported: {0}")]
    NotSupported(String),

    /// Lock poisoned (indicates a bug or a panic in another thread)
    #[error("internal lock poisoned: {0}")]
    LockPoisoned(String),

    // ========== Misuse Errors ==========
    /// `allocate` with a different size on an already allocated buffer
    #[error("buffer already holds {current} bytes, cannot allocate {requested} bytes; use resize() instead (at {location})")]
    SizeMismatch {
        current: usize,
        requested: usize,
        location: &'static Location<'static>,
    },

    /// Copy source is larger than the destination
    #[error("source of {source_size} bytes does not fit into {capacity} bytes (at {location})")]
    CapacityExceeded {
        source_size: usize,
        capacity: usize,
        location: &'static Location<'static>,
    },

    /// Byte range lies outside the buffer
    #[error("byte range [{start}, {stop}) is outside a buffer of {size} bytes (at {location})")]
    RangeOutOfBounds {
        start: usize,
        stop: usize,
        size: usize,
        location: &'static Location<'static>,
    },

    /// Device-to-device transfer between buffers of different backends
    #[error("cannot transfer device memory from the {source_kind} backend to the {dest_kind} backend (at {location})")]
    BackendMismatch {
        source_kind: BackendKind,
        dest_kind: BackendKind,
        location: &'static Location<'static>,
    },

    /// `timer_end` called without a matching `timer_begin`
    #[error("timer_end called without a prior timer_begin")]
    TimerNotStarted,

    // ========== Configuration Errors ==========
    /// Invalid backend or logging configuration value
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// The process-wide backend was already initialised differently
    #[error("backend already initialised as {0}")]
    AlreadyInitialized(BackendKind),
}

impl MemError {
    /// Build a driver error for a failed call
    pub fn driver(op: &'static str, code: i32, message: impl Into<String>) -> Self {
        MemError::Driver {
            op,
            code,
            message: message.into(),
        }
    }

    /// Categorize the error for handling decisions
    pub fn category(&self) -> ErrorCategory {
        match self {
            MemError::Driver { .. }
            | MemError::AllocationFailed { .. }
            | MemError::NoDevice(_)
            | MemError::NotSupported(_)
            | MemError::LockPoisoned(_) => ErrorCategory::Backend,

            MemError::SizeMismatch { .. }
            | MemError::CapacityExceeded { .. }
            | MemError::RangeOutOfBounds { .. }
            | MemError::BackendMismatch { .. }
            | MemError::TimerNotStarted => ErrorCategory::Misuse,

            MemError::InvalidConfiguration(_) | MemError::AlreadyInitialized(_) => {
                ErrorCategory::Configuration
            }
        }
    }

    /// Fatal errors abort the current operation chain; retrying is pointless
    pub fn is_fatal(&self) -> bool {
        matches!(self.category(), ErrorCategory::Backend)
    }

    /// Misuse errors leave all state untouched and can be corrected by the caller
    pub fn is_recoverable(&self) -> bool {
        matches!(self.category(), ErrorCategory::Misuse)
    }

    /// Driver error code, when the failure came from the driver
    pub fn driver_code(&self) -> Option<i32> {
        match self {
            MemError::Driver { code, .. } => Some(*code),
            _ => None,
        }
    }
}

/// Error category for handling decisions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Driver or allocator failure
    Backend,
    /// Rejected call, state unchanged
    Misuse,
    /// Invalid setup
    Configuration,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorCategory::Backend => write!(f, "Backend"),
            ErrorCategory::Misuse => write!(f, "Misuse"),
            ErrorCategory::Configuration => write!(f, "Configuration"),
        }
    }
}

impl<T> From<std::sync::PoisonError<T>> for MemError {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        MemError::LockPoisoned(err.to_string())
    }
}

/// Result type for memforge operations
pub type MemResult<T> = std::result::Result<T, MemError>;
