//! Error types for the transaction engine.

use thiserror::Error;

/// Result type for engine operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur in engine operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Persistent region or heap error.
    #[error("persistent memory error: {0}")]
    Pmem(#[from] undolog_pmem::PmemError),

    /// An argument was rejected before any state changed.
    #[error("invalid argument: {message}")]
    Validation {
        /// Description of the rejected argument.
        message: String,
    },

    /// A log call targeted volatile memory.
    ///
    /// This is advisory: any requested assignment has already been
    /// performed, and nothing needs to be rolled back.
    #[error("log target of {size} bytes is volatile; assigned without undo record")]
    VolatileTarget {
        /// Size of the target value.
        size: usize,
    },

    /// A closure run through `exec` left Begin/End calls unbalanced.
    #[error("unbalanced nesting: expected level {expected} after closure, found {found}")]
    UnbalancedNesting {
        /// Nesting level the closure started at.
        expected: usize,
        /// Nesting level the closure returned at.
        found: usize,
    },

    /// Persistent engine state failed an integrity check.
    ///
    /// The region must not be used further; callers are expected to stop.
    #[error("integrity failure: {message}")]
    IntegrityFatal {
        /// Description of the failed check.
        message: String,
    },
}

impl CoreError {
    /// Creates a validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    /// Creates an integrity failure.
    pub fn integrity(message: impl Into<String>) -> Self {
        Self::IntegrityFatal {
            message: message.into(),
        }
    }

    /// Returns true for errors after which the region must not be used.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::IntegrityFatal { .. })
    }
}
