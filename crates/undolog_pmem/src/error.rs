//! Error types for persistent memory operations.

use std::io;
use thiserror::Error;

/// Result type for persistent memory operations.
pub type PmemResult<T> = Result<T, PmemError>;

/// Errors that can occur while accessing a persistent region.
#[derive(Debug, Error)]
pub enum PmemError {
    /// An I/O error occurred in a file-backed region.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// An access fell outside the region.
    #[error("access out of bounds: addr {addr:#x}, len {len}, region size {size}")]
    OutOfBounds {
        /// The requested address.
        addr: u64,
        /// The requested length.
        len: usize,
        /// The current region size.
        size: u64,
    },

    /// The heap has no room for the requested allocation.
    #[error("persistent heap exhausted: requested {requested} bytes, {available} available")]
    OutOfMemory {
        /// The requested payload size.
        requested: usize,
        /// Bytes left between the heap top and the end of the region.
        available: u64,
    },

    /// The region or heap metadata is corrupted.
    #[error("region corrupted: {0}")]
    Corrupted(String),

    /// Another process holds the region file.
    #[error("region locked: another process has exclusive access")]
    Locked,
}
