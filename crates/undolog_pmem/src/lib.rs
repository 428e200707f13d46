//! # undolog pmem
//!
//! Persistent memory regions and the persistent heap for undolog.
//!
//! This crate provides the collaborators the transaction engine is built
//! on. It knows nothing about undo logs or transactions.
//!
//! ## Design Principles
//!
//! - A region is addressed by byte offsets ([`PAddr`]), never by process
//!   pointers, so persistent data stays valid across restarts
//! - Exactly two durability primitives: [`PersistentMemory::flush`] and
//!   [`PersistentMemory::fence`]
//! - Stores are durable only after a flush covering them has been fenced
//! - Regions must be `Send + Sync` for concurrent access
//!
//! ## Available Regions
//!
//! - [`InMemoryRegion`] - For testing and crash simulation
//! - [`FileRegion`] - For persistent storage in a file
//!
//! ## Example
//!
//! ```rust
//! use undolog_pmem::{Heap, InMemoryRegion, PersistentMemory};
//!
//! let heap = Heap::format(InMemoryRegion::new(1 << 16)).unwrap();
//! let counter = heap.alloc_value(41u64).unwrap();
//! heap.memory().persist(counter, 42).unwrap();
//! assert_eq!(heap.memory().load(counter).unwrap(), 42);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod file;
mod heap;
mod memory;
mod ptr;
mod region;

pub use error::{PmemError, PmemResult};
pub use file::FileRegion;
pub use heap::{Heap, BLOCK_HEADER_SIZE, REGION_MAGIC};
pub use memory::InMemoryRegion;
pub use ptr::{span, PAddr, PPtr, PSlice, PVec, Persist};
pub use region::{PersistentMemory, HEAP_START};
