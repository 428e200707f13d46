//! # undolog core
//!
//! Undo-log transaction engine for data kept directly in persistent memory.
//!
//! This crate provides:
//! - Transaction handles with nested Begin/End and automatic lock release
//! - Durable undo recording of scalars, vectors, slices and raw byte ranges
//! - Crash recovery that rolls back every interrupted transaction
//! - Fixed pools of small and large handles
//! - Read-only inspection of a region's engine state
//!
//! ## Durability Contract
//!
//! Before a location is changed it must be logged through a handle. The
//! pre-image and its log entry are durable before the call returns. The
//! outermost `end` flushes every logged location, then retires the log with
//! a single durable epoch store. A crash before that store rolls the whole
//! transaction back on the next [`Engine::open`]; a crash after it keeps
//! every change.
//!
//! ## Example
//!
//! ```rust
//! use undolog_core::{Engine, EngineConfig};
//! use undolog_pmem::{Heap, InMemoryRegion, PersistentMemory};
//!
//! let heap = Heap::format(InMemoryRegion::new(1 << 20)).unwrap();
//! let engine = Engine::open(heap, EngineConfig::default()).unwrap();
//! let x = engine.heap().alloc_value(10u64).unwrap();
//!
//! let mut tx = engine.acquire().unwrap();
//! tx.begin();
//! tx.log_set(x, 11).unwrap();
//! tx.end().unwrap();
//!
//! let durable = engine.heap().memory().crash();
//! assert_eq!(durable.load(x).unwrap(), 11);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod engine;
mod error;
mod header;
mod inspect;
mod log;
mod recovery;
mod stats;
mod transaction;

pub use config::{
    EngineConfig, DEFAULT_LARGE_LOG_CAPACITY, DEFAULT_LARGE_POOL_SIZE, DEFAULT_LOG_CAPACITY,
    DEFAULT_MAGIC, DEFAULT_POOL_SIZE,
};
pub use engine::Engine;
pub use error::{CoreError, CoreResult};
pub use header::{HandleRecord, PoolClass, TxHeader};
pub use inspect::{inspect, HandleReport, RegionReport};
pub use log::{LogArray, LogEntry, ENTRY_SIZE};
pub use recovery::RecoverySummary;
pub use stats::{EngineStats, StatsSnapshot};
pub use transaction::{Target, TxHandle};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
