//! # undolog testkit
//!
//! Test utilities for undolog.
//!
//! This crate provides:
//! - Test fixtures and engine helpers
//! - A crash-injecting region and a crash recovery harness
//! - Property-based test generators using proptest
//! - Stress testing utilities
//!
//! ## Usage
//!
//! ```rust
//! use undolog_pmem::PersistentMemory;
//! use undolog_testkit::prelude::*;
//!
//! let (engine, slots) = scenarios::populated_engine(2);
//! let mut tx = engine.acquire().unwrap();
//! tx.begin();
//! tx.log_set(slots[0], 10).unwrap();
//! drop(tx);
//!
//! let recovered = engine.crash_and_recover();
//! assert_eq!(scenarios::read_slots(&recovered, &slots), vec![0, 1]);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod crash;
pub mod fixtures;
pub mod generators;
pub mod stress;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::crash::*;
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::stress::*;
}

pub use crash::*;
pub use fixtures::*;
pub use generators::*;
pub use stress::*;
