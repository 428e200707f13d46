//! Persistent undo log storage.
//!
//! Each handle owns one log array in the persistent heap:
//!
//! ```text
//! | capacity (8) | entry 0 (32) | entry 1 (32) | ... | entry capacity-1 (32) |
//! ```
//!
//! An entry is `| original (8) | backup (8) | size (8) | generation (8) |`.
//!
//! ## Invariants
//!
//! - Entries are appended in temporal order and never reordered
//! - A generation of 0 marks an empty slot with no replayable data
//! - A live entry carries the owning handle's current epoch as its
//!   generation; any other nonzero value is left over from a finished cycle
//! - Growth copies every entry verbatim into an array of twice the capacity

mod array;
mod entry;

pub use array::LogArray;
pub use entry::{LogEntry, ENTRY_SIZE};
