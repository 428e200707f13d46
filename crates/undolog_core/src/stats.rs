//! Engine statistics.
//!
//! # Usage
//!
//! ```rust,ignore
//! let engine = Engine::open(heap, EngineConfig::default())?;
//!
//! // Run transactions...
//!
//! let stats = engine.stats().snapshot();
//! println!("Committed: {}", stats.transactions_committed);
//! println!("Entries logged: {}", stats.entries_logged);
//! ```

use std::sync::atomic::{AtomicU64, Ordering};

/// Engine counters.
///
/// All counters are atomic and can be read while transactions run.
#[derive(Debug, Default)]
pub struct EngineStats {
    // Transaction counters
    transactions_begun: AtomicU64,
    transactions_committed: AtomicU64,
    transactions_aborted: AtomicU64,

    // Log counters
    entries_logged: AtomicU64,
    bytes_logged: AtomicU64,
    log_growths: AtomicU64,
    volatile_targets: AtomicU64,

    // Pool counters
    acquisitions: AtomicU64,

    // Recovery counters
    handles_recovered: AtomicU64,
    entries_replayed: AtomicU64,
}

impl EngineStats {
    /// Creates a new stats instance.
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_begin(&self) {
        self.transactions_begun.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_commit(&self) {
        self.transactions_committed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_abort(&self) {
        self.transactions_aborted.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_logged(&self, bytes: usize) {
        self.entries_logged.fetch_add(1, Ordering::Relaxed);
        self.bytes_logged.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub(crate) fn record_growth(&self) {
        self.log_growths.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_volatile_target(&self) {
        self.volatile_targets.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_acquire(&self) {
        self.acquisitions.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_recovered(&self, replayed: usize) {
        self.handles_recovered.fetch_add(1, Ordering::Relaxed);
        self.entries_replayed
            .fetch_add(replayed as u64, Ordering::Relaxed);
    }

    /// Returns the number of outermost transactions begun.
    pub fn transactions_begun(&self) -> u64 {
        self.transactions_begun.load(Ordering::Relaxed)
    }

    /// Returns the number of outermost transactions committed.
    pub fn transactions_committed(&self) -> u64 {
        self.transactions_committed.load(Ordering::Relaxed)
    }

    /// Returns the number of transactions rolled back at release.
    pub fn transactions_aborted(&self) -> u64 {
        self.transactions_aborted.load(Ordering::Relaxed)
    }

    /// Returns the number of undo entries recorded.
    pub fn entries_logged(&self) -> u64 {
        self.entries_logged.load(Ordering::Relaxed)
    }

    /// Returns the number of pre-image bytes recorded.
    pub fn bytes_logged(&self) -> u64 {
        self.bytes_logged.load(Ordering::Relaxed)
    }

    /// Returns the number of log capacity doublings.
    pub fn log_growths(&self) -> u64 {
        self.log_growths.load(Ordering::Relaxed)
    }

    /// Returns the number of log calls that hit volatile targets.
    pub fn volatile_targets(&self) -> u64 {
        self.volatile_targets.load(Ordering::Relaxed)
    }

    /// Returns the number of handle checkouts.
    pub fn acquisitions(&self) -> u64 {
        self.acquisitions.load(Ordering::Relaxed)
    }

    /// Returns the number of handles recovered at initialization.
    pub fn handles_recovered(&self) -> u64 {
        self.handles_recovered.load(Ordering::Relaxed)
    }

    /// Returns the number of undo entries replayed at initialization.
    pub fn entries_replayed(&self) -> u64 {
        self.entries_replayed.load(Ordering::Relaxed)
    }

    /// Returns a point-in-time copy of all counters.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            transactions_begun: self.transactions_begun(),
            transactions_committed: self.transactions_committed(),
            transactions_aborted: self.transactions_aborted(),
            entries_logged: self.entries_logged(),
            bytes_logged: self.bytes_logged(),
            log_growths: self.log_growths(),
            volatile_targets: self.volatile_targets(),
            acquisitions: self.acquisitions(),
            handles_recovered: self.handles_recovered(),
            entries_replayed: self.entries_replayed(),
        }
    }
}

/// A point-in-time copy of [`EngineStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    /// Outermost transactions begun.
    pub transactions_begun: u64,
    /// Outermost transactions committed.
    pub transactions_committed: u64,
    /// Transactions rolled back at release.
    pub transactions_aborted: u64,
    /// Undo entries recorded.
    pub entries_logged: u64,
    /// Pre-image bytes recorded.
    pub bytes_logged: u64,
    /// Log capacity doublings.
    pub log_growths: u64,
    /// Log calls that hit volatile targets.
    pub volatile_targets: u64,
    /// Handle checkouts.
    pub acquisitions: u64,
    /// Handles recovered at initialization.
    pub handles_recovered: u64,
    /// Undo entries replayed at initialization.
    pub entries_replayed: u64,
}
