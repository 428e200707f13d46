//! Crash recovery.
//!
//! Recovery runs once, single-threaded, before any handle is handed out. For
//! every handle in pool order it:
//!
//! 1. Scans the whole log array backward. The durable tail is not trusted.
//! 2. Skips empty slots and slots left over from finished cycles, and copies
//!    every live backup back onto its original location, flushing each range.
//! 3. Fences once.
//! 4. Allocates a fresh log array and durably points the handle at it with a
//!    zero tail and the next epoch. That store retires every old entry.
//! 5. Frees the old array and the backups it referenced.
//!
//! A crash at any step leaves either the old log (replayed again next time,
//! which is idempotent) or the fresh one. At worst blocks leak.

use crate::error::{CoreError, CoreResult};
use crate::header::{HandleRecord, TxHeader};
use crate::log::LogArray;
use crate::stats::EngineStats;
use tracing::{debug, info};
use undolog_pmem::{Heap, PAddr, PersistentMemory};

/// What a recovery pass did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecoverySummary {
    /// Handles visited.
    pub handles: usize,
    /// Handles that had an interrupted transaction.
    pub interrupted: usize,
    /// Undo entries copied back.
    pub replayed: usize,
}

/// Rolls back every interrupted transaction referenced by `header`.
///
/// # Errors
///
/// Returns [`CoreError::IntegrityFatal`] if a handle record, log array or
/// live entry points outside the heap.
pub(crate) fn recover<M: PersistentMemory>(
    heap: &Heap<M>,
    header: &TxHeader,
    stats: &EngineStats,
) -> CoreResult<RecoverySummary> {
    let mut summary = RecoverySummary::default();

    for (class, index, record) in header.all_records() {
        let replayed = recover_handle(heap, record)?;
        stats.record_recovered(replayed);

        summary.handles += 1;
        summary.replayed += replayed;
        if replayed > 0 {
            summary.interrupted += 1;
            debug!(pool = %class, handle = index, replayed, "rolled back interrupted transaction");
        }
    }

    info!(
        handles = summary.handles,
        interrupted = summary.interrupted,
        replayed = summary.replayed,
        "recovery complete"
    );
    Ok(summary)
}

fn recover_handle<M: PersistentMemory>(heap: &Heap<M>, addr: PAddr) -> CoreResult<usize> {
    let memory = heap.memory();
    let record = HandleRecord::load(memory, addr)?;
    let log = LogArray::open(memory, record.log)?;

    let mut backups = Vec::new();
    let mut replayed = 0;
    for index in log.indices_backward() {
        let entry = log.read(memory, index)?;
        if entry.is_empty() {
            continue;
        }
        if !entry.backup.is_null() {
            backups.push(entry.backup);
        }
        if !entry.is_live(record.epoch) {
            continue;
        }

        let size = entry.size as usize;
        if !memory.contains(entry.original, size) || !memory.contains(entry.backup, size) {
            return Err(CoreError::integrity(format!(
                "log entry {index} of handle record {addr} points outside persistent heap"
            )));
        }
        memory.copy(entry.backup, entry.original, size)?;
        memory.flush(entry.original, size)?;
        replayed += 1;
    }
    memory.fence()?;

    let fresh = LogArray::alloc(heap, log.capacity())?;
    record.renewed(fresh.addr()).store_all(memory)?;

    heap.free(log.addr())?;
    for backup in backups {
        heap.free(backup)?;
    }
    Ok(replayed)
}
