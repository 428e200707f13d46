//! Verify command implementation.

use super::inspect::read_report;
use std::path::Path;
use undolog_core::{HandleReport, LogArray};
use undolog_pmem::{FileRegion, Heap, PersistentMemory};

/// Verification result.
#[derive(Debug)]
pub struct VerifyResult {
    /// Number of handles checked.
    pub handles_checked: usize,
    /// Number of log entries checked.
    pub entries_checked: usize,
    /// Handles holding an interrupted transaction.
    pub interrupted: usize,
    /// List of errors found.
    pub errors: Vec<String>,
}

impl VerifyResult {
    fn new() -> Self {
        Self {
            handles_checked: 0,
            entries_checked: 0,
            interrupted: 0,
            errors: Vec::new(),
        }
    }

    /// Returns true if no errors were found.
    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Runs the verify command.
pub fn run(path: &Path, magic: u64) -> Result<(), Box<dyn std::error::Error>> {
    println!("Verifying region at {:?}", path);
    println!();

    let result = verify(path, magic)?;
    println!("Handles checked:  {}", result.handles_checked);
    println!("Entries checked:  {}", result.entries_checked);
    println!("Interrupted:      {}", result.interrupted);
    for error in &result.errors {
        println!("  - {}", error);
    }

    println!();
    if !result.is_ok() {
        println!("Region verification failed");
        return Err("Verification failed".into());
    }
    if result.interrupted > 0 {
        println!("Region verification passed (run `recover` to roll back interrupted transactions)");
    } else {
        println!("Region verification passed");
    }
    Ok(())
}

/// Checks every handle and every live log entry without modifying the region.
pub fn verify(path: &Path, magic: u64) -> Result<VerifyResult, Box<dyn std::error::Error>> {
    let (report, _, _) = read_report(path, magic)?;
    let heap = Heap::open(FileRegion::open(path)?)?;
    let memory = heap.memory();

    let mut result = VerifyResult::new();
    result.errors.extend(report.problems.iter().cloned());
    result.interrupted = report.interrupted().count();

    for handle in &report.handles {
        result.handles_checked += 1;
        if handle.tail > handle.capacity as u64 {
            result.errors.push(format!(
                "{}/{}: tail {} beyond capacity {}",
                handle.class, handle.index, handle.tail, handle.capacity
            ));
        }
        verify_entries(memory, handle, &mut result)?;
    }

    Ok(result)
}

fn verify_entries<M: PersistentMemory>(
    memory: &M,
    handle: &HandleReport,
    result: &mut VerifyResult,
) -> Result<(), Box<dyn std::error::Error>> {
    let log = LogArray::open(memory, handle.log)?;

    for index in 0..log.capacity() {
        let entry = log.read(memory, index)?;
        if !entry.is_live(handle.epoch) {
            continue;
        }
        result.entries_checked += 1;

        let size = entry.size as usize;
        if size == 0 {
            result.errors.push(format!(
                "{}/{} entry {}: zero-length undo record",
                handle.class, handle.index, index
            ));
        }
        if !memory.contains(entry.original, size) {
            result.errors.push(format!(
                "{}/{} entry {}: target {} outside heap",
                handle.class, handle.index, index, entry.original
            ));
        }
        if !memory.contains(entry.backup, size) {
            result.errors.push(format!(
                "{}/{} entry {}: backup {} outside heap",
                handle.class, handle.index, index, entry.backup
            ));
        }
    }
    Ok(())
}
