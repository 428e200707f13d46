//! Inspect command implementation.

use super::format_size;
use serde::Serialize;
use std::path::Path;
use undolog_core::{inspect, HandleReport, PoolClass, RegionReport};
use undolog_pmem::{FileRegion, Heap, PersistentMemory};

/// Region inspection result.
#[derive(Debug, Serialize)]
pub struct InspectResult {
    /// Region path.
    pub path: String,
    /// Region size in bytes.
    pub region_size: u64,
    /// Bytes consumed by the heap.
    pub heap_used: u64,
    /// Address of the transaction header.
    pub header: u64,
    /// Header validity marker.
    pub magic: u64,
    /// Handles in the small pool.
    pub small_pool: usize,
    /// Handles in the large pool.
    pub large_pool: usize,
    /// Handles with an interrupted transaction.
    pub interrupted: usize,
    /// Handles that could not be read.
    pub problems: Vec<String>,
    /// Per-handle details (if requested).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub handles: Option<Vec<HandleStats>>,
}

/// State of a single handle.
#[derive(Debug, Serialize)]
pub struct HandleStats {
    /// Pool name.
    pub pool: String,
    /// Index within the pool.
    pub index: usize,
    /// Log capacity in entries.
    pub capacity: usize,
    /// Durable write cursor.
    pub tail: u64,
    /// Current epoch.
    pub epoch: u64,
    /// Entries recovery would replay.
    pub live_entries: usize,
    /// Nonzero entries left by finished cycles.
    pub stale_entries: usize,
}

impl From<&HandleReport> for HandleStats {
    fn from(report: &HandleReport) -> Self {
        Self {
            pool: report.class.to_string(),
            index: report.index,
            capacity: report.capacity,
            tail: report.tail,
            epoch: report.epoch,
            live_entries: report.live_entries,
            stale_entries: report.stale_entries,
        }
    }
}

/// Reads the engine state of the region at `path` without modifying it.
pub fn read_report(
    path: &Path,
    magic: u64,
) -> Result<(RegionReport, u64, u64), Box<dyn std::error::Error>> {
    if !path.exists() {
        return Err(format!("No region found at {:?}", path).into());
    }

    let heap = Heap::open(FileRegion::open(path)?)?;
    let root = heap.root()?;
    if root.is_null() {
        return Err(format!("Region at {:?} has no transaction header", path).into());
    }
    let report = inspect(heap.memory(), root, magic)?;
    Ok((report, heap.memory().size(), heap.used()?))
}

/// Runs the inspect command.
pub fn run(
    path: &Path,
    magic: u64,
    show_handles: bool,
    format: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let (report, region_size, heap_used) = read_report(path, magic)?;

    let result = InspectResult {
        path: path.display().to_string(),
        region_size,
        heap_used,
        header: report.header.as_u64(),
        magic: report.magic,
        small_pool: report.pool_size(PoolClass::Small),
        large_pool: report.pool_size(PoolClass::Large),
        interrupted: report.interrupted().count(),
        problems: report.problems.clone(),
        handles: show_handles.then(|| report.handles.iter().map(HandleStats::from).collect()),
    };

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        _ => {
            print_text_output(&result);
        }
    }

    Ok(())
}

fn print_text_output(result: &InspectResult) {
    println!("undolog Region Inspection");
    println!("=========================");
    println!();
    println!("Path: {}", result.path);
    println!();
    println!("Region:");
    println!("  Size:       {}", format_size(result.region_size));
    println!("  Heap used:  {}", format_size(result.heap_used));
    println!("  Header:     {:#x}", result.header);
    println!("  Magic:      {}", result.magic);
    println!();
    println!("Handles:");
    println!("  Small pool:   {}", result.small_pool);
    println!("  Large pool:   {}", result.large_pool);
    println!("  Interrupted:  {}", result.interrupted);

    if !result.problems.is_empty() {
        println!();
        println!("Problems:");
        for problem in &result.problems {
            println!("  {}", problem);
        }
    }

    if let Some(handles) = &result.handles {
        println!();
        println!("Logs:");
        for handle in handles {
            println!(
                "  [{}/{}] capacity {}, tail {}, epoch {}, {} live, {} stale",
                handle.pool,
                handle.index,
                handle.capacity,
                handle.tail,
                handle.epoch,
                handle.live_entries,
                handle.stale_entries
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::{init, EngineArgs};

    #[test]
    fn inspect_fresh_region() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("region.pmem");
        let args = EngineArgs {
            pool_size: 3,
            large_pool_size: 1,
            large_log_capacity: 16,
            ..EngineArgs::default()
        };
        init::run(&path, 1 << 20, false, &args).unwrap();

        let (report, size, used) = read_report(&path, args.magic).unwrap();
        assert!(report.is_clean());
        assert_eq!(report.pool_size(PoolClass::Small), 3);
        assert_eq!(report.pool_size(PoolClass::Large), 1);
        assert_eq!(size, 1 << 20);
        assert!(used > 0);
    }

    #[test]
    fn inspect_wrong_magic_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("region.pmem");
        let args = EngineArgs {
            pool_size: 1,
            large_pool_size: 0,
            ..EngineArgs::default()
        };
        init::run(&path, 1 << 20, false, &args).unwrap();

        assert!(read_report(&path, args.magic + 1).is_err());
    }
}
