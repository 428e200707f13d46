//! Recover command implementation.

use super::EngineArgs;
use serde::Serialize;
use std::path::Path;
use undolog_core::Engine;
use undolog_pmem::{FileRegion, Heap};

/// Recovery result.
#[derive(Debug, Serialize)]
pub struct RecoverResult {
    /// Region path.
    pub path: String,
    /// Handles scanned.
    pub handles: usize,
    /// Handles that held an interrupted transaction.
    pub interrupted: usize,
    /// Log entries replayed.
    pub replayed: usize,
}

/// Runs the recover command.
///
/// Opening the engine rolls back every interrupted transaction; the result
/// reports what was undone.
pub fn run(path: &Path, args: &EngineArgs, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let result = recover(path, args)?;

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        _ => {
            println!("Recovered region at {}", result.path);
            println!("  Handles scanned:      {}", result.handles);
            println!("  Interrupted handles:  {}", result.interrupted);
            println!("  Entries replayed:     {}", result.replayed);
        }
    }
    Ok(())
}

/// Opens the region and runs recovery.
pub fn recover(path: &Path, args: &EngineArgs) -> Result<RecoverResult, Box<dyn std::error::Error>> {
    if !path.exists() {
        return Err(format!("No region found at {:?}", path).into());
    }

    let heap = Heap::open(FileRegion::open(path)?)?;
    if heap.root()?.is_null() {
        return Err(format!("Region at {:?} has no transaction header", path).into());
    }
    let engine = Engine::open(heap, args.config())?;
    let summary = engine.recovery().unwrap_or_default();

    Ok(RecoverResult {
        path: path.display().to_string(),
        handles: summary.handles,
        interrupted: summary.interrupted,
        replayed: summary.replayed,
    })
}
