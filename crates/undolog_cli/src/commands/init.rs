//! Init command implementation.

use super::{format_size, EngineArgs};
use std::path::Path;
use tracing::info;
use undolog_core::{Engine, PoolClass};
use undolog_pmem::{FileRegion, Heap};

/// Runs the init command.
///
/// Creates the region file, formats the heap and installs a transaction
/// header at the heap's root slot.
pub fn run(
    path: &Path,
    size: u64,
    force: bool,
    args: &EngineArgs,
) -> Result<(), Box<dyn std::error::Error>> {
    if path.exists() && !force {
        return Err(format!("Region already exists at {:?} (use --force to replace)", path).into());
    }

    let region = FileRegion::create(path, size)?;
    let heap = Heap::format(region)?;
    let engine = Engine::open(heap, args.config())?;
    info!(path = %path.display(), size, "initialized region");

    println!("Initialized region at {:?}", path);
    println!("  Size:        {}", format_size(size));
    println!("  Header:      {}", engine.header_addr());
    println!(
        "  Small pool:  {} handles x {} entries",
        engine.header().records(PoolClass::Small).len(),
        args.log_capacity
    );
    println!(
        "  Large pool:  {} handles x {} entries",
        engine.header().records(PoolClass::Large).len(),
        args.large_log_capacity
    );
    println!("  Heap used:   {}", format_size(engine.heap().used()?));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_refuses_existing_region() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("region.pmem");
        let args = EngineArgs::default();

        run(&path, 4 << 20, false, &args).unwrap();
        assert!(run(&path, 4 << 20, false, &args).is_err());
        run(&path, 4 << 20, true, &args).unwrap();
    }
}
