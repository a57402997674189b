//! Regions command: print the address space of a process.

use std::fmt::Write as _;

use anyhow::Result;
use objscan_core::process::{MemoryRegion, list_regions};

pub fn run(pid: u32, all: bool, json: bool) -> Result<()> {
    let regions: Vec<MemoryRegion> = list_regions(pid)?
        .into_iter()
        .filter(|r| all || (r.is_readable() && !r.is_special()))
        .collect();

    if json {
        println!("{}", serde_json::to_string_pretty(&regions)?);
        return Ok(());
    }

    print!("{}", format_regions(&regions));
    let total: u64 = regions.iter().map(MemoryRegion::size).sum();
    eprintln!(
        "{} region(s), {:.1} MB",
        regions.len(),
        total as f64 / 1024.0 / 1024.0
    );
    Ok(())
}

fn format_regions(regions: &[MemoryRegion]) -> String {
    let mut output = String::new();
    let _ = writeln!(
        output,
        "{:<16} {:<16} {:<5} {:>12}  PATH",
        "START", "END", "PERMS", "SIZE"
    );
    for region in regions {
        let _ = writeln!(
            output,
            "{:016X} {:016X} {:<5} {:>12}  {}",
            region.start,
            region.end,
            region.perms,
            region.size(),
            region.path.as_deref().unwrap_or("")
        );
    }
    output
}
