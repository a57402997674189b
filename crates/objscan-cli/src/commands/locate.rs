//! Locate command: run the full discovery pipeline once.

use std::fmt::Write as _;
use std::time::Instant;

use anyhow::Result;
use objscan_core::codec::ObjectCodec;
use objscan_core::deadline::Deadline;
use objscan_core::process::ProcessInfo;
use objscan_core::{EngineConfig, LocateOutcome, Locator, RootAddressCache};

use crate::cli_utils;

pub fn run(
    pid: u32,
    type_name: &str,
    type_address: Option<&str>,
    config: &EngineConfig,
    cache: Option<&RootAddressCache>,
    json: bool,
) -> Result<()> {
    let current_version = env!("CARGO_PKG_VERSION");
    eprintln!("objscan {} - Locate", current_version);

    let process = cli_utils::open_process(pid)?;
    eprintln!("Opened PID {} ({} backend)", process.pid, process.backend());

    let regions = process.regions()?;
    let hint = process.runtime_version_hint();
    let codec = ObjectCodec::new(process, config.layout);
    let locator = Locator::new(&codec, &config.scan, &config.graph);
    let deadline = Deadline::new("locate", config.worker.locate_budget());

    eprintln!(
        "Scanning {} region(s) for '{}'...",
        regions.len(),
        type_name
    );
    let started = Instant::now();
    let outcome = match type_address {
        Some(address) => {
            let address = cli_utils::parse_hex_address(address)?;
            locator.locate_root_from_types(&regions, type_name, &[address], &deadline)?
        }
        None => locator.locate_root(&regions, type_name, &deadline)?,
    };
    eprintln!("Done in {:.1?}", started.elapsed());

    if json {
        println!("{}", serde_json::to_string_pretty(&outcome)?);
    } else {
        print!("{}", format_outcome(&outcome));
    }

    if let Some(cache) = cache {
        cache.set_with_hint(pid, outcome.root_address, hint)?;
        eprintln!("Cached root in {}", cache.path().display());
    }
    Ok(())
}

fn format_outcome(outcome: &LocateOutcome) -> String {
    let mut output = String::new();
    let _ = writeln!(output, "Type descriptors:");
    for address in &outcome.type_descriptors {
        let _ = writeln!(output, "  0x{:X}", address);
    }
    let _ = writeln!(output, "Candidates:");
    for probe in &outcome.candidates {
        let marker = if probe.address == outcome.root_address {
            "*"
        } else {
            " "
        };
        match probe.node_count {
            Some(count) => {
                let _ = writeln!(output, "{} 0x{:X}  {} nodes", marker, probe.address, count);
            }
            None => {
                let _ = writeln!(output, "{} 0x{:X}  walk failed", marker, probe.address);
            }
        }
    }
    let _ = writeln!(
        output,
        "Root: 0x{:X} ({} nodes)",
        outcome.root_address, outcome.node_count
    );
    output
}
