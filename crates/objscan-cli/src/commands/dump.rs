//! Dump command: read one tree and write it out.

use std::io::IsTerminal;
use std::path::Path;
use std::time::Duration;

use anyhow::{Result, bail};
use objscan_core::codec::ObjectCodec;
use objscan_core::deadline::Deadline;
use objscan_core::graph::format::{OutputFormat, render};
use objscan_core::process::{ProcessHandle, ProcessInfo};
use objscan_core::worker::{FixedDelay, RetryStrategy};
use objscan_core::{EngineConfig, Locator, ObjectGraphReader, ObjectNode, RootAddressCache};
use tracing::{debug, warn};

use crate::cli_utils;

/// Tree reads race the target's own writes; a torn read usually succeeds on retry.
const READ_ATTEMPTS: u32 = 3;
const READ_RETRY_DELAY: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RootSource {
    Argument,
    Cache,
    Located,
}

pub fn run(
    pid: u32,
    root: Option<&str>,
    type_name: &str,
    format: OutputFormat,
    output: Option<&Path>,
    config: &EngineConfig,
    cache: Option<&RootAddressCache>,
) -> Result<()> {
    let process = cli_utils::open_process(pid)?;
    let hint = process.runtime_version_hint();
    let codec = ObjectCodec::new(process, config.layout);

    let (mut address, mut source) = match root {
        Some(root) => (cli_utils::parse_hex_address(root)?, RootSource::Argument),
        None => match cache.and_then(|c| c.get_matching(pid, hint.as_deref())) {
            Some(cached) => {
                eprintln!("Using cached root 0x{:X}", cached);
                (cached, RootSource::Cache)
            }
            None => (locate(&codec, type_name, config)?, RootSource::Located),
        },
    };

    let first = read_tree(&codec, address, config).and_then(|tree| match source {
        RootSource::Cache => expect_type(tree, type_name),
        _ => Ok(tree),
    });
    let tree = match first {
        Ok(tree) => tree,
        Err(e) if source == RootSource::Cache => {
            warn!("Cached root 0x{:X} unreadable: {}", address, e);
            if let Some(cache) = cache {
                cache.invalidate(pid)?;
            }
            address = locate(&codec, type_name, config)?;
            source = RootSource::Located;
            read_tree(&codec, address, config)?
        }
        Err(e) => return Err(e),
    };

    if source == RootSource::Located
        && let Some(cache) = cache
    {
        cache.set_with_hint(pid, address, hint)?;
    }

    let color = output.is_none() && std::io::stdout().is_terminal();
    let content = render(&tree, format, color)?;
    match output {
        Some(path) => {
            std::fs::write(path, &content)?;
            eprintln!("Wrote {} nodes to {}", tree.node_count(), path.display());
        }
        None => {
            print!("{}", content);
            if !content.ends_with('\n') {
                println!();
            }
            eprintln!("{} nodes from 0x{:X}", tree.node_count(), address);
        }
    }
    Ok(())
}

fn locate(
    codec: &ObjectCodec<ProcessHandle>,
    type_name: &str,
    config: &EngineConfig,
) -> Result<u64> {
    eprintln!("Locating '{}' root...", type_name);
    let regions = codec.reader().regions()?;
    let deadline = Deadline::new("locate", config.worker.locate_budget());
    let outcome = Locator::new(codec, &config.scan, &config.graph)
        .locate_root(&regions, type_name, &deadline)?;
    Ok(outcome.root_address)
}

fn read_tree(
    codec: &ObjectCodec<ProcessHandle>,
    root: u64,
    config: &EngineConfig,
) -> Result<ObjectNode> {
    let reader = ObjectGraphReader::new(codec, &config.graph);
    let tree = FixedDelay::new(READ_ATTEMPTS, READ_RETRY_DELAY).execute(|attempt| {
        if attempt > 0 {
            debug!("Retrying tree read at 0x{:X} (attempt {})", root, attempt + 1);
        }
        let deadline = Deadline::new("tree read", config.worker.read_budget());
        reader.read_tree_within(root, &deadline)
    })?;
    Ok(tree)
}

/// A cached address may since have been reused by an unrelated object.
fn expect_type(tree: ObjectNode, type_name: &str) -> Result<ObjectNode> {
    if tree.type_name.as_deref() != Some(type_name) {
        bail!(
            "Object at 0x{:X} is '{}', not '{}'",
            tree.address,
            tree.type_name.as_deref().unwrap_or("?"),
            type_name
        );
    }
    Ok(tree)
}
