//! Root object discovery.
//!
//! Cold-start pipeline:
//! 1. Scan readable memory for type records carrying the root's type name
//! 2. Scan for objects pointing at any of those records and validate them
//! 3. Walk the full tree from every validated candidate and keep the largest
//!
//! A spurious match validates structurally but is disconnected from the live
//! graph, so it reads as a handful of nodes; the real root reads as thousands.

mod instances;
mod types;

pub use instances::InstanceLocator;
pub use types::{TypeDescriptor, TypeDescriptorLocator};

use serde::Serialize;
use tracing::{debug, info};

use crate::codec::ObjectCodec;
use crate::config::{GraphConfig, ScanConfig};
use crate::deadline::Deadline;
use crate::error::{Error, Result};
use crate::graph::ObjectGraphReader;
use crate::process::{MemoryRegion, ReadMemory, scannable_regions};

/// Regions the scans visit: readable, non-special, large enough.
pub(crate) fn scan_regions(
    regions: &[MemoryRegion],
    config: &ScanConfig,
    header_size: u64,
) -> Vec<MemoryRegion> {
    scannable_regions(regions, config.min_region_size.max(header_size))
}

/// Full-walk result of one validated candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CandidateProbe {
    pub address: u64,
    /// `None` when the walk from this candidate failed.
    pub node_count: Option<usize>,
}

impl CandidateProbe {
    /// More nodes wins; equal counts keep the lower address.
    pub fn is_better_than(&self, other: &Self) -> bool {
        (self.node_count, std::cmp::Reverse(self.address))
            > (other.node_count, std::cmp::Reverse(other.address))
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct LocateOutcome {
    pub root_address: u64,
    pub node_count: usize,
    pub type_descriptors: Vec<u64>,
    pub candidates: Vec<CandidateProbe>,
}

pub struct Locator<'a, R> {
    codec: &'a ObjectCodec<R>,
    scan: &'a ScanConfig,
    graph: &'a GraphConfig,
}

impl<'a, R: ReadMemory> Locator<'a, R> {
    pub fn new(codec: &'a ObjectCodec<R>, scan: &'a ScanConfig, graph: &'a GraphConfig) -> Self {
        Self { codec, scan, graph }
    }

    /// Run the whole pipeline for objects of type `type_name`.
    pub fn locate_root(
        &self,
        regions: &[MemoryRegion],
        type_name: &str,
        deadline: &Deadline,
    ) -> Result<LocateOutcome> {
        let descriptors = TypeDescriptorLocator::new(self.codec, self.scan)
            .find_type_descriptors(regions, type_name, deadline)?;
        let type_addresses: Vec<u64> = descriptors.iter().map(|t| t.address).collect();
        self.locate_root_from_types(regions, type_name, &type_addresses, deadline)
    }

    /// Run the pipeline from already known type records.
    pub fn locate_root_from_types(
        &self,
        regions: &[MemoryRegion],
        type_name: &str,
        type_addresses: &[u64],
        deadline: &Deadline,
    ) -> Result<LocateOutcome> {
        let exhausted = || Error::LocatePipelineExhausted {
            type_name: type_name.to_string(),
        };
        if type_addresses.is_empty() {
            debug!("No type descriptor named '{}'", type_name);
            return Err(exhausted());
        }

        let instances = InstanceLocator::new(self.codec, self.scan);
        let candidates: Vec<u64> = instances
            .find_instances_of_any(regions, type_addresses, deadline)?
            .into_iter()
            .filter(|&address| instances.validate(address))
            .collect();
        debug!(
            "{} validated candidate(s) for '{}'",
            candidates.len(),
            type_name
        );

        let (best, probes) = self.select_root(&candidates, deadline)?;
        let Some(best) = best else {
            return Err(exhausted());
        };
        let node_count = best.node_count.unwrap_or(0);
        info!(
            "Located '{}' root at 0x{:X} ({} nodes, {} candidate(s))",
            type_name,
            best.address,
            node_count,
            probes.len()
        );

        Ok(LocateOutcome {
            root_address: best.address,
            node_count,
            type_descriptors: type_addresses.to_vec(),
            candidates: probes,
        })
    }

    /// Walk every candidate and pick the one reaching the most nodes.
    ///
    /// Candidates whose walk fails are reported but never selected.
    pub fn select_root(
        &self,
        candidates: &[u64],
        deadline: &Deadline,
    ) -> Result<(Option<CandidateProbe>, Vec<CandidateProbe>)> {
        let reader = ObjectGraphReader::new(self.codec, self.graph);
        let mut best: Option<CandidateProbe> = None;
        let mut probes = Vec::with_capacity(candidates.len());

        for &address in candidates {
            let node_count = match reader.read_tree_within(address, deadline) {
                Ok(tree) => Some(tree.node_count()),
                Err(e @ Error::Timeout { .. }) => return Err(e),
                Err(e) => {
                    debug!("  Candidate 0x{:X}: walk failed: {}", address, e);
                    None
                }
            };
            let probe = CandidateProbe {
                address,
                node_count,
            };
            debug!("  Candidate 0x{:X}: {:?} nodes", address, node_count);
            probes.push(probe);

            if probe.node_count.is_none() {
                continue;
            }
            let is_better = match &best {
                None => true,
                Some(current) => probe.is_better_than(current),
            };
            if is_better {
                best = Some(probe);
            }
        }
        Ok((best, probes))
    }
}
