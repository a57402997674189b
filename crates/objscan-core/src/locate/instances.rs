//! Instance scan and validation

use std::collections::BTreeSet;

use tracing::{debug, trace};

use crate::codec::ObjectCodec;
use crate::config::ScanConfig;
use crate::config::limits::MAX_REFCOUNT;
use crate::deadline::Deadline;
use crate::error::Result;
use crate::process::{ChunkedMemoryIterator, MemoryRegion, ReadMemory};

use super::scan_regions;

pub struct InstanceLocator<'a, R> {
    codec: &'a ObjectCodec<R>,
    config: &'a ScanConfig,
}

impl<'a, R: ReadMemory> InstanceLocator<'a, R> {
    pub fn new(codec: &'a ObjectCodec<R>, config: &'a ScanConfig) -> Self {
        Self { codec, config }
    }

    /// Addresses of every object whose type pointer is `type_address`.
    pub fn find_instances(
        &self,
        regions: &[MemoryRegion],
        type_address: u64,
        deadline: &Deadline,
    ) -> Result<Vec<u64>> {
        self.find_instances_of_any(regions, &[type_address], deadline)
    }

    /// One pass over memory collecting objects of any of the given types.
    /// Candidates are unvalidated and returned in address order.
    pub fn find_instances_of_any(
        &self,
        regions: &[MemoryRegion],
        type_addresses: &[u64],
        deadline: &Deadline,
    ) -> Result<Vec<u64>> {
        let layout = self.codec.layout();
        let types: BTreeSet<u64> = type_addresses.iter().copied().collect();
        let reader = self.codec.reader();
        let mut found = BTreeSet::new();

        if types.is_empty() {
            return Ok(Vec::new());
        }

        for region in scan_regions(regions, self.config, layout.header_size()) {
            for chunk in
                ChunkedMemoryIterator::over_region(reader, &region, self.config.chunk_size)
            {
                deadline.check()?;
                let Ok(chunk) = chunk else {
                    continue;
                };
                for (address, word) in chunk.words() {
                    if !types.contains(&word) {
                        continue;
                    }
                    match address.checked_sub(layout.type_ptr) {
                        Some(candidate) if !types.contains(&candidate) => {
                            found.insert(candidate);
                        }
                        _ => {}
                    }
                }
            }
        }

        debug!(
            "Instance scan: {} candidate(s) for {} type(s)",
            found.len(),
            types.len()
        );
        Ok(found.into_iter().collect())
    }

    /// Plausible reference count and a reachable attribute dict.
    pub fn validate(&self, address: u64) -> bool {
        let Ok(header) = self.codec.header(address) else {
            return false;
        };
        if header.refcount <= 0 || header.refcount > MAX_REFCOUNT {
            trace!(
                "Candidate 0x{:X} rejected: refcount {}",
                address, header.refcount
            );
            return false;
        }
        if self.codec.instance_dict(address).is_none() {
            trace!("Candidate 0x{:X} rejected: no attribute dict", address);
            return false;
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixture::SyntheticHeap;
    use crate::process::ProcessInfo;
    use crate::process::layout::ObjectLayout;

    #[test]
    fn test_find_and_validate_instances() {
        let mut heap = SyntheticHeap::new();
        let class = heap.class("UIRoot");
        let good = heap.instance(class, &[]);
        let zero_refs = heap.instance(class, &[]);
        heap.set_i64(zero_refs, 0);
        let huge_refs = heap.instance(class, &[]);
        heap.set_i64(huge_refs, MAX_REFCOUNT + 1);
        let no_dict = heap.instance(class, &[]);
        heap.set_u64(no_dict + 0x10, 0);

        let reader = heap.build();
        let regions = reader.regions().unwrap();
        let codec = ObjectCodec::new(reader, ObjectLayout::default());
        let config = ScanConfig::default();
        let locator = InstanceLocator::new(&codec, &config);

        let candidates = locator
            .find_instances(&regions, class, &Deadline::unbounded("instance scan"))
            .unwrap();
        assert_eq!(candidates, vec![good, zero_refs, huge_refs, no_dict]);

        let valid: Vec<u64> = candidates
            .into_iter()
            .filter(|&c| locator.validate(c))
            .collect();
        assert_eq!(valid, vec![good]);
    }

    #[test]
    fn test_max_refcount_is_accepted() {
        let mut heap = SyntheticHeap::new();
        let class = heap.class("UIRoot");
        let instance = heap.instance(class, &[]);
        heap.set_i64(instance, MAX_REFCOUNT);

        let codec = ObjectCodec::new(heap.build(), ObjectLayout::default());
        let config = ScanConfig::default();
        assert!(InstanceLocator::new(&codec, &config).validate(instance));
    }

    #[test]
    fn test_no_types_no_scan() {
        let heap = SyntheticHeap::new();
        let reader = heap.build();
        let regions = reader.regions().unwrap();
        let codec = ObjectCodec::new(reader, ObjectLayout::default());
        let config = ScanConfig::default();

        let found = InstanceLocator::new(&codec, &config)
            .find_instances_of_any(&regions, &[], &Deadline::unbounded("instance scan"))
            .unwrap();
        assert!(found.is_empty());
    }
}
