//! Type descriptor scan

use std::collections::BTreeSet;

use tracing::{debug, trace};

use crate::codec::ObjectCodec;
use crate::config::ScanConfig;
use crate::deadline::Deadline;
use crate::error::Result;
use crate::process::{ChunkedMemoryIterator, MemoryRegion, ReadMemory, RegionSet};

use super::scan_regions;

/// A type record found in memory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeDescriptor {
    pub address: u64,
    pub declared_name: String,
}

pub struct TypeDescriptorLocator<'a, R> {
    codec: &'a ObjectCodec<R>,
    config: &'a ScanConfig,
}

impl<'a, R: ReadMemory> TypeDescriptorLocator<'a, R> {
    pub fn new(codec: &'a ObjectCodec<R>, config: &'a ScanConfig) -> Self {
        Self { codec, config }
    }

    /// Every type record named `declared_name`, in address order.
    ///
    /// The same type can be allocated more than once, so this is a set.
    /// Unreadable chunks and candidates are skipped; the only error is the
    /// deadline expiring.
    pub fn find_type_descriptors(
        &self,
        regions: &[MemoryRegion],
        declared_name: &str,
        deadline: &Deadline,
    ) -> Result<Vec<TypeDescriptor>> {
        let layout = self.codec.layout();
        let header_size = layout.header_size();
        let pointers = RegionSet::new(regions);
        let reader = self.codec.reader();

        let mut found = BTreeSet::new();
        let mut scanned: u64 = 0;

        'regions: for region in scan_regions(regions, self.config, header_size) {
            for chunk in
                ChunkedMemoryIterator::over_region(reader, &region, self.config.chunk_size)
            {
                deadline.check()?;
                let chunk = match chunk {
                    Ok(chunk) => chunk,
                    Err(e) => {
                        trace!("Skipping unreadable chunk: {}", e);
                        continue;
                    }
                };
                scanned += chunk.data.len() as u64;

                for (address, word) in chunk.words() {
                    // `word` is the type pointer of the object starting at `candidate`
                    let Some(candidate) = address.checked_sub(layout.type_ptr) else {
                        continue;
                    };
                    if word == 0 || word % 8 != 0 || !pointers.contains(word, header_size) {
                        continue;
                    }
                    if !self.codec.is_metaclass(word) {
                        continue;
                    }
                    if self.codec.type_name_of_type(candidate).as_deref() == Some(declared_name) {
                        debug!(
                            "Type descriptor '{}' at 0x{:X}",
                            declared_name, candidate
                        );
                        found.insert(candidate);
                    }
                }

                if !found.is_empty()
                    && self
                        .config
                        .early_out_bytes
                        .is_some_and(|limit| scanned >= limit)
                {
                    debug!(
                        "Early out after {} MB with {} match(es)",
                        scanned / 1024 / 1024,
                        found.len()
                    );
                    break 'regions;
                }
            }
        }

        debug!(
            "Type scan for '{}': {} match(es) in {} MB",
            declared_name,
            found.len(),
            scanned / 1024 / 1024
        );
        Ok(found
            .into_iter()
            .map(|address| TypeDescriptor {
                address,
                declared_name: declared_name.to_string(),
            })
            .collect())
    }
}
