//! Memory region enumeration.
//!
//! Regions come from the per-process mapping table (`/proc/<pid>/maps`).
//! Every scan is bounded to the readable regions listed here.

use std::fs;

use serde::Serialize;
use tracing::{debug, trace};

use crate::error::{Error, Result};

/// One mapping of the target's address space.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MemoryRegion {
    pub start: u64,
    pub end: u64,
    pub perms: String,
    pub path: Option<String>,
}

impl MemoryRegion {
    pub fn new(start: u64, end: u64, perms: &str, path: Option<&str>) -> Self {
        Self {
            start,
            end,
            perms: perms.to_string(),
            path: path.map(|p| p.to_string()),
        }
    }

    pub fn size(&self) -> u64 {
        self.end.saturating_sub(self.start)
    }

    /// False unless the permission field is well-formed and grants read.
    pub fn is_readable(&self) -> bool {
        self.perms_valid() && self.perms.starts_with('r')
    }

    /// False unless the permission field is well-formed and grants write.
    pub fn is_writable(&self) -> bool {
        self.perms_valid() && self.perms.as_bytes()[1] == b'w'
    }

    pub fn contains(&self, address: u64) -> bool {
        address >= self.start && address < self.end
    }

    /// Kernel-provided pages that fault or hang on cross-process reads.
    pub fn is_special(&self) -> bool {
        matches!(
            self.path.as_deref(),
            Some("[vvar]") | Some("[vvar_vclock]") | Some("[vsyscall]")
        )
    }

    fn perms_valid(&self) -> bool {
        let bytes = self.perms.as_bytes();
        bytes.len() == 4
            && matches!(bytes[0], b'r' | b'-')
            && matches!(bytes[1], b'w' | b'-')
            && matches!(bytes[2], b'x' | b'-')
            && matches!(bytes[3], b'p' | b's')
    }
}

/// Parse the contents of a mapping table. Malformed lines are skipped.
///
/// Line format: `start-end perms offset dev inode [path]`.
pub fn parse_maps(content: &str) -> Vec<MemoryRegion> {
    let mut regions = Vec::new();

    for line in content.lines() {
        let mut parts = line.split_whitespace();
        let Some(range) = parts.next() else {
            continue;
        };
        let Some((start, end)) = range.split_once('-') else {
            trace!("Skipping maps line without range: {}", line);
            continue;
        };
        let (Ok(start), Ok(end)) = (u64::from_str_radix(start, 16), u64::from_str_radix(end, 16))
        else {
            trace!("Skipping maps line with bad range: {}", line);
            continue;
        };
        if end <= start {
            continue;
        }

        let perms = parts.next().unwrap_or("");
        // offset, dev, inode
        let path = parts.nth(3).map(|first| {
            let rest: Vec<&str> = parts.collect();
            if rest.is_empty() {
                first.to_string()
            } else {
                format!("{} {}", first, rest.join(" "))
            }
        });

        regions.push(MemoryRegion {
            start,
            end,
            perms: perms.to_string(),
            path,
        });
    }

    regions.sort_by_key(|r| r.start);
    regions
}

/// List the mapped regions of a process, ordered by start address.
pub fn list_regions(pid: u32) -> Result<Vec<MemoryRegion>> {
    let path = format!("/proc/{}/maps", pid);
    let content = fs::read_to_string(&path).map_err(|e| Error::RegionEnumerationFailed {
        pid,
        reason: format!("{}: {}", path, e),
    })?;
    let regions = parse_maps(&content);
    debug!("Process {} has {} mapped regions", pid, regions.len());
    Ok(regions)
}

/// Regions worth scanning: readable, not special, at least `min_size` bytes.
pub fn scannable_regions(regions: &[MemoryRegion], min_size: u64) -> Vec<MemoryRegion> {
    regions
        .iter()
        .filter(|r| r.is_readable() && !r.is_special() && r.size() >= min_size)
        .cloned()
        .collect()
}

/// Sorted, readable regions supporting fast "could this pointer be valid" checks.
#[derive(Debug, Clone, Default)]
pub struct RegionSet {
    ranges: Vec<(u64, u64)>,
}

impl RegionSet {
    pub fn new(regions: &[MemoryRegion]) -> Self {
        let mut ranges: Vec<(u64, u64)> = regions
            .iter()
            .filter(|r| r.is_readable())
            .map(|r| (r.start, r.end))
            .collect();
        ranges.sort_unstable();
        Self { ranges }
    }

    /// Whether `[address, address + len)` lies inside one readable region.
    pub fn contains(&self, address: u64, len: u64) -> bool {
        let Some(end) = address.checked_add(len) else {
            return false;
        };
        let idx = self.ranges.partition_point(|&(start, _)| start <= address);
        idx > 0 && {
            let (_, region_end) = self.ranges[idx - 1];
            end <= region_end
        }
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }
}
