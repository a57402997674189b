//! Persistent root address cache.
//!
//! A single JSON object keyed by decimal process id:
//!
//! ```json
//! {
//!   "4242": {
//!     "root_address": 94558711382016,
//!     "discovered_at": "2026-10-17T08:00:00Z",
//!     "runtime_version_hint": "/usr/bin/client@1760688000"
//!   }
//! }
//! ```
//!
//! Every lookup failure is a miss. Entries that are malformed, older than the
//! TTL or recorded against a different executable are dropped on read.

use std::collections::BTreeMap;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::config::CacheConfig;
use crate::error::{Error, Result};

type RawEntries = BTreeMap<String, Value>;

/// One remembered root address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RootAddressCacheEntry {
    pub process_id: u32,
    pub root_address: u64,
    pub discovered_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub runtime_version_hint: Option<String>,
}

impl RootAddressCacheEntry {
    pub fn new(process_id: u32, root_address: u64) -> Self {
        Self {
            process_id,
            root_address,
            discovered_at: Utc::now(),
            runtime_version_hint: None,
        }
    }

    /// Age at `now`; `None` when the timestamp lies in the future.
    pub fn age(&self, now: DateTime<Utc>) -> Option<Duration> {
        now.signed_duration_since(self.discovered_at).to_std().ok()
    }

    pub fn is_fresh(&self, ttl: Duration, now: DateTime<Utc>) -> bool {
        self.age(now).is_some_and(|age| age < ttl)
    }
}

/// On-disk record; the pid is the map key.
#[derive(Debug, Serialize, Deserialize)]
struct StoredEntry {
    root_address: u64,
    discovered_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    runtime_version_hint: Option<String>,
}

impl StoredEntry {
    fn into_entry(self, process_id: u32) -> RootAddressCacheEntry {
        RootAddressCacheEntry {
            process_id,
            root_address: self.root_address,
            discovered_at: self.discovered_at,
            runtime_version_hint: self.runtime_version_hint,
        }
    }
}

impl From<&RootAddressCacheEntry> for StoredEntry {
    fn from(entry: &RootAddressCacheEntry) -> Self {
        Self {
            root_address: entry.root_address,
            discovered_at: entry.discovered_at,
            runtime_version_hint: entry.runtime_version_hint.clone(),
        }
    }
}

fn decode(key: &str, value: &Value) -> Option<RootAddressCacheEntry> {
    let process_id: u32 = key.parse().ok()?;
    let stored: StoredEntry = serde_json::from_value(value.clone()).ok()?;
    if stored.root_address == 0 {
        return None;
    }
    Some(stored.into_entry(process_id))
}

#[derive(Debug, Clone)]
pub struct RootAddressCache {
    path: PathBuf,
    ttl: Duration,
}

impl RootAddressCache {
    pub fn new<P: Into<PathBuf>>(path: P, ttl: Duration) -> Self {
        Self {
            path: path.into(),
            ttl,
        }
    }

    pub fn from_config(config: &CacheConfig) -> Self {
        Self::new(
            config.resolved_path(),
            Duration::from_secs(config.ttl_hours.saturating_mul(3600)),
        )
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Cached root of `pid`, if a fresh entry exists.
    pub fn get(&self, pid: u32) -> Option<u64> {
        self.lookup(pid, None).map(|entry| entry.root_address)
    }

    /// Like [`get`](Self::get), but an entry recorded with a different
    /// runtime version hint is stale. Entries or callers without a hint match.
    pub fn get_matching(&self, pid: u32, hint: Option<&str>) -> Option<u64> {
        self.lookup(pid, hint).map(|entry| entry.root_address)
    }

    pub fn set(&self, pid: u32, root_address: u64) -> Result<()> {
        self.insert(RootAddressCacheEntry::new(pid, root_address))
    }

    pub fn set_with_hint(&self, pid: u32, root_address: u64, hint: Option<String>) -> Result<()> {
        self.insert(RootAddressCacheEntry {
            runtime_version_hint: hint,
            ..RootAddressCacheEntry::new(pid, root_address)
        })
    }

    /// Store `entry`, keeping every other pid's record.
    ///
    /// An unparsable file is replaced.
    pub fn insert(&self, entry: RootAddressCacheEntry) -> Result<()> {
        let mut raw = self.load_raw().unwrap_or_else(|e| {
            warn!("Replacing unreadable root cache {}: {}", self.path.display(), e);
            RawEntries::new()
        });
        raw.insert(
            entry.process_id.to_string(),
            serde_json::to_value(StoredEntry::from(&entry))?,
        );
        self.store(&raw)?;
        debug!(
            "Cached root 0x{:X} for pid {}",
            entry.root_address, entry.process_id
        );
        Ok(())
    }

    /// Drop the entry of `pid`. Missing entries and files are not an error.
    pub fn invalidate(&self, pid: u32) -> Result<()> {
        let mut raw = match self.load_raw() {
            Ok(raw) => raw,
            Err(Error::CacheCorrupt(reason)) => {
                warn!("Root cache corrupt, discarding: {}", reason);
                return self.clear();
            }
            Err(e) => return Err(e),
        };
        if raw.remove(&pid.to_string()).is_some() {
            self.store(&raw)?;
            info!("Invalidated cached root for pid {}", pid);
        }
        Ok(())
    }

    /// Every well-formed entry in pid order, stale ones included.
    pub fn entries(&self) -> Result<Vec<RootAddressCacheEntry>> {
        let raw = self.load_raw()?;
        let mut entries: Vec<RootAddressCacheEntry> = raw
            .iter()
            .filter_map(|(key, value)| decode(key, value))
            .collect();
        entries.sort_by_key(|entry| entry.process_id);
        Ok(entries)
    }

    /// Remove the cache file.
    pub fn clear(&self) -> Result<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn lookup(&self, pid: u32, hint: Option<&str>) -> Option<RootAddressCacheEntry> {
        let raw = match self.load_raw() {
            Ok(raw) => raw,
            Err(e) => {
                warn!("Root cache miss for pid {}: {}", pid, e);
                return None;
            }
        };
        let value = raw.get(&pid.to_string())?;

        let reason = match decode(&pid.to_string(), value) {
            None => "malformed",
            Some(entry) if !entry.is_fresh(self.ttl, Utc::now()) => "expired",
            Some(entry) => match (hint, entry.runtime_version_hint.as_deref()) {
                (Some(expected), Some(stored)) if expected != stored => "runtime changed",
                _ => return Some(entry),
            },
        };

        debug!("Dropping {} root cache entry for pid {}", reason, pid);
        if let Err(e) = self.invalidate(pid) {
            warn!("Failed to drop root cache entry for pid {}: {}", pid, e);
        }
        None
    }

    fn load_raw(&self) -> Result<RawEntries> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(RawEntries::new()),
            Err(e) => return Err(e.into()),
        };
        if content.trim().is_empty() {
            return Ok(RawEntries::new());
        }
        serde_json::from_str(&content)
            .map_err(|e| Error::CacheCorrupt(format!("{}: {}", self.path.display(), e)))
    }

    /// Write through a temp file in the same directory, then rename.
    fn store(&self, raw: &RawEntries) -> Result<()> {
        let dir = match self.path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir,
            _ => Path::new("."),
        };
        fs::create_dir_all(dir)?;

        let mut file = tempfile::NamedTempFile::new_in(dir)?;
        serde_json::to_writer_pretty(&mut file, raw)?;
        file.write_all(b"\n")?;
        file.as_file().sync_all()?;
        file.persist(&self.path).map_err(|e| e.error)?;
        Ok(())
    }
}
