//! Mock memory reader for testing
//!
//! Provides a configurable mock implementation of the ReadMemory and
//! ProcessInfo traits backed by in-memory segments instead of a real process.
//! Clones share their memory and flags, so a test can keep one handle and
//! change what a worker-owned clone observes.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};

use crate::error::{Error, Result, UnavailableKind};
use crate::process::maps::MemoryRegion;
use crate::process::provider::{ProcessInfo, ProcessProvider};
use crate::process::reader::os_read_error;
use crate::process::{ReadMemory, check_user_range};

/// Base address used when none is given.
pub const DEFAULT_MOCK_BASE: u64 = 0x10_0000;

const DEFAULT_MOCK_PID: u32 = 4242;

#[derive(Debug, Clone)]
struct Segment {
    base: u64,
    data: Vec<u8>,
}

impl Segment {
    fn end(&self) -> u64 {
        self.base + self.data.len() as u64
    }
}

/// Mock memory reader for testing
#[derive(Debug, Clone)]
pub struct MockMemoryReader {
    segments: Arc<RwLock<Vec<Segment>>>,
    pid: u32,
    alive: Arc<AtomicBool>,
    unreadable: Arc<AtomicBool>,
    denied: Arc<AtomicBool>,
    version_hint: Option<String>,
}

impl MockMemoryReader {
    /// Create a new mock reader with the given data at the default base address
    pub fn new(data: Vec<u8>) -> Self {
        Self::with_base(data, DEFAULT_MOCK_BASE)
    }

    /// Create a new mock reader with custom base address
    pub fn with_base(data: Vec<u8>, base: u64) -> Self {
        Self::with_segments(vec![(base, data)])
    }

    /// Create a mock reader with several disjoint mapped segments
    pub fn with_segments(segments: Vec<(u64, Vec<u8>)>) -> Self {
        let mut segments: Vec<Segment> = segments
            .into_iter()
            .map(|(base, data)| Segment { base, data })
            .collect();
        segments.sort_by_key(|s| s.base);
        Self {
            segments: Arc::new(RwLock::new(segments)),
            pid: DEFAULT_MOCK_PID,
            alive: Arc::new(AtomicBool::new(true)),
            unreadable: Arc::new(AtomicBool::new(false)),
            denied: Arc::new(AtomicBool::new(false)),
            version_hint: None,
        }
    }

    pub fn with_pid(mut self, pid: u32) -> Self {
        self.pid = pid;
        self
    }

    pub fn with_version_hint(mut self, hint: &str) -> Self {
        self.version_hint = Some(hint.to_string());
        self
    }

    /// Base address of the lowest segment
    pub fn base(&self) -> u64 {
        self.read_segments()
            .first()
            .map(|s| s.base)
            .unwrap_or(DEFAULT_MOCK_BASE)
    }

    /// Total number of mapped bytes
    pub fn len(&self) -> usize {
        self.read_segments().iter().map(|s| s.data.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Simulate the process exiting; reads then fail at the process level.
    pub fn set_alive(&self, alive: bool) {
        self.alive.store(alive, Ordering::SeqCst);
    }

    /// Make every read fail as if the pages were unmapped.
    pub fn set_unreadable(&self, unreadable: bool) {
        self.unreadable.store(unreadable, Ordering::SeqCst);
    }

    /// Make every read fail the way a ptrace-restricted target does.
    pub fn set_denied(&self, denied: bool) {
        self.denied.store(denied, Ordering::SeqCst);
    }

    /// Overwrite a word of mapped memory in place.
    pub fn poke_u64(&self, address: u64, value: u64) -> Result<()> {
        let mut segments = self
            .segments
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let segment = segments
            .iter_mut()
            .find(|s| address >= s.base && address + 8 <= s.end())
            .ok_or_else(|| Error::unreadable(address, 8, "address not mapped"))?;
        let offset = (address - segment.base) as usize;
        segment.data[offset..offset + 8].copy_from_slice(&value.to_le_bytes());
        Ok(())
    }

    fn read_segments(&self) -> std::sync::RwLockReadGuard<'_, Vec<Segment>> {
        self.segments
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl ReadMemory for MockMemoryReader {
    fn read_bytes(&self, address: u64, size: usize) -> Result<Vec<u8>> {
        if !self.alive.load(Ordering::SeqCst) {
            return Err(Error::unavailable(
                self.pid,
                UnavailableKind::ProcessNotFound,
                "mock process exited",
            ));
        }
        check_user_range(address, size)?;
        if self.denied.load(Ordering::SeqCst) {
            let err = std::io::Error::from(std::io::ErrorKind::PermissionDenied);
            return Err(os_read_error(self.pid, address, size, &err));
        }
        if self.unreadable.load(Ordering::SeqCst) {
            return Err(Error::unreadable(address, size, "mock memory unreadable"));
        }

        let end = address + size as u64;
        let segments = self.read_segments();
        let segment = segments
            .iter()
            .find(|s| address >= s.base && end <= s.end())
            .ok_or_else(|| {
                Error::unreadable(
                    address,
                    size,
                    format!("Out of bounds: {:#x}..{:#x} is not mapped", address, end),
                )
            })?;
        let offset = (address - segment.base) as usize;
        Ok(segment.data[offset..offset + size].to_vec())
    }
}

impl ProcessInfo for MockMemoryReader {
    fn pid(&self) -> u32 {
        self.pid
    }

    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    fn regions(&self) -> Result<Vec<MemoryRegion>> {
        if !self.is_alive() {
            return Err(Error::RegionEnumerationFailed {
                pid: self.pid,
                reason: "mock process exited".to_string(),
            });
        }
        Ok(self
            .read_segments()
            .iter()
            .map(|s| MemoryRegion::new(s.base, s.end(), "rw-p", None))
            .collect())
    }

    fn runtime_version_hint(&self) -> Option<String> {
        self.version_hint.clone()
    }
}

/// Hands out clones of one mock process, counting how often it is opened.
#[derive(Debug, Clone)]
pub struct MockProcessProvider {
    reader: MockMemoryReader,
    opens: Arc<AtomicUsize>,
}

impl MockProcessProvider {
    pub fn new(reader: MockMemoryReader) -> Self {
        Self {
            reader,
            opens: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn open_count(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }
}

impl ProcessProvider for MockProcessProvider {
    type Process = MockMemoryReader;

    fn open_process(&self, pid: u32) -> Result<Self::Process> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        if pid != self.reader.pid || !self.reader.is_alive() {
            return Err(Error::unavailable(
                pid,
                UnavailableKind::ProcessNotFound,
                "mock process not running",
            ));
        }
        Ok(self.reader.clone())
    }
}

/// Builder for creating test memory buffers
///
/// Provides a fluent API for constructing memory layouts for testing.
#[derive(Debug, Clone)]
pub struct MockMemoryBuilder {
    data: Vec<u8>,
    base: u64,
}

impl Default for MockMemoryBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl MockMemoryBuilder {
    /// Create a new builder with the default base address
    pub fn new() -> Self {
        Self {
            data: Vec::new(),
            base: DEFAULT_MOCK_BASE,
        }
    }

    /// Set the base address for the mock reader
    pub fn base(mut self, base: u64) -> Self {
        self.base = base;
        self
    }

    /// Pre-allocate buffer with zeros up to the specified size
    pub fn with_size(mut self, size: usize) -> Self {
        self.ensure_size(size);
        self
    }

    /// Write an unsigned 32-bit integer at the specified offset from base
    pub fn write_u32(mut self, offset: usize, value: u32) -> Self {
        self.put(offset, &value.to_le_bytes());
        self
    }

    /// Write a signed 64-bit integer at the specified offset from base
    pub fn write_i64(mut self, offset: usize, value: i64) -> Self {
        self.put(offset, &value.to_le_bytes());
        self
    }

    /// Write an unsigned 64-bit integer at the specified offset from base
    pub fn write_u64(mut self, offset: usize, value: u64) -> Self {
        self.put(offset, &value.to_le_bytes());
        self
    }

    pub fn write_f64(mut self, offset: usize, value: f64) -> Self {
        self.put(offset, &value.to_le_bytes());
        self
    }

    /// Write raw bytes at the specified offset from base
    pub fn write_bytes(mut self, offset: usize, bytes: &[u8]) -> Self {
        self.put(offset, bytes);
        self
    }

    /// Write a null-terminated UTF-8 string at the specified offset
    pub fn write_cstring(mut self, offset: usize, text: &str) -> Self {
        self.put(offset, text.as_bytes());
        self.put(offset + text.len(), &[0]);
        self
    }

    /// Build the MockMemoryReader
    pub fn build(self) -> MockMemoryReader {
        MockMemoryReader::with_base(self.data, self.base)
    }

    fn put(&mut self, offset: usize, bytes: &[u8]) {
        self.ensure_size(offset + bytes.len());
        self.data[offset..offset + bytes.len()].copy_from_slice(bytes);
    }

    fn ensure_size(&mut self, required: usize) {
        if self.data.len() < required {
            self.data.resize(required, 0);
        }
    }
}
