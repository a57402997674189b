//! Region scans in bounded reads.
//!
//! A scan never holds more than one chunk of a region at a time, so a
//! multi-gigabyte heap costs `chunk_size` bytes of scanner memory.

use super::{MemoryRegion, ReadMemory};
use crate::error::Result;

/// Default chunk size for region scans (4MB).
pub const DEFAULT_CHUNK_SIZE: usize = 4 * 1024 * 1024;

const WORD: usize = 8;

/// Bytes read from one slice of a region.
#[derive(Debug)]
pub struct MemoryChunk {
    pub address: u64,
    pub data: Vec<u8>,
}

impl MemoryChunk {
    /// Pointer-aligned words of the chunk as `(address, value)`.
    pub fn words(&self) -> impl Iterator<Item = (u64, u64)> + '_ {
        let skip = (WORD - (self.address % WORD as u64) as usize) % WORD;
        let base = self.address + skip as u64;
        self.data
            .get(skip..)
            .unwrap_or_default()
            .chunks_exact(WORD)
            .zip((0u64..).step_by(WORD))
            .map(move |(word, offset)| {
                let mut raw = [0u8; WORD];
                raw.copy_from_slice(word);
                (base + offset, u64::from_le_bytes(raw))
            })
    }
}

/// Walks `[start, end)` one chunk at a time.
///
/// A chunk that cannot be read comes back as `Err` and the walk continues
/// with the next one; whether a hole ends the scan is up to the caller.
/// Chunk sizes are rounded down to a whole number of words so that no
/// aligned word straddles two chunks.
pub struct ChunkedMemoryIterator<'a, R: ReadMemory> {
    reader: &'a R,
    next: u64,
    end: u64,
    chunk_size: u64,
}

impl<'a, R: ReadMemory> ChunkedMemoryIterator<'a, R> {
    pub fn new(reader: &'a R, start: u64, end: u64, chunk_size: usize) -> Self {
        let chunk_size = (chunk_size - chunk_size % WORD).max(WORD) as u64;
        Self {
            reader,
            next: start,
            end: end.max(start),
            chunk_size,
        }
    }

    pub fn over_region(reader: &'a R, region: &MemoryRegion, chunk_size: usize) -> Self {
        Self::new(reader, region.start, region.end, chunk_size)
    }

    /// Bytes not yet handed out.
    pub fn remaining(&self) -> u64 {
        self.end - self.next
    }
}

impl<R: ReadMemory> Iterator for ChunkedMemoryIterator<'_, R> {
    type Item = Result<MemoryChunk>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.next >= self.end {
            return None;
        }
        let address = self.next;
        let len = self.chunk_size.min(self.end - address);
        self.next += len;

        Some(
            self.reader
                .read_bytes(address, len as usize)
                .map(|data| MemoryChunk { address, data }),
        )
    }
}
