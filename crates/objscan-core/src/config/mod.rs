//! Engine configuration.
//!
//! This module contains:
//! - `EngineConfig` and its sections, loaded from TOML
//! - Safety limits applied to every length field read from target memory
//! - Retry, timing and scan constants used as defaults

mod engine;

pub use engine::*;

/// Upper bounds for values read from target memory.
///
/// Every length or count decoded from the target is checked against these
/// before it sizes a subsequent read.
pub mod limits {
    /// Longest byte or wide string decoded, in characters.
    pub const MAX_STRING_LEN: usize = 4096;

    /// Longest list or tuple decoded.
    pub const MAX_LIST_SIZE: usize = 4096;

    /// Largest dict table (`mask + 1` slots) decoded.
    pub const MAX_DICT_SIZE: usize = 4096;

    /// Deepest recursion of a graph read.
    pub const MAX_DEPTH: usize = 64;

    /// Largest plausible reference count of a live instance.
    pub const MAX_REFCOUNT: i64 = 10_000_000;

    /// Longest type name read from a type record.
    pub const MAX_TYPE_NAME_LEN: usize = 128;

    /// Lowest address considered user-space memory.
    pub const MIN_USER_ADDRESS: u64 = 0x10000;

    /// First address past the canonical user-space range.
    pub const USER_ADDRESS_END: u64 = 0x0000_8000_0000_0000;
}

/// Backoff configuration for process discovery and locate retries.
///
/// Exponential backoff: 1s → 2s → 4s → 8s → 16s, then stays at 16s.
pub mod retry {
    /// Delay (in ms) for each consecutive backoff.
    pub const BACKOFF_DELAYS_MS: [u64; 5] = [1000, 2000, 4000, 8000, 16000];

    /// Consecutive failed tree reads before the cached root is dropped.
    pub const MAX_CONSECUTIVE_FAILURES: u32 = 3;
}

/// Polling and budget defaults.
pub mod timing {
    /// Interval between tree reads in the worker loop (ms).
    pub const POLL_INTERVAL_MS: u64 = 1000;

    /// Wall-clock budget of one tree read (ms).
    pub const READ_BUDGET_MS: u64 = 5000;

    /// Wall-clock budget of one full locate pass (ms).
    pub const LOCATE_BUDGET_MS: u64 = 180_000;

    /// Age after which a cached root address is stale (hours).
    pub const CACHE_TTL_HOURS: u64 = 24;
}

/// Region scan defaults.
pub mod scan {
    /// Regions smaller than this are not scanned.
    pub const MIN_REGION_SIZE: u64 = 4096;

    /// Once a match exists, the type scan stops after this many bytes.
    pub const EARLY_OUT_BYTES: u64 = 50 * 1024 * 1024;
}
