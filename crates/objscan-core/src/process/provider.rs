//! Process provider abstraction for testability.
//!
//! These traits abstract opening a target process and asking it about its
//! address space, so the locate pipeline and the worker run against an
//! in-memory heap in tests without a live process.

use crate::error::Result;
use crate::process::ReadMemory;
use crate::process::maps::MemoryRegion;

/// Trait for accessing process information.
pub trait ProcessInfo {
    /// Get the process ID.
    fn pid(&self) -> u32;

    /// Check if the process is still running.
    fn is_alive(&self) -> bool;

    /// Mapped regions of the address space, ordered by start address.
    fn regions(&self) -> Result<Vec<MemoryRegion>>;

    /// Opaque string that changes when the target binary changes.
    /// Used to reject cached root addresses from a different build.
    fn runtime_version_hint(&self) -> Option<String> {
        None
    }
}

/// Trait for opening processes.
pub trait ProcessProvider {
    /// The type of process handle returned by this provider.
    type Process: ProcessInfo + ReadMemory;

    /// Open a process by its PID.
    fn open_process(&self, pid: u32) -> Result<Self::Process>;
}
