#![cfg_attr(not(target_os = "linux"), allow(dead_code, unused_variables))]

use crate::error::{Error, Result, UnavailableKind};
use crate::process::maps::{self, MemoryRegion};
use crate::process::provider::{ProcessInfo, ProcessProvider};
use crate::process::reader::{Backend, MemoryReader, ReadMemory};

#[cfg(target_os = "linux")]
use std::fs::{self, File};
#[cfg(target_os = "linux")]
use std::io::ErrorKind;
#[cfg(target_os = "linux")]
use std::path::Path;
#[cfg(target_os = "linux")]
use tracing::debug;
use tracing::warn;

/// An opened target process.
pub struct ProcessHandle {
    pub pid: u32,
    reader: MemoryReader,
}

#[cfg(target_os = "linux")]
impl ProcessHandle {
    /// Open a process for reading, preferring `/proc/<pid>/mem` and falling
    /// back to `process_vm_readv` when the file cannot be opened.
    pub fn open(pid: u32) -> Result<Self> {
        ensure_exists(pid)?;

        match File::open(format!("/proc/{}/mem", pid)) {
            Ok(file) => {
                debug!("Opened /proc/{}/mem", pid);
                Ok(Self {
                    pid,
                    reader: MemoryReader::proc_mem(pid, file),
                })
            }
            Err(e) => {
                debug!(
                    "Opening /proc/{}/mem failed ({}), trying process_vm_readv",
                    pid, e
                );
                Self::open_with(pid, Backend::VmReadv)
            }
        }
    }

    /// Open a process with a specific backend.
    ///
    /// The vm_readv backend has no open step, so a check read of the first
    /// readable region surfaces permission problems here instead of on the
    /// first real read.
    pub fn open_with(pid: u32, backend: Backend) -> Result<Self> {
        ensure_exists(pid)?;

        let reader = match backend {
            Backend::ProcMem => {
                let file = File::open(format!("/proc/{}/mem", pid))
                    .map_err(|e| open_error(pid, &e))?;
                MemoryReader::proc_mem(pid, file)
            }
            Backend::VmReadv => MemoryReader::vm_readv(pid),
        };
        let handle = Self { pid, reader };

        if backend == Backend::VmReadv {
            handle.check_access()?;
        }
        Ok(handle)
    }

    pub fn is_alive(&self) -> bool {
        // State is the field after the parenthesised command name.
        match fs::read_to_string(format!("/proc/{}/stat", self.pid)) {
            Ok(stat) => stat
                .rsplit_once(')')
                .and_then(|(_, rest)| rest.trim_start().chars().next())
                .is_some_and(|state| state != 'Z' && state != 'X'),
            Err(_) => false,
        }
    }

    /// `<exe path>@<exe mtime>`; changes whenever the binary is replaced.
    pub fn runtime_version_hint(&self) -> Option<String> {
        let exe = fs::read_link(format!("/proc/{}/exe", self.pid)).ok()?;
        let modified = fs::metadata(&exe)
            .and_then(|m| m.modified())
            .ok()?
            .duration_since(std::time::UNIX_EPOCH)
            .ok()?;
        Some(format!("{}@{}", exe.display(), modified.as_secs()))
    }

    fn check_access(&self) -> Result<()> {
        let regions = maps::list_regions(self.pid)?;
        check_read_access(self.pid, &self.reader, &regions)
    }
}

#[cfg(target_os = "linux")]
fn ensure_exists(pid: u32) -> Result<()> {
    if pid == 0 || !Path::new(&format!("/proc/{}", pid)).exists() {
        return Err(Error::unavailable(
            pid,
            UnavailableKind::ProcessNotFound,
            "no such process",
        ));
    }
    Ok(())
}

#[cfg(target_os = "linux")]
fn open_error(pid: u32, e: &std::io::Error) -> Error {
    let kind = match e.kind() {
        ErrorKind::PermissionDenied => UnavailableKind::PermissionDenied,
        ErrorKind::NotFound => UnavailableKind::ProcessNotFound,
        _ => UnavailableKind::PermissionDenied,
    };
    Error::unavailable(pid, kind, e.to_string())
}

/// One read from the first readable region.
///
/// A denied read is returned with advice attached; any other failure only
/// warns, since a single unmapped page says nothing about access rights.
fn check_read_access<R: ReadMemory>(pid: u32, reader: &R, regions: &[MemoryRegion]) -> Result<()> {
    let Some(region) = regions.iter().find(|r| r.is_readable() && !r.is_special()) else {
        return Ok(());
    };
    match reader.read_bytes(region.start, 8) {
        Ok(_) => Ok(()),
        Err(Error::ProcessUnavailable {
            kind: UnavailableKind::PermissionDenied,
            reason,
            ..
        }) => Err(Error::unavailable(
            pid,
            UnavailableKind::PermissionDenied,
            format!(
                "{}; check ptrace_scope or run with CAP_SYS_PTRACE",
                reason
            ),
        )),
        Err(e) => {
            warn!("Access check read at {:#x} failed: {}", region.start, e);
            Ok(())
        }
    }
}

#[cfg(not(target_os = "linux"))]
impl ProcessHandle {
    pub fn open(pid: u32) -> Result<Self> {
        Err(Error::unavailable(
            pid,
            UnavailableKind::Unsupported,
            "Linux only: process access not supported on this platform",
        ))
    }

    pub fn open_with(pid: u32, _backend: Backend) -> Result<Self> {
        Self::open(pid)
    }

    /// Check if the process is still running (stub for non-Linux)
    pub fn is_alive(&self) -> bool {
        false
    }

    pub fn runtime_version_hint(&self) -> Option<String> {
        None
    }
}

impl ProcessHandle {
    pub fn backend(&self) -> Backend {
        self.reader.backend()
    }
}

impl ReadMemory for ProcessHandle {
    fn read_bytes(&self, address: u64, size: usize) -> Result<Vec<u8>> {
        self.reader.read_bytes(address, size)
    }
}

impl ProcessInfo for ProcessHandle {
    fn pid(&self) -> u32 {
        self.pid
    }

    fn is_alive(&self) -> bool {
        ProcessHandle::is_alive(self)
    }

    fn regions(&self) -> Result<Vec<MemoryRegion>> {
        maps::list_regions(self.pid)
    }

    fn runtime_version_hint(&self) -> Option<String> {
        ProcessHandle::runtime_version_hint(self)
    }
}

/// Opens real processes on the local machine.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemProcessProvider {
    /// Force a read backend instead of picking one automatically.
    pub backend: Option<Backend>,
}

impl ProcessProvider for SystemProcessProvider {
    type Process = ProcessHandle;

    fn open_process(&self, pid: u32) -> Result<Self::Process> {
        match self.backend {
            Some(backend) => ProcessHandle::open_with(pid, backend),
            None => ProcessHandle::open(pid),
        }
    }
}

#[cfg(test)]
mod access_tests {
    use super::*;
    use crate::process::MockMemoryReader;

    fn mock_regions(reader: &MockMemoryReader) -> Vec<MemoryRegion> {
        reader.regions().unwrap()
    }

    #[test]
    fn test_denied_first_read_is_permission_error() {
        let reader = MockMemoryReader::new(vec![0; 64]).with_pid(77);
        reader.set_denied(true);

        let err = check_read_access(77, &reader, &mock_regions(&reader)).unwrap_err();
        match err {
            Error::ProcessUnavailable { pid, kind, reason } => {
                assert_eq!(pid, 77);
                assert_eq!(kind, UnavailableKind::PermissionDenied);
                assert!(reason.contains("ptrace_scope"));
            }
            other => panic!("Expected permission error, got {}", other),
        }
    }

    #[test]
    fn test_unmapped_first_read_only_warns() {
        let reader = MockMemoryReader::new(vec![0; 64]);
        let regions = mock_regions(&reader);
        reader.set_unreadable(true);

        assert!(check_read_access(reader.pid(), &reader, &regions).is_ok());
    }

    #[test]
    fn test_readable_process_passes() {
        let reader = MockMemoryReader::new(vec![0; 64]);
        assert!(check_read_access(reader.pid(), &reader, &mock_regions(&reader)).is_ok());
        assert!(check_read_access(reader.pid(), &reader, &[]).is_ok());
    }
}

#[cfg(all(test, target_os = "linux"))]
mod tests {
    use super::*;

    #[test]
    fn test_open_missing_process() {
        let err = ProcessHandle::open(u32::MAX).err().unwrap();
        assert!(matches!(
            err,
            Error::ProcessUnavailable {
                kind: UnavailableKind::ProcessNotFound,
                ..
            }
        ));
    }

    #[test]
    fn test_open_own_process() {
        let pid = std::process::id();
        let handle = ProcessHandle::open(pid).unwrap();

        assert_eq!(handle.pid(), pid);
        assert!(handle.is_alive());
        assert!(!handle.regions().unwrap().is_empty());
        assert!(handle.runtime_version_hint().is_some());
    }

    #[test]
    fn test_read_own_memory() {
        let value: u64 = 0x0B1E_C75C_A900;
        let address = &value as *const u64 as u64;

        let handle = ProcessHandle::open(std::process::id()).unwrap();
        assert_eq!(handle.read_u64(address).unwrap(), value);
    }

    #[test]
    fn test_read_unmapped_is_error() {
        let handle = ProcessHandle::open(std::process::id()).unwrap();
        // never mapped in a userspace process
        assert!(handle.read_u64(0x10000).is_err());
    }
}
