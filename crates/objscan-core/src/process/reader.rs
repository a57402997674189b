#![cfg_attr(not(target_os = "linux"), allow(dead_code, unused_variables))]

use std::fs::File;
use std::io;

use strum::{Display, EnumString};

use crate::config::limits::{MIN_USER_ADDRESS, USER_ADDRESS_END};
use crate::error::{Error, Result, UnavailableKind};

#[cfg(target_os = "linux")]
use std::os::unix::fs::FileExt;

/// Trait for reading memory from a process or buffer
///
/// Every read is all-or-nothing: a short read is an error, never a
/// partially filled buffer.
pub trait ReadMemory {
    /// Read raw bytes from memory at the given address
    fn read_bytes(&self, address: u64, size: usize) -> Result<Vec<u8>>;

    fn read_u32(&self, address: u64) -> Result<u32> {
        let bytes = self.read_bytes(address, 4)?;
        Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    fn read_i32(&self, address: u64) -> Result<i32> {
        let bytes = self.read_bytes(address, 4)?;
        Ok(i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    fn read_u64(&self, address: u64) -> Result<u64> {
        let bytes = self.read_bytes(address, 8)?;
        Ok(u64::from_le_bytes([
            bytes[0], bytes[1], bytes[2], bytes[3], bytes[4], bytes[5], bytes[6], bytes[7],
        ]))
    }

    fn read_i64(&self, address: u64) -> Result<i64> {
        let bytes = self.read_bytes(address, 8)?;
        Ok(i64::from_le_bytes([
            bytes[0], bytes[1], bytes[2], bytes[3], bytes[4], bytes[5], bytes[6], bytes[7],
        ]))
    }

    fn read_f64(&self, address: u64) -> Result<f64> {
        Ok(f64::from_bits(self.read_u64(address)?))
    }

    /// Read a NUL-terminated string of at most `max_len` bytes.
    ///
    /// Reads shrink toward the address when the full window is unreadable,
    /// so a short string at the end of a mapping still decodes. A string with
    /// no terminator inside `max_len` bytes is an error.
    fn read_cstring(&self, address: u64, max_len: usize) -> Result<String> {
        let mut window = max_len;
        loop {
            match self.read_bytes(address, window) {
                Ok(bytes) => {
                    let Some(len) = bytes.iter().position(|&b| b == 0) else {
                        return Err(Error::unreadable(address, window, "unterminated string"));
                    };
                    return String::from_utf8(bytes[..len].to_vec()).map_err(|e| {
                        Error::unreadable(address, len, format!("invalid UTF-8: {}", e))
                    });
                }
                Err(e) if window <= 8 => return Err(e),
                Err(_) => window /= 2,
            }
        }
    }
}

impl<R: ReadMemory + ?Sized> ReadMemory for &R {
    fn read_bytes(&self, address: u64, size: usize) -> Result<Vec<u8>> {
        (**self).read_bytes(address, size)
    }
}

/// Reject reads outside canonical user space before touching the OS.
///
/// Heuristic scanning produces plenty of garbage pointers; none of them may
/// reach a syscall, and none may overflow the address computation.
pub fn check_user_range(address: u64, size: usize) -> Result<()> {
    let end = address
        .checked_add(size as u64)
        .ok_or_else(|| Error::unreadable(address, size, "address range overflows"))?;
    if address < MIN_USER_ADDRESS || end > USER_ADDRESS_END {
        return Err(Error::unreadable(
            address,
            size,
            "outside canonical user-space range",
        ));
    }
    Ok(())
}

/// Map an OS read failure onto the error taxonomy.
///
/// EPERM and EACCES both land on `ErrorKind::PermissionDenied`; a denied
/// read is a property of the whole process, not of one address.
pub(crate) fn os_read_error(pid: u32, address: u64, size: usize, err: &io::Error) -> Error {
    match err.kind() {
        io::ErrorKind::PermissionDenied => Error::unavailable(
            pid,
            UnavailableKind::PermissionDenied,
            format!("read of {} bytes at {:#x} denied: {}", size, address, err),
        ),
        _ => Error::unreadable(address, size, err.to_string()),
    }
}

/// How bytes are pulled out of the target process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
#[strum(serialize_all = "kebab-case")]
pub enum Backend {
    /// Positioned reads against `/proc/<pid>/mem`.
    ProcMem,
    /// `process_vm_readv` cross-process reads.
    VmReadv,
}

/// Reads another process's memory through one of the available backends.
pub struct MemoryReader {
    pid: u32,
    mem_file: Option<File>,
}

impl MemoryReader {
    /// Reader over an opened `/proc/<pid>/mem` file.
    pub fn proc_mem(pid: u32, file: File) -> Self {
        Self {
            pid,
            mem_file: Some(file),
        }
    }

    /// Reader using `process_vm_readv`.
    pub fn vm_readv(pid: u32) -> Self {
        Self {
            pid,
            mem_file: None,
        }
    }

    pub fn backend(&self) -> Backend {
        if self.mem_file.is_some() {
            Backend::ProcMem
        } else {
            Backend::VmReadv
        }
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    #[cfg(target_os = "linux")]
    fn read_bytes_impl(&self, address: u64, size: usize) -> Result<Vec<u8>> {
        let mut buffer = vec![0u8; size];
        match &self.mem_file {
            Some(file) => {
                // read_exact_at fails with UnexpectedEof on short reads, so the
                // all-or-nothing contract holds.
                file.read_exact_at(&mut buffer, address)
                    .map_err(|e| os_read_error(self.pid, address, size, &e))?;
            }
            None => {
                let local_iov = libc::iovec {
                    iov_base: buffer.as_mut_ptr() as *mut libc::c_void,
                    iov_len: size,
                };
                let remote_iov = libc::iovec {
                    iov_base: address as *mut libc::c_void,
                    iov_len: size,
                };

                // SAFETY: local_iov points at `buffer`, which is exclusively borrowed
                // and exactly `size` bytes long for the duration of the call. The
                // remote address is only interpreted by the kernel in the target's
                // address space; invalid addresses come back as an error return.
                let read = unsafe {
                    libc::process_vm_readv(
                        self.pid as libc::pid_t,
                        &local_iov,
                        1,
                        &remote_iov,
                        1,
                        0,
                    )
                };

                if read < 0 {
                    let err = io::Error::last_os_error();
                    return Err(os_read_error(self.pid, address, size, &err));
                }
                if read as usize != size {
                    return Err(Error::unreadable(
                        address,
                        size,
                        format!("short read: got {} of {} bytes", read, size),
                    ));
                }
            }
        }
        Ok(buffer)
    }

    #[cfg(not(target_os = "linux"))]
    fn read_bytes_impl(&self, address: u64, size: usize) -> Result<Vec<u8>> {
        Err(Error::unreadable(
            address,
            size,
            "Linux only: memory reading not supported on this platform",
        ))
    }
}

impl ReadMemory for MemoryReader {
    fn read_bytes(&self, address: u64, size: usize) -> Result<Vec<u8>> {
        check_user_range(address, size)?;
        if size == 0 {
            return Ok(Vec::new());
        }
        self.read_bytes_impl(address, size)
    }
}
