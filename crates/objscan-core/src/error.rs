use std::time::Duration;

use strum::Display;
use thiserror::Error;

/// Why a target process could not be opened or stopped being reachable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum UnavailableKind {
    #[strum(serialize = "permission denied")]
    PermissionDenied,
    #[strum(serialize = "process not found")]
    ProcessNotFound,
    #[strum(serialize = "unsupported platform")]
    Unsupported,
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("Process {pid} unavailable ({kind}): {reason}")]
    ProcessUnavailable {
        pid: u32,
        kind: UnavailableKind,
        reason: String,
    },

    #[error("Failed to enumerate memory regions of process {pid}: {reason}")]
    RegionEnumerationFailed { pid: u32, reason: String },

    #[error("Unreadable memory at {address:#x} ({len} bytes): {reason}")]
    Unreadable {
        address: u64,
        len: usize,
        reason: String,
    },

    #[error("No validated root object found for type '{type_name}'")]
    LocatePipelineExhausted { type_name: String },

    #[error("Root address cache is corrupt: {0}")]
    CacheCorrupt(String),

    #[error("{operation} exceeded its budget of {budget:?}")]
    Timeout {
        operation: &'static str,
        budget: Duration,
    },

    #[error("Config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn unreadable(address: u64, len: usize, reason: impl Into<String>) -> Self {
        Error::Unreadable {
            address,
            len,
            reason: reason.into(),
        }
    }

    pub fn unavailable(pid: u32, kind: UnavailableKind, reason: impl Into<String>) -> Self {
        Error::ProcessUnavailable {
            pid,
            kind,
            reason: reason.into(),
        }
    }

    /// Whether the error means the process itself is gone or inaccessible,
    /// as opposed to a single address being unreadable.
    pub fn is_process_level(&self) -> bool {
        matches!(self, Error::ProcessUnavailable { .. })
    }
}
