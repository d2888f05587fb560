//! Error types, split into hard errors and recoverable soft failures.
//!
//! A [`SoftFailure`] is an expected operating condition under which incremental
//! results cannot be trusted; the per-volume service converts it into full-scan
//! mode for that volume and keeps the reason for diagnostics. Everything else
//! in [`JournalError`] indicates a programming or environment defect and
//! propagates to the caller.

use thiserror::Error;

/// Conditions that void the incremental result for one volume.
///
/// Soft failures are caught at the per-volume boundary and demote that volume
/// to a full scan; they never abort the overall run.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SoftFailure {
    #[error("no usable journal checkpoint from the previous backup")]
    NoPreviousCheckpoint,

    #[error("journal id changed since the previous backup (was {previous:#x}, now {current:#x})")]
    JournalIdChanged { previous: u64, current: u64 },

    #[error("previous checkpoint carries the forced-rescan sentinel (next USN is zero)")]
    NextUsnZero,

    #[error("source or filter configuration changed since the previous backup")]
    ConfigChanged,

    #[error("journal entries were purged before they could be read")]
    JournalPurged,

    #[error("cannot resolve the full path of journal entry '{name}'")]
    UnresolvedPath { name: String },

    #[error("change journal is not available on this volume: {0}")]
    JournalUnavailable(String),
}

#[derive(Debug, Error)]
pub enum JournalError {
    #[error(
        "Access denied: administrator privileges are required to access the USN change journal"
    )]
    PermissionDenied,

    #[error("the USN change journal is only available on Windows")]
    UnsupportedPlatform,

    // Misinterpreting an unknown layout would corrupt every resolved path, so
    // this is a hard error rather than a fallback.
    #[error("unsupported USN record version {major}.{minor}, only version 2 is supported")]
    UnsupportedRecordVersion { major: u16, minor: u16 },

    #[error("malformed USN record data: {0}")]
    Decode(String),

    #[error("source path has no volume root: {0}")]
    InvalidSourcePath(String),

    #[error("scan cancelled")]
    Cancelled,

    #[error(transparent)]
    Soft(#[from] SoftFailure),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[cfg(windows)]
    #[error("Windows error: {0}")]
    WinApi(#[from] windows::core::Error),

    #[error("{0}")]
    Other(String),
}
