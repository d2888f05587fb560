//! # usn-changeset
//!
//! Incremental change detection for NTFS volumes, built on the USN change journal.
//!
//! Instead of walking every directory on a volume, a backup run can ask the
//! journal which files and folders changed since the previous run. This crate
//! reads the raw journal record stream, reconstructs full paths from the flat
//! parent/child reference-number table (honoring the historical state of each
//! ancestor at the time of the child record), collapses transient
//! create-then-delete churn, and produces a per-volume change set together with
//! the journal checkpoint to persist for the next run.
//!
//! Whenever continuity cannot be proven (purged journal history, a changed
//! journal id, a changed source/filter configuration, or an ancestor chain that
//! cannot be reconstructed) the affected volume falls back to a full scan.
//! These conditions are modeled as [`SoftFailure`]s and never abort the run;
//! see [`errors`] for the distinction from hard errors.
//!
//! The native journal plumbing (`volume`, `native`) only exists on Windows.
//! The rest of the pipeline (record decoding, consolidation, path resolution
//! and the per-volume service) is portable and driven through the
//! [`journal::JournalAccess`] trait, so it can be exercised against any record
//! source.
//!
//! ## Platform
//! - Windows NTFS volumes for live journal access
//! - Requires administrator privileges to open a volume handle

pub mod checkpoint;
pub mod consolidate;
pub mod errors;
pub mod journal;
pub mod paths;
pub mod record;
pub mod resolver;
pub mod service;
mod time;

#[cfg(windows)]
pub mod native;
#[cfg(windows)]
mod privilege;
#[cfg(windows)]
pub mod volume;

// Re-export commonly used types
pub use checkpoint::{JournalCheckpoint, ScanConfig};
pub use errors::{JournalError, SoftFailure};
pub use service::{UsnJournalService, VolumeChangeSet};

/// A convenient type alias for Results with JournalError.
pub type JournalResult<T> = std::result::Result<T, JournalError>;

/// Update Sequence Number, the total order among journal records.
pub type Usn = i64;

// Shared test fixtures (record builders, mock journal access)
#[cfg(test)]
mod testutil;
