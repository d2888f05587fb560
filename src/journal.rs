//! Journal metadata and the access seam between the pure pipeline and the
//! native volume plumbing.
//!
//! The consolidator, resolver and per-volume service only ever talk to a
//! [`JournalAccess`] implementation. On Windows that is
//! [`crate::native::UsnJournal`]; tests drive the same pipeline with an
//! in-memory record source.

use crate::errors::JournalError;
use crate::record::UsnRecord;
use crate::Usn;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Read-only journal state, snapshotted once per volume open.
#[derive(Debug, Clone, Copy, Default)]
pub struct JournalMetadata {
    pub journal_id: u64,
    pub first_usn: Usn,
    /// USN the next record written to the journal will get. Records at or
    /// beyond this belong to activity after the scan was planned.
    pub next_usn: Usn,
    /// Oldest USN that can still be read. Starting below it means history has
    /// been purged and continuity cannot be proven.
    pub lowest_valid_usn: Usn,
    pub max_usn: Usn,
    pub maximum_size: u64,
    pub allocation_delta: u64,
}

/// Access to one volume's change journal.
///
/// Implementations own whatever native state is required; no state is shared
/// between volumes, so distinct volumes can be processed in parallel.
pub trait JournalAccess {
    fn metadata(&self) -> &JournalMetadata;

    /// File reference number of the volume root directory. Ancestor climbs
    /// terminate on it.
    fn root_fid(&self) -> u64;

    /// Reads every record with `start_usn <= usn < metadata().next_usn` whose
    /// reason intersects `reason_mask`, in USN order. Reads clamp to
    /// `lowest_valid_usn`; a purged-history signal from the volume surfaces
    /// as [`crate::SoftFailure::JournalPurged`].
    fn read_changes(
        &mut self,
        start_usn: Usn,
        reason_mask: u32,
        cancel: &CancelToken,
    ) -> Result<Vec<UsnRecord>, JournalError>;

    /// Targeted single-record lookup by file reference number against the
    /// volume's MFT enumeration, for parents that fell outside the read
    /// window. `None` when the object no longer exists.
    fn lookup_by_fid(&mut self, fid: u64) -> Result<Option<UsnRecord>, JournalError>;
}

/// Cooperative cancellation flag, checked between read iterations and between
/// source paths. Clones share the flag.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}
