//! Shared test fixtures: record builders and an in-memory journal.

use crate::errors::JournalError;
use crate::journal::{CancelToken, JournalAccess, JournalMetadata};
use crate::record::{UsnRecord, attr};
use crate::{SoftFailure, Usn};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::SystemTime;

/// Root-directory FRN used by all fixtures (the NTFS root is MFT entry 5).
pub const ROOT_FID: u64 = 5;

pub fn file_rec(fid: u64, parent_fid: u64, usn: Usn, reason: u32, name: &str) -> UsnRecord {
    UsnRecord {
        usn,
        timestamp: SystemTime::UNIX_EPOCH,
        fid,
        parent_fid,
        reason,
        source_info: 0,
        security_id: 0,
        attributes: 0,
        file_name: name.to_string(),
    }
}

pub fn dir_rec(fid: u64, parent_fid: u64, usn: Usn, reason: u32, name: &str) -> UsnRecord {
    UsnRecord {
        attributes: attr::FILE_ATTRIBUTE_DIRECTORY,
        ..file_rec(fid, parent_fid, usn, reason, name)
    }
}

/// In-memory [`JournalAccess`] implementation. `records` plays the journal
/// stream, `mft` answers targeted lookups, and the shared counters let tests
/// assert how often the native facilities would have been hit.
#[derive(Debug, Clone)]
pub struct MockJournal {
    pub meta: JournalMetadata,
    pub records: Vec<UsnRecord>,
    pub mft: HashMap<u64, UsnRecord>,
    /// When set, every read fails with this soft failure.
    pub read_failure: Option<SoftFailure>,
    pub read_calls: Arc<AtomicUsize>,
    pub lookup_calls: Arc<AtomicUsize>,
}

impl MockJournal {
    pub fn new(next_usn: Usn) -> Self {
        MockJournal {
            meta: JournalMetadata {
                journal_id: 0xCAFE,
                first_usn: 0,
                next_usn,
                lowest_valid_usn: 0,
                max_usn: i64::MAX,
                maximum_size: 32 * 1024 * 1024,
                allocation_delta: 8 * 1024 * 1024,
            },
            records: Vec::new(),
            mft: HashMap::new(),
            read_failure: None,
            read_calls: Arc::new(AtomicUsize::new(0)),
            lookup_calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn with_records(next_usn: Usn, records: Vec<UsnRecord>) -> Self {
        MockJournal {
            records,
            ..Self::new(next_usn)
        }
    }
}

impl JournalAccess for MockJournal {
    fn metadata(&self) -> &JournalMetadata {
        &self.meta
    }

    fn root_fid(&self) -> u64 {
        ROOT_FID
    }

    fn read_changes(
        &mut self,
        start_usn: Usn,
        reason_mask: u32,
        cancel: &CancelToken,
    ) -> Result<Vec<UsnRecord>, JournalError> {
        self.read_calls.fetch_add(1, Ordering::Relaxed);
        if cancel.is_cancelled() {
            return Err(JournalError::Cancelled);
        }
        if let Some(failure) = &self.read_failure {
            return Err(failure.clone().into());
        }
        let start = start_usn.max(self.meta.lowest_valid_usn);
        Ok(self
            .records
            .iter()
            .filter(|r| r.usn >= start && r.usn < self.meta.next_usn && r.reason & reason_mask != 0)
            .cloned()
            .collect())
    }

    fn lookup_by_fid(&mut self, fid: u64) -> Result<Option<UsnRecord>, JournalError> {
        self.lookup_calls.fetch_add(1, Ordering::Relaxed);
        Ok(self.mft.get(&fid).cloned())
    }
}
