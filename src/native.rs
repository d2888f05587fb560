//! Native change-journal access: the FSCTL control operations and the
//! grow-and-retry buffer loops around them.
//!
//! This module and [`crate::volume`] are the only places that talk to the
//! OS. Buffers come back as plain byte slices and are handed to
//! [`crate::record::decode_record`]; on a read response the first 8 bytes
//! are the next-call start cursor and are forwarded verbatim.

use crate::errors::{JournalError, SoftFailure};
use crate::journal::{CancelToken, JournalAccess, JournalMetadata};
use crate::record::{self, UsnRecord};
use crate::volume::Volume;
use crate::Usn;
use log::{debug, warn};
use lru::LruCache;
use std::ffi::c_void;
use std::num::NonZeroUsize;
use windows::Win32::{
    Foundation::{
        ERROR_HANDLE_EOF, ERROR_INSUFFICIENT_BUFFER, ERROR_INVALID_FUNCTION,
        ERROR_JOURNAL_ENTRY_DELETED, ERROR_JOURNAL_NOT_ACTIVE,
    },
    System::{
        IO::DeviceIoControl,
        Ioctl::{
            FSCTL_ENUM_USN_DATA, FSCTL_QUERY_USN_JOURNAL, FSCTL_READ_USN_JOURNAL,
            MFT_ENUM_DATA_V0, READ_USN_JOURNAL_DATA_V0, USN_JOURNAL_DATA_V0,
        },
    },
};

/// Initial buffer for FSCTL_READ_USN_JOURNAL; doubled on overflow. Small on
/// purpose so cancellation stays responsive between reads.
const INITIAL_READ_BUFFER_SIZE: usize = 4 * 1024;

/// Initial buffer for a single-record MFT lookup; doubled on overflow.
const INITIAL_LOOKUP_BUFFER_SIZE: usize = 512;

const LOOKUP_CACHE_CAPACITY: usize = 4 * 1024;

/// Live change journal of one volume.
///
/// Owns the volume handle and an LRU cache in front of the single-record MFT
/// lookup; nothing is shared between volumes.
pub struct UsnJournal {
    volume: Volume,
    metadata: JournalMetadata,
    lookup_cache: LruCache<u64, Option<UsnRecord>>,
}

impl UsnJournal {
    /// Opens the journal of the volume containing `volume_root` and
    /// snapshots its metadata.
    ///
    /// A volume without an active or queryable journal is a
    /// [`SoftFailure::JournalUnavailable`]: the volume can still be backed
    /// up, just not incrementally.
    pub fn open(volume_root: &str) -> Result<Self, JournalError> {
        let volume = Volume::open(volume_root)?;
        let metadata = query_journal(&volume)?;
        debug!("journal metadata for {volume_root}: {metadata:?}");

        let capacity = NonZeroUsize::new(LOOKUP_CACHE_CAPACITY)
            .ok_or_else(|| JournalError::Other("lookup cache capacity is zero".to_string()))?;
        Ok(UsnJournal {
            volume,
            metadata,
            lookup_cache: LruCache::new(capacity),
        })
    }
}

/// `FSCTL_QUERY_USN_JOURNAL`: one metadata snapshot per volume open.
fn query_journal(volume: &Volume) -> Result<JournalMetadata, JournalError> {
    let mut journal_data = USN_JOURNAL_DATA_V0::default();
    let mut bytes_returned = 0u32;

    if let Err(err) = unsafe {
        DeviceIoControl(
            volume.handle(),
            FSCTL_QUERY_USN_JOURNAL,
            None,
            0,
            Some(&mut journal_data as *mut _ as *mut _),
            size_of::<USN_JOURNAL_DATA_V0>() as u32,
            Some(&mut bytes_returned),
            None,
        )
    } {
        // no journal on this volume (not NTFS, or the journal was never
        // created): recoverable, the volume just full-scans
        if err.code() == ERROR_JOURNAL_NOT_ACTIVE.into()
            || err.code() == ERROR_INVALID_FUNCTION.into()
        {
            return Err(SoftFailure::JournalUnavailable(err.message()).into());
        }
        warn!("FSCTL_QUERY_USN_JOURNAL failed on {}: {err}", volume.root());
        return Err(err.into());
    }

    Ok(JournalMetadata {
        journal_id: journal_data.UsnJournalID,
        first_usn: journal_data.FirstUsn,
        next_usn: journal_data.NextUsn,
        lowest_valid_usn: journal_data.LowestValidUsn,
        max_usn: journal_data.MaxUsn,
        maximum_size: journal_data.MaximumSize,
        allocation_delta: journal_data.AllocationDelta,
    })
}

impl JournalAccess for UsnJournal {
    fn metadata(&self) -> &JournalMetadata {
        &self.metadata
    }

    fn root_fid(&self) -> u64 {
        self.volume.root_fid()
    }

    fn read_changes(
        &mut self,
        start_usn: Usn,
        reason_mask: u32,
        cancel: &CancelToken,
    ) -> Result<Vec<UsnRecord>, JournalError> {
        let next_usn = self.metadata.next_usn;
        // reads below the purge horizon cannot succeed
        let mut cursor = start_usn.max(self.metadata.lowest_valid_usn);
        let mut buffer = vec![0u8; INITIAL_READ_BUFFER_SIZE];
        let mut records = Vec::new();

        'read: while cursor < next_usn {
            if cancel.is_cancelled() {
                return Err(JournalError::Cancelled);
            }

            let read_data = READ_USN_JOURNAL_DATA_V0 {
                StartUsn: cursor,
                ReasonMask: reason_mask,
                ReturnOnlyOnClose: 0,
                Timeout: 0,
                BytesToWaitFor: 0,
                UsnJournalID: self.metadata.journal_id,
            };
            let mut bytes_read = 0u32;

            if let Err(err) = unsafe {
                DeviceIoControl(
                    self.volume.handle(),
                    FSCTL_READ_USN_JOURNAL,
                    Some(&read_data as *const _ as *mut _),
                    size_of::<READ_USN_JOURNAL_DATA_V0>() as u32,
                    Some(buffer.as_mut_ptr() as *mut c_void),
                    buffer.len() as u32,
                    Some(&mut bytes_read),
                    None,
                )
            } {
                if err.code() == ERROR_INSUFFICIENT_BUFFER.into() {
                    // retry the same request with a doubled buffer; the
                    // cursor has not advanced, so nothing is lost
                    let doubled = buffer.len() * 2;
                    buffer.resize(doubled, 0);
                    continue;
                }
                if err.code() == ERROR_HANDLE_EOF.into() {
                    break;
                }
                if err.code() == ERROR_JOURNAL_ENTRY_DELETED.into() {
                    // records between the checkpoint and now were purged:
                    // continuity is gone for this window
                    return Err(SoftFailure::JournalPurged.into());
                }
                warn!("FSCTL_READ_USN_JOURNAL failed on {}: {err}", self.volume.root());
                return Err(err.into());
            }

            if (bytes_read as usize) <= size_of::<Usn>() {
                break; // success with nothing returned
            }

            // https://learn.microsoft.com/en-us/windows/win32/fileio/walking-a-buffer-of-change-journal-records
            // The USN returned as the first item in the output buffer is the
            // USN of the next record to be retrieved; it seeds the next read.
            let mut cursor_bytes = [0u8; size_of::<Usn>()];
            cursor_bytes.copy_from_slice(&buffer[..size_of::<Usn>()]);
            cursor = Usn::from_le_bytes(cursor_bytes);

            let mut offset = size_of::<Usn>();
            while offset < bytes_read as usize {
                let (entry, length) = record::decode_record(&buffer[..bytes_read as usize], offset)?;
                offset += length as usize;
                if entry.usn >= next_usn {
                    // activity from after the scan was planned; out of scope
                    break 'read;
                }
                if entry.usn >= start_usn {
                    records.push(entry);
                }
            }
        }

        Ok(records)
    }

    fn lookup_by_fid(&mut self, fid: u64) -> Result<Option<UsnRecord>, JournalError> {
        if let Some(cached) = self.lookup_cache.get(&fid) {
            return Ok(cached.clone());
        }
        let found = self.enum_single_record(fid)?;
        self.lookup_cache.put(fid, found.clone());
        Ok(found)
    }
}

impl UsnJournal {
    /// `FSCTL_ENUM_USN_DATA` seeded at `fid`: fetches the MFT's current
    /// record for one file reference number. Returns `None` when the object
    /// no longer exists, or enumeration fails for any other reason; the
    /// caller treats both as a broken chain.
    fn enum_single_record(&mut self, fid: u64) -> Result<Option<UsnRecord>, JournalError> {
        let mut buffer = vec![0u8; INITIAL_LOOKUP_BUFFER_SIZE];

        loop {
            let enum_data = MFT_ENUM_DATA_V0 {
                StartFileReferenceNumber: fid,
                LowUsn: 0,
                HighUsn: self.metadata.next_usn,
            };
            let mut bytes_read = 0u32;

            match unsafe {
                DeviceIoControl(
                    self.volume.handle(),
                    FSCTL_ENUM_USN_DATA,
                    Some(&enum_data as *const _ as *mut _),
                    size_of::<MFT_ENUM_DATA_V0>() as u32,
                    Some(buffer.as_mut_ptr() as *mut c_void),
                    buffer.len() as u32,
                    Some(&mut bytes_read),
                    None,
                )
            } {
                Err(err) if err.code() == ERROR_INSUFFICIENT_BUFFER.into() => {
                    let doubled = buffer.len() * 2;
                    buffer.resize(doubled, 0);
                }
                Err(err) => {
                    debug!("MFT lookup for fid {fid:#x} failed: {err}");
                    return Ok(None);
                }
                Ok(()) => {
                    // first 8 bytes: continuation FRN, then the first record
                    if (bytes_read as usize) <= size_of::<u64>() {
                        return Ok(None);
                    }
                    let (entry, _) =
                        record::decode_record(&buffer[..bytes_read as usize], size_of::<u64>())?;
                    // enumeration starts at the next allocated FRN, which is
                    // only useful if it is the one asked for
                    return Ok((entry.fid == fid).then_some(entry));
                }
            }
        }
    }
}
