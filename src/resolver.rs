//! Full-path reconstruction from parent/child reference numbers.
//!
//! Journal records are a flat list of `(child FRN, parent FRN, USN, name)`
//! tuples covering an arbitrary time window. The same FRN may have had
//! different parents and different names over that window, so "the path of
//! record R" means resolving, at every ancestor step, the ancestor's state as
//! of R's USN, not its latest state. Getting this wrong produces paths that
//! never existed, which turn into missed or spurious backup entries.
//!
//! The index is arena-style: an append-only bucket of records per directory
//! FRN, lazily sorted by USN and searched by binary search, never mutated
//! once a batch is loaded.

use crate::errors::{JournalError, SoftFailure};
use crate::journal::JournalAccess;
use crate::paths;
use crate::record::{UsnRecord, reason};
use crate::Usn;
use log::debug;
use std::collections::HashMap;

/// Ancestor chains longer than this are treated as broken; the reference
/// numbers cannot describe a real directory tree.
const MAX_CLIMB_DEPTH: usize = 512;

/// Names that may legitimately be unresolvable: internal entries of the NTFS
/// transaction log and related reserved metadata. Records whose own name
/// matches are dropped instead of failing the volume.
///
/// Kept as a passed-in value so the resolver's soft-failure decision stays a
/// pure function of its inputs.
#[derive(Debug, Clone)]
pub struct ReservedNames {
    names: Vec<String>,
    prefixes: Vec<String>,
}

impl Default for ReservedNames {
    fn default() -> Self {
        ReservedNames {
            names: [
                "$Extend",
                "$RmMetadata",
                "$Txf",
                "$TxfLog",
                "$TxfLog.blf",
                "$Repair",
                "$Tops",
                "$Deleted",
            ]
            .iter()
            .map(|n| n.to_string())
            .collect(),
            prefixes: vec!["$TxfLogContainer".to_string()],
        }
    }
}

impl ReservedNames {
    pub fn new(names: Vec<String>, prefixes: Vec<String>) -> Self {
        ReservedNames { names, prefixes }
    }

    pub fn is_reserved(&self, name: &str) -> bool {
        self.names.iter().any(|n| paths::eq_ignore_case(n, name))
            || self
                .prefixes
                .iter()
                .any(|p| name.len() >= p.len() && paths::eq_ignore_case(&name[..p.len()], p))
    }
}

/// A record together with its reconstructed full path. Directory paths carry
/// a trailing separator.
#[derive(Debug, Clone)]
pub struct ResolvedChange {
    pub record: UsnRecord,
    pub full_path: String,
}

/// One directory FRN's historical entries, ordered by USN on demand.
#[derive(Debug, Default)]
struct SortedRecords {
    records: Vec<UsnRecord>,
    is_sorted: bool,
}

impl SortedRecords {
    fn seeded(record: UsnRecord) -> Self {
        SortedRecords {
            records: vec![record],
            is_sorted: true,
        }
    }

    fn push(&mut self, record: UsnRecord) {
        self.records.push(record);
        self.is_sorted = false;
    }

    fn ensure_sorted(&mut self) {
        if !self.is_sorted {
            self.records.sort_by_key(|r| r.usn);
            self.is_sorted = true;
        }
    }

    /// Selects the entry describing this directory's state at `usn`: the
    /// latest entry with a strictly smaller USN. If none exists, the next
    /// entry at or after `usn` is accepted only when it is not the target
    /// side of a rename, since a rename-target entry carries the name the
    /// directory got *afterwards*, which must not leak into older paths.
    /// (Entries with a USN exactly equal to the child's fall under the same
    /// rule; seeded MFT lookups carry USN 0 and match it as well.)
    fn entry_at(&mut self, usn: Usn) -> Option<&UsnRecord> {
        self.ensure_sorted();
        let idx = self.records.partition_point(|r| r.usn < usn);
        if idx > 0 {
            return self.records.get(idx - 1);
        }
        self.records
            .first()
            .filter(|r| r.reason & reason::USN_REASON_RENAME_NEW_NAME == 0)
    }
}

/// Resolves full paths for a consolidated record batch on one volume.
pub struct PathResolver<'a, J: JournalAccess> {
    journal: &'a mut J,
    volume_root: String,
    reserved: ReservedNames,
    dir_index: HashMap<u64, SortedRecords>,
}

impl<'a, J: JournalAccess> PathResolver<'a, J> {
    pub fn new(journal: &'a mut J, volume_root: &str, reserved: ReservedNames) -> Self {
        PathResolver {
            journal,
            volume_root: paths::append_dir_separator(volume_root),
            reserved,
            dir_index: HashMap::new(),
        }
    }

    /// Indexes the directory records of a batch as ancestry evidence. Call
    /// once before resolving; only directories can appear on a parent chain.
    pub fn index_directories<'r>(&mut self, records: impl IntoIterator<Item = &'r UsnRecord>) {
        for record in records {
            if record.is_dir() {
                self.dir_index
                    .entry(record.fid)
                    .or_default()
                    .push(record.clone());
            }
        }
    }

    /// Walks `record`'s parent chain back to the volume root and rebuilds its
    /// full path from the names in effect at the record's time.
    ///
    /// Returns `Ok(None)` for records inside reserved metadata namespaces.
    /// A broken chain on any other record is a soft failure: a partial result
    /// is not trustworthy enough to base a backup on.
    pub fn resolve(&mut self, record: &UsnRecord) -> Result<Option<ResolvedChange>, JournalError> {
        let mut segments: Vec<String> = vec![record.file_name.clone()];
        let mut parent_fid = record.parent_fid;
        let mut at_usn = record.usn;

        while parent_fid != self.journal.root_fid() {
            if segments.len() > MAX_CLIMB_DEPTH {
                return self.unresolved(record);
            }

            if !self.dir_index.contains_key(&parent_fid) {
                // parent fell outside the read window: one targeted lookup
                match self.journal.lookup_by_fid(parent_fid)? {
                    Some(found) => {
                        self.dir_index.insert(parent_fid, SortedRecords::seeded(found));
                    }
                    None => return self.unresolved(record),
                }
            }

            let Some(bucket) = self.dir_index.get_mut(&parent_fid) else {
                return self.unresolved(record);
            };
            let Some(parent) = bucket.entry_at(at_usn) else {
                return self.unresolved(record);
            };

            segments.push(parent.file_name.clone());
            at_usn = parent.usn;
            parent_fid = parent.parent_fid;
        }

        let mut full_path = self.volume_root.clone();
        for segment in segments.iter().rev() {
            full_path.push_str(segment);
            full_path.push(paths::SEPARATOR);
        }
        if !record.is_dir() {
            full_path.pop();
        }

        Ok(Some(ResolvedChange {
            record: record.clone(),
            full_path,
        }))
    }

    fn unresolved(&self, record: &UsnRecord) -> Result<Option<ResolvedChange>, JournalError> {
        if self.reserved.is_reserved(&record.file_name) {
            debug!(
                "dropping unresolvable reserved entry '{}' (fid {:#x})",
                record.file_name, record.fid
            );
            return Ok(None);
        }
        Err(SoftFailure::UnresolvedPath {
            name: record.file_name.clone(),
        }
        .into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::reason::*;
    use crate::testutil::{MockJournal, ROOT_FID, dir_rec, file_rec};

    fn resolver_with<'a>(
        journal: &'a mut MockJournal,
        dirs: &[UsnRecord],
    ) -> PathResolver<'a, MockJournal> {
        let mut resolver = PathResolver::new(journal, r"C:\", ReservedNames::default());
        resolver.index_directories(dirs.iter());
        resolver
    }

    #[test]
    fn resolves_nested_path_from_batch() {
        let mut journal = MockJournal::new(500);
        let dirs = vec![
            dir_rec(10, ROOT_FID, 100, USN_REASON_FILE_CREATE, "A"),
            dir_rec(11, 10, 101, USN_REASON_FILE_CREATE, "B"),
        ];
        let mut resolver = resolver_with(&mut journal, &dirs);

        let file = file_rec(12, 11, 102, USN_REASON_FILE_CREATE, "f.txt");
        let change = resolver.resolve(&file).unwrap().unwrap();
        assert_eq!(change.full_path, r"C:\A\B\f.txt");

        let folder = dirs[1].clone();
        let change = resolver.resolve(&folder).unwrap().unwrap();
        assert_eq!(change.full_path, r"C:\A\B\");
    }

    #[test]
    fn parent_state_matches_the_child_record_time() {
        // the folder was renamed Old -> New at USN 150; children on either
        // side of the rename must see the name in effect at their own time
        let mut journal = MockJournal::new(500);
        let dirs = vec![
            dir_rec(10, ROOT_FID, 100, USN_REASON_BASIC_INFO_CHANGE, "Old"),
            dir_rec(10, ROOT_FID, 150, USN_REASON_RENAME_NEW_NAME, "New"),
        ];
        let mut resolver = resolver_with(&mut journal, &dirs);

        let before = file_rec(20, 10, 120, USN_REASON_DATA_EXTEND, "f.txt");
        assert_eq!(
            resolver.resolve(&before).unwrap().unwrap().full_path,
            r"C:\Old\f.txt"
        );

        let after = file_rec(21, 10, 180, USN_REASON_DATA_EXTEND, "g.txt");
        assert_eq!(
            resolver.resolve(&after).unwrap().unwrap().full_path,
            r"C:\New\g.txt"
        );
    }

    #[test]
    fn rename_target_entry_never_serves_older_children() {
        // only history for the parent is the rename-target side: a child
        // record from before that USN must not pick up the future name
        let mut journal = MockJournal::new(500);
        let dirs = vec![dir_rec(10, ROOT_FID, 150, USN_REASON_RENAME_NEW_NAME, "New")];
        let mut resolver = resolver_with(&mut journal, &dirs);

        let older = file_rec(20, 10, 120, USN_REASON_DATA_EXTEND, "f.txt");
        assert!(matches!(
            resolver.resolve(&older),
            Err(JournalError::Soft(SoftFailure::UnresolvedPath { .. }))
        ));
    }

    #[test]
    fn equal_usn_entry_follows_the_rename_tie_break() {
        let mut journal = MockJournal::new(500);

        // not a rename target: acceptable at equal USN
        let dirs = vec![dir_rec(10, ROOT_FID, 120, USN_REASON_FILE_CREATE, "A")];
        let mut resolver = resolver_with(&mut journal, &dirs);
        let child = file_rec(20, 10, 120, USN_REASON_FILE_CREATE, "f.txt");
        assert_eq!(
            resolver.resolve(&child).unwrap().unwrap().full_path,
            r"C:\A\f.txt"
        );

        // rename target at the same USN: rejected
        let mut journal = MockJournal::new(500);
        let dirs = vec![dir_rec(10, ROOT_FID, 120, USN_REASON_RENAME_NEW_NAME, "A")];
        let mut resolver = resolver_with(&mut journal, &dirs);
        assert!(resolver.resolve(&child).is_err());
    }

    #[test]
    fn missing_parent_is_fetched_once_and_seeded() {
        let mut journal = MockJournal::new(500);
        journal.mft.insert(
            10,
            dir_rec(10, ROOT_FID, 0, 0, "Warehouse"),
        );
        let lookups = journal.lookup_calls.clone();

        let mut resolver = resolver_with(&mut journal, &[]);
        let first = file_rec(20, 10, 120, USN_REASON_DATA_EXTEND, "a.txt");
        let second = file_rec(21, 10, 130, USN_REASON_DATA_EXTEND, "b.txt");
        assert_eq!(
            resolver.resolve(&first).unwrap().unwrap().full_path,
            r"C:\Warehouse\a.txt"
        );
        assert_eq!(
            resolver.resolve(&second).unwrap().unwrap().full_path,
            r"C:\Warehouse\b.txt"
        );
        assert_eq!(lookups.load(std::sync::atomic::Ordering::Relaxed), 1);
    }

    #[test]
    fn broken_chain_on_reserved_name_is_dropped() {
        let mut journal = MockJournal::new(500);
        let mut resolver = resolver_with(&mut journal, &[]);
        let record = file_rec(20, 99, 120, USN_REASON_DATA_EXTEND, "$TxfLog.blf");
        assert!(resolver.resolve(&record).unwrap().is_none());

        let container = file_rec(21, 99, 121, USN_REASON_DATA_EXTEND, "$TxfLogContainer00000001");
        assert!(resolver.resolve(&container).unwrap().is_none());
    }

    #[test]
    fn broken_chain_on_ordinary_name_fails_soft() {
        let mut journal = MockJournal::new(500);
        let mut resolver = resolver_with(&mut journal, &[]);
        let record = file_rec(20, 99, 120, USN_REASON_DATA_EXTEND, "orphan.txt");
        match resolver.resolve(&record) {
            Err(JournalError::Soft(SoftFailure::UnresolvedPath { name })) => {
                assert_eq!(name, "orphan.txt");
            }
            other => panic!("expected soft failure, got {other:?}"),
        }
    }

    #[test]
    fn reference_cycle_is_reported_as_broken_chain() {
        let mut journal = MockJournal::new(500);
        let dirs = vec![
            dir_rec(10, 11, 100, USN_REASON_BASIC_INFO_CHANGE, "A"),
            dir_rec(11, 10, 101, USN_REASON_BASIC_INFO_CHANGE, "B"),
        ];
        let mut resolver = resolver_with(&mut journal, &dirs);
        let record = file_rec(20, 10, 120, USN_REASON_DATA_EXTEND, "f.txt");
        assert!(matches!(
            resolver.resolve(&record),
            Err(JournalError::Soft(SoftFailure::UnresolvedPath { .. }))
        ));
    }

    #[test]
    fn root_level_records_resolve_directly() {
        let mut journal = MockJournal::new(500);
        let mut resolver = resolver_with(&mut journal, &[]);
        let record = file_rec(20, ROOT_FID, 120, USN_REASON_DATA_EXTEND, "pagefile.sys");
        assert_eq!(
            resolver.resolve(&record).unwrap().unwrap().full_path,
            r"C:\pagefile.sys"
        );
    }
}
