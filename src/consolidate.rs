//! Collapses each file reference number's event history into net changes.
//!
//! A single backup window may see a file created, written, renamed and
//! deleted again. Reporting each record separately would surface paths that
//! no longer exist, and objects that never existed outside the window at all.
//! Consolidation walks every FRN's records in USN order and keeps only the
//! runs that net out to a real, reportable change.

use crate::record::{UsnRecord, reason};
use std::collections::HashMap;

const CREATES: u32 = reason::USN_REASON_FILE_CREATE | reason::USN_REASON_RENAME_NEW_NAME;
const REMOVES: u32 = reason::USN_REASON_FILE_DELETE | reason::USN_REASON_RENAME_OLD_NAME;

/// Outcome of consolidating one record batch.
#[derive(Debug, Default)]
pub struct Consolidated {
    /// At most one entry per flushed run: the run's last record, carrying the
    /// name and location to resolve. Ordered by first appearance of the FRN.
    pub net_changes: Vec<UsnRecord>,
    /// Every record belonging to a flushed run. These are the directory
    /// entries that remain valid ancestry evidence for path resolution; a
    /// folder whose history cancelled out completely contributes nothing
    /// here, so resolving a survivor beneath it must go through the live
    /// lookup instead.
    pub surviving: Vec<UsnRecord>,
}

/// Consolidates a batch of records (already in USN order, as read from the
/// journal).
///
/// Per FRN: a create or rename-into marks the object as born inside the
/// window. A delete or rename-out closes the current run: if the object was
/// born inside the window the whole run cancels out, otherwise it is flushed
/// as a net change (the object existed before the window and is now gone or
/// renamed away). Whatever remains at the end of the history is flushed too.
pub fn consolidate(records: &[UsnRecord]) -> Consolidated {
    let mut order: Vec<u64> = Vec::new();
    let mut buckets: HashMap<u64, Vec<&UsnRecord>> = HashMap::new();
    for record in records {
        buckets.entry(record.fid).or_insert_with(|| {
            order.push(record.fid);
            Vec::new()
        }).push(record);
    }

    let mut result = Consolidated::default();
    for fid in order {
        let Some(history) = buckets.remove(&fid) else {
            continue;
        };

        let mut run: Vec<&UsnRecord> = Vec::new();
        let mut was_created = false;
        for record in history {
            if record.reason & CREATES != 0 {
                was_created = true;
            }
            run.push(record);
            if record.reason & REMOVES != 0 {
                if !was_created {
                    flush(&mut run, &mut result);
                } else {
                    // created and removed inside the window: never existed
                    // as far as this backup is concerned
                    run.clear();
                }
                was_created = false;
            }
        }
        flush(&mut run, &mut result);
    }

    result
}

fn flush(run: &mut Vec<&UsnRecord>, result: &mut Consolidated) {
    if let Some(last) = run.last() {
        result.net_changes.push((*last).clone());
        result.surviving.extend(run.iter().map(|r| (*r).clone()));
    }
    run.clear();
}
