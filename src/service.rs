//! Per-volume scan orchestration and the change-set consumer surface.
//!
//! For every volume touched by the configured source paths the service
//! decides between incremental and full-scan mode, runs the
//! read, consolidate and resolve pipeline when incremental is possible, and
//! produces one [`VolumeChangeSet`] carrying the changed files, the minimal
//! covering folder set, and the journal checkpoint to persist for the next
//! run. Soft failures demote only the volume they occur on; hard errors
//! propagate to the caller.

use crate::checkpoint::{JournalCheckpoint, ScanConfig};
use crate::consolidate;
use crate::errors::{JournalError, SoftFailure};
use crate::journal::{CancelToken, JournalAccess};
use crate::paths;
use crate::record::DEFAULT_REASON_MASK;
use crate::resolver::{PathResolver, ReservedNames, ResolvedChange};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use log::{debug, info, warn};

/// Final result for one volume, immutable once returned.
///
/// In incremental mode `files` and `folders` hold the resolved changes; in
/// full-scan mode they hold the volume's configured sources verbatim. Either
/// way no folder is a descendant of another, and no file lies under a listed
/// folder.
#[derive(Debug)]
pub struct VolumeChangeSet {
    /// Volume root, e.g. `C:\`.
    pub volume: String,
    pub files: BTreeSet<String>,
    /// Minimal covering folder set, each entry with a trailing separator.
    pub folders: Vec<String>,
    /// Checkpoint to persist for the next run. `None` only when the journal
    /// itself could not be opened, in which case no fresh baseline exists.
    pub checkpoint: Option<JournalCheckpoint>,
    pub is_full_scan: bool,
    /// Why the volume fell back to a full scan, for diagnostics.
    pub failure: Option<SoftFailure>,
}

/// Turns raw journal records into verified per-volume change sets.
///
/// Volumes are processed independently and own their native handles, so
/// distinct volumes are safe to scan from different threads; within one
/// volume the pipeline is strictly sequential.
pub struct UsnJournalService {
    volumes: BTreeMap<String, VolumeChangeSet>,
}

impl UsnJournalService {
    /// Scans every volume covered by `sources` using the live change
    /// journal. Directories are distinguished by a trailing separator.
    #[cfg(windows)]
    pub fn scan(
        sources: &[String],
        prev_checkpoints: &[JournalCheckpoint],
        config: &ScanConfig,
        cancel: &CancelToken,
    ) -> Result<Self, JournalError> {
        Self::scan_with(
            crate::native::UsnJournal::open,
            sources,
            prev_checkpoints,
            config,
            cancel,
        )
    }

    /// The journal only exists on Windows; fail fast instead of branching
    /// deep inside the resolution logic.
    #[cfg(not(windows))]
    pub fn scan(
        _sources: &[String],
        _prev_checkpoints: &[JournalCheckpoint],
        _config: &ScanConfig,
        _cancel: &CancelToken,
    ) -> Result<Self, JournalError> {
        Err(JournalError::UnsupportedPlatform)
    }

    /// Platform-independent entry point: `open` supplies the journal access
    /// for a volume root.
    pub fn scan_with<J, F>(
        mut open: F,
        sources: &[String],
        prev_checkpoints: &[JournalCheckpoint],
        config: &ScanConfig,
        cancel: &CancelToken,
    ) -> Result<Self, JournalError>
    where
        J: JournalAccess,
        F: FnMut(&str) -> Result<J, JournalError>,
    {
        let config_hash = config.config_hash(sources);
        let previous: HashMap<&str, &JournalCheckpoint> = prev_checkpoints
            .iter()
            .map(|c| (c.volume.as_str(), c))
            .collect();

        let mut volumes = BTreeMap::new();
        for (volume, volume_sources) in sources_by_volume(sources)? {
            if cancel.is_cancelled() {
                break;
            }
            info!("reading change journal for volume {volume}");

            let prev = previous.get(volume.as_str()).copied();
            match scan_volume(&mut open, &volume, &volume_sources, prev, &config_hash, cancel) {
                Ok(change_set) => {
                    volumes.insert(volume, change_set);
                }
                // partial per-volume state must not leak into the result
                Err(JournalError::Cancelled) => {
                    debug!("scan cancelled, abandoning volume {volume}");
                    break;
                }
                Err(err) => return Err(err),
            }
        }

        Ok(UsnJournalService { volumes })
    }

    /// The per-volume change sets, ordered by volume root.
    pub fn volumes(&self) -> impl Iterator<Item = &VolumeChangeSet> {
        self.volumes.values()
    }

    pub fn volume(&self, volume_root: &str) -> Option<&VolumeChangeSet> {
        self.volumes.get(volume_root).or_else(|| {
            self.volumes
                .iter()
                .find(|(root, _)| paths::eq_ignore_case(root, volume_root))
                .map(|(_, data)| data)
        })
    }

    pub fn into_volumes(self) -> BTreeMap<String, VolumeChangeSet> {
        self.volumes
    }

    /// Returns true if `path` is already accounted for by this run's result:
    /// its volume ran in full-scan mode, or the path is listed in the file
    /// set, or it equals or lies below one of the result folders.
    ///
    /// Callers use the negative answer to fall back to the previous backup's
    /// retained entry for the path instead of re-examining it.
    pub fn is_path_enumerated(&self, path: &str) -> bool {
        let Some(volume_root) = paths::volume_root_of(path) else {
            return false;
        };
        let Some(data) = self.volume(&volume_root) else {
            return false;
        };

        if data.is_full_scan {
            return true;
        }
        if data.files.contains(path) || data.files.iter().any(|f| paths::eq_ignore_case(f, path)) {
            return true;
        }
        data.folders.iter().any(|folder| {
            paths::eq_ignore_case(path, folder) || paths::is_path_below_folder(path, folder)
        })
    }
}

/// Groups the configured sources by their volume root, keeping volume order
/// deterministic.
fn sources_by_volume(sources: &[String]) -> Result<BTreeMap<String, Vec<String>>, JournalError> {
    let mut by_volume: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for source in sources {
        let root = paths::volume_root_of(source)
            .ok_or_else(|| JournalError::InvalidSourcePath(source.clone()))?;
        by_volume.entry(root).or_default().push(source.clone());
    }
    Ok(by_volume)
}

fn scan_volume<J, F>(
    open: &mut F,
    volume: &str,
    sources: &[String],
    prev: Option<&JournalCheckpoint>,
    config_hash: &str,
    cancel: &CancelToken,
) -> Result<VolumeChangeSet, JournalError>
where
    J: JournalAccess,
    F: FnMut(&str) -> Result<J, JournalError>,
{
    let mut journal = match open(volume) {
        Ok(journal) => journal,
        Err(JournalError::Soft(failure)) => {
            // no journal, no baseline: the next run has to full-scan too
            warn!("volume {volume} has no usable change journal: {failure}");
            return Ok(full_scan_set(volume, sources, None, failure));
        }
        Err(err) => return Err(err),
    };

    let meta = *journal.metadata();
    debug!("journal state for {volume}: {meta:?}");
    // a full scan still establishes a fresh baseline for next time
    let checkpoint = JournalCheckpoint {
        volume: volume.to_string(),
        journal_id: meta.journal_id,
        next_usn: meta.next_usn,
        config_hash: config_hash.to_string(),
    };

    match scan_incremental(&mut journal, volume, sources, prev, config_hash, cancel) {
        Ok((files, folders)) => Ok(VolumeChangeSet {
            volume: volume.to_string(),
            files,
            folders,
            checkpoint: Some(checkpoint),
            is_full_scan: false,
            failure: None,
        }),
        Err(JournalError::Soft(failure)) => {
            info!("volume {volume} falls back to a full scan: {failure}");
            Ok(full_scan_set(volume, sources, Some(checkpoint), failure))
        }
        Err(err) => Err(err),
    }
}

fn scan_incremental<J: JournalAccess>(
    journal: &mut J,
    volume: &str,
    sources: &[String],
    prev: Option<&JournalCheckpoint>,
    config_hash: &str,
    cancel: &CancelToken,
) -> Result<(BTreeSet<String>, Vec<String>), JournalError> {
    // the journal is only usable if continuity against the previous run can
    // be proven; any mismatch forces a full scan before a single read
    let prev = prev.ok_or(SoftFailure::NoPreviousCheckpoint)?;
    let meta = journal.metadata();
    if prev.journal_id != meta.journal_id {
        return Err(SoftFailure::JournalIdChanged {
            previous: prev.journal_id,
            current: meta.journal_id,
        }
        .into());
    }
    if prev.next_usn == 0 {
        return Err(SoftFailure::NextUsnZero.into());
    }
    if prev.config_hash != config_hash {
        return Err(SoftFailure::ConfigChanged.into());
    }

    let records = journal.read_changes(prev.next_usn, DEFAULT_REASON_MASK, cancel)?;
    debug!("volume {volume}: {} journal records since USN {}", records.len(), prev.next_usn);

    let batch = consolidate::consolidate(&records);
    let mut resolver = PathResolver::new(journal, volume, ReservedNames::default());
    resolver.index_directories(batch.surviving.iter());
    let mut resolved: Vec<ResolvedChange> = Vec::new();
    for record in &batch.net_changes {
        if let Some(change) = resolver.resolve(record)? {
            resolved.push(change);
        }
    }

    let mut files: BTreeSet<String> = BTreeSet::new();
    let mut folders: Vec<String> = Vec::new();
    for source in sources {
        if cancel.is_cancelled() {
            return Err(JournalError::Cancelled);
        }
        let is_folder_source = source.ends_with(paths::SEPARATOR);
        for change in &resolved {
            let covered = paths::eq_ignore_case(&change.full_path, source)
                || (is_folder_source && paths::is_path_below_folder(&change.full_path, source));
            if !covered {
                continue;
            }
            // classified by the record's own attributes, not its parent's
            if change.record.is_dir() {
                folders.push(change.full_path.clone());
            } else {
                files.insert(change.full_path.clone());
            }
        }
    }

    let folders = paths::simplify_folder_list(folders);
    let files = paths::files_not_in_folders(files, &folders);
    Ok((files, folders))
}

/// Full-scan fallback: report the volume's configured sources as given.
fn full_scan_set(
    volume: &str,
    sources: &[String],
    checkpoint: Option<JournalCheckpoint>,
    failure: SoftFailure,
) -> VolumeChangeSet {
    let mut files: BTreeSet<String> = BTreeSet::new();
    let mut folders: Vec<String> = Vec::new();
    for source in sources {
        if source.ends_with(paths::SEPARATOR) {
            folders.push(source.clone());
        } else {
            files.insert(source.clone());
        }
    }
    let folders = paths::simplify_folder_list(folders);
    let files = paths::files_not_in_folders(files, &folders);

    VolumeChangeSet {
        volume: volume.to_string(),
        files,
        folders,
        checkpoint,
        is_full_scan: true,
        failure: Some(failure),
    }
}
