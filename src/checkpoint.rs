//! Journal checkpoints and the configuration digest that guards them.
//!
//! A checkpoint records where the previous backup stopped reading one
//! volume's journal. It is only usable when the journal id still matches, the
//! stored next-USN is non-zero, and the configuration digest equals the
//! current one. Any mismatch voids the checkpoint and forces a full scan of
//! that volume.

use crate::Usn;
use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};

/// Per-volume journal position persisted across backup runs.
///
/// Produced as part of every [`crate::VolumeChangeSet`] and consumed as the
/// "previous journal data" input of the next run. Storage is up to the
/// caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JournalCheckpoint {
    /// Volume root, e.g. `C:\`.
    pub volume: String,
    pub journal_id: u64,
    /// First USN the next incremental read starts from. Zero is reserved as
    /// the forced-rescan sentinel and never emitted by a successful scan.
    pub next_usn: Usn,
    /// Digest of the filter/source configuration the checkpoint was taken
    /// under, see [`ScanConfig::config_hash`].
    pub config_hash: String,
}

/// The parts of the backup configuration that decide which journal records
/// would have been visible to the previous run.
#[derive(Debug, Clone, Default)]
pub struct ScanConfig {
    /// Textual form of the active include/exclude filter.
    pub filter_text: String,
    /// Attribute mask used to skip entries (hidden, system, ...).
    pub attribute_filter: u32,
    /// Size threshold above which files are skipped, in bytes. Negative
    /// disables the threshold.
    pub skip_files_larger_than: i64,
}

impl ScanConfig {
    /// Fixed-length digest over the filter text, the full source list, the
    /// attribute filter and the size threshold.
    ///
    /// If any of these change, records filtered away by the previous run may
    /// suddenly be in scope, so stored checkpoints must be considered void.
    pub fn config_hash(&self, sources: &[String]) -> String {
        let mut hasher = Sha1::new();
        hasher.update(self.filter_text.as_bytes());
        hasher.update([0u8]);
        hasher.update(sources.join("; ").as_bytes());
        hasher.update([0u8]);
        hasher.update(self.attribute_filter.to_string().as_bytes());
        hasher.update([0u8]);
        hasher.update(self.skip_files_larger_than.to_string().as_bytes());
        hex::encode(hasher.finalize())
    }
}
