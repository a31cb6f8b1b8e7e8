//! Per-file metadata records and the per-directory cache
//!
//! A [`FileMeta`] describes one file: its content checksum, the size and
//! mtime observed when that checksum was computed, and free-form tags and
//! backup-volume markers. Records live in a [`DirectoryMap`], one per
//! directory, persisted as an XML sidecar inside that directory.

use std::collections::BTreeSet;
use std::fs::Metadata;
use std::path::PathBuf;
use std::time::UNIX_EPOCH;

pub mod map;
pub mod sidecar;

pub use map::{DirectoryMap, MutateOutcome};

/// Metadata record for a single file within a directory
///
/// The checksum is only trustworthy while the file's current size and
/// mtime match the recorded ones; [`FileMeta::checksum_current`] is that
/// test. Tags and volumes are sorted sets so serialization is
/// deterministic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileMeta {
    /// File name within the directory (no path separators)
    pub name: String,

    /// Directory this record belongs to (never persisted)
    pub dir: PathBuf,

    /// Content checksum as lowercase hex text
    pub checksum: String,

    /// File size in bytes when the checksum was computed
    pub size: u64,

    /// Modification time in seconds since the epoch when the checksum
    /// was computed (negative for pre-epoch times)
    pub mtime: i64,

    /// Free-form tags
    pub tags: BTreeSet<String>,

    /// Backup volume markers
    pub volumes: BTreeSet<String>,
}

impl FileMeta {
    /// Create a blank record for `name` in `dir`
    pub fn new(dir: impl Into<PathBuf>, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            dir: dir.into(),
            checksum: String::new(),
            size: 0,
            mtime: 0,
            tags: BTreeSet::new(),
            volumes: BTreeSet::new(),
        }
    }

    /// Check whether the recorded checksum still describes a file with
    /// the given size and mtime
    pub fn checksum_current(&self, size: u64, mtime: i64) -> bool {
        !self.checksum.is_empty() && self.size == size && self.mtime == mtime
    }

    /// Add a tag. Returns true if the tag was not already present.
    ///
    /// Tags may not contain commas; the sidecar encodes them as a
    /// comma-joined list.
    pub fn add_tag(&mut self, tag: impl Into<String>) -> bool {
        let tag = tag.into();
        debug_assert!(!tag.contains(','), "tags may not contain commas");
        self.tags.insert(tag)
    }

    /// Remove a tag. Returns true if the tag was present.
    pub fn remove_tag(&mut self, tag: &str) -> bool {
        self.tags.remove(tag)
    }

    /// Check whether a tag is present
    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.contains(tag)
    }

    /// Add a backup volume marker. Returns true if it was not already present.
    ///
    /// Volume names may not contain commas, like tags.
    pub fn add_volume(&mut self, volume: impl Into<String>) -> bool {
        let volume = volume.into();
        debug_assert!(!volume.contains(','), "volume names may not contain commas");
        self.volumes.insert(volume)
    }

    /// Remove a backup volume marker. Returns true if it was present.
    pub fn remove_volume(&mut self, volume: &str) -> bool {
        self.volumes.remove(volume)
    }

    /// Check whether a volume marker is present
    pub fn has_volume(&self, volume: &str) -> bool {
        self.volumes.contains(volume)
    }

    /// Full path of the file this record describes
    pub fn path(&self) -> PathBuf {
        self.dir.join(&self.name)
    }
}

/// Modification time of `metadata` as seconds since the epoch
///
/// Pre-epoch times map to negative seconds. Platforms without mtime
/// support report 0.
pub fn mtime_of(metadata: &Metadata) -> i64 {
    let Ok(modified) = metadata.modified() else {
        return 0;
    };
    match modified.duration_since(UNIX_EPOCH) {
        Ok(after) => i64::try_from(after.as_secs()).unwrap_or(i64::MAX),
        Err(before) => -i64::try_from(before.duration().as_secs()).unwrap_or(i64::MAX),
    }
}
