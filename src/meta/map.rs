//! Per-directory metadata cache
//!
//! A [`DirectoryMap`] holds the [`FileMeta`] records for one directory,
//! keyed by file name, together with a staleness flag. Mutations mark the
//! map stale; [`DirectoryMap::persist`] writes the sidecar back only when
//! something actually changed, so repeated runs over an unchanged tree
//! leave the disk untouched.

use crate::error::SidecarResult;
use crate::meta::{sidecar, FileMeta};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::debug;

/// Outcome of a [`DirectoryMap::range_mutate`] callback for one record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutateOutcome {
    /// Keep the (possibly modified) record and mark the cache stale
    Update,

    /// Leave the record untouched
    Ignore,

    /// Remove the record once the pass completes
    Delete,
}

#[derive(Debug, Default)]
struct MapState {
    records: BTreeMap<String, FileMeta>,
    stale: bool,
}

/// In-memory cache of one directory's file records, backed by an XML
/// sidecar
///
/// Individual operations are safe to call from concurrent visit tasks;
/// the map serializes them internally. `persist` is the exception: the
/// owning entry calls it only after all visits have finished.
#[derive(Debug)]
pub struct DirectoryMap {
    dir: PathBuf,
    sidecar_name: String,
    state: RwLock<MapState>,
}

impl DirectoryMap {
    /// Create an empty map for `dir` without touching the disk
    pub fn empty(dir: impl Into<PathBuf>, sidecar_name: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            sidecar_name: sidecar_name.into(),
            state: RwLock::new(MapState::default()),
        }
    }

    /// Load the map for `dir` from its sidecar
    ///
    /// A missing or malformed sidecar yields an empty, clean map.
    pub fn load(dir: impl Into<PathBuf>, sidecar_name: impl Into<String>) -> SidecarResult<Self> {
        let dir = dir.into();
        let sidecar_name = sidecar_name.into();
        let records = sidecar::load(&dir, &sidecar_name)?;
        Ok(Self {
            dir,
            sidecar_name,
            state: RwLock::new(MapState {
                records,
                stale: false,
            }),
        })
    }

    /// Directory this map describes
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Number of records in the map
    pub fn len(&self) -> usize {
        self.read_state().records.len()
    }

    /// Check if the map has no records
    pub fn is_empty(&self) -> bool {
        self.read_state().records.is_empty()
    }

    /// Check if the map has unpersisted changes
    pub fn is_stale(&self) -> bool {
        self.read_state().stale
    }

    /// Fetch a copy of the record for `name`
    pub fn get(&self, name: &str) -> Option<FileMeta> {
        self.read_state().records.get(name).cloned()
    }

    /// Insert or replace the record stored under its name
    ///
    /// Re-adding a record identical to the stored one leaves the map
    /// clean; only real changes make a later persist write.
    pub fn add(&self, meta: FileMeta) {
        let mut state = self.write_state();
        if state
            .records
            .get(&meta.name)
            .is_some_and(|existing| *existing == meta)
        {
            return;
        }
        state.stale = true;
        state.records.insert(meta.name.clone(), meta);
    }

    /// Remove the record for `name`, returning it if present
    ///
    /// The map only becomes stale when something was actually removed.
    pub fn remove(&self, name: &str) -> Option<FileMeta> {
        let mut state = self.write_state();
        let removed = state.records.remove(name);
        if removed.is_some() {
            state.stale = true;
        }
        removed
    }

    /// Read-only pass over all records, in name order
    pub fn range_read(&self, mut f: impl FnMut(&FileMeta)) {
        let state = self.read_state();
        for meta in state.records.values() {
            f(meta);
        }
    }

    /// Mutating pass over all records, in name order
    ///
    /// Records the callback votes [`MutateOutcome::Delete`] for are
    /// removed after the pass. Any update or deletion marks the map
    /// stale.
    pub fn range_mutate(&self, mut f: impl FnMut(&mut FileMeta) -> MutateOutcome) {
        let mut state = self.write_state();
        let mut doomed = Vec::new();
        let mut changed = false;

        for (name, meta) in state.records.iter_mut() {
            match f(meta) {
                MutateOutcome::Update => changed = true,
                MutateOutcome::Ignore => {}
                MutateOutcome::Delete => doomed.push(name.clone()),
            }
        }

        for name in &doomed {
            state.records.remove(name);
        }
        if changed || !doomed.is_empty() {
            state.stale = true;
        }
    }

    /// Write the cache back to its sidecar if anything changed
    ///
    /// A clean map is a no-op and leaves the disk untouched. A stale map
    /// with no records removes the sidecar file. Otherwise the sidecar is
    /// atomically replaced. Returns whether a disk change happened.
    ///
    /// # Panics
    ///
    /// Panics if any record claims a different directory than this map.
    /// Such a record is a caller bug and must never reach the disk.
    pub fn persist(&self) -> SidecarResult<bool> {
        let mut state = self.write_state();

        for meta in state.records.values() {
            if meta.dir != self.dir {
                panic!(
                    "record '{}' belongs to '{}' but sits in the map for '{}'",
                    meta.name,
                    meta.dir.display(),
                    self.dir.display()
                );
            }
        }

        if !state.stale {
            debug!(dir = %self.dir.display(), "Cache clean, persist skipped");
            return Ok(false);
        }

        if state.records.is_empty() {
            sidecar::remove(&self.dir, &self.sidecar_name)?;
        } else {
            sidecar::save(&self.dir, &self.sidecar_name, &state.records)?;
        }

        state.stale = false;
        Ok(true)
    }

    fn read_state(&self) -> RwLockReadGuard<'_, MapState> {
        self.state.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write_state(&self) -> RwLockWriteGuard<'_, MapState> {
        self.state.write().unwrap_or_else(|e| e.into_inner())
    }
}
