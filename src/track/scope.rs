//! Subtree-exit detection over the walk's stream of visited directories
//!
//! The walk reports each directory it opens, in depth-first pre-order. A
//! pending directory stays in scope while later visits remain inside its
//! subtree; the first visit that falls outside proves the walk has left,
//! and the directory's payload is handed back to the caller for closing.
//!
//! Containment is segment-aware: `/a/bb` is not inside `/a/b`. The
//! pending list therefore always forms a root-to-leaf chain of the
//! current walk position.

use std::path::{Path, PathBuf};

/// Tracks which visited directories the walk has finished with
///
/// The payload type is whatever the caller needs back when a directory
/// closes; the tracker owns it while the directory is in scope.
#[derive(Debug)]
pub struct ScopeTracker<T> {
    /// Pending directories in visit order (shallowest first)
    pending: Vec<(PathBuf, T)>,
}

impl<T> ScopeTracker<T> {
    /// Create an empty tracker
    pub fn new() -> Self {
        Self {
            pending: Vec::new(),
        }
    }

    /// Number of directories still in scope
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    /// Check if nothing is in scope
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Record a visit to `path`, holding `payload` until the walk leaves
    /// its subtree
    ///
    /// Returns the payloads of every pending directory the visit proves
    /// the walk has left, deepest first.
    pub fn visit(&mut self, path: impl Into<PathBuf>, payload: T) -> Vec<(PathBuf, T)> {
        let path = path.into();
        let closed = self.close_out_of_scope(&path);
        self.pending.push((path, payload));
        closed
    }

    /// Look up the payload pending for exactly `path`
    pub fn find(&self, path: &Path) -> Option<&T> {
        self.pending
            .iter()
            .rev()
            .find(|(dir, _)| dir.as_path() == path)
            .map(|(_, payload)| payload)
    }

    /// Retire everything still pending, deepest first
    pub fn drain(&mut self) -> Vec<(PathBuf, T)> {
        let mut all: Vec<_> = self.pending.drain(..).collect();
        all.reverse();
        all
    }

    fn close_out_of_scope(&mut self, visited: &Path) -> Vec<(PathBuf, T)> {
        let mut retained = Vec::with_capacity(self.pending.len());
        let mut closed = Vec::new();

        for (dir, payload) in self.pending.drain(..) {
            // starts_with compares whole path segments, so sibling
            // prefixes like /a/b and /a/bb stay distinct
            if visited.starts_with(&dir) {
                retained.push((dir, payload));
            } else {
                closed.push((dir, payload));
            }
        }

        self.pending = retained;
        closed.reverse();
        closed
    }
}

impl<T> Default for ScopeTracker<T> {
    fn default() -> Self {
        Self::new()
    }
}
