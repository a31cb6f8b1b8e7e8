//! Error types for dirmeta
//!
//! This module defines the error hierarchy covering:
//! - Sidecar read/write failures
//! - Directory entry lifecycle errors
//! - Tree walk errors
//! - Configuration and CLI errors
//! - Per-file visitor failures
//!
//! Design philosophy:
//! - Use thiserror for structured error types in library code
//! - Recoverable errors flow on the tracker's error stream; the walk goes on
//! - Contract violations (a record filed under the wrong directory) panic
//!   rather than reaching the disk

use std::path::PathBuf;
use thiserror::Error;

/// Top-level error type for the dirmeta crate
#[derive(Error, Debug)]
pub enum TrackError {
    /// Sidecar persistence errors
    #[error("Sidecar error: {0}")]
    Sidecar(#[from] SidecarError),

    /// Directory entry lifecycle errors
    #[error("Directory entry error: {0}")]
    Entry(#[from] EntryError),

    /// Tree traversal errors
    #[error("Walk error: {0}")]
    Walk(#[from] WalkError),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Per-file visitor failures
    #[error(transparent)]
    Visit(#[from] VisitError),
}

impl TrackError {
    /// Check if this error is recoverable (the walk can continue)
    pub fn is_recoverable(&self) -> bool {
        match self {
            TrackError::Sidecar(_) => true,
            TrackError::Entry(e) => e.is_recoverable(),
            TrackError::Walk(e) => e.is_recoverable(),
            TrackError::Config(_) => false,
            TrackError::Visit(_) => true,
        }
    }
}

/// Sidecar read/write errors
#[derive(Error, Debug)]
pub enum SidecarError {
    /// Failed to read an existing sidecar file
    #[error("Failed to read sidecar '{path}': {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Failed to write the sidecar's temporary file
    #[error("Failed to write sidecar '{path}': {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Failed to rename the temporary file over the old sidecar
    #[error("Failed to replace sidecar '{path}': {reason}")]
    Replace { path: PathBuf, reason: String },

    /// Failed to remove a sidecar that should no longer exist
    #[error("Failed to remove sidecar '{path}': {source}")]
    Remove {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Records could not be encoded as XML
    #[error("Failed to encode sidecar for '{path}': {reason}")]
    Encode { path: PathBuf, reason: String },
}

/// Directory entry lifecycle errors
#[derive(Error, Debug)]
pub enum EntryError {
    /// A visit was submitted after the entry began closing
    #[error("Directory entry for '{dir}' is closed")]
    Closed { dir: PathBuf },

    /// A visit task panicked
    #[error("Visit task for '{dir}' panicked: {message}")]
    VisitPanicked { dir: PathBuf, message: String },
}

impl EntryError {
    /// Check if this error is recoverable (can skip and continue)
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            EntryError::Closed { .. } | EntryError::VisitPanicked { .. }
        )
    }
}

/// Tree traversal errors
#[derive(Error, Debug)]
pub enum WalkError {
    /// Directory listing failed
    #[error("Failed to read directory '{path}': {source}")]
    ReadDir {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Stat operation failed
    #[error("Failed to stat '{path}': {source}")]
    Stat {
        path: PathBuf,
        source: std::io::Error,
    },

    /// The walk root is not a directory
    #[error("Root '{path}' is not a directory")]
    RootNotDirectory { path: PathBuf },
}

impl WalkError {
    /// Check if this error is recoverable (subtree can be skipped)
    ///
    /// Errors on the root itself are always fatal regardless of variant;
    /// the tracker enforces that positionally.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, WalkError::ReadDir { .. } | WalkError::Stat { .. })
    }
}

/// Configuration and CLI errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Invalid token count
    #[error("Invalid token count {count}: must be between 1 and {max}")]
    InvalidTokenCount { count: usize, max: usize },

    /// Invalid exclude pattern
    #[error("Invalid exclude pattern '{pattern}': {reason}")]
    InvalidExcludePattern { pattern: String, reason: String },

    /// Invalid sidecar or sentinel file name
    #[error("Invalid marker file name '{name}': {reason}")]
    InvalidMarkerName { name: String, reason: String },

    /// Root path error
    #[error("Invalid root '{path}': {reason}")]
    InvalidRoot { path: PathBuf, reason: String },
}

/// A per-file visitor failure, with the directory and file it happened in
#[derive(Error, Debug, Clone)]
#[error("Visitor failed for '{file}' in '{dir}': {reason}")]
pub struct VisitError {
    pub dir: PathBuf,
    pub file: String,
    pub reason: String,
}

impl VisitError {
    /// Wrap a visitor error with its directory and file context
    pub fn new(dir: impl Into<PathBuf>, file: impl Into<String>, error: &anyhow::Error) -> Self {
        Self {
            dir: dir.into(),
            file: file.into(),
            reason: format!("{error:#}"),
        }
    }
}

/// Result type alias for TrackError
pub type Result<T> = std::result::Result<T, TrackError>;

/// Result type alias for SidecarError
pub type SidecarResult<T> = std::result::Result<T, SidecarError>;

/// Result type alias for EntryError
pub type EntryResult<T> = std::result::Result<T, EntryError>;
