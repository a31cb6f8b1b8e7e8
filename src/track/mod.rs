//! Concurrent tree tracking
//!
//! The tracker walks a directory tree depth-first, opening an entry per
//! directory and dispatching its files to visitors under a token budget.
//! A scope tracker watches the stream of visited directories to decide
//! when a subtree is finished, and a single closer task retires entries
//! in that order so children always persist before their parents.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐  visited dirs   ┌──────────────┐
//! │  TreeTracker │────────────────▶│ ScopeTracker │
//! │  (DFS walk)  │◀────────────────│ subtree exit │
//! └──────┬───────┘  finished dirs  └──────────────┘
//!        │ open / visit_file              │ close order
//! ┌──────▼───────┐                 ┌──────▼───────┐
//! │   DirEntry   │  ...  N dirs    │ closer task  │
//! │ visits+map   │────────────────▶│ close+persist│
//! └──────────────┘                 └──────────────┘
//! ```

pub mod entry;
pub mod scope;
pub mod tokens;
pub mod tracker;

pub use entry::{
    DirEntry, DirEntryFactory, EntryOptions, FileVisitor, SidecarEntryFactory, TrackedDir,
    VisitJob,
};
pub use scope::ScopeTracker;
pub use tokens::{Token, TokenPool};
pub use tracker::{RunningTracker, TrackReport, TrackSummary, TrackerStats, TreeTracker};
