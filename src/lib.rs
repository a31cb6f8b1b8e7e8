//! dirmeta - Concurrent Directory Metadata Tracker
//!
//! A tool for keeping per-directory metadata sidecars in sync with the files
//! they describe. Walks a tree once, checksums what changed, and persists each
//! directory's records the moment its subtree is done. Designed so memory
//! tracks the open ancestor chain, not the size of the tree.
//!
//! # Features
//!
//! - **Sidecar Per Directory**: Records live in one XML file next to the
//!   files they describe, so a subtree can be moved or inspected without
//!   any central database.
//!
//! - **Bounded Concurrency**: Two token pools cap in-flight file visits and
//!   directory loads, keeping disk pressure flat on wide trees.
//!
//! - **Child-Before-Parent Persist**: Subtree exits are detected during the
//!   walk and entries close deepest-first, so a directory's sidecar is
//!   written only after everything below it has settled.
//!
//! - **Staleness Skip**: The bundled checksum visitor rehashes a file only
//!   when its size or mtime no longer matches the stored record.
//!
//! - **Swappable Entry Factory**: The walk asks a factory for each directory
//!   handle, so tests and embedders can substitute their own tracking
//!   backend.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                       Directory Tree                             │
//! │                  (local or network mount)                        │
//! └─────────────────────────────┬───────────────────────────────────┘
//!                               │
//!                               │ pre-order walk
//!                               ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                        TreeTracker                               │
//! │  ┌──────────────┐  ┌──────────────┐         ┌───────────────┐  │
//! │  │ ScopeTracker │  │  TokenPool   │         │  Closer Task  │  │
//! │  │ (exit detect)│  │ (files/dirs) │         │ (child-first) │  │
//! │  └──────┬───────┘  └──────┬───────┘         └───────▲───────┘  │
//! │         │                 │                         │          │
//! │         ▼                 ▼                         │          │
//! │  ┌───────────────────────────────────────┐          │          │
//! │  │          DirEntry (one per dir)       │──────────┘          │
//! │  │  - job queue + visitor tasks          │                     │
//! │  │  - DirectoryMap (in-memory records)   │                     │
//! │  └──────────────────┬────────────────────┘                     │
//! └─────────────────────┼──────────────────────────────────────────┘
//!                       │ persist on close
//!                       ▼
//!            ┌──────────────────────┐
//!            │    .dirmeta.xml      │
//!            │ (one per directory)  │
//!            └──────────────────────┘
//! ```
//!
//! # Example
//!
//! ```bash
//! # Track a tree with defaults
//! dirmeta /data
//!
//! # More hashing parallelism, drop records for deleted files
//! dirmeta /data -t 8 --prune
//!
//! # Leave build output alone
//! dirmeta /data --exclude '/target$'
//! ```

pub mod config;
pub mod error;
pub mod meta;
pub mod progress;
pub mod track;
pub mod visit;

pub use config::{CliArgs, TrackerConfig};
pub use error::{Result, TrackError};
pub use meta::{DirectoryMap, FileMeta, MutateOutcome};
pub use track::{
    DirEntryFactory, EntryOptions, FileVisitor, SidecarEntryFactory, TokenPool, TrackSummary,
    TrackedDir, TreeTracker,
};
pub use visit::checksum_visitor;
