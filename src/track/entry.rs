//! Per-directory entry lifecycle
//!
//! An entry is opened when the walk reaches a directory and closed exactly
//! once when the walk leaves its subtree. Between the two it accepts file
//! visits, fanning each out to a blocking thread where the visitor runs
//! against the directory's metadata map.
//!
//! Closing is signalled by dropping the entry's job sender. The runner
//! task drains whatever was accepted, prunes ghost records if configured,
//! and persists the map exactly once.
//!
//! The tracker talks to entries through the `TrackedDir` and
//! `DirEntryFactory` traits so tests can substitute instrumented stubs.

use std::fs::Metadata;
use std::panic;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::{self, JoinSet};
use tracing::debug;

use crate::config::DEFAULT_SIDECAR_NAME;
use crate::error::{EntryError, EntryResult, Result, TrackError, VisitError};
use crate::meta::{DirectoryMap, MutateOutcome};
use crate::track::tokens::{Token, TokenPool};

/// A unit of per-file work submitted to a directory entry
#[derive(Debug)]
pub struct VisitJob {
    /// File name within the entry's directory
    pub name: String,
    /// Stat data captured when the walk listed the directory
    pub metadata: Metadata,
    /// File token held until the visit finishes
    pub token: Option<Token>,
}

impl VisitJob {
    /// Create a job carrying a concurrency token
    pub fn new(name: impl Into<String>, metadata: Metadata, token: Token) -> Self {
        Self {
            name: name.into(),
            metadata,
            token: Some(token),
        }
    }
}

/// Per-file callback run for every visited file
///
/// Receives the directory's map, the file name, and the stat data from
/// the listing. It runs on a blocking thread, so synchronous file I/O
/// inside the visitor is fine.
pub type FileVisitor =
    Arc<dyn Fn(&DirectoryMap, &str, &Metadata) -> anyhow::Result<()> + Send + Sync>;

/// Tuning knobs for directory entries
#[derive(Debug, Clone)]
pub struct EntryOptions {
    /// Sidecar file name inside each directory
    pub sidecar_name: String,
    /// Visit queue depth before submitters block
    pub queue_capacity: usize,
    /// Error channel depth before the runner blocks reporting
    pub error_capacity: usize,
    /// Drop records whose files no longer exist before persisting
    pub prune: bool,
}

impl Default for EntryOptions {
    fn default() -> Self {
        Self {
            sidecar_name: DEFAULT_SIDECAR_NAME.to_string(),
            queue_capacity: 64,
            error_capacity: 16,
            prune: false,
        }
    }
}

/// A directory being tracked: accepts file visits, then closes exactly once
///
/// Entries are shared by reference across the walk's spawned futures, so
/// implementations must be safe to call concurrently.
#[async_trait]
pub trait TrackedDir: Send + Sync {
    /// Directory this entry tracks
    fn dir(&self) -> &Path;

    /// Submit a file visit
    ///
    /// Applies backpressure while the entry's queue is full. Fails only
    /// if the entry's runner has already shut down.
    async fn visit_file(&self, job: VisitJob) -> EntryResult<()>;

    /// Take the entry's error stream
    ///
    /// Returns the receiver on the first call and None afterwards.
    /// Errors nobody drains are discarded when the entry closes.
    fn take_errors(&mut self) -> Option<mpsc::Receiver<TrackError>>;

    /// Close the entry: wait for accepted visits, prune, persist
    ///
    /// Consumes the entry; a directory closes exactly once.
    async fn close(self: Box<Self>);
}

/// Opens directory entries on behalf of the tree tracker
#[async_trait]
pub trait DirEntryFactory: Send + Sync {
    /// Open an entry for `dir`
    async fn open(&self, dir: &Path) -> Result<Box<dyn TrackedDir>>;
}

/// Standard entry backed by a sidecar-loaded directory map
pub struct DirEntry {
    dir: PathBuf,
    map: Arc<DirectoryMap>,
    jobs: mpsc::Sender<VisitJob>,
    errors: Option<mpsc::Receiver<TrackError>>,
    runner: task::JoinHandle<()>,
}

impl DirEntry {
    /// Open an entry for `dir`, loading any existing sidecar
    ///
    /// The directory token gates only the blocking sidecar read. It is
    /// released as soon as the load finishes, so ancestor entries held
    /// open by a deep walk never starve the pool.
    pub async fn open(
        dir: impl Into<PathBuf>,
        options: &EntryOptions,
        visitor: FileVisitor,
        token: Token,
    ) -> Result<Self> {
        let dir = dir.into();
        let load_dir = dir.clone();
        let sidecar_name = options.sidecar_name.clone();
        let map = task::spawn_blocking(move || DirectoryMap::load(load_dir, sidecar_name))
            .await
            .expect("Blocking task panicked")?;
        drop(token);
        let map = Arc::new(map);

        let (jobs_tx, jobs_rx) = mpsc::channel(options.queue_capacity);
        let (errors_tx, errors_rx) = mpsc::channel(options.error_capacity);

        let runner = tokio::spawn(run_entry(
            Arc::clone(&map),
            jobs_rx,
            errors_tx,
            visitor,
            options.prune,
        ));

        Ok(Self {
            dir,
            map,
            jobs: jobs_tx,
            errors: Some(errors_rx),
            runner,
        })
    }

    /// The entry's directory map
    pub fn map(&self) -> &Arc<DirectoryMap> {
        &self.map
    }
}

#[async_trait]
impl TrackedDir for DirEntry {
    fn dir(&self) -> &Path {
        &self.dir
    }

    async fn visit_file(&self, job: VisitJob) -> EntryResult<()> {
        self.jobs.send(job).await.map_err(|_| EntryError::Closed {
            dir: self.dir.clone(),
        })
    }

    fn take_errors(&mut self) -> Option<mpsc::Receiver<TrackError>> {
        self.errors.take()
    }

    async fn close(self: Box<Self>) {
        let DirEntry {
            dir,
            jobs,
            errors,
            runner,
            ..
        } = *self;

        // Dropping the job sender is the runner's close signal
        drop(jobs);
        drop(errors);

        if let Err(e) = runner.await {
            if e.is_panic() {
                panic::resume_unwind(e.into_panic());
            }
        }
        debug!("Closed directory entry for {}", dir.display());
    }
}

/// Runner task behind each entry
///
/// Fans accepted visits out to blocking threads, waits for them once the
/// job queue closes, then prunes and persists.
async fn run_entry(
    map: Arc<DirectoryMap>,
    mut jobs: mpsc::Receiver<VisitJob>,
    errors: mpsc::Sender<TrackError>,
    visitor: FileVisitor,
    prune: bool,
) {
    let mut visits: JoinSet<()> = JoinSet::new();

    while let Some(job) = jobs.recv().await {
        let map = Arc::clone(&map);
        let visitor = Arc::clone(&visitor);
        let errors = errors.clone();

        visits.spawn(async move {
            let dir = map.dir().to_path_buf();
            let name = job.name.clone();

            let outcome = task::spawn_blocking(move || {
                let result = visitor(&map, &job.name, &job.metadata);
                // Dropping the job releases its file token
                drop(job);
                result
            })
            .await;

            match outcome {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    let _ = errors
                        .send(TrackError::Visit(VisitError::new(dir, name, &e)))
                        .await;
                }
                Err(join_err) => {
                    // Visitors are caller-supplied; contain their panics
                    let message = panic_message(join_err);
                    let _ = errors
                        .send(TrackError::Entry(EntryError::VisitPanicked { dir, message }))
                        .await;
                }
            }
        });
    }

    // Queue closed: wait out the in-flight visits
    while let Some(joined) = visits.join_next().await {
        if let Err(join_err) = joined {
            if join_err.is_panic() {
                let _ = errors
                    .send(TrackError::Entry(EntryError::VisitPanicked {
                        dir: map.dir().to_path_buf(),
                        message: panic_message(join_err),
                    }))
                    .await;
            }
        }
    }

    // All visits done: prune ghosts if asked, then persist exactly once
    let persist_map = Arc::clone(&map);
    let outcome = task::spawn_blocking(move || {
        if prune {
            prune_missing(&persist_map);
        }
        persist_map.persist()
    })
    .await;

    match outcome {
        Ok(Ok(written)) => {
            if written {
                debug!("Persisted sidecar for {}", map.dir().display());
            }
        }
        Ok(Err(e)) => {
            let _ = errors.send(TrackError::Sidecar(e)).await;
        }
        Err(join_err) => {
            // Persisting panics only on a filing contract violation;
            // that must surface, not land on the error stream
            if join_err.is_panic() {
                panic::resume_unwind(join_err.into_panic());
            }
        }
    }
}

/// Drop records whose files no longer exist in the directory
fn prune_missing(map: &DirectoryMap) {
    map.range_mutate(|meta| {
        if meta.path().symlink_metadata().is_ok() {
            MutateOutcome::Ignore
        } else {
            MutateOutcome::Delete
        }
    });
}

/// Render the payload of a panicked task
fn panic_message(err: task::JoinError) -> String {
    match err.try_into_panic() {
        Ok(payload) => {
            if let Some(s) = payload.downcast_ref::<&str>() {
                (*s).to_string()
            } else if let Some(s) = payload.downcast_ref::<String>() {
                s.clone()
            } else {
                "unknown panic".to_string()
            }
        }
        Err(e) => e.to_string(),
    }
}

/// Factory producing sidecar-backed entries
///
/// Acquires one directory token per entry, released once the sidecar
/// load completes.
pub struct SidecarEntryFactory {
    options: EntryOptions,
    visitor: FileVisitor,
    dir_tokens: TokenPool,
}

impl SidecarEntryFactory {
    /// Create a factory from entry options, a visitor, and a token pool
    pub fn new(options: EntryOptions, visitor: FileVisitor, dir_tokens: TokenPool) -> Self {
        Self {
            options,
            visitor,
            dir_tokens,
        }
    }
}

#[async_trait]
impl DirEntryFactory for SidecarEntryFactory {
    async fn open(&self, dir: &Path) -> Result<Box<dyn TrackedDir>> {
        let token = self.dir_tokens.acquire().await;
        let entry = DirEntry::open(dir, &self.options, Arc::clone(&self.visitor), token).await?;
        Ok(Box::new(entry))
    }
}
