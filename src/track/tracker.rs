//! Depth-first tree tracker
//!
//! Walks the configured root in lexicographic pre-order, opening an
//! entry for each directory through the injected factory and feeding the
//! directory's files to it under the file token budget.
//!
//! Directory listings and stats run on blocking threads. Subtree exits
//! detected by the scope tracker are sent to one closer task, which
//! retires entries strictly in arrival order; since a subtree always
//! exits before its parent, every child directory persists before the
//! directory that contains it.
//!
//! Recoverable errors flow to one aggregated stream that closes exactly
//! once, after the walk and every entry have finished.

use crate::config::TrackerConfig;
use crate::error::{Result, TrackError, WalkError};
use crate::track::entry::{DirEntryFactory, TrackedDir, VisitJob};
use crate::track::scope::ScopeTracker;
use crate::track::tokens::TokenPool;
use std::fs::{self, Metadata};
use std::panic;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::task::{self, JoinSet};
use tracing::{debug, info, warn};

/// Shared counters for a tracker run
#[derive(Debug, Default)]
pub struct TrackerStats {
    dirs_opened: AtomicU64,
    dirs_skipped: AtomicU64,
    files_dispatched: AtomicU64,
    bytes_seen: AtomicU64,
    errors: AtomicU64,
}

impl TrackerStats {
    pub fn record_open(&self) {
        self.dirs_opened.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_skip(&self) {
        self.dirs_skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_file(&self, bytes: u64) {
        self.files_dispatched.fetch_add(1, Ordering::Relaxed);
        self.bytes_seen.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn record_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn dirs_opened(&self) -> u64 {
        self.dirs_opened.load(Ordering::Relaxed)
    }

    pub fn dirs_skipped(&self) -> u64 {
        self.dirs_skipped.load(Ordering::Relaxed)
    }

    pub fn files_dispatched(&self) -> u64 {
        self.files_dispatched.load(Ordering::Relaxed)
    }

    pub fn bytes_seen(&self) -> u64 {
        self.bytes_seen.load(Ordering::Relaxed)
    }

    pub fn errors(&self) -> u64 {
        self.errors.load(Ordering::Relaxed)
    }

    /// Snapshot the counters into a summary
    pub fn summary(&self, duration: Duration) -> TrackSummary {
        TrackSummary {
            dirs_opened: self.dirs_opened(),
            dirs_skipped: self.dirs_skipped(),
            files_dispatched: self.files_dispatched(),
            bytes_seen: self.bytes_seen(),
            errors: self.errors(),
            duration,
        }
    }
}

/// Final counts for a tracker run
#[derive(Debug, Clone, Default)]
pub struct TrackSummary {
    pub dirs_opened: u64,
    pub dirs_skipped: u64,
    pub files_dispatched: u64,
    pub bytes_seen: u64,
    pub errors: u64,
    pub duration: Duration,
}

impl TrackSummary {
    /// Combined directory and file throughput
    pub fn items_per_second(&self) -> f64 {
        let secs = self.duration.as_secs_f64();
        if secs > 0.0 {
            (self.files_dispatched + self.dirs_opened) as f64 / secs
        } else {
            0.0
        }
    }
}

/// Summary plus every recoverable error the run reported
#[derive(Debug)]
pub struct TrackReport {
    pub summary: TrackSummary,
    pub errors: Vec<TrackError>,
}

/// Handle to a tracker running in the background
///
/// Drain `errors` while awaiting `handle`; the walk applies backpressure
/// through the error stream, so leaving it undrained can stall the run.
/// The stream closes once the walk and every entry have finished.
pub struct RunningTracker {
    /// Aggregated stream of recoverable errors
    pub errors: mpsc::Receiver<TrackError>,
    /// Resolves to the run summary once the walk finishes
    pub handle: task::JoinHandle<Result<TrackSummary>>,
}

/// Tree tracker over a configured root
pub struct TreeTracker {
    config: TrackerConfig,
    factory: Arc<dyn DirEntryFactory>,
    stats: Arc<TrackerStats>,
}

impl TreeTracker {
    pub fn new(config: TrackerConfig, factory: Arc<dyn DirEntryFactory>) -> Self {
        Self {
            config,
            factory,
            stats: Arc::new(TrackerStats::default()),
        }
    }

    /// Live counters for progress display
    pub fn stats(&self) -> &Arc<TrackerStats> {
        &self.stats
    }

    /// Start the walk in the background
    pub fn spawn(&self) -> RunningTracker {
        let (error_tx, error_rx) = mpsc::channel(self.config.error_buffer);
        let walk = Walk {
            config: self.config.clone(),
            factory: Arc::clone(&self.factory),
            stats: Arc::clone(&self.stats),
            errors: error_tx,
            file_tokens: TokenPool::new(self.config.file_tokens),
        };
        let handle = tokio::spawn(walk.run());
        RunningTracker {
            errors: error_rx,
            handle,
        }
    }

    /// Run the walk to completion, collecting reported errors
    pub async fn run(&self) -> Result<TrackReport> {
        let RunningTracker { mut errors, handle } = self.spawn();

        let mut collected = Vec::new();
        while let Some(err) = errors.recv().await {
            collected.push(err);
        }

        let summary = handle
            .await
            .unwrap_or_else(|e| panic::resume_unwind(e.into_panic()))?;

        Ok(TrackReport {
            summary,
            errors: collected,
        })
    }
}

/// One level of the depth-first descent
struct Frame {
    subdirs: std::vec::IntoIter<PathBuf>,
}

/// One directory's readdir results
struct Listing {
    /// Regular visible files, name-sorted, with their stat data
    files: Vec<(String, Metadata)>,
    /// All subdirectories, sorted; skip rules apply when they are entered
    subdirs: Vec<PathBuf>,
    /// The stop sentinel was present
    has_sentinel: bool,
    /// Per-item failures that did not abort the listing
    failures: Vec<WalkError>,
}

/// Walking state for a single run
struct Walk {
    config: TrackerConfig,
    factory: Arc<dyn DirEntryFactory>,
    stats: Arc<TrackerStats>,
    errors: mpsc::Sender<TrackError>,
    file_tokens: TokenPool,
}

impl Walk {
    async fn run(self) -> Result<TrackSummary> {
        let start = Instant::now();
        info!("Tracking {}", self.config.root.display());

        // One closer task serializes closes in scope-exit order, which
        // guarantees a child directory persists before its parent
        let (close_tx, close_rx) = mpsc::channel::<Box<dyn TrackedDir>>(32);
        let closer = tokio::spawn(close_entries(close_rx));

        let mut forwarders = JoinSet::new();
        let outcome = self.walk_tree(&close_tx, &mut forwarders).await;

        drop(close_tx);
        if let Err(e) = closer.await {
            if e.is_panic() {
                panic::resume_unwind(e.into_panic());
            }
        }

        // Forwarders end when their entries close and drop their senders
        while forwarders.join_next().await.is_some() {}

        outcome?;

        let summary = self.stats.summary(start.elapsed());
        info!(
            "Tracked {} directories, {} files in {:.1}s",
            summary.dirs_opened,
            summary.files_dispatched,
            summary.duration.as_secs_f64()
        );
        Ok(summary)
    }

    async fn walk_tree(
        &self,
        close_tx: &mpsc::Sender<Box<dyn TrackedDir>>,
        forwarders: &mut JoinSet<()>,
    ) -> Result<()> {
        let root = self.config.root.clone();

        // Root problems are fatal; subdirectory problems only warn
        let metadata = stat_path(&root).await.map_err(TrackError::Walk)?;
        if !metadata.is_dir() {
            return Err(WalkError::RootNotDirectory { path: root }.into());
        }
        let root_listing = list_directory(&root, &self.config)
            .await
            .map_err(TrackError::Walk)?;

        let mut scope: ScopeTracker<Box<dyn TrackedDir>> = ScopeTracker::new();
        let mut stack: Vec<Frame> = Vec::new();

        let descent: Result<()> = async {
            if let Some(frame) = self
                .enter_directory(root, Some(root_listing), &mut scope, close_tx, forwarders)
                .await?
            {
                stack.push(frame);
            }

            while let Some(frame) = stack.last_mut() {
                match frame.subdirs.next() {
                    Some(dir) => {
                        if let Some(next) = self
                            .enter_directory(dir, None, &mut scope, close_tx, forwarders)
                            .await?
                        {
                            stack.push(next);
                        }
                    }
                    None => {
                        stack.pop();
                    }
                }
            }
            Ok(())
        }
        .await;

        // Everything still in scope closes now, deepest first. This runs
        // on the fatal path too, so accepted work is never dropped
        // un-persisted.
        send_closes(close_tx, scope.drain()).await;

        descent
    }

    /// Open `dir` and dispatch its files, returning the descent frame
    ///
    /// Returns None when the directory is skipped by policy or lost to a
    /// recoverable error.
    async fn enter_directory(
        &self,
        dir: PathBuf,
        prefetched: Option<Listing>,
        scope: &mut ScopeTracker<Box<dyn TrackedDir>>,
        close_tx: &mpsc::Sender<Box<dyn TrackedDir>>,
        forwarders: &mut JoinSet<()>,
    ) -> Result<Option<Frame>> {
        // Skip rules judge discovered directories; the configured root
        // was named explicitly and is always entered
        if dir != self.config.root {
            if is_hidden_name(&dir) {
                debug!("Skipping hidden directory {}", dir.display());
                self.stats.record_skip();
                return Ok(None);
            }
            if self.config.is_excluded(&dir) {
                debug!("Skipping excluded directory {}", dir.display());
                self.stats.record_skip();
                return Ok(None);
            }
        }

        let listing = match prefetched {
            Some(listing) => listing,
            None => match list_directory(&dir, &self.config).await {
                Ok(listing) => listing,
                Err(e) => {
                    warn!("Failed to list {}: {}", dir.display(), e);
                    self.report(TrackError::Walk(e)).await;
                    return Ok(None);
                }
            },
        };

        if listing.has_sentinel {
            debug!("Stop sentinel found in {}", dir.display());
            self.stats.record_skip();
            return Ok(None);
        }

        for failure in listing.failures {
            self.report(TrackError::Walk(failure)).await;
        }

        let mut entry = match self.factory.open(&dir).await {
            Ok(entry) => entry,
            Err(e) if e.is_recoverable() => {
                warn!("Failed to open entry for {}: {}", dir.display(), e);
                self.report(e).await;
                return Ok(None);
            }
            Err(e) => return Err(e),
        };
        self.stats.record_open();
        debug!(
            "Entered {} ({} files, {} subdirs)",
            dir.display(),
            listing.files.len(),
            listing.subdirs.len()
        );

        // Forward the entry's errors onto the aggregated stream
        if let Some(mut entry_errors) = entry.take_errors() {
            let aggregate = self.errors.clone();
            let stats = Arc::clone(&self.stats);
            forwarders.spawn(async move {
                while let Some(err) = entry_errors.recv().await {
                    stats.record_error();
                    if aggregate.send(err).await.is_err() {
                        break;
                    }
                }
            });
        }

        let closed = scope.visit(dir.clone(), entry);
        if !send_closes(close_tx, closed).await {
            return Ok(None);
        }
        let entry = scope.find(&dir).expect("Entry just visited");

        for (name, metadata) in listing.files {
            let token = self.file_tokens.acquire().await;
            self.stats.record_file(metadata.len());
            let job = VisitJob::new(name, metadata, token);
            if let Err(e) = entry.visit_file(job).await {
                warn!(
                    "Entry for {} stopped accepting visits: {}",
                    dir.display(),
                    e
                );
                self.report(e.into()).await;
                break;
            }
        }

        Ok(Some(Frame {
            subdirs: listing.subdirs.into_iter(),
        }))
    }

    /// Count and forward a recoverable error to the aggregate stream
    async fn report(&self, error: TrackError) {
        self.stats.record_error();
        if let Err(dropped) = self.errors.send(error).await {
            debug!("Error stream has no listener; dropping: {}", dropped.0);
        }
    }
}

/// Closer task: retire entries strictly in arrival order
async fn close_entries(mut entries: mpsc::Receiver<Box<dyn TrackedDir>>) {
    while let Some(entry) = entries.recv().await {
        entry.close().await;
    }
}

/// Hand finished entries to the closer; false if the closer is gone
async fn send_closes(
    close_tx: &mpsc::Sender<Box<dyn TrackedDir>>,
    closed: Vec<(PathBuf, Box<dyn TrackedDir>)>,
) -> bool {
    for (_, entry) in closed {
        if close_tx.send(entry).await.is_err() {
            return false;
        }
    }
    true
}

/// Dot-prefixed names are never tracked
fn is_hidden_name(path: &Path) -> bool {
    path.file_name()
        .is_some_and(|n| n.to_string_lossy().starts_with('.'))
}

/// Stat `path` on a blocking thread
async fn stat_path(path: &Path) -> std::result::Result<Metadata, WalkError> {
    let path = path.to_path_buf();
    task::spawn_blocking(move || {
        fs::metadata(&path).map_err(|e| WalkError::Stat {
            path: path.clone(),
            source: e,
        })
    })
    .await
    .expect("Blocking task panicked")
}

/// List `dir` on a blocking thread
async fn list_directory(
    dir: &Path,
    config: &TrackerConfig,
) -> std::result::Result<Listing, WalkError> {
    let dir = dir.to_path_buf();
    let stop_sentinel = config.stop_sentinel.clone();
    task::spawn_blocking(move || read_listing(&dir, &stop_sentinel))
        .await
        .expect("Blocking task panicked")
}

/// Read one directory level
///
/// Hidden files, symlinks, and special files are left out of the file
/// list; the sidecar and sentinel are hidden by construction, so they
/// never show up either. Subdirectories are collected unfiltered and
/// judged when the walk enters them.
fn read_listing(dir: &Path, stop_sentinel: &str) -> std::result::Result<Listing, WalkError> {
    let reader = fs::read_dir(dir).map_err(|e| WalkError::ReadDir {
        path: dir.to_path_buf(),
        source: e,
    })?;

    let mut listing = Listing {
        files: Vec::new(),
        subdirs: Vec::new(),
        has_sentinel: false,
        failures: Vec::new(),
    };

    for item in reader {
        let item = match item {
            Ok(item) => item,
            Err(e) => {
                listing.failures.push(WalkError::ReadDir {
                    path: dir.to_path_buf(),
                    source: e,
                });
                continue;
            }
        };

        let name = match item.file_name().into_string() {
            Ok(name) => name,
            Err(raw) => {
                warn!("Skipping non-UTF-8 name {:?} in {}", raw, dir.display());
                continue;
            }
        };

        // The sentinel voids the whole directory, listed or not
        if name == stop_sentinel {
            return Ok(Listing {
                files: Vec::new(),
                subdirs: Vec::new(),
                has_sentinel: true,
                failures: Vec::new(),
            });
        }

        let file_type = match item.file_type() {
            Ok(t) => t,
            Err(e) => {
                listing.failures.push(WalkError::Stat {
                    path: dir.join(&name),
                    source: e,
                });
                continue;
            }
        };

        if file_type.is_dir() {
            listing.subdirs.push(dir.join(&name));
            continue;
        }

        // Symlinks and special files are never tracked
        if !file_type.is_file() {
            continue;
        }
        if name.starts_with('.') {
            continue;
        }

        match item.metadata() {
            Ok(metadata) => listing.files.push((name, metadata)),
            Err(e) => listing.failures.push(WalkError::Stat {
                path: dir.join(&name),
                source: e,
            }),
        }
    }

    listing.files.sort_by(|a, b| a.0.cmp(&b.0));
    listing.subdirs.sort();
    Ok(listing)
}
