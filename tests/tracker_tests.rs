//! Integration tests for dirmeta
//!
//! Each test builds a real directory tree under a tempdir, runs the
//! tracker against it, and inspects the sidecars left behind.

use dirmeta::config::{TrackerConfig, DEFAULT_SIDECAR_NAME, DEFAULT_STOP_SENTINEL};
use dirmeta::error::TrackError;
use dirmeta::meta::DirectoryMap;
use dirmeta::track::{FileVisitor, SidecarEntryFactory, TokenPool, TreeTracker};
use dirmeta::visit::checksum_visitor;
use regex::Regex;
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tempfile::tempdir;

fn config_for(root: &Path) -> TrackerConfig {
    TrackerConfig {
        root: root.to_path_buf(),
        file_tokens: 4,
        dir_tokens: 2,
        ..TrackerConfig::default()
    }
}

fn tracker_with_visitor(config: &TrackerConfig, visitor: FileVisitor) -> TreeTracker {
    let factory = SidecarEntryFactory::new(
        config.entry_options(),
        visitor,
        TokenPool::new(config.dir_tokens),
    );
    TreeTracker::new(config.clone(), Arc::new(factory))
}

fn tracker_for(config: &TrackerConfig) -> TreeTracker {
    tracker_with_visitor(config, checksum_visitor())
}

fn set_file_mtime(path: &Path, mtime: SystemTime) {
    let file = fs::OpenOptions::new().write(true).open(path).unwrap();
    file.set_modified(mtime).unwrap();
}

#[tokio::test]
async fn test_tracks_a_small_tree() {
    let dir = tempdir().unwrap();
    let root = dir.path();
    fs::write(root.join("a.txt"), "alpha").unwrap();
    fs::write(root.join("b.txt"), "beta").unwrap();
    fs::create_dir(root.join("sub")).unwrap();
    fs::write(root.join("sub/c.txt"), "gamma").unwrap();

    let config = config_for(root);
    let report = tracker_for(&config).run().await.unwrap();

    assert_eq!(report.summary.dirs_opened, 2);
    assert_eq!(report.summary.files_dispatched, 3);
    assert_eq!(report.summary.bytes_seen, 14);
    assert_eq!(report.summary.errors, 0);
    assert!(report.errors.is_empty());

    let map = DirectoryMap::load(root, DEFAULT_SIDECAR_NAME).unwrap();
    assert_eq!(map.len(), 2);
    let a = map.get("a.txt").unwrap();
    assert_eq!(a.checksum.len(), 32);
    assert_eq!(a.size, 5);

    let sub = DirectoryMap::load(root.join("sub"), DEFAULT_SIDECAR_NAME).unwrap();
    assert_eq!(sub.len(), 1);
    assert!(sub.get("c.txt").is_some());
}

#[tokio::test]
async fn test_second_run_leaves_sidecars_untouched() {
    let dir = tempdir().unwrap();
    let root = dir.path();
    fs::write(root.join("a.txt"), "alpha").unwrap();
    fs::create_dir(root.join("sub")).unwrap();
    fs::write(root.join("sub/b.txt"), "beta").unwrap();

    let config = config_for(root);
    tracker_for(&config).run().await.unwrap();

    // Age the sidecars so an accidental rewrite would be visible
    let root_sidecar = root.join(DEFAULT_SIDECAR_NAME);
    let sub_sidecar = root.join("sub").join(DEFAULT_SIDECAR_NAME);
    let aged = SystemTime::now() - Duration::from_secs(3600);
    set_file_mtime(&root_sidecar, aged);
    set_file_mtime(&sub_sidecar, aged);
    let before = fs::read(&root_sidecar).unwrap();

    let report = tracker_for(&config).run().await.unwrap();
    assert_eq!(report.summary.errors, 0);

    assert_eq!(fs::read(&root_sidecar).unwrap(), before);
    assert_eq!(fs::metadata(&root_sidecar).unwrap().modified().unwrap(), aged);
    assert_eq!(fs::metadata(&sub_sidecar).unwrap().modified().unwrap(), aged);
}

#[tokio::test]
async fn test_unchanged_files_skip_rehashing() {
    let dir = tempdir().unwrap();
    let root = dir.path();
    let target = root.join("report.csv");
    fs::write(&target, "one,two,three").unwrap();

    let config = config_for(root);
    tracker_for(&config).run().await.unwrap();
    let before = DirectoryMap::load(root, DEFAULT_SIDECAR_NAME)
        .unwrap()
        .get("report.csv")
        .unwrap();

    // Swap the contents for same-length bytes and restore the mtime; the
    // stored size and mtime still match, so the record is trusted as-is
    let mtime = fs::metadata(&target).unwrap().modified().unwrap();
    fs::write(&target, "ONE,TWO,THREE").unwrap();
    set_file_mtime(&target, mtime);

    tracker_for(&config).run().await.unwrap();
    let skipped = DirectoryMap::load(root, DEFAULT_SIDECAR_NAME)
        .unwrap()
        .get("report.csv")
        .unwrap();
    assert_eq!(skipped.checksum, before.checksum);

    // A changed mtime forces the rehash
    set_file_mtime(&target, mtime + Duration::from_secs(10));
    tracker_for(&config).run().await.unwrap();
    let rehashed = DirectoryMap::load(root, DEFAULT_SIDECAR_NAME)
        .unwrap()
        .get("report.csv")
        .unwrap();
    assert_ne!(rehashed.checksum, before.checksum);
    assert_eq!(rehashed.mtime, before.mtime + 10);
}

#[tokio::test]
async fn test_tags_survive_a_rechecksum() {
    let dir = tempdir().unwrap();
    let root = dir.path();
    let target = root.join("album.flac");
    fs::write(&target, "v1 audio").unwrap();

    let config = config_for(root);
    tracker_for(&config).run().await.unwrap();

    // Tag the record out of band, the way a curator would
    let map = DirectoryMap::load(root, DEFAULT_SIDECAR_NAME).unwrap();
    let mut meta = map.get("album.flac").unwrap();
    meta.add_tag("lossless");
    meta.add_volume("vault1");
    map.add(meta);
    map.persist().unwrap();
    let before = map.get("album.flac").unwrap();

    // Rewrite the file so the next run must rehash it
    fs::write(&target, "v2 audio with more bytes").unwrap();
    tracker_for(&config).run().await.unwrap();

    let after = DirectoryMap::load(root, DEFAULT_SIDECAR_NAME)
        .unwrap()
        .get("album.flac")
        .unwrap();
    assert_ne!(after.checksum, before.checksum);
    assert_eq!(after.size, 24);
    assert!(after.has_tag("lossless"));
    assert!(after.has_volume("vault1"));
}

#[tokio::test]
async fn test_deep_chain_deeper_than_the_directory_pool() {
    let dir = tempdir().unwrap();
    let root = dir.path();
    let mut path = root.to_path_buf();
    for depth in 0..8 {
        path = path.join(format!("level{depth}"));
        fs::create_dir(&path).unwrap();
        fs::write(path.join("leaf.txt"), format!("depth {depth}")).unwrap();
    }

    // Two directory tokens against an eight-deep chain of open ancestors
    let mut config = config_for(root);
    config.dir_tokens = 2;
    let report = tokio::time::timeout(Duration::from_secs(30), tracker_for(&config).run())
        .await
        .expect("tracking stalled")
        .unwrap();

    assert_eq!(report.summary.dirs_opened, 9);
    assert_eq!(report.summary.errors, 0);

    let mut path = root.to_path_buf();
    for depth in 0..8 {
        path = path.join(format!("level{depth}"));
        let map = DirectoryMap::load(&path, DEFAULT_SIDECAR_NAME).unwrap();
        assert!(
            map.get("leaf.txt").is_some(),
            "missing record at depth {depth}"
        );
    }
}

#[tokio::test]
async fn test_wide_tree_closes_the_error_stream() {
    let dir = tempdir().unwrap();
    let root = dir.path();
    for i in 0..1000 {
        let sub = root.join(format!("bucket{i:04}"));
        fs::create_dir(&sub).unwrap();
        fs::write(sub.join("data.bin"), i.to_string()).unwrap();
    }

    let config = config_for(root);
    let mut running = tracker_for(&config).spawn();

    // This loop only ends if the aggregated stream closes
    let drained = tokio::time::timeout(Duration::from_secs(60), async {
        let mut seen = 0usize;
        while running.errors.recv().await.is_some() {
            seen += 1;
        }
        seen
    })
    .await
    .expect("error stream never closed");
    assert_eq!(drained, 0);

    let summary = running.handle.await.unwrap().unwrap();
    assert_eq!(summary.dirs_opened, 1001);
    assert_eq!(summary.files_dispatched, 1000);
}

#[tokio::test]
async fn test_file_visits_respect_the_token_pool() {
    let dir = tempdir().unwrap();
    let root = dir.path();
    for i in 0..3 {
        let sub = root.join(format!("batch{i}"));
        fs::create_dir(&sub).unwrap();
        for j in 0..8 {
            fs::write(sub.join(format!("f{j}.dat")), "payload").unwrap();
        }
    }

    let in_flight = Arc::new(AtomicUsize::new(0));
    let high_water = Arc::new(AtomicUsize::new(0));
    let visitor: FileVisitor = {
        let in_flight = Arc::clone(&in_flight);
        let high_water = Arc::clone(&high_water);
        Arc::new(move |_map, name, _metadata| {
            let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            high_water.fetch_max(now, Ordering::SeqCst);
            // Uneven hold times so completions interleave unpredictably
            let hold = 1 + name.bytes().map(u64::from).sum::<u64>() % 7;
            std::thread::sleep(Duration::from_millis(hold));
            in_flight.fetch_sub(1, Ordering::SeqCst);
            Ok(())
        })
    };

    let mut config = config_for(root);
    config.file_tokens = 3;
    let report = tracker_with_visitor(&config, visitor).run().await.unwrap();

    assert_eq!(report.summary.files_dispatched, 24);
    let peak = high_water.load(Ordering::SeqCst);
    assert!(peak <= 3, "saw {peak} visits in flight");
}

#[tokio::test]
async fn test_hidden_and_sentinel_directories_are_left_alone() {
    let dir = tempdir().unwrap();
    let root = dir.path();
    fs::create_dir(root.join(".cache")).unwrap();
    fs::write(root.join(".cache/blob.bin"), "cached").unwrap();
    fs::create_dir(root.join("frozen")).unwrap();
    fs::write(root.join("frozen").join(DEFAULT_STOP_SENTINEL), "").unwrap();
    fs::write(root.join("frozen/data.txt"), "left alone").unwrap();
    fs::create_dir(root.join("active")).unwrap();
    fs::write(root.join("active/data.txt"), "tracked").unwrap();

    let config = config_for(root);
    let report = tracker_for(&config).run().await.unwrap();

    assert_eq!(report.summary.dirs_opened, 2);
    assert_eq!(report.summary.dirs_skipped, 2);
    assert_eq!(report.summary.files_dispatched, 1);
    assert!(!root.join(".cache").join(DEFAULT_SIDECAR_NAME).exists());
    assert!(!root.join("frozen").join(DEFAULT_SIDECAR_NAME).exists());
    assert!(root.join("active").join(DEFAULT_SIDECAR_NAME).exists());
}

#[tokio::test]
async fn test_excluded_directories_are_skipped() {
    let dir = tempdir().unwrap();
    let root = dir.path();
    fs::create_dir(root.join("target")).unwrap();
    fs::write(root.join("target/artifact.o"), "object code").unwrap();
    fs::create_dir(root.join("site")).unwrap();
    fs::write(root.join("site/page.html"), "<html></html>").unwrap();

    let mut config = config_for(root);
    config.exclude_patterns = vec![Regex::new(r"/target$").unwrap()];
    let report = tracker_for(&config).run().await.unwrap();

    assert_eq!(report.summary.dirs_opened, 2);
    assert_eq!(report.summary.dirs_skipped, 1);
    assert!(!root.join("target").join(DEFAULT_SIDECAR_NAME).exists());
    assert!(root.join("site").join(DEFAULT_SIDECAR_NAME).exists());
}

#[tokio::test]
async fn test_corrupt_sidecar_is_replaced() {
    let dir = tempdir().unwrap();
    let root = dir.path();
    fs::write(root.join("keep.txt"), "contents").unwrap();
    fs::write(root.join(DEFAULT_SIDECAR_NAME), "<directory><oops").unwrap();

    let config = config_for(root);
    let report = tracker_for(&config).run().await.unwrap();

    // A sidecar that fails to parse means "no prior data", not a failure
    assert_eq!(report.summary.errors, 0);

    let map = DirectoryMap::load(root, DEFAULT_SIDECAR_NAME).unwrap();
    assert_eq!(map.len(), 1);
    assert!(map.get("keep.txt").is_some());
}

#[tokio::test]
async fn test_prune_drops_departed_files() {
    let dir = tempdir().unwrap();
    let root = dir.path();
    fs::write(root.join("stays.txt"), "here").unwrap();
    fs::write(root.join("leaves.txt"), "gone soon").unwrap();

    let mut config = config_for(root);
    tracker_for(&config).run().await.unwrap();
    fs::remove_file(root.join("leaves.txt")).unwrap();

    // Without --prune the departed record is kept
    tracker_for(&config).run().await.unwrap();
    let map = DirectoryMap::load(root, DEFAULT_SIDECAR_NAME).unwrap();
    assert!(map.get("leaves.txt").is_some());

    // With --prune it is dropped
    config.prune = true;
    tracker_for(&config).run().await.unwrap();
    let map = DirectoryMap::load(root, DEFAULT_SIDECAR_NAME).unwrap();
    assert!(map.get("leaves.txt").is_none());
    assert!(map.get("stays.txt").is_some());
}

#[tokio::test]
async fn test_empty_directories_leave_no_sidecar() {
    let dir = tempdir().unwrap();
    let root = dir.path();
    fs::create_dir(root.join("blank")).unwrap();

    let config = config_for(root);
    let report = tracker_for(&config).run().await.unwrap();

    assert_eq!(report.summary.dirs_opened, 2);
    assert_eq!(report.summary.files_dispatched, 0);
    assert!(!root.join(DEFAULT_SIDECAR_NAME).exists());
    assert!(!root.join("blank").join(DEFAULT_SIDECAR_NAME).exists());
}

#[tokio::test]
async fn test_failing_visits_do_not_block_the_rest() {
    let dir = tempdir().unwrap();
    let root = dir.path();
    fs::write(root.join("bad.txt"), "unreadable").unwrap();
    fs::write(root.join("good.txt"), "readable").unwrap();

    let inner = checksum_visitor();
    let visitor: FileVisitor = Arc::new(move |map, name, metadata| {
        if name == "bad.txt" {
            anyhow::bail!("simulated unreadable file");
        }
        inner(map, name, metadata)
    });

    let config = config_for(root);
    let report = tracker_with_visitor(&config, visitor).run().await.unwrap();

    assert_eq!(report.summary.files_dispatched, 2);
    assert_eq!(report.summary.errors, 1);
    assert_eq!(report.errors.len(), 1);
    assert!(matches!(report.errors[0], TrackError::Visit(_)));

    let map = DirectoryMap::load(root, DEFAULT_SIDECAR_NAME).unwrap();
    assert!(map.get("good.txt").is_some());
    assert!(map.get("bad.txt").is_none());
}

#[tokio::test]
async fn test_sibling_names_with_shared_prefix() {
    let dir = tempdir().unwrap();
    let root = dir.path();
    fs::create_dir(root.join("ab")).unwrap();
    fs::write(root.join("ab/inner.txt"), "first").unwrap();
    fs::create_dir(root.join("abc")).unwrap();
    fs::write(root.join("abc/inner.txt"), "second").unwrap();

    let config = config_for(root);
    let report = tracker_for(&config).run().await.unwrap();

    assert_eq!(report.summary.dirs_opened, 3);
    assert_eq!(report.summary.errors, 0);

    let ab = DirectoryMap::load(root.join("ab"), DEFAULT_SIDECAR_NAME).unwrap();
    assert_eq!(ab.get("inner.txt").unwrap().size, 5);
    let abc = DirectoryMap::load(root.join("abc"), DEFAULT_SIDECAR_NAME).unwrap();
    assert_eq!(abc.get("inner.txt").unwrap().size, 6);
}
