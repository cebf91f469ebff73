//! End-to-end change detection scenarios
//!
//! Exercise the store, reconciler, detector and dispatch together the way a
//! channel uses them, including store reopen between passes.

use filetime::{set_file_mtime, FileTime};
use notifier_core::{
    BatchQueue, ChannelId, EventSink, FileEvent, FileEventKind, NameFilter, RunEvent, RunKind,
};
use notifier_store::FingerprintStore;
use notifier_watcher::{
    normalize_root, ChannelConfig, ChannelJob, Detector, DetectorOptions, Notification,
    NotificationKind, QueueSource, Reconciler, WatchKey,
};
use parking_lot::Mutex;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant, SystemTime};
use tempfile::TempDir;

#[derive(Default)]
struct CollectingSink {
    batches: Mutex<Vec<Vec<FileEvent>>>,
}

impl CollectingSink {
    fn take(&self) -> Vec<(FileEventKind, PathBuf)> {
        self.batches
            .lock()
            .drain(..)
            .flatten()
            .map(|e| (e.kind(), e.path().to_path_buf()))
            .collect()
    }
}

impl EventSink for CollectingSink {
    fn name(&self) -> &str {
        "collect"
    }

    fn process(&self, batch: &[FileEvent]) -> anyhow::Result<()> {
        self.batches.lock().push(batch.to_vec());
        Ok(())
    }
}

struct Workspace {
    temp_dir: TempDir,
    root: PathBuf,
}

impl Workspace {
    fn new() -> Self {
        let temp_dir = TempDir::new().unwrap();
        let root = normalize_root(temp_dir.path()).join("data");
        fs::create_dir(&root).unwrap();
        Self { temp_dir, root }
    }

    fn config(&self) -> ChannelConfig {
        let mut config = ChannelConfig::new("scenario", vec![self.root.clone()], self.db());
        config.delay_secs = 0;
        config
    }

    fn db(&self) -> PathBuf {
        self.temp_dir.path().join("db")
    }

    /// Run one pass in a freshly opened job, as a scheduled run after restart would
    fn pass(&self, config: &ChannelConfig) -> Vec<(FileEventKind, PathBuf)> {
        let sink = Arc::new(CollectingSink::default());
        let job = ChannelJob::new(config.clone(), vec![sink.clone() as Arc<dyn EventSink>]).unwrap();
        job.reconcile().unwrap();
        job.shutdown().unwrap();
        sink.take()
    }
}

fn entry(kind: FileEventKind, path: &str) -> (FileEventKind, PathBuf) {
    (kind, PathBuf::from(path))
}

#[test]
fn test_single_file_lifecycle_across_restarts() {
    let ws = Workspace::new();
    let config = ws.config();
    let file = ws.root.join("a.txt");

    fs::write(&file, b"a").unwrap();
    assert_eq!(ws.pass(&config), vec![entry(FileEventKind::Create, "a.txt")]);

    assert!(ws.pass(&config).is_empty());

    fs::remove_file(&file).unwrap();
    assert_eq!(ws.pass(&config), vec![entry(FileEventKind::Delete, "a.txt")]);

    assert!(ws.pass(&config).is_empty());

    fs::write(&file, b"again").unwrap();
    assert_eq!(ws.pass(&config), vec![entry(FileEventKind::Create, "a.txt")]);
}

#[test]
fn test_deletions_follow_creations_in_one_pass() {
    let ws = Workspace::new();
    let config = ws.config();
    fs::write(ws.root.join("old.txt"), b"o").unwrap();
    ws.pass(&config);

    fs::remove_file(ws.root.join("old.txt")).unwrap();
    fs::write(ws.root.join("new.txt"), b"n").unwrap();

    assert_eq!(
        ws.pass(&config),
        vec![
            entry(FileEventKind::Create, "new.txt"),
            entry(FileEventKind::Delete, "old.txt"),
        ]
    );
}

#[test]
fn test_retained_file_reported_once_touched() {
    let ws = Workspace::new();
    let file = ws.root.join("a.txt");
    fs::write(&file, b"a").unwrap();

    // Retention window of a few seconds
    let mut config = ws.config();
    config.retain_days = Some(0.0001);
    let far_future = SystemTime::now() + Duration::from_secs(10 * 86_400);
    let before_cutoff = SystemTime::now() - Duration::from_secs(86_400);
    set_file_mtime(&file, FileTime::from_system_time(before_cutoff)).unwrap();

    // A fresh file may report a creation time newer than its mtime
    let fresh = ws.pass(&config);
    assert!(fresh.len() <= 1);
    assert!(ws.pass(&config).is_empty());

    set_file_mtime(&file, FileTime::from_system_time(far_future)).unwrap();
    assert_eq!(ws.pass(&config), vec![entry(FileEventKind::Modify, "a.txt")]);
}

#[test]
fn test_excluded_entries_never_reported() {
    let ws = Workspace::new();
    let mut config = ws.config();
    config.exclude = Some(r".*\.swp".into());

    fs::write(ws.root.join("doc.txt"), b"d").unwrap();
    fs::write(ws.root.join("doc.txt.swp"), b"s").unwrap();
    assert_eq!(ws.pass(&config), vec![entry(FileEventKind::Create, "doc.txt")]);

    fs::remove_file(ws.root.join("doc.txt.swp")).unwrap();
    assert!(ws.pass(&config).is_empty());
}

#[test]
fn test_detector_updates_prevent_duplicate_reports() {
    let ws = Workspace::new();
    let store = FingerprintStore::open(ws.db()).unwrap();
    let channel = ChannelId::new("scenario");
    let roots = vec![ws.root.clone()];

    fs::write(ws.root.join("a.txt"), b"a").unwrap();
    let reconciler = Reconciler::new(channel.clone(), &roots, NameFilter::accept_all(), store.clone());
    reconciler.run(i64::MIN).unwrap();

    // Rename seen by the detector between passes
    let (source, sender) = QueueSource::new();
    let detector = Detector::new(
        channel.clone(),
        &roots,
        NameFilter::accept_all(),
        store.clone(),
        source,
        DetectorOptions::default(),
    )
    .unwrap();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    detector
        .file_events()
        .subscribe(Arc::new(move |e: &FileEvent| sink.lock().push(e.clone())));
    let handle = detector.spawn().unwrap();

    fs::rename(ws.root.join("a.txt"), ws.root.join("b.txt")).unwrap();
    sender.send_all([
        Notification::new(WatchKey(0), "a.txt", NotificationKind::RenameFrom),
        Notification::new(WatchKey(0), "b.txt", NotificationKind::RenameTo),
    ]);
    let deadline = Instant::now() + Duration::from_secs(5);
    while seen.lock().is_empty() && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(5));
    }
    handle.interrupt();
    assert!(handle.join());

    {
        let seen = seen.lock();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].kind(), FileEventKind::Rename);
        assert_eq!(seen[0].source(), Some(Path::new("a.txt")));
    }

    // The next pass only confirms what the detector recorded
    let reported = Arc::new(Mutex::new(Vec::new()));
    let sink = reported.clone();
    reconciler
        .file_events()
        .subscribe(Arc::new(move |e: &FileEvent| sink.lock().push(e.kind())));
    reconciler.run(i64::MIN).unwrap();
    assert!(reported.lock().is_empty());

    store.close().unwrap();
}

#[test]
fn test_batch_queue_collapses_adjacent_duplicates() {
    let delivered = Arc::new(Mutex::new(Vec::new()));
    let sink = delivered.clone();
    let queue = BatchQueue::new("dedup", 0, move |batch: Vec<FileEvent>| -> anyhow::Result<()> {
        sink.lock().push(batch.len());
        Ok(())
    });

    let channel = ChannelId::new("scenario");
    let e = FileEvent::new(channel.clone(), "/data", "a.txt", FileEventKind::Modify);
    let f = FileEvent::new(channel, "/data", "b.txt", FileEventKind::Modify);

    queue.add(e.clone());
    queue.add(e.clone());
    queue.flush().unwrap();
    queue.add(e);
    queue.add(f);
    queue.flush().unwrap();

    assert_eq!(*delivered.lock(), vec![1, 2]);
}

#[test]
fn test_native_detector_interrupt_is_prompt() {
    let ws = Workspace::new();
    let store = FingerprintStore::open(ws.db()).unwrap();
    let detector = Detector::native(
        ChannelId::new("native"),
        &[ws.root.clone()],
        NameFilter::accept_all(),
        store.clone(),
        DetectorOptions::default(),
    )
    .unwrap();

    let runs = Arc::new(Mutex::new(Vec::new()));
    let sink = runs.clone();
    detector
        .run_events()
        .subscribe(Arc::new(move |e: &RunEvent| sink.lock().push(e.kind())));
    let handle = detector.spawn().unwrap();

    thread::sleep(Duration::from_millis(100));
    let started = Instant::now();
    handle.interrupt();
    assert!(handle.join());
    assert!(started.elapsed() < Duration::from_secs(2));
    assert_eq!(*runs.lock(), vec![RunKind::Start, RunKind::Stop]);

    store.close().unwrap();
}
