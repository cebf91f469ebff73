//! Tree-walk reconciliation
//!
//! Walks every watched root and compares what it finds against the
//! fingerprints recorded by the previous pass. Changes that slipped past the
//! native detector (overflow, downtime, unwatched periods) surface here.
//!
//! Within one pass, CREATE and MODIFY events follow walk order (directory
//! before its children, siblings by name) and every DELETE comes after them.

use crate::{normalize_root, store_key, InterruptFlag, Result};
use notifier_core::{ChannelId, FileEvent, FileEventKind, ListenerPool, NameFilter, RunEvent};
use notifier_store::{Fingerprint, FingerprintStore};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// Counts from one reconciliation pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PassSummary {
    pub visited: usize,
    pub created: usize,
    pub modified: usize,
    pub deleted: usize,
    /// The pass stopped early; no deletions were reported
    pub interrupted: bool,
}

impl PassSummary {
    pub fn changes(&self) -> usize {
        self.created + self.modified + self.deleted
    }
}

/// Periodic full-tree reconciler for one channel
pub struct Reconciler {
    channel: ChannelId,
    roots: Vec<PathBuf>,
    filter: NameFilter,
    store: Arc<FingerprintStore>,
    file_events: ListenerPool<FileEvent>,
    run_events: ListenerPool<RunEvent>,
    interrupt: InterruptFlag,
}

impl Reconciler {
    /// Create a reconciler over `roots`, earlier roots taking priority
    pub fn new(
        channel: ChannelId,
        roots: &[PathBuf],
        filter: NameFilter,
        store: Arc<FingerprintStore>,
    ) -> Self {
        Self {
            channel,
            roots: roots.iter().map(|root| normalize_root(root)).collect(),
            filter,
            store,
            file_events: ListenerPool::new(),
            run_events: ListenerPool::new(),
            interrupt: InterruptFlag::new(),
        }
    }

    pub fn channel(&self) -> &ChannelId {
        &self.channel
    }

    /// Subscribers for detected changes
    pub fn file_events(&self) -> &ListenerPool<FileEvent> {
        &self.file_events
    }

    /// Subscribers for START/STOP of each pass
    pub fn run_events(&self) -> &ListenerPool<RunEvent> {
        &self.run_events
    }

    /// Ask the pass in progress to stop at the next entry
    ///
    /// The next [`Reconciler::run`] starts afresh.
    pub fn interrupt(&self) {
        self.interrupt.set();
    }

    pub fn is_interrupted(&self) -> bool {
        self.interrupt.is_set()
    }

    /// Flag of the pass in progress, for interrupting from a listener
    pub fn interrupter(&self) -> InterruptFlag {
        self.interrupt.clone()
    }

    /// Run one pass, reporting only fingerprints newer than `retain_cutoff`
    ///
    /// START is broadcast before the walk and STOP after it, whatever the
    /// outcome. Only store failures are returned; unreadable roots and
    /// entries are logged and skipped.
    pub fn run(&self, retain_cutoff: i64) -> Result<PassSummary> {
        let started = Instant::now();
        self.interrupt.clear();
        self.run_events.broadcast(&RunEvent::start(
            self.channel.clone(),
            "reconciliation started",
        ));

        let result = self.pass(retain_cutoff);

        let message = match &result {
            Ok(summary) => {
                info!(
                    channel = %self.channel,
                    visited = summary.visited,
                    created = summary.created,
                    modified = summary.modified,
                    deleted = summary.deleted,
                    interrupted = summary.interrupted,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Reconciliation finished"
                );
                if summary.interrupted {
                    "reconciliation interrupted".to_string()
                } else {
                    format!("reconciliation finished: {} change(s)", summary.changes())
                }
            }
            Err(e) => {
                warn!(channel = %self.channel, "Reconciliation failed: {}", e);
                format!("reconciliation failed: {}", e)
            }
        };

        self.run_events
            .broadcast(&RunEvent::stop(self.channel.clone(), message));
        result
    }

    fn pass(&self, retain_cutoff: i64) -> Result<PassSummary> {
        self.store.begin_pass()?;

        let mut summary = PassSummary::default();
        let walked = self.walk_all(retain_cutoff, &mut summary);

        // Whatever was recorded is kept, even after an interruption
        let committed = self.store.commit();
        walked?;
        committed?;

        summary.interrupted = self.interrupt.is_set();
        if !summary.interrupted {
            self.store.finish_pass()?;
        }
        Ok(summary)
    }

    fn walk_all(&self, retain_cutoff: i64, summary: &mut PassSummary) -> Result<()> {
        for root in &self.roots {
            if self.interrupt.is_set() {
                return Ok(());
            }
            self.walk_root(root, retain_cutoff, summary)?;
        }

        if !self.interrupt.is_set() {
            self.report_deletions(summary)?;
        }
        Ok(())
    }

    fn walk_root(&self, root: &Path, retain_cutoff: i64, summary: &mut PassSummary) -> Result<()> {
        match std::fs::metadata(root) {
            Ok(metadata) if metadata.is_dir() => {}
            Ok(_) => {
                warn!(channel = %self.channel, "Root is not a directory: {}", root.display());
                return Ok(());
            }
            Err(e) => {
                warn!(channel = %self.channel, "Cannot read root {}: {}", root.display(), e);
                return Ok(());
            }
        }

        debug!(channel = %self.channel, "Walking {}", root.display());
        let current = self.store.current()?;
        let old = self.store.old()?;

        let walker = WalkDir::new(root)
            .min_depth(1)
            .follow_links(false)
            .sort_by_file_name();

        for entry in walker {
            if self.interrupt.is_set() {
                debug!(channel = %self.channel, "Walk of {} interrupted", root.display());
                break;
            }

            let entry = match entry {
                Ok(entry) => entry,
                Err(e) if e.depth() == 0 => {
                    warn!(channel = %self.channel, "Aborting walk of {}: {}", root.display(), e);
                    break;
                }
                Err(e) => {
                    debug!(channel = %self.channel, "Skipping unreadable entry: {}", e);
                    continue;
                }
            };

            let is_dir = entry.file_type().is_dir();
            if !self
                .filter
                .accepts(&entry.file_name().to_string_lossy(), Some(is_dir))
            {
                continue;
            }

            let metadata = match entry.metadata() {
                Ok(metadata) => metadata,
                Err(e) => {
                    debug!(channel = %self.channel, "Skipping {}: {}", entry.path().display(), e);
                    continue;
                }
            };

            summary.visited += 1;
            let fingerprint = Fingerprint::from_metadata(&metadata);
            let key = store_key(entry.path());
            current.insert(&key, fingerprint)?;

            let kind = match old.get(&key)? {
                None => Some(FileEventKind::Create),
                Some(previous) => {
                    old.remove(&key)?;
                    (previous != fingerprint).then_some(FileEventKind::Modify)
                }
            };

            if let Some(kind) = kind.filter(|_| fingerprint.millis() > retain_cutoff) {
                match kind {
                    FileEventKind::Create => summary.created += 1,
                    _ => summary.modified += 1,
                }
                self.emit(root, entry.path(), kind);
            }
        }
        Ok(())
    }

    /// Report every baseline entry the walk did not see again
    fn report_deletions(&self, summary: &mut PassSummary) -> Result<()> {
        let old = self.store.old()?;
        for key in old.keys()? {
            let path = PathBuf::from(&key);
            if self.roots.iter().any(|root| *root == path) {
                continue;
            }
            let Some(root) = self.roots.iter().find(|root| path.starts_with(root)) else {
                continue;
            };
            // Gone entries have no attributes: only the exclude pattern applies
            let is_dir = std::fs::symlink_metadata(&path).ok().map(|m| m.is_dir());
            if !self.filter.accepts_path(&path, is_dir) {
                continue;
            }

            summary.deleted += 1;
            self.emit(root, &path, FileEventKind::Delete);
        }
        Ok(())
    }

    fn emit(&self, root: &Path, path: &Path, kind: FileEventKind) {
        let relative = path.strip_prefix(root).unwrap_or(path);
        debug!(channel = %self.channel, "{} {}", kind, relative.display());
        self.file_events.broadcast(&FileEvent::new(
            self.channel.clone(),
            root,
            relative,
            kind,
        ));
    }
}
