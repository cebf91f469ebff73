//! Native-event detection
//!
//! The detector blocks on a [`NotificationSource`], drains whatever is
//! pending, and turns each notification into a [`FileEvent`] while keeping
//! the fingerprint store in step so the next reconciliation pass does not
//! report the same change again.
//!
//! Rename correlation: a RENAME-FROM is held in a single pending slot and
//! consumed by the RENAME-TO right after it, possibly in the next batch,
//! which produces one RENAME event at the position of the TO. Any other
//! notification discards the pending FROM, and halves carrying different
//! trackers never pair. A TO without a pending FROM is dropped.

use crate::source::{CloseHandle, NativeSource, Notification, NotificationKind, WatchKey};
use crate::{normalize_root, store_key, InterruptFlag, NotificationSource, Result, WatchError};
use notifier_core::{ChannelId, FileEvent, FileEventKind, ListenerPool, NameFilter, RunEvent};
use notifier_store::{Fingerprint, FingerprintStore};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fs::Metadata;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{debug, info, warn};

/// Processed notifications after which the store is compacted
pub const COMPACT_AFTER: usize = 10_000;

/// Detector behaviour switches
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DetectorOptions {
    /// Watch whole subtrees rather than the roots' direct children
    pub recursive: bool,
    /// Pair rename notifications; otherwise FROM is a delete and TO a create
    pub rename_tracking: bool,
    pub compact_after: usize,
}

impl Default for DetectorOptions {
    fn default() -> Self {
        Self {
            recursive: true,
            rename_tracking: true,
            compact_after: COMPACT_AFTER,
        }
    }
}

/// Stops a detector from any thread
#[derive(Debug, Clone)]
pub struct Interrupter {
    flag: InterruptFlag,
    close: CloseHandle,
}

impl Interrupter {
    /// Set the flag and unblock the wait; idempotent
    pub fn interrupt(&self) {
        self.flag.set();
        self.close.close();
    }

    pub fn is_interrupted(&self) -> bool {
        self.flag.is_set()
    }
}

/// Blocking native-event loop for one channel
pub struct Detector<S: NotificationSource = NativeSource> {
    channel: ChannelId,
    store: Arc<FingerprintStore>,
    roots: HashMap<WatchKey, PathBuf>,
    filter: NameFilter,
    options: DetectorOptions,
    source: S,
    file_events: ListenerPool<FileEvent>,
    run_events: ListenerPool<RunEvent>,
    interrupter: Interrupter,
}

impl Detector<NativeSource> {
    /// Detector on the platform's notification facility
    pub fn native(
        channel: ChannelId,
        roots: &[PathBuf],
        filter: NameFilter,
        store: Arc<FingerprintStore>,
        options: DetectorOptions,
    ) -> Result<Self> {
        Self::new(channel, roots, filter, store, NativeSource::new()?, options)
    }
}

impl<S: NotificationSource> Detector<S> {
    /// Register every root with `source`
    ///
    /// A root that cannot be registered is logged and left unwatched.
    pub fn new(
        channel: ChannelId,
        roots: &[PathBuf],
        filter: NameFilter,
        store: Arc<FingerprintStore>,
        mut source: S,
        options: DetectorOptions,
    ) -> Result<Self> {
        let mut registered = HashMap::new();
        for root in roots {
            let root = normalize_root(root);
            match source.register(&root, options.recursive) {
                Ok(key) => {
                    registered.insert(key, root);
                }
                Err(e) => warn!(channel = %channel, "Not watching {}: {}", root.display(), e),
            }
        }

        let interrupter = Interrupter {
            flag: InterruptFlag::new(),
            close: source.close_handle(),
        };

        Ok(Self {
            channel,
            store,
            roots: registered,
            filter,
            options,
            source,
            file_events: ListenerPool::new(),
            run_events: ListenerPool::new(),
            interrupter,
        })
    }

    pub fn channel(&self) -> &ChannelId {
        &self.channel
    }

    /// Subscribers for detected changes
    pub fn file_events(&self) -> &ListenerPool<FileEvent> {
        &self.file_events
    }

    /// Subscribers for START/STOP of the loop
    pub fn run_events(&self) -> &ListenerPool<RunEvent> {
        &self.run_events
    }

    pub fn interrupter(&self) -> Interrupter {
        self.interrupter.clone()
    }

    /// Run the loop on a dedicated thread
    pub fn spawn(self) -> Result<DetectorHandle> {
        let interrupter = self.interrupter.clone();
        let thread = thread::Builder::new()
            .name(format!("detector-{}", self.channel))
            .spawn(move || self.run())
            .map_err(WatchError::Spawn)?;

        Ok(DetectorHandle {
            interrupter,
            thread: Mutex::new(Some(thread)),
        })
    }

    /// Run the loop on the calling thread until interrupted or closed
    pub fn run(mut self) {
        info!(channel = %self.channel, roots = self.roots.len(), "Detector started");
        self.run_events
            .broadcast(&RunEvent::start(self.channel.clone(), "detector started"));

        let mut pending: Option<Notification> = None;
        let mut processed = 0usize;

        let reason = loop {
            if self.interrupter.is_interrupted() {
                break "detector interrupted".to_string();
            }

            let batch = match self.source.take() {
                Ok(batch) => batch,
                Err(WatchError::Closed) => break "notification handle closed".to_string(),
                Err(e) => {
                    warn!(channel = %self.channel, "Notification wait failed: {}", e);
                    break format!("notification wait failed: {}", e);
                }
            };

            if self.interrupter.is_interrupted() {
                break "detector interrupted".to_string();
            }

            debug!(channel = %self.channel, "Processing {} notification(s)", batch.len());
            for notification in batch {
                self.handle(notification, &mut pending);
                processed += 1;
            }

            if let Err(e) = self.store.commit() {
                warn!(channel = %self.channel, "Failed to commit fingerprints: {}", e);
            }

            if processed > self.options.compact_after {
                info!(channel = %self.channel, processed, "Compacting fingerprint store");
                if let Err(e) = self.store.compact() {
                    warn!(channel = %self.channel, "Compaction failed: {}", e);
                }
                processed = 0;
            }
        };

        info!(channel = %self.channel, "Detector stopped: {}", reason);
        self.run_events
            .broadcast(&RunEvent::stop(self.channel.clone(), reason));
    }

    fn handle(&self, notification: Notification, pending: &mut Option<Notification>) {
        let Some(root) = self.roots.get(&notification.key) else {
            debug!(channel = %self.channel, "Notification for unknown key {:?}", notification.key);
            return;
        };
        let relative = notification.path.as_path();
        let absolute = root.join(relative);

        let kind = match notification.kind {
            NotificationKind::RenameFrom if !self.options.rename_tracking => NotificationKind::Delete,
            NotificationKind::RenameTo if !self.options.rename_tracking => NotificationKind::Create,
            kind => kind,
        };

        // A RENAME-FROM only pairs with the notification right after it
        if !matches!(kind, NotificationKind::RenameFrom | NotificationKind::RenameTo) {
            if let Some(stale) = pending.take() {
                debug!(
                    channel = %self.channel,
                    "Rename source left without target: {}",
                    stale.path.display()
                );
            }
        }

        match kind {
            NotificationKind::Create => {
                let Some(metadata) = self.metadata(&absolute) else {
                    return;
                };
                if self.filter.accepts_path(relative, Some(metadata.is_dir())) {
                    self.emit(FileEvent::new(self.channel.clone(), root, relative, FileEventKind::Create));
                    self.record(&absolute, &metadata);
                }
            }
            NotificationKind::Delete => {
                if self.filter.accepts_path(relative, None) {
                    self.emit(FileEvent::new(self.channel.clone(), root, relative, FileEventKind::Delete));
                    self.forget(&absolute);
                }
            }
            NotificationKind::Modify => {
                let Some(metadata) = self.metadata(&absolute) else {
                    return;
                };
                if !metadata.is_dir() && self.filter.accepts_path(relative, Some(false)) {
                    self.emit(FileEvent::new(self.channel.clone(), root, relative, FileEventKind::Modify));
                    self.record(&absolute, &metadata);
                }
            }
            NotificationKind::RenameFrom => {
                *pending = Some(notification);
            }
            NotificationKind::RenameTo => {
                let Some(from) = pending.take().filter(|from| notification.completes(from)) else {
                    debug!(
                        channel = %self.channel,
                        "Dropping rename target without a source: {}",
                        relative.display()
                    );
                    return;
                };
                let Some(from_root) = self.roots.get(&from.key) else {
                    return;
                };
                let from_absolute = from_root.join(&from.path);

                let metadata = self.metadata(&absolute);
                if !self
                    .filter
                    .accepts_path(relative, metadata.as_ref().map(|m| m.is_dir()))
                {
                    return;
                }

                let source = from_absolute.strip_prefix(root).unwrap_or(&from_absolute);
                self.emit(FileEvent::renamed(self.channel.clone(), root, source, relative));
                self.forget(&from_absolute);
                if let Some(metadata) = metadata {
                    self.record(&absolute, &metadata);
                }
            }
            NotificationKind::Overflow | NotificationKind::Other => {
                if kind == NotificationKind::Overflow {
                    warn!(channel = %self.channel, "Notifications lost under {}", root.display());
                }
                self.emit(FileEvent::new(self.channel.clone(), root, relative, FileEventKind::Unknown));
            }
        }
    }

    fn metadata(&self, path: &Path) -> Option<Metadata> {
        match std::fs::symlink_metadata(path) {
            Ok(metadata) => Some(metadata),
            Err(e) => {
                debug!(channel = %self.channel, "Cannot read {}: {}", path.display(), e);
                None
            }
        }
    }

    fn record(&self, path: &Path, metadata: &Metadata) {
        let fingerprint = Fingerprint::from_metadata(metadata);
        let updated = self
            .store
            .current()
            .and_then(|current| current.insert(&store_key(path), fingerprint));
        if let Err(e) = updated {
            warn!(channel = %self.channel, "Failed to record {}: {}", path.display(), e);
        }
    }

    fn forget(&self, path: &Path) {
        if let Err(e) = self.store.forget(&store_key(path)) {
            warn!(channel = %self.channel, "Failed to forget {}: {}", path.display(), e);
        }
    }

    fn emit(&self, event: FileEvent) {
        debug!(channel = %self.channel, "{}", event);
        self.file_events.broadcast(&event);
    }
}

/// Owner's handle on a spawned detector
pub struct DetectorHandle {
    interrupter: Interrupter,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl DetectorHandle {
    /// Stop the detector; safe to call repeatedly from any thread
    pub fn interrupt(&self) {
        self.interrupter.interrupt();
    }

    pub fn interrupter(&self) -> Interrupter {
        self.interrupter.clone()
    }

    pub fn is_finished(&self) -> bool {
        self.thread
            .lock()
            .as_ref()
            .map_or(true, |thread| thread.is_finished())
    }

    /// Wait for the detector thread to exit
    ///
    /// Returns false if the thread panicked. Later calls return at once.
    pub fn join(&self) -> bool {
        let Some(thread) = self.thread.lock().take() else {
            return true;
        };
        match thread.join() {
            Ok(()) => true,
            Err(_) => {
                warn!("Detector thread panicked");
                false
            }
        }
    }
}
