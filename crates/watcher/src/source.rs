//! Notification sources
//!
//! A [`NotificationSource`] turns the OS change-notification facility into
//! batches of [`Notification`]s relative to registered roots. Two sources
//! are provided:
//! - [`NativeSource`] wraps a `notify` watcher
//! - [`QueueSource`] is fed by hand through a [`NotificationSender`]
//!
//! Both block in [`take`] until a notification arrives or their
//! [`CloseHandle`] is closed.
//!
//! [`take`]: NotificationSource::take

use crate::{normalize_root, Result, WatchError};
use crossbeam_channel::{bounded, select, unbounded, Receiver, Sender};
use notify::event::{ModifyKind, RenameMode};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, trace, warn};

/// Rename trackers remembered to recognize duplicate `Both` events
const PAIRED_TRACKERS: usize = 64;

/// Handle identifying a registered root
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WatchKey(pub usize);

/// Raw notification kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationKind {
    Create,
    Delete,
    Modify,
    /// Old name of a renamed entry
    RenameFrom,
    /// New name of a renamed entry
    RenameTo,
    /// Notifications were lost
    Overflow,
    Other,
}

/// One change reported by a source
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    /// Root the change was reported against
    pub key: WatchKey,
    /// Path relative to that root (empty for a root-wide overflow)
    pub path: PathBuf,
    pub kind: NotificationKind,
    /// Cookie shared by the two halves of one rename, when the backend has one
    pub tracker: Option<usize>,
}

impl Notification {
    pub fn new(key: WatchKey, path: impl Into<PathBuf>, kind: NotificationKind) -> Self {
        Self {
            key,
            path: path.into(),
            kind,
            tracker: None,
        }
    }

    pub fn with_tracker(mut self, tracker: Option<usize>) -> Self {
        self.tracker = tracker;
        self
    }

    /// Whether this RENAME-TO can complete the rename begun by `from`
    pub fn completes(&self, from: &Notification) -> bool {
        match (from.tracker, self.tracker) {
            (Some(a), Some(b)) => a == b,
            _ => true,
        }
    }
}

/// OS-like facility the detector blocks on
pub trait NotificationSource: Send + 'static {
    /// Start watching `root`, or only its direct children when not recursive
    fn register(&mut self, root: &Path, recursive: bool) -> Result<WatchKey>;

    /// Block for the next notification, then drain everything pending
    ///
    /// Fails with [`WatchError::Closed`] once the close handle is closed.
    fn take(&mut self) -> Result<Vec<Notification>>;

    /// Handle that unblocks `take` from another thread
    fn close_handle(&self) -> CloseHandle;
}

/// Cancels a source's blocking wait; idempotent and cheap to clone
#[derive(Debug, Clone)]
pub struct CloseHandle {
    signal: Arc<Mutex<Option<Sender<()>>>>,
}

impl CloseHandle {
    pub fn close(&self) {
        if self.signal.lock().take().is_some() {
            debug!("Notification handle closed");
        }
    }

    pub fn is_closed(&self) -> bool {
        self.signal.lock().is_none()
    }
}

/// Blocking queue shared by both sources
struct NotificationQueue {
    events: Receiver<Notification>,
    closed: Receiver<()>,
    handle: CloseHandle,
}

impl NotificationQueue {
    fn channel() -> (Sender<Notification>, Self) {
        let (tx, events) = unbounded();
        let (signal, closed) = bounded(0);
        let queue = Self {
            events,
            closed,
            handle: CloseHandle {
                signal: Arc::new(Mutex::new(Some(signal))),
            },
        };
        (tx, queue)
    }

    fn take(&self) -> Result<Vec<Notification>> {
        if self.handle.is_closed() {
            return Err(WatchError::Closed);
        }

        // Nothing is ever sent on `closed`; it only disconnects
        let first = select! {
            recv(self.events) -> msg => msg.map_err(|_| WatchError::Closed)?,
            recv(self.closed) -> _ => return Err(WatchError::Closed),
        };

        let mut batch = vec![first];
        batch.extend(self.events.try_iter());
        Ok(batch)
    }
}

/// Source backed by the platform's `notify` watcher
pub struct NativeSource {
    watcher: RecommendedWatcher,
    translator: Arc<Mutex<Translator>>,
    queue: NotificationQueue,
}

impl NativeSource {
    pub fn new() -> Result<Self> {
        let (tx, queue) = NotificationQueue::channel();
        let translator = Arc::new(Mutex::new(Translator::default()));

        let shared = Arc::clone(&translator);
        let watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| match res {
                Ok(event) => {
                    for notification in shared.lock().translate(&event) {
                        let _ = tx.send(notification);
                    }
                }
                Err(e) => warn!("Notification facility error: {}", e),
            },
            notify::Config::default(),
        )?;

        Ok(Self {
            watcher,
            translator,
            queue,
        })
    }
}

impl NotificationSource for NativeSource {
    fn register(&mut self, root: &Path, recursive: bool) -> Result<WatchKey> {
        let root = normalize_root(root);
        let mode = if recursive {
            RecursiveMode::Recursive
        } else {
            RecursiveMode::NonRecursive
        };

        // Known before watching so no early event goes unresolved
        let key = self.translator.lock().register(root.clone());
        if let Err(source) = self.watcher.watch(&root, mode) {
            self.translator.lock().unregister(key);
            return Err(WatchError::Register { path: root, source });
        }

        debug!("Watching {} ({:?})", root.display(), mode);
        Ok(key)
    }

    fn take(&mut self) -> Result<Vec<Notification>> {
        self.queue.take()
    }

    fn close_handle(&self) -> CloseHandle {
        self.queue.handle.clone()
    }
}

/// Maps `notify` events onto registered roots
#[derive(Default)]
struct Translator {
    roots: Vec<Option<PathBuf>>,
    /// Trackers already delivered as a From/To pair
    paired: VecDeque<usize>,
}

impl Translator {
    fn register(&mut self, root: PathBuf) -> WatchKey {
        self.roots.push(Some(root));
        WatchKey(self.roots.len() - 1)
    }

    fn unregister(&mut self, key: WatchKey) {
        if let Some(slot) = self.roots.get_mut(key.0) {
            *slot = None;
        }
    }

    /// Deepest registered root containing `path`
    fn resolve(&self, path: &Path) -> Option<(WatchKey, PathBuf)> {
        self.roots
            .iter()
            .enumerate()
            .filter_map(|(i, root)| root.as_ref().map(|root| (i, root)))
            .filter(|(_, root)| path.starts_with(root))
            .max_by_key(|(_, root)| root.components().count())
            .and_then(|(i, root)| {
                let relative = path.strip_prefix(root).ok()?;
                Some((WatchKey(i), relative.to_path_buf()))
            })
    }

    fn notification(&self, path: &Path, kind: NotificationKind) -> Option<Notification> {
        match self.resolve(path) {
            Some((key, relative)) if !relative.as_os_str().is_empty() => {
                Some(Notification::new(key, relative, kind))
            }
            Some(_) => None,
            None => {
                trace!("Ignoring event outside watched roots: {}", path.display());
                None
            }
        }
    }

    fn translate(&mut self, event: &Event) -> Vec<Notification> {
        if event.need_rescan() {
            return self.overflow(event);
        }

        let kind = match &event.kind {
            EventKind::Create(_) => NotificationKind::Create,
            EventKind::Remove(_) => NotificationKind::Delete,
            EventKind::Modify(ModifyKind::Name(mode)) => return self.rename(event, *mode),
            EventKind::Modify(_) => NotificationKind::Modify,
            EventKind::Access(_) => return Vec::new(),
            EventKind::Any | EventKind::Other => NotificationKind::Other,
        };

        event
            .paths
            .iter()
            .filter_map(|path| self.notification(path, kind))
            .collect()
    }

    fn rename(&mut self, event: &Event, mode: RenameMode) -> Vec<Notification> {
        let tracker = event.attrs.tracker();
        let tag = |notifications: Vec<Notification>| -> Vec<Notification> {
            notifications
                .into_iter()
                .map(|n| n.with_tracker(tracker))
                .collect()
        };
        match mode {
            RenameMode::From => tag(self.each(event, NotificationKind::RenameFrom)),
            RenameMode::To => {
                if let Some(tracker) = tracker {
                    if self.paired.len() == PAIRED_TRACKERS {
                        self.paired.pop_front();
                    }
                    self.paired.push_back(tracker);
                }
                tag(self.each(event, NotificationKind::RenameTo))
            }
            RenameMode::Both => {
                // inotify repeats a From/To pair it already reported
                if tracker.is_some_and(|t| self.paired.contains(&t)) {
                    return Vec::new();
                }
                match event.paths.as_slice() {
                    [from, to] => tag(self
                        .notification(from, NotificationKind::RenameFrom)
                        .into_iter()
                        .chain(self.notification(to, NotificationKind::RenameTo))
                        .collect()),
                    _ => Vec::new(),
                }
            }
            // The backend could not tell which side this is
            RenameMode::Any | RenameMode::Other => event
                .paths
                .iter()
                .filter_map(|path| {
                    let kind = if path.exists() {
                        NotificationKind::Create
                    } else {
                        NotificationKind::Delete
                    };
                    self.notification(path, kind)
                })
                .collect(),
        }
    }

    fn each(&self, event: &Event, kind: NotificationKind) -> Vec<Notification> {
        event
            .paths
            .iter()
            .filter_map(|path| self.notification(path, kind))
            .collect()
    }

    fn overflow(&self, event: &Event) -> Vec<Notification> {
        let mut notifications: Vec<_> = event
            .paths
            .iter()
            .filter_map(|path| self.resolve(path))
            .map(|(key, relative)| Notification::new(key, relative, NotificationKind::Overflow))
            .collect();

        if notifications.is_empty() {
            notifications = self
                .roots
                .iter()
                .enumerate()
                .filter(|(_, root)| root.is_some())
                .map(|(i, _)| Notification::new(WatchKey(i), PathBuf::new(), NotificationKind::Overflow))
                .collect();
        }
        notifications
    }
}

/// Source fed through a [`NotificationSender`] instead of the OS
///
/// Keys are handed out in registration order starting at `WatchKey(0)`.
pub struct QueueSource {
    roots: Vec<PathBuf>,
    queue: NotificationQueue,
}

/// Feeds a [`QueueSource`]
#[derive(Clone)]
pub struct NotificationSender {
    tx: Sender<Notification>,
}

impl NotificationSender {
    /// Queue one notification; false once the source is gone
    pub fn send(&self, notification: Notification) -> bool {
        self.tx.send(notification).is_ok()
    }

    /// Queue several notifications so they are drained together
    pub fn send_all(&self, notifications: impl IntoIterator<Item = Notification>) -> bool {
        notifications.into_iter().all(|n| self.send(n))
    }
}

impl QueueSource {
    pub fn new() -> (Self, NotificationSender) {
        let (tx, queue) = NotificationQueue::channel();
        let source = Self {
            roots: Vec::new(),
            queue,
        };
        (source, NotificationSender { tx })
    }
}

impl NotificationSource for QueueSource {
    fn register(&mut self, root: &Path, _recursive: bool) -> Result<WatchKey> {
        self.roots.push(root.to_path_buf());
        Ok(WatchKey(self.roots.len() - 1))
    }

    fn take(&mut self) -> Result<Vec<Notification>> {
        self.queue.take()
    }

    fn close_handle(&self) -> CloseHandle {
        self.queue.handle.clone()
    }
}
