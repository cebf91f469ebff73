//! Change detection for watched trees
//!
//! This crate provides:
//! - A tree-walk reconciler comparing the tree against stored fingerprints
//! - A native-event detector fed by the OS notification facility
//! - Dispatch wiring from both detectors to batched event sinks
//! - Channel configuration and the per-channel job driving all of it

pub mod config;
pub mod detector;
pub mod dispatch;
pub mod error;
pub mod job;
pub mod reconcile;
pub mod source;

// Re-exports
pub use config::{ChannelConfig, NotifierConfig};
pub use detector::{Detector, DetectorHandle, DetectorOptions, Interrupter};
pub use dispatch::{attach_spool, attach_watch, SpoolListener, WatchListener};
pub use error::WatchError;
pub use job::ChannelJob;
pub use reconcile::{PassSummary, Reconciler};
pub use source::{
    CloseHandle, NativeSource, Notification, NotificationKind, NotificationSender,
    NotificationSource, QueueSource, WatchKey,
};

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Result type for watcher operations
pub type Result<T> = std::result::Result<T, WatchError>;

/// Cooperative cancellation flag shared between a worker and its owner
#[derive(Debug, Clone, Default)]
pub struct InterruptFlag(Arc<AtomicBool>);

impl InterruptFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    pub fn clear(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Canonical form of a watched root, falling back to the given path
pub fn normalize_root(root: &Path) -> PathBuf {
    std::fs::canonicalize(root).unwrap_or_else(|_| root.to_path_buf())
}

/// Store key for an absolute path
pub(crate) fn store_key(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}
