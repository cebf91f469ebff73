//! Watcher error type

use notifier_store::StoreError;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum WatchError {
    /// Fingerprint store failure
    #[error(transparent)]
    Store(#[from] StoreError),

    /// OS notification facility failure
    #[error("notification facility error: {0}")]
    Notify(#[from] notify::Error),

    /// Registering a root with the notification facility failed
    #[error("failed to watch {path}: {source}")]
    Register {
        path: PathBuf,
        #[source]
        source: notify::Error,
    },

    /// The notification handle was closed
    #[error("notification handle closed")]
    Closed,

    /// Configuration file could not be read
    #[error("failed to read config {path}: {source}")]
    ConfigRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Configuration file could not be parsed
    #[error("invalid config: {0}")]
    ConfigParse(#[from] toml::de::Error),

    /// Configuration parsed but is unusable
    #[error("invalid config: {0}")]
    Config(String),

    /// A worker thread could not be started
    #[error("failed to spawn thread: {0}")]
    Spawn(#[source] std::io::Error),
}
