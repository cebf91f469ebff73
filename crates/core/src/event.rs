//! File events and lifecycle signals

use serde::{Serialize, Serializer};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Identifier of the channel an event belongs to
///
/// Cheap to clone; threaded through every event and log line.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChannelId(Arc<str>);

impl ChannelId {
    /// Create a channel id
    pub fn new(id: impl AsRef<str>) -> Self {
        Self(Arc::from(id.as_ref()))
    }

    /// Get the id as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ChannelId({})", &self.0)
    }
}

impl From<&str> for ChannelId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for ChannelId {
    fn from(id: String) -> Self {
        Self(Arc::from(id))
    }
}

impl Serialize for ChannelId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

/// Type of file change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FileEventKind {
    /// Entry created
    Create,
    /// Entry deleted
    Delete,
    /// Entry modified
    Modify,
    /// Entry renamed (`source` holds the previous path)
    Rename,
    /// Something changed but the facility could not say what (overflow)
    Unknown,
}

impl FileEventKind {
    /// Lowercase name used in text output
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Delete => "delete",
            Self::Modify => "modify",
            Self::Rename => "rename",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for FileEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A detected change below a watched root
///
/// Equality and hashing cover root, path, source and kind. The channel is
/// deliberately left out so that the same change reported twice compares
/// equal wherever it came from.
#[derive(Debug, Clone, Serialize)]
pub struct FileEvent {
    channel: ChannelId,
    root: PathBuf,
    path: PathBuf,
    #[serde(skip_serializing_if = "Option::is_none")]
    source: Option<PathBuf>,
    kind: FileEventKind,
}

impl FileEvent {
    /// Create an event for a single path
    pub fn new(
        channel: ChannelId,
        root: impl Into<PathBuf>,
        path: impl Into<PathBuf>,
        kind: FileEventKind,
    ) -> Self {
        Self {
            channel,
            root: root.into(),
            path: path.into(),
            source: None,
            kind,
        }
    }

    /// Create a rename event (`path` is the new location)
    pub fn renamed(
        channel: ChannelId,
        root: impl Into<PathBuf>,
        source: impl Into<PathBuf>,
        path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            channel,
            root: root.into(),
            path: path.into(),
            source: Some(source.into()),
            kind: FileEventKind::Rename,
        }
    }

    pub fn channel(&self) -> &ChannelId {
        &self.channel
    }

    /// Watched root the path is relative to
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path relative to the root
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Previous relative path of a renamed entry
    pub fn source(&self) -> Option<&Path> {
        self.source.as_deref()
    }

    pub fn kind(&self) -> FileEventKind {
        self.kind
    }

    /// Absolute path of the entry
    pub fn absolute_path(&self) -> PathBuf {
        self.root.join(&self.path)
    }
}

impl PartialEq for FileEvent {
    fn eq(&self, other: &Self) -> bool {
        self.root == other.root
            && self.path == other.path
            && self.source == other.source
            && self.kind == other.kind
    }
}

impl Eq for FileEvent {}

impl Hash for FileEvent {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.root.hash(state);
        self.path.hash(state);
        self.source.hash(state);
        self.kind.hash(state);
    }
}

impl fmt::Display for FileEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{};{};{};{}",
            self.channel,
            self.kind,
            self.root.display(),
            self.path.display()
        )?;
        if let Some(source) = &self.source {
            write!(f, ";{}", source.display())?;
        }
        Ok(())
    }
}

/// Lifecycle transition of a detector
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunKind {
    Start,
    Stop,
}

/// Lifecycle signal broadcast by the reconciler and the detector
#[derive(Debug, Clone)]
pub struct RunEvent {
    channel: ChannelId,
    kind: RunKind,
    message: String,
}

impl RunEvent {
    pub fn new(channel: ChannelId, kind: RunKind, message: impl Into<String>) -> Self {
        Self {
            channel,
            kind,
            message: message.into(),
        }
    }

    /// Start signal
    pub fn start(channel: ChannelId, message: impl Into<String>) -> Self {
        Self::new(channel, RunKind::Start, message)
    }

    /// Stop signal
    pub fn stop(channel: ChannelId, message: impl Into<String>) -> Self {
        Self::new(channel, RunKind::Stop, message)
    }

    pub fn channel(&self) -> &ChannelId {
        &self.channel
    }

    pub fn kind(&self) -> RunKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}
