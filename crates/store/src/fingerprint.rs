//! Path fingerprints
//!
//! A fingerprint is the later of a file's modification and creation times,
//! in milliseconds since the Unix epoch. It is a cheap change proxy: file
//! contents are never read.

use std::fs::Metadata;
use std::time::{SystemTime, UNIX_EPOCH};

/// Timestamp-based change marker for one path
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Fingerprint(i64);

impl Fingerprint {
    pub const fn from_millis(millis: i64) -> Self {
        Self(millis)
    }

    pub const fn millis(&self) -> i64 {
        self.0
    }

    /// Fingerprint from file attributes
    ///
    /// Creation time is only used where the platform reports it.
    pub fn from_metadata(metadata: &Metadata) -> Self {
        let modified = metadata.modified().ok().map(to_millis).unwrap_or(0);
        let created = metadata.created().ok().map(to_millis).unwrap_or(0);
        Self(modified.max(created))
    }

    pub(crate) fn to_bytes(self) -> [u8; 8] {
        self.0.to_be_bytes()
    }

    pub(crate) fn from_bytes(bytes: &[u8]) -> Option<Self> {
        let raw: [u8; 8] = bytes.try_into().ok()?;
        Some(Self(i64::from_be_bytes(raw)))
    }
}

/// Milliseconds since the Unix epoch, negative before it
pub fn to_millis(time: SystemTime) -> i64 {
    match time.duration_since(UNIX_EPOCH) {
        Ok(after) => after.as_millis() as i64,
        Err(before) => -(before.duration().as_millis() as i64),
    }
}

/// Current time in milliseconds since the Unix epoch
pub fn now_millis() -> i64 {
    to_millis(SystemTime::now())
}

#[cfg(test)]
mod tests {
    use super::*;
    use filetime::{set_file_mtime, FileTime};
    use std::time::Duration;
    use tempfile::TempDir;

    #[test]
    fn test_bytes_roundtrip_preserves_order() {
        let early = Fingerprint::from_millis(-5);
        let late = Fingerprint::from_millis(1_700_000_000_000);
        assert_eq!(Fingerprint::from_bytes(&early.to_bytes()), Some(early));
        assert_eq!(Fingerprint::from_bytes(&late.to_bytes()), Some(late));
        assert_eq!(Fingerprint::from_bytes(b"short"), None);
    }

    #[test]
    fn test_from_metadata_follows_future_mtime() {
        let temp_dir = TempDir::new().unwrap();
        let file = temp_dir.path().join("a.txt");
        std::fs::write(&file, b"a").unwrap();

        // Pushed past the creation time so modification dominates
        let future = SystemTime::now() + Duration::from_secs(86_400);
        set_file_mtime(&file, FileTime::from_system_time(future)).unwrap();

        let fp = Fingerprint::from_metadata(&std::fs::metadata(&file).unwrap());
        // Some filesystems only keep whole seconds
        assert!((fp.millis() - to_millis(future)).abs() < 1000);
    }

    #[test]
    fn test_to_millis_before_epoch() {
        let before = UNIX_EPOCH - Duration::from_millis(1500);
        assert_eq!(to_millis(before), -1500);
    }
}
