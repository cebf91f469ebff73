//! Channel configuration
//!
//! A config file holds one `[[channel]]` table per watched tree set:
//!
//! ```toml
//! [[channel]]
//! id = "docs"
//! roots = ["/srv/docs"]
//! db = "/var/lib/fnotify/docs"
//! include = ".*\\.txt"
//! delay_secs = 5
//! retain_days = 7
//! ```

use crate::{Result, WatchError};
use notifier_core::{ChannelId, NameFilter};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

const MILLIS_PER_DAY: f64 = 86_400_000.0;

fn default_true() -> bool {
    true
}

fn default_delay_secs() -> u64 {
    5
}

fn default_max_events() -> usize {
    1000
}

/// Settings for one channel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ChannelConfig {
    /// Identifier carried by every event and log line
    pub id: String,

    /// Watched roots, in priority order
    pub roots: Vec<PathBuf>,

    /// Fingerprint store location
    pub db: PathBuf,

    /// Regular expression base names of files must fully match
    #[serde(default)]
    pub include: Option<String>,

    /// Regular expression base names must not fully match
    #[serde(default)]
    pub exclude: Option<String>,

    /// Watch subdirectories, not just the roots themselves
    #[serde(default = "default_true")]
    pub recursive: bool,

    /// Pair rename notifications into RENAME events
    #[serde(default = "default_true")]
    pub rename_tracking: bool,

    /// Seconds between watch batch deliveries (0 = only on stop or size)
    #[serde(default = "default_delay_secs")]
    pub delay_secs: u64,

    /// Buffered events that force a delivery (0 = unlimited)
    #[serde(default = "default_max_events")]
    pub max_events: usize,

    /// Only report changes newer than this many days
    #[serde(default)]
    pub retain_days: Option<f64>,

    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl ChannelConfig {
    /// Config with defaults for everything but the identity and locations
    pub fn new(id: impl Into<String>, roots: Vec<PathBuf>, db: impl Into<PathBuf>) -> Self {
        Self {
            id: id.into(),
            roots,
            db: db.into(),
            include: None,
            exclude: None,
            recursive: true,
            rename_tracking: true,
            delay_secs: default_delay_secs(),
            max_events: default_max_events(),
            retain_days: None,
            enabled: true,
        }
    }

    pub fn channel_id(&self) -> ChannelId {
        ChannelId::new(self.id.as_str())
    }

    /// Name filter; invalid patterns are logged and ignored
    pub fn filter(&self) -> NameFilter {
        NameFilter::lenient(self.include.as_deref(), self.exclude.as_deref())
    }

    pub fn delay(&self) -> Duration {
        Duration::from_secs(self.delay_secs)
    }

    /// Earliest fingerprint that is still reported, given the current time
    ///
    /// Without `retain_days` every change is reported. Zero days reports only
    /// changes made from now on.
    pub fn retain_cutoff(&self, now_millis: i64) -> i64 {
        match self.retain_days {
            Some(days) => now_millis.saturating_sub((days * MILLIS_PER_DAY) as i64),
            None => i64::MIN,
        }
    }

    /// Check the channel is usable
    pub fn validate(&self) -> Result<()> {
        if self.id.trim().is_empty() {
            return Err(WatchError::Config("channel id must not be empty".into()));
        }
        if self.roots.is_empty() {
            return Err(WatchError::Config(format!(
                "channel '{}' has no roots",
                self.id
            )));
        }
        if let Some(days) = self.retain_days {
            if !days.is_finite() || days < 0.0 {
                return Err(WatchError::Config(format!(
                    "channel '{}': retain_days must be a non-negative number",
                    self.id
                )));
            }
        }
        Ok(())
    }
}

/// Top-level config file
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NotifierConfig {
    #[serde(rename = "channel", default)]
    pub channels: Vec<ChannelConfig>,
}

impl NotifierConfig {
    /// Read, parse and validate a config file
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|source| WatchError::ConfigRead {
            path: path.to_path_buf(),
            source,
        })?;
        text.parse()
    }

    /// Reject empty ids, duplicate ids and channels without roots
    pub fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for channel in &self.channels {
            channel.validate()?;
            if !seen.insert(channel.id.as_str()) {
                return Err(WatchError::Config(format!(
                    "duplicate channel id '{}'",
                    channel.id
                )));
            }
        }
        Ok(())
    }

    /// Channels that should run
    pub fn enabled(&self) -> impl Iterator<Item = &ChannelConfig> {
        self.channels.iter().filter(|c| c.enabled)
    }
}

impl std::str::FromStr for NotifierConfig {
    type Err = WatchError;

    fn from_str(s: &str) -> Result<Self> {
        let config: NotifierConfig = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_applied() {
        let config: NotifierConfig = r#"
[[channel]]
id = "docs"
roots = ["/srv/docs"]
db = "/tmp/docs.db"
"#
        .parse()
        .unwrap();

        let channel = &config.channels[0];
        assert!(channel.recursive);
        assert!(channel.rename_tracking);
        assert!(channel.enabled);
        assert_eq!(channel.delay(), Duration::from_secs(5));
        assert_eq!(channel.max_events, 1000);
        assert_eq!(channel.retain_days, None);
        assert_eq!(channel, &ChannelConfig::new("docs", vec!["/srv/docs".into()], "/tmp/docs.db"));
    }

    #[test]
    fn test_duplicate_ids_rejected() {
        let result: Result<NotifierConfig> = r#"
[[channel]]
id = "a"
roots = ["/x"]
db = "/tmp/a"

[[channel]]
id = "a"
roots = ["/y"]
db = "/tmp/b"
"#
        .parse();
        assert!(matches!(result, Err(WatchError::Config(_))));
    }

    #[test]
    fn test_missing_roots_and_empty_id_rejected() {
        let no_roots = ChannelConfig::new("a", vec![], "/tmp/a");
        assert!(no_roots.validate().is_err());

        let empty_id = ChannelConfig::new("  ", vec!["/x".into()], "/tmp/a");
        assert!(empty_id.validate().is_err());
    }

    #[test]
    fn test_unknown_field_rejected() {
        let result: Result<NotifierConfig> = r#"
[[channel]]
id = "a"
roots = ["/x"]
db = "/tmp/a"
colour = "blue"
"#
        .parse();
        assert!(matches!(result, Err(WatchError::ConfigParse(_))));
    }

    #[test]
    fn test_retain_cutoff() {
        let mut channel = ChannelConfig::new("a", vec!["/x".into()], "/tmp/a");
        assert_eq!(channel.retain_cutoff(1_000_000_000), i64::MIN);

        channel.retain_days = Some(0.5);
        assert_eq!(channel.retain_cutoff(100_000_000), 100_000_000 - 43_200_000);

        channel.retain_days = Some(0.0);
        assert_eq!(channel.retain_cutoff(100_000_000), 100_000_000);
    }

    #[test]
    fn test_invalid_filter_is_dropped() {
        let mut channel = ChannelConfig::new("a", vec!["/x".into()], "/tmp/a");
        channel.include = Some("([".into());
        channel.exclude = Some("tmp".into());

        let filter = channel.filter();
        assert!(!filter.has_include());
        assert!(filter.has_exclude());
    }

    #[test]
    fn test_enabled_filters_channels() {
        let config: NotifierConfig = r#"
[[channel]]
id = "on"
roots = ["/x"]
db = "/tmp/on"

[[channel]]
id = "off"
roots = ["/y"]
db = "/tmp/off"
enabled = false
"#
        .parse()
        .unwrap();

        let ids: Vec<_> = config.enabled().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["on"]);
    }
}
