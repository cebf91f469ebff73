//! CLI command implementations

pub mod check;
pub mod scan;
pub mod watch;

use anyhow::{Context, Result};
use notifier_watcher::NotifierConfig;
use std::path::Path;

/// Load and validate a configuration file
pub fn load_config(path: &Path) -> Result<NotifierConfig> {
    NotifierConfig::load(path)
        .with_context(|| format!("Failed to load configuration {}", path.display()))
}
