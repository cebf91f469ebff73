//! Run one reconciliation pass per enabled channel

use anyhow::{Context, Result};
use notifier_cli::{LineFormat, StdoutSink};
use notifier_core::EventSink;
use notifier_watcher::ChannelJob;
use owo_colors::OwoColorize;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

pub fn run(path: &Path, format: LineFormat) -> Result<()> {
    let config = super::load_config(path)?;
    let sink: Arc<dyn EventSink> = Arc::new(StdoutSink::new(format));

    for channel in config.enabled() {
        let started = Instant::now();
        let job = ChannelJob::new(channel.clone(), vec![Arc::clone(&sink)])
            .with_context(|| format!("Failed to open channel '{}'", channel.id))?;

        let summary = job.reconcile();
        job.shutdown()
            .with_context(|| format!("Failed to close channel '{}'", channel.id))?;
        let summary =
            summary.with_context(|| format!("Reconciliation failed for '{}'", channel.id))?;

        // Summary on stderr so stdout carries only events
        eprintln!(
            "{} {}: {} visited, {} created, {} modified, {} deleted ({:.2?})",
            "✓".green(),
            channel.id.bold(),
            summary.visited,
            summary.created,
            summary.modified,
            summary.deleted,
            started.elapsed()
        );
    }

    Ok(())
}
