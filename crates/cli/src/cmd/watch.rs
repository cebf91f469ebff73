//! Reconcile, then watch every enabled channel until Ctrl-C

use anyhow::{Context, Result};
use notifier_cli::{LineFormat, LogSink, StdoutSink};
use notifier_core::EventSink;
use notifier_store::FingerprintStore;
use notifier_watcher::ChannelJob;
use owo_colors::OwoColorize;
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

pub fn run(path: &Path, format: LineFormat) -> Result<()> {
    let config = super::load_config(path)?;
    let sinks: Vec<Arc<dyn EventSink>> = vec![
        Arc::new(LogSink),
        Arc::new(StdoutSink::new(format)),
    ];

    let jobs = config
        .enabled()
        .map(|channel| {
            ChannelJob::new(channel.clone(), sinks.clone())
                .with_context(|| format!("Failed to open channel '{}'", channel.id))
        })
        .collect::<Result<Vec<_>>>()?;
    let jobs = Arc::new(jobs);

    if jobs.is_empty() {
        eprintln!("{}", "No enabled channels".yellow());
        return Ok(());
    }

    // Set up Ctrl+C handler
    let (stop_tx, stop_rx) = crossbeam_channel::bounded::<()>(1);
    let handler_jobs = Arc::clone(&jobs);
    ctrlc::set_handler(move || {
        for job in handler_jobs.iter() {
            job.interrupt();
        }
        let _ = stop_tx.try_send(());
    })
    .context("Failed to install Ctrl+C handler")?;

    for job in jobs.iter() {
        match job.run() {
            Ok(summary) => info!(
                channel = %job.channel(),
                "Initial pass: {} change(s) in {} entries",
                summary.changes(),
                summary.visited
            ),
            Err(e) => warn!(channel = %job.channel(), "Channel failed to start: {:#}", e),
        }
    }

    eprintln!(
        "{} {} channel(s), press Ctrl+C to stop",
        "Watching".green().bold(),
        jobs.len()
    );
    let _ = stop_rx.recv();

    for job in jobs.iter() {
        if let Err(e) = job.shutdown() {
            warn!(channel = %job.channel(), "Shutdown failed: {:#}", e);
        }
    }
    FingerprintStore::close_all();
    eprintln!("{}", "Stopped".dimmed());

    Ok(())
}
