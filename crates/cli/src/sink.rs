//! Built-in event sinks
//!
//! Text lines follow the `;`-separated layout
//! `channel;kind;root;path[;source]`, optionally prefixed with a local
//! timestamp.

use anyhow::{Context, Result};
use chrono::Local;
use notifier_core::{EventSink, FileEvent};
use parking_lot::Mutex;
use std::io::Write;
use tracing::info;

/// How [`StdoutSink`] renders each event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineFormat {
    /// `channel;kind;root;path[;source]`
    Text { timestamps: bool },
    /// One JSON object per line
    Json,
}

impl LineFormat {
    pub fn render(&self, event: &FileEvent) -> Result<String> {
        match self {
            LineFormat::Text { timestamps: false } => Ok(event.to_string()),
            LineFormat::Text { timestamps: true } => Ok(format!(
                "{};{}",
                Local::now().format("%Y-%m-%d %H:%M:%S%.3f"),
                event
            )),
            LineFormat::Json => serde_json::to_string(event).context("Failed to encode event"),
        }
    }
}

/// Writes one line per event to a writer (stdout by default)
pub struct StdoutSink {
    format: LineFormat,
    out: Mutex<Box<dyn Write + Send>>,
}

impl StdoutSink {
    pub fn new(format: LineFormat) -> Self {
        Self::with_writer(format, Box::new(std::io::stdout()))
    }

    pub fn with_writer(format: LineFormat, out: Box<dyn Write + Send>) -> Self {
        Self {
            format,
            out: Mutex::new(out),
        }
    }
}

impl EventSink for StdoutSink {
    fn name(&self) -> &str {
        "stdout"
    }

    fn process(&self, batch: &[FileEvent]) -> Result<()> {
        let mut out = self.out.lock();
        for event in batch {
            writeln!(out, "{}", self.format.render(event)?).context("Failed to write event")?;
        }
        out.flush().context("Failed to flush events")?;
        Ok(())
    }
}

/// Reports every event through `tracing`
pub struct LogSink;

impl EventSink for LogSink {
    fn name(&self) -> &str {
        "log"
    }

    fn process(&self, batch: &[FileEvent]) -> Result<()> {
        for event in batch {
            info!(
                channel = %event.channel(),
                kind = %event.kind(),
                path = %event.absolute_path().display(),
                source = ?event.source(),
                "File event"
            );
        }
        Ok(())
    }
}
