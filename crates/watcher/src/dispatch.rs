//! Dispatch from detectors to sinks
//!
//! Each sink gets its own [`BatchQueue`] per detector:
//! - [`SpoolListener`] buffers a reconciliation pass and delivers it when the
//!   pass's STOP arrives
//! - [`WatchListener`] delivers on a fixed delay while the detector runs and
//!   once more when it stops

use crate::detector::Detector;
use crate::reconcile::Reconciler;
use crate::NotificationSource;
use anyhow::Context;
use notifier_core::{
    BatchExecutor, BatchQueue, ChannelId, EventSink, FileEvent, Listener, RunEvent, RunKind,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

struct SinkExecutor {
    channel: ChannelId,
    sink: Arc<dyn EventSink>,
}

impl BatchExecutor<FileEvent> for SinkExecutor {
    fn execute(&self, batch: Vec<FileEvent>) -> anyhow::Result<()> {
        debug!(
            channel = %self.channel,
            "Delivering {} event(s) to {}",
            batch.len(),
            self.sink.name()
        );
        self.sink
            .process(&batch)
            .with_context(|| format!("sink '{}' rejected {} event(s)", self.sink.name(), batch.len()))
    }
}

fn sink_queue(
    kind: &str,
    channel: &ChannelId,
    sink: Arc<dyn EventSink>,
    max_events: usize,
) -> BatchQueue<FileEvent> {
    let name = format!("{}-{}-{}", kind, channel, sink.name());
    BatchQueue::new(
        name,
        max_events,
        SinkExecutor {
            channel: channel.clone(),
            sink,
        },
    )
}

/// Buffers one reconciliation pass per delivery
pub struct SpoolListener {
    channel: ChannelId,
    queue: BatchQueue<FileEvent>,
}

impl SpoolListener {
    pub fn new(channel: ChannelId, sink: Arc<dyn EventSink>, max_events: usize) -> Self {
        let queue = sink_queue("spool", &channel, sink, max_events);
        Self { channel, queue }
    }

    pub fn queue(&self) -> &BatchQueue<FileEvent> {
        &self.queue
    }
}

impl Listener<FileEvent> for SpoolListener {
    fn on_event(&self, event: &FileEvent) {
        self.queue.add(event.clone());
    }
}

impl Listener<RunEvent> for SpoolListener {
    fn on_event(&self, event: &RunEvent) {
        if event.kind() == RunKind::Stop {
            debug!(channel = %self.channel, "Pass over: {}", event.message());
            if let Err(e) = self.queue.flush() {
                warn!(channel = %self.channel, "Spool delivery failed: {:#}", e);
            }
        }
    }
}

/// Delivers detector events on a fixed delay
pub struct WatchListener {
    queue: BatchQueue<FileEvent>,
    delay: Duration,
}

impl WatchListener {
    /// A zero `delay` delivers only when `max_events` is reached and on stop
    pub fn new(
        channel: ChannelId,
        sink: Arc<dyn EventSink>,
        delay: Duration,
        max_events: usize,
    ) -> Self {
        Self {
            queue: sink_queue("watch", &channel, sink, max_events),
            delay,
        }
    }

    pub fn queue(&self) -> &BatchQueue<FileEvent> {
        &self.queue
    }
}

impl Listener<FileEvent> for WatchListener {
    fn on_event(&self, event: &FileEvent) {
        self.queue.add(event.clone());
    }
}

impl Listener<RunEvent> for WatchListener {
    fn on_event(&self, event: &RunEvent) {
        debug!("{}: {}", self.queue.name(), event.message());
        match event.kind() {
            RunKind::Start => self.queue.start(self.delay),
            RunKind::Stop => self.queue.stop(),
        }
    }
}

/// Deliver a reconciler's passes to `sink`
pub fn attach_spool(
    reconciler: &Reconciler,
    sink: Arc<dyn EventSink>,
    max_events: usize,
) -> Arc<SpoolListener> {
    let listener = Arc::new(SpoolListener::new(
        reconciler.channel().clone(),
        sink,
        max_events,
    ));
    reconciler.file_events().subscribe(listener.clone());
    reconciler.run_events().subscribe(listener.clone());
    listener
}

/// Deliver a detector's events to `sink` every `delay`
pub fn attach_watch<S: NotificationSource>(
    detector: &Detector<S>,
    sink: Arc<dyn EventSink>,
    delay: Duration,
    max_events: usize,
) -> Arc<WatchListener> {
    let listener = Arc::new(WatchListener::new(
        detector.channel().clone(),
        sink,
        delay,
        max_events,
    ));
    detector.file_events().subscribe(listener.clone());
    detector.run_events().subscribe(listener.clone());
    listener
}
