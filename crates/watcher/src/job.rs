//! Per-channel job
//!
//! A [`ChannelJob`] owns everything one channel needs: its store, its
//! reconciler, and (once started) its detector thread, with every sink
//! attached to both. An external scheduler calls [`ChannelJob::reconcile`]
//! on its own cadence; [`ChannelJob::run`] does one pass and then hands over
//! to the detector.
//!
//! Reconciliation and the detector must not write the same store at the
//! same time. The job does not enforce this.

use crate::config::ChannelConfig;
use crate::detector::{Detector, DetectorHandle, DetectorOptions};
use crate::dispatch::{attach_spool, attach_watch};
use crate::reconcile::{PassSummary, Reconciler};
use crate::source::NativeSource;
use crate::{InterruptFlag, NotificationSource, Result};
use notifier_core::{ChannelId, EventSink};
use notifier_store::{now_millis, FingerprintStore};
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::info;

pub struct ChannelJob {
    config: ChannelConfig,
    channel: ChannelId,
    store: Arc<FingerprintStore>,
    reconciler: Reconciler,
    sinks: Vec<Arc<dyn EventSink>>,
    detector: Mutex<Option<DetectorHandle>>,
    stopped: InterruptFlag,
}

impl ChannelJob {
    /// Open the channel's store and wire its reconciler to `sinks`
    pub fn new(config: ChannelConfig, sinks: Vec<Arc<dyn EventSink>>) -> Result<Self> {
        config.validate()?;
        let channel = config.channel_id();
        let store = FingerprintStore::open(&config.db)?;

        let reconciler = Reconciler::new(
            channel.clone(),
            &config.roots,
            config.filter(),
            Arc::clone(&store),
        );
        for sink in &sinks {
            attach_spool(&reconciler, Arc::clone(sink), config.max_events);
        }

        Ok(Self {
            config,
            channel,
            store,
            reconciler,
            sinks,
            detector: Mutex::new(None),
            stopped: InterruptFlag::new(),
        })
    }

    pub fn channel(&self) -> &ChannelId {
        &self.channel
    }

    pub fn config(&self) -> &ChannelConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<FingerprintStore> {
        &self.store
    }

    pub fn reconciler(&self) -> &Reconciler {
        &self.reconciler
    }

    /// One reconciliation pass with the cutoff taken from the current time
    ///
    /// Does nothing once the job was interrupted.
    pub fn reconcile(&self) -> Result<PassSummary> {
        if self.stopped.is_set() {
            return Ok(PassSummary {
                interrupted: true,
                ..PassSummary::default()
            });
        }
        let cutoff = self.config.retain_cutoff(now_millis());
        self.reconciler.run(cutoff)
    }

    /// Start the native detector; no-op if one is running or the job was interrupted
    pub fn start_detector(&self) -> Result<()> {
        self.start_detector_with(NativeSource::new()?)
    }

    /// Start the detector on a given notification source
    pub fn start_detector_with<S: NotificationSource>(&self, source: S) -> Result<()> {
        let mut slot = self.detector.lock();
        if slot.is_some() || self.stopped.is_set() {
            return Ok(());
        }

        let options = DetectorOptions {
            recursive: self.config.recursive,
            rename_tracking: self.config.rename_tracking,
            ..DetectorOptions::default()
        };
        let detector = Detector::new(
            self.channel.clone(),
            &self.config.roots,
            self.config.filter(),
            Arc::clone(&self.store),
            source,
            options,
        )?;
        for sink in &self.sinks {
            attach_watch(
                &detector,
                Arc::clone(sink),
                self.config.delay(),
                self.config.max_events,
            );
        }

        *slot = Some(detector.spawn()?);
        Ok(())
    }

    /// One pass, then the detector unless interrupted meanwhile
    pub fn run(&self) -> Result<PassSummary> {
        let summary = self.reconcile()?;
        if !summary.interrupted {
            self.start_detector()?;
        }
        Ok(summary)
    }

    /// Stop the running pass and the detector; safe from any thread
    pub fn interrupt(&self) {
        self.stopped.set();
        self.reconciler.interrupt();
        if let Some(detector) = self.detector.lock().as_ref() {
            detector.interrupt();
        }
    }

    /// Wait for the detector thread, if one was started
    pub fn join(&self) {
        let detector = self.detector.lock().take();
        if let Some(detector) = detector {
            detector.join();
        }
    }

    /// Interrupt, wait for the detector, then close the store
    pub fn shutdown(&self) -> Result<()> {
        self.interrupt();
        self.join();
        self.store.close()?;
        info!(channel = %self.channel, "Channel stopped");
        Ok(())
    }
}
