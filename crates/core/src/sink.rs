//! Consumer contract for batches of file events

use crate::FileEvent;

/// Downstream consumer of event batches
///
/// Called from timer threads. Implementations must not block indefinitely.
/// A returned error is logged by the caller; the batch is not retried.
pub trait EventSink: Send + Sync {
    /// Short name used in log lines
    fn name(&self) -> &str;

    /// Deliver one batch
    fn process(&self, batch: &[FileEvent]) -> anyhow::Result<()>;
}
