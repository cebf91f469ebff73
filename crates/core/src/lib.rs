//! Shared building blocks for filenotifier
//!
//! This crate provides:
//! - File events and lifecycle signals
//! - Listener pools (copy-on-write observer registries)
//! - Debounced batch queues
//! - Base-name include/exclude filters
//! - The consumer contract (`EventSink`)

pub mod batch;
pub mod event;
pub mod filter;
pub mod listener;
pub mod sink;

// Re-exports
pub use batch::{BatchExecutor, BatchQueue};
pub use event::{ChannelId, FileEvent, FileEventKind, RunEvent, RunKind};
pub use filter::NameFilter;
pub use listener::{Listener, ListenerPool};
pub use sink::EventSink;
