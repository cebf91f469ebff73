//! Persistent fingerprint store
//!
//! This crate provides:
//! - Path fingerprints (last-modification timestamps in milliseconds)
//! - A two-generation fingerprint map on sled with crash-safe role swap
//! - A process-wide registry so each store location has one live handle

pub mod error;
pub mod fingerprint;
pub mod generation;
mod roles;
pub mod store;

// Re-exports
pub use error::StoreError;
pub use fingerprint::{now_millis, Fingerprint};
pub use generation::Generation;
pub use store::FingerprintStore;

/// Result type for store operations
pub type Result<T> = std::result::Result<T, StoreError>;
