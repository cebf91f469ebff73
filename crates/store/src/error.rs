//! Store error type

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    /// Underlying database failure
    #[error("fingerprint database error: {0}")]
    Db(#[from] sled::Error),

    /// Filesystem failure while preparing or destroying the store
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Stored value could not be decoded
    #[error("malformed fingerprint for key {key:?}")]
    Malformed { key: String },

    /// Role sentinel could not be encoded
    #[error("failed to encode generation roles: {0}")]
    Encode(#[from] bincode::Error),

    /// Operation on a store that has been closed
    #[error("fingerprint store {0} is closed")]
    Closed(PathBuf),
}
