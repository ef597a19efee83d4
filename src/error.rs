//! Typed error taxonomy for the storage layer.
//!
//! Item-level fetch failures never show up here: the fetch manager converts
//! them into `Failed` ledger rows. Everything in this enum is a hard failure
//! that the caller must see, so that a broken archive or a failed flush can
//! never be mistaken for a bad download.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    // Precondition violations (programmer/operator errors)
    #[error("archive {path} already exists")]
    AlreadyExists { path: PathBuf },

    #[error("archive {path} does not exist")]
    NotFound { path: PathBuf },

    #[error("archive handle is closed (already flushed)")]
    HandleClosed,

    #[error("archive {path} is open read-only; add/remove require write mode")]
    NotWritable { path: PathBuf },

    #[error("archive {path} is open for writing; get requires read mode")]
    NotReadable { path: PathBuf },

    // Consistency errors (ledger/archive disagreement)
    #[error("no archive resolves key {key}")]
    Unresolved { key: String },

    #[error("key {key} missing from archive {path}")]
    KeyMissing { key: String, path: PathBuf },

    // Format errors (corrupt or foreign files)
    #[error("bad archive format in {path}: {reason}")]
    Format { path: PathBuf, reason: String },

    // Durability errors (failed flush; fatal for a campaign)
    #[error("flush failed for {path}")]
    Durability {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;
