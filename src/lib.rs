// src/lib.rs
//! Keyed blob archives and resumable bulk-fetch campaigns.
//!
//! An archive is a single compressed file mapping string keys to opaque
//! blobs, written atomically. A campaign fetches a worklist of items into
//! per-partition archives, tracking every attempt in a ledger so that reruns
//! resume instead of re-downloading. The reconcile module cross-checks the
//! two.

pub mod archive;
pub mod archive_format;
pub mod cache;
pub mod client;
pub mod constants;
pub mod error;
pub mod fetch;
pub mod ledger;
pub mod reconcile;
pub mod worklist;

pub use archive::{Archive, WriteMode};
pub use cache::{ArchiveCache, Resolver};
pub use client::HttpFetcher;
pub use error::{StoreError, StoreResult};
pub use fetch::{CampaignReport, FetchConfig, FetchManager, Fetcher};
pub use ledger::{Ledger, LedgerRow, Outcome};
pub use reconcile::{reconcile, purge_stale, ReconcileReport};
pub use worklist::{load_worklist, WorklistItem};
