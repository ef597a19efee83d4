//! Global constants and helpers for archive filenames/paths, networking defaults, and compression
use std::path::{Path, PathBuf};

/// Binary name used in user agents and archive metadata
pub const BINARY_NAME: &str = "cfarchive";

/// Package version from Cargo.toml (set at compile time)
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Returns the user agent string for HTTP requests
pub fn user_agent() -> String {
    format!("{}/{}", BINARY_NAME, VERSION)
}

/// Returns the created_by string for archive metadata
pub fn created_by() -> String {
    format!("{}/{}", BINARY_NAME, VERSION)
}

// ============================================================================
// Archive File Constants
// ============================================================================

/// Archive format version string embedded in the metadata frame
pub const ARCHIVE_FORMAT: &str = "cfarchive-v1";

/// File extension for archive files
pub const ARCHIVE_EXT: &str = ".cfa.zst";

/// Returns the canonical archive filename for a partition
pub fn archive_filename(partition: &str) -> String {
    format!("{}{}", partition, ARCHIVE_EXT)
}

/// Resolves an on-disk archive path relative to the provided root directory
pub fn archive_path(root: impl AsRef<Path>, partition: &str) -> PathBuf {
    root.as_ref().join(archive_filename(partition))
}

/// Whether a filename looks like an archive file
pub fn is_archive_filename(name: &str) -> bool {
    name.ends_with(ARCHIVE_EXT) && name.len() > ARCHIVE_EXT.len()
}

/// Extracts the partition name from an archive filename
pub fn partition_from_filename(name: &str) -> Option<&str> {
    if is_archive_filename(name) {
        Some(&name[..name.len() - ARCHIVE_EXT.len()])
    } else {
        None
    }
}

// ============================================================================
// Campaign Constants
// ============================================================================

/// Default ledger filename inside an archive root
pub const DEFAULT_LEDGER_FILENAME: &str = "downloads.jsonl";

/// Flush open archives and the ledger after this many successful fetches
pub const DEFAULT_CHECKPOINT_INTERVAL: usize = 200;

/// Default cap on items attempted in a single campaign run
pub const DEFAULT_MAX_ITEMS: usize = 1000;

/// Default capacity for read-mode archive caches
pub const DEFAULT_CACHE_CAPACITY: usize = 5;

// ============================================================================
// Networking Constants
// ============================================================================

/// Default HTTP request timeout
pub const HTTP_TIMEOUT_SECS: u64 = 30;

/// Maximum retry attempts for a single HTTP fetch
pub const HTTP_MAX_RETRIES: usize = 10;

/// Default rate limit for fetch requests (requests per minute)
pub const DEFAULT_RATE_LIMIT: usize = 120;

// ============================================================================
// Compression Constants
// ============================================================================

/// Zstd compression level (1 = fast, 3 = balanced, 19 = maximum)
pub const ZSTD_COMPRESSION_LEVEL: i32 = 3;
