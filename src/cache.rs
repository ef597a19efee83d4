// src/cache.rs
//! Bounded cache of open read-mode archives.
//!
//! Reconciliation and reprocessing passes do highly non-sequential lookups
//! across many per-partition archives; decompressing an archive once per
//! lookup is prohibitive. The cache keeps up to `capacity` archives loaded
//! and evicts least-recently-used ones. A caller-supplied resolver maps a
//! lookup key to the archive path containing it, decoupling the cache from
//! the ledger schema.

use crate::archive::Archive;
use crate::error::{StoreError, StoreResult};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;

/// Maps a lookup key to the archive path that should contain it
pub type Resolver = Box<dyn Fn(&str) -> Option<PathBuf> + Send + Sync>;

pub struct ArchiveCache {
    resolver: Resolver,
    capacity: usize,
    inner: Mutex<Inner>,
}

struct Inner {
    open: HashMap<PathBuf, Archive>,
    // Most recently used at the back
    lru: Vec<PathBuf>,
}

impl ArchiveCache {
    pub fn new(resolver: Resolver, capacity: usize) -> Self {
        Self {
            resolver,
            capacity: capacity.max(1),
            inner: Mutex::new(Inner {
                open: HashMap::new(),
                lru: Vec::new(),
            }),
        }
    }

    /// Self-check for callers that want to fail fast at construction time
    pub fn all_ok(&self) -> bool {
        self.capacity >= 1 && !self.inner.is_poisoned()
    }

    /// Resolve `key` to an archive, loading it if necessary, and return the
    /// blob stored under `key`.
    ///
    /// A key that resolves to an archive which does not contain it means the
    /// ledger and the archive disagree; that is surfaced as `KeyMissing`,
    /// never swallowed.
    pub fn get_value(&self, key: &str) -> StoreResult<Vec<u8>> {
        let path = (self.resolver)(key).ok_or_else(|| StoreError::Unresolved {
            key: key.to_string(),
        })?;

        let mut inner = self.inner.lock().unwrap();

        if !inner.open.contains_key(&path) {
            let archive = Archive::open_read(&path)?;
            if inner.open.len() >= self.capacity {
                let evicted = inner.lru.remove(0);
                inner.open.remove(&evicted);
            }
            inner.open.insert(path.clone(), archive);
        }

        // Touch: move this path to the most-recently-used slot
        inner.lru.retain(|p| p != &path);
        inner.lru.push(path.clone());

        let archive = match inner.open.get(&path) {
            Some(a) => a,
            None => return Err(StoreError::NotFound { path }),
        };

        match archive.get(key)? {
            Some(blob) => Ok(blob.to_vec()),
            None => Err(StoreError::KeyMissing {
                key: key.to_string(),
                path,
            }),
        }
    }

    /// Number of archives currently open in the cache
    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().open.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.open.clear();
        inner.lru.clear();
    }
}
