//! Reconciliation between archives on disk and the download ledger.
//!
//! Two directions:
//! - archive → ledger: every key stored in an archive must have a success
//!   row naming that archive. Keys without one are stale (an aborted or
//!   superseded campaign wrote them) and can optionally be purged.
//! - ledger → archive: every success row must resolve to a readable blob.
//!   Rows that do not are reported; repair means re-fetching, so this
//!   direction never mutates anything.

use crate::archive::{Archive, WriteMode};
use crate::cache::ArchiveCache;
use crate::constants;
use crate::error::StoreError;
use crate::ledger::{Ledger, Outcome};
use anyhow::{Context, Result};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StaleKey {
    /// Archive filename relative to the root
    pub archive: String,
    pub key: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MissingBlob {
    pub key: String,
    /// Archive the ledger claims holds the blob
    pub archive: String,
    pub reason: String,
}

#[derive(Debug, Default)]
pub struct ReconcileReport {
    pub archives_checked: usize,
    pub rows_checked: usize,
    pub stale: Vec<StaleKey>,
    pub missing: Vec<MissingBlob>,
}

impl ReconcileReport {
    pub fn is_clean(&self) -> bool {
        self.stale.is_empty() && self.missing.is_empty()
    }
}

/// List archive files directly under `root`, sorted by filename
pub fn scan_archives(root: impl AsRef<Path>) -> Result<Vec<PathBuf>> {
    let root = root.as_ref();
    let mut archives = Vec::new();

    for entry in std::fs::read_dir(root)
        .with_context(|| format!("failed to read archive root {}", root.display()))?
    {
        let entry = entry?;
        let name = entry.file_name();
        if let Some(name) = name.to_str() {
            if constants::is_archive_filename(name) && entry.file_type()?.is_file() {
                archives.push(entry.path());
            }
        }
    }

    archives.sort();
    Ok(archives)
}

/// Run both reconciliation directions and return the combined report
pub fn reconcile(root: impl AsRef<Path>, ledger_path: impl AsRef<Path>) -> Result<ReconcileReport> {
    let root = root.as_ref();
    let ledger = Ledger::load(ledger_path.as_ref())?;

    let mut report = ReconcileReport::default();
    check_archives_against_ledger(root, &ledger, &mut report)?;
    check_ledger_against_archives(root, &ledger, &mut report)?;

    log::info!(
        "reconcile: {} archives, {} success rows, {} stale keys, {} missing blobs",
        report.archives_checked,
        report.rows_checked,
        report.stale.len(),
        report.missing.len()
    );

    Ok(report)
}

/// Direction 1: each archived key needs a success row naming this archive
fn check_archives_against_ledger(
    root: &Path,
    ledger: &Ledger,
    report: &mut ReconcileReport,
) -> Result<()> {
    for path in scan_archives(root)? {
        let filename = match path.file_name().and_then(|n| n.to_str()) {
            Some(name) => name.to_string(),
            None => continue,
        };

        let archive = Archive::open_read(&path)
            .with_context(|| format!("opening archive {}", path.display()))?;
        report.archives_checked += 1;

        for key in archive.keys_ordered() {
            let accounted = ledger.get(key).is_some_and(|row| {
                row.outcome == Outcome::Success
                    && row.archive_path.as_deref() == Some(filename.as_str())
            });
            if !accounted {
                report.stale.push(StaleKey {
                    archive: filename.clone(),
                    key: key.clone(),
                });
            }
        }
    }
    Ok(())
}

/// Direction 2: each success row must yield a readable blob
fn check_ledger_against_archives(
    root: &Path,
    ledger: &Ledger,
    report: &mut ReconcileReport,
) -> Result<()> {
    let mut locations: HashMap<String, (PathBuf, String)> = HashMap::new();
    for row in ledger.rows() {
        if row.outcome == Outcome::Success {
            if let Some(ref rel) = row.archive_path {
                locations.insert(row.key.clone(), (root.join(rel), rel.clone()));
            }
        }
    }

    let paths: HashMap<String, PathBuf> = locations
        .iter()
        .map(|(k, (p, _))| (k.clone(), p.clone()))
        .collect();
    let cache = ArchiveCache::new(
        Box::new(move |key| paths.get(key).cloned()),
        constants::DEFAULT_CACHE_CAPACITY,
    );

    for (key, (_, rel)) in &locations {
        report.rows_checked += 1;
        match cache.get_value(key) {
            Ok(_) => {}
            Err(
                e @ (StoreError::KeyMissing { .. }
                | StoreError::NotFound { .. }
                | StoreError::Unresolved { .. }),
            ) => {
                report.missing.push(MissingBlob {
                    key: key.clone(),
                    archive: rel.clone(),
                    reason: e.to_string(),
                });
            }
            Err(e) => {
                return Err(e).with_context(|| format!("reading blob for ledger key {}", key))
            }
        }
    }

    // Deterministic output regardless of hash map iteration order
    report.missing.sort_by(|a, b| a.key.cmp(&b.key));
    Ok(())
}

/// Remove stale keys from their archives. Returns how many were removed.
pub fn purge_stale(root: impl AsRef<Path>, stale: &[StaleKey]) -> Result<usize> {
    let root = root.as_ref();

    let mut by_archive: HashMap<&str, Vec<&str>> = HashMap::new();
    for s in stale {
        by_archive.entry(&s.archive).or_default().push(&s.key);
    }

    let mut removed = 0usize;
    for (filename, keys) in by_archive {
        let path = root.join(filename);
        let mut archive = Archive::open_write(&path, WriteMode::Update)
            .with_context(|| format!("opening archive {} for purge", path.display()))?;
        for key in keys {
            if archive.remove(key)? {
                removed += 1;
                log::info!("purged stale key {} from {}", key, filename);
            }
        }
        archive
            .flush(false)
            .with_context(|| format!("flushing purged archive {}", path.display()))?;
    }

    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scan_archives_filters_and_sorts() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("2024.cfa.zst"), b"x").unwrap();
        std::fs::write(dir.path().join("2023.cfa.zst"), b"x").unwrap();
        std::fs::write(dir.path().join("downloads.jsonl"), b"x").unwrap();
        std::fs::write(dir.path().join("2025.cfa.zst.tmp"), b"x").unwrap();

        let found = scan_archives(dir.path()).unwrap();
        let names: Vec<_> = found
            .iter()
            .map(|p| p.file_name().unwrap().to_str().unwrap().to_string())
            .collect();
        assert_eq!(names, vec!["2023.cfa.zst", "2024.cfa.zst"]);
    }
}
