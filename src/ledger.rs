// src/ledger.rs
//! Download ledger: one row per worklist key ever attempted.
//!
//! The ledger is the single source of truth for "already attempted". It is
//! loaded whole at campaign startup, consulted before each fetch, and
//! rewritten whole (sorted by timestamp, atomic replace) at every
//! checkpoint. A row with `outcome = success` must name the archive that
//! holds its blob; a failed row must not.

use crate::error::{StoreError, StoreResult};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Success,
    Failure,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerRow {
    pub key: String,
    pub outcome: Outcome,
    pub blob_size: u64,
    /// Archive filename relative to the campaign root; present iff success
    pub archive_path: Option<String>,
    pub error_message: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl LedgerRow {
    pub fn success(key: impl Into<String>, blob_size: u64, archive_path: String) -> Self {
        Self {
            key: key.into(),
            outcome: Outcome::Success,
            blob_size,
            archive_path: Some(archive_path),
            error_message: None,
            timestamp: Utc::now(),
        }
    }

    pub fn failure(key: impl Into<String>, error_message: String) -> Self {
        Self {
            key: key.into(),
            outcome: Outcome::Failure,
            blob_size: 0,
            archive_path: None,
            error_message: Some(error_message),
            timestamp: Utc::now(),
        }
    }

    /// Enforce the row invariant: a success names its archive, a failure
    /// names its error and no archive.
    pub fn validate(&self) -> StoreResult<()> {
        let ok = match self.outcome {
            Outcome::Success => self.archive_path.is_some(),
            Outcome::Failure => self.archive_path.is_none() && self.error_message.is_some(),
        };
        if ok {
            Ok(())
        } else {
            Err(StoreError::Format {
                path: PathBuf::new(),
                reason: format!("inconsistent ledger row for key {}", self.key),
            })
        }
    }
}

pub struct Ledger {
    path: PathBuf,
    rows: HashMap<String, LedgerRow>,
}

impl Ledger {
    /// Load a ledger from a JSON-lines file; an absent file yields an empty
    /// ledger (first run of a campaign).
    pub fn load(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let mut rows = HashMap::new();

        if path.exists() {
            let data = std::fs::read_to_string(&path)
                .with_context(|| format!("failed to read ledger {}", path.display()))?;
            for (lineno, line) in data.lines().enumerate() {
                if line.trim().is_empty() {
                    continue;
                }
                let row: LedgerRow = serde_json::from_str(line).with_context(|| {
                    format!("bad ledger row at {}:{}", path.display(), lineno + 1)
                })?;
                row.validate().with_context(|| {
                    format!("invalid ledger row at {}:{}", path.display(), lineno + 1)
                })?;
                rows.insert(row.key.clone(), row);
            }
        }

        Ok(Self { path, rows })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn get(&self, key: &str) -> Option<&LedgerRow> {
        self.rows.get(key)
    }

    /// Insert or replace the row for a key (one row per key ever attempted;
    /// a later attempt replaces an earlier failure)
    pub fn upsert(&mut self, row: LedgerRow) {
        self.rows.insert(row.key.clone(), row);
    }

    pub fn rows(&self) -> impl Iterator<Item = &LedgerRow> {
        self.rows.values()
    }

    /// Keys with a success row; the set subtracted from a candidate
    /// worklist on resume
    pub fn succeeded_keys(&self) -> HashSet<&str> {
        self.rows
            .values()
            .filter(|r| r.outcome == Outcome::Success)
            .map(|r| r.key.as_str())
            .collect()
    }

    /// Persist the ledger atomically: rows sorted by timestamp, one JSON
    /// document per line, written to a temp file then renamed.
    pub fn save(&self) -> Result<()> {
        let mut sorted: Vec<&LedgerRow> = self.rows.values().collect();
        sorted.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then(a.key.cmp(&b.key)));

        let mut out = String::new();
        for row in sorted {
            out.push_str(&serde_json::to_string(row).context("failed to serialize ledger row")?);
            out.push('\n');
        }

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent).with_context(|| {
                    format!("failed to create ledger directory {}", parent.display())
                })?;
            }
        }

        let temp_path = self.path.with_extension("jsonl.tmp");
        std::fs::write(&temp_path, out)
            .with_context(|| format!("failed to write temp ledger: {}", temp_path.display()))?;
        std::fs::rename(&temp_path, &self.path)
            .with_context(|| format!("failed to rename ledger: {}", self.path.display()))?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = Ledger::load(dir.path().join("downloads.jsonl")).unwrap();
        assert!(ledger.is_empty());
    }

    #[test]
    fn test_save_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("downloads.jsonl");

        let mut ledger = Ledger::load(&path).unwrap();
        ledger.upsert(LedgerRow::success("a", 5, "2023.cfa.zst".to_string()));
        ledger.upsert(LedgerRow::failure("b", "connection reset".to_string()));
        ledger.save().unwrap();

        let reloaded = Ledger::load(&path).unwrap();
        assert_eq!(reloaded.len(), 2);
        assert_eq!(reloaded.get("a").unwrap().outcome, Outcome::Success);
        assert_eq!(
            reloaded.get("a").unwrap().archive_path.as_deref(),
            Some("2023.cfa.zst")
        );
        assert_eq!(reloaded.get("b").unwrap().outcome, Outcome::Failure);
        assert!(reloaded.get("b").unwrap().error_message.is_some());
    }

    #[test]
    fn test_save_sorted_by_timestamp() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("downloads.jsonl");

        let mut ledger = Ledger::load(&path).unwrap();
        let mut old = LedgerRow::success("late", 1, "2023.cfa.zst".to_string());
        old.timestamp = Utc::now() + chrono::Duration::seconds(60);
        ledger.upsert(old);
        ledger.upsert(LedgerRow::success("early", 1, "2023.cfa.zst".to_string()));
        ledger.save().unwrap();

        let data = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = data.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains("\"early\""));
        assert!(lines[1].contains("\"late\""));
    }

    #[test]
    fn test_failed_save_preserves_existing_ledger() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("downloads.jsonl");

        let mut ledger = Ledger::load(&path).unwrap();
        ledger.upsert(LedgerRow::success("a", 5, "2023.cfa.zst".to_string()));
        ledger.save().unwrap();

        // Squat a directory on the temp path so the rewrite cannot land
        let temp_path = path.with_extension("jsonl.tmp");
        std::fs::create_dir(&temp_path).unwrap();

        ledger.upsert(LedgerRow::failure("b", "timeout".to_string()));
        assert!(ledger.save().is_err());

        // The on-disk ledger still holds only the pre-save rows
        let reloaded = Ledger::load(&path).unwrap();
        assert_eq!(reloaded.len(), 1);
        assert!(reloaded.get("a").is_some());

        std::fs::remove_dir(&temp_path).unwrap();
        ledger.save().unwrap();
        assert_eq!(Ledger::load(&path).unwrap().len(), 2);
    }

    #[test]
    fn test_upsert_replaces_failure_with_success() {
        let dir = tempfile::tempdir().unwrap();
        let mut ledger = Ledger::load(dir.path().join("downloads.jsonl")).unwrap();

        ledger.upsert(LedgerRow::failure("a", "timeout".to_string()));
        assert!(ledger.succeeded_keys().is_empty());

        ledger.upsert(LedgerRow::success("a", 10, "2023.cfa.zst".to_string()));
        assert_eq!(ledger.len(), 1);
        assert!(ledger.succeeded_keys().contains("a"));
    }

    #[test]
    fn test_invalid_row_rejected_on_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("downloads.jsonl");
        // Success row without an archive_path violates the row invariant
        std::fs::write(
            &path,
            "{\"key\":\"a\",\"outcome\":\"success\",\"blob_size\":1,\"archive_path\":null,\"error_message\":null,\"timestamp\":\"2024-01-01T00:00:00Z\"}\n",
        )
        .unwrap();

        assert!(Ledger::load(&path).is_err());
    }

    #[test]
    fn test_row_validate() {
        assert!(LedgerRow::success("a", 1, "x.cfa.zst".to_string())
            .validate()
            .is_ok());
        assert!(LedgerRow::failure("a", "boom".to_string()).validate().is_ok());

        let mut bad = LedgerRow::failure("a", "boom".to_string());
        bad.archive_path = Some("x.cfa.zst".to_string());
        assert!(bad.validate().is_err());
    }
}
