//! Resumable bulk-fetch campaigns.
//!
//! The manager walks a worklist, skipping keys the ledger already marks as
//! succeeded, fetches each remaining item, and appends the blob to the
//! archive for the item's partition. Open archives and the ledger are flushed
//! together every `checkpoint_interval` successes, so a crash loses at most
//! one checkpoint's worth of work and a rerun resumes from the ledger.
//!
//! Item-level fetch failures are recorded as failed ledger rows and never
//! abort the run; storage failures (a flush or an archive append going wrong)
//! are fatal, because continuing past them would desynchronize the ledger
//! from the archives.

use crate::archive::{Archive, WriteMode};
use crate::constants;
use crate::ledger::{Ledger, LedgerRow, Outcome};
use crate::worklist::WorklistItem;
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::path::PathBuf;

/// Source of blob bytes for a campaign. The production implementation is
/// the rate-limited HTTP client; tests substitute a canned one.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>>;
}

#[derive(Debug, Clone)]
pub struct FetchConfig {
    pub checkpoint_interval: usize,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            checkpoint_interval: constants::DEFAULT_CHECKPOINT_INTERVAL,
        }
    }
}

/// What a single `run` did
#[derive(Debug, Clone, Default)]
pub struct CampaignReport {
    pub attempted: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub ledger_rows: usize,
}

type ProgressFn = Box<dyn Fn(usize, &CampaignReport) + Send + Sync>;

pub struct FetchManager {
    root: PathBuf,
    ledger: Ledger,
    fetcher: Box<dyn Fetcher>,
    checkpoint_interval: usize,
    // Write-mode archives opened lazily per partition, drained on flush
    open_archives: HashMap<String, Archive>,
    progress: Option<ProgressFn>,
}

impl FetchManager {
    pub fn new(
        root: impl Into<PathBuf>,
        ledger_path: impl Into<PathBuf>,
        fetcher: Box<dyn Fetcher>,
        config: FetchConfig,
    ) -> Result<Self> {
        let root = root.into();
        let ledger = Ledger::load(ledger_path)?;
        log::info!(
            "loaded ledger with {} rows ({} succeeded)",
            ledger.len(),
            ledger.succeeded_keys().len()
        );

        Ok(Self {
            root,
            ledger,
            fetcher,
            checkpoint_interval: config.checkpoint_interval.max(1),
            open_archives: HashMap::new(),
            progress: None,
        })
    }

    /// Install a progress callback invoked after every attempted item with
    /// (total planned, report so far)
    pub fn set_progress(&mut self, progress: ProgressFn) {
        self.progress = Some(progress);
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    /// Set difference driving resume: candidates minus keys the ledger
    /// already marks succeeded. Failed keys stay in, so they are retried.
    pub fn what_to_fetch<'a>(&self, candidates: &'a [WorklistItem]) -> Vec<&'a WorklistItem> {
        let done = self.ledger.succeeded_keys();
        candidates
            .iter()
            .filter(|item| !done.contains(item.key.as_str()))
            .collect()
    }

    /// Run the campaign over `candidates`, attempting at most `max_items`
    /// of the still-outstanding ones.
    pub async fn run(
        &mut self,
        candidates: &[WorklistItem],
        max_items: usize,
    ) -> Result<CampaignReport> {
        let to_fetch = self.what_to_fetch(candidates);
        let planned = to_fetch.len().min(max_items);
        log::info!(
            "{} candidates, {} outstanding, attempting up to {}",
            candidates.len(),
            to_fetch.len(),
            max_items
        );

        let mut report = CampaignReport::default();

        for item in to_fetch.into_iter().take(max_items) {
            report.attempted += 1;
            let row = self.fetch_one(item).await?;
            let succeeded = row.outcome == Outcome::Success;
            if succeeded {
                report.succeeded += 1;
            } else {
                report.failed += 1;
            }
            self.ledger.upsert(row);
            report.ledger_rows = self.ledger.len();

            if succeeded && report.succeeded % self.checkpoint_interval == 0 {
                log::debug!("checkpoint after {} successes", report.succeeded);
                self.flush_all()?;
            }

            if let Some(ref progress) = self.progress {
                progress(planned, &report);
            }
        }

        self.flush_all()?;
        report.ledger_rows = self.ledger.len();

        log::info!(
            "campaign done: {} attempted, {} succeeded, {} failed, ledger has {} rows",
            report.attempted,
            report.succeeded,
            report.failed,
            report.ledger_rows
        );

        Ok(report)
    }

    /// Fetch one item and return its ledger row. A failed fetch becomes a
    /// failure row; a storage error is propagated and aborts the campaign.
    async fn fetch_one(&mut self, item: &WorklistItem) -> Result<LedgerRow> {
        let blob = match self.fetcher.fetch(&item.url).await {
            Ok(blob) => blob,
            Err(e) => {
                log::warn!("fetch failed for {}: {:#}", item.key, e);
                return Ok(LedgerRow::failure(&item.key, format!("{:#}", e)));
            }
        };

        let archive = match self.open_archives.entry(item.partition.clone()) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => {
                let path = constants::archive_path(&self.root, &item.partition);
                let archive = Archive::open_write(&path, WriteMode::Update)
                    .with_context(|| format!("opening archive for partition {}", item.partition))?;
                entry.insert(archive)
            }
        };

        let blob_size = blob.len() as u64;
        archive
            .add(&item.key, blob)
            .with_context(|| format!("appending {} to partition {}", item.key, item.partition))?;

        Ok(LedgerRow::success(
            &item.key,
            blob_size,
            constants::archive_filename(&item.partition),
        ))
    }

    /// Flush every open archive and the ledger. Archives deactivate on
    /// flush, so they are drained here and reopened lazily on the next add.
    /// Calling this with nothing open just persists the ledger.
    pub fn flush_all(&mut self) -> Result<()> {
        for (partition, mut archive) in self.open_archives.drain() {
            let entries = archive.size();
            archive
                .flush(true)
                .with_context(|| format!("flushing archive for partition {}", partition))?;
            log::debug!("flushed partition {} ({} entries)", partition, entries);
        }
        self.ledger.save().context("persisting ledger")?;
        Ok(())
    }
}
