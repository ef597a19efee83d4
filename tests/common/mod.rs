use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::Path;
use tempfile::TempDir;

use cfarchive::constants;
use cfarchive::fetch::{FetchConfig, FetchManager, Fetcher};
use cfarchive::worklist::WorklistItem;

pub fn setup_temp_dir() -> Result<TempDir> {
    tempfile::tempdir().map_err(anyhow::Error::from)
}

/// Canned fetcher: URLs map to fixed bodies, everything else fails
pub struct MockFetcher {
    responses: HashMap<String, Vec<u8>>,
}

impl MockFetcher {
    pub fn new() -> Self {
        Self {
            responses: HashMap::new(),
        }
    }

    pub fn with(mut self, url: &str, body: &[u8]) -> Self {
        self.responses.insert(url.to_string(), body.to_vec());
        self
    }
}

#[async_trait]
impl Fetcher for MockFetcher {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>> {
        match self.responses.get(url) {
            Some(body) => Ok(body.clone()),
            None => anyhow::bail!("mock: no response for {}", url),
        }
    }
}

pub fn item(key: &str, url: &str, partition: &str) -> WorklistItem {
    WorklistItem {
        key: key.to_string(),
        url: url.to_string(),
        partition: partition.to_string(),
    }
}

#[allow(dead_code)]
pub fn setup_manager(
    root: &Path,
    fetcher: MockFetcher,
    checkpoint_interval: usize,
) -> Result<FetchManager> {
    FetchManager::new(
        root,
        root.join(constants::DEFAULT_LEDGER_FILENAME),
        Box::new(fetcher),
        FetchConfig {
            checkpoint_interval,
        },
    )
}
