//! Worklist: the candidate items a campaign wants fetched.
//!
//! A worklist file is JSON lines, one item per line. Keys must be unique;
//! the partition decides which archive a fetched blob lands in.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorklistItem {
    /// Unique identity of the item across the whole campaign
    pub key: String,

    /// Where to fetch the blob from
    pub url: String,

    /// Archive partition the blob belongs to (e.g. a fiscal year)
    pub partition: String,
}

/// Load a worklist from a JSON-lines file, rejecting duplicate keys
pub fn load_worklist(path: impl AsRef<Path>) -> Result<Vec<WorklistItem>> {
    let path = path.as_ref();
    let data = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read worklist {}", path.display()))?;

    let mut items = Vec::new();
    let mut seen: HashSet<String> = HashSet::new();

    for (lineno, line) in data.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let item: WorklistItem = serde_json::from_str(line)
            .with_context(|| format!("bad worklist item at {}:{}", path.display(), lineno + 1))?;
        if !seen.insert(item.key.clone()) {
            anyhow::bail!(
                "duplicate worklist key '{}' at {}:{}",
                item.key,
                path.display(),
                lineno + 1
            );
        }
        items.push(item);
    }

    Ok(items)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_worklist() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("worklist.jsonl");
        std::fs::write(
            &path,
            concat!(
                "{\"key\":\"a\",\"url\":\"https://x/a\",\"partition\":\"2023\"}\n",
                "\n",
                "{\"key\":\"b\",\"url\":\"https://x/b\",\"partition\":\"2024\"}\n",
            ),
        )
        .unwrap();

        let items = load_worklist(&path).unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].key, "a");
        assert_eq!(items[1].partition, "2024");
    }

    #[test]
    fn test_duplicate_key_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("worklist.jsonl");
        std::fs::write(
            &path,
            concat!(
                "{\"key\":\"a\",\"url\":\"https://x/a\",\"partition\":\"2023\"}\n",
                "{\"key\":\"a\",\"url\":\"https://x/a2\",\"partition\":\"2023\"}\n",
            ),
        )
        .unwrap();

        let err = load_worklist(&path).unwrap_err();
        assert!(err.to_string().contains("duplicate"));
    }
}
