// src/archive.rs
//! Keyed blob archive: a single file holding a closed key→blob mapping.
//!
//! An archive handle is exclusively in read or write mode. Read mode loads
//! the whole file into memory up front; every `get` afterwards is a pure
//! in-memory lookup. Write mode accumulates mutations in memory and only
//! touches disk on `flush`, which writes to a temp file and renames so a
//! partially written archive never becomes visible at the final path. After
//! a successful flush the handle is inert and all further calls fail.

use crate::archive_format;
use crate::error::{StoreError, StoreResult};
use std::collections::{HashMap, HashSet};
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

/// How `open_write` treats an existing file at the target path.
///
/// The mode is always chosen explicitly by the caller; it is never inferred
/// from file existence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    /// Start empty; fail if the path already exists
    Create,
    /// Start empty; replace any existing file on flush
    Overwrite,
    /// Load the existing file (if any) and continue mutating it in memory
    Update,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Read,
    Write,
}

#[derive(Debug)]
pub struct Archive {
    path: PathBuf,
    mode: Mode,
    active: bool,
    entries: HashMap<String, Vec<u8>>,
    // Insertion order, for inspection; irrelevant for correctness
    order: Vec<String>,
}

impl Archive {
    /// Open an archive for writing.
    pub fn open_write(path: impl Into<PathBuf>, mode: WriteMode) -> StoreResult<Self> {
        let path = path.into();
        let exists = path.exists();

        let (entries, order) = match mode {
            WriteMode::Create if exists => {
                return Err(StoreError::AlreadyExists { path });
            }
            WriteMode::Update if exists => Self::load_entries(&path)?,
            _ => (HashMap::new(), Vec::new()),
        };

        Ok(Self {
            path,
            mode: Mode::Write,
            active: true,
            entries,
            order,
        })
    }

    /// Open an archive read-only, deserializing the whole file immediately.
    pub fn open_read(path: impl Into<PathBuf>) -> StoreResult<Self> {
        let path = path.into();
        if !path.exists() {
            return Err(StoreError::NotFound { path });
        }

        let (entries, order) = Self::load_entries(&path)?;

        Ok(Self {
            path,
            mode: Mode::Read,
            active: true,
            entries,
            order,
        })
    }

    fn load_entries(path: &Path) -> StoreResult<(HashMap<String, Vec<u8>>, Vec<String>)> {
        let file = File::open(path)?;
        let mut reader = BufReader::new(file);
        let (_metadata, raw) =
            archive_format::read_archive(&mut reader).map_err(|e| StoreError::Format {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })?;

        let mut entries = HashMap::with_capacity(raw.len());
        let mut order = Vec::with_capacity(raw.len());
        for (key, blob) in raw {
            if !entries.contains_key(&key) {
                order.push(key.clone());
            }
            entries.insert(key, blob);
        }

        Ok((entries, order))
    }

    /// Add a blob under a key. Write mode only; overwrites silently if the
    /// key is already present (last writer wins).
    pub fn add(&mut self, key: impl Into<String>, blob: Vec<u8>) -> StoreResult<()> {
        self.require_write()?;

        let key = key.into();
        if !self.entries.contains_key(&key) {
            self.order.push(key.clone());
        }
        self.entries.insert(key, blob);
        Ok(())
    }

    /// Remove a key. Write mode only. Returns whether the key was present.
    pub fn remove(&mut self, key: &str) -> StoreResult<bool> {
        self.require_write()?;

        let removed = self.entries.remove(key).is_some();
        if removed {
            self.order.retain(|k| k != key);
        }
        Ok(removed)
    }

    /// Look up a blob. Read mode only.
    pub fn get(&self, key: &str) -> StoreResult<Option<&[u8]>> {
        if !self.active {
            return Err(StoreError::HandleClosed);
        }
        if self.mode != Mode::Read {
            return Err(StoreError::NotReadable {
                path: self.path.clone(),
            });
        }
        Ok(self.entries.get(key).map(|b| b.as_slice()))
    }

    /// Count of keys currently held
    pub fn size(&self) -> usize {
        self.entries.len()
    }

    /// Snapshot of all keys (read mode) or currently-buffered keys (write mode)
    pub fn keys(&self) -> HashSet<String> {
        self.entries.keys().cloned().collect()
    }

    /// Keys in insertion order, for inspection
    pub fn keys_ordered(&self) -> &[String] {
        &self.order
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Serialize, compress and atomically write the archive, then close the
    /// handle. Write mode only. All further `add`/`get`/`flush` calls fail
    /// with `HandleClosed`.
    pub fn flush(&mut self, create_parent_dirs: bool) -> StoreResult<()> {
        self.require_write()?;

        if create_parent_dirs {
            if let Some(parent) = self.path.parent() {
                if !parent.as_os_str().is_empty() && !parent.exists() {
                    std::fs::create_dir_all(parent).map_err(|e| StoreError::Durability {
                        path: self.path.clone(),
                        source: e,
                    })?;
                }
            }
        }

        // Write-to-temp-then-rename: a flush is atomic or it didn't happen
        let temp_path = self.path.with_extension("zst.tmp");
        let result = self.write_to(&temp_path).and_then(|_| {
            std::fs::rename(&temp_path, &self.path).map_err(|e| StoreError::Durability {
                path: self.path.clone(),
                source: e,
            })
        });

        if result.is_err() {
            let _ = std::fs::remove_file(&temp_path);
            return result;
        }

        self.active = false;
        self.entries.clear();
        self.order.clear();
        Ok(())
    }

    fn write_to(&self, temp_path: &Path) -> StoreResult<()> {
        let durability = |e: std::io::Error| StoreError::Durability {
            path: self.path.clone(),
            source: e,
        };

        let file = File::create(temp_path).map_err(durability)?;
        let mut writer = BufWriter::new(file);

        let entry_refs: Vec<(&str, &[u8])> = self
            .order
            .iter()
            .filter_map(|k| self.entries.get(k).map(|b| (k.as_str(), b.as_slice())))
            .collect();

        archive_format::write_archive(&mut writer, &entry_refs).map_err(|e| {
            match e.downcast::<std::io::Error>() {
                Ok(io) => StoreError::Durability {
                    path: self.path.clone(),
                    source: io,
                },
                Err(other) => StoreError::Format {
                    path: self.path.clone(),
                    reason: other.to_string(),
                },
            }
        })?;

        let file = writer.into_inner().map_err(|e| durability(e.into_error()))?;
        file.sync_all().map_err(durability)?;
        Ok(())
    }

    fn require_write(&self) -> StoreResult<()> {
        if !self.active {
            return Err(StoreError::HandleClosed);
        }
        if self.mode != Mode::Write {
            return Err(StoreError::NotWritable {
                path: self.path.clone(),
            });
        }
        Ok(())
    }
}
