//! Persistent store for generation step results.
//!
//! The store is an explicit object with a defined lifecycle: opened when a
//! build starts, written through after each successful generation, and
//! flushed when the build ends. Tests use [`MemoryCacheStore`].

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, RwLock};
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::builder::error::BuildError;
use crate::util::fs::write_atomic;

const INDEX_VERSION: u32 = 1;

/// Recorded state of one generation step after its last successful run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Generation step identity
    pub identity: String,
    /// Hash of the resolved program and arguments
    pub command_hash: String,
    /// Content hash of every declared input; `None` if it was absent
    pub inputs: BTreeMap<PathBuf, Option<String>>,
    /// Declared outputs, absolute
    pub outputs: Vec<PathBuf>,
    /// Seconds since the Unix epoch when the entry was recorded
    pub recorded_at: u64,
}

impl CacheEntry {
    /// Current time for `recorded_at`.
    pub fn now() -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0)
    }
}

/// Storage for [`CacheEntry`] values keyed by step identity.
pub trait CacheStore: Send + Sync {
    /// Look up the entry for a step.
    fn get(&self, identity: &str) -> Option<CacheEntry>;

    /// Record a successful run, replacing any previous entry.
    fn put(&self, entry: CacheEntry) -> Result<(), BuildError>;

    /// Persist everything recorded so far.
    fn flush(&self) -> Result<(), BuildError>;
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct IndexFile {
    version: u32,
    entries: BTreeMap<String, CacheEntry>,
}

/// Cache store backed by a JSON index file in the build directory.
///
/// Every `put` is written through atomically, so an interrupted build
/// keeps every generation that completed.
#[derive(Debug)]
pub struct JsonCacheStore {
    path: PathBuf,
    entries: RwLock<BTreeMap<String, CacheEntry>>,
    write_lock: Mutex<()>,
}

impl JsonCacheStore {
    /// Open the index at `path`.
    ///
    /// A missing index is empty. An unreadable or incompatible one is
    /// discarded with a warning; the affected steps simply rerun.
    pub fn open(path: &Path) -> Result<Self> {
        let entries = if path.exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read cache index: {}", path.display()))?;
            match serde_json::from_str::<IndexFile>(&content) {
                Ok(index) if index.version == INDEX_VERSION => index.entries,
                Ok(index) => {
                    tracing::warn!(
                        "discarding cache index {} with version {}",
                        path.display(),
                        index.version
                    );
                    BTreeMap::new()
                }
                Err(e) => {
                    tracing::warn!("discarding corrupt cache index {}: {}", path.display(), e);
                    BTreeMap::new()
                }
            }
        } else {
            BTreeMap::new()
        };

        tracing::debug!(
            "Opened cache index {} with {} entries",
            path.display(),
            entries.len()
        );

        Ok(JsonCacheStore {
            path: path.to_path_buf(),
            entries: RwLock::new(entries),
            write_lock: Mutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> usize {
        self.entries.read().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl CacheStore for JsonCacheStore {
    fn get(&self, identity: &str) -> Option<CacheEntry> {
        self.entries.read().ok()?.get(identity).cloned()
    }

    fn put(&self, entry: CacheEntry) -> Result<(), BuildError> {
        {
            let mut entries = self
                .entries
                .write()
                .map_err(|_| BuildError::io("cache index lock poisoned"))?;
            entries.insert(entry.identity.clone(), entry);
        }
        self.flush()
    }

    fn flush(&self) -> Result<(), BuildError> {
        // One writer at a time; each write is a complete snapshot.
        let _guard = self
            .write_lock
            .lock()
            .map_err(|_| BuildError::io("cache index lock poisoned"))?;

        let content = {
            let entries = self
                .entries
                .read()
                .map_err(|_| BuildError::io("cache index lock poisoned"))?;
            let index = IndexFile {
                version: INDEX_VERSION,
                entries: entries.clone(),
            };
            serde_json::to_string_pretty(&index)
                .map_err(|e| BuildError::io(format!("failed to serialize cache index: {}", e)))?
        };

        write_atomic(&self.path, content.as_bytes())?;
        Ok(())
    }
}

/// In-memory cache store.
#[derive(Debug, Default)]
pub struct MemoryCacheStore {
    entries: Mutex<BTreeMap<String, CacheEntry>>,
}

impl MemoryCacheStore {
    pub fn new() -> Self {
        MemoryCacheStore::default()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl CacheStore for MemoryCacheStore {
    fn get(&self, identity: &str) -> Option<CacheEntry> {
        self.entries.lock().ok()?.get(identity).cloned()
    }

    fn put(&self, entry: CacheEntry) -> Result<(), BuildError> {
        self.entries
            .lock()
            .map_err(|_| BuildError::io("cache lock poisoned"))?
            .insert(entry.identity.clone(), entry);
        Ok(())
    }

    fn flush(&self) -> Result<(), BuildError> {
        Ok(())
    }
}
