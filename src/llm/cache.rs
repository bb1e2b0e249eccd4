//! Content-addressed response cache.
//!
//! Keys are SHA-256 digests of the canonical JSON of the provider name plus the
//! full [`CallRequest`]. Streaming is not part of the key: a streamed call may be
//! answered from a complete entry, but a non-streamed call never reads a stream
//! entry (see `Session::lookup`).

use super::{CallRequest, Completion};
use crate::error::{Result, WeaveError};
use crate::fs::atomic_write;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CacheEntry {
    Complete { completion: Completion },
    Stream { chunks: Vec<Completion> },
}

/// Storage backend for cached responses. Shared across runs and threads.
pub trait CacheStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<CacheEntry>>;
    fn put(&self, key: &str, entry: &CacheEntry) -> Result<()>;
    fn len(&self) -> Result<usize>;
    /// Remove every entry, returning how many were removed.
    fn clear(&self) -> Result<usize>;

    fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }
}

/// Compute the cache key for a request against a named provider.
pub fn cache_key(provider: &str, request: &CallRequest) -> Result<String> {
    let canonical = serde_json::to_vec(&serde_json::json!({
        "provider": provider,
        "request": request,
    }))
    .map_err(|e| WeaveError::Cache(format!("failed to serialize cache key: {}", e)))?;
    Ok(hex::encode(Sha256::digest(&canonical)))
}

#[derive(Debug, Default)]
pub struct MemoryCache {
    entries: Mutex<HashMap<String, CacheEntry>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CacheStore for MemoryCache {
    fn get(&self, key: &str) -> Result<Option<CacheEntry>> {
        let entries = self.entries.lock().unwrap_or_else(|p| p.into_inner());
        Ok(entries.get(key).cloned())
    }

    fn put(&self, key: &str, entry: &CacheEntry) -> Result<()> {
        let mut entries = self.entries.lock().unwrap_or_else(|p| p.into_inner());
        entries.insert(key.to_string(), entry.clone());
        Ok(())
    }

    fn len(&self) -> Result<usize> {
        Ok(self.entries.lock().unwrap_or_else(|p| p.into_inner()).len())
    }

    fn clear(&self) -> Result<usize> {
        let mut entries = self.entries.lock().unwrap_or_else(|p| p.into_inner());
        let removed = entries.len();
        entries.clear();
        Ok(removed)
    }
}

/// One `<key>.json` file per entry under a directory.
#[derive(Debug, Clone)]
pub struct DiskCache {
    dir: PathBuf,
}

impl DiskCache {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn entry_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.json", key))
    }

    fn entry_files(&self) -> Result<Vec<PathBuf>> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }
        let read_dir = fs::read_dir(&self.dir).map_err(|e| {
            WeaveError::Cache(format!(
                "failed to list cache directory '{}': {}",
                self.dir.display(),
                e
            ))
        })?;

        let mut files = Vec::new();
        for entry in read_dir {
            let path = entry
                .map_err(|e| WeaveError::Cache(format!("failed to read cache directory: {}", e)))?
                .path();
            let is_entry = path.extension().is_some_and(|ext| ext == "json")
                && path
                    .file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| !n.starts_with('.'));
            if is_entry {
                files.push(path);
            }
        }
        Ok(files)
    }
}

impl CacheStore for DiskCache {
    fn get(&self, key: &str) -> Result<Option<CacheEntry>> {
        let path = self.entry_path(key);
        if !path.exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(&path).map_err(|e| {
            WeaveError::Cache(format!("failed to read '{}': {}", path.display(), e))
        })?;
        let entry = serde_json::from_str(&content).map_err(|e| {
            WeaveError::Cache(format!("corrupt cache entry '{}': {}", path.display(), e))
        })?;
        Ok(Some(entry))
    }

    fn put(&self, key: &str, entry: &CacheEntry) -> Result<()> {
        let content = serde_json::to_vec(entry)
            .map_err(|e| WeaveError::Cache(format!("failed to serialize cache entry: {}", e)))?;
        atomic_write(self.entry_path(key), &content)
    }

    fn len(&self) -> Result<usize> {
        Ok(self.entry_files()?.len())
    }

    fn clear(&self) -> Result<usize> {
        let files = self.entry_files()?;
        for path in &files {
            fs::remove_file(path).map_err(|e| {
                WeaveError::Cache(format!("failed to remove '{}': {}", path.display(), e))
            })?;
        }
        Ok(files.len())
    }
}
