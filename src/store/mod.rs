//! Named, disk-backed response stores.
//!
//! `CacheStorage` owns a root directory with one sub-directory per named
//! store. Only one store is current at a time; the gateway opens it by name
//! and deletes every other one on activation. Deleting a store renames its
//! directory to a tombstone first, so it stops being enumerable at once, and
//! removes the files in the background.

use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use parking_lot::Mutex;
use thiserror::Error;
use tokio::fs as async_fs;
use tracing::{debug, info, warn};

mod cache;
mod disk;
mod entry;
mod index;
mod key;
mod writer;

pub use cache::CacheStore;

const TOMBSTONE_PREFIX: &str = ".tombstone-";
const MAX_STORE_NAME_LEN: usize = 128;

/// Result of a store write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PutOutcome {
    Stored,
    /// The body exceeded the per-entry or total byte limit.
    TooLarge,
    /// The store was deleted while the write was in flight.
    Closed,
}

impl PutOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            PutOutcome::Stored => "stored",
            PutOutcome::TooLarge => "too_large",
            PutOutcome::Closed => "closed",
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct StoreLimits {
    pub max_entries: usize,
    pub max_entry_size: u64,
    pub max_bytes: u64,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum StoreNameError {
    #[error("cache store name must not be empty")]
    Empty,
    #[error("cache store name is longer than {MAX_STORE_NAME_LEN} bytes")]
    TooLong,
    #[error("cache store name '{0}' may only contain ASCII letters, digits, '.', '-' and '_'")]
    InvalidCharacter(String),
    #[error("cache store name '{0}' must not start with '.'")]
    Hidden(String),
}

/// Checks that a store name can be used as a directory name as-is.
pub fn validate_store_name(name: &str) -> Result<(), StoreNameError> {
    if name.is_empty() {
        return Err(StoreNameError::Empty);
    }
    if name.len() > MAX_STORE_NAME_LEN {
        return Err(StoreNameError::TooLong);
    }
    if name.starts_with('.') {
        return Err(StoreNameError::Hidden(name.to_string()));
    }
    if !name
        .bytes()
        .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'.' | b'-' | b'_'))
    {
        return Err(StoreNameError::InvalidCharacter(name.to_string()));
    }
    Ok(())
}

#[derive(Clone)]
pub struct CacheStorage {
    inner: Arc<StorageInner>,
}

struct StorageInner {
    root: PathBuf,
    limits: StoreLimits,
    open: Mutex<HashMap<String, CacheStore>>,
}

impl CacheStorage {
    /// Creates the root directory if needed and schedules removal of
    /// tombstones left behind by an earlier run.
    pub async fn new(root: PathBuf, limits: StoreLimits) -> Result<Self> {
        async_fs::create_dir_all(&root)
            .await
            .with_context(|| format!("failed to create cache root {}", root.display()))?;

        let leftovers = find_tombstones(&root).await?;
        spawn_dir_cleanup(leftovers);

        Ok(Self {
            inner: Arc::new(StorageInner {
                root,
                limits,
                open: Mutex::new(HashMap::new()),
            }),
        })
    }

    pub fn root(&self) -> &Path {
        &self.inner.root
    }

    /// Opens the named store, creating it on first use. Repeated opens share
    /// one handle.
    pub async fn open(&self, name: &str) -> Result<CacheStore> {
        validate_store_name(name)?;
        if let Some(store) = self.inner.open.lock().get(name) {
            return Ok(store.clone());
        }

        let store = CacheStore::open(
            name.to_string(),
            self.inner.root.join(name),
            self.inner.limits,
        )
        .await?;
        debug!(store = name, entries = store.len(), "opened cache store");

        // Another task may have opened the same store meanwhile; keep the first.
        let mut open = self.inner.open.lock();
        let store = open.entry(name.to_string()).or_insert(store).clone();
        Ok(store)
    }

    pub async fn has(&self, name: &str) -> Result<bool> {
        if validate_store_name(name).is_err() {
            return Ok(false);
        }
        match async_fs::metadata(self.inner.root.join(name)).await {
            Ok(meta) => Ok(meta.is_dir()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(false),
            Err(err) => Err(err.into()),
        }
    }

    /// Names of every store present on disk, sorted.
    pub async fn keys(&self) -> Result<Vec<String>> {
        let mut names = Vec::new();
        let mut entries = async_fs::read_dir(&self.inner.root)
            .await
            .with_context(|| format!("failed to list cache root {}", self.inner.root.display()))?;
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_dir() {
                continue;
            }
            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            if validate_store_name(&name).is_ok() {
                names.push(name);
            }
        }
        names.sort();
        Ok(names)
    }

    /// Deletes the named store. Returns false when it did not exist.
    pub async fn delete(&self, name: &str) -> Result<bool> {
        if validate_store_name(name).is_err() {
            return Ok(false);
        }
        let handle = self.inner.open.lock().remove(name);
        if let Some(store) = handle {
            store.close().await;
        }

        let dir = self.inner.root.join(name);
        let tombstone = self
            .inner
            .root
            .join(format!("{TOMBSTONE_PREFIX}{name}-{}", uuid::Uuid::new_v4().simple()));
        match async_fs::rename(&dir, &tombstone).await {
            Ok(()) => {}
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(false),
            Err(err) => {
                return Err(err)
                    .with_context(|| format!("failed to tombstone cache store {}", dir.display()));
            }
        }
        info!(store = name, "deleted cache store");
        crate::metrics::record_store_deleted();
        spawn_dir_cleanup(vec![tombstone]);
        Ok(true)
    }
}

async fn find_tombstones(root: &Path) -> Result<Vec<PathBuf>> {
    let mut found = Vec::new();
    let mut entries = async_fs::read_dir(root).await?;
    while let Some(entry) = entries.next_entry().await? {
        if entry.file_type().await?.is_dir()
            && entry
                .file_name()
                .to_str()
                .map(|name| name.starts_with(TOMBSTONE_PREFIX))
                .unwrap_or(false)
        {
            found.push(entry.path());
        }
    }
    Ok(found)
}

fn spawn_dir_cleanup(dirs: Vec<PathBuf>) {
    for dir in dirs {
        tokio::spawn(async move {
            match async_fs::remove_dir_all(&dir).await {
                Ok(()) => debug!(path = %dir.display(), "removed deleted cache store"),
                Err(err) if err.kind() == ErrorKind::NotFound => {}
                Err(err) => {
                    warn!(
                        error = %err,
                        path = %dir.display(),
                        "failed to remove deleted cache store"
                    );
                }
            }
        });
    }
}
