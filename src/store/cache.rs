use std::collections::HashSet;
use std::fs;
use std::io::ErrorKind;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use anyhow::{Context, Result, anyhow};
use parking_lot::Mutex;
use tokio::fs as async_fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::RwLock;
use tokio::task;
use tracing::{trace, warn};

use crate::message::{Request, Response};

use super::disk::DiskLayout;
use super::entry::{CacheEntry, PersistedEntry};
use super::index::CacheIndex;
use super::key::CacheKey;
use super::writer::CacheWriter;
use super::{PutOutcome, StoreLimits};

/// One named store. Cloning shares the same index and directory.
#[derive(Clone, Debug)]
pub struct CacheStore {
    state: Arc<CacheState>,
}

#[derive(Debug)]
pub(super) struct CacheState {
    pub(super) name: String,
    pub(super) layout: DiskLayout,
    index: Mutex<CacheIndex>,
    pub(super) commit: RwLock<()>,
    pub(super) closed: AtomicBool,
    pub(super) max_entry_size: u64,
    pub(super) max_bytes: u64,
    next_id: AtomicU64,
}

impl CacheStore {
    /// Opens the store rooted at `dir`, creating it when missing and
    /// restoring every intact entry already on disk.
    pub(super) async fn open(name: String, dir: PathBuf, limits: StoreLimits) -> Result<Self> {
        async_fs::create_dir_all(&dir)
            .await
            .with_context(|| format!("failed to create cache store {}", dir.display()))?;

        let capacity = NonZeroUsize::new(limits.max_entries)
            .ok_or_else(|| anyhow!("cache capacity must be greater than zero"))?;
        let state = Arc::new(CacheState {
            name,
            layout: DiskLayout::new(dir),
            index: Mutex::new(CacheIndex::new(capacity, limits.max_bytes)),
            commit: RwLock::new(()),
            closed: AtomicBool::new(false),
            max_entry_size: limits.max_entry_size,
            max_bytes: limits.max_bytes,
            next_id: AtomicU64::new(1),
        });

        let rebuild = {
            let state = state.clone();
            task::spawn_blocking(move || state.rebuild_from_disk())
        };
        rebuild
            .await
            .map_err(|err| anyhow!("cache rebuild task failed: {err}"))??;

        Ok(Self { state })
    }

    pub fn name(&self) -> &str {
        &self.state.name
    }

    pub fn dir(&self) -> &Path {
        self.state.layout.dir()
    }

    pub fn len(&self) -> usize {
        self.state.index.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn bytes_in_use(&self) -> u64 {
        self.state.index.lock().bytes_in_use()
    }

    /// Key strings (`METHOD::uri`) of the stored entries, most recently used
    /// first.
    pub fn keys(&self) -> Vec<String> {
        self.state.index.lock().keys()
    }

    pub fn is_closed(&self) -> bool {
        self.state.closed.load(Ordering::Acquire)
    }

    /// Returns the stored response for the request's method and URL. A body
    /// that vanished or no longer matches its metadata counts as a miss and
    /// drops the entry.
    pub async fn match_request(&self, request: &Request) -> Result<Option<Response>> {
        let cache_key = CacheKey::for_request(request);
        let _commit = self.state.commit.read().await;
        if self.is_closed() {
            return Ok(None);
        }

        let entry = {
            let mut guard = self.state.index.lock();
            guard.get(cache_key.key_base())
        };
        let Some(entry) = entry else {
            return Ok(None);
        };

        let body_path = self.state.layout.body_path(&entry.entry_id);
        let body = match async_fs::read(&body_path).await {
            Ok(body) => body,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                warn!(path = %body_path.display(), "cache body missing on disk");
                self.state.drop_entry(cache_key.key_base(), &entry).await;
                return Ok(None);
            }
            Err(err) => {
                return Err(err)
                    .with_context(|| format!("failed to read cache body {}", body_path.display()));
            }
        };
        if body.len() as u64 != entry.content_length {
            warn!(
                path = %body_path.display(),
                expected = entry.content_length,
                actual = body.len(),
                "cache body length mismatch"
            );
            self.state.drop_entry(cache_key.key_base(), &entry).await;
            return Ok(None);
        }

        Ok(Some(Response::new(entry.status, entry.headers, body)))
    }

    /// Stores an independent copy of `response` under the request's identity,
    /// replacing any previous entry. Nothing is written when the body exceeds
    /// the entry limit or the store has been deleted.
    pub async fn put(&self, request: &Request, response: &Response) -> Result<PutOutcome> {
        if self.is_closed() {
            return Ok(PutOutcome::Closed);
        }
        let key = CacheKey::for_request(request);
        let mut writer = CacheWriter::create(self.state.clone(), key).await?;
        writer.write_all(&response.body).await?;
        let outcome = writer
            .finish(response.status, response.headers.clone())
            .await?;
        if outcome == PutOutcome::Stored {
            crate::metrics::record_cache_store();
        }
        Ok(outcome)
    }

    /// Removes the entry for the request's identity. Returns whether one existed.
    pub async fn delete(&self, request: &Request) -> bool {
        let key = CacheKey::for_request(request);
        let _commit = self.state.commit.write().await;
        let removed = self.state.index.lock().remove_by_key(key.key_base());
        match removed {
            Some(entry) => {
                self.state
                    .layout
                    .remove_entry_files_async(&entry.entry_id)
                    .await;
                true
            }
            None => false,
        }
    }

    /// Stops serving and accepting entries. Called right before the store's
    /// directory is moved out of the way.
    pub(super) async fn close(&self) {
        let _commit = self.state.commit.write().await;
        self.state.closed.store(true, Ordering::Release);
        self.state.index.lock().reset();
    }
}

impl CacheState {
    pub(super) fn next_entry_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    pub(super) fn remove_entry_by_key_base(&self, key_base: &str) {
        let mut guard = self.index.lock();
        guard.remove_by_key(key_base);
    }

    pub(super) fn insert_entry(&self, key_base: String, entry: CacheEntry) -> Vec<CacheEntry> {
        let mut guard = self.index.lock();
        guard.insert(key_base, entry)
    }

    async fn drop_entry(&self, key_base: &str, entry: &CacheEntry) {
        let removed = self.index.lock().remove_if_id_matches(key_base, entry.id);
        if removed.is_some() {
            self.layout.remove_entry_files_async(&entry.entry_id).await;
        }
    }

    pub(super) async fn remove_evicted_files_async(&self, evicted: Vec<CacheEntry>) {
        for evicted_entry in evicted {
            crate::metrics::record_cache_eviction();
            trace!(store = %self.name, entry = %evicted_entry.entry_id, "removing evicted cache entry");
            self.layout
                .remove_entry_files_async(&evicted_entry.entry_id)
                .await;
        }
    }

    fn rebuild_from_disk(&self) -> Result<()> {
        self.layout.remove_temp_files()?;
        self.index.lock().reset();

        let dir = self.layout.dir();
        if !dir.exists() {
            return Ok(());
        }

        for shard1 in fs::read_dir(dir)? {
            let shard1 = shard1?;
            if !shard1.file_type()?.is_dir() {
                continue;
            }
            for shard2 in fs::read_dir(shard1.path())? {
                let shard2 = shard2?;
                if !shard2.file_type()?.is_dir() {
                    continue;
                }
                let mut meta_files = Vec::new();
                let mut other_files = Vec::new();
                for entry in fs::read_dir(shard2.path())? {
                    let entry = entry?;
                    let path = entry.path();
                    if entry.file_type()?.is_file() {
                        if DiskLayout::is_meta(&path) {
                            meta_files.push(path);
                        } else {
                            other_files.push(path);
                        }
                    }
                }

                let mut live = HashSet::new();
                for meta in meta_files {
                    if let Some(entry_id) = self.restore_entry_from_meta(&meta) {
                        live.insert(entry_id);
                    }
                }

                for path in other_files {
                    let keep = path
                        .file_name()
                        .and_then(|n| n.to_str())
                        .map(|n| live.contains(n))
                        .unwrap_or(false);
                    if !keep {
                        fs::remove_file(&path).ok();
                    }
                }

                if fs::read_dir(shard2.path())?.next().is_none() {
                    fs::remove_dir_all(shard2.path()).ok();
                }
            }
            if fs::read_dir(shard1.path())?.next().is_none() {
                fs::remove_dir_all(shard1.path()).ok();
            }
        }
        Ok(())
    }

    fn restore_entry_from_meta(&self, meta_path: &Path) -> Option<String> {
        let data = match fs::read(meta_path) {
            Ok(bytes) => bytes,
            Err(err) => {
                warn!(path = %meta_path.display(), error = %err, "failed to read cache metadata");
                return None;
            }
        };

        let persisted: PersistedEntry = match serde_json::from_slice(&data) {
            Ok(value) => value,
            Err(err) => {
                warn!(path = %meta_path.display(), error = %err, "failed to parse cache metadata");
                self.layout.remove_entry_files_from_meta(meta_path);
                return None;
            }
        };

        let key = CacheKey::from_key_base(persisted.key_base.clone());
        let entry_id = key.entry_id();
        let file_stem = meta_path.file_stem().and_then(|s| s.to_str()).unwrap_or("");
        if entry_id != file_stem {
            warn!(
                expected = entry_id,
                actual = file_stem,
                "cache metadata key mismatch; removing entry"
            );
            self.layout.remove_entry_files_from_meta(meta_path);
            return None;
        }

        if !valid_content_hash(&persisted.content_hash) {
            warn!(path = %meta_path.display(), "cache metadata has invalid content hash; removing entry");
            self.layout.remove_entry_files_from_meta(meta_path);
            return None;
        }

        let body_path = self.layout.body_path(entry_id);
        if !body_path.exists() {
            self.layout.remove_entry_files_from_meta(meta_path);
            return None;
        }

        if !self
            .layout
            .content_hash_matches(&body_path, &persisted.content_hash)
        {
            warn!(path = %body_path.display(), "cache content hash mismatch; removing entry");
            self.layout.remove_entry_files_from_meta(meta_path);
            return None;
        }

        if persisted.content_length > self.max_entry_size || persisted.content_length > self.max_bytes
        {
            self.layout.remove_entry_files_from_meta(meta_path);
            return None;
        }

        let entry = CacheEntry::from_persisted(&persisted, entry_id, self.next_entry_id());
        let evicted = self.insert_entry(key.key_base().to_string(), entry);
        for evicted_entry in evicted {
            crate::metrics::record_cache_eviction();
            self.layout
                .remove_entry_files_from_meta(&self.layout.meta_path(&evicted_entry.entry_id));
        }
        Some(entry_id.to_string())
    }
}

fn valid_content_hash(value: &str) -> bool {
    value.len() == 64 && value.as_bytes().iter().all(|b| b.is_ascii_hexdigit())
}
