use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::task::{Context as TaskContext, Poll};
use std::time::SystemTime;

use anyhow::{Result, anyhow};
use blake3::Hasher;
use http::{HeaderMap, StatusCode};
use tokio::fs as async_fs;
use tokio::fs::File as AsyncFile;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::{trace, warn};

use super::PutOutcome;
use super::cache::CacheState;
use super::entry::CacheEntry;
use super::key::CacheKey;

/// Streams a body into a temp file while hashing it, then commits the entry
/// with an atomic rename. Dropping an unfinished writer removes the temp file.
pub(super) struct CacheWriter {
    file: AsyncFile,
    hasher: Hasher,
    temp_path: PathBuf,
    state: Arc<CacheState>,
    current_size: u64,
    key: CacheKey,
    oversized: bool,
    finished: bool,
}

impl CacheWriter {
    pub(super) async fn create(state: Arc<CacheState>, key: CacheKey) -> Result<Self> {
        let temp_path = state.layout.temp_path();
        let mut options = async_fs::OpenOptions::new();
        options.create(true).truncate(true).write(true);
        #[cfg(unix)]
        {
            options.mode(0o600);
        }
        let file = options.open(&temp_path).await?;
        Ok(Self {
            file,
            hasher: Hasher::new(),
            temp_path,
            state,
            current_size: 0,
            key,
            oversized: false,
            finished: false,
        })
    }

    pub(super) async fn finish(
        mut self,
        status: StatusCode,
        headers: HeaderMap,
    ) -> Result<PutOutcome> {
        self.file.flush().await?;

        if self.oversized || self.current_size > self.state.max_bytes {
            async_fs::remove_file(&self.temp_path).await.ok();
            self.finished = true;
            return Ok(PutOutcome::TooLarge);
        }

        let content_hash = self.hasher.finalize().to_hex().to_string();
        let entry_id = self.key.entry_id().to_string();
        let final_path = self.state.layout.body_path(&entry_id);
        let shard_dir = final_path
            .parent()
            .map(|path| path.to_path_buf())
            .ok_or_else(|| anyhow!("cache entry path missing parent"))?;

        // Body, metadata and index move together; lookups hold the read side.
        let _commit = self.state.commit.write().await;
        if self.state.closed.load(Ordering::Acquire) {
            async_fs::remove_file(&self.temp_path).await.ok();
            self.finished = true;
            return Ok(PutOutcome::Closed);
        }

        async_fs::create_dir_all(&shard_dir).await?;
        async_fs::rename(&self.temp_path, &final_path).await?;
        self.finished = true;

        let entry = CacheEntry {
            id: self.state.next_entry_id(),
            entry_id,
            status,
            headers,
            stored_at: SystemTime::now(),
            content_hash,
            content_length: self.current_size,
        };

        let persisted = entry.to_persisted(self.key.key_base());
        if let Err(err) = self
            .state
            .layout
            .write_metadata_async(&entry.entry_id, &persisted)
            .await
        {
            warn!(error = %err, key = self.key.key_base(), "failed to write cache metadata");
            self.state.remove_entry_by_key_base(self.key.key_base());
            self.state
                .layout
                .remove_entry_files_async(&entry.entry_id)
                .await;
            return Err(err);
        }

        let evicted = self
            .state
            .insert_entry(self.key.key_base().to_string(), entry);
        trace!(key = self.key.key_base(), "stored cache entry");

        self.state.remove_evicted_files_async(evicted).await;
        Ok(PutOutcome::Stored)
    }
}

impl AsyncWrite for CacheWriter {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut TaskContext<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        if self.oversized {
            return Poll::Ready(Ok(buf.len()));
        }

        // Stop writing once the limit is crossed; finish() drops the temp file.
        if self.current_size + buf.len() as u64 > self.state.max_entry_size {
            self.oversized = true;
            return Poll::Ready(Ok(buf.len()));
        }

        match Pin::new(&mut self.file).poll_write(cx, buf) {
            Poll::Ready(Ok(written)) => {
                if written > 0 {
                    self.hasher.update(&buf[..written]);
                    self.current_size = self.current_size.saturating_add(written as u64);
                }
                Poll::Ready(Ok(written))
            }
            Poll::Ready(Err(err)) => Poll::Ready(Err(err)),
            Poll::Pending => Poll::Pending,
        }
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut TaskContext<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.file).poll_flush(cx)
    }

    fn poll_shutdown(
        mut self: Pin<&mut Self>,
        cx: &mut TaskContext<'_>,
    ) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.file).poll_shutdown(cx)
    }
}

impl Drop for CacheWriter {
    fn drop(&mut self) {
        if self.finished {
            return;
        }

        let temp_path = self.temp_path.clone();
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move {
                let _ = async_fs::remove_file(temp_path).await;
            });
        } else {
            let _ = std::fs::remove_file(&temp_path);
        }
    }
}
