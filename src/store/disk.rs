use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use blake3::Hasher;
use tokio::fs as async_fs;
use tokio::io::AsyncWriteExt;

use super::entry::PersistedEntry;

pub(super) const TEMP_PREFIX: &str = "tmp_";
const META_EXTENSION: &str = "meta";

/// File layout of one named store: `<dir>/ab/cd/<entry_id>` for bodies with a
/// `.meta` sibling, and `tmp_*` files at the top level while writes are in
/// flight.
#[derive(Debug, Clone)]
pub(super) struct DiskLayout {
    dir: PathBuf,
}

impl DiskLayout {
    pub(super) fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    pub(super) fn dir(&self) -> &Path {
        &self.dir
    }

    pub(super) fn body_path(&self, entry_id: &str) -> PathBuf {
        let (first, remainder) = entry_id.split_at(2);
        let (second, _) = remainder.split_at(2);
        self.dir.join(first).join(second).join(entry_id)
    }

    pub(super) fn meta_path(&self, entry_id: &str) -> PathBuf {
        let mut path = self.body_path(entry_id);
        path.set_extension(META_EXTENSION);
        path
    }

    pub(super) fn temp_path(&self) -> PathBuf {
        self.dir
            .join(format!("{TEMP_PREFIX}{}", uuid::Uuid::new_v4().simple()))
    }

    pub(super) fn is_meta(path: &Path) -> bool {
        path.extension().and_then(|ext| ext.to_str()) == Some(META_EXTENSION)
    }

    pub(super) fn remove_temp_files(&self) -> Result<()> {
        if !self.dir.exists() {
            return Ok(());
        }
        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            let path = entry.path();
            if path.is_file()
                && path
                    .file_name()
                    .and_then(|n| n.to_str())
                    .map(|name| name.starts_with(TEMP_PREFIX))
                    .unwrap_or(false)
            {
                fs::remove_file(&path).ok();
            }
        }
        Ok(())
    }

    pub(super) fn content_hash_matches(&self, path: &Path, expected_hex: &str) -> bool {
        let mut file = match fs::File::open(path) {
            Ok(f) => f,
            Err(_) => return false,
        };
        let mut hasher = Hasher::new();
        let mut buf = [0u8; 8192];
        loop {
            match std::io::Read::read(&mut file, &mut buf) {
                Ok(0) => break,
                Ok(n) => {
                    hasher.update(&buf[..n]);
                }
                Err(_) => return false,
            }
        }
        hasher.finalize().to_hex().to_string() == expected_hex
    }

    pub(super) fn remove_entry_files_from_meta(&self, meta_path: &Path) {
        if let Some(stem) = meta_path.file_stem().and_then(|s| s.to_str())
            && stem.len() >= 4
        {
            fs::remove_file(self.body_path(stem)).ok();
        }
        fs::remove_file(meta_path).ok();
    }

    pub(super) async fn remove_entry_files_async(&self, entry_id: &str) {
        let _ = async_fs::remove_file(self.body_path(entry_id)).await;
        let _ = async_fs::remove_file(self.meta_path(entry_id)).await;
        self.prune_empty_shards(entry_id).await;
    }

    async fn dir_is_empty(path: &Path) -> bool {
        let mut entries = match async_fs::read_dir(path).await {
            Ok(entries) => entries,
            Err(_) => return false,
        };
        matches!(entries.next_entry().await, Ok(None))
    }

    async fn prune_empty_shards(&self, entry_id: &str) {
        let body_path = self.body_path(entry_id);
        let Some(shard2) = body_path.parent().map(Path::to_path_buf) else {
            return;
        };
        if Self::dir_is_empty(&shard2).await {
            let _ = async_fs::remove_dir(&shard2).await;
        }
        let Some(shard1) = shard2.parent().map(Path::to_path_buf) else {
            return;
        };
        if shard1 == self.dir {
            return;
        }
        if Self::dir_is_empty(&shard1).await {
            let _ = async_fs::remove_dir(&shard1).await;
        }
    }

    pub(super) async fn write_metadata_async(
        &self,
        entry_id: &str,
        entry: &PersistedEntry,
    ) -> Result<()> {
        let meta_path = self.meta_path(entry_id);
        if let Some(parent) = meta_path.parent() {
            async_fs::create_dir_all(parent)
                .await
                .with_context(|| format!("failed to create cache shard {}", parent.display()))?;
        }
        // Written beside the final path and renamed so readers never see a
        // half-written metadata file.
        let staging = self.temp_path();
        let data = serde_json::to_vec(entry)?;
        let mut options = async_fs::OpenOptions::new();
        options.create(true).truncate(true).write(true);
        #[cfg(unix)]
        {
            options.mode(0o600);
        }
        let mut file = options
            .open(&staging)
            .await
            .with_context(|| format!("failed to write cache metadata {}", staging.display()))?;
        file.write_all(&data).await?;
        file.flush().await?;
        drop(file);
        if let Err(err) = async_fs::rename(&staging, &meta_path).await {
            let _ = async_fs::remove_file(&staging).await;
            return Err(err)
                .with_context(|| format!("failed to commit cache metadata {}", meta_path.display()));
        }
        Ok(())
    }
}
