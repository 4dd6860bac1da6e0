//! Storage accounting for admission.
//!
//! Each torrent downloads into `<download_root>/<video_id>/<hash>`. The
//! storage budget is `max_memory_mb` minus what is already on disk under the
//! download root.

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use crate::store::{Torrent, VideoId};

const BYTES_PER_MB: u64 = 1024 * 1024;

/// Reports how much storage budget is left and how far a torrent has come.
#[async_trait]
pub trait ResourceAccountant: Send + Sync {
    /// Remaining storage budget in MB. May be negative when over budget.
    async fn remaining_mb(&self) -> Result<i64>;

    /// MB of `torrent` already on disk.
    async fn progress_mb(&self, torrent: &Torrent) -> Result<i64>;
}

/// Directory a torrent's data lives in.
pub fn torrent_dir(download_root: &Path, video_id: VideoId, hash: &str) -> PathBuf {
    download_root.join(video_id.to_string()).join(hash)
}

/// Filesystem-backed accountant.
#[derive(Debug, Clone)]
pub struct DiskAccountant {
    root: PathBuf,
    max_memory_mb: u64,
}

impl DiskAccountant {
    pub fn new(root: impl Into<PathBuf>, max_memory_mb: u64) -> Self {
        Self {
            root: root.into(),
            max_memory_mb,
        }
    }

    async fn used_bytes(path: PathBuf) -> Result<u64> {
        tokio::task::spawn_blocking(move || dir_size(&path))
            .await
            .context("disk usage task failed")?
    }
}

#[async_trait]
impl ResourceAccountant for DiskAccountant {
    async fn remaining_mb(&self) -> Result<i64> {
        let used = Self::used_bytes(self.root.clone())
            .await
            .with_context(|| format!("measuring {}", self.root.display()))?;
        Ok(self.max_memory_mb as i64 - (used / BYTES_PER_MB) as i64)
    }

    async fn progress_mb(&self, torrent: &Torrent) -> Result<i64> {
        let dir = torrent_dir(&self.root, torrent.video_id, &torrent.hash);
        let used = Self::used_bytes(dir).await?;
        Ok((used / BYTES_PER_MB) as i64)
    }
}

/// Total size of regular files under `path`. A missing path counts as empty.
fn dir_size(path: &Path) -> Result<u64> {
    let meta = match std::fs::symlink_metadata(path) {
        Ok(m) => m,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(e).with_context(|| format!("stat {}", path.display())),
    };
    if meta.is_file() {
        return Ok(meta.len());
    }
    if !meta.is_dir() {
        return Ok(0);
    }
    let mut total = 0;
    let entries = std::fs::read_dir(path).with_context(|| format!("read {}", path.display()))?;
    for entry in entries {
        let entry = entry?;
        total += dir_size(&entry.path())?;
    }
    Ok(total)
}
