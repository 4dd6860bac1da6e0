//! Outside collaborators the lifecycle depends on, with the default
//! implementations the daemon ships with.

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};

use crate::store::{NewTorrent, Torrent, Video};

/// Result of asking for download sources.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SearchOutcome {
    /// Not released yet; search again later.
    Unreleased,
    /// Released, but no usable source found yet.
    NotFound,
    /// Ranked sources, best first.
    Found(Vec<NewTorrent>),
}

#[async_trait]
pub trait ReleaseSearch: Send + Sync {
    async fn search(&self, video: &Video) -> Result<SearchOutcome>;
}

/// Always reports nothing found. Sources then come only from `vidq add --torrent`.
#[derive(Debug, Clone, Default)]
pub struct NoReleaseSearch;

#[async_trait]
impl ReleaseSearch for NoReleaseSearch {
    async fn search(&self, video: &Video) -> Result<SearchOutcome> {
        tracing::debug!(video = video.id, "no release search configured");
        Ok(SearchOutcome::NotFound)
    }
}

/// Moves a finished download into the library.
#[async_trait]
pub trait Exporter: Send + Sync {
    /// Export the data of `torrent` found at `source`. Returns the destination.
    async fn export(&self, video: &Video, torrent: &Torrent, source: &Path) -> Result<PathBuf>;
}

/// Renames the torrent directory to `<export_root>/<title>`.
#[derive(Debug, Clone)]
pub struct MoveExporter {
    export_root: PathBuf,
}

impl MoveExporter {
    pub fn new(export_root: impl Into<PathBuf>) -> Self {
        Self {
            export_root: export_root.into(),
        }
    }

    /// Library directory name: the title plus the episode tag, filesystem safe.
    pub fn entry_name(video: &Video) -> String {
        let base = match video.media {
            crate::store::Media::Movie => video.title.clone(),
            crate::store::Media::Episode { season, episode } => {
                format!("{} S{:02}E{:02}", video.title, season, episode)
            }
        };
        let cleaned: String = base
            .chars()
            .map(|c| match c {
                '/' | '\\' | ':' | '\0' => '_',
                c => c,
            })
            .collect();
        let trimmed = cleaned.trim().trim_start_matches('.');
        if trimmed.is_empty() {
            video.media_key.replace(':', "_")
        } else {
            trimmed.to_string()
        }
    }
}

#[async_trait]
impl Exporter for MoveExporter {
    async fn export(&self, video: &Video, torrent: &Torrent, source: &Path) -> Result<PathBuf> {
        let dest = self.export_root.join(Self::entry_name(video));
        tokio::fs::create_dir_all(&self.export_root)
            .await
            .with_context(|| format!("create {}", self.export_root.display()))?;
        if tokio::fs::try_exists(&dest).await.unwrap_or(false) {
            tokio::fs::remove_dir_all(&dest)
                .await
                .with_context(|| format!("replace {}", dest.display()))?;
        }
        tokio::fs::rename(source, &dest)
            .await
            .with_context(|| format!("move {} to {}", source.display(), dest.display()))?;
        tracing::info!(video = video.id, torrent = %torrent.hash, "exported to {}", dest.display());
        Ok(dest)
    }
}

/// Upstream notification channel (chat bot, mail, ...).
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, user_id: &str, message: &str) -> Result<()>;
}

#[derive(Debug, Clone, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, user_id: &str, message: &str) -> Result<()> {
        tracing::info!(user = user_id, "{}", message);
        Ok(())
    }
}
