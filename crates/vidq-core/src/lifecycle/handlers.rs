use anyhow::Result;
use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use crate::admission::AdmissionController;
use crate::engine::{with_timeout, TransferEngine};
use crate::scheduler::{JobHandler, JobScheduler};
use crate::store::{Db, JobKind, TorrentStatus, VideoId, VideoStatus};

use super::collab::{ReleaseSearch, SearchOutcome};

/// Shared wiring for the job handlers and [`super::AcquisitionService`].
#[derive(Clone)]
pub struct LifecycleDeps {
    pub db: Db,
    pub engine: Arc<dyn TransferEngine>,
    pub scheduler: JobScheduler,
    pub admission: AdmissionController,
    pub search: Arc<dyn ReleaseSearch>,
    pub progress_timeout: Duration,
    pub slow_speed_kbps: u64,
}

/// Install one handler per job kind on `deps.scheduler`.
pub fn register_handlers(deps: &LifecycleDeps) {
    let scheduler = &deps.scheduler;
    scheduler.register(
        JobKind::SearchForRelease,
        Arc::new(SearchForRelease::new(deps.clone())),
    );
    scheduler.register(JobKind::AddTorrent, Arc::new(AddTorrent::new(deps.clone())));
    scheduler.register(
        JobKind::MonitorDownload,
        Arc::new(MonitorDownload::new(deps.clone())),
    );
    scheduler.register(JobKind::DeleteVideo, Arc::new(DeleteVideo::new(deps.clone())));
}

macro_rules! handler_new {
    ($($name:ident),*) => {
        $(impl $name {
            pub fn new(deps: LifecycleDeps) -> Self {
                Self { deps }
            }
        })*
    };
}

handler_new!(SearchForRelease, AddTorrent, MonitorDownload, DeleteVideo);

/// Flip the video to `downloading`, start monitoring it and wake admission.
async fn begin_download(deps: &LifecycleDeps, video_id: VideoId) -> Result<()> {
    deps.db
        .set_video_status(video_id, VideoStatus::Downloading)
        .await?;
    deps.scheduler
        .add_job(JobKind::MonitorDownload, video_id)
        .await?;
    deps.admission.ping().await;
    Ok(())
}

/// Ask the engine to delete a torrent's data; remove it ourselves when the
/// engine cannot.
pub(crate) async fn discard_torrent_data(engine: &dyn TransferEngine, path: &Path) {
    let Err(e) = engine.destroy(path).await else {
        return;
    };
    tracing::debug!("engine could not destroy {}: {}", path.display(), e);
    match tokio::fs::remove_dir_all(path).await {
        Ok(()) => {}
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => tracing::warn!("failed to remove {}: {}", path.display(), e),
    }
}

/// Looks for download sources. Backs off while the video is unreleased or
/// nothing usable turns up.
pub struct SearchForRelease {
    deps: LifecycleDeps,
}

#[async_trait]
impl JobHandler for SearchForRelease {
    async fn run(&self, video_id: VideoId, run_count: i64) -> Result<bool> {
        let db = &self.deps.db;
        let Some(video) = db.get_video(video_id).await? else {
            return Ok(true);
        };
        if video.status.is_busy() || video.status == VideoStatus::Completed {
            tracing::debug!(video = video.id, "search skipped in status {}", video.status);
            return Ok(true);
        }

        match self.deps.search.search(&video).await? {
            SearchOutcome::Unreleased => {
                tracing::info!(video = video.id, run = run_count, "{} not released yet", video.title);
                db.set_video_status(video.id, VideoStatus::Unreleased)
                    .await?;
                Ok(false)
            }
            SearchOutcome::Found(torrents) if !torrents.is_empty() => {
                let added = db.add_torrents(video.id, &torrents).await?;
                tracing::info!(video = video.id, "found {} source(s) for {}", added, video.title);
                begin_download(&self.deps, video.id).await?;
                Ok(true)
            }
            SearchOutcome::NotFound | SearchOutcome::Found(_) => {
                tracing::info!(video = video.id, run = run_count, "no sources for {} yet", video.title);
                db.set_video_status(video.id, VideoStatus::Searching)
                    .await?;
                Ok(false)
            }
        }
    }
}

/// Starts a video whose sources were supplied up front.
pub struct AddTorrent {
    deps: LifecycleDeps,
}

#[async_trait]
impl JobHandler for AddTorrent {
    async fn run(&self, video_id: VideoId, _run_count: i64) -> Result<bool> {
        let Some(video) = self.deps.db.get_video(video_id).await? else {
            return Ok(true);
        };
        if video.status.is_busy() || video.status == VideoStatus::Completed {
            return Ok(true);
        }
        if !video.torrents.iter().any(|t| t.status.is_candidate()) {
            tracing::warn!(video = video.id, "no usable torrents for {}", video.title);
            return Ok(false);
        }
        begin_download(&self.deps, video.id).await?;
        Ok(true)
    }
}

/// Polls transfer rates and moves torrents between `downloading` and `slow`.
/// Repeats for as long as the video is downloading.
pub struct MonitorDownload {
    deps: LifecycleDeps,
}

#[async_trait]
impl JobHandler for MonitorDownload {
    async fn run(&self, video_id: VideoId, _run_count: i64) -> Result<bool> {
        let deps = &self.deps;
        let Some(video) = deps.db.get_video(video_id).await? else {
            return Ok(true);
        };
        if video.status != VideoStatus::Downloading {
            tracing::debug!(video = video.id, "monitoring ends in status {}", video.status);
            return Ok(true);
        }

        let mut changed = 0;
        for t in video.torrents.iter().filter(|t| t.status.is_running()) {
            let p = match with_timeout(deps.progress_timeout, deps.engine.progress(&t.hash)).await {
                Ok(p) => p,
                Err(e) => {
                    // No report; leave the flag as it is.
                    tracing::debug!(torrent = t.id, hash = %t.hash, "no progress report: {}", e);
                    continue;
                }
            };
            let slow = p.speed_kbps() < deps.slow_speed_kbps as f64;
            let next = match (t.status, slow) {
                (TorrentStatus::Downloading, true) => TorrentStatus::Slow,
                (TorrentStatus::Slow, false) => TorrentStatus::Downloading,
                _ => continue,
            };
            tracing::info!(
                torrent = t.id,
                hash = %t.hash,
                "{:.1} KB/s with {} peer(s): {} -> {}",
                p.speed_kbps(),
                p.num_peers,
                t.status,
                next
            );
            deps.db.set_torrent_status(t.id, next).await?;
            changed += 1;
        }
        if changed > 0 {
            deps.admission.ping().await;
        }
        // Not done: poll again after the interval.
        Ok(false)
    }
}

/// Drops a completed video's leftover data and forgets it.
pub struct DeleteVideo {
    deps: LifecycleDeps,
}

#[async_trait]
impl JobHandler for DeleteVideo {
    async fn run(&self, video_id: VideoId, _run_count: i64) -> Result<bool> {
        let deps = &self.deps;
        let Some(video) = deps.db.get_video(video_id).await? else {
            return Ok(true);
        };
        for t in &video.torrents {
            discard_torrent_data(deps.engine.as_ref(), &deps.admission.torrent_path(t)).await;
        }
        deps.db.delete_video(video.id).await?;
        tracing::info!(video = video.id, "deleted {}", video.title);
        Ok(true)
    }
}
