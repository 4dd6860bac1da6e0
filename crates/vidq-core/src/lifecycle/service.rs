use anyhow::Result;

use crate::store::{JobId, JobKind, NewTorrent, NewVideo, VideoId};

use super::handlers::{discard_torrent_data, LifecycleDeps};

/// Entry point for the upstream: queue videos and remove them.
#[derive(Clone)]
pub struct AcquisitionService {
    deps: LifecycleDeps,
}

/// What [`AcquisitionService::queue`] created.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Queued {
    pub video_id: VideoId,
    pub job_id: JobId,
    pub kind: JobKind,
}

impl AcquisitionService {
    pub fn new(deps: LifecycleDeps) -> Self {
        Self { deps }
    }

    /// Track `video`. With `torrents` the download starts from those sources,
    /// otherwise a release search is scheduled.
    ///
    /// Re-queueing a video that is downloading or exporting fails with
    /// [`crate::store::VideoBusy`].
    pub async fn queue(&self, video: &NewVideo, torrents: &[NewTorrent]) -> Result<Queued> {
        let db = &self.deps.db;
        let video_id = db.insert_video(video).await?;
        let kind = if torrents.is_empty() {
            JobKind::SearchForRelease
        } else {
            db.add_torrents(video_id, torrents).await?;
            JobKind::AddTorrent
        };
        let job_id = self.deps.scheduler.add_job(kind, video_id).await?;
        tracing::info!(video = video_id, "queued {} ({})", video.title, kind);
        Ok(Queued {
            video_id,
            job_id,
            kind,
        })
    }

    /// Stop any transfers, delete downloaded data and forget the video.
    /// Returns false if there was no such video.
    pub async fn remove(&self, video_id: VideoId) -> Result<bool> {
        let deps = &self.deps;
        let Some(video) = deps.db.get_video(video_id).await? else {
            return Ok(false);
        };
        for t in video.torrents.iter().filter(|t| t.status.is_running()) {
            if let Err(e) = deps.engine.stop(&t.hash).await {
                tracing::debug!(torrent = t.id, "stop before removal failed: {}", e);
            }
        }
        for t in &video.torrents {
            discard_torrent_data(deps.engine.as_ref(), &deps.admission.torrent_path(t)).await;
        }
        deps.db.delete_video(video.id).await?;
        tracing::info!(video = video.id, "removed {}", video.title);
        deps.admission.ping().await;
        Ok(true)
    }
}
