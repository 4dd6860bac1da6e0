use anyhow::{Context, Result};
use std::collections::HashSet;
use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;

use crate::accountant::{torrent_dir, ResourceAccountant};
use crate::engine::{DownloadHandle, TransferEngine};
use crate::lifecycle::{Exporter, Notifier};
use crate::scheduler::JobScheduler;
use crate::single_flight::SingleFlight;
use crate::store::{
    Db, JobKind, Torrent, TorrentId, TorrentStatus, Video, VideoId, VideoStatus,
};
use crate::supervisor::RpcError;

use super::budget::{allocate, Budget, Demand};
use super::rank::{interleave, order_videos, AllocationCandidate};

type BoxFuture = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// Everything the controller talks to.
pub struct AdmissionDeps {
    pub db: Db,
    pub engine: Arc<dyn TransferEngine>,
    pub accountant: Arc<dyn ResourceAccountant>,
    pub scheduler: JobScheduler,
    pub exporter: Arc<dyn Exporter>,
    pub notifier: Arc<dyn Notifier>,
}

struct Inner {
    deps: AdmissionDeps,
    max_downloads: usize,
    download_root: PathBuf,
    flight: Arc<SingleFlight>,
}

/// Decides which torrents may download right now.
///
/// Every [`AdmissionController::ping`] recomputes the whole allocation from
/// the store; nothing about earlier passes is remembered except the display
/// order written back for the UI.
#[derive(Clone)]
pub struct AdmissionController {
    inner: Arc<Inner>,
}

/// Summary of one pass, for logging and tests.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PassReport {
    pub candidates: usize,
    pub started: Vec<TorrentId>,
    pub stopped: Vec<TorrentId>,
    pub failed: Vec<TorrentId>,
    /// Engine transfers with no matching candidate, stopped by this pass.
    pub orphans: Vec<String>,
}

impl AdmissionController {
    pub fn new(deps: AdmissionDeps, max_downloads: usize, download_root: impl Into<PathBuf>) -> Self {
        Self {
            inner: Arc::new(Inner {
                deps,
                max_downloads,
                download_root: download_root.into(),
                flight: Arc::new(SingleFlight::new()),
            }),
        }
    }

    /// Where `torrent`'s data is written.
    pub fn torrent_path(&self, torrent: &Torrent) -> PathBuf {
        torrent_dir(&self.inner.download_root, torrent.video_id, &torrent.hash)
    }

    /// After a restart the engine holds nothing, whatever the store says.
    /// Put running torrents back to pending and run a pass.
    pub async fn resume(&self) -> Result<()> {
        let db = &self.inner.deps.db;
        let videos = db.videos_with_status(&[VideoStatus::Downloading]).await?;
        let mut reset = 0;
        for t in videos.iter().flat_map(|v| &v.torrents) {
            if t.status.is_running() {
                db.set_torrent_status(t.id, TorrentStatus::Pending).await?;
                reset += 1;
            }
        }
        if reset > 0 {
            tracing::info!("re-admitting {} torrent(s) from previous run", reset);
        }
        self.ping().await;
        Ok(())
    }

    /// Recompute the allocation. Overlapping calls coalesce into one trailing pass.
    pub async fn ping(&self) {
        let this = self.clone();
        self.inner
            .flight
            .run(move || {
                let this = this.clone();
                async move {
                    match this.pass().await {
                        Ok(report)
                        if report.started.is_empty()
                            && report.stopped.is_empty()
                            && report.orphans.is_empty() => {}
                        Ok(report) => tracing::info!(
                            candidates = report.candidates,
                            "admission: started {:?}, stopped {:?}",
                            report.started,
                            report.stopped
                        ),
                        Err(e) => tracing::warn!("admission pass failed: {:#}", e),
                    }
                }
            })
            .await;
    }

    /// Number of completed passes.
    pub fn passes(&self) -> u64 {
        self.inner.flight.completed()
    }

    /// One allocation pass. Failures of individual torrents are logged and
    /// left for the next pass.
    pub async fn pass(&self) -> Result<PassReport> {
        let deps = &self.inner.deps;
        let videos = deps
            .db
            .videos_with_status(&[VideoStatus::Downloading])
            .await?;
        let ordered = order_videos(&videos);
        let candidates = interleave(&ordered);

        let remaining = deps
            .accountant
            .remaining_mb()
            .await
            .context("reading storage budget")?;
        let mut demands = Vec::with_capacity(candidates.len());
        for c in &candidates {
            let on_disk = match deps.accountant.progress_mb(c.torrent).await {
                Ok(mb) => mb,
                Err(e) => {
                    tracing::warn!(torrent = c.torrent.id, "progress unknown, assuming none: {:#}", e);
                    0
                }
            };
            demands.push(Demand {
                mb: (c.torrent.size_mb - on_disk).max(0),
                slow: c.is_slow(),
            });
        }
        let budget = Budget {
            storage_mb: remaining,
            slots: self.inner.max_downloads as i64,
        };
        let decisions = allocate(budget, &demands);

        let mut report = PassReport {
            candidates: candidates.len(),
            ..PassReport::default()
        };
        for (c, allocated) in candidates.iter().zip(decisions) {
            let status = c.torrent.status;
            if allocated && !status.is_running() {
                match self.start(c).await {
                    Ok(()) => report.started.push(c.torrent.id),
                    Err(e) => {
                        tracing::warn!(torrent = c.torrent.id, hash = %c.torrent.hash, "start failed: {:#}", e);
                        report.failed.push(c.torrent.id);
                    }
                }
            } else if !allocated && status.is_running() {
                match self.stop(c.torrent).await {
                    Ok(()) => report.stopped.push(c.torrent.id),
                    Err(e) => {
                        tracing::warn!(torrent = c.torrent.id, "stop failed: {:#}", e);
                        report.failed.push(c.torrent.id);
                    }
                }
            }
        }

        // Transfers whose video was removed or left `downloading` elsewhere.
        let known: HashSet<&str> = candidates.iter().map(|c| c.torrent.hash.as_str()).collect();
        for hash in deps.engine.active_downloads() {
            if !known.contains(hash.as_str()) {
                tracing::info!(hash = %hash, "stopping orphaned transfer");
                self.stop_in_background(hash.clone());
                report.orphans.push(hash);
            }
        }

        let video_order: Vec<VideoId> = ordered.iter().map(|v| v.id).collect();
        let torrent_order: Vec<TorrentId> = candidates.iter().map(|c| c.torrent.id).collect();
        deps.db.set_video_queue_order(&video_order).await?;
        deps.db.set_torrent_queue_order(&torrent_order).await?;
        Ok(report)
    }

    async fn start(&self, c: &AllocationCandidate<'_>) -> Result<()> {
        let path = self.torrent_path(c.torrent);
        let handle = self
            .inner
            .deps
            .engine
            .download(&c.torrent.hash, &path)
            .await?;
        self.inner
            .deps
            .db
            .set_torrent_status(c.torrent.id, TorrentStatus::Downloading)
            .await?;
        tracing::debug!(video = c.video.id, torrent = c.torrent.id, "download dispatched to {}", path.display());
        tokio::spawn(self.watch(c.torrent.clone(), handle));
        Ok(())
    }

    /// Mark paused now; the stop request itself runs in the background.
    async fn stop(&self, torrent: &Torrent) -> Result<()> {
        self.inner
            .deps
            .db
            .set_torrent_status(torrent.id, TorrentStatus::Paused)
            .await?;
        self.stop_in_background(torrent.hash.clone());
        Ok(())
    }

    fn stop_in_background(&self, hash: String) {
        let engine = Arc::clone(&self.inner.deps.engine);
        tokio::spawn(async move {
            if let Err(e) = engine.stop(&hash).await {
                tracing::warn!(hash = %hash, "stop request failed: {}", e);
            }
        });
    }

    /// Boxed so the pass -> watch -> complete -> ping cycle has a nameable type.
    fn watch(&self, torrent: Torrent, handle: DownloadHandle) -> BoxFuture {
        let this = self.clone();
        Box::pin(async move {
            match handle.finished().await {
                Ok(()) => {
                    if let Err(e) = this.complete_download(&torrent).await {
                        tracing::error!(torrent = torrent.id, "completing download failed: {:#}", e);
                    }
                }
                Err(RpcError::Stopped) => {
                    tracing::debug!(torrent = torrent.id, "download stopped");
                }
                Err(e) => {
                    tracing::warn!(torrent = torrent.id, hash = %torrent.hash, "download failed: {}", e);
                    let reset = this
                        .inner
                        .deps
                        .db
                        .set_torrent_status(torrent.id, TorrentStatus::Pending)
                        .await;
                    if let Err(e) = reset {
                        tracing::warn!(torrent = torrent.id, "could not reset torrent: {:#}", e);
                    }
                    this.ping().await;
                }
            }
        })
    }

    /// A transfer finished: retire the video's other torrents, export, notify,
    /// and schedule deletion of the leftovers.
    pub async fn complete_download(&self, torrent: &Torrent) -> Result<()> {
        let deps = &self.inner.deps;
        let Some(video) = deps.db.get_video(torrent.video_id).await? else {
            tracing::info!(torrent = torrent.id, "video gone before its download finished");
            return Ok(());
        };
        if video.status != VideoStatus::Downloading {
            tracing::debug!(video = video.id, "completion ignored in status {}", video.status);
            return Ok(());
        }

        deps.db
            .set_torrent_status(torrent.id, TorrentStatus::Completed)
            .await?;
        for other in video.torrents.iter().filter(|t| t.id != torrent.id) {
            if other.status.is_running() {
                if let Err(e) = deps.engine.stop(&other.hash).await {
                    tracing::warn!(torrent = other.id, "stopping sibling failed: {}", e);
                }
            }
            if other.status.is_candidate() {
                deps.db
                    .set_torrent_status(other.id, TorrentStatus::Removed)
                    .await?;
            }
        }
        deps.db
            .set_video_status(video.id, VideoStatus::Exporting)
            .await?;
        tracing::info!(video = video.id, "download complete; exporting {}", video.title);
        // Slots just freed up.
        self.ping().await;

        self.export(&video, torrent).await
    }

    async fn export(&self, video: &Video, torrent: &Torrent) -> Result<()> {
        let deps = &self.inner.deps;
        let source = self.torrent_path(torrent);
        match deps.exporter.export(video, torrent, &source).await {
            Ok(dest) => {
                deps.db
                    .set_video_status(video.id, VideoStatus::Completed)
                    .await?;
                deps.scheduler
                    .add_job(JobKind::DeleteVideo, video.id)
                    .await?;
                if let Some(user) = &video.requester_id {
                    let message = format!("{} is ready ({})", video.title, dest.display());
                    if let Err(e) = deps.notifier.notify(user, &message).await {
                        tracing::warn!(video = video.id, "notify failed: {:#}", e);
                    }
                }
                Ok(())
            }
            Err(e) => {
                // Roll back so the next pass re-admits the (complete) torrent
                // and the export is attempted again.
                tracing::error!(video = video.id, "export failed: {:#}", e);
                deps.db
                    .set_torrent_status(torrent.id, TorrentStatus::Pending)
                    .await?;
                deps.db
                    .set_video_status(video.id, VideoStatus::Downloading)
                    .await?;
                self.ping().await;
                Err(e)
            }
        }
    }
}
