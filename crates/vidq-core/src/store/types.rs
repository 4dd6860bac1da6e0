//! Row types for videos, torrents and jobs.

use std::fmt;

pub type VideoId = i64;
pub type TorrentId = i64;
pub type JobId = i64;

/// Lifecycle of a tracked video. Stored as a string in the database.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VideoStatus {
    Identified,
    Unreleased,
    Searching,
    Downloading,
    Exporting,
    Completed,
}

impl VideoStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            VideoStatus::Identified => "identified",
            VideoStatus::Unreleased => "unreleased",
            VideoStatus::Searching => "searching",
            VideoStatus::Downloading => "downloading",
            VideoStatus::Exporting => "exporting",
            VideoStatus::Completed => "completed",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        Some(match s {
            "identified" => VideoStatus::Identified,
            "unreleased" => VideoStatus::Unreleased,
            "searching" => VideoStatus::Searching,
            "downloading" => VideoStatus::Downloading,
            "exporting" => VideoStatus::Exporting,
            "completed" => VideoStatus::Completed,
            _ => return None,
        })
    }

    /// Statuses in which a re-queue must not replace the row.
    pub fn is_busy(self) -> bool {
        matches!(self, VideoStatus::Downloading | VideoStatus::Exporting)
    }
}

impl fmt::Display for VideoStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What kind of video this is. Movies carry no ordering beyond their id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Media {
    Movie,
    Episode { season: u32, episode: u32 },
}

impl Media {
    pub fn is_episode(&self) -> bool {
        matches!(self, Media::Episode { .. })
    }

    pub fn season(&self) -> u32 {
        match self {
            Media::Movie => 0,
            Media::Episode { season, .. } => *season,
        }
    }

    pub fn episode(&self) -> u32 {
        match self {
            Media::Movie => 0,
            Media::Episode { episode, .. } => *episode,
        }
    }

    pub(crate) fn kind_str(&self) -> &'static str {
        match self {
            Media::Movie => "movie",
            Media::Episode { .. } => "episode",
        }
    }

    pub(crate) fn from_columns(
        kind: &str,
        season: Option<i64>,
        episode: Option<i64>,
    ) -> Option<Self> {
        match kind {
            "movie" => Some(Media::Movie),
            "episode" => Some(Media::Episode {
                season: u32::try_from(season?).ok()?,
                episode: u32::try_from(episode?).ok()?,
            }),
            _ => None,
        }
    }
}

/// Per-torrent state. `Slow` torrents are running but exempt from the slot budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TorrentStatus {
    Pending,
    Downloading,
    Slow,
    Paused,
    Completed,
    Removed,
}

impl TorrentStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            TorrentStatus::Pending => "pending",
            TorrentStatus::Downloading => "downloading",
            TorrentStatus::Slow => "slow",
            TorrentStatus::Paused => "paused",
            TorrentStatus::Completed => "completed",
            TorrentStatus::Removed => "removed",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        Some(match s {
            "pending" => TorrentStatus::Pending,
            "downloading" => TorrentStatus::Downloading,
            "slow" => TorrentStatus::Slow,
            "paused" => TorrentStatus::Paused,
            "completed" => TorrentStatus::Completed,
            "removed" => TorrentStatus::Removed,
            _ => return None,
        })
    }

    /// True while the engine is (supposed to be) transferring this torrent.
    pub fn is_running(self) -> bool {
        matches!(self, TorrentStatus::Downloading | TorrentStatus::Slow)
    }

    /// True if the torrent can still be admitted.
    pub fn is_candidate(self) -> bool {
        !matches!(self, TorrentStatus::Completed | TorrentStatus::Removed)
    }
}

impl fmt::Display for TorrentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Torrent {
    pub id: TorrentId,
    pub video_id: VideoId,
    pub hash: String,
    pub name: String,
    pub size_mb: i64,
    pub quality: Option<String>,
    /// Position assigned by the search collaborator (lower is better).
    pub rank: i64,
    pub status: TorrentStatus,
    pub queue_index: Option<i64>,
}

/// A download source offered for a video, before it is persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewTorrent {
    pub hash: String,
    pub name: String,
    pub size_mb: i64,
    pub quality: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Video {
    pub id: VideoId,
    pub media_key: String,
    pub external_id: String,
    pub title: String,
    pub media: Media,
    pub status: VideoStatus,
    pub queue_index: Option<i64>,
    pub requester_id: Option<String>,
    pub created_at: i64,
    /// Loaded alongside the row, ordered by rank.
    pub torrents: Vec<Torrent>,
}

/// A video the upstream wants tracked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewVideo {
    /// Identifier from the metadata collaborator (show id for episodes).
    pub external_id: String,
    pub title: String,
    pub media: Media,
    pub requester_id: Option<String>,
}

impl NewVideo {
    /// Uniqueness key: the same movie, or the same episode of a show.
    pub fn media_key(&self) -> String {
        match self.media {
            Media::Movie => self.external_id.clone(),
            Media::Episode { season, episode } => {
                format!("{}:s{:02}e{:02}", self.external_id, season, episode)
            }
        }
    }
}

/// Returned (inside `anyhow::Error`) when a video is re-queued while it is
/// still downloading or exporting.
#[derive(Debug, thiserror::Error)]
#[error("{media_key} is already tracked as video {video_id} ({status})")]
pub struct VideoBusy {
    pub media_key: String,
    pub video_id: VideoId,
    pub status: VideoStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobKind {
    SearchForRelease,
    AddTorrent,
    MonitorDownload,
    DeleteVideo,
}

impl JobKind {
    pub fn as_str(self) -> &'static str {
        match self {
            JobKind::SearchForRelease => "search_for_release",
            JobKind::AddTorrent => "add_torrent",
            JobKind::MonitorDownload => "monitor_download",
            JobKind::DeleteVideo => "delete_video",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "search_for_release" => Some(JobKind::SearchForRelease),
            "add_torrent" => Some(JobKind::AddTorrent),
            "monitor_download" => Some(JobKind::MonitorDownload),
            "delete_video" => Some(JobKind::DeleteVideo),
            _ => None,
        }
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a job is treated after a failed run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulePolicy {
    /// Not retried; a failure ends the job.
    Once,
    /// Retried after the same interval.
    Repeated,
    /// Retried after a doubling, capped interval.
    Backoff,
}

impl SchedulePolicy {
    pub fn as_str(self) -> &'static str {
        match self {
            SchedulePolicy::Once => "once",
            SchedulePolicy::Repeated => "repeated",
            SchedulePolicy::Backoff => "backoff",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "once" => Some(SchedulePolicy::Once),
            "repeated" => Some(SchedulePolicy::Repeated),
            "backoff" => Some(SchedulePolicy::Backoff),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    Pending,
    Running,
    Done,
}

impl JobStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Done => "done",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(JobStatus::Pending),
            "running" => Some(JobStatus::Running),
            "done" => Some(JobStatus::Done),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Job {
    pub id: JobId,
    pub kind: JobKind,
    pub video_id: VideoId,
    pub policy: SchedulePolicy,
    pub interval_ms: i64,
    pub run_count: i64,
    pub status: JobStatus,
    /// Unix milliseconds.
    pub next_run_at: i64,
}

/// Job row to insert; timing is computed by the scheduler from the kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewJob {
    pub kind: JobKind,
    pub video_id: VideoId,
    pub policy: SchedulePolicy,
    pub interval_ms: i64,
    pub next_run_at: i64,
}
