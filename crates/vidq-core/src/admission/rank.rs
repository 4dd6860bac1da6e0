//! Priority order for one admission pass.

use crate::store::{Torrent, TorrentStatus, Video};

/// One torrent considered in a pass, together with the video it belongs to.
#[derive(Debug, Clone, Copy)]
pub struct AllocationCandidate<'a> {
    pub torrent: &'a Torrent,
    pub video: &'a Video,
}

impl AllocationCandidate<'_> {
    pub fn is_slow(&self) -> bool {
        self.torrent.status == TorrentStatus::Slow
    }
}

/// A video is slow when something of it is slow and nothing of it downloads normally.
pub fn is_slow_video(video: &Video) -> bool {
    let mut slow = false;
    for t in &video.torrents {
        match t.status {
            TorrentStatus::Downloading => return false,
            TorrentStatus::Slow => slow = true,
            _ => {}
        }
    }
    slow
}

/// Videos in priority order: not slow, movies, earlier season, earlier episode.
pub fn order_videos(videos: &[Video]) -> Vec<&Video> {
    let mut ordered: Vec<&Video> = videos.iter().collect();
    ordered.sort_by_key(|v| {
        (
            is_slow_video(v),
            v.media.is_episode(),
            v.media.season(),
            v.media.episode(),
            v.id,
        )
    });
    ordered
}

/// Admissible torrents of `video`: not paused, not slow, not pending first,
/// then the search rank.
pub fn order_torrents(video: &Video) -> Vec<&Torrent> {
    let mut ordered: Vec<&Torrent> = video
        .torrents
        .iter()
        .filter(|t| t.status.is_candidate())
        .collect();
    ordered.sort_by_key(|t| {
        (
            t.status == TorrentStatus::Paused,
            t.status == TorrentStatus::Slow,
            t.status == TorrentStatus::Pending,
            t.rank,
            t.id,
        )
    });
    ordered
}

/// Round-robin over the ordered videos, one torrent per video per round.
pub fn interleave<'a>(videos: &[&'a Video]) -> Vec<AllocationCandidate<'a>> {
    let per_video: Vec<Vec<&Torrent>> = videos.iter().map(|v| order_torrents(*v)).collect();
    let rounds = per_video.iter().map(Vec::len).max().unwrap_or(0);
    let mut out = Vec::new();
    for round in 0..rounds {
        for (video, torrents) in videos.iter().zip(&per_video) {
            if let Some(&torrent) = torrents.get(round) {
                out.push(AllocationCandidate {
                    torrent,
                    video: *video,
                });
            }
        }
    }
    out
}
