//! `vidq add` – queue a video.

use anyhow::Result;
use vidq_core::config::VidqConfig;
use vidq_core::daemon::detached_service;
use vidq_core::store::{Db, NewTorrent, NewVideo};

pub async fn run_add(db: Db, cfg: &VidqConfig, video: &NewVideo, torrents: &[NewTorrent]) -> Result<()> {
    let queued = detached_service(cfg, db).queue(video, torrents).await?;
    println!(
        "Queued video {} ({}): {} job {}",
        queued.video_id, video.title, queued.kind, queued.job_id
    );
    Ok(())
}
