//! `vidq status` – show videos, torrents and (optionally) jobs.

use anyhow::Result;
use vidq_core::store::{Db, Media};

fn media_label(media: &Media) -> String {
    match media {
        Media::Movie => "movie".to_string(),
        Media::Episode { season, episode } => format!("S{season:02}E{episode:02}"),
    }
}

pub async fn run_status(db: &Db, show_jobs: bool) -> Result<()> {
    let videos = db.list_videos().await?;
    if videos.is_empty() {
        println!("No videos tracked.");
    } else {
        println!("{:<6} {:<12} {:<8} {}", "ID", "STATUS", "MEDIA", "TITLE");
        for v in &videos {
            println!(
                "{:<6} {:<12} {:<8} {}",
                v.id,
                v.status.as_str(),
                media_label(&v.media),
                v.title
            );
            for t in &v.torrents {
                println!(
                    "       {:<12} {:>8} MB  {}  {}",
                    t.status.as_str(),
                    t.size_mb,
                    t.hash,
                    t.quality.as_deref().unwrap_or("-")
                );
            }
        }
    }

    if show_jobs {
        let jobs = db.list_jobs().await?;
        println!();
        println!(
            "{:<6} {:<18} {:<6} {:<8} {:<5} {}",
            "JOB", "KIND", "VIDEO", "STATUS", "RUNS", "NEXT RUN (ms)"
        );
        for j in jobs {
            println!(
                "{:<6} {:<18} {:<6} {:<8} {:<5} {}",
                j.id,
                j.kind.as_str(),
                j.video_id,
                j.status.as_str(),
                j.run_count,
                j.next_run_at
            );
        }
    }
    Ok(())
}
