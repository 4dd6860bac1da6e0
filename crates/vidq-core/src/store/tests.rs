//! Tests for the store (use in-memory DB helper from db).

use super::*;

fn movie(id: &str) -> NewVideo {
    NewVideo {
        external_id: id.to_string(),
        title: format!("Movie {id}"),
        media: Media::Movie,
        requester_id: Some("u1".to_string()),
    }
}

fn episode(show: &str, season: u32, episode: u32) -> NewVideo {
    NewVideo {
        external_id: show.to_string(),
        title: format!("{show} {season}x{episode}"),
        media: Media::Episode { season, episode },
        requester_id: None,
    }
}

fn torrent(hash: &str, size_mb: i64) -> NewTorrent {
    NewTorrent {
        hash: hash.to_string(),
        name: format!("{hash}.mkv"),
        size_mb,
        quality: Some("1080p".to_string()),
    }
}

fn job(kind: JobKind, video_id: VideoId, next_run_at: i64) -> NewJob {
    NewJob {
        kind,
        video_id,
        policy: SchedulePolicy::Backoff,
        interval_ms: 1_000,
        next_run_at,
    }
}

#[tokio::test]
async fn video_roundtrip_with_media_columns() {
    let db = open_memory().await.unwrap();
    let id = db.insert_video(&episode("tt900", 2, 7)).await.unwrap();
    let v = db.get_video(id).await.unwrap().expect("video exists");
    assert_eq!(v.media, Media::Episode { season: 2, episode: 7 });
    assert_eq!(v.media_key, "tt900:s02e07");
    assert_eq!(v.status, VideoStatus::Identified);
    assert!(v.requester_id.is_none());

    let m = db.insert_video(&movie("tt1")).await.unwrap();
    let v = db.get_video(m).await.unwrap().unwrap();
    assert_eq!(v.media, Media::Movie);
    assert_eq!(v.requester_id.as_deref(), Some("u1"));
}

#[tokio::test]
async fn requeue_replaces_idle_video_and_its_rows() {
    let db = open_memory().await.unwrap();
    let old = db.insert_video(&movie("tt2")).await.unwrap();
    db.add_torrents(old, &[torrent("aa", 100)]).await.unwrap();
    db.insert_job(&job(JobKind::SearchForRelease, old, 0))
        .await
        .unwrap();
    db.set_video_status(old, VideoStatus::Searching).await.unwrap();

    let new = db.insert_video(&movie("tt2")).await.unwrap();
    assert_ne!(old, new);
    assert!(db.get_video(old).await.unwrap().is_none());
    assert!(db.torrents_for_video(old).await.unwrap().is_empty());
    assert!(db.jobs_for_video(old).await.unwrap().is_empty());
}

#[tokio::test]
async fn requeue_of_busy_video_is_rejected() {
    let db = open_memory().await.unwrap();
    let id = db.insert_video(&movie("tt3")).await.unwrap();
    db.set_video_status(id, VideoStatus::Downloading)
        .await
        .unwrap();

    let err = db.insert_video(&movie("tt3")).await.unwrap_err();
    let busy = err.downcast_ref::<VideoBusy>().expect("VideoBusy error");
    assert_eq!(busy.video_id, id);
    assert_eq!(busy.status, VideoStatus::Downloading);
    // Original row untouched.
    assert!(db.get_video(id).await.unwrap().is_some());
}

#[tokio::test]
async fn add_torrents_skips_known_hashes_and_keeps_rank_order() {
    let db = open_memory().await.unwrap();
    let id = db.insert_video(&movie("tt4")).await.unwrap();
    let n = db
        .add_torrents(id, &[torrent("a", 10), torrent("b", 20)])
        .await
        .unwrap();
    assert_eq!(n, 2);
    let n = db
        .add_torrents(id, &[torrent("b", 20), torrent("c", 30)])
        .await
        .unwrap();
    assert_eq!(n, 1);

    let ts = db.torrents_for_video(id).await.unwrap();
    let hashes: Vec<_> = ts.iter().map(|t| t.hash.as_str()).collect();
    assert_eq!(hashes, ["a", "b", "c"]);
    assert!(ts.iter().all(|t| t.status == TorrentStatus::Pending));
    assert_eq!(ts[2].rank, 3);
}

#[tokio::test]
async fn videos_with_status_filters_and_loads_torrents() {
    let db = open_memory().await.unwrap();
    let a = db.insert_video(&movie("a")).await.unwrap();
    let b = db.insert_video(&movie("b")).await.unwrap();
    db.insert_video(&movie("c")).await.unwrap();
    db.set_video_status(a, VideoStatus::Downloading).await.unwrap();
    db.set_video_status(b, VideoStatus::Exporting).await.unwrap();
    db.add_torrents(a, &[torrent("x", 1)]).await.unwrap();

    let got = db
        .videos_with_status(&[VideoStatus::Downloading])
        .await
        .unwrap();
    assert_eq!(got.len(), 1);
    assert_eq!(got[0].id, a);
    assert_eq!(got[0].torrents.len(), 1);

    let got = db
        .videos_with_status(&[VideoStatus::Downloading, VideoStatus::Exporting])
        .await
        .unwrap();
    assert_eq!(got.len(), 2);
    assert!(db.videos_with_status(&[]).await.unwrap().is_empty());
}

#[tokio::test]
async fn queue_order_is_persisted() {
    let db = open_memory().await.unwrap();
    let a = db.insert_video(&movie("a")).await.unwrap();
    let b = db.insert_video(&movie("b")).await.unwrap();
    db.set_video_queue_order(&[b, a]).await.unwrap();
    let listed: Vec<_> = db.list_videos().await.unwrap().iter().map(|v| v.id).collect();
    assert_eq!(listed, [b, a]);

    db.add_torrents(a, &[torrent("t1", 1), torrent("t2", 1)])
        .await
        .unwrap();
    let ts = db.torrents_for_video(a).await.unwrap();
    db.set_torrent_queue_order(&[ts[1].id, ts[0].id]).await.unwrap();
    assert_eq!(db.get_torrent(ts[1].id).await.unwrap().unwrap().queue_index, Some(0));
    assert_eq!(db.get_torrent(ts[0].id).await.unwrap().unwrap().queue_index, Some(1));
}

#[tokio::test]
async fn next_job_orders_by_due_time_and_honours_exclusions() {
    let db = open_memory().await.unwrap();
    let v = db.insert_video(&movie("a")).await.unwrap();
    let late = db.insert_job(&job(JobKind::MonitorDownload, v, 500)).await.unwrap();
    let early = db.insert_job(&job(JobKind::SearchForRelease, v, 100)).await.unwrap();

    assert_eq!(db.next_job(&[]).await.unwrap().unwrap().id, early);
    assert_eq!(db.next_job(&[early]).await.unwrap().unwrap().id, late);
    assert!(db.next_job(&[early, late]).await.unwrap().is_none());

    db.mark_done(early).await.unwrap();
    assert_eq!(db.next_job(&[]).await.unwrap().unwrap().id, late);
}

#[tokio::test]
async fn mark_running_claims_once_and_counts_runs() {
    let db = open_memory().await.unwrap();
    let v = db.insert_video(&movie("a")).await.unwrap();
    let id = db.insert_job(&job(JobKind::AddTorrent, v, 0)).await.unwrap();

    let claimed = db.mark_running(id, 1_000).await.unwrap().expect("claimed");
    assert_eq!(claimed.status, JobStatus::Running);
    assert_eq!(claimed.run_count, 1);
    assert!(db.mark_running(id, 1_000).await.unwrap().is_none());
    assert!(db.next_job(&[]).await.unwrap().is_none());

    let mut again = claimed.clone();
    again.interval_ms = 2_000;
    again.next_run_at = 42;
    db.reschedule(&again).await.unwrap();
    let j = db.get_job(id).await.unwrap().unwrap();
    assert_eq!(j.status, JobStatus::Pending);
    assert_eq!(j.interval_ms, 2_000);
    assert_eq!(j.next_run_at, 42);
    assert_eq!(db.mark_running(id, 1_000).await.unwrap().unwrap().run_count, 2);
}

#[tokio::test]
async fn mark_running_leaves_jobs_that_are_not_due() {
    let db = open_memory().await.unwrap();
    let v = db.insert_video(&movie("a")).await.unwrap();
    let id = db.insert_job(&job(JobKind::SearchForRelease, v, 5_000)).await.unwrap();

    assert!(db.mark_running(id, 4_999).await.unwrap().is_none());
    let j = db.get_job(id).await.unwrap().unwrap();
    assert_eq!(j.status, JobStatus::Pending);
    assert_eq!(j.run_count, 0);

    assert_eq!(db.mark_running(id, 5_000).await.unwrap().unwrap().run_count, 1);
}

#[tokio::test]
async fn running_jobs_are_reset_after_crash() {
    let db = open_memory().await.unwrap();
    let v = db.insert_video(&movie("a")).await.unwrap();
    let id = db.insert_job(&job(JobKind::DeleteVideo, v, 0)).await.unwrap();
    db.mark_running(id, 1_000).await.unwrap();

    let n = db.mark_all_running_as_pending().await.unwrap();
    assert_eq!(n, 1);
    assert_eq!(db.get_job(id).await.unwrap().unwrap().status, JobStatus::Pending);
    assert_eq!(db.mark_all_running_as_pending().await.unwrap(), 0);
}

#[tokio::test]
async fn unknown_stored_values_fail_to_load() {
    let db = open_memory().await.unwrap();
    let v = db.insert_video(&movie("a")).await.unwrap();
    db.add_torrents(v, &[torrent("abc", 100)]).await.unwrap();
    let j = db.insert_job(&job(JobKind::AddTorrent, v, 0)).await.unwrap();

    sqlx::query("UPDATE torrents SET status = 'seeding'")
        .execute(&db.pool)
        .await
        .unwrap();
    let err = db.torrents_for_video(v).await.unwrap_err();
    assert!(format!("{err:#}").contains("seeding"), "{err:#}");

    sqlx::query("UPDATE videos SET status = 'archived'")
        .execute(&db.pool)
        .await
        .unwrap();
    let err = db.get_video(v).await.unwrap_err();
    assert!(format!("{err:#}").contains("archived"), "{err:#}");
    // A corrupt row blocks re-queueing instead of being replaced.
    assert!(db.insert_video(&movie("a")).await.is_err());

    sqlx::query("UPDATE jobs SET policy = 'sometimes'")
        .execute(&db.pool)
        .await
        .unwrap();
    assert!(db.get_job(j).await.is_err());
}
