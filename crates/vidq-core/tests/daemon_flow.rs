//! End-to-end: the daemon drives a local engine over the line protocol, from
//! queued video to exported file.

mod common;

use common::{wait_until, LocalEngine};
use std::sync::Arc;
use tempfile::tempdir;
use tokio::sync::oneshot;
use vidq_core::config::VidqConfig;
use vidq_core::daemon::{detached_service, Collaborators, Daemon};
use vidq_core::store::{Db, JobKind, JobStatus, Media, NewTorrent, NewVideo, VideoStatus};
use vidq_core::supervisor::protocol::EngineFn;

fn config(root: &std::path::Path) -> VidqConfig {
    let mut cfg = VidqConfig::default();
    cfg.download_root = root.join("downloads");
    cfg.export_root = root.join("library");
    cfg.max_memory_mb = 1_000;
    cfg.jobs.rescan_interval_secs = 1;
    cfg
}

fn bunny() -> NewVideo {
    NewVideo {
        external_id: "tt1254207".to_string(),
        title: "Big Buck Bunny".to_string(),
        media: Media::Movie,
        requester_id: Some("42".to_string()),
    }
}

fn torrent(hash: &str) -> NewTorrent {
    NewTorrent {
        hash: hash.to_string(),
        name: "Big.Buck.Bunny.1080p.mkv".to_string(),
        size_mb: 10,
        quality: Some("1080p".to_string()),
    }
}

async fn video_status(db: &Db, id: i64) -> Option<VideoStatus> {
    db.get_video(id).await.unwrap().map(|v| v.status)
}

#[tokio::test]
async fn queued_offline_then_downloaded_and_exported() {
    let dir = tempdir().unwrap();
    let cfg = config(dir.path());
    let db = Db::open_at(dir.path().join("vidq.db")).await.unwrap();

    // Queued while no daemon runs, the way `vidq add` does it.
    let queued = detached_service(&cfg, db.clone())
        .queue(&bunny(), &[torrent("abc123")])
        .await
        .unwrap();
    assert_eq!(queued.kind, JobKind::AddTorrent);

    let engine = LocalEngine::default();
    let daemon = Arc::new(Daemon::new(
        &cfg,
        db.clone(),
        Arc::new(engine.clone()),
        Collaborators::defaults(&cfg),
    ));
    let (stop_tx, stop_rx) = oneshot::channel::<()>();
    let runner = {
        let daemon = Arc::clone(&daemon);
        tokio::spawn(async move {
            daemon
                .run_until(async {
                    let _ = stop_rx.await;
                })
                .await
        })
    };

    let id = queued.video_id;
    wait_until("video completed", || {
        let db = db.clone();
        async move { video_status(&db, id).await == Some(VideoStatus::Completed) }
    })
    .await;

    let exported = cfg.export_root.join("Big Buck Bunny").join("abc123.mkv");
    assert!(exported.exists(), "missing {}", exported.display());
    assert!(!cfg.download_root.join(id.to_string()).join("abc123").exists());

    let jobs = db.jobs_for_video(id).await.unwrap();
    let delete = jobs
        .iter()
        .find(|j| j.kind == JobKind::DeleteVideo)
        .expect("deletion scheduled");
    assert_eq!(delete.status, JobStatus::Pending);

    let requests = engine.requests();
    assert_eq!(requests[0].func, EngineFn::Constructor);
    let downloads = engine.calls(EngineFn::Download);
    assert_eq!(downloads.len(), 1);
    assert_eq!(downloads[0].args[0], "abc123");

    stop_tx.send(()).unwrap();
    runner.await.unwrap().unwrap();
    assert!(!daemon.supervisor().is_running());
}

#[tokio::test]
async fn removal_from_another_process_stops_the_transfer() {
    let dir = tempdir().unwrap();
    let cfg = config(dir.path());
    let db = Db::open_at(dir.path().join("vidq.db")).await.unwrap();

    let engine = LocalEngine::holding();
    let daemon = Arc::new(Daemon::new(
        &cfg,
        db.clone(),
        Arc::new(engine.clone()),
        Collaborators::defaults(&cfg),
    ));
    let (stop_tx, stop_rx) = oneshot::channel::<()>();
    let runner = {
        let daemon = Arc::clone(&daemon);
        tokio::spawn(async move {
            daemon
                .run_until(async {
                    let _ = stop_rx.await;
                })
                .await
        })
    };
    let sup = daemon.supervisor().clone();
    wait_until("engine up", || {
        let sup = sup.clone();
        async move { sup.is_running() }
    })
    .await;

    let queued = daemon
        .service()
        .queue(&bunny(), &[torrent("def456")])
        .await
        .unwrap();
    wait_until("download dispatched", || {
        let engine = engine.clone();
        async move { engine.calls(EngineFn::Download).len() == 1 }
    })
    .await;
    assert_eq!(
        video_status(&db, queued.video_id).await,
        Some(VideoStatus::Downloading)
    );

    // `vidq remove` runs without the engine.
    assert!(detached_service(&cfg, db.clone())
        .remove(queued.video_id)
        .await
        .unwrap());
    assert_eq!(video_status(&db, queued.video_id).await, None);

    wait_until("orphaned transfer stopped", || {
        let engine = engine.clone();
        async move { engine.calls(EngineFn::StopDownload).len() == 1 }
    })
    .await;
    assert_eq!(engine.calls(EngineFn::StopDownload)[0].args[0], "def456");
    assert!(daemon.supervisor().active_hashes().is_empty());

    stop_tx.send(()).unwrap();
    runner.await.unwrap().unwrap();
}
