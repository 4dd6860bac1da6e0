//! `vidq run` – the daemon.

use anyhow::Result;
use std::sync::Arc;
use vidq_core::config::VidqConfig;
use vidq_core::daemon::{Collaborators, Daemon};
use vidq_core::store::Db;
use vidq_core::supervisor::ProcessSpawner;

pub async fn run_daemon(db: Db, cfg: &VidqConfig) -> Result<()> {
    let spawner = Arc::new(ProcessSpawner::from_config(&cfg.engine));
    let daemon = Daemon::new(cfg, db, spawner, Collaborators::defaults(cfg));
    println!(
        "vidq running: engine {:?}, {} slot(s), {} MB under {}. Ctrl-C to stop.",
        cfg.engine.command,
        cfg.max_downloads,
        cfg.max_memory_mb,
        cfg.download_root.display()
    );
    daemon
        .run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::warn!("cannot listen for Ctrl-C: {}", e);
                std::future::pending::<()>().await;
            }
        })
        .await
}
