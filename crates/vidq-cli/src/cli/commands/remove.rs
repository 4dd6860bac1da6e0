//! `vidq remove <id>` – forget a video and delete its data.
//!
//! A running daemon notices on its next admission pass and stops the transfer.

use anyhow::{bail, Result};
use vidq_core::config::VidqConfig;
use vidq_core::daemon::detached_service;
use vidq_core::store::Db;

pub async fn run_remove(db: Db, cfg: &VidqConfig, id: i64) -> Result<()> {
    if !detached_service(cfg, db).remove(id).await? {
        bail!("no video with id {id}");
    }
    println!("Removed video {id}");
    Ok(())
}
