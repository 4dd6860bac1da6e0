//! Torrent rows.

use anyhow::{Context, Result};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use super::db::{now_millis, Db};
use super::types::{NewTorrent, Torrent, TorrentId, TorrentStatus, VideoId};

const TORRENT_COLUMNS: &str =
    "id, video_id, hash, name, size_mb, quality, rank, status, queue_index";

fn torrent_from_row(row: &SqliteRow) -> Result<Torrent> {
    let status: String = row.get("status");
    let status = TorrentStatus::from_str(&status)
        .with_context(|| format!("unknown torrent status {status:?}"))?;
    Ok(Torrent {
        id: row.get("id"),
        video_id: row.get("video_id"),
        hash: row.get("hash"),
        name: row.get("name"),
        size_mb: row.get("size_mb"),
        quality: row.get("quality"),
        rank: row.get("rank"),
        status,
        queue_index: row.get("queue_index"),
    })
}

impl Db {
    /// Attach candidate torrents to a video in the given (best first) order.
    /// Hashes the video already has are skipped. Returns how many were added.
    pub async fn add_torrents(&self, video_id: VideoId, torrents: &[NewTorrent]) -> Result<u64> {
        let now = now_millis();
        let mut tx = self.pool.begin().await?;
        let next_rank: i64 =
            sqlx::query("SELECT COALESCE(MAX(rank) + 1, 0) AS next FROM torrents WHERE video_id = ?1")
                .bind(video_id)
                .fetch_one(&mut *tx)
                .await?
                .get("next");

        let mut added = 0;
        for (offset, t) in torrents.iter().enumerate() {
            let r = sqlx::query(
                r#"
                INSERT OR IGNORE INTO torrents (
                    video_id, hash, name, size_mb, quality, rank,
                    status, queue_index, created_at, updated_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, NULL, ?8, ?9)
                "#,
            )
            .bind(video_id)
            .bind(&t.hash)
            .bind(&t.name)
            .bind(t.size_mb)
            .bind(&t.quality)
            .bind(next_rank + offset as i64)
            .bind(TorrentStatus::Pending.as_str())
            .bind(now)
            .bind(now)
            .execute(&mut *tx)
            .await?;
            added += r.rows_affected();
        }
        tx.commit().await?;
        Ok(added)
    }

    pub async fn get_torrent(&self, id: TorrentId) -> Result<Option<Torrent>> {
        let row = sqlx::query(&format!("SELECT {TORRENT_COLUMNS} FROM torrents WHERE id = ?1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(torrent_from_row).transpose()
    }

    pub async fn torrents_for_video(&self, video_id: VideoId) -> Result<Vec<Torrent>> {
        let rows = sqlx::query(&format!(
            "SELECT {TORRENT_COLUMNS} FROM torrents WHERE video_id = ?1 ORDER BY rank ASC, id ASC"
        ))
        .bind(video_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(torrent_from_row).collect()
    }

    pub async fn set_torrent_status(&self, id: TorrentId, status: TorrentStatus) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE torrents
            SET status = ?1,
                updated_at = ?2
            WHERE id = ?3
            "#,
        )
        .bind(status.as_str())
        .bind(now_millis())
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Persist display order: `ids[i]` gets queue index `i`.
    pub async fn set_torrent_queue_order(&self, ids: &[TorrentId]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for (index, id) in ids.iter().enumerate() {
            sqlx::query("UPDATE torrents SET queue_index = ?1 WHERE id = ?2")
                .bind(index as i64)
                .bind(*id)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(())
    }
}
