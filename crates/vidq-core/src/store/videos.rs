//! Video rows: insert with duplicate handling, status lookups, ordering, delete.

use anyhow::{Context, Result};
use sqlx::sqlite::SqliteRow;
use sqlx::{QueryBuilder, Row, Sqlite, SqliteConnection};

use super::db::{now_millis, Db};
use super::types::{Media, NewVideo, Video, VideoBusy, VideoId, VideoStatus};

const VIDEO_COLUMNS: &str = "id, media_key, external_id, title, media_kind, season, episode, \
                             status, queue_index, requester_id, created_at";

fn video_from_row(row: &SqliteRow) -> Result<Video> {
    let kind: String = row.get("media_kind");
    let media = Media::from_columns(&kind, row.get("season"), row.get("episode"))
        .with_context(|| format!("bad media columns for {kind:?}"))?;
    let status: String = row.get("status");
    Ok(Video {
        id: row.get("id"),
        media_key: row.get("media_key"),
        external_id: row.get("external_id"),
        title: row.get("title"),
        media,
        status: parse_status(&status)?,
        queue_index: row.get("queue_index"),
        requester_id: row.get("requester_id"),
        created_at: row.get("created_at"),
        torrents: Vec::new(),
    })
}

fn parse_status(s: &str) -> Result<VideoStatus> {
    VideoStatus::from_str(s).with_context(|| format!("unknown video status {s:?}"))
}

/// Delete a video together with everything it owns.
async fn delete_video_rows(conn: &mut SqliteConnection, id: VideoId) -> Result<()> {
    sqlx::query("DELETE FROM jobs WHERE video_id = ?1")
        .bind(id)
        .execute(&mut *conn)
        .await?;
    sqlx::query("DELETE FROM torrents WHERE video_id = ?1")
        .bind(id)
        .execute(&mut *conn)
        .await?;
    sqlx::query("DELETE FROM videos WHERE id = ?1")
        .bind(id)
        .execute(&mut *conn)
        .await?;
    Ok(())
}

impl Db {
    /// Track a new video in `identified` status.
    ///
    /// If the same movie/episode is already tracked, the old row (and its
    /// torrents and jobs) is replaced, unless it is downloading or exporting:
    /// then the call fails with [`VideoBusy`].
    pub async fn insert_video(&self, video: &NewVideo) -> Result<VideoId> {
        let media_key = video.media_key();
        let now = now_millis();
        let mut tx = self.pool.begin().await?;

        let existing = sqlx::query("SELECT id, status FROM videos WHERE media_key = ?1")
            .bind(&media_key)
            .fetch_optional(&mut *tx)
            .await?;
        if let Some(row) = existing {
            let old_id: i64 = row.get("id");
            let status = parse_status(row.get::<String, _>("status").as_str())?;
            if status.is_busy() {
                tx.rollback().await?;
                return Err(VideoBusy {
                    media_key,
                    video_id: old_id,
                    status,
                }
                .into());
            }
            tracing::info!(video = old_id, "replacing previously tracked {}", media_key);
            delete_video_rows(&mut *tx, old_id).await?;
        }

        let id = sqlx::query(
            r#"
            INSERT INTO videos (
                media_key, external_id, title, media_kind, season, episode,
                status, queue_index, requester_id, created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, NULL, ?8, ?9, ?10)
            "#,
        )
        .bind(&media_key)
        .bind(&video.external_id)
        .bind(&video.title)
        .bind(video.media.kind_str())
        .bind(video.media.is_episode().then(|| video.media.season() as i64))
        .bind(video.media.is_episode().then(|| video.media.episode() as i64))
        .bind(VideoStatus::Identified.as_str())
        .bind(&video.requester_id)
        .bind(now)
        .bind(now)
        .execute(&mut *tx)
        .await?
        .last_insert_rowid();

        tx.commit().await?;
        Ok(id)
    }

    /// Fetch one video with its torrents.
    pub async fn get_video(&self, id: VideoId) -> Result<Option<Video>> {
        let row = sqlx::query(&format!("SELECT {VIDEO_COLUMNS} FROM videos WHERE id = ?1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        let Some(row) = row else {
            return Ok(None);
        };
        let mut video = video_from_row(&row)?;
        video.torrents = self.torrents_for_video(id).await?;
        Ok(Some(video))
    }

    /// All videos in any of `statuses`, with torrents, oldest first.
    pub async fn videos_with_status(&self, statuses: &[VideoStatus]) -> Result<Vec<Video>> {
        if statuses.is_empty() {
            return Ok(Vec::new());
        }
        let mut qb: QueryBuilder<Sqlite> =
            QueryBuilder::new(format!("SELECT {VIDEO_COLUMNS} FROM videos WHERE status IN ("));
        let mut sep = qb.separated(", ");
        for status in statuses {
            sep.push_bind(status.as_str());
        }
        sep.push_unseparated(") ORDER BY id ASC");
        let rows = qb.build().fetch_all(&self.pool).await?;

        let mut out = Vec::with_capacity(rows.len());
        for row in &rows {
            let mut video = video_from_row(row)?;
            video.torrents = self.torrents_for_video(video.id).await?;
            out.push(video);
        }
        Ok(out)
    }

    /// All videos in display order (queued ones by queue index, then by id).
    pub async fn list_videos(&self) -> Result<Vec<Video>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {VIDEO_COLUMNS}
            FROM videos
            ORDER BY queue_index IS NULL ASC, queue_index ASC, id ASC
            "#
        ))
        .fetch_all(&self.pool)
        .await?;
        let mut out = Vec::with_capacity(rows.len());
        for row in &rows {
            let mut video = video_from_row(row)?;
            video.torrents = self.torrents_for_video(video.id).await?;
            out.push(video);
        }
        Ok(out)
    }

    pub async fn set_video_status(&self, id: VideoId, status: VideoStatus) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE videos
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

    /// Persist display order: `ids[i]` gets queue index `i`. Used only for UI ordering.
    pub async fn set_video_queue_order(&self, ids: &[VideoId]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for (index, id) in ids.iter().enumerate() {
            sqlx::query("UPDATE videos SET queue_index = ?1 WHERE id = ?2")
                .bind(index as i64)
                .bind(*id)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    /// Permanently remove a video and its torrents and jobs.
    ///
    /// Downloaded data is handled separately by higher layers.
    pub async fn delete_video(&self, id: VideoId) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        delete_video_rows(&mut *tx, id).await?;
        tx.commit().await?;
        Ok(())
    }
}
