//! Job rows: insert, due-order lookup, state transitions and crash recovery.

use anyhow::{Context, Result};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use super::db::{now_millis, Db};
use super::types::{Job, JobId, JobKind, JobStatus, NewJob, SchedulePolicy, VideoId};

const JOB_COLUMNS: &str =
    "id, kind, video_id, policy, interval_ms, run_count, status, next_run_at";

fn job_from_row(row: &SqliteRow) -> Result<Job> {
    let kind_str: String = row.get("kind");
    let kind = JobKind::from_str(&kind_str)
        .with_context(|| format!("unknown job kind {kind_str:?}"))?;
    let policy: String = row.get("policy");
    let policy = SchedulePolicy::from_str(&policy)
        .with_context(|| format!("unknown schedule policy {policy:?}"))?;
    let status: String = row.get("status");
    let status =
        JobStatus::from_str(&status).with_context(|| format!("unknown job status {status:?}"))?;
    Ok(Job {
        id: row.get("id"),
        kind,
        video_id: row.get("video_id"),
        policy,
        interval_ms: row.get("interval_ms"),
        run_count: row.get("run_count"),
        status,
        next_run_at: row.get("next_run_at"),
    })
}

impl Db {
    /// Insert a pending job.
    pub async fn insert_job(&self, job: &NewJob) -> Result<JobId> {
        let now = now_millis();
        let id = sqlx::query(
            r#"
            INSERT INTO jobs (
                kind, video_id, policy, interval_ms, run_count,
                status, next_run_at, created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, 0, ?5, ?6, ?7, ?8)
            "#,
        )
        .bind(job.kind.as_str())
        .bind(job.video_id)
        .bind(job.policy.as_str())
        .bind(job.interval_ms)
        .bind(JobStatus::Pending.as_str())
        .bind(job.next_run_at)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?
        .last_insert_rowid();
        Ok(id)
    }

    /// The pending job due soonest, skipping `exclude` (the one already armed).
    pub async fn next_job(&self, exclude: &[JobId]) -> Result<Option<Job>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {JOB_COLUMNS}
            FROM jobs
            WHERE status = 'pending'
            ORDER BY next_run_at ASC, id ASC
            LIMIT ?1
            "#
        ))
        .bind(exclude.len() as i64 + 1)
        .fetch_all(&self.pool)
        .await?;

        for row in &rows {
            let job = job_from_row(row)?;
            if !exclude.contains(&job.id) {
                return Ok(Some(job));
            }
        }
        Ok(None)
    }

    pub async fn get_job(&self, id: JobId) -> Result<Option<Job>> {
        let row = sqlx::query(&format!("SELECT {JOB_COLUMNS} FROM jobs WHERE id = ?1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(job_from_row).transpose()
    }

    /// All jobs, soonest first (done jobs last).
    pub async fn list_jobs(&self) -> Result<Vec<Job>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {JOB_COLUMNS}
            FROM jobs
            ORDER BY status = 'done' ASC, next_run_at ASC, id ASC
            "#
        ))
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(job_from_row).collect()
    }

    pub async fn jobs_for_video(&self, video_id: VideoId) -> Result<Vec<Job>> {
        let rows = sqlx::query(&format!(
            "SELECT {JOB_COLUMNS} FROM jobs WHERE video_id = ?1 ORDER BY id ASC"
        ))
        .bind(video_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(job_from_row).collect()
    }

    /// Claim a pending job that is due at `now`: `pending → running`, bumping
    /// `run_count`. Returns the refreshed row, or None if the job is gone, no
    /// longer pending, or not due yet.
    pub async fn mark_running(&self, id: JobId, now: i64) -> Result<Option<Job>> {
        let r = sqlx::query(
            r#"
            UPDATE jobs
            SET status = 'running',
                run_count = run_count + 1,
                updated_at = ?1
            WHERE id = ?2 AND status = 'pending' AND next_run_at <= ?1
            "#,
        )
        .bind(now)
        .bind(id)
        .execute(&self.pool)
        .await?;
        if r.rows_affected() == 0 {
            return Ok(None);
        }
        self.get_job(id).await
    }

    pub async fn mark_done(&self, id: JobId) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE jobs
            SET status = 'done',
                updated_at = ?1
            WHERE id = ?2
            "#,
        )
        .bind(now_millis())
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Persist a new interval and due time and put the job back to pending.
    pub async fn reschedule(&self, job: &Job) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE jobs
            SET status = 'pending',
                interval_ms = ?1,
                next_run_at = ?2,
                updated_at = ?3
            WHERE id = ?4
            "#,
        )
        .bind(job.interval_ms)
        .bind(job.next_run_at)
        .bind(now_millis())
        .bind(job.id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Normalize any job left in `running` to `pending` (e.g. after a crash).
    /// Call before scheduling so stranded jobs are picked up again.
    /// Returns the number of jobs reset.
    pub async fn mark_all_running_as_pending(&self) -> Result<u64> {
        let r = sqlx::query(
            r#"
            UPDATE jobs
            SET status = 'pending',
                updated_at = ?1
            WHERE status = 'running'
            "#,
        )
        .bind(now_millis())
        .execute(&self.pool)
        .await?;
        Ok(r.rows_affected())
    }
}
