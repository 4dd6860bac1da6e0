//! Persisted job scheduler.
//!
//! Jobs live in the `jobs` table and are ordered by `next_run_at`. One timer
//! is armed for the soonest pending job; when it fires the job's handler runs
//! and the job is either finished or rescheduled according to its policy
//! (`once`, `repeated`, `backoff`). Jobs left `running` by a crash are reset
//! to `pending` on start.

mod policy;
mod run;
mod timer;


use async_trait::async_trait;

use crate::store::VideoId;

pub use policy::{JobTiming, RetryDecision, SchedulePlan};
pub use run::JobScheduler;

/// Work performed when a job of one kind comes due.
///
/// Return `Ok(true)` when the job is finished. `Ok(false)` and `Err(_)` both
/// send the job through its retry policy.
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn run(&self, video_id: VideoId, run_count: i64) -> anyhow::Result<bool>;
}
