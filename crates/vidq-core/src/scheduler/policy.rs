use std::time::Duration;

use crate::config::JobsConfig;
use crate::store::{Job, JobKind, NewJob, SchedulePolicy, VideoId};

/// Floor for retry intervals so a misconfigured job cannot spin.
const MIN_RETRY: Duration = Duration::from_secs(1);

/// Decision returned after a failed run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Do not retry; the job ends as done.
    NoRetry,
    /// Run again after the given interval, which also becomes the stored interval.
    RetryAfter(Duration),
}

/// Timing for one kind of job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JobTiming {
    pub policy: SchedulePolicy,
    /// Delay before the first run.
    pub initial_delay: Duration,
    /// Interval used for the first retry.
    pub interval: Duration,
}

/// Per-kind schedule table plus the backoff cap.
#[derive(Debug, Clone)]
pub struct SchedulePlan {
    pub search_interval: Duration,
    pub monitor_interval: Duration,
    pub delete_after: Duration,
    pub max_backoff: Duration,
}

impl Default for SchedulePlan {
    fn default() -> Self {
        Self::from_config(&JobsConfig::default())
    }
}

impl SchedulePlan {
    pub fn from_config(cfg: &JobsConfig) -> Self {
        Self {
            search_interval: Duration::from_secs(cfg.search_interval_secs),
            monitor_interval: Duration::from_secs(cfg.monitor_interval_secs),
            delete_after: Duration::from_secs(cfg.delete_after_secs),
            max_backoff: Duration::from_secs(cfg.max_backoff_secs),
        }
    }

    pub fn timing(&self, kind: JobKind) -> JobTiming {
        match kind {
            // Search right away, then back off while nothing turns up.
            JobKind::SearchForRelease => JobTiming {
                policy: SchedulePolicy::Backoff,
                initial_delay: Duration::ZERO,
                interval: self.search_interval,
            },
            JobKind::AddTorrent => JobTiming {
                policy: SchedulePolicy::Once,
                initial_delay: Duration::ZERO,
                interval: Duration::ZERO,
            },
            JobKind::MonitorDownload => JobTiming {
                policy: SchedulePolicy::Repeated,
                initial_delay: self.monitor_interval,
                interval: self.monitor_interval,
            },
            JobKind::DeleteVideo => JobTiming {
                policy: SchedulePolicy::Once,
                initial_delay: self.delete_after,
                interval: self.delete_after,
            },
        }
    }

    /// Build the row for a new job of `kind`, due relative to `now` (Unix ms).
    pub fn new_job(&self, kind: JobKind, video_id: VideoId, now: i64) -> NewJob {
        let timing = self.timing(kind);
        NewJob {
            kind,
            video_id,
            policy: timing.policy,
            interval_ms: timing.interval.as_millis() as i64,
            next_run_at: now + timing.initial_delay.as_millis() as i64,
        }
    }

    /// What to do after `job` failed (returned false or errored).
    pub fn decide(&self, job: &Job) -> RetryDecision {
        let current = Duration::from_millis(job.interval_ms.max(0) as u64);
        match job.policy {
            SchedulePolicy::Once => RetryDecision::NoRetry,
            SchedulePolicy::Repeated => RetryDecision::RetryAfter(current.max(MIN_RETRY)),
            SchedulePolicy::Backoff => {
                let doubled = current.max(MIN_RETRY).saturating_mul(2);
                RetryDecision::RetryAfter(doubled.min(self.max_backoff.max(MIN_RETRY)))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::JobStatus;

    fn job(policy: SchedulePolicy, interval: Duration) -> Job {
        Job {
            id: 1,
            kind: JobKind::SearchForRelease,
            video_id: 1,
            policy,
            interval_ms: interval.as_millis() as i64,
            run_count: 1,
            status: JobStatus::Running,
            next_run_at: 0,
        }
    }

    fn retry_after(d: RetryDecision) -> Duration {
        match d {
            RetryDecision::RetryAfter(d) => d,
            RetryDecision::NoRetry => panic!("expected retry"),
        }
    }

    #[test]
    fn once_is_not_retried() {
        let plan = SchedulePlan::default();
        assert_eq!(
            plan.decide(&job(SchedulePolicy::Once, Duration::from_secs(60))),
            RetryDecision::NoRetry
        );
    }

    #[test]
    fn repeated_keeps_its_interval() {
        let plan = SchedulePlan::default();
        let d = retry_after(plan.decide(&job(SchedulePolicy::Repeated, Duration::from_secs(300))));
        assert_eq!(d, Duration::from_secs(300));
    }

    #[test]
    fn backoff_doubles_per_failure_and_is_capped() {
        let plan = SchedulePlan::default();
        let initial = Duration::from_secs(1800);
        let mut j = job(SchedulePolicy::Backoff, initial);

        let first = retry_after(plan.decide(&j));
        j.interval_ms = first.as_millis() as i64;
        let second = retry_after(plan.decide(&j));
        assert!(second >= initial * 2);
        assert!(second > first);

        j.interval_ms = Duration::from_secs(20 * 3600).as_millis() as i64;
        assert_eq!(retry_after(plan.decide(&j)), Duration::from_secs(24 * 3600));
    }

    #[test]
    fn new_job_timing_per_kind() {
        let plan = SchedulePlan::default();
        let search = plan.new_job(JobKind::SearchForRelease, 7, 1_000);
        assert_eq!(search.policy, SchedulePolicy::Backoff);
        assert_eq!(search.next_run_at, 1_000);

        let delete = plan.new_job(JobKind::DeleteVideo, 7, 1_000);
        assert_eq!(delete.policy, SchedulePolicy::Once);
        assert_eq!(
            delete.next_run_at,
            1_000 + plan.delete_after.as_millis() as i64
        );

        let monitor = plan.new_job(JobKind::MonitorDownload, 7, 0);
        assert_eq!(monitor.policy, SchedulePolicy::Repeated);
        assert_eq!(monitor.interval_ms, plan.monitor_interval.as_millis() as i64);
    }
}
