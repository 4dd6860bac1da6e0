//! The job scheduler: arms one timer for the soonest pending job, runs due
//! jobs through their handlers, and applies the reschedule policy.

use anyhow::Result;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

use crate::single_flight::SingleFlight;
use crate::store::{now_millis, Db, Job, JobId, JobKind, VideoId};

use super::policy::{RetryDecision, SchedulePlan};
use super::timer::sleep_until_millis;
use super::JobHandler;

type BoxFuture = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

struct Armed {
    job_id: JobId,
    due: i64,
    timer: JoinHandle<()>,
}

struct Inner {
    db: Db,
    plan: SchedulePlan,
    handlers: RwLock<HashMap<JobKind, Arc<dyn JobHandler>>>,
    flight: Arc<SingleFlight>,
    armed: Mutex<Option<Armed>>,
    /// Timers are only armed between `start` and `shutdown`.
    running: AtomicBool,
}

/// Persisted, time-ordered job runner. Cheap to clone; all clones share state.
#[derive(Clone)]
pub struct JobScheduler {
    inner: Arc<Inner>,
}

/// Outcome of one handler invocation.
enum RunOutcome {
    Finished,
    Failed,
}

impl JobScheduler {
    pub fn new(db: Db, plan: SchedulePlan) -> Self {
        Self {
            inner: Arc::new(Inner {
                db,
                plan,
                handlers: RwLock::new(HashMap::new()),
                flight: Arc::new(SingleFlight::new()),
                armed: Mutex::new(None),
                running: AtomicBool::new(false),
            }),
        }
    }

    /// Install the handler for `kind`, replacing any previous one.
    pub fn register(&self, kind: JobKind, handler: Arc<dyn JobHandler>) {
        self.inner.handlers.write().insert(kind, handler);
    }

    /// Recover jobs stranded in `running` by an unclean shutdown, then arm the
    /// first timer. Returns the number of recovered jobs.
    ///
    /// Until this is called the scheduler only persists jobs, so processes
    /// that merely enqueue work never execute it.
    pub async fn start(&self) -> Result<u64> {
        let recovered = self.inner.db.mark_all_running_as_pending().await?;
        if recovered > 0 {
            tracing::info!("recovered {} job(s) from previous run", recovered);
        }
        self.inner.running.store(true, Ordering::Release);
        self.ping().await;
        Ok(recovered)
    }

    /// Persist a job for `video_id` with the timing of its kind, then re-evaluate.
    pub async fn add_job(&self, kind: JobKind, video_id: VideoId) -> Result<JobId> {
        let job = self.inner.plan.new_job(kind, video_id, now_millis());
        let id = self.inner.db.insert_job(&job).await?;
        tracing::debug!(job = id, video = video_id, "scheduled {} at {}", kind, job.next_run_at);
        self.ping().await;
        Ok(id)
    }

    /// Re-evaluate which job runs next. Overlapping calls coalesce.
    pub async fn ping(&self) {
        if !self.is_running() {
            return;
        }
        let this = self.clone();
        self.inner
            .flight
            .run(move || {
                let this = this.clone();
                async move {
                    if let Err(e) = this.evaluate().await {
                        tracing::warn!("job scheduling pass failed: {:#}", e);
                    }
                }
            })
            .await;
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::Acquire)
    }

    /// Cancel the armed timer and stop arming new ones. Jobs already
    /// executing run to completion.
    pub fn shutdown(&self) {
        self.inner.running.store(false, Ordering::Release);
        if let Some(armed) = self.inner.armed.lock().take() {
            armed.timer.abort();
        }
    }

    /// Id of the job whose timer is currently armed, if any.
    pub fn armed_job(&self) -> Option<JobId> {
        self.inner.armed.lock().as_ref().map(|a| a.job_id)
    }

    async fn evaluate(&self) -> Result<()> {
        let armed = self
            .inner
            .armed
            .lock()
            .as_ref()
            .map(|a| (a.job_id, a.due));
        let exclude: Vec<JobId> = armed.iter().map(|(id, _)| *id).collect();

        let Some(next) = self.inner.db.next_job(&exclude).await? else {
            return Ok(());
        };
        if let Some((_, due)) = armed {
            if due <= next.next_run_at {
                return Ok(());
            }
        }

        let this = self.clone();
        let job_id = next.id;
        let due = next.next_run_at;
        let timer = tokio::spawn(async move {
            sleep_until_millis(due).await;
            this.fire(job_id).await;
        });
        let previous = self.inner.armed.lock().replace(Armed { job_id, due, timer });
        if let Some(previous) = previous {
            previous.timer.abort();
        }
        tracing::debug!(job = job_id, "armed {} for {}", next.kind, due);
        Ok(())
    }

    /// Boxed so the evaluate -> timer -> fire -> ping cycle has a nameable type.
    ///
    /// The job is claimed before the re-evaluation so the next pass cannot
    /// arm it a second time for the same occurrence.
    fn fire(&self, job_id: JobId) -> BoxFuture {
        let this = self.clone();
        Box::pin(async move {
            {
                let mut slot = this.inner.armed.lock();
                if slot.as_ref().map(|a| a.job_id) == Some(job_id) {
                    // Dropping our own handle detaches this task rather than aborting it.
                    *slot = None;
                }
            }
            match this.inner.db.mark_running(job_id, now_millis()).await {
                Ok(Some(job)) => {
                    let runner = this.clone();
                    tokio::spawn(async move {
                        if let Err(e) = runner.execute(job).await {
                            tracing::warn!(job = job_id, "job execution failed: {:#}", e);
                        }
                        runner.ping().await;
                    });
                }
                Ok(None) => tracing::debug!(job = job_id, "already claimed or not due"),
                Err(e) => tracing::warn!(job = job_id, "failed to claim job: {:#}", e),
            }
            this.ping().await;
        })
    }

    async fn execute(&self, mut job: Job) -> Result<()> {
        let db = &self.inner.db;
        if db.get_video(job.video_id).await?.is_none() {
            tracing::info!(job = job.id, video = job.video_id, "video removed; dropping {}", job.kind);
            db.mark_done(job.id).await?;
            return Ok(());
        }

        match self.run_handler(&job).await {
            RunOutcome::Finished => {
                tracing::debug!(job = job.id, "{} finished after {} run(s)", job.kind, job.run_count);
                db.mark_done(job.id).await?;
            }
            RunOutcome::Failed => match self.inner.plan.decide(&job) {
                RetryDecision::NoRetry => {
                    tracing::info!(job = job.id, "{} not retried; marking done", job.kind);
                    db.mark_done(job.id).await?;
                }
                RetryDecision::RetryAfter(interval) => {
                    job.interval_ms = duration_ms(interval);
                    job.next_run_at = now_millis() + job.interval_ms;
                    tracing::debug!(
                        job = job.id,
                        "{} rescheduled in {:?} (run {})",
                        job.kind,
                        interval,
                        job.run_count
                    );
                    db.reschedule(&job).await?;
                }
            },
        }
        Ok(())
    }

    /// Run the handler on its own task so errors and panics both land in the
    /// reschedule path instead of unwinding through the scheduler.
    async fn run_handler(&self, job: &Job) -> RunOutcome {
        let handler = self.inner.handlers.read().get(&job.kind).cloned();
        let Some(handler) = handler else {
            tracing::warn!(job = job.id, "no handler registered for {}", job.kind);
            return RunOutcome::Failed;
        };

        let (video_id, run_count) = (job.video_id, job.run_count);
        match tokio::spawn(async move { handler.run(video_id, run_count).await }).await {
            Ok(Ok(true)) => RunOutcome::Finished,
            Ok(Ok(false)) => RunOutcome::Failed,
            Ok(Err(e)) => {
                tracing::warn!(job = job.id, video = video_id, "{} failed: {:#}", job.kind, e);
                RunOutcome::Failed
            }
            Err(e) => {
                tracing::error!(job = job.id, video = video_id, "{} handler panicked: {}", job.kind, e);
                RunOutcome::Failed
            }
        }
    }
}

fn duration_ms(d: Duration) -> i64 {
    i64::try_from(d.as_millis()).unwrap_or(i64::MAX)
}
