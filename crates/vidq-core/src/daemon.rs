//! Wiring for the long-running daemon: one supervised engine, one job
//! scheduler, one admission controller, all sharing the store.

use anyhow::Result;
use serde_json::json;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;

use crate::accountant::DiskAccountant;
use crate::admission::{AdmissionController, AdmissionDeps};
use crate::config::VidqConfig;
use crate::engine::{Detached, TransferEngine};
use crate::lifecycle::{
    register_handlers, AcquisitionService, Exporter, LifecycleDeps, LogNotifier, MoveExporter,
    NoReleaseSearch, Notifier, ReleaseSearch,
};
use crate::scheduler::{JobScheduler, SchedulePlan};
use crate::store::Db;
use crate::supervisor::{EngineSpawner, Supervisor};

/// Outside collaborators plugged into the daemon.
#[derive(Clone)]
pub struct Collaborators {
    pub search: Arc<dyn ReleaseSearch>,
    pub exporter: Arc<dyn Exporter>,
    pub notifier: Arc<dyn Notifier>,
}

impl Collaborators {
    /// No release search, move-into-library export, log-only notifications.
    pub fn defaults(cfg: &VidqConfig) -> Self {
        Self {
            search: Arc::new(NoReleaseSearch),
            exporter: Arc::new(MoveExporter::new(&cfg.export_root)),
            notifier: Arc::new(LogNotifier),
        }
    }
}

/// Service for processes that do not run the daemon (CLI commands).
///
/// Jobs are only persisted; a running daemon picks them up on its next
/// rescan. Removal deletes data directly and the daemon stops the orphaned
/// transfer on its next admission pass.
pub fn detached_service(cfg: &VidqConfig, db: Db) -> AcquisitionService {
    let engine: Arc<dyn TransferEngine> = Arc::new(Detached);
    let scheduler = JobScheduler::new(db.clone(), SchedulePlan::from_config(&cfg.jobs));
    let collab = Collaborators::defaults(cfg);
    let admission = AdmissionController::new(
        AdmissionDeps {
            db: db.clone(),
            engine: engine.clone(),
            accountant: Arc::new(DiskAccountant::new(&cfg.download_root, cfg.max_memory_mb)),
            scheduler: scheduler.clone(),
            exporter: collab.exporter,
            notifier: collab.notifier,
        },
        cfg.max_downloads,
        &cfg.download_root,
    );
    AcquisitionService::new(LifecycleDeps {
        db,
        engine,
        scheduler,
        admission,
        search: collab.search,
        progress_timeout: cfg.engine.progress_timeout(),
        slow_speed_kbps: cfg.slow_speed_kbps,
    })
}

pub struct Daemon {
    supervisor: Supervisor,
    scheduler: JobScheduler,
    admission: AdmissionController,
    service: AcquisitionService,
    engine_wait: Duration,
    rescan: Duration,
}

impl Daemon {
    pub fn new(
        cfg: &VidqConfig,
        db: Db,
        spawner: Arc<dyn EngineSpawner>,
        collab: Collaborators,
    ) -> Self {
        let supervisor = Supervisor::new(
            cfg.engine.clone(),
            json!({ "downloadRoot": cfg.download_root }),
            spawner,
        );
        let engine = Arc::new(supervisor.clone());
        let scheduler = JobScheduler::new(db.clone(), SchedulePlan::from_config(&cfg.jobs));
        let admission = AdmissionController::new(
            AdmissionDeps {
                db: db.clone(),
                engine: engine.clone(),
                accountant: Arc::new(DiskAccountant::new(&cfg.download_root, cfg.max_memory_mb)),
                scheduler: scheduler.clone(),
                exporter: collab.exporter,
                notifier: collab.notifier,
            },
            cfg.max_downloads,
            &cfg.download_root,
        );
        let deps = LifecycleDeps {
            db,
            engine,
            scheduler: scheduler.clone(),
            admission: admission.clone(),
            search: collab.search,
            progress_timeout: cfg.engine.progress_timeout(),
            slow_speed_kbps: cfg.slow_speed_kbps,
        };
        register_handlers(&deps);

        Self {
            supervisor,
            scheduler,
            admission,
            service: AcquisitionService::new(deps),
            engine_wait: cfg.engine.health_timeout() + cfg.engine.restart_delay(),
            rescan: Duration::from_secs(cfg.jobs.rescan_interval_secs.max(1)),
        }
    }

    pub fn service(&self) -> &AcquisitionService {
        &self.service
    }

    pub fn supervisor(&self) -> &Supervisor {
        &self.supervisor
    }

    /// Spawn the engine, recover jobs and re-admit torrents left running.
    pub async fn start(&self) -> Result<()> {
        self.supervisor.start();
        if tokio::time::timeout(self.engine_wait, self.supervisor.wait_for_session(1))
            .await
            .is_err()
        {
            // Admission retries on every pass; nothing is lost by going on.
            tracing::warn!("transfer engine not up after {:?}", self.engine_wait);
        }
        self.scheduler.start().await?;
        self.admission.resume().await?;
        tracing::info!("daemon started");
        Ok(())
    }

    /// Start, then keep picking up work queued by other processes until
    /// `shutdown` resolves.
    pub async fn run_until<F>(&self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        self.start().await?;
        let mut rescan = tokio::time::interval(self.rescan);
        rescan.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                _ = rescan.tick() => {
                    self.scheduler.ping().await;
                    self.admission.ping().await;
                }
            }
        }
        self.shutdown().await;
        Ok(())
    }

    pub async fn shutdown(&self) {
        tracing::info!("daemon shutting down");
        self.scheduler.shutdown();
        self.supervisor.shutdown().await;
    }
}
