//! Supervisor for the subordinate transfer engine.
//!
//! The engine runs as a separate process and is driven over a
//! request/response protocol (see [`protocol`]). The supervisor:
//! - sends the constructor message first after every spawn and only exposes
//!   the engine once it was accepted;
//! - correlates replies through a per-process pending table, failing every
//!   outstanding call when the process goes away;
//! - respawns the engine after it exits and replays `download` for every
//!   torrent still recorded active;
//! - health-checks the engine on a fixed interval and kills it after too many
//!   consecutive failures, which leads into the normal restart path.
//!
//! Calls made while no engine is up fail at once with [`RpcError::NotStarted`].

mod error;
mod health;
mod link;
mod pending;
pub mod protocol;
mod spawn;


use anyhow::{Context, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use crate::config::EngineConfig;
use crate::engine::{with_timeout, DownloadHandle, Progress, TransferEngine};

pub use error::RpcError;
pub use spawn::{EngineLink, EngineProcess, EngineSpawner, ProcessSpawner};

use health::HealthTracker;
use link::{read_responses, write_requests, Link};
use pending::PendingTable;
use protocol::{EngineFn, Request};

/// A download the engine should be running. Survives engine restarts.
struct ActiveDownload {
    path: PathBuf,
    /// Distinguishes this dispatch from earlier ones for the same hash.
    serial: u64,
    done: Option<oneshot::Sender<Result<(), RpcError>>>,
}

struct Inner {
    cfg: EngineConfig,
    init_args: Value,
    spawner: Arc<dyn EngineSpawner>,
    next_id: AtomicU64,
    next_serial: AtomicU64,
    link: Mutex<Option<Link>>,
    active: Mutex<HashMap<String, ActiveDownload>>,
    /// Number of engine sessions that got past the constructor.
    sessions: watch::Sender<u64>,
    shutdown: watch::Sender<bool>,
    runner: Mutex<Option<JoinHandle<()>>>,
}

/// Handle to the supervised engine. Cheap to clone.
#[derive(Clone)]
pub struct Supervisor {
    inner: Arc<Inner>,
}

impl Supervisor {
    /// Create a supervisor; nothing is spawned until [`Supervisor::start`].
    pub fn new(cfg: EngineConfig, init_args: Value, spawner: Arc<dyn EngineSpawner>) -> Self {
        let (sessions, _) = watch::channel(0);
        let (shutdown, _) = watch::channel(false);
        Self {
            inner: Arc::new(Inner {
                cfg,
                init_args,
                spawner,
                next_id: AtomicU64::new(1),
                next_serial: AtomicU64::new(1),
                link: Mutex::new(None),
                active: Mutex::new(HashMap::new()),
                sessions,
                shutdown,
                runner: Mutex::new(None),
            }),
        }
    }

    /// Start the spawn/monitor/restart loop in the background.
    pub fn start(&self) {
        let mut runner = self.inner.runner.lock();
        if runner.is_some() {
            return;
        }
        let this = self.clone();
        *runner = Some(tokio::spawn(async move { this.run().await }));
    }

    /// Kill the engine and stop restarting it. Outstanding download handles
    /// resolve with [`RpcError::Stopped`].
    pub async fn shutdown(&self) {
        self.inner.shutdown.send_replace(true);
        let runner = self.inner.runner.lock().take();
        if let Some(runner) = runner {
            if let Err(e) = runner.await {
                tracing::warn!("engine supervisor task failed: {}", e);
            }
        }
    }

    /// Sessions started so far; increments after every accepted constructor.
    pub fn sessions(&self) -> u64 {
        *self.inner.sessions.borrow()
    }

    /// Wait until at least `n` sessions have started.
    pub async fn wait_for_session(&self, n: u64) {
        let mut rx = self.inner.sessions.subscribe();
        let _ = rx.wait_for(|count| *count >= n).await;
    }

    pub fn is_running(&self) -> bool {
        self.inner.link.lock().is_some()
    }

    /// Hashes recorded active, sorted. These are replayed after a restart.
    pub fn active_hashes(&self) -> Vec<String> {
        let mut hashes: Vec<String> = self.inner.active.lock().keys().cloned().collect();
        hashes.sort();
        hashes
    }

    fn next_id(&self) -> u64 {
        self.inner.next_id.fetch_add(1, Ordering::Relaxed)
    }

    fn current_link(&self) -> Result<Link, RpcError> {
        self.inner.link.lock().clone().ok_or(RpcError::NotStarted)
    }

    async fn call(&self, func: EngineFn, args: Vec<Value>) -> Result<Value, RpcError> {
        let link = self.current_link()?;
        link.request(Request::new(self.next_id(), func, args)).await
    }

    async fn run(&self) {
        let mut shutdown = self.inner.shutdown.subscribe();
        loop {
            if *shutdown.borrow() {
                break;
            }
            let outcome = self.run_session(&mut shutdown).await;
            if *shutdown.borrow() {
                break;
            }
            match outcome {
                Ok(()) => tracing::info!("restarting transfer engine"),
                Err(e) => {
                    // Spawn or constructor failure: wait before trying again.
                    let delay = self.inner.cfg.restart_delay();
                    tracing::warn!("transfer engine session failed: {:#}; retrying in {:?}", e, delay);
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = shutdown.changed() => {}
                    }
                }
            }
        }
        self.inner.link.lock().take();
        self.inner.active.lock().clear();
        tracing::info!("transfer engine supervisor stopped");
    }

    /// Spawn one engine, construct it, replay active downloads, then watch it
    /// until it exits, is killed for failing health checks, or we shut down.
    async fn run_session(&self, shutdown: &mut watch::Receiver<bool>) -> Result<()> {
        let EngineLink {
            reader,
            writer,
            mut process,
        } = self
            .inner
            .spawner
            .spawn()
            .await
            .context("spawning transfer engine")?;

        let session = self.sessions() + 1;
        let pending = Arc::new(Mutex::new(PendingTable::default()));
        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let writer_task = tokio::spawn(write_requests(writer, outbound_rx));
        let mut reader_task = tokio::spawn(read_responses(reader, Arc::clone(&pending)));
        let link = Link::new(session, outbound, Arc::clone(&pending));

        let ctor = Request::constructor(self.inner.init_args.clone());
        if let Err(e) = with_timeout(self.inner.cfg.health_timeout(), link.request(ctor)).await {
            process.kill().await;
            writer_task.abort();
            reader_task.abort();
            return Err(anyhow::Error::new(e).context("engine did not accept the constructor"));
        }

        let replayed = self.replay(&link);
        *self.inner.link.lock() = Some(link.clone());
        self.inner.sessions.send_replace(session);
        tracing::info!(session, replayed, "transfer engine started");

        let interval = self.inner.cfg.health_interval();
        let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut health = HealthTracker::new(self.inner.cfg.health_failure_threshold);

        loop {
            tokio::select! {
                _ = &mut reader_task => {
                    tracing::warn!(session, "transfer engine exited");
                    break;
                }
                _ = shutdown.changed() => {
                    process.kill().await;
                    reader_task.abort();
                    break;
                }
                _ = ticker.tick() => {
                    let check = Request::new(self.next_id(), EngineFn::HealthCheck, Vec::new());
                    match with_timeout(self.inner.cfg.health_timeout(), link.request(check)).await {
                        Ok(_) => health.record_ok(),
                        Err(e) => {
                            tracing::warn!(session, "health check failed: {}", e);
                            if health.record_failure() {
                                tracing::error!(session, "transfer engine unresponsive; killing it");
                                process.kill().await;
                            }
                        }
                    }
                }
            }
        }

        {
            let mut current = self.inner.link.lock();
            if current.as_ref().map(|l| l.session) == Some(session) {
                *current = None;
            }
        }
        pending.lock().fail_all(RpcError::ProcessExited);
        writer_task.abort();
        Ok(())
    }

    /// Re-dispatch every active download on a fresh link. Returns how many.
    fn replay(&self, link: &Link) -> usize {
        let entries: Vec<(String, PathBuf, u64)> = self
            .inner
            .active
            .lock()
            .iter()
            .map(|(hash, a)| (hash.clone(), a.path.clone(), a.serial))
            .collect();
        for (hash, path, serial) in &entries {
            tracing::debug!(hash = %hash, "replaying download");
            if let Err(e) = self.dispatch(link, hash, path, *serial) {
                tracing::warn!(hash = %hash, "replay failed: {}", e);
            }
        }
        entries.len()
    }

    /// Send `download` and watch for its reply in the background.
    fn dispatch(&self, link: &Link, hash: &str, path: &Path, serial: u64) -> Result<(), RpcError> {
        let req = Request::new(
            self.next_id(),
            EngineFn::Download,
            vec![json!(hash), json!(path.to_string_lossy())],
        );
        let rx = link.send(&req)?;
        let this = self.clone();
        let hash = hash.to_string();
        tokio::spawn(async move {
            let outcome = rx.await.unwrap_or(Err(RpcError::ProcessExited));
            this.settle(&hash, serial, outcome.map(|_| ()));
        });
        Ok(())
    }

    /// Resolve the download handle, unless the engine merely died; those
    /// entries stay active for replay.
    fn settle(&self, hash: &str, serial: u64, outcome: Result<(), RpcError>) {
        if outcome == Err(RpcError::ProcessExited) {
            tracing::debug!(hash, "download interrupted by engine exit; kept for replay");
            return;
        }
        let mut active = self.inner.active.lock();
        if active.get(hash).map(|a| a.serial) != Some(serial) {
            return;
        }
        if let Some(entry) = active.remove(hash) {
            if let Some(done) = entry.done {
                let _ = done.send(outcome);
            }
        }
    }

    /// Forget an active download, resolving its handle as stopped.
    fn forget(&self, pred: impl Fn(&str, &ActiveDownload) -> bool) {
        let mut active = self.inner.active.lock();
        let gone: Vec<String> = active
            .iter()
            .filter(|(hash, a)| pred(hash.as_str(), a))
            .map(|(hash, _)| hash.clone())
            .collect();
        for hash in gone {
            if let Some(done) = active.remove(&hash).and_then(|a| a.done) {
                let _ = done.send(Err(RpcError::Stopped));
            }
        }
    }
}

#[async_trait]
impl TransferEngine for Supervisor {
    async fn download(&self, hash: &str, path: &Path) -> Result<DownloadHandle, RpcError> {
        let link = self.current_link()?;
        let serial = self.inner.next_serial.fetch_add(1, Ordering::Relaxed);
        let (done, handle) = DownloadHandle::channel();
        let previous = self.inner.active.lock().insert(
            hash.to_string(),
            ActiveDownload {
                path: path.to_path_buf(),
                serial,
                done: Some(done),
            },
        );
        if let Some(prev) = previous.and_then(|p| p.done) {
            let _ = prev.send(Err(RpcError::Stopped));
        }

        if let Err(e) = self.dispatch(&link, hash, path, serial) {
            let mut active = self.inner.active.lock();
            if active.get(hash).map(|a| a.serial) == Some(serial) {
                active.remove(hash);
            }
            return Err(e);
        }
        Ok(handle)
    }

    async fn progress(&self, hash: &str) -> Result<Progress, RpcError> {
        let v = self.call(EngineFn::GetProgress, vec![json!(hash)]).await?;
        if v.is_null() {
            return Ok(Progress::default());
        }
        serde_json::from_value(v).map_err(|e| RpcError::Protocol(e.to_string()))
    }

    async fn stop(&self, hash: &str) -> Result<(), RpcError> {
        self.forget(|h, _| h == hash);
        self.call(EngineFn::StopDownload, vec![json!(hash)]).await?;
        Ok(())
    }

    async fn destroy(&self, path: &Path) -> Result<(), RpcError> {
        self.forget(|_, a| a.path.as_path() == path);
        self.call(EngineFn::DestroyTorrent, vec![json!(path.to_string_lossy())])
            .await?;
        Ok(())
    }

    async fn health_check(&self) -> Result<(), RpcError> {
        self.call(EngineFn::HealthCheck, Vec::new()).await?;
        Ok(())
    }

    fn active_downloads(&self) -> Vec<String> {
        self.active_hashes()
    }
}
