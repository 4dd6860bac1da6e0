//! In-process fakes shared by unit tests.

use anyhow::{bail, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;

use crate::accountant::ResourceAccountant;
use crate::engine::{DownloadHandle, Progress, TransferEngine};
use crate::lifecycle::{Exporter, Notifier};
use crate::store::{Torrent, Video, VideoId};
use crate::supervisor::RpcError;

#[derive(Default)]
struct EngineState {
    started: Vec<String>,
    stopped: Vec<String>,
    destroyed: Vec<PathBuf>,
    refused: HashSet<String>,
    unresponsive: bool,
    running: HashMap<String, oneshot::Sender<Result<(), RpcError>>>,
    progress: HashMap<String, Progress>,
}

/// Transfer engine that records calls and finishes downloads on demand.
#[derive(Default)]
pub(crate) struct FakeEngine {
    state: Mutex<EngineState>,
}

impl FakeEngine {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Make `download` fail for `hash` until [`FakeEngine::accept`] is called.
    pub fn refuse(&self, hash: &str) {
        self.state.lock().refused.insert(hash.to_string());
    }

    pub fn accept(&self, hash: &str) {
        self.state.lock().refused.remove(hash);
    }

    /// Never answer `progress` (simulates a hung engine).
    pub fn hang_progress(&self) {
        self.state.lock().unresponsive = true;
    }

    pub fn set_progress(&self, hash: &str, progress: Progress) {
        self.state.lock().progress.insert(hash.to_string(), progress);
    }

    /// Finish the running download of `hash`. Returns false if it is not running.
    pub fn complete(&self, hash: &str) -> bool {
        match self.state.lock().running.remove(hash) {
            Some(done) => done.send(Ok(())).is_ok(),
            None => false,
        }
    }

    pub fn started(&self) -> Vec<String> {
        self.state.lock().started.clone()
    }

    pub fn stopped(&self) -> Vec<String> {
        self.state.lock().stopped.clone()
    }

    pub fn destroyed(&self) -> Vec<PathBuf> {
        self.state.lock().destroyed.clone()
    }

    pub fn is_running(&self, hash: &str) -> bool {
        self.state.lock().running.contains_key(hash)
    }

    /// Pretend the engine is transferring `hash` without a matching torrent.
    pub fn inject_running(&self, hash: &str) {
        let (done, _handle) = DownloadHandle::channel();
        self.state.lock().running.insert(hash.to_string(), done);
    }
}

#[async_trait]
impl TransferEngine for FakeEngine {
    async fn download(&self, hash: &str, _path: &Path) -> Result<DownloadHandle, RpcError> {
        let mut st = self.state.lock();
        if st.refused.contains(hash) {
            return Err(RpcError::Remote(format!("refused {hash}")));
        }
        st.started.push(hash.to_string());
        let (done, handle) = DownloadHandle::channel();
        st.running.insert(hash.to_string(), done);
        Ok(handle)
    }

    async fn progress(&self, hash: &str) -> Result<Progress, RpcError> {
        let (unresponsive, progress) = {
            let st = self.state.lock();
            (st.unresponsive, st.progress.get(hash).cloned())
        };
        if unresponsive {
            std::future::pending::<()>().await;
        }
        Ok(progress.unwrap_or_default())
    }

    async fn stop(&self, hash: &str) -> Result<(), RpcError> {
        let mut st = self.state.lock();
        st.stopped.push(hash.to_string());
        st.running.remove(hash);
        Ok(())
    }

    async fn destroy(&self, path: &Path) -> Result<(), RpcError> {
        self.state.lock().destroyed.push(path.to_path_buf());
        Ok(())
    }

    async fn health_check(&self) -> Result<(), RpcError> {
        Ok(())
    }

    fn active_downloads(&self) -> Vec<String> {
        let mut hashes: Vec<String> = self.state.lock().running.keys().cloned().collect();
        hashes.sort();
        hashes
    }
}

/// Accountant with a fixed budget and per-hash progress.
pub(crate) struct FixedAccountant {
    remaining: Mutex<i64>,
    progress: Mutex<HashMap<String, i64>>,
}

impl FixedAccountant {
    pub fn new(remaining_mb: i64) -> Arc<Self> {
        Arc::new(Self {
            remaining: Mutex::new(remaining_mb),
            progress: Mutex::new(HashMap::new()),
        })
    }

    pub fn set_progress(&self, hash: &str, mb: i64) {
        self.progress.lock().insert(hash.to_string(), mb);
    }
}

#[async_trait]
impl ResourceAccountant for FixedAccountant {
    async fn remaining_mb(&self) -> Result<i64> {
        Ok(*self.remaining.lock())
    }

    async fn progress_mb(&self, torrent: &Torrent) -> Result<i64> {
        Ok(self.progress.lock().get(&torrent.hash).copied().unwrap_or(0))
    }
}

#[derive(Default)]
pub(crate) struct RecordingExporter {
    exported: Mutex<Vec<VideoId>>,
    fail: Mutex<bool>,
}

impl RecordingExporter {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn fail(&self, fail: bool) {
        *self.fail.lock() = fail;
    }

    pub fn exported(&self) -> Vec<VideoId> {
        self.exported.lock().clone()
    }
}

#[async_trait]
impl Exporter for RecordingExporter {
    async fn export(&self, video: &Video, _torrent: &Torrent, _source: &Path) -> Result<PathBuf> {
        if *self.fail.lock() {
            bail!("library not mounted");
        }
        self.exported.lock().push(video.id);
        Ok(PathBuf::from("/library").join(&video.title))
    }
}

#[derive(Default)]
pub(crate) struct RecordingNotifier {
    sent: Mutex<Vec<(String, String)>>,
}

impl RecordingNotifier {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn sent(&self) -> Vec<(String, String)> {
        self.sent.lock().clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, user_id: &str, message: &str) -> Result<()> {
        self.sent
            .lock()
            .push((user_id.to_string(), message.to_string()));
        Ok(())
    }
}

/// Poll until `cond` holds, failing the test after two seconds.
pub(crate) async fn eventually<F, Fut>(what: &str, cond: F)
where
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while !cond().await {
        assert!(
            tokio::time::Instant::now() < deadline,
            "timed out waiting for {what}"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
