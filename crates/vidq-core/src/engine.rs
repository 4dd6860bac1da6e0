//! The transfer-engine seam.
//!
//! Everything peer-to-peer happens in a subordinate engine; the rest of the
//! crate only sees this trait. [`crate::supervisor::Supervisor`] is the real
//! implementation, tests plug in in-process fakes.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tokio::sync::oneshot;

use crate::supervisor::RpcError;

/// Transfer state reported by the engine for one torrent.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Progress {
    /// Completed fraction in `0.0..=1.0`.
    pub progress: f64,
    /// Bytes downloaded so far.
    pub downloaded: u64,
    /// Current download rate in bytes per second.
    pub download_speed: f64,
    pub upload_speed: f64,
    pub num_peers: u32,
}

impl Progress {
    /// Download rate in KB/s.
    pub fn speed_kbps(&self) -> f64 {
        self.download_speed / 1024.0
    }

    pub fn is_done(&self) -> bool {
        self.progress >= 1.0
    }
}

/// Completion side of a dispatched download.
///
/// `download` returns as soon as the engine accepted the request; the
/// transfer itself finishes later, possibly after engine restarts.
#[derive(Debug)]
pub struct DownloadHandle {
    rx: oneshot::Receiver<Result<(), RpcError>>,
}

impl DownloadHandle {
    pub fn new(rx: oneshot::Receiver<Result<(), RpcError>>) -> Self {
        Self { rx }
    }

    /// A handle plus the sender that resolves it.
    pub fn channel() -> (oneshot::Sender<Result<(), RpcError>>, Self) {
        let (tx, rx) = oneshot::channel();
        (tx, Self::new(rx))
    }

    /// Wait for the transfer to finish. A dropped sender counts as stopped.
    pub async fn finished(self) -> Result<(), RpcError> {
        self.rx.await.unwrap_or(Err(RpcError::Stopped))
    }
}

#[async_trait]
pub trait TransferEngine: Send + Sync {
    /// Start (or resume) downloading `hash` into `path`.
    async fn download(&self, hash: &str, path: &Path) -> Result<DownloadHandle, RpcError>;

    async fn progress(&self, hash: &str) -> Result<Progress, RpcError>;

    /// Pause the transfer; data on disk is kept.
    async fn stop(&self, hash: &str) -> Result<(), RpcError>;

    /// Drop the torrent and delete its data under `path`.
    async fn destroy(&self, path: &Path) -> Result<(), RpcError>;

    async fn health_check(&self) -> Result<(), RpcError>;

    /// Hashes the engine is expected to be transferring.
    fn active_downloads(&self) -> Vec<String>;
}

/// Engine handle for processes that do not own the engine (CLI commands).
/// Every call fails with [`RpcError::NotStarted`].
#[derive(Debug, Clone, Default)]
pub struct Detached;

#[async_trait]
impl TransferEngine for Detached {
    async fn download(&self, _hash: &str, _path: &Path) -> Result<DownloadHandle, RpcError> {
        Err(RpcError::NotStarted)
    }

    async fn progress(&self, _hash: &str) -> Result<Progress, RpcError> {
        Err(RpcError::NotStarted)
    }

    async fn stop(&self, _hash: &str) -> Result<(), RpcError> {
        Err(RpcError::NotStarted)
    }

    async fn destroy(&self, _path: &Path) -> Result<(), RpcError> {
        Err(RpcError::NotStarted)
    }

    async fn health_check(&self) -> Result<(), RpcError> {
        Err(RpcError::NotStarted)
    }

    fn active_downloads(&self) -> Vec<String> {
        Vec::new()
    }
}

/// Race `fut` against `limit`. The underlying request is not cancelled; a
/// late reply is simply ignored by whoever owns it.
pub async fn with_timeout<T, F>(limit: Duration, fut: F) -> Result<T, RpcError>
where
    F: std::future::Future<Output = Result<T, RpcError>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(res) => res,
        Err(_) => Err(RpcError::Timeout(limit)),
    }
}

/// Poll progress, falling back to [`Progress::default`] on timeout or error.
pub async fn progress_or_default(
    engine: &dyn TransferEngine,
    hash: &str,
    limit: Duration,
) -> Progress {
    match with_timeout(limit, engine.progress(hash)).await {
        Ok(p) => p,
        Err(e) => {
            tracing::debug!(hash, "progress unavailable: {}", e);
            Progress::default()
        }
    }
}
