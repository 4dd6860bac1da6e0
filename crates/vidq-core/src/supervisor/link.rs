//! One live connection to an engine process: the outbound request queue,
//! the reply reader, and the pending table they share.

use parking_lot::Mutex;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::{mpsc, oneshot};

use super::pending::{PendingTable, Reply};
use super::protocol::{Request, Response};
use super::RpcError;

#[derive(Clone)]
pub(super) struct Link {
    pub session: u64,
    outbound: mpsc::UnboundedSender<String>,
    pending: Arc<Mutex<PendingTable>>,
}

impl Link {
    pub fn new(
        session: u64,
        outbound: mpsc::UnboundedSender<String>,
        pending: Arc<Mutex<PendingTable>>,
    ) -> Self {
        Self {
            session,
            outbound,
            pending,
        }
    }

    /// Queue `req` and return the receiver for its reply.
    pub fn send(&self, req: &Request) -> Result<oneshot::Receiver<Reply>, RpcError> {
        let line = serde_json::to_string(req).map_err(|e| RpcError::Protocol(e.to_string()))?;
        let rx = self.pending.lock().register(req.id)?;
        if self.outbound.send(line).is_err() {
            self.pending.lock().remove(req.id);
            return Err(RpcError::ProcessExited);
        }
        Ok(rx)
    }

    pub async fn request(&self, req: Request) -> Result<serde_json::Value, RpcError> {
        let rx = self.send(&req)?;
        rx.await.unwrap_or(Err(RpcError::ProcessExited))
    }
}

pub(super) async fn write_requests<W>(mut writer: W, mut rx: mpsc::UnboundedReceiver<String>)
where
    W: AsyncWrite + Unpin,
{
    while let Some(mut line) = rx.recv().await {
        line.push('\n');
        if let Err(e) = writer.write_all(line.as_bytes()).await {
            tracing::debug!("engine stdin closed: {}", e);
            break;
        }
        if let Err(e) = writer.flush().await {
            tracing::debug!("engine stdin flush failed: {}", e);
            break;
        }
    }
}

/// Read replies until EOF, then fail whatever is still outstanding.
pub(super) async fn read_responses<R>(reader: R, pending: Arc<Mutex<PendingTable>>)
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(reader).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                if line.trim().is_empty() {
                    continue;
                }
                match serde_json::from_str::<Response>(&line) {
                    Ok(resp) => {
                        let id = resp.id;
                        if !pending.lock().resolve(resp) {
                            tracing::trace!(id, "dropping reply nobody waits for");
                        }
                    }
                    Err(e) => tracing::warn!("unparseable engine output {:?}: {}", line, e),
                }
            }
            Ok(None) => break,
            Err(e) => {
                tracing::warn!("reading engine output failed: {}", e);
                break;
            }
        }
    }
    pending.lock().fail_all(RpcError::ProcessExited);
}
