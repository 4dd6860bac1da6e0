//! Per-process table of requests awaiting a reply.

use serde_json::Value;
use std::collections::HashMap;
use tokio::sync::oneshot;

use super::protocol::Response;
use super::RpcError;

pub(super) type Reply = Result<Value, RpcError>;

/// Owned by one engine process. Once closed (the process went away) it
/// rejects new registrations, so no waiter can be stranded.
#[derive(Debug, Default)]
pub(super) struct PendingTable {
    waiters: HashMap<u64, oneshot::Sender<Reply>>,
    closed: bool,
}

impl PendingTable {
    pub fn register(&mut self, id: u64) -> Result<oneshot::Receiver<Reply>, RpcError> {
        if self.closed {
            return Err(RpcError::ProcessExited);
        }
        // Callers that timed out dropped their receivers.
        self.waiters.retain(|_, tx| !tx.is_closed());
        let (tx, rx) = oneshot::channel();
        self.waiters.insert(id, tx);
        Ok(rx)
    }

    pub fn remove(&mut self, id: u64) {
        self.waiters.remove(&id);
    }

    /// Deliver a reply. Returns false for unknown ids (late or duplicate replies).
    pub fn resolve(&mut self, response: Response) -> bool {
        match self.waiters.remove(&response.id) {
            Some(tx) => {
                let _ = tx.send(response.into_result());
                true
            }
            None => false,
        }
    }

    /// Close the table and fail every outstanding request with `err`.
    pub fn fail_all(&mut self, err: RpcError) {
        self.closed = true;
        for (_, tx) in self.waiters.drain() {
            let _ = tx.send(Err(err.clone()));
        }
    }

    pub fn len(&self) -> usize {
        self.waiters.len()
    }
}
