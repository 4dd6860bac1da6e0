//! In-process transfer engine speaking the line-delimited JSON protocol.

use anyhow::Result;
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream};
use tokio::task::AbortHandle;
use vidq_core::supervisor::protocol::{EngineFn, Request, Response};
use vidq_core::supervisor::{EngineLink, EngineProcess, EngineSpawner};

#[derive(Default)]
struct State {
    requests: Vec<Request>,
    /// Leave downloads unanswered instead of finishing them at once.
    hold: bool,
}

/// Finishes every download immediately by writing one file into the target
/// directory, unless told to hold them.
#[derive(Clone, Default)]
pub struct LocalEngine {
    state: Arc<Mutex<State>>,
}

impl LocalEngine {
    pub fn holding() -> Self {
        let engine = Self::default();
        engine.state.lock().hold = true;
        engine
    }

    pub fn requests(&self) -> Vec<Request> {
        self.state.lock().requests.clone()
    }

    pub fn calls(&self, func: EngineFn) -> Vec<Request> {
        self.requests()
            .into_iter()
            .filter(|r| r.func == func)
            .collect()
    }
}

struct Instance(AbortHandle);

#[async_trait]
impl EngineProcess for Instance {
    async fn kill(&mut self) {
        self.0.abort();
    }
}

#[async_trait]
impl EngineSpawner for LocalEngine {
    async fn spawn(&self) -> Result<EngineLink> {
        let (ours, theirs) = tokio::io::duplex(64 * 1024);
        let task = tokio::spawn(serve(theirs, Arc::clone(&self.state)));
        let (reader, writer) = tokio::io::split(ours);
        Ok(EngineLink {
            reader: Box::new(reader),
            writer: Box::new(writer),
            process: Box::new(Instance(task.abort_handle())),
        })
    }
}

fn arg_path(req: &Request, index: usize) -> Option<PathBuf> {
    req.args.get(index).and_then(Value::as_str).map(PathBuf::from)
}

async fn serve(stream: DuplexStream, state: Arc<Mutex<State>>) {
    let (reader, mut writer) = tokio::io::split(stream);
    let mut lines = BufReader::new(reader).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        let req: Request = serde_json::from_str(&line).expect("valid request");
        let hold = {
            let mut st = state.lock();
            st.requests.push(req.clone());
            st.hold
        };
        let reply = match req.func {
            EngineFn::Download if hold => None,
            EngineFn::Download => {
                let hash = req.args[0].as_str().unwrap_or_default().to_string();
                let dir = arg_path(&req, 1).expect("download path");
                tokio::fs::create_dir_all(&dir).await.expect("create torrent dir");
                tokio::fs::write(dir.join(format!("{hash}.mkv")), vec![7u8; 1024])
                    .await
                    .expect("write payload");
                Some(Response::ok(req.id, Value::Null))
            }
            EngineFn::GetProgress => Some(Response::ok(
                req.id,
                json!({"progress": 0.5, "downloadSpeed": 1048576.0, "numPeers": 4}),
            )),
            EngineFn::DestroyTorrent => {
                if let Some(dir) = arg_path(&req, 0) {
                    let _ = tokio::fs::remove_dir_all(dir).await;
                }
                Some(Response::ok(req.id, Value::Null))
            }
            EngineFn::HealthCheck => Some(Response::ok(req.id, json!(true))),
            EngineFn::Constructor | EngineFn::StopDownload => {
                Some(Response::ok(req.id, Value::Null))
            }
        };
        if let Some(resp) = reply {
            let mut out = serde_json::to_string(&resp).expect("serializable");
            out.push('\n');
            if writer.write_all(out.as_bytes()).await.is_err() {
                break;
            }
        }
    }
}

/// Poll `cond` every 20ms for up to ten seconds.
pub async fn wait_until<F, Fut>(what: &str, cond: F)
where
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    while !cond().await {
        assert!(
            tokio::time::Instant::now() < deadline,
            "timed out waiting for {what}"
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}
