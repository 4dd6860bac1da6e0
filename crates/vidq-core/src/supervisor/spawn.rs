//! Starting the engine process. Abstracted so tests can run an in-process fake.

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, BufReader};
use tokio::process::{Child, ChildStderr, Command};

use crate::config::EngineConfig;

/// Handle used to force an engine down.
#[async_trait]
pub trait EngineProcess: Send {
    /// Kill the engine. Its output stream reaches EOF afterwards.
    async fn kill(&mut self);
}

/// A freshly spawned engine: where replies come from, where requests go,
/// and how to kill it.
pub struct EngineLink {
    pub reader: Box<dyn AsyncRead + Send + Unpin>,
    pub writer: Box<dyn AsyncWrite + Send + Unpin>,
    pub process: Box<dyn EngineProcess>,
}

#[async_trait]
pub trait EngineSpawner: Send + Sync {
    async fn spawn(&self) -> Result<EngineLink>;
}

/// Runs the engine as a child process speaking line-delimited JSON on stdio.
#[derive(Debug, Clone)]
pub struct ProcessSpawner {
    program: String,
    args: Vec<String>,
}

impl ProcessSpawner {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    pub fn from_config(cfg: &EngineConfig) -> Self {
        Self::new(cfg.command.clone(), cfg.args.clone())
    }
}

#[async_trait]
impl EngineSpawner for ProcessSpawner {
    async fn spawn(&self) -> Result<EngineLink> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("failed to spawn {}", self.program))?;

        let stdin = child.stdin.take().context("engine stdin not captured")?;
        let stdout = child.stdout.take().context("engine stdout not captured")?;
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(forward_stderr(stderr));
        }
        tracing::debug!(pid = child.id(), "spawned {}", self.program);

        Ok(EngineLink {
            reader: Box::new(stdout),
            writer: Box::new(stdin),
            process: Box::new(ChildProcess(child)),
        })
    }
}

struct ChildProcess(Child);

#[async_trait]
impl EngineProcess for ChildProcess {
    async fn kill(&mut self) {
        if let Err(e) = self.0.kill().await {
            tracing::warn!("failed to kill transfer engine: {}", e);
        }
    }
}

async fn forward_stderr(stderr: ChildStderr) {
    let mut lines = BufReader::new(stderr).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        tracing::debug!(target: "vidq_core::engine", "stderr: {}", line);
    }
}
