use std::time::Duration;

/// Failure of a call into the subordinate transfer engine.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RpcError {
    /// No engine process is alive (not spawned yet, or between restarts).
    #[error("transfer engine not started")]
    NotStarted,
    /// The caller stopped waiting. The request itself is still in flight.
    #[error("call timed out after {0:?}")]
    Timeout(Duration),
    /// The engine answered with `{err}`.
    #[error("engine error: {0}")]
    Remote(String),
    /// The engine exited before answering.
    #[error("transfer engine exited")]
    ProcessExited,
    /// The download was stopped or superseded, or the supervisor shut down.
    #[error("download stopped")]
    Stopped,
    #[error("protocol error: {0}")]
    Protocol(String),
}
