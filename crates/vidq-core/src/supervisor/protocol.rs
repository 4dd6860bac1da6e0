//! Wire messages exchanged with the engine, one JSON object per line.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::RpcError;

/// Correlation id reserved for the constructor message.
pub const CONSTRUCTOR_ID: u64 = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EngineFn {
    Constructor,
    Download,
    GetProgress,
    StopDownload,
    DestroyTorrent,
    HealthCheck,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    pub id: u64,
    #[serde(rename = "fn")]
    pub func: EngineFn,
    #[serde(default)]
    pub args: Vec<Value>,
}

impl Request {
    pub fn new(id: u64, func: EngineFn, args: Vec<Value>) -> Self {
        Self { id, func, args }
    }

    /// First message after every (re)spawn.
    pub fn constructor(init_args: Value) -> Self {
        Self::new(CONSTRUCTOR_ID, EngineFn::Constructor, vec![init_args])
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub id: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub err: Option<String>,
}

impl Response {
    pub fn ok(id: u64, result: Value) -> Self {
        Self {
            id,
            result: Some(result),
            err: None,
        }
    }

    pub fn error(id: u64, err: impl Into<String>) -> Self {
        Self {
            id,
            result: None,
            err: Some(err.into()),
        }
    }

    /// `err` wins over `result`; a missing result reads as `null`.
    pub fn into_result(self) -> Result<Value, RpcError> {
        match self.err {
            Some(err) => Err(RpcError::Remote(err)),
            None => Ok(self.result.unwrap_or(Value::Null)),
        }
    }
}
