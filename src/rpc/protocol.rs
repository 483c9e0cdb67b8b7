//! Line-delimited JSON-RPC 1.0 frames.
//!
//! One JSON object per line. Requests carry their single argument wrapped in a
//! one-element `params` array; responses carry either `result` or a string `error`.

use crate::error::{MigrateError, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Push buffered samples to their owner.
pub const METHOD_SEND: &str = "Graph.Send";
/// Read-through query.
pub const METHOD_QUERY: &str = "Graph.Query";
/// Download a whole RRD file.
pub const METHOD_GET_RRD: &str = "Graph.GetRrd";

/// Call frame sent by a client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcRequest {
    pub method: String,
    pub params: Vec<Value>,
    pub id: u64,
}

impl RpcRequest {
    /// Frame calling `method` with a single argument.
    pub fn new(id: u64, method: &str, param: Value) -> Self {
        Self {
            method: method.to_string(),
            params: vec![param],
            id,
        }
    }

    /// The single argument, or `null` if none was sent.
    pub fn param(&self) -> Value {
        self.params.first().cloned().unwrap_or(Value::Null)
    }
}

/// Reply frame matched to its request by `id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcResponse {
    pub id: u64,
    #[serde(default)]
    pub result: Value,
    #[serde(default)]
    pub error: Value,
}

impl RpcResponse {
    /// Successful reply.
    pub fn ok(id: u64, result: Value) -> Self {
        Self {
            id,
            result,
            error: Value::Null,
        }
    }

    /// Failed reply carrying `message` as the error string.
    pub fn err(id: u64, message: impl Into<String>) -> Self {
        Self {
            id,
            result: Value::Null,
            error: Value::String(message.into()),
        }
    }

    /// Converts the frame into the call outcome.
    pub fn into_result(self) -> Result<Value> {
        match self.error {
            Value::Null => Ok(self.result),
            Value::String(message) => Err(MigrateError::Remote(message)),
            other => Err(MigrateError::Remote(other.to_string())),
        }
    }
}

/// Serializes a frame followed by a newline.
pub fn encode_line<T: Serialize>(frame: &T) -> Result<Vec<u8>> {
    let mut buf = serde_json::to_vec(frame)?;
    buf.push(b'\n');
    Ok(buf)
}
