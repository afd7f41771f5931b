//! Wire messages carried over a socket session.

use crate::framework::{ErrorBody, RpcError};
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const CALL: &str = "call";

fn default_method() -> String {
    CALL.to_string()
}

/// `{id, method, path, args}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcRequest {
    #[serde(default)]
    pub id: u64,
    #[serde(default = "default_method")]
    pub method: String,
    #[serde(default)]
    pub path: Vec<String>,
    #[serde(default)]
    pub args: Vec<Value>,
}

impl RpcRequest {
    pub fn call(id: u64, path: &[&str], args: Vec<Value>) -> Self {
        Self {
            id,
            method: default_method(),
            path: path.iter().map(|s| s.to_string()).collect(),
            args,
        }
    }
}

/// `{id, result?, error?}`; exactly one of `result` and `error` is set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcResponse {
    pub id: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorBody>,
}

impl RpcResponse {
    pub fn success(id: u64, result: Value) -> Self {
        Self {
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn failure(id: u64, error: &RpcError) -> Self {
        Self {
            id,
            result: None,
            error: Some(error.to_body()),
        }
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}
