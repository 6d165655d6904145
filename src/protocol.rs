//! Wire types for newline-delimited JSON-RPC 2.0.
//!
//! Outgoing messages are plain serializable structs. Incoming lines are
//! decoded at the boundary into [`IncomingMessage`]; anything that is not a
//! request, notification, result response, or error response is rejected
//! with [`McpdError::DecodeError`].

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::errors::McpdError;

/// MCP protocol revision announced during the handshake.
pub const PROTOCOL_VERSION: &str = "2024-11-05";

// ─── Outgoing ────────────────────────────────────────────────────────────────

/// JSON-RPC 2.0 request message.
#[derive(Debug, Clone, Serialize)]
pub struct RpcRequest<'a> {
    pub jsonrpc: &'static str,
    pub id: u64,
    pub method: &'a str,
    pub params: &'a Value,
}

impl<'a> RpcRequest<'a> {
    pub fn new(id: u64, method: &'a str, params: &'a Value) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            method,
            params,
        }
    }
}

/// JSON-RPC 2.0 notification (no id, no response expected).
#[derive(Debug, Clone, Serialize)]
pub struct RpcNotification<'a> {
    pub jsonrpc: &'static str,
    pub method: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<&'a Value>,
}

impl<'a> RpcNotification<'a> {
    pub fn new(method: &'a str) -> Self {
        Self {
            jsonrpc: "2.0",
            method,
            params: None,
        }
    }
}

/// Request id as sent by a peer. Backends only ever see numeric ids from us,
/// but callers of the host surface may use strings.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    Number(i64),
    String(String),
    /// Only used when replying to a line whose id could not be read.
    Null,
}

/// JSON-RPC 2.0 response written back to a host-side caller.
#[derive(Debug, Clone, Serialize)]
pub struct RpcResponse {
    pub jsonrpc: &'static str,
    pub id: RequestId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcErrorObject>,
}

impl RpcResponse {
    pub fn success(id: RequestId, result: Value) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn error(id: RequestId, code: i64, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            result: None,
            error: Some(RpcErrorObject {
                code,
                message: message.into(),
                data: None,
            }),
        }
    }
}

/// JSON-RPC 2.0 error object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcErrorObject {
    #[serde(default)]
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

// ─── Incoming ────────────────────────────────────────────────────────────────

/// A decoded line from a peer.
#[derive(Debug, Clone, PartialEq)]
pub enum IncomingMessage {
    Request {
        id: RequestId,
        method: String,
        params: Value,
    },
    Notification {
        method: String,
        params: Value,
    },
    Response {
        id: u64,
        result: Value,
    },
    ErrorResponse {
        id: u64,
        error: RpcErrorObject,
    },
}

impl IncomingMessage {
    /// Decode one line of JSON into a tagged message.
    pub fn decode(line: &str) -> Result<Self, McpdError> {
        let value: Value = serde_json::from_str(line).map_err(|e| McpdError::DecodeError {
            reason: format!("invalid JSON: {e}"),
        })?;

        let Value::Object(mut obj) = value else {
            return Err(McpdError::DecodeError {
                reason: "message is not a JSON object".into(),
            });
        };

        if let Some(method) = obj.remove("method") {
            let Value::String(method) = method else {
                return Err(McpdError::DecodeError {
                    reason: "'method' is not a string".into(),
                });
            };
            let params = obj.remove("params").unwrap_or(Value::Null);
            return match obj.remove("id") {
                None | Some(Value::Null) => Ok(Self::Notification { method, params }),
                Some(id) => {
                    let id = serde_json::from_value(id).map_err(|_| McpdError::DecodeError {
                        reason: "request id must be a string or integer".into(),
                    })?;
                    Ok(Self::Request { id, method, params })
                }
            };
        }

        let id = response_id(&obj)?;

        if let Some(error) = obj.remove("error") {
            let error: RpcErrorObject =
                serde_json::from_value(error).map_err(|e| McpdError::DecodeError {
                    reason: format!("malformed error object: {e}"),
                })?;
            return Ok(Self::ErrorResponse { id, error });
        }

        match obj.remove("result") {
            Some(result) => Ok(Self::Response { id, result }),
            None => Err(McpdError::DecodeError {
                reason: format!("response {id} has neither 'result' nor 'error'"),
            }),
        }
    }

    /// The correlation id, for responses.
    pub fn response_id(&self) -> Option<u64> {
        match self {
            Self::Response { id, .. } | Self::ErrorResponse { id, .. } => Some(*id),
            _ => None,
        }
    }

    /// Convert a response into the call outcome seen by `call()`.
    pub fn into_result(self) -> Result<Value, McpdError> {
        match self {
            Self::Response { result, .. } => Ok(result),
            Self::ErrorResponse { error, .. } => Err(McpdError::ServerError {
                code: error.code,
                message: error.message,
                data: error.data,
            }),
            other => Err(McpdError::DecodeError {
                reason: format!("expected a response, got {other:?}"),
            }),
        }
    }
}

fn response_id(obj: &Map<String, Value>) -> Result<u64, McpdError> {
    match obj.get("id") {
        Some(Value::Number(n)) => n.as_u64().ok_or_else(|| McpdError::DecodeError {
            reason: format!("response id {n} is not a non-negative integer"),
        }),
        Some(other) => Err(McpdError::DecodeError {
            reason: format!("response id {other} is not an integer"),
        }),
        None => Err(McpdError::DecodeError {
            reason: "message has neither 'method' nor 'id'".into(),
        }),
    }
}

// ─── MCP payloads ────────────────────────────────────────────────────────────

/// Tool definition as returned by a backend's `tools/list`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolDefinition {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default = "default_input_schema", alias = "input_schema")]
    pub input_schema: Value,
}

fn default_input_schema() -> Value {
    serde_json::json!({"type": "object"})
}

/// `tools/list` result payload.
#[derive(Debug, Clone, Deserialize)]
pub struct ListToolsResult {
    #[serde(default)]
    pub tools: Vec<ToolDefinition>,
}

/// Params of the `initialize` request we send to backends.
pub fn initialize_params() -> Value {
    serde_json::json!({
        "protocolVersion": PROTOCOL_VERSION,
        "capabilities": {},
        "clientInfo": {
            "name": "mcpd",
            "version": env!("CARGO_PKG_VERSION"),
        },
    })
}

// ─── Standard Error Codes ────────────────────────────────────────────────────

/// Well-known JSON-RPC error codes.
pub mod error_codes {
    /// Invalid JSON was received.
    pub const PARSE_ERROR: i64 = -32700;
    /// The method does not exist or is not available.
    pub const METHOD_NOT_FOUND: i64 = -32601;
    /// Invalid method parameters.
    pub const INVALID_PARAMS: i64 = -32602;
    /// Internal JSON-RPC error.
    pub const INTERNAL_ERROR: i64 = -32603;
}

// ─── Tests ───────────────────────────────────────────────────────────────────
