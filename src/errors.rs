//! mcpd error types.

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur while supervising, routing, or controlling backends.
#[derive(Debug, Error)]
pub enum McpdError {
    /// A backend process failed to start.
    #[error("failed to spawn server '{name}': {reason}")]
    SpawnFailed { name: String, reason: String },

    /// The MCP initialization handshake failed.
    #[error("server '{name}' initialization failed: {reason}")]
    InitFailed { name: String, reason: String },

    /// I/O failure on a backend's pipes (write error, closed stdin).
    #[error("transport error for server '{server}': {reason}")]
    TransportError { server: String, reason: String },

    /// Backend returned a JSON-RPC error response.
    #[error("server error [{code}]: {message}")]
    ServerError {
        code: i64,
        message: String,
        data: Option<serde_json::Value>,
    },

    /// No response arrived within the call's time bound.
    #[error("request '{method}' to server '{server}' timed out after {timeout_ms}ms")]
    Timeout {
        server: String,
        method: String,
        timeout_ms: u64,
    },

    /// The request was still pending when its supervisor stopped.
    #[error("request to server '{server}' cancelled: {reason}")]
    Cancelled { server: String, reason: String },

    /// A line did not decode into a known JSON-RPC message shape.
    #[error("protocol decode error: {reason}")]
    DecodeError { reason: String },

    /// Tool not found in the aggregated catalog.
    #[error("Unknown tool: {name}")]
    UnknownTool { name: String },

    /// Registry file could not be read, parsed, or written.
    #[error("registry error for {}: {reason}", path.display())]
    RegistryError { path: PathBuf, reason: String },

    /// Configuration error (unresolvable directories, bad config file).
    #[error("config error: {reason}")]
    ConfigError { reason: String },

    /// The control socket could not be created or bound.
    #[error("control socket {}: {reason}", path.display())]
    ControlSocket { path: PathBuf, reason: String },
}

impl McpdError {
    /// Whether this error means the backend never produced an answer
    /// (as opposed to answering with an error).
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            McpdError::Timeout { .. }
                | McpdError::Cancelled { .. }
                | McpdError::TransportError { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_message_includes_bound() {
        let err = McpdError::Timeout {
            server: "echo".into(),
            method: "tools/list".into(),
            timeout_ms: 250,
        };
        assert_eq!(
            err.to_string(),
            "request 'tools/list' to server 'echo' timed out after 250ms"
        );
    }

    #[test]
    fn test_server_error_message() {
        let err = McpdError::ServerError {
            code: -32601,
            message: "Method not found".into(),
            data: None,
        };
        assert_eq!(err.to_string(), "server error [-32601]: Method not found");
    }

    #[test]
    fn test_is_transient() {
        let cancelled = McpdError::Cancelled {
            server: "x".into(),
            reason: "supervisor stopped".into(),
        };
        assert!(cancelled.is_transient());

        let unknown = McpdError::UnknownTool { name: "x__y".into() };
        assert!(!unknown.is_transient());
    }
}
