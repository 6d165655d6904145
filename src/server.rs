//! Host-facing MCP server over stdio.
//!
//! Exposes the router's merged catalog to one MCP client. Requests are handled
//! concurrently, so a slow backend does not hold up calls to the others;
//! replies are written in completion order, each on its own line.

use std::sync::Arc;

use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::{mpsc, watch};

use crate::errors::McpdError;
use crate::protocol::{error_codes, IncomingMessage, RequestId, RpcResponse, PROTOCOL_VERSION};
use crate::router::AggregationRouter;

const SERVER_NAME: &str = "mcpd";

pub struct HostServer {
    router: Arc<AggregationRouter>,
}

impl HostServer {
    pub fn new(router: Arc<AggregationRouter>) -> Self {
        Self { router }
    }

    /// Serve until `input` reaches end-of-stream or `shutdown` fires.
    ///
    /// On end-of-stream, replies to requests already in flight are still
    /// written before returning.
    pub async fn run<R, W>(
        &self,
        input: R,
        mut output: W,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<(), McpdError>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mut lines = BufReader::new(input).lines();
        let (tx, mut rx) = mpsc::unbounded_channel::<RpcResponse>();

        loop {
            tokio::select! {
                line = lines.next_line() => match line {
                    Ok(Some(line)) => self.accept_line(&line, &tx),
                    Ok(None) => {
                        tracing::info!("host closed stdin");
                        break;
                    }
                    Err(e) => {
                        return Err(host_io_error("failed to read stdin", e));
                    }
                },
                Some(response) = rx.recv() => write_response(&mut output, &response).await?,
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        return Ok(());
                    }
                }
            }
        }

        drop(tx);
        while let Some(response) = rx.recv().await {
            write_response(&mut output, &response).await?;
        }
        Ok(())
    }

    fn accept_line(&self, line: &str, tx: &mpsc::UnboundedSender<RpcResponse>) {
        let line = line.trim();
        if line.is_empty() {
            return;
        }

        match IncomingMessage::decode(line) {
            Ok(IncomingMessage::Request { id, method, params }) => {
                let router = Arc::clone(&self.router);
                let tx = tx.clone();
                tokio::spawn(async move {
                    let response = handle_request(&router, id, &method, params).await;
                    // The receiver only goes away on shutdown.
                    let _ = tx.send(response);
                });
            }
            Ok(IncomingMessage::Notification { method, .. }) => {
                tracing::debug!(method = %method, "host notification");
            }
            Ok(other) => {
                tracing::debug!(message = ?other, "ignoring response from host");
            }
            Err(e) => {
                tracing::warn!(error = %e, "undecodable line from host");
                let _ = tx.send(RpcResponse::error(
                    RequestId::Null,
                    error_codes::PARSE_ERROR,
                    e.to_string(),
                ));
            }
        }
    }
}

async fn handle_request(
    router: &AggregationRouter,
    id: RequestId,
    method: &str,
    params: Value,
) -> RpcResponse {
    tracing::debug!(method, "host request");
    match method {
        "initialize" => RpcResponse::success(id, initialize_result()),
        "ping" => RpcResponse::success(id, json!({})),
        "tools/list" => {
            let tools = router.list_tools().await;
            match serde_json::to_value(tools) {
                Ok(tools) => RpcResponse::success(id, json!({"tools": tools})),
                Err(e) => RpcResponse::error(id, error_codes::INTERNAL_ERROR, e.to_string()),
            }
        }
        "tools/call" => {
            let (name, arguments) = match call_params(params) {
                Ok(parsed) => parsed,
                Err(message) => return RpcResponse::error(id, error_codes::INVALID_PARAMS, message),
            };
            let outcome = router.dispatch(&name, arguments).await;
            match serde_json::to_value(outcome) {
                Ok(result) => RpcResponse::success(id, result),
                Err(e) => RpcResponse::error(id, error_codes::INTERNAL_ERROR, e.to_string()),
            }
        }
        other => RpcResponse::error(
            id,
            error_codes::METHOD_NOT_FOUND,
            format!("Method not found: {other}"),
        ),
    }
}

fn initialize_result() -> Value {
    json!({
        "protocolVersion": PROTOCOL_VERSION,
        "capabilities": {"tools": {"listChanged": false}},
        "serverInfo": {
            "name": SERVER_NAME,
            "version": env!("CARGO_PKG_VERSION"),
        },
    })
}

/// Extract `name` and `arguments` (default `{}`) from `tools/call` params.
fn call_params(params: Value) -> Result<(String, Value), String> {
    let Value::Object(mut obj) = params else {
        return Err("tools/call params must be an object".into());
    };
    let name = match obj.remove("name") {
        Some(Value::String(name)) => name,
        _ => return Err("tools/call requires a string 'name'".into()),
    };
    let arguments = match obj.remove("arguments") {
        None | Some(Value::Null) => json!({}),
        Some(args @ Value::Object(_)) => args,
        Some(_) => return Err("tools/call 'arguments' must be an object".into()),
    };
    Ok((name, arguments))
}

async fn write_response<W: AsyncWrite + Unpin>(
    output: &mut W,
    response: &RpcResponse,
) -> Result<(), McpdError> {
    let mut line = serde_json::to_vec(response).map_err(|e| McpdError::DecodeError {
        reason: format!("failed to encode response: {e}"),
    })?;
    line.push(b'\n');
    output
        .write_all(&line)
        .await
        .map_err(|e| host_io_error("failed to write stdout", e))?;
    output
        .flush()
        .await
        .map_err(|e| host_io_error("failed to flush stdout", e))
}

fn host_io_error(context: &str, e: std::io::Error) -> McpdError {
    McpdError::TransportError {
        server: SERVER_NAME.into(),
        reason: format!("{context}: {e}"),
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::Registry;
    use crate::test_support::{mock_backend_spec, quiet_options};
    use tempfile::TempDir;
    use tokio::io::AsyncReadExt;

    /// Feed `input` to a server over `alpha` and collect every reply line.
    async fn exchange(input: &str) -> Vec<Value> {
        let tmp = TempDir::new().unwrap();
        let mut registry = Registry::load_from(tmp.path().join("registry.json")).unwrap();
        registry.register(mock_backend_spec("alpha")).unwrap();
        let router = Arc::new(AggregationRouter::new(registry, quiet_options()));
        let server = HostServer::new(Arc::clone(&router));

        let (mut host_in, server_in) = tokio::io::duplex(64 * 1024);
        let (server_out, mut host_out) = tokio::io::duplex(64 * 1024);
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);

        host_in.write_all(input.as_bytes()).await.unwrap();
        drop(host_in);

        server.run(server_in, server_out, shutdown_rx).await.unwrap();
        router.shutdown().await;

        let mut raw = String::new();
        host_out.read_to_string(&mut raw).await.unwrap();
        raw.lines().map(|l| serde_json::from_str(l).unwrap()).collect()
    }

    fn by_id(replies: &[Value], id: i64) -> &Value {
        replies.iter().find(|r| r["id"] == id).unwrap()
    }

    #[tokio::test]
    async fn test_initialize_and_ping() {
        let replies = exchange(concat!(
            r#"{"jsonrpc":"2.0","id":1,"method":"initialize","params":{}}"#, "\n",
            r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#, "\n",
            r#"{"jsonrpc":"2.0","id":2,"method":"ping"}"#, "\n",
        ))
        .await;

        assert_eq!(replies.len(), 2);
        let init = by_id(&replies, 1);
        assert_eq!(init["result"]["protocolVersion"], PROTOCOL_VERSION);
        assert_eq!(init["result"]["serverInfo"]["name"], "mcpd");
        assert_eq!(by_id(&replies, 2)["result"], json!({}));
    }

    #[tokio::test]
    async fn test_tools_list_and_call() {
        let replies = exchange(concat!(
            r#"{"jsonrpc":"2.0","id":1,"method":"tools/list"}"#, "\n",
            r#"{"jsonrpc":"2.0","id":2,"method":"tools/call","params":{"name":"alpha__echo","arguments":{}}}"#, "\n",
        ))
        .await;

        let tools = by_id(&replies, 1)["result"]["tools"].as_array().unwrap().clone();
        let names: Vec<&str> = tools.iter().map(|t| t["name"].as_str().unwrap()).collect();
        assert_eq!(names, vec!["alpha__echo", "alpha__fail"]);
        assert_eq!(tools[0]["inputSchema"], json!({"type": "object"}));

        let call = &by_id(&replies, 2)["result"];
        assert_eq!(call["isError"], false);
        assert_eq!(call["content"][0], json!({"type": "text", "text": "pong"}));
    }

    #[tokio::test]
    async fn test_call_errors_are_results_not_rpc_errors() {
        let replies = exchange(concat!(
            r#"{"jsonrpc":"2.0","id":1,"method":"tools/call","params":{"name":"alpha__fail"}}"#, "\n",
            r#"{"jsonrpc":"2.0","id":2,"method":"tools/call","params":{"name":"ghost__tool"}}"#, "\n",
        ))
        .await;

        let failed = &by_id(&replies, 1)["result"];
        assert_eq!(failed["isError"], true);
        assert_eq!(failed["content"][0]["text"], "Error: server error [-32000]: boom");

        let unknown = &by_id(&replies, 2)["result"];
        assert_eq!(unknown["content"][0]["text"], "Unknown tool: ghost__tool");
    }

    #[tokio::test]
    async fn test_protocol_errors() {
        let replies = exchange(concat!(
            "garbage\n",
            r#"{"jsonrpc":"2.0","id":"a","method":"resources/list"}"#, "\n",
            r#"{"jsonrpc":"2.0","id":3,"method":"tools/call","params":{"arguments":{}}}"#, "\n",
        ))
        .await;

        assert_eq!(replies.len(), 3);
        let parse = replies.iter().find(|r| r["id"].is_null()).unwrap();
        assert_eq!(parse["error"]["code"], error_codes::PARSE_ERROR);

        let missing = replies.iter().find(|r| r["id"] == "a").unwrap();
        assert_eq!(missing["error"]["code"], error_codes::METHOD_NOT_FOUND);

        assert_eq!(by_id(&replies, 3)["error"]["code"], error_codes::INVALID_PARAMS);
    }

    #[test]
    fn test_call_params_defaults_arguments() {
        let (name, args) = call_params(json!({"name": "a__b"})).unwrap();
        assert_eq!(name, "a__b");
        assert_eq!(args, json!({}));
        assert!(call_params(json!({"name": "a__b", "arguments": [1]})).is_err());
        assert!(call_params(json!(null)).is_err());
    }
}
