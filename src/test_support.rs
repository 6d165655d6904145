//! Shared fixtures for unit tests: a scripted MCP backend and spec builders.

use std::time::Duration;

use crate::registry::ToolSpec;
use crate::supervisor::SupervisorOptions;

/// A minimal MCP server in POSIX sh.
///
/// Answers `initialize`, `tools/list` (tools `echo` and `fail`), and
/// `tools/call` (`fail` returns a JSON-RPC error, anything else returns a
/// `pong` text item plus an image item). Lines without an id are ignored;
/// other methods get `-32601`.
pub const MOCK_BACKEND: &str = r#"
while IFS= read -r line; do
  id=$(printf '%s\n' "$line" | sed -n 's/^{"jsonrpc":"2.0","id":\([0-9]*\),.*/\1/p')
  [ -z "$id" ] && continue
  case "$line" in
    *'"method":"initialize"'*)
      printf '{"jsonrpc":"2.0","id":%s,"result":{"protocolVersion":"2024-11-05","capabilities":{"tools":{}},"serverInfo":{"name":"mock","version":"0.0.1"}}}\n' "$id" ;;
    *'"method":"tools/list"'*)
      printf '{"jsonrpc":"2.0","id":%s,"result":{"tools":[{"name":"echo","description":"Echo back","inputSchema":{"type":"object"}},{"name":"fail","description":"Always fails"}]}}\n' "$id" ;;
    *'"method":"tools/call"'*'"name":"fail"'*)
      printf '{"jsonrpc":"2.0","id":%s,"error":{"code":-32000,"message":"boom"}}\n' "$id" ;;
    *'"method":"tools/call"'*)
      printf '{"jsonrpc":"2.0","id":%s,"result":{"content":[{"type":"text","text":"pong"},{"type":"image","data":"AAAA","mimeType":"image/png"}]}}\n' "$id" ;;
    *)
      printf '{"jsonrpc":"2.0","id":%s,"error":{"code":-32601,"message":"Method not found"}}\n' "$id" ;;
  esac
done
"#;

pub fn spec(name: &str, argv: &[&str]) -> ToolSpec {
    ToolSpec::new(name, argv.iter().map(ToString::to_string).collect())
}

pub fn mock_backend_spec(name: &str) -> ToolSpec {
    spec(name, &["sh", "-c", MOCK_BACKEND])
}

/// No handshake (so the first call gets id 1) and short timeouts.
pub fn quiet_options() -> SupervisorOptions {
    SupervisorOptions {
        call_timeout: Duration::from_secs(5),
        shutdown_timeout: Duration::from_secs(2),
        handshake: false,
    }
}
