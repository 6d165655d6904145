//! Client side of the control socket, used by the CLI.

use std::path::Path;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;

use super::commands::{ControlRequest, ControlResponse};
use crate::errors::McpdError;

const CLIENT_TIMEOUT: Duration = Duration::from_secs(30);

/// Send `{"cmd": cmd}` to the daemon at `socket` and return its reply.
pub async fn send_command(socket: &Path, cmd: &str) -> Result<ControlResponse, McpdError> {
    tokio::time::timeout(CLIENT_TIMEOUT, exchange(socket, cmd))
        .await
        .map_err(|_| McpdError::ControlSocket {
            path: socket.to_path_buf(),
            reason: format!("no reply to '{cmd}' within {}s", CLIENT_TIMEOUT.as_secs()),
        })?
}

async fn exchange(socket: &Path, cmd: &str) -> Result<ControlResponse, McpdError> {
    let err = |reason: String| McpdError::ControlSocket {
        path: socket.to_path_buf(),
        reason,
    };

    let stream = UnixStream::connect(socket)
        .await
        .map_err(|e| err(format!("failed to connect: {e}")))?;
    let (read_half, mut write_half) = stream.into_split();

    let mut request = serde_json::to_vec(&ControlRequest { cmd })
        .map_err(|e| err(format!("failed to encode request: {e}")))?;
    request.push(b'\n');
    write_half
        .write_all(&request)
        .await
        .map_err(|e| err(format!("failed to send request: {e}")))?;

    let mut line = String::new();
    BufReader::new(read_half)
        .read_line(&mut line)
        .await
        .map_err(|e| err(format!("failed to read reply: {e}")))?;
    if line.trim().is_empty() {
        return Err(err("daemon closed the connection without replying".into()));
    }

    serde_json::from_str(line.trim()).map_err(|e| McpdError::DecodeError {
        reason: format!("malformed control reply: {e}"),
    })
}
