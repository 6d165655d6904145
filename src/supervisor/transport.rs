//! Line-delimited JSON-RPC over a child process's stdio.
//!
//! - [`FrameWriter`] writes one JSON object per line to stdin and flushes
//! - [`read_loop`] reads stdout, decodes each line, and resolves pending ids
//! - [`drain_stderr`] keeps stderr flowing into the log

use std::sync::Arc;

use serde::Serialize;
use tokio::io::{
    AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader,
};

use super::pending::PendingTable;
use crate::errors::McpdError;
use crate::protocol::IncomingMessage;

/// Longest slice of an undecodable line that is echoed into the log.
const LOG_LINE_LIMIT: usize = 512;

/// Largest response line accepted from a backend. Longer lines are skipped.
pub const MAX_LINE_BYTES: u64 = 32 * 1024 * 1024;

// ─── Writer ──────────────────────────────────────────────────────────────────

/// Writes newline-framed JSON to a backend.
#[derive(Debug)]
pub struct FrameWriter<W> {
    server: String,
    inner: W,
}

impl<W: AsyncWrite + Unpin> FrameWriter<W> {
    pub fn new(server: &str, inner: W) -> Self {
        Self {
            server: server.to_string(),
            inner,
        }
    }

    /// Serialize `message`, append `\n`, write, and flush.
    pub async fn send<T: Serialize>(&mut self, message: &T) -> Result<(), McpdError> {
        let mut json = serde_json::to_string(message).map_err(|e| McpdError::TransportError {
            server: self.server.clone(),
            reason: format!("failed to serialize message: {e}"),
        })?;
        json.push('\n');

        self.inner
            .write_all(json.as_bytes())
            .await
            .map_err(|e| McpdError::TransportError {
                server: self.server.clone(),
                reason: format!("failed to write to stdin: {e}"),
            })?;
        self.inner
            .flush()
            .await
            .map_err(|e| McpdError::TransportError {
                server: self.server.clone(),
                reason: format!("failed to flush stdin: {e}"),
            })
    }
}

// ─── Reader ──────────────────────────────────────────────────────────────────

/// Read responses until end-of-stream, resolving entries in `pending`.
///
/// Undecodable lines are logged and skipped, as are lines longer than
/// [`MAX_LINE_BYTES`]. Responses with no waiting request are dropped. When
/// the stream ends, whatever is still pending in this generation's table is
/// cancelled.
pub async fn read_loop<R: AsyncRead + Unpin>(
    server: String,
    stdout: R,
    pending: Arc<PendingTable>,
) {
    read_lines(&server, stdout, &pending, MAX_LINE_BYTES).await;

    let cancelled = pending.cancel_all(&server, "backend closed its output").await;
    if cancelled > 0 {
        tracing::warn!(server = %server, cancelled, "backend exited with requests in flight");
    }
}

async fn read_lines<R: AsyncRead + Unpin>(
    server: &str,
    stdout: R,
    pending: &PendingTable,
    max_line: u64,
) {
    let mut reader = BufReader::new(stdout);
    let mut buf = Vec::new();

    loop {
        buf.clear();
        let read = (&mut reader).take(max_line).read_until(b'\n', &mut buf).await;
        match read {
            Ok(0) => {
                tracing::debug!(server = %server, "backend closed stdout");
                return;
            }
            Ok(n) if n as u64 == max_line && buf.last() != Some(&b'\n') => {
                tracing::warn!(server = %server, limit = max_line, "discarding oversized line from backend");
                if let Err(e) = skip_line(&mut reader).await {
                    tracing::warn!(server = %server, error = %e, "read error on backend stdout");
                    return;
                }
            }
            Ok(_) => {
                let line = String::from_utf8_lossy(&buf);
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    continue;
                }
                handle_line(server, trimmed, pending).await;
            }
            Err(e) => {
                tracing::warn!(server = %server, error = %e, "read error on backend stdout");
                return;
            }
        }
    }
}

/// Consume input up to and including the next newline without buffering it.
async fn skip_line<R: AsyncBufRead + Unpin>(reader: &mut R) -> std::io::Result<()> {
    loop {
        let (found, used) = {
            let available = reader.fill_buf().await?;
            if available.is_empty() {
                return Ok(());
            }
            match available.iter().position(|&b| b == b'\n') {
                Some(i) => (true, i + 1),
                None => (false, available.len()),
            }
        };
        reader.consume(used);
        if found {
            return Ok(());
        }
    }
}

async fn handle_line(server: &str, line: &str, pending: &PendingTable) {
    let message = match IncomingMessage::decode(line) {
        Ok(message) => message,
        Err(e) => {
            tracing::warn!(
                server = %server,
                error = %e,
                line = %truncate(line, LOG_LINE_LIMIT),
                "discarding undecodable line from backend"
            );
            return;
        }
    };

    match message.response_id() {
        Some(id) => {
            if !pending.resolve(id, message).await {
                tracing::debug!(server = %server, id, "discarding response with no pending request");
            }
        }
        None => {
            tracing::debug!(server = %server, message = ?message, "ignoring backend-initiated message");
        }
    }
}

/// Forward each stderr line from a backend into the log.
pub async fn drain_stderr<R: AsyncRead + Unpin>(server: String, stderr: R) {
    let mut lines = BufReader::new(stderr).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => tracing::debug!(server = %server, stderr = %line, "backend stderr"),
            Ok(None) => break,
            Err(e) => {
                tracing::debug!(server = %server, error = %e, "stopped reading backend stderr");
                break;
            }
        }
    }
}

/// Truncate to at most `max` bytes on a char boundary.
fn truncate(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

// ─── Tests ───────────────────────────────────────────────────────────────────
