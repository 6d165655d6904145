//! Unix-socket control server.
//!
//! The socket is created owner-only (0600) and removed when the
//! [`ControlPlane`] is dropped, so its lifetime matches one daemon run.
//! Connections are handled on their own tasks; a bad connection never reaches
//! the accept loop.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{watch, Semaphore};

use super::commands::{ControlCommand, ControlResponse, ToolSummary};
use crate::errors::McpdError;
use crate::router::AggregationRouter;

const SOCKET_MODE: u32 = 0o600;
const DIRECTORY_MODE: u32 = 0o700;

/// Concurrent control connections.
const MAX_CONNECTIONS: usize = 32;

/// Largest request line accepted.
const MAX_REQUEST_BYTES: u64 = 64 * 1024;

/// How long a client may take to send its request.
const READ_TIMEOUT: Duration = Duration::from_secs(10);

pub struct ControlPlane {
    router: Arc<AggregationRouter>,
    listener: UnixListener,
    socket: SocketFile,
    connections: Arc<Semaphore>,
}

impl ControlPlane {
    /// Bind the control socket at `path`.
    ///
    /// Fails if another daemon is answering on `path`, or if the socket
    /// cannot be created. A stale socket left by a crashed run is replaced.
    pub async fn bind(path: &Path, router: Arc<AggregationRouter>) -> Result<Self, McpdError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            ensure_directory(parent).map_err(|e| socket_error(path, e))?;
        }
        remove_stale_socket(path).await?;

        let listener = bind_private(path).map_err(|e| socket_error(path, e))?;
        // From here on the file is ours to clean up.
        let socket = SocketFile(path.to_path_buf());

        tracing::info!(path = %path.display(), "control socket listening");
        Ok(Self {
            router,
            listener,
            socket,
            connections: Arc::new(Semaphore::new(MAX_CONNECTIONS)),
        })
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket.0
    }

    /// Accept connections until `shutdown` flips to `true` (or its sender is
    /// dropped). Consumes the plane: the listener is closed and the socket
    /// file removed on return.
    pub async fn serve(self, mut shutdown: watch::Receiver<bool>) {
        loop {
            if *shutdown.borrow() {
                break;
            }

            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, _)) => self.spawn_connection(stream),
                    Err(e) => {
                        tracing::warn!(error = %e, "control accept failed");
                    }
                },
            }
        }

        tracing::info!(path = %self.socket_path().display(), "control socket closing");
    }

    fn spawn_connection(&self, stream: UnixStream) {
        let Ok(permit) = Arc::clone(&self.connections).try_acquire_owned() else {
            tracing::warn!("too many control connections; dropping one");
            return;
        };
        let router = Arc::clone(&self.router);
        tokio::spawn(async move {
            if let Err(e) = handle_connection(stream, &router).await {
                tracing::debug!(error = %e, "control connection ended with error");
            }
            drop(permit);
        });
    }
}

// ─── Connection handling ─────────────────────────────────────────────────────

async fn handle_connection(stream: UnixStream, router: &AggregationRouter) -> io::Result<()> {
    let (read_half, mut write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half.take(MAX_REQUEST_BYTES));
    let mut line = String::new();

    let response = match tokio::time::timeout(READ_TIMEOUT, reader.read_line(&mut line)).await {
        Err(_) => ControlResponse::error("timed out waiting for request"),
        Ok(Err(e)) => ControlResponse::error(format!("invalid request: {e}")),
        Ok(Ok(0)) => return Ok(()),
        Ok(Ok(_)) => match ControlCommand::parse(line.trim()) {
            Ok(cmd) => handle_command(router, cmd).await,
            Err(message) => ControlResponse::error(message),
        },
    };

    let mut payload = serde_json::to_vec(&response).map_err(io::Error::other)?;
    payload.push(b'\n');
    write_half.write_all(&payload).await?;
    write_half.shutdown().await
}

/// Execute one control command against the router.
pub async fn handle_command(router: &AggregationRouter, cmd: ControlCommand) -> ControlResponse {
    tracing::debug!(cmd = cmd.as_str(), "control command");
    match cmd {
        ControlCommand::Reload => match router.reload().await {
            Ok(count) => {
                tracing::info!(tools = count, "registry reloaded via control socket");
                ControlResponse::reloaded(count)
            }
            Err(e) => {
                tracing::warn!(error = %e, "reload failed");
                ControlResponse::error(e.to_string())
            }
        },
        ControlCommand::List => {
            let tools = router
                .supervisors()
                .await
                .iter()
                .map(|sup| ToolSummary::from(&**sup.spec()))
                .collect();
            ControlResponse::listing(tools)
        }
        ControlCommand::Ping => ControlResponse::ok(),
        ControlCommand::Unknown(other) => ControlResponse::unknown_command(&other),
    }
}

// ─── Socket file ─────────────────────────────────────────────────────────────

/// Removes the socket file on drop.
struct SocketFile(PathBuf);

impl Drop for SocketFile {
    fn drop(&mut self) {
        match std::fs::remove_file(&self.0) {
            Ok(()) => tracing::debug!(path = %self.0.display(), "removed control socket"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => {
                tracing::warn!(path = %self.0.display(), error = %e, "failed to remove control socket");
            }
        }
    }
}

fn socket_error(path: &Path, e: impl std::fmt::Display) -> McpdError {
    McpdError::ControlSocket {
        path: path.to_path_buf(),
        reason: e.to_string(),
    }
}

/// Create the socket directory (0700) if missing. Existing directories keep
/// their permissions.
fn ensure_directory(dir: &Path) -> io::Result<()> {
    match std::fs::symlink_metadata(dir) {
        Ok(meta) if meta.is_dir() => Ok(()),
        Ok(_) => Err(io::Error::new(
            io::ErrorKind::AlreadyExists,
            format!("{} exists but is not a directory", dir.display()),
        )),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            std::fs::create_dir_all(dir)?;
            set_mode(dir, DIRECTORY_MODE)
        }
        Err(e) => Err(e),
    }
}

/// Bind in a fresh 0700 directory beside `path`, narrow the socket to 0600,
/// then rename it into place. The socket is never reachable at `path` with
/// the umask's bits, whatever the parent directory allows.
fn bind_private(path: &Path) -> io::Result<UnixListener> {
    use std::os::unix::fs::DirBuilderExt;

    static STAGING_SEQ: AtomicU64 = AtomicU64::new(0);

    let parent = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let staging = parent.join(format!(
        ".mcpd-bind.{}.{}",
        std::process::id(),
        STAGING_SEQ.fetch_add(1, Ordering::Relaxed)
    ));
    std::fs::DirBuilder::new().mode(DIRECTORY_MODE).create(&staging)?;

    let staged = staging.join("s");
    let bound = bind_staged(&staged, path);
    let _ = std::fs::remove_file(&staged);
    let _ = std::fs::remove_dir(&staging);
    bound
}

fn bind_staged(staged: &Path, path: &Path) -> io::Result<UnixListener> {
    let listener = UnixListener::bind(staged)?;
    set_mode(staged, SOCKET_MODE)?;
    std::fs::rename(staged, path)?;
    Ok(listener)
}

fn set_mode(path: &Path, mode: u32) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode))
}

/// Remove a socket file left behind by a previous run.
///
/// A socket that still accepts connections belongs to a live daemon and is
/// left alone. Non-socket files are never removed.
async fn remove_stale_socket(path: &Path) -> Result<(), McpdError> {
    use std::os::unix::fs::FileTypeExt;

    let meta = match std::fs::symlink_metadata(path) {
        Ok(meta) => meta,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(socket_error(path, e)),
    };

    if !meta.file_type().is_socket() {
        return Err(socket_error(path, "path exists but is not a socket"));
    }

    if UnixStream::connect(path).await.is_ok() {
        return Err(socket_error(path, "another mcpd daemon is already listening"));
    }

    std::fs::remove_file(path).map_err(|e| socket_error(path, e))?;
    tracing::debug!(path = %path.display(), "removed stale control socket");
    Ok(())
}

// ─── Tests ───────────────────────────────────────────────────────────────────
