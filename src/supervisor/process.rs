//! Process lifecycle for a single backend.
//!
//! A [`ProcessSupervisor`] owns at most one live child at a time. `start` and
//! `stop` are serialized through the lifecycle mutex. `call` holds that mutex
//! only to auto-start and grab the backend's [`Channel`]; the write and the
//! wait happen outside it, under the caller's deadline. Writes are serialized
//! by the channel's own writer lock and ids are assigned under it, so requests
//! hit stdin in id order while replies may arrive in any order.
//!
//! `stop` never waits on a write: it takes the child out of the slot and
//! terminates it, which breaks any write still blocked on a full pipe.

use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use serde_json::Value;
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;

use super::pending::PendingTable;
use super::transport::{self, FrameWriter};
use super::SupervisorOptions;
use crate::errors::McpdError;
use crate::protocol::{self, RpcNotification, RpcRequest};
use crate::registry::ToolSpec;

// ─── Backend ─────────────────────────────────────────────────────────────────

/// Write side of one backend generation, shared with in-flight calls.
#[derive(Clone)]
struct Channel {
    writer: Arc<Mutex<FrameWriter<ChildStdin>>>,
    /// Owned by this generation only, so a reply from an old process can
    /// never land in a table created after a restart.
    pending: Arc<PendingTable>,
}

/// One spawned generation of a backend process.
struct Backend {
    child: Child,
    pid: Option<u32>,
    generation: u64,
    channel: Channel,
    reader: JoinHandle<()>,
    stderr: Option<JoinHandle<()>>,
}

impl Backend {
    fn is_alive(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(None))
    }

    /// Cancel in-flight requests, ask the process to exit, and kill it if it
    /// does not within `grace`.
    async fn shutdown(self, server: &str, grace: Duration, reason: &str) {
        let Backend {
            mut child,
            pid,
            generation,
            channel,
            reader,
            stderr,
        } = self;

        reader.abort();
        let cancelled = channel.pending.cancel_all(server, reason).await;
        if cancelled > 0 {
            tracing::info!(server, generation, cancelled, "cancelled in-flight requests");
        }

        // Drop our handle on stdin, then SIGTERM. A caller still mid-write
        // keeps the pipe open until the process dies.
        drop(channel);
        let live_pid = match child.try_wait() {
            Ok(None) => child.id().and_then(|p| i32::try_from(p).ok()),
            _ => None,
        };
        if let Some(pid) = live_pid {
            if let Err(e) = kill(Pid::from_raw(pid), Signal::SIGTERM) {
                tracing::debug!(server, pid, error = %e, "SIGTERM not delivered");
            }
        }

        match tokio::time::timeout(grace, child.wait()).await {
            Ok(Ok(status)) => {
                tracing::info!(server, generation, pid = ?pid, status = %status, "backend exited");
            }
            Ok(Err(e)) => {
                tracing::warn!(server, generation, error = %e, "failed waiting for backend exit");
            }
            Err(_) => {
                tracing::warn!(
                    server,
                    generation,
                    grace_ms = grace.as_millis() as u64,
                    "backend ignored SIGTERM; killing"
                );
                if let Err(e) = child.kill().await {
                    tracing::warn!(server, generation, error = %e, "failed to kill backend");
                }
            }
        }

        if let Some(handle) = stderr {
            handle.abort();
        }
    }
}

// ─── ProcessSupervisor ───────────────────────────────────────────────────────

/// Supervises one backend subprocess and exposes a `call` primitive over it.
pub struct ProcessSupervisor {
    spec: Arc<ToolSpec>,
    options: SupervisorOptions,
    lifecycle: Mutex<Option<Backend>>,
    next_id: AtomicU64,
    generations: AtomicU64,
    /// Bumped by `stop` before it queues for the lifecycle lock, so a
    /// handshake holding that lock gives up instead of making it wait.
    stop_requests: watch::Sender<u64>,
}

impl std::fmt::Debug for ProcessSupervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessSupervisor")
            .field("name", &self.spec.name)
            .field("command", &self.spec.command)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl ProcessSupervisor {
    pub fn new(spec: Arc<ToolSpec>, options: SupervisorOptions) -> Self {
        let (stop_requests, _) = watch::channel(0);
        Self {
            spec,
            options,
            lifecycle: Mutex::new(None),
            next_id: AtomicU64::new(1),
            generations: AtomicU64::new(0),
            stop_requests,
        }
    }

    /// Backend id (the registered tool name).
    pub fn name(&self) -> &str {
        &self.spec.name
    }

    pub fn spec(&self) -> &Arc<ToolSpec> {
        &self.spec
    }

    pub fn options(&self) -> &SupervisorOptions {
        &self.options
    }

    // ─── Lifecycle ───────────────────────────────────────────────────────

    /// Spawn the backend unless one is already running.
    pub async fn start(&self) -> Result<(), McpdError> {
        let mut stopped = self.stop_requests.subscribe();
        let mut slot = self.lifecycle.lock().await;
        self.ensure_running(&mut slot, &mut stopped).await?;
        Ok(())
    }

    /// Stop the backend. Safe to call when nothing is running.
    ///
    /// Does not wait for in-flight writes; those fail once the process is
    /// gone.
    pub async fn stop(&self) {
        self.stop_requests.send_modify(|n| *n = n.wrapping_add(1));
        let mut slot = self.lifecycle.lock().await;
        if let Some(backend) = slot.take() {
            tracing::info!(server = %self.spec.name, pid = ?backend.pid, "stopping backend");
            backend
                .shutdown(&self.spec.name, self.options.shutdown_timeout, "supervisor stopped")
                .await;
        }
    }

    /// Whether a live child is currently attached.
    pub async fn is_running(&self) -> bool {
        let mut slot = self.lifecycle.lock().await;
        slot.as_mut().is_some_and(Backend::is_alive)
    }

    /// OS process id of the current backend, if one is attached.
    pub async fn pid(&self) -> Option<u32> {
        self.lifecycle.lock().await.as_ref().and_then(|b| b.pid)
    }

    /// Number of processes spawned so far.
    pub fn generation(&self) -> u64 {
        self.generations.load(Ordering::Relaxed)
    }

    /// Requests awaiting a reply from the current backend.
    pub async fn pending_requests(&self) -> usize {
        let pending = self
            .lifecycle
            .lock()
            .await
            .as_ref()
            .map(|b| Arc::clone(&b.channel.pending));
        match pending {
            Some(table) => table.len().await,
            None => 0,
        }
    }

    async fn ensure_running<'a>(
        &self,
        slot: &'a mut Option<Backend>,
        stopped: &mut watch::Receiver<u64>,
    ) -> Result<&'a mut Backend, McpdError> {
        let alive = slot.as_mut().is_some_and(Backend::is_alive);
        if !alive {
            if let Some(dead) = slot.take() {
                tracing::warn!(server = %self.spec.name, pid = ?dead.pid, "backend exited; respawning");
                dead.shutdown(&self.spec.name, self.options.shutdown_timeout, "backend exited")
                    .await;
            }
            *slot = Some(self.spawn_backend(stopped).await?);
        }

        slot.as_mut().ok_or_else(|| McpdError::SpawnFailed {
            name: self.spec.name.clone(),
            reason: "backend slot empty after spawn".into(),
        })
    }

    async fn spawn_backend(&self, stopped: &mut watch::Receiver<u64>) -> Result<Backend, McpdError> {
        let name = self.spec.name.as_str();
        let (program, args) = self.spec.command.split_first().ok_or(McpdError::SpawnFailed {
            name: name.to_string(),
            reason: "empty command".into(),
        })?;

        let mut cmd = Command::new(program);
        cmd.args(args)
            .envs(&self.spec.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|e| McpdError::SpawnFailed {
            name: name.to_string(),
            reason: format!("{program}: {e}"),
        })?;

        let stdin = child.stdin.take().ok_or(McpdError::SpawnFailed {
            name: name.to_string(),
            reason: "failed to capture stdin".into(),
        })?;
        let stdout = child.stdout.take().ok_or(McpdError::SpawnFailed {
            name: name.to_string(),
            reason: "failed to capture stdout".into(),
        })?;
        let stderr = child.stderr.take();

        let pid = child.id();
        let generation = self.generations.fetch_add(1, Ordering::Relaxed) + 1;
        let pending = Arc::new(PendingTable::new());

        let reader = tokio::spawn(transport::read_loop(
            name.to_string(),
            stdout,
            Arc::clone(&pending),
        ));
        let stderr = stderr.map(|s| tokio::spawn(transport::drain_stderr(name.to_string(), s)));

        tracing::info!(
            server = name,
            pid = ?pid,
            generation,
            command = ?self.spec.command,
            "backend started"
        );

        let backend = Backend {
            child,
            pid,
            generation,
            channel: Channel {
                writer: Arc::new(Mutex::new(FrameWriter::new(name, stdin))),
                pending,
            },
            reader,
            stderr,
        };

        if self.options.handshake {
            if let Err(e) = self.handshake(&backend.channel, stopped).await {
                backend
                    .shutdown(name, self.options.shutdown_timeout, "initialization failed")
                    .await;
                return Err(McpdError::InitFailed {
                    name: name.to_string(),
                    reason: e.to_string(),
                });
            }
        }

        Ok(backend)
    }

    /// MCP `initialize` request followed by the `initialized` notification.
    ///
    /// Runs under the lifecycle lock, so it is bounded by the call timeout and
    /// abandoned as soon as `stop` is requested.
    async fn handshake(
        &self,
        channel: &Channel,
        stopped: &mut watch::Receiver<u64>,
    ) -> Result<(), McpdError> {
        let deadline = tokio::time::Instant::now() + self.options.call_timeout;
        let initialize = async {
            let params = protocol::initialize_params();
            let result = self
                .exchange(channel, "initialize", &params, deadline, self.options.call_timeout)
                .await?;

            tracing::info!(
                server = %self.spec.name,
                backend_name = ?result.pointer("/serverInfo/name"),
                backend_version = ?result.pointer("/serverInfo/version"),
                "backend initialized"
            );

            let notify = async {
                channel
                    .writer
                    .lock()
                    .await
                    .send(&RpcNotification::new("notifications/initialized"))
                    .await
            };
            match tokio::time::timeout_at(deadline, notify).await {
                Ok(sent) => sent,
                Err(_) => Err(self.timeout_error("initialize", self.options.call_timeout)),
            }
        };

        tokio::select! {
            outcome = initialize => outcome,
            _ = stopped.changed() => Err(McpdError::Cancelled {
                server: self.spec.name.clone(),
                reason: "supervisor stopped during initialization".into(),
            }),
        }
    }

    // ─── Calls ───────────────────────────────────────────────────────────

    /// Call `method` with the default timeout.
    pub async fn call(&self, method: &str, params: Value) -> Result<Value, McpdError> {
        self.call_with_timeout(method, params, self.options.call_timeout)
            .await
    }

    /// Call `method`, starting the backend first if needed.
    ///
    /// `timeout` bounds both writing the request and waiting for the reply.
    /// Fails with `Timeout` once it elapses (the pending entry is removed),
    /// `ServerError` for a JSON-RPC error reply, and `Cancelled` if the
    /// supervisor stops while the call is in flight.
    pub async fn call_with_timeout(
        &self,
        method: &str,
        params: Value,
        timeout: Duration,
    ) -> Result<Value, McpdError> {
        let channel = {
            let mut stopped = self.stop_requests.subscribe();
            let mut slot = self.lifecycle.lock().await;
            let backend = self.ensure_running(&mut slot, &mut stopped).await?;
            backend.channel.clone()
        };
        let deadline = tokio::time::Instant::now() + timeout;
        self.exchange(&channel, method, &params, deadline, timeout)
            .await
    }

    /// Write one request and wait for its reply, all before `deadline`.
    async fn exchange(
        &self,
        channel: &Channel,
        method: &str,
        params: &Value,
        deadline: tokio::time::Instant,
        timeout: Duration,
    ) -> Result<Value, McpdError> {
        let mut sent_id = None;
        let request = async {
            let rx = {
                let mut writer = channel.writer.lock().await;
                let id = self.next_id.fetch_add(1, Ordering::Relaxed);
                let rx = channel.pending.register(id).await;
                sent_id = Some(id);
                writer.send(&RpcRequest::new(id, method, params)).await?;
                tracing::debug!(server = %self.spec.name, id, method, "sent request");
                rx
            };

            match rx.await {
                Ok(Ok(message)) => message.into_result(),
                Ok(Err(e)) => Err(e),
                Err(_) => Err(McpdError::Cancelled {
                    server: self.spec.name.clone(),
                    reason: "completion slot dropped".into(),
                }),
            }
        };
        let outcome = tokio::time::timeout_at(deadline, request).await;

        match outcome {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => {
                if let Some(id) = sent_id {
                    channel.pending.forget(id).await;
                }
                Err(e)
            }
            Err(_) => {
                if let Some(id) = sent_id {
                    channel.pending.forget(id).await;
                }
                tracing::warn!(
                    server = %self.spec.name,
                    id = ?sent_id,
                    method,
                    timeout_ms = timeout.as_millis() as u64,
                    "request timed out"
                );
                Err(self.timeout_error(method, timeout))
            }
        }
    }

    fn timeout_error(&self, method: &str, timeout: Duration) -> McpdError {
        McpdError::Timeout {
            server: self.spec.name.clone(),
            method: method.to_string(),
            timeout_ms: timeout.as_millis() as u64,
        }
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{mock_backend_spec, quiet_options, spec};
    use serde_json::json;
    use std::time::Instant;
    use tempfile::TempDir;

    fn supervisor(spec: ToolSpec) -> Arc<ProcessSupervisor> {
        Arc::new(ProcessSupervisor::new(Arc::new(spec), quiet_options()))
    }

    #[tokio::test]
    async fn test_start_is_idempotent() {
        let sup = supervisor(spec("cat", &["cat"]));
        sup.start().await.unwrap();
        let pid = sup.pid().await;
        sup.start().await.unwrap();

        assert!(pid.is_some());
        assert_eq!(sup.pid().await, pid);
        assert_eq!(sup.generation(), 1);
        sup.stop().await;
    }

    #[tokio::test]
    async fn test_stop_is_idempotent_and_restart_gets_new_process() {
        let sup = supervisor(spec("cat", &["cat"]));
        sup.stop().await;

        sup.start().await.unwrap();
        let first = sup.pid().await.unwrap();
        sup.stop().await;
        sup.stop().await;
        assert!(!sup.is_running().await);
        assert_eq!(sup.pid().await, None);

        sup.start().await.unwrap();
        let second = sup.pid().await.unwrap();
        assert_ne!(first, second);
        assert_eq!(sup.generation(), 2);
        sup.stop().await;
    }

    #[tokio::test]
    async fn test_call_writes_framed_request() {
        let tmp = TempDir::new().unwrap();
        let capture = tmp.path().join("stdin.log");
        let sup = supervisor(spec(
            "echo",
            &["sh", "-c", "head -n 1 > \"$0\"; sleep 5", capture.to_str().unwrap()],
        ));

        let err = sup
            .call_with_timeout(
                "tools/call",
                json!({"name": "ping", "arguments": {}}),
                Duration::from_millis(500),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, McpdError::Timeout { .. }));

        let written = std::fs::read_to_string(&capture).unwrap();
        assert_eq!(
            written,
            "{\"jsonrpc\":\"2.0\",\"id\":1,\"method\":\"tools/call\",\"params\":{\"name\":\"ping\",\"arguments\":{}}}\n"
        );
        sup.stop().await;
    }

    #[tokio::test]
    async fn test_call_times_out_and_clears_pending() {
        // `cat` echoes our request back; a request is not a response, so
        // nothing ever resolves.
        let sup = supervisor(spec("silent", &["cat"]));
        let bound = Duration::from_millis(200);

        let started = Instant::now();
        let err = sup.call_with_timeout("tools/list", json!({}), bound).await.unwrap_err();
        let elapsed = started.elapsed();

        match err {
            McpdError::Timeout { timeout_ms, method, .. } => {
                assert_eq!(timeout_ms, 200);
                assert_eq!(method, "tools/list");
            }
            other => panic!("expected Timeout, got {other:?}"),
        }
        assert!(elapsed >= bound);
        assert!(elapsed < bound + Duration::from_secs(2));
        assert_eq!(sup.pending_requests().await, 0);
        assert!(sup.is_running().await, "a timeout must not kill the backend");
        sup.stop().await;
    }

    fn large_arguments() -> Value {
        // Several times the pipe buffer, so a backend that never reads
        // stdin blocks the write.
        json!({"name": "ping", "arguments": {"blob": "x".repeat(512 * 1024)}})
    }

    #[tokio::test]
    async fn test_call_times_out_while_write_is_blocked() {
        let sup = supervisor(spec("stall", &["sleep", "30"]));
        let bound = Duration::from_millis(500);

        let started = Instant::now();
        let err = sup
            .call_with_timeout("tools/call", large_arguments(), bound)
            .await
            .unwrap_err();
        let elapsed = started.elapsed();

        assert!(matches!(err, McpdError::Timeout { timeout_ms: 500, .. }), "got {err:?}");
        assert!(elapsed >= bound);
        assert!(elapsed < bound + Duration::from_secs(2), "took {elapsed:?}");
        assert_eq!(sup.pending_requests().await, 0);

        let started = Instant::now();
        sup.stop().await;
        assert!(started.elapsed() < quiet_options().shutdown_timeout);
    }

    #[tokio::test]
    async fn test_stop_does_not_wait_for_blocked_write() {
        let sup = supervisor(spec("stall", &["sleep", "30"]));
        sup.start().await.unwrap();

        let caller = {
            let sup = Arc::clone(&sup);
            tokio::spawn(async move {
                sup.call_with_timeout("tools/call", large_arguments(), Duration::from_secs(30))
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(300)).await;

        let started = Instant::now();
        sup.stop().await;
        assert!(started.elapsed() < quiet_options().shutdown_timeout);
        assert!(!sup.is_running().await);

        let outcome = tokio::time::timeout(Duration::from_secs(5), caller)
            .await
            .unwrap()
            .unwrap();
        assert!(outcome.is_err());
    }

    #[tokio::test]
    async fn test_stop_interrupts_handshake() {
        // `cat` never answers initialize; without interruption `start` would
        // hold the lifecycle lock for the whole call timeout.
        let sup = Arc::new(ProcessSupervisor::new(
            Arc::new(spec("silent", &["cat"])),
            SupervisorOptions {
                handshake: true,
                call_timeout: Duration::from_secs(30),
                ..quiet_options()
            },
        ));

        let starter = {
            let sup = Arc::clone(&sup);
            tokio::spawn(async move { sup.start().await })
        };
        tokio::time::sleep(Duration::from_millis(300)).await;

        let started = Instant::now();
        sup.stop().await;
        assert!(started.elapsed() < quiet_options().shutdown_timeout);

        let outcome = starter.await.unwrap();
        assert!(matches!(outcome, Err(McpdError::InitFailed { .. })));
        assert!(!sup.is_running().await);
    }

    #[tokio::test]
    async fn test_call_returns_result_and_server_errors() {
        let sup = supervisor(mock_backend_spec("mock"));

        let listed = sup.call("tools/list", json!({})).await.unwrap();
        assert_eq!(listed["tools"][0]["name"], "echo");

        let err = sup.call("resources/list", json!({})).await.unwrap_err();
        match err {
            McpdError::ServerError { code, message, .. } => {
                assert_eq!(code, -32601);
                assert_eq!(message, "Method not found");
            }
            other => panic!("expected ServerError, got {other:?}"),
        }
        sup.stop().await;
    }

    #[tokio::test]
    async fn test_concurrent_calls_get_distinct_ids() {
        let sup = supervisor(mock_backend_spec("mock"));
        let (a, b, c) = tokio::join!(
            sup.call("tools/list", json!({})),
            sup.call("tools/list", json!({})),
            sup.call("tools/list", json!({})),
        );
        assert!(a.is_ok() && b.is_ok() && c.is_ok());
        assert_eq!(sup.pending_requests().await, 0);
        sup.stop().await;
    }

    #[tokio::test]
    async fn test_env_overrides_are_applied() {
        let script = r#"read line; printf '{"jsonrpc":"2.0","id":1,"result":{"v":"%s"}}\n' "$MCPD_TEST_VALUE"; cat > /dev/null"#;
        let sup = supervisor(spec("env", &["sh", "-c", script]).with_env("MCPD_TEST_VALUE", "from-spec"));

        let result = sup.call("probe", json!({})).await.unwrap();
        assert_eq!(result, json!({"v": "from-spec"}));
        sup.stop().await;
    }

    #[tokio::test]
    async fn test_stop_cancels_in_flight_calls() {
        let sup = supervisor(spec("silent", &["cat"]));
        sup.start().await.unwrap();

        let caller = {
            let sup = Arc::clone(&sup);
            tokio::spawn(async move {
                sup.call_with_timeout("tools/list", json!({}), Duration::from_secs(30))
                    .await
            })
        };

        // Wait until the request is registered before stopping.
        for _ in 0..100 {
            if sup.pending_requests().await == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        let started = Instant::now();
        sup.stop().await;
        let outcome = caller.await.unwrap();
        assert!(matches!(outcome, Err(McpdError::Cancelled { .. })));
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_stop_kills_backend_that_ignores_sigterm() {
        let sup = Arc::new(ProcessSupervisor::new(
            Arc::new(spec("stubborn", &["sh", "-c", "trap '' TERM; while :; do sleep 1; done"])),
            SupervisorOptions {
                shutdown_timeout: Duration::from_millis(300),
                ..quiet_options()
            },
        ));
        sup.start().await.unwrap();
        // Give sh a moment to install the trap.
        tokio::time::sleep(Duration::from_millis(100)).await;

        let started = Instant::now();
        sup.stop().await;
        assert!(started.elapsed() >= Duration::from_millis(300));
        assert!(!sup.is_running().await);
    }

    #[tokio::test]
    async fn test_spawn_failure() {
        let sup = supervisor(spec("ghost", &["/nonexistent/mcpd-backend"]));
        let err = sup.call("tools/list", json!({})).await.unwrap_err();
        assert!(matches!(err, McpdError::SpawnFailed { ref name, .. } if name == "ghost"));
        assert!(!sup.is_running().await);
    }

    #[tokio::test]
    async fn test_exited_backend_is_respawned_on_next_call() {
        let sup = supervisor(mock_backend_spec("mock"));
        sup.call("tools/list", json!({})).await.unwrap();
        let first = sup.pid().await.unwrap();

        let raw = i32::try_from(first).unwrap();
        kill(Pid::from_raw(raw), Signal::SIGKILL).unwrap();
        for _ in 0..100 {
            if !sup.is_running().await {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        sup.call("tools/list", json!({})).await.unwrap();
        assert_ne!(sup.pid().await.unwrap(), first);
        assert_eq!(sup.generation(), 2);
        sup.stop().await;
    }

    #[tokio::test]
    async fn test_handshake_precedes_first_call() {
        let sup = Arc::new(ProcessSupervisor::new(
            Arc::new(mock_backend_spec("mock")),
            SupervisorOptions {
                handshake: true,
                ..quiet_options()
            },
        ));
        // The mock rejects everything but initialize/tools/*; a successful
        // start means initialize was answered.
        sup.start().await.unwrap();
        let listed = sup.call("tools/list", json!({})).await.unwrap();
        assert!(listed["tools"].is_array());
        sup.stop().await;
    }

    #[tokio::test]
    async fn test_failed_handshake_is_init_failed() {
        let sup = Arc::new(ProcessSupervisor::new(
            Arc::new(spec("silent", &["cat"])),
            SupervisorOptions {
                handshake: true,
                call_timeout: Duration::from_millis(200),
                ..quiet_options()
            },
        ));
        let err = sup.start().await.unwrap_err();
        assert!(matches!(err, McpdError::InitFailed { .. }));
        assert!(!sup.is_running().await);
    }
}
