//! Backend supervision, one subprocess per registered tool.
//!
//! This module handles:
//! - Spawning the backend with its argv and environment overrides
//! - Framing JSON-RPC requests onto the backend's stdin
//! - Correlating responses read from stdout by request id
//! - Graceful-then-forced shutdown and restart on exit

pub mod pending;
pub mod process;
pub mod transport;

use std::time::Duration;

pub use pending::PendingTable;
pub use process::ProcessSupervisor;

/// Default bound on a single call.
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(30);

/// Time a backend gets to exit after SIGTERM before it is killed.
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Per-supervisor tunables, shared by every backend of one daemon.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SupervisorOptions {
    pub call_timeout: Duration,
    pub shutdown_timeout: Duration,
    /// Send `initialize` + `notifications/initialized` after each spawn.
    ///
    /// `initialize` takes a request id, so with this on the first `call` to a
    /// fresh backend is id 2 rather than id 1.
    pub handshake: bool,
}

impl Default for SupervisorOptions {
    fn default() -> Self {
        Self {
            call_timeout: DEFAULT_CALL_TIMEOUT,
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
            handshake: true,
        }
    }
}
