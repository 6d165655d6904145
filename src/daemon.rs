//! Daemon orchestration: control socket, host stdio surface, and shutdown.
//!
//! A single watch channel carries the shutdown request. Whatever triggers it
//! (SIGINT/SIGTERM, the host closing stdin, or a test), the teardown is the
//! same: stop every backend, close the listener, remove the socket.

use std::future::Future;
use std::sync::Arc;

use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::config::DaemonConfig;
use crate::control::ControlPlane;
use crate::errors::McpdError;
use crate::registry::Registry;
use crate::router::AggregationRouter;
use crate::server::HostServer;

/// Which surfaces a daemon run exposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServeMode {
    /// Listen on the control socket.
    pub control: bool,
    /// Speak MCP to a host over stdin/stdout.
    pub stdio: bool,
}

pub struct Daemon {
    config: DaemonConfig,
    router: Arc<AggregationRouter>,
}

impl Daemon {
    pub fn new(config: DaemonConfig) -> Result<Self, McpdError> {
        let registry = Registry::load_from(&config.registry_path)?;
        let router = Arc::new(AggregationRouter::new(registry, config.supervisor));
        Ok(Self { config, router })
    }

    pub fn router(&self) -> &Arc<AggregationRouter> {
        &self.router
    }

    /// Run until SIGINT or SIGTERM (or until the host hangs up, in stdio mode).
    pub async fn run(self, mode: ServeMode) -> Result<(), McpdError> {
        let signals = wait_for_signal()?;
        self.run_until(mode, signals).await
    }

    /// Run until `stop` resolves.
    pub async fn run_until<F>(self, mode: ServeMode, stop: F) -> Result<(), McpdError>
    where
        F: Future<Output = ()>,
    {
        let count = self.router.reload().await?;
        tracing::info!(
            tools = count,
            registry = %self.config.registry_path.display(),
            "mcpd starting"
        );

        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        // Bind failure is the one fatal startup error.
        let control = if mode.control {
            let plane = ControlPlane::bind(&self.config.socket_path, Arc::clone(&self.router)).await?;
            Some(tokio::spawn(plane.serve(shutdown_rx.clone())))
        } else {
            None
        };

        tokio::pin!(stop);
        if mode.stdio {
            let host = HostServer::new(Arc::clone(&self.router));
            tokio::select! {
                served = host.run(tokio::io::stdin(), tokio::io::stdout(), shutdown_rx.clone()) => {
                    if let Err(e) = served {
                        tracing::warn!(error = %e, "host connection failed");
                    }
                }
                () = &mut stop => tracing::info!("shutdown requested"),
            }
        } else {
            stop.await;
            tracing::info!("shutdown requested");
        }

        self.shutdown(shutdown_tx, control).await;
        Ok(())
    }

    async fn shutdown(&self, shutdown_tx: watch::Sender<bool>, control: Option<JoinHandle<()>>) {
        self.router.shutdown().await;

        // Receivers may already be gone; that is fine.
        let _ = shutdown_tx.send(true);
        if let Some(task) = control {
            if let Err(e) = task.await {
                tracing::warn!(error = %e, "control task did not exit cleanly");
            }
        }
        tracing::info!("mcpd stopped");
    }
}

/// Resolves on the first SIGINT or SIGTERM.
fn wait_for_signal() -> Result<impl Future<Output = ()>, McpdError> {
    let register = |kind: SignalKind, name: &str| {
        signal(kind).map_err(|e| McpdError::ConfigError {
            reason: format!("failed to install {name} handler: {e}"),
        })
    };
    let mut sigterm = register(SignalKind::terminate(), "SIGTERM")?;
    let mut sigint = register(SignalKind::interrupt(), "SIGINT")?;

    Ok(async move {
        tokio::select! {
            _ = sigterm.recv() => tracing::info!("received SIGTERM"),
            _ = sigint.recv() => tracing::info!("received SIGINT"),
        }
    })
}
