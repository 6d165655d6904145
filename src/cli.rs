//! Command-line interface for mcpd.

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};

use crate::config::DaemonConfig;
use crate::control::{send_command, ToolsField};
use crate::daemon::{Daemon, ServeMode};
use crate::registry::{resolve_executable, Registry, ToolSpec};

#[derive(Parser, Debug)]
#[command(name = "mcpd")]
#[command(version, about = "Aggregate MCP tool servers behind one endpoint")]
pub struct Cli {
    /// Configuration directory (registry, config.yaml, logs)
    #[arg(long, global = true, env = "MCPD_CONFIG_DIR")]
    pub config_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Register an MCP tool server
    Register {
        /// Environment variables for the server (KEY=VALUE)
        #[arg(short, long, value_parser = parse_env_var)]
        env: Vec<(String, String)>,
        /// Tool name, used as the prefix of its tools
        name: String,
        /// Command that starts the server, with its arguments
        #[arg(required = true, num_args = 1.., trailing_var_arg = true, allow_hyphen_values = true)]
        command: Vec<String>,
    },

    /// Unregister a tool server
    Unregister {
        name: String,
    },

    /// List registered tool servers
    #[command(alias = "ls")]
    List,

    /// Run the aggregating MCP server on stdio
    Serve {
        /// Do not listen on the control socket
        #[arg(long)]
        no_control: bool,
    },

    /// Run the control daemon in the foreground
    Start,

    /// Check whether a daemon is running
    Status,

    /// Show configuration paths
    Config,
}

impl Commands {
    /// `serve` speaks MCP on stdout, so its logs go to a file.
    pub fn logs_to_file(&self) -> bool {
        matches!(self, Commands::Serve { .. })
    }
}

/// Parse `KEY=VALUE`; the value may itself contain `=`.
pub fn parse_env_var(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("invalid KEY=VALUE: {s}")),
    }
}

impl Cli {
    pub async fn run(self, config: DaemonConfig) -> Result<()> {
        match self.command {
            Commands::Register { env, name, command } => register(&config, name, command, env).await,
            Commands::Unregister { name } => unregister(&config, &name).await,
            Commands::List => list(&config),
            Commands::Serve { no_control } => {
                let mode = ServeMode {
                    control: !no_control,
                    stdio: true,
                };
                Daemon::new(config)?.run(mode).await?;
                Ok(())
            }
            Commands::Start => {
                eprintln!("Starting mcpd daemon on {}", config.socket_path.display());
                let mode = ServeMode {
                    control: true,
                    stdio: false,
                };
                Daemon::new(config)?.run(mode).await?;
                Ok(())
            }
            Commands::Status => status(&config).await,
            Commands::Config => {
                println!("Config directory: {}", config.config_dir.display());
                println!("Registry file:    {}", config.registry_path.display());
                println!("Socket path:      {}", config.socket_path.display());
                println!("Log file:         {}", config.log_path.display());
                Ok(())
            }
        }
    }
}

async fn register(
    config: &DaemonConfig,
    name: String,
    mut command: Vec<String>,
    env: Vec<(String, String)>,
) -> Result<()> {
    if name.is_empty() {
        bail!("tool name must not be empty");
    }
    if let Some(program) = command.first_mut() {
        *program = resolve_executable(program);
    }

    let mut spec = ToolSpec::new(&name, command);
    spec.env.extend(env);

    let mut registry = Registry::load_from(&config.registry_path)?;
    registry.register(spec.clone())?;

    println!("Registered tool: {name}");
    println!("  Command: {}", spec.command.join(" "));
    if !spec.env.is_empty() {
        let mut keys: Vec<&str> = spec.env.keys().map(String::as_str).collect();
        keys.sort_unstable();
        println!("  Environment: {}", keys.join(", "));
    }

    notify_daemon(config).await;
    Ok(())
}

async fn unregister(config: &DaemonConfig, name: &str) -> Result<()> {
    let mut registry = Registry::load_from(&config.registry_path)?;
    if !registry.unregister(name)? {
        bail!("tool not found: {name}");
    }
    println!("Unregistered tool: {name}");
    notify_daemon(config).await;
    Ok(())
}

fn list(config: &DaemonConfig) -> Result<()> {
    let registry = Registry::load_from(&config.registry_path)?;
    if registry.is_empty() {
        println!("No tools registered.");
        return Ok(());
    }

    for tool in registry.list() {
        println!("{}", tool.name);
        println!("  Command: {}", tool.command.join(" "));
        if !tool.env.is_empty() {
            let mut keys: Vec<&str> = tool.env.keys().map(String::as_str).collect();
            keys.sort_unstable();
            println!("  Environment: {}", keys.join(", "));
        }
    }
    Ok(())
}

async fn status(config: &DaemonConfig) -> Result<()> {
    let ping = send_command(&config.socket_path, "ping")
        .await
        .context("daemon is not running")?;
    if !ping.is_ok() {
        bail!("daemon answered ping with {ping:?}");
    }
    println!("Daemon is running ({})", config.socket_path.display());

    let listing = send_command(&config.socket_path, "list").await?;
    if let Some(ToolsField::List(tools)) = listing.tools {
        println!("Tools loaded: {}", tools.len());
        for tool in tools {
            println!("  {}", tool.name);
        }
    }
    Ok(())
}

/// Ask a running daemon to pick up registry changes. Silent when no daemon
/// is listening.
async fn notify_daemon(config: &DaemonConfig) {
    if !config.socket_path.exists() {
        return;
    }
    match send_command(&config.socket_path, "reload").await {
        Ok(response) if response.is_ok() => {
            tracing::debug!(?response, "daemon reloaded registry");
        }
        Ok(response) => tracing::warn!(?response, "daemon rejected reload"),
        Err(e) => tracing::debug!(error = %e, "no daemon to notify"),
    }
}
