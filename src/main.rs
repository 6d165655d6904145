use anyhow::{Context, Result};
use clap::Parser;

use mcpd::cli::Cli;
use mcpd::logging::{init_tracing, LogTarget};
use mcpd::DaemonConfig;

fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = DaemonConfig::load(cli.config_dir.as_deref())?;

    if cli.command.logs_to_file() {
        init_tracing(LogTarget::File(&config.log_path));
    } else {
        init_tracing(LogTarget::Stderr);
    }

    // Everything suspends on I/O; one thread is enough.
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to build tokio runtime")?;

    runtime.block_on(cli.run(config))
}
