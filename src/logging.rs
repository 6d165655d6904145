//! Tracing setup.
//!
//! Interactive commands log to stderr. `serve` owns stdout for the MCP
//! protocol and is usually launched by a host that discards stderr, so it
//! logs to `<config_dir>/mcpd.log` instead, rotating the previous runs.

use std::path::Path;
use std::sync::{Arc, Mutex};

use tracing_subscriber::fmt;
use tracing_subscriber::EnvFilter;

const DEFAULT_FILTER: &str = "mcpd=info,warn";

/// Rotated logs kept next to the live file.
const KEEP_LOGS: u32 = 3;

/// Where log output goes.
#[derive(Debug, Clone, Copy)]
pub enum LogTarget<'a> {
    Stderr,
    File(&'a Path),
}

/// Install the global subscriber. `RUST_LOG` overrides the default filter.
///
/// Falls back to stderr if the log file cannot be opened.
pub fn init_tracing(target: LogTarget<'_>) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    let file = match target {
        LogTarget::Stderr => None,
        LogTarget::File(path) => match open_log_file(path) {
            Ok(file) => Some(file),
            Err(e) => {
                eprintln!("mcpd: cannot open log file {}: {e}; logging to stderr", path.display());
                None
            }
        },
    };

    let builder = fmt::fmt().with_env_filter(filter).with_target(true);
    let installed = match file {
        Some(file) => builder
            .with_writer(FlushingWriter::new(file))
            .with_ansi(false)
            .try_init(),
        None => builder.with_writer(std::io::stderr).try_init(),
    };
    // A subscriber may already be installed (tests, embedding).
    if installed.is_err() {
        return;
    }

    if let LogTarget::File(path) = target {
        tracing::info!(
            version = env!("CARGO_PKG_VERSION"),
            log_file = %path.display(),
            pid = std::process::id(),
            "=== mcpd starting ==="
        );
    }
}

fn open_log_file(path: &Path) -> std::io::Result<std::fs::File> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir)?;
    }
    rotate_log_file(path, KEEP_LOGS);
    std::fs::OpenOptions::new().create(true).append(true).open(path)
}

/// Rotate `mcpd.log` → `mcpd.log.1` → … → `.{keep}`, dropping the oldest.
fn rotate_log_file(base_path: &Path, keep: u32) {
    let oldest = format!("{}.{keep}", base_path.display());
    let _ = std::fs::remove_file(&oldest);

    for i in (1..keep).rev() {
        let from = format!("{}.{i}", base_path.display());
        let to = format!("{}.{}", base_path.display(), i + 1);
        let _ = std::fs::rename(&from, &to);
    }

    if base_path.exists() {
        let to = format!("{}.1", base_path.display());
        let _ = std::fs::rename(base_path, &to);
    }
}

/// File writer that flushes after every write, so a killed daemon leaves a
/// complete log.
#[derive(Clone)]
struct FlushingWriter {
    file: Arc<Mutex<std::fs::File>>,
}

impl FlushingWriter {
    fn new(file: std::fs::File) -> Self {
        Self {
            file: Arc::new(Mutex::new(file)),
        }
    }
}

impl std::io::Write for FlushingWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let mut f = self
            .file
            .lock()
            .map_err(|e| std::io::Error::other(format!("lock poisoned: {e}")))?;
        let n = std::io::Write::write(&mut *f, buf)?;
        std::io::Write::flush(&mut *f)?;
        Ok(n)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        let mut f = self
            .file
            .lock()
            .map_err(|e| std::io::Error::other(format!("lock poisoned: {e}")))?;
        std::io::Write::flush(&mut *f)
    }
}

impl<'a> fmt::MakeWriter<'a> for FlushingWriter {
    type Writer = FlushingWriter;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}
