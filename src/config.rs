//! Daemon configuration.
//!
//! Built once at process start and passed by reference into the registry,
//! router, and control plane; nothing reads the environment after that.
//!
//! Resolution order for the config directory: explicit override (the
//! `--config-dir` flag), `MCPD_CONFIG_DIR`, then `dirs::config_dir()/mcpd`.
//! An optional `config.yaml` in that directory tunes the rest.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::errors::McpdError;
use crate::supervisor::SupervisorOptions;

const CONFIG_DIR_ENV: &str = "MCPD_CONFIG_DIR";
const CONFIG_FILE: &str = "config.yaml";
const REGISTRY_FILE: &str = "registry.json";
const SOCKET_FILE: &str = "mcpd.sock";
const LOG_FILE: &str = "mcpd.log";

// ─── Public Types ────────────────────────────────────────────────────────────

/// Fully resolved configuration for one mcpd run.
#[derive(Debug, Clone)]
pub struct DaemonConfig {
    pub config_dir: PathBuf,
    pub registry_path: PathBuf,
    pub socket_path: PathBuf,
    pub log_path: PathBuf,
    pub supervisor: SupervisorOptions,
}

/// Optional overrides read from `config.yaml`. Every field may be omitted.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigFile {
    #[serde(default)]
    pub socket_path: Option<String>,
    #[serde(default)]
    pub registry_path: Option<String>,
    #[serde(default)]
    pub call_timeout_secs: Option<u64>,
    #[serde(default)]
    pub shutdown_timeout_secs: Option<u64>,
    /// Perform the MCP `initialize` handshake after spawning a backend.
    #[serde(default)]
    pub handshake: Option<bool>,
}

// ─── Loading ─────────────────────────────────────────────────────────────────

impl DaemonConfig {
    /// Resolve the configuration, creating the config directory if needed.
    pub fn load(config_dir_override: Option<&Path>) -> Result<Self, McpdError> {
        let config_dir = match config_dir_override {
            Some(dir) => dir.to_path_buf(),
            None => default_config_dir()?,
        };

        std::fs::create_dir_all(&config_dir).map_err(|e| McpdError::ConfigError {
            reason: format!(
                "failed to create config directory {}: {e}",
                config_dir.display()
            ),
        })?;

        let file = load_config_file(&config_dir.join(CONFIG_FILE))?;
        Ok(Self::from_parts(config_dir, file))
    }

    /// Build a configuration rooted at `config_dir` with all defaults.
    ///
    /// Unlike [`DaemonConfig::load`], the socket lives inside `config_dir`,
    /// which keeps independent instances (and tests) apart.
    pub fn rooted_at(config_dir: impl Into<PathBuf>) -> Self {
        let config_dir = config_dir.into();
        Self {
            registry_path: config_dir.join(REGISTRY_FILE),
            socket_path: config_dir.join(SOCKET_FILE),
            log_path: config_dir.join(LOG_FILE),
            supervisor: SupervisorOptions::default(),
            config_dir,
        }
    }

    fn from_parts(config_dir: PathBuf, file: ConfigFile) -> Self {
        let defaults = SupervisorOptions::default();

        let socket_path = file
            .socket_path
            .map(PathBuf::from)
            .unwrap_or_else(|| default_socket_path(&config_dir));
        let registry_path = file
            .registry_path
            .map(PathBuf::from)
            .unwrap_or_else(|| config_dir.join(REGISTRY_FILE));

        let supervisor = SupervisorOptions {
            call_timeout: file
                .call_timeout_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.call_timeout),
            shutdown_timeout: file
                .shutdown_timeout_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.shutdown_timeout),
            handshake: file.handshake.unwrap_or(defaults.handshake),
        };

        Self {
            log_path: config_dir.join(LOG_FILE),
            registry_path,
            socket_path,
            supervisor,
            config_dir,
        }
    }
}

/// `MCPD_CONFIG_DIR`, else the platform config directory joined with `mcpd`.
fn default_config_dir() -> Result<PathBuf, McpdError> {
    if let Some(dir) = std::env::var_os(CONFIG_DIR_ENV) {
        return Ok(PathBuf::from(dir));
    }
    dirs::config_dir()
        .map(|dir| dir.join("mcpd"))
        .ok_or_else(|| McpdError::ConfigError {
            reason: "could not determine config directory".into(),
        })
}

/// Prefer the per-user runtime directory; fall back to the config directory.
fn default_socket_path(config_dir: &Path) -> PathBuf {
    dirs::runtime_dir()
        .filter(|dir| dir.is_dir())
        .map(|dir| dir.join(SOCKET_FILE))
        .unwrap_or_else(|| config_dir.join(SOCKET_FILE))
}

/// Read and parse `config.yaml`. A missing file yields all defaults.
fn load_config_file(path: &Path) -> Result<ConfigFile, McpdError> {
    if !path.exists() {
        return Ok(ConfigFile::default());
    }

    let raw = std::fs::read_to_string(path).map_err(|e| McpdError::ConfigError {
        reason: format!("failed to read {}: {e}", path.display()),
    })?;

    parse_config(&raw).map_err(|e| McpdError::ConfigError {
        reason: format!("failed to parse {}: {e}", path.display()),
    })
}

fn parse_config(raw: &str) -> Result<ConfigFile, serde_yaml::Error> {
    if raw.trim().is_empty() {
        return Ok(ConfigFile::default());
    }
    let mut file: ConfigFile = serde_yaml::from_str(&interpolate_env_vars(raw))?;
    file.socket_path = file.socket_path.map(|p| expand_tilde(&p));
    file.registry_path = file.registry_path.map(|p| expand_tilde(&p));
    Ok(file)
}

// ─── Env-var interpolation ───────────────────────────────────────────────────

/// Replace `${VAR}` and `${VAR:-default}` in a string.
fn interpolate_env_vars(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && chars.peek() == Some(&'{') {
            chars.next();
            let mut var_expr = String::new();
            for c in chars.by_ref() {
                if c == '}' {
                    break;
                }
                var_expr.push(c);
            }
            result.push_str(&resolve_var_expr(&var_expr));
        } else {
            result.push(ch);
        }
    }

    result
}

/// Resolve a variable expression like `VAR` or `VAR:-default`.
fn resolve_var_expr(expr: &str) -> String {
    if let Some(idx) = expr.find(":-") {
        let var_name = &expr[..idx];
        let default = &expr[idx + 2..];
        std::env::var(var_name).unwrap_or_else(|_| expand_tilde(default))
    } else {
        std::env::var(expr).unwrap_or_default()
    }
}

/// Expand a leading `~` to the user's home directory.
fn expand_tilde(path: &str) -> String {
    if let Some(rest) = path.strip_prefix('~') {
        if let Some(home) = dirs::home_dir() {
            return format!("{}{rest}", home.display());
        }
    }
    path.to_string()
}

// ─── Tests ───────────────────────────────────────────────────────────────────
