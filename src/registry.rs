//! Tool registry: the persisted set of backends mcpd may run.
//!
//! Stored as `{"tools": {name: ToolSpec}}` in `registry.json`. The daemon only
//! reads it (`list`, `reload`); the CLI owns mutation (`register`,
//! `unregister`). Specs handed out are `Arc`-shared and never mutated, so a
//! reload swaps in new specs without touching running supervisors.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::errors::McpdError;
use crate::router::catalog::PREFIX_SEPARATOR;

// ─── ToolSpec ────────────────────────────────────────────────────────────────

/// A registered backend: how to launch it and what to add to its environment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolSpec {
    #[serde(default)]
    pub name: String,
    /// Executable followed by its arguments.
    #[serde(alias = "argv")]
    pub command: Vec<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
}

impl ToolSpec {
    pub fn new(name: impl Into<String>, command: Vec<String>) -> Self {
        Self {
            name: name.into(),
            command,
            env: HashMap::new(),
        }
    }

    /// Builder-style environment override.
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }
}

/// On-disk registry format.
#[derive(Debug, Default, Serialize, Deserialize)]
struct RegistryFile {
    #[serde(default)]
    tools: BTreeMap<String, ToolSpec>,
}

// ─── Registry ────────────────────────────────────────────────────────────────

/// Tool registry with JSON file persistence.
#[derive(Debug)]
pub struct Registry {
    path: PathBuf,
    tools: BTreeMap<String, Arc<ToolSpec>>,
}

impl Registry {
    /// Load the registry at `path`. A missing file is an empty registry.
    pub fn load_from(path: impl Into<PathBuf>) -> Result<Self, McpdError> {
        let path = path.into();
        let tools = read_registry_file(&path)?;
        Ok(Self { path, tools })
    }

    /// Re-read the backing file, replacing the in-memory view.
    pub fn reload(&mut self) -> Result<(), McpdError> {
        self.tools = read_registry_file(&self.path)?;
        tracing::debug!(path = %self.path.display(), tools = self.tools.len(), "registry reloaded");
        Ok(())
    }

    /// Persist the registry.
    pub fn save(&self) -> Result<(), McpdError> {
        let file = RegistryFile {
            tools: self
                .tools
                .iter()
                .map(|(name, spec)| (name.clone(), ToolSpec::clone(spec)))
                .collect(),
        };
        let mut content = serde_json::to_string_pretty(&file).map_err(|e| self.error(e))?;
        content.push('\n');

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| self.error(e))?;
        }
        std::fs::write(&self.path, content).map_err(|e| self.error(e))
    }

    /// Register (or replace) a tool and persist.
    ///
    /// Names may not be empty or contain the catalog prefix separator, so
    /// every prefixed tool name splits back to exactly one backend.
    pub fn register(&mut self, spec: ToolSpec) -> Result<(), McpdError> {
        if spec.name.is_empty() || spec.name.contains(PREFIX_SEPARATOR) {
            return Err(McpdError::RegistryError {
                path: self.path.clone(),
                reason: format!(
                    "invalid tool name '{}': must be non-empty and not contain '{PREFIX_SEPARATOR}'",
                    spec.name
                ),
            });
        }
        if spec.command.is_empty() {
            return Err(McpdError::RegistryError {
                path: self.path.clone(),
                reason: format!("tool '{}' has an empty command", spec.name),
            });
        }
        self.tools.insert(spec.name.clone(), Arc::new(spec));
        self.save()
    }

    /// Remove a tool by name. Returns whether it existed.
    pub fn unregister(&mut self, name: &str) -> Result<bool, McpdError> {
        let removed = self.tools.remove(name).is_some();
        if removed {
            self.save()?;
        }
        Ok(removed)
    }

    /// All registered tools, ordered by name.
    pub fn list(&self) -> Vec<Arc<ToolSpec>> {
        self.tools.values().cloned().collect()
    }

    pub fn get(&self, name: &str) -> Option<Arc<ToolSpec>> {
        self.tools.get(name).cloned()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn error(&self, e: impl std::fmt::Display) -> McpdError {
        McpdError::RegistryError {
            path: self.path.clone(),
            reason: e.to_string(),
        }
    }
}

fn read_registry_file(path: &Path) -> Result<BTreeMap<String, Arc<ToolSpec>>, McpdError> {
    if !path.exists() {
        return Ok(BTreeMap::new());
    }

    let content = std::fs::read_to_string(path).map_err(|e| McpdError::RegistryError {
        path: path.to_path_buf(),
        reason: format!("failed to read: {e}"),
    })?;
    if content.trim().is_empty() {
        return Ok(BTreeMap::new());
    }

    let file: RegistryFile =
        serde_json::from_str(&content).map_err(|e| McpdError::RegistryError {
            path: path.to_path_buf(),
            reason: format!("failed to parse: {e}"),
        })?;

    Ok(file
        .tools
        .into_iter()
        .map(|(key, mut spec)| {
            // The map key is authoritative for the name.
            spec.name.clone_from(&key);
            (key, Arc::new(spec))
        })
        .collect())
}

/// Resolve a bare executable name against `PATH`.
///
/// Names containing a path separator are returned unchanged, as are names
/// that cannot be found (spawn will report the failure later).
pub fn resolve_executable(program: &str) -> String {
    if program.contains(std::path::MAIN_SEPARATOR) {
        return program.to_string();
    }

    let Some(paths) = std::env::var_os("PATH") else {
        return program.to_string();
    };

    std::env::split_paths(&paths)
        .map(|dir| dir.join(program))
        .find(|candidate| is_executable(candidate))
        .map(|found| found.to_string_lossy().into_owned())
        .unwrap_or_else(|| program.to_string())
}

fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;

    std::fs::metadata(path)
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

// ─── Tests ───────────────────────────────────────────────────────────────────
