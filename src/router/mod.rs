//! Aggregation router. One merged, prefixed catalog over every backend.
//!
//! The router owns the registry view and one [`ProcessSupervisor`] per
//! registered tool. Supervisors are created lazily and never removed while the
//! daemon runs; a reload only adds. The same supervisors serve both the host
//! protocol surface and the control plane.

pub mod catalog;

use std::collections::BTreeMap;
use std::sync::Arc;

use futures::future::join_all;
use serde_json::{json, Value};
use tokio::sync::{Mutex, RwLock};

pub use catalog::{CallToolOutcome, Catalog, CatalogEntry, TextContent};

use crate::errors::McpdError;
use crate::protocol::{ListToolsResult, ToolDefinition};
use crate::registry::{Registry, ToolSpec};
use crate::supervisor::{ProcessSupervisor, SupervisorOptions};

pub struct AggregationRouter {
    registry: Mutex<Registry>,
    options: SupervisorOptions,
    supervisors: RwLock<BTreeMap<String, Arc<ProcessSupervisor>>>,
    catalog: RwLock<Catalog>,
}

impl AggregationRouter {
    pub fn new(registry: Registry, options: SupervisorOptions) -> Self {
        Self {
            registry: Mutex::new(registry),
            options,
            supervisors: RwLock::new(BTreeMap::new()),
            catalog: RwLock::new(Catalog::new()),
        }
    }

    // ─── Supervisors ─────────────────────────────────────────────────────

    /// Re-read the registry and make sure every registered tool has a
    /// supervisor. Returns the number of active supervisors.
    ///
    /// Existing supervisors are left untouched, including those whose tool has
    /// since been unregistered.
    pub async fn reload(&self) -> Result<usize, McpdError> {
        let specs = {
            let mut registry = self.registry.lock().await;
            registry.reload()?;
            registry.list()
        };
        self.ensure_supervisors(&specs).await;
        Ok(self.supervisors.read().await.len())
    }

    async fn ensure_supervisors(&self, specs: &[Arc<ToolSpec>]) -> Vec<Arc<ProcessSupervisor>> {
        let mut supervisors = self.supervisors.write().await;
        specs
            .iter()
            .map(|spec| {
                let sup = supervisors.entry(spec.name.clone()).or_insert_with(|| {
                    tracing::debug!(tool = %spec.name, "creating supervisor");
                    Arc::new(ProcessSupervisor::new(Arc::clone(spec), self.options))
                });
                Arc::clone(sup)
            })
            .collect()
    }

    /// Every active supervisor, ordered by tool name.
    pub async fn supervisors(&self) -> Vec<Arc<ProcessSupervisor>> {
        self.supervisors.read().await.values().cloned().collect()
    }

    pub async fn supervisor(&self, name: &str) -> Option<Arc<ProcessSupervisor>> {
        self.supervisors.read().await.get(name).cloned()
    }

    /// Stop every supervisor. Supervisors stay registered and restart on the
    /// next call.
    pub async fn shutdown(&self) {
        let supervisors = self.supervisors().await;
        tracing::info!(count = supervisors.len(), "stopping all backends");
        join_all(supervisors.iter().map(|sup| sup.stop())).await;
    }

    // ─── Discovery ───────────────────────────────────────────────────────

    /// Ask every registered backend for its tools and rebuild the catalog.
    ///
    /// A backend that fails contributes nothing; discovery itself never fails.
    /// Returns the number of catalog entries.
    pub async fn discover(&self) -> usize {
        let specs = {
            let mut registry = self.registry.lock().await;
            if let Err(e) = registry.reload() {
                tracing::warn!(error = %e, "registry reload failed; using previous view");
            }
            registry.list()
        };
        let supervisors = self.ensure_supervisors(&specs).await;

        let listings = join_all(supervisors.iter().map(|sup| async move {
            let listing = list_backend_tools(sup).await;
            (sup.name().to_string(), listing)
        }))
        .await;

        let mut catalog = Catalog::new();
        for (backend_id, listing) in listings {
            match listing {
                Ok(tools) => {
                    tracing::debug!(backend = %backend_id, tools = tools.len(), "discovered tools");
                    for tool in tools {
                        let entry = CatalogEntry::from_definition(&backend_id, tool);
                        if let Some(previous) = catalog.insert(entry) {
                            tracing::warn!(
                                tool = %previous.prefixed_name,
                                replaced_backend = %previous.backend_id,
                                "prefixed tool name collision; keeping the later entry"
                            );
                        }
                    }
                }
                Err(e) => {
                    tracing::warn!(backend = %backend_id, error = %e, "tool discovery failed");
                }
            }
        }

        let count = catalog.len();
        *self.catalog.write().await = catalog;
        tracing::info!(backends = supervisors.len(), tools = count, "catalog rebuilt");
        count
    }

    /// Current catalog entries, ordered by prefixed name.
    pub async fn catalog(&self) -> Vec<CatalogEntry> {
        self.catalog.read().await.entries().cloned().collect()
    }

    /// Run discovery and return the merged catalog as host-facing definitions.
    pub async fn list_tools(&self) -> Vec<ToolDefinition> {
        self.discover().await;
        self.catalog
            .read()
            .await
            .entries()
            .map(CatalogEntry::to_definition)
            .collect()
    }

    // ─── Dispatch ────────────────────────────────────────────────────────

    /// Route a call to the backend that owns `name`.
    ///
    /// Never fails: unknown names and backend errors come back as a single
    /// error text item.
    pub async fn dispatch(&self, name: &str, arguments: Value) -> CallToolOutcome {
        let Some((backend_id, original_name)) = self.resolve(name).await else {
            let err = McpdError::UnknownTool {
                name: name.to_string(),
            };
            tracing::info!(error = %err, "call for unknown tool");
            return CallToolOutcome::error_text(err.to_string());
        };

        let Some(sup) = self.supervisor(&backend_id).await else {
            return CallToolOutcome::error_text(format!("Tool backend not found: {backend_id}"));
        };

        let params = json!({"name": original_name, "arguments": arguments});
        match sup.call("tools/call", params).await {
            Ok(result) => CallToolOutcome::from_backend_result(&result),
            Err(e) => {
                if e.is_transient() {
                    tracing::warn!(tool = name, backend = %backend_id, error = %e, "tool call got no answer");
                } else {
                    tracing::info!(tool = name, backend = %backend_id, error = %e, "tool call failed");
                }
                CallToolOutcome::error_text(format!("Error: {e}"))
            }
        }
    }

    /// Map a prefixed name to `(backend_id, original_name)`.
    ///
    /// The catalog wins; otherwise a prefix naming a registered backend is
    /// trusted without a discovery round-trip.
    async fn resolve(&self, name: &str) -> Option<(String, String)> {
        if let Some(entry) = self.catalog.read().await.get(name) {
            return Some((entry.backend_id.clone(), entry.original_name.clone()));
        }

        let (backend_id, original_name) = catalog::split_prefixed(name)?;
        let spec = self.registry.lock().await.get(backend_id)?;
        self.ensure_supervisors(&[spec]).await;
        Some((backend_id.to_string(), original_name.to_string()))
    }
}

async fn list_backend_tools(sup: &ProcessSupervisor) -> Result<Vec<ToolDefinition>, McpdError> {
    let result = sup.call("tools/list", json!({})).await?;
    let listing: ListToolsResult =
        serde_json::from_value(result).map_err(|e| McpdError::DecodeError {
            reason: format!("malformed tools/list result from '{}': {e}", sup.name()),
        })?;
    Ok(listing.tools)
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{mock_backend_spec, quiet_options, spec};
    use tempfile::TempDir;

    fn router_with(tmp: &TempDir, specs: Vec<ToolSpec>) -> AggregationRouter {
        let mut registry = Registry::load_from(tmp.path().join("registry.json")).unwrap();
        for s in specs {
            registry.register(s).unwrap();
        }
        AggregationRouter::new(registry, quiet_options())
    }

    #[tokio::test]
    async fn test_discover_isolates_failing_backend() {
        let tmp = TempDir::new().unwrap();
        let router = router_with(
            &tmp,
            vec![
                mock_backend_spec("alpha"),
                mock_backend_spec("beta"),
                spec("broken", &["/nonexistent/backend"]),
            ],
        );

        assert_eq!(router.discover().await, 4);
        let names: Vec<String> = router
            .catalog()
            .await
            .into_iter()
            .map(|e| e.prefixed_name)
            .collect();
        assert_eq!(
            names,
            vec!["alpha__echo", "alpha__fail", "beta__echo", "beta__fail"]
        );
        assert_eq!(router.supervisors().await.len(), 3);

        router.shutdown().await;
    }

    #[tokio::test]
    async fn test_same_tool_name_on_two_backends_routes_independently() {
        let tmp = TempDir::new().unwrap();
        let router = router_with(&tmp, vec![mock_backend_spec("alpha"), mock_backend_spec("beta")]);
        router.discover().await;

        let a = router.catalog().await.into_iter().find(|e| e.prefixed_name == "alpha__echo").unwrap();
        let b = router.catalog().await.into_iter().find(|e| e.prefixed_name == "beta__echo").unwrap();
        assert_eq!(a.original_name, b.original_name);
        assert_ne!(a.backend_id, b.backend_id);

        let outcome = router.dispatch("beta__echo", json!({"x": 1})).await;
        assert!(!outcome.is_error);
        assert_eq!(outcome.content[0].text, "pong");

        // The call reused the processes started by discovery.
        let alpha = router.supervisor("alpha").await.unwrap();
        let beta = router.supervisor("beta").await.unwrap();
        assert_eq!(alpha.generation(), 1);
        assert_eq!(beta.generation(), 1);

        router.shutdown().await;
    }

    #[tokio::test]
    async fn test_dispatch_unknown_tool_is_structured() {
        let tmp = TempDir::new().unwrap();
        let router = router_with(&tmp, vec![]);

        let outcome = router.dispatch("nobody__nothing", json!({})).await;
        assert!(outcome.is_error);
        assert_eq!(outcome.content, vec![TextContent::new("Unknown tool: nobody__nothing")]);
    }

    #[tokio::test]
    async fn test_dispatch_converts_backend_error_to_text() {
        let tmp = TempDir::new().unwrap();
        let router = router_with(&tmp, vec![mock_backend_spec("alpha")]);
        router.discover().await;

        let outcome = router.dispatch("alpha__fail", json!({})).await;
        assert!(outcome.is_error);
        assert_eq!(outcome.content.len(), 1);
        assert_eq!(outcome.content[0].text, "Error: server error [-32000]: boom");

        router.shutdown().await;
    }

    #[tokio::test]
    async fn test_dispatch_spawn_failure_is_error_text() {
        let tmp = TempDir::new().unwrap();
        let router = router_with(&tmp, vec![spec("ghost", &["/nonexistent/backend"])]);

        let outcome = router.dispatch("ghost__anything", json!({})).await;
        assert!(outcome.is_error);
        assert!(outcome.content[0].text.starts_with("Error: failed to spawn server 'ghost'"));
    }

    #[tokio::test]
    async fn test_dispatch_without_discovery_sends_call_as_first_request() {
        let tmp = TempDir::new().unwrap();
        let capture = tmp.path().join("stdin.log");
        let mut registry = Registry::load_from(tmp.path().join("registry.json")).unwrap();
        registry
            .register(spec(
                "echo",
                &["sh", "-c", "head -n 1 > \"$0\"; sleep 5", capture.to_str().unwrap()],
            ))
            .unwrap();
        let router = AggregationRouter::new(
            registry,
            SupervisorOptions {
                call_timeout: std::time::Duration::from_millis(300),
                ..quiet_options()
            },
        );

        let outcome = router.dispatch("echo__ping", json!({})).await;
        assert!(outcome.is_error, "backend never answers, so the call times out");

        let written = std::fs::read_to_string(&capture).unwrap();
        assert_eq!(
            written,
            "{\"jsonrpc\":\"2.0\",\"id\":1,\"method\":\"tools/call\",\"params\":{\"name\":\"ping\",\"arguments\":{}}}\n"
        );
        router.shutdown().await;
    }

    #[tokio::test]
    async fn test_dispatch_routes_by_prefix_before_discovery() {
        let tmp = TempDir::new().unwrap();
        let router = router_with(&tmp, vec![mock_backend_spec("alpha")]);

        let outcome = router.dispatch("alpha__echo", json!({})).await;
        assert!(!outcome.is_error);
        assert_eq!(outcome.content.len(), 2);
        assert!(router.catalog().await.is_empty());

        router.shutdown().await;
    }

    #[tokio::test]
    async fn test_reload_adds_without_touching_running_supervisors() {
        let tmp = TempDir::new().unwrap();
        let router = router_with(&tmp, vec![mock_backend_spec("alpha")]);
        assert_eq!(router.reload().await.unwrap(), 1);

        let alpha = router.supervisor("alpha").await.unwrap();
        alpha.start().await.unwrap();
        let pid = alpha.pid().await;

        let mut registry = Registry::load_from(tmp.path().join("registry.json")).unwrap();
        registry.register(mock_backend_spec("beta")).unwrap();

        assert_eq!(router.reload().await.unwrap(), 2);
        let alpha_after = router.supervisor("alpha").await.unwrap();
        assert!(Arc::ptr_eq(&alpha, &alpha_after));
        assert_eq!(alpha_after.pid().await, pid);

        router.shutdown().await;
    }

    #[tokio::test]
    async fn test_list_tools_uses_prefixed_names() {
        let tmp = TempDir::new().unwrap();
        let router = router_with(&tmp, vec![mock_backend_spec("alpha")]);

        let tools = router.list_tools().await;
        assert_eq!(tools.len(), 2);
        assert_eq!(tools[0].name, "alpha__echo");
        assert_eq!(tools[0].description.as_deref(), Some("Echo back"));
        assert_eq!(tools[1].input_schema, json!({"type": "object"}));

        router.shutdown().await;
    }
}
