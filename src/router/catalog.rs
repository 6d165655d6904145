//! Merged tool catalog and result normalization.

use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::Value;

use crate::protocol::ToolDefinition;

/// Separator between backend id and the backend's own tool name.
pub const PREFIX_SEPARATOR: &str = "__";

/// Build the outward-facing name for a backend's tool.
pub fn prefixed_name(backend_id: &str, original_name: &str) -> String {
    format!("{backend_id}{PREFIX_SEPARATOR}{original_name}")
}

/// Split a prefixed name at the first separator.
pub fn split_prefixed(name: &str) -> Option<(&str, &str)> {
    name.split_once(PREFIX_SEPARATOR)
        .filter(|(backend, tool)| !backend.is_empty() && !tool.is_empty())
}

/// One tool in the merged namespace.
#[derive(Debug, Clone, PartialEq)]
pub struct CatalogEntry {
    pub prefixed_name: String,
    pub backend_id: String,
    pub original_name: String,
    pub description: Option<String>,
    pub input_schema: Value,
}

impl CatalogEntry {
    pub fn from_definition(backend_id: &str, tool: ToolDefinition) -> Self {
        Self {
            prefixed_name: prefixed_name(backend_id, &tool.name),
            backend_id: backend_id.to_string(),
            original_name: tool.name,
            description: tool.description,
            input_schema: tool.input_schema,
        }
    }

    /// The entry as a host-facing tool definition.
    pub fn to_definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.prefixed_name.clone(),
            description: self.description.clone(),
            input_schema: self.input_schema.clone(),
        }
    }
}

/// Catalog keyed by prefixed name. Rebuilt wholesale on each discovery pass.
#[derive(Debug, Default)]
pub struct Catalog {
    entries: BTreeMap<String, CatalogEntry>,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert an entry, replacing any previous one under the same prefixed name.
    pub fn insert(&mut self, entry: CatalogEntry) -> Option<CatalogEntry> {
        self.entries.insert(entry.prefixed_name.clone(), entry)
    }

    pub fn get(&self, prefixed_name: &str) -> Option<&CatalogEntry> {
        self.entries.get(prefixed_name)
    }

    pub fn entries(&self) -> impl Iterator<Item = &CatalogEntry> {
        self.entries.values()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// ─── Call results ────────────────────────────────────────────────────────────

/// A single text content item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TextContent {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub text: String,
}

impl TextContent {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            kind: "text",
            text: text.into(),
        }
    }
}

/// Result of dispatching a tool call. Never an `Err`: failures are carried as
/// text with `is_error` set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CallToolOutcome {
    pub content: Vec<TextContent>,
    pub is_error: bool,
}

impl CallToolOutcome {
    pub fn error_text(text: impl Into<String>) -> Self {
        Self {
            content: vec![TextContent::new(text)],
            is_error: true,
        }
    }

    /// Flatten a backend `tools/call` result into text items.
    ///
    /// Items with a string `text` keep it; anything else is rendered as its
    /// JSON. A backend-reported `isError` is preserved.
    pub fn from_backend_result(result: &Value) -> Self {
        let content = result
            .get("content")
            .and_then(Value::as_array)
            .map(|items| items.iter().map(normalize_item).collect())
            .unwrap_or_default();

        Self {
            content,
            is_error: result
                .get("isError")
                .and_then(Value::as_bool)
                .unwrap_or(false),
        }
    }
}

fn normalize_item(item: &Value) -> TextContent {
    match item.get("text").and_then(Value::as_str) {
        Some(text) => TextContent::new(text),
        None => TextContent::new(item.to_string()),
    }
}
