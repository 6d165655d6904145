//! Control-plane request and response shapes.
//!
//! One request per connection: `{"cmd": "reload" | "list" | "ping"}`.
//! Successful replies carry `status: "ok"`; failures carry only `error`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::registry::ToolSpec;

/// A parsed control command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlCommand {
    Reload,
    List,
    Ping,
    /// Anything else, rendered for the error message.
    Unknown(String),
}

impl ControlCommand {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Reload => "reload",
            Self::List => "list",
            Self::Ping => "ping",
            Self::Unknown(other) => other,
        }
    }

    /// Decode one request line. Only input that is not a JSON object is an
    /// error; a missing or unrecognized `cmd` becomes [`ControlCommand::Unknown`].
    pub fn parse(line: &str) -> Result<Self, String> {
        let value: Value =
            serde_json::from_str(line).map_err(|e| format!("invalid request: {e}"))?;
        let Value::Object(obj) = value else {
            return Err("invalid request: expected a JSON object".into());
        };

        Ok(match obj.get("cmd") {
            Some(Value::String(cmd)) => match cmd.as_str() {
                "reload" => Self::Reload,
                "list" => Self::List,
                "ping" => Self::Ping,
                _ => Self::Unknown(cmd.clone()),
            },
            Some(other) => Self::Unknown(other.to_string()),
            None => Self::Unknown("null".into()),
        })
    }
}

/// Wire form of a request, used by the client.
#[derive(Debug, Clone, Serialize)]
pub struct ControlRequest<'a> {
    pub cmd: &'a str,
}

/// `name` and argv of one active backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolSummary {
    pub name: String,
    pub command: Vec<String>,
}

impl From<&ToolSpec> for ToolSummary {
    fn from(spec: &ToolSpec) -> Self {
        Self {
            name: spec.name.clone(),
            command: spec.command.clone(),
        }
    }
}

/// The `tools` field: a count after `reload`, a listing after `list`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ToolsField {
    Count(usize),
    List(Vec<ToolSummary>),
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ControlResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tools: Option<ToolsField>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ControlResponse {
    pub fn ok() -> Self {
        Self {
            status: Some("ok".into()),
            ..Self::default()
        }
    }

    pub fn reloaded(count: usize) -> Self {
        Self {
            tools: Some(ToolsField::Count(count)),
            ..Self::ok()
        }
    }

    pub fn listing(tools: Vec<ToolSummary>) -> Self {
        Self {
            tools: Some(ToolsField::List(tools)),
            ..Self::ok()
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            error: Some(message.into()),
            ..Self::default()
        }
    }

    pub fn unknown_command(cmd: &str) -> Self {
        Self::error(format!("unknown command: {cmd}"))
    }

    pub fn is_ok(&self) -> bool {
        self.status.as_deref() == Some("ok") && self.error.is_none()
    }
}
