//! Tool families and the per-role capability table.
//!
//! A [`Toolkit`] is one tool family (memory, search, document analysis, code
//! generation, delegation). Each role resolves its toolkits into a
//! [`CapabilityTable`] when it is built: tool name → definition + handler.
//! Tools return plain text that gets fed back to the model; failures become
//! `Error: ...` observations instead of aborting the task.

pub mod code;
pub mod document;
pub mod memory;
pub mod search;

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::llm::ServiceError;
use crate::persist::StorageError;

pub use code::CodeToolkit;
pub use document::DocumentToolkit;
pub use memory::MemoryToolkit;
pub use search::SearchToolkit;

/// Tool families a role can be granted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    Memory,
    Search,
    Document,
    Code,
    Delegation,
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Capability::Memory => write!(f, "memory"),
            Capability::Search => write!(f, "search"),
            Capability::Document => write!(f, "document"),
            Capability::Code => write!(f, "code"),
            Capability::Delegation => write!(f, "delegation"),
        }
    }
}

/// Tool definition shown to the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDef {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
}

impl ToolDef {
    pub(crate) fn new(name: &str, description: &str, input_schema: Value) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            input_schema,
        }
    }

    fn required(&self) -> Vec<&str> {
        self.input_schema["required"]
            .as_array()
            .map(|r| r.iter().filter_map(Value::as_str).collect())
            .unwrap_or_default()
    }

    /// The argument a bare string input is bound to.
    fn primary_arg(&self) -> Option<String> {
        if let Some(first) = self.required().first() {
            return Some(first.to_string());
        }
        match self.input_schema["properties"].as_object() {
            Some(props) if props.len() == 1 => props.keys().next().cloned(),
            _ => None,
        }
    }
}

/// One tool family.
#[async_trait]
pub trait Toolkit: Send + Sync {
    fn capability(&self) -> Capability;

    fn defs(&self) -> Vec<ToolDef>;

    /// Run `name` with already-validated arguments.
    async fn call(&self, name: &str, input: &Value) -> Result<String, ToolError>;
}

struct Entry {
    def: ToolDef,
    toolkit: Arc<dyn Toolkit>,
}

/// Tool name → handler, fixed at role construction.
#[derive(Default)]
pub struct CapabilityTable {
    entries: BTreeMap<String, Entry>,
    order: Vec<String>,
    capabilities: Vec<Capability>,
}

impl CapabilityTable {
    pub fn resolve(toolkits: &[Arc<dyn Toolkit>]) -> Result<Self, ToolError> {
        let mut table = Self::default();
        for toolkit in toolkits {
            if !table.capabilities.contains(&toolkit.capability()) {
                table.capabilities.push(toolkit.capability());
            }
            for def in toolkit.defs() {
                if table.entries.contains_key(&def.name) {
                    return Err(ToolError::Duplicate(def.name));
                }
                table.order.push(def.name.clone());
                table.entries.insert(
                    def.name.clone(),
                    Entry {
                        def,
                        toolkit: Arc::clone(toolkit),
                    },
                );
            }
        }
        Ok(table)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capabilities(&self) -> &[Capability] {
        &self.capabilities
    }

    /// Definitions in registration order.
    pub fn defs(&self) -> impl Iterator<Item = &ToolDef> {
        self.order.iter().filter_map(|n| self.entries.get(n).map(|e| &e.def))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    /// Validate `input` against the tool's schema and run it.
    pub async fn invoke(&self, name: &str, input: &Value) -> Result<String, ToolError> {
        let entry = self
            .entries
            .get(name)
            .ok_or_else(|| ToolError::UnknownTool(name.to_string()))?;
        let args = normalize_args(&entry.def, input)?;
        entry.toolkit.call(name, &args).await
    }

    /// Like [`invoke`](Self::invoke) but renders failures as text.
    pub async fn invoke_text(&self, name: &str, input: &Value) -> String {
        match self.invoke(name, input).await {
            Ok(out) => out,
            Err(e) => {
                tracing::debug!(tool = name, error = %e, "Tool call failed");
                format!("Error: {e}")
            }
        }
    }
}

fn normalize_args(def: &ToolDef, input: &Value) -> Result<Value, ToolError> {
    let args = match input {
        Value::Object(_) => input.clone(),
        Value::Null => json!({}),
        Value::String(s) => {
            let mut args = serde_json::Map::new();
            if let Some(arg) = def.primary_arg() {
                args.insert(arg, Value::String(s.clone()));
            }
            Value::Object(args)
        }
        _ => {
            return Err(ToolError::Validation(format!(
                "input for {} must be a JSON object",
                def.name
            )));
        }
    };
    for req in def.required() {
        if args.get(req).is_none_or(Value::is_null) {
            return Err(ToolError::Validation(format!(
                "missing required argument '{req}' for {}",
                def.name
            )));
        }
    }
    Ok(args)
}

/// Required string argument.
pub(crate) fn str_arg<'a>(input: &'a Value, key: &str) -> Result<&'a str, ToolError> {
    input[key]
        .as_str()
        .ok_or_else(|| ToolError::Validation(format!("argument '{key}' must be a string")))
}

/// Optional string argument; blank counts as absent.
pub(crate) fn opt_str_arg<'a>(input: &'a Value, key: &str) -> Option<&'a str> {
    input[key].as_str().map(str::trim).filter(|s| !s.is_empty())
}

/// Schema helper: every listed property is a string.
pub(crate) fn string_schema(required: &[&str], properties: &[(&str, &str)]) -> Value {
    let mut props = serde_json::Map::new();
    for (name, desc) in properties {
        props.insert(
            name.to_string(),
            json!({ "type": "string", "description": desc }),
        );
    }
    json!({
        "type": "object",
        "required": required,
        "properties": props,
    })
}

// ── Errors ─────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("unknown tool '{0}'")]
    UnknownTool(String),
    #[error("tool '{0}' is registered twice")]
    Duplicate(String),
    #[error("{0}")]
    Validation(String),
    #[error(transparent)]
    Service(#[from] ServiceError),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Echo;

    #[async_trait]
    impl Toolkit for Echo {
        fn capability(&self) -> Capability {
            Capability::Document
        }

        fn defs(&self) -> Vec<ToolDef> {
            vec![
                ToolDef::new(
                    "echo",
                    "Echo text back",
                    string_schema(&["text"], &[("text", "Text to echo")]),
                ),
                ToolDef::new("ping", "No arguments", json!({"type": "object", "properties": {}})),
            ]
        }

        async fn call(&self, name: &str, input: &Value) -> Result<String, ToolError> {
            match name {
                "echo" => Ok(str_arg(input, "text")?.to_string()),
                _ => Ok("pong".into()),
            }
        }
    }

    fn table() -> CapabilityTable {
        CapabilityTable::resolve(&[Arc::new(Echo) as Arc<dyn Toolkit>]).unwrap()
    }

    #[tokio::test]
    async fn bare_string_binds_to_required_argument() {
        let out = table().invoke("echo", &json!("hello")).await.unwrap();
        assert_eq!(out, "hello");
    }

    #[tokio::test]
    async fn missing_argument_is_validation_error_text() {
        let out = table().invoke_text("echo", &json!({})).await;
        assert_eq!(out, "Error: missing required argument 'text' for echo");
    }

    #[tokio::test]
    async fn unknown_tool_is_reported_not_raised() {
        let out = table().invoke_text("nope", &Value::Null).await;
        assert_eq!(out, "Error: unknown tool 'nope'");
    }

    #[tokio::test]
    async fn null_input_is_accepted_for_argless_tools() {
        assert_eq!(table().invoke("ping", &Value::Null).await.unwrap(), "pong");
    }

    #[test]
    fn duplicate_tool_names_are_rejected() {
        let kits: Vec<Arc<dyn Toolkit>> = vec![Arc::new(Echo), Arc::new(Echo)];
        let err = CapabilityTable::resolve(&kits).err().unwrap();
        assert!(matches!(err, ToolError::Duplicate(name) if name == "echo"));
    }

    #[test]
    fn defs_keep_registration_order() {
        let t = table();
        let names: Vec<&str> = t.defs().map(|d| d.name.as_str()).collect();
        assert_eq!(names, vec!["echo", "ping"]);
        assert_eq!(t.capabilities(), &[Capability::Document]);
    }
}
