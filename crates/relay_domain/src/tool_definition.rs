use derive_setters::Setters;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::ToolName;

/// Descriptor of a tool as discovered from a backend.
///
/// The input schema is kept as raw JSON: foreign servers ship arbitrary
/// schemas and the router forwards them verbatim rather than imposing a
/// schema model of its own.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Setters)]
#[setters(into)]
pub struct ToolDefinition {
    pub name: ToolName,
    pub description: String,
    pub input_schema: Value,
    pub read_only_hint: bool,
}

impl ToolDefinition {
    pub fn new<N: ToString>(name: N) -> Self {
        ToolDefinition {
            name: ToolName::new(name),
            description: String::new(),
            input_schema: json!({"type": "object"}),
            read_only_hint: false,
        }
    }

    /// Parses a single entry of a `tools/list` result. Returns `None` for
    /// entries without a usable name; callers skip those with a warning.
    pub fn from_wire(value: &Value) -> Option<Self> {
        let name = value.get("name")?.as_str()?;
        if name.is_empty() {
            return None;
        }

        let description = value
            .get("description")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let input_schema = value
            .get("inputSchema")
            .cloned()
            .unwrap_or_else(|| json!({"type": "object"}));
        let read_only_hint = value
            .pointer("/annotations/readOnlyHint")
            .and_then(Value::as_bool)
            .unwrap_or(false);

        Some(ToolDefinition {
            name: ToolName::new(name),
            description,
            input_schema,
            read_only_hint,
        })
    }

    /// Serializes this descriptor into the `tools/list` wire shape.
    pub fn to_wire(&self) -> Value {
        json!({
            "name": self.name.as_str(),
            "description": self.description,
            "inputSchema": self.input_schema,
            "annotations": {"readOnlyHint": self.read_only_hint},
        })
    }
}
