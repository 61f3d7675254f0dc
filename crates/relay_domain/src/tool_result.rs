use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Array fields whose emptiness marks a successful read as "empty". This is a
/// heuristic over the upstream response bodies, not an API contract; extend
/// only deliberately.
pub const EMPTY_READ_ARRAYS: &[&str] = &["results", "users", "items"];

/// One content item of a tool result. The routed surface is text-only; other
/// MCP content kinds are flattened by the transport before they reach here.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ToolContent {
    Text { text: String },
}

impl ToolContent {
    pub fn text(value: impl ToString) -> Self {
        ToolContent::Text { text: value.to_string() }
    }

    pub fn as_text(&self) -> &str {
        match self {
            ToolContent::Text { text } => text,
        }
    }
}

/// Result of a tool call. Error results are first-class values: the routing
/// layers return them instead of raising, and only transport-level failures
/// surface as `Err`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolResult {
    #[serde(default)]
    pub content: Vec<ToolContent>,
    #[serde(rename = "isError", default)]
    pub is_error: bool,
}

impl ToolResult {
    pub fn text(value: impl ToString) -> Self {
        ToolResult { content: vec![ToolContent::text(value)], is_error: false }
    }

    pub fn error(message: impl ToString) -> Self {
        ToolResult { content: vec![ToolContent::text(message)], is_error: true }
    }

    /// Wraps a JSON response body as a non-error text result.
    pub fn json(value: &Value) -> Self {
        ToolResult::text(value.to_string())
    }

    /// The text of the single content item, if that is the whole result.
    pub fn single_text(&self) -> Option<&str> {
        match self.content.as_slice() {
            [ToolContent::Text { text }] => Some(text),
            _ => None,
        }
    }

    /// Concatenated text of every content item.
    pub fn joined_text(&self) -> String {
        self.content
            .iter()
            .map(ToolContent::as_text)
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// True iff this is a successful single-text result whose JSON payload
    /// has one of the well-known result arrays present but empty.
    pub fn is_empty_read(&self) -> bool {
        if self.is_error {
            return false;
        }
        let Some(text) = self.single_text() else {
            return false;
        };
        let Ok(parsed) = serde_json::from_str::<Value>(text) else {
            return false;
        };
        EMPTY_READ_ARRAYS.iter().any(|field| {
            parsed
                .get(field)
                .and_then(Value::as_array)
                .is_some_and(|items| items.is_empty())
        })
    }

    /// Serializes into the `tools/call` wire shape.
    pub fn to_wire(&self) -> Value {
        let content = self
            .content
            .iter()
            .map(|item| json!({"type": "text", "text": item.as_text()}))
            .collect::<Vec<_>>();
        json!({"content": content, "isError": self.is_error})
    }
}
