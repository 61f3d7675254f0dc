use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::ToolName;

/// How the router services calls for one exposed tool name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RouteMode {
    /// Remote backend only.
    Official,
    /// Local backend only (degraded operation).
    FastOnly,
    /// Remote tool with a local equivalent tried first when the arguments
    /// qualify.
    OfficialWithFastBoost,
    /// Both backends expose the name; local first, remote on error or empty
    /// read.
    FastThenOfficialSameName,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteEntry {
    pub mode: RouteMode,
    pub tool_name: ToolName,
}

pub type RouteTable = HashMap<ToolName, RouteEntry>;

/// Name tokens that mark a tool as read-looking.
const READ_HINTS: &[&str] = &[
    "get", "retrieve", "list", "search", "query", "fetch", "read", "find",
];

/// Name tokens that mark a tool as write-looking. A name matching both hint
/// sets counts as a write.
const WRITE_HINTS: &[&str] = &[
    "create", "update", "delete", "append", "patch", "move", "duplicate", "archive", "restore",
    "trash", "upload", "insert", "set",
];

/// Remote-only tools for which a local equivalent exists.
pub const BOOSTABLE_TOOLS: &[&str] = &["fetch", "search", "get-users"];

/// Lower-cases a tool name and strips a leading `notion` vendor prefix
/// (`notion-`, `notion_` or `notion:`).
pub fn normalize_tool_name(name: &str) -> String {
    let lowered = name.to_ascii_lowercase();
    for separator in ['-', '_', ':'] {
        let prefix = format!("notion{separator}");
        if let Some(rest) = lowered.strip_prefix(&prefix) {
            return rest.to_string();
        }
    }
    lowered
}

fn tokens(normalized: &str) -> Vec<&str> {
    normalized
        .split(['-', '_', ':', '.', ' ', '/'])
        .filter(|token| !token.is_empty())
        .collect()
}

/// True iff the tool name looks like a read operation.
pub fn is_read_tool(name: &str) -> bool {
    let normalized = normalize_tool_name(name);
    tokens(&normalized)
        .iter()
        .any(|token| READ_HINTS.contains(token))
}

/// True iff the tool name looks like a write operation.
pub fn is_write_tool(name: &str) -> bool {
    let normalized = normalize_tool_name(name);
    tokens(&normalized)
        .iter()
        .any(|token| WRITE_HINTS.contains(token))
}

/// Read-looking and not write-looking: the exposure rule for degraded mode
/// and the same-name fallback rule.
pub fn is_plain_read_tool(name: &str) -> bool {
    is_read_tool(name) && !is_write_tool(name)
}

pub fn is_boostable_tool(name: &str) -> bool {
    let normalized = normalize_tool_name(name);
    BOOSTABLE_TOOLS.contains(&normalized.as_str())
}
