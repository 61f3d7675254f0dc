use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::ToolName;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Get,
    Post,
    Patch,
    Put,
    Delete,
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Patch => "PATCH",
            HttpMethod::Put => "PUT",
            HttpMethod::Delete => "DELETE",
        }
    }
}

/// Identity of an HTTP operation for cache keying.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpOperation {
    pub method: String,
    pub path: String,
    pub operation_id: Option<String>,
}

/// One operation of the upstream HTTP API, addressable as an MCP tool.
#[derive(Debug, Clone, PartialEq)]
pub struct OperationDescriptor {
    pub tool: ToolName,
    pub operation_id: String,
    pub method: HttpMethod,
    pub path: String,
    pub description: String,
    pub input_schema: Value,
}

impl OperationDescriptor {
    pub fn http_operation(&self) -> HttpOperation {
        HttpOperation {
            method: self.method.as_str().to_string(),
            path: self.path.clone(),
            operation_id: Some(self.operation_id.clone()),
        }
    }
}

/// The fixed read-only allowlist: operation-id to the one HTTP method the
/// local backend may issue for it. This table is the single source of truth;
/// an operation absent here is neither listed nor callable locally.
pub const READ_ONLY_ALLOWLIST: &[(&str, HttpMethod)] = &[
    ("retrieve-a-page", HttpMethod::Get),
    ("retrieve-a-page-property", HttpMethod::Get),
    ("retrieve-a-block", HttpMethod::Get),
    ("get-block-children", HttpMethod::Get),
    ("retrieve-a-database", HttpMethod::Get),
    ("post-database-query", HttpMethod::Post),
    ("retrieve-a-data-source", HttpMethod::Get),
    ("retrieve-a-comment", HttpMethod::Get),
    ("post-search", HttpMethod::Post),
    ("get-users", HttpMethod::Get),
    ("get-user", HttpMethod::Get),
    ("get-self", HttpMethod::Get),
];

pub fn allowlisted_method(operation_id: &str) -> Option<HttpMethod> {
    READ_ONLY_ALLOWLIST
        .iter()
        .find(|(id, _)| *id == operation_id)
        .map(|(_, method)| *method)
}

fn id_param(name: &str, description: &str) -> Value {
    json!({
        "type": "object",
        "properties": {
            name: {"type": "string", "description": description}
        },
        "required": [name]
    })
}

fn operation(
    id: &str,
    method: HttpMethod,
    path: &str,
    description: &str,
    input_schema: Value,
) -> OperationDescriptor {
    OperationDescriptor {
        tool: ToolName::new(id),
        operation_id: id.to_string(),
        method,
        path: path.to_string(),
        description: description.to_string(),
        input_schema,
    }
}

/// Every operation the local backend knows about, reads and writes alike.
/// Writes are kept in the catalog so that calling one yields a policy error
/// instead of "unknown tool"; the allowlist decides what is actually served.
pub fn operation_catalog() -> Vec<OperationDescriptor> {
    vec![
        operation(
            "retrieve-a-page",
            HttpMethod::Get,
            "/v1/pages/{page_id}",
            "Retrieve a page by id",
            id_param("page_id", "Identifier of the page"),
        ),
        operation(
            "retrieve-a-page-property",
            HttpMethod::Get,
            "/v1/pages/{page_id}/properties/{property_id}",
            "Retrieve a single page property item",
            json!({
                "type": "object",
                "properties": {
                    "page_id": {"type": "string"},
                    "property_id": {"type": "string"},
                    "page_size": {"type": "integer"},
                    "start_cursor": {"type": "string"}
                },
                "required": ["page_id", "property_id"]
            }),
        ),
        operation(
            "retrieve-a-block",
            HttpMethod::Get,
            "/v1/blocks/{block_id}",
            "Retrieve a block by id",
            id_param("block_id", "Identifier of the block"),
        ),
        operation(
            "get-block-children",
            HttpMethod::Get,
            "/v1/blocks/{block_id}/children",
            "List the direct children of a block",
            json!({
                "type": "object",
                "properties": {
                    "block_id": {"type": "string"},
                    "page_size": {"type": "integer"},
                    "start_cursor": {"type": "string"}
                },
                "required": ["block_id"]
            }),
        ),
        operation(
            "retrieve-a-database",
            HttpMethod::Get,
            "/v1/databases/{database_id}",
            "Retrieve a database by id",
            id_param("database_id", "Identifier of the database"),
        ),
        operation(
            "post-database-query",
            HttpMethod::Post,
            "/v1/databases/{database_id}/query",
            "Query a database",
            json!({
                "type": "object",
                "properties": {
                    "database_id": {"type": "string"},
                    "filter": {"type": "object"},
                    "sorts": {"type": "array"},
                    "page_size": {"type": "integer"},
                    "start_cursor": {"type": "string"}
                },
                "required": ["database_id"]
            }),
        ),
        operation(
            "retrieve-a-data-source",
            HttpMethod::Get,
            "/v1/data_sources/{data_source_id}",
            "Retrieve a data source by id",
            id_param("data_source_id", "Identifier of the data source"),
        ),
        operation(
            "retrieve-a-comment",
            HttpMethod::Get,
            "/v1/comments",
            "List comments on a block or page",
            json!({
                "type": "object",
                "properties": {
                    "block_id": {"type": "string"},
                    "page_size": {"type": "integer"},
                    "start_cursor": {"type": "string"}
                },
                "required": ["block_id"]
            }),
        ),
        operation(
            "post-search",
            HttpMethod::Post,
            "/v1/search",
            "Search pages and databases by title",
            json!({
                "type": "object",
                "properties": {
                    "query": {"type": "string"},
                    "filter": {"type": "object"},
                    "sort": {"type": "object"},
                    "page_size": {"type": "integer"},
                    "start_cursor": {"type": "string"}
                }
            }),
        ),
        operation(
            "get-users",
            HttpMethod::Get,
            "/v1/users",
            "List all users in the workspace",
            json!({
                "type": "object",
                "properties": {
                    "page_size": {"type": "integer"},
                    "start_cursor": {"type": "string"}
                }
            }),
        ),
        operation(
            "get-user",
            HttpMethod::Get,
            "/v1/users/{user_id}",
            "Retrieve a user by id",
            id_param("user_id", "Identifier of the user"),
        ),
        operation(
            "get-self",
            HttpMethod::Get,
            "/v1/users/me",
            "Retrieve the bot user of the current token",
            json!({"type": "object", "properties": {}}),
        ),
        // Write operations: known, never allowlisted.
        operation(
            "post-page",
            HttpMethod::Post,
            "/v1/pages",
            "Create a page",
            json!({"type": "object"}),
        ),
        operation(
            "patch-page",
            HttpMethod::Patch,
            "/v1/pages/{page_id}",
            "Update page properties",
            id_param("page_id", "Identifier of the page"),
        ),
        operation(
            "patch-block-children",
            HttpMethod::Patch,
            "/v1/blocks/{block_id}/children",
            "Append child blocks",
            id_param("block_id", "Identifier of the block"),
        ),
        operation(
            "update-a-block",
            HttpMethod::Patch,
            "/v1/blocks/{block_id}",
            "Update a block",
            id_param("block_id", "Identifier of the block"),
        ),
        operation(
            "delete-a-block",
            HttpMethod::Delete,
            "/v1/blocks/{block_id}",
            "Move a block to the trash",
            id_param("block_id", "Identifier of the block"),
        ),
        operation(
            "create-a-comment",
            HttpMethod::Post,
            "/v1/comments",
            "Create a comment",
            json!({"type": "object"}),
        ),
        operation(
            "create-a-database",
            HttpMethod::Post,
            "/v1/databases",
            "Create a database",
            json!({"type": "object"}),
        ),
        operation(
            "update-a-database",
            HttpMethod::Patch,
            "/v1/databases/{database_id}",
            "Update a database",
            id_param("database_id", "Identifier of the database"),
        ),
    ]
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn test_allowlist_covers_only_reads() {
        for (id, method) in READ_ONLY_ALLOWLIST {
            let allowed = matches!(method, HttpMethod::Get | HttpMethod::Post);
            assert!(allowed, "{id} must not allow a mutating method");
        }
    }

    #[test]
    fn test_catalog_contains_every_allowlisted_operation() {
        let catalog = operation_catalog();

        for (id, method) in READ_ONLY_ALLOWLIST {
            let found = catalog
                .iter()
                .find(|op| op.operation_id == *id)
                .unwrap_or_else(|| panic!("{id} missing from catalog"));
            assert_eq!(found.method, *method);
        }
    }

    #[test]
    fn test_write_operations_are_not_allowlisted() {
        let actual = allowlisted_method("patch-page");

        assert_eq!(actual, None);
    }

    #[test]
    fn test_catalog_tool_names_are_unique() {
        let catalog = operation_catalog();
        let mut names: Vec<_> = catalog.iter().map(|op| op.tool.as_str()).collect();
        names.sort();
        let before = names.len();
        names.dedup();

        assert_eq!(names.len(), before);
    }
}
