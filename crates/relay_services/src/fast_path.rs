use std::sync::Arc;

use chrono::{DateTime, SecondsFormat, Utc};
use relay_domain::{normalize_uuid, LocalAppCacheSettings};
use serde_json::{json, Map, Value};
use tracing::{debug, warn};

use crate::LocalStoreInfra;

const ROW_COLUMNS: &str = "id, type, parent_table, parent_id, space_id, created_time, \
     last_edited_time, alive, properties, content, meta_last_access_timestamp";

/// Local block types that change name in the public API. Unlisted types map
/// to themselves.
const BLOCK_TYPE_MAP: &[(&str, &str)] = &[
    ("text", "paragraph"),
    ("header", "heading_1"),
    ("sub_header", "heading_2"),
    ("sub_sub_header", "heading_3"),
    ("bulleted_list", "bulleted_list_item"),
    ("numbered_list", "numbered_list_item"),
    ("page", "child_page"),
];

/// Trust-gated read path over the Notion desktop app's SQLite database.
///
/// Serves a fixed whitelist of read operations by projecting local rows into
/// the public API's response shapes. Every validation failure is a silent
/// miss: the caller falls through to the network path.
pub struct FastPath {
    store: Arc<dyn LocalStoreInfra>,
    active: bool,
    max_page_size: u32,
}

impl FastPath {
    pub fn new(settings: &LocalAppCacheSettings, store: Arc<dyn LocalStoreInfra>) -> Self {
        if settings.enabled && !settings.trust_enabled {
            warn!(
                "Local app cache requested without the trust flag; keeping the SQLite fast-path \
                 disabled"
            );
        }
        FastPath {
            store,
            active: settings.is_active(),
            max_page_size: settings.max_page_size.max(1),
        }
    }

    /// Attempts to satisfy an operation locally. `None` means "not served
    /// here" for any reason: unsupported operation, gate closed, unreadable
    /// database, invalid id, missing row, or a row the projector rejects.
    pub async fn lookup(&self, operation_id: &str, args: &Map<String, Value>) -> Option<Value> {
        if !self.active || !self.store.is_readable() {
            return None;
        }

        let outcome = match operation_id {
            "retrieve-a-page" => self.page(string_arg(args, "page_id")?).await,
            "retrieve-a-block" => self.block(string_arg(args, "block_id")?).await,
            "get-block-children" => {
                self.children(
                    string_arg(args, "block_id")?,
                    args.get("page_size").and_then(Value::as_u64),
                    args.get("start_cursor").and_then(Value::as_str),
                )
                .await
            }
            _ => return None,
        };

        match outcome {
            Ok(found) => found,
            Err(error) => {
                warn!(operation_id, %error, "SQLite fast-path lookup failed; treating as miss");
                None
            }
        }
    }

    async fn page(&self, raw_id: &str) -> anyhow::Result<Option<Value>> {
        let Some(id) = normalize_uuid(raw_id) else {
            return Ok(None);
        };

        let sql = format!(
            "SELECT {ROW_COLUMNS} FROM block WHERE id = ? AND type = 'page' \
             ORDER BY meta_last_access_timestamp DESC LIMIT 1"
        );
        let rows = self.store.query(&sql, vec![id.clone()]).await?;
        let Some(row) = rows.first() else {
            debug!(%id, "Page not present in local app cache");
            return Ok(None);
        };

        Ok(project_page(row, &id))
    }

    async fn block(&self, raw_id: &str) -> anyhow::Result<Option<Value>> {
        let Some(id) = normalize_uuid(raw_id) else {
            return Ok(None);
        };

        let sql = format!("SELECT {ROW_COLUMNS} FROM block WHERE id = ? LIMIT 1");
        let rows = self.store.query(&sql, vec![id.clone()]).await?;
        let Some(row) = rows.first() else {
            return Ok(None);
        };

        Ok(project_block(row, &id))
    }

    async fn children(
        &self,
        raw_id: &str,
        page_size: Option<u64>,
        start_cursor: Option<&str>,
    ) -> anyhow::Result<Option<Value>> {
        let Some(id) = normalize_uuid(raw_id) else {
            return Ok(None);
        };

        let sql = format!("SELECT {ROW_COLUMNS} FROM block WHERE id = ? LIMIT 1");
        let rows = self.store.query(&sql, vec![id.clone()]).await?;
        let Some(parent) = rows.first() else {
            return Ok(None);
        };

        let Some(child_ids) = content_ids(parent) else {
            return Ok(None);
        };

        let page_size = page_size
            .unwrap_or(self.max_page_size as u64)
            .clamp(1, self.max_page_size as u64) as usize;

        let start_index = match start_cursor {
            Some(cursor) => {
                let Some(cursor) = normalize_uuid(cursor) else {
                    return Ok(None);
                };
                match child_ids.iter().position(|child| *child == cursor) {
                    Some(index) => index,
                    None => return Ok(None),
                }
            }
            None => 0,
        };

        let window: Vec<String> = child_ids
            .iter()
            .skip(start_index)
            .take(page_size)
            .cloned()
            .collect();
        if window.is_empty() {
            return Ok(Some(json!({
                "object": "list",
                "results": [],
                "next_cursor": Value::Null,
                "has_more": false,
                "type": "block",
                "block": {}
            })));
        }

        let placeholders = vec!["?"; window.len()].join(", ");
        let sql = format!("SELECT {ROW_COLUMNS} FROM block WHERE id IN ({placeholders})");
        let rows = self.store.query(&sql, window.clone()).await?;

        // Emit in the parent's content order; a missing or invalid child
        // invalidates the whole page rather than producing a partial one.
        let mut results = Vec::with_capacity(window.len());
        for child_id in &window {
            let Some(row) = rows
                .iter()
                .find(|row| row.get("id").and_then(Value::as_str) == Some(child_id))
            else {
                return Ok(None);
            };
            let Some(block) = project_block(row, child_id) else {
                return Ok(None);
            };
            results.push(block);
        }

        let has_more = start_index + page_size < child_ids.len();
        let next_cursor = if has_more {
            Value::from(window.last().cloned())
        } else {
            Value::Null
        };

        Ok(Some(json!({
            "object": "list",
            "results": results,
            "next_cursor": next_cursor,
            "has_more": has_more,
            "type": "block",
            "block": {}
        })))
    }
}

fn string_arg<'a>(args: &'a Map<String, Value>, name: &str) -> Option<&'a str> {
    args.get(name).and_then(Value::as_str)
}

/// Parses the row's `content` column into the ordered child-id list.
fn content_ids(row: &Map<String, Value>) -> Option<Vec<String>> {
    let parsed = parse_json_column(row, "content", json!([]))?;
    let items = parsed.as_array()?;
    let mut ids = Vec::with_capacity(items.len());
    for item in items {
        ids.push(item.as_str()?.to_string());
    }
    Some(ids)
}

/// Reads a column that stores JSON as text. Missing and NULL columns fall
/// back to `empty`; malformed text is a validation failure.
fn parse_json_column(row: &Map<String, Value>, column: &str, empty: Value) -> Option<Value> {
    match row.get(column) {
        None | Some(Value::Null) => Some(empty),
        Some(Value::String(text)) if text.trim().is_empty() => Some(empty),
        Some(Value::String(text)) => serde_json::from_str(text).ok(),
        Some(structured @ (Value::Object(_) | Value::Array(_))) => Some(structured.clone()),
        Some(_) => None,
    }
}

fn row_i64(row: &Map<String, Value>, column: &str) -> Option<i64> {
    row.get(column).and_then(Value::as_i64)
}

fn iso_time(millis: Option<i64>) -> String {
    millis
        .and_then(DateTime::<Utc>::from_timestamp_millis)
        .map(|time| time.to_rfc3339_opts(SecondsFormat::Millis, true))
        .unwrap_or_else(|| "1970-01-01T00:00:00.000Z".to_string())
}

fn is_alive(row: &Map<String, Value>) -> bool {
    row_i64(row, "alive") == Some(1)
}

/// Flattens the desktop app's segment arrays (`[["text", [...]], ...]`) into
/// plain text.
fn plain_text(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        Value::Array(items) => items.iter().map(plain_text).collect(),
        _ => String::new(),
    }
}

/// A single API rich-text node with no annotations, or an empty list for
/// empty text.
fn rich_text(text: &str) -> Value {
    if text.is_empty() {
        return json!([]);
    }
    json!([{
        "type": "text",
        "text": {"content": text, "link": Value::Null},
        "annotations": {
            "bold": false,
            "italic": false,
            "strikethrough": false,
            "underline": false,
            "code": false,
            "color": "default"
        },
        "plain_text": text,
        "href": Value::Null
    }])
}

fn project_page(row: &Map<String, Value>, id: &str) -> Option<Value> {
    let properties = parse_json_column(row, "properties", json!({}))?;
    let properties = properties.as_object()?;
    if !properties
        .get("title")
        .map(Value::is_array)
        .unwrap_or(false)
    {
        return None;
    }

    let mut projected = Map::new();
    for (name, value) in properties {
        if name == "title" {
            projected.insert(
                "title".to_string(),
                json!({"id": "title", "type": "title", "title": rich_text(&plain_text(value))}),
            );
        } else {
            projected.insert(
                name.clone(),
                json!({
                    "id": name,
                    "type": "rich_text",
                    "rich_text": rich_text(&plain_text(value))
                }),
            );
        }
    }
    if !projected.contains_key("title") {
        projected.insert(
            "title".to_string(),
            json!({"id": "title", "type": "title", "title": []}),
        );
    }

    let archived = !is_alive(row);
    let mut page = json!({
        "object": "page",
        "id": id,
        "created_time": iso_time(row_i64(row, "created_time")),
        "last_edited_time": iso_time(row_i64(row, "last_edited_time")),
        "archived": archived,
        "in_trash": archived,
        "url": format!("https://www.notion.so/{}", id.replace('-', "")),
        "properties": projected
    });

    let parent_table = row.get("parent_table").and_then(Value::as_str);
    let parent_id = row.get("parent_id").and_then(Value::as_str);
    if let (Some(table), Some(parent_id)) = (parent_table, parent_id) {
        if !table.is_empty() && !parent_id.is_empty() {
            let key = format!("{table}_id");
            let mut parent = Map::new();
            parent.insert("type".to_string(), Value::String(key.clone()));
            parent.insert(key, Value::String(parent_id.to_string()));
            page["parent"] = Value::Object(parent);
        }
    }

    Some(page)
}

fn api_block_type(local_type: &str) -> &str {
    BLOCK_TYPE_MAP
        .iter()
        .find(|(local, _)| *local == local_type)
        .map(|(_, api)| *api)
        .unwrap_or(local_type)
}

fn project_block(row: &Map<String, Value>, id: &str) -> Option<Value> {
    let local_type = row.get("type").and_then(Value::as_str)?;
    if local_type.is_empty() {
        return None;
    }
    let properties = parse_json_column(row, "properties", json!({}))?;
    let properties = properties.as_object()?.clone();
    let content = parse_json_column(row, "content", json!([]))?;
    let content = content.as_array()?.clone();

    let api_type = api_block_type(local_type);
    let title = plain_text(properties.get("title").unwrap_or(&Value::Null));

    let payload = match api_type {
        "paragraph" | "heading_1" | "heading_2" | "heading_3" | "bulleted_list_item"
        | "numbered_list_item" => {
            json!({"rich_text": rich_text(&title), "color": "default"})
        }
        "to_do" => json!({"rich_text": rich_text(&title), "color": "default", "checked": false}),
        "child_page" => json!({"title": title}),
        "divider" => json!({}),
        _ => json!({}),
    };

    let mut block = json!({
        "object": "block",
        "id": id,
        "type": api_type,
        "created_time": iso_time(row_i64(row, "created_time")),
        "last_edited_time": iso_time(row_i64(row, "last_edited_time")),
        "has_children": !content.is_empty(),
        "archived": !is_alive(row)
    });
    block[api_type] = payload;

    Some(block)
}
