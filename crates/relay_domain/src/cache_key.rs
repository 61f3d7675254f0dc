use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::HttpOperation;

pub const CACHE_KEY_PREFIX: &str = "openapi-cache:v1";

/// Reserved params sub-key under which callers inject request context (auth
/// fingerprint and base URL) so that a credential or host change invalidates
/// every cached entry.
pub const CONTEXT_PARAM: &str = "__relayContext";

/// Builds the deterministic cache key for an operation and its parameters.
///
/// Two parameter trees that are structurally equal up to object key order
/// produce the same key: objects are hashed with byte-sorted keys and arrays
/// in order. Inputs are `serde_json::Value`s, which cannot express cycles or
/// non-JSON values, so canonicalization is total.
pub fn cache_key(operation: &HttpOperation, params: &Value) -> String {
    let method = operation.method.to_uppercase();
    let operation_id = operation.operation_id.as_deref();

    let mut canonical = String::new();
    canonical.push_str("{\"operation\":{\"method\":");
    write_canonical(&Value::from(method.as_str()), &mut canonical);
    canonical.push_str(",\"operation_id\":");
    match operation_id {
        Some(id) => write_canonical(&Value::from(id), &mut canonical),
        None => canonical.push_str("null"),
    }
    canonical.push_str(",\"path\":");
    write_canonical(&Value::from(operation.path.as_str()), &mut canonical);
    canonical.push_str("},\"params\":");
    write_canonical(params, &mut canonical);
    canonical.push('}');

    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());

    format!(
        "{CACHE_KEY_PREFIX}:{}:{}:{}:{:x}",
        method,
        operation.path,
        operation_id.unwrap_or("-"),
        hasher.finalize()
    )
}

/// Writes `value` as JSON with object keys in byte-sorted order. Arrays keep
/// their order; scalars use their standard JSON form.
fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort_unstable();
            out.push('{');
            for (index, key) in keys.iter().enumerate() {
                if index > 0 {
                    out.push(',');
                }
                out.push_str(&Value::from(key.as_str()).to_string());
                out.push(':');
                write_canonical(&map[*key], out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (index, item) in items.iter().enumerate() {
                if index > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}
