use std::collections::HashMap;
use std::sync::Arc;

use relay_domain::{
    allowlisted_method, cache_key, rehydrate_arguments, split_control_fields, ApiSettings,
    OperationDescriptor, ToolDefinition, ToolName, ToolResult, CONTEXT_PARAM,
    READ_ONLY_OPERATION_BLOCKED,
};
use serde_json::{json, Map, Value};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::{FastPath, HttpClientInfra, ResponseCache};

/// Longest tool name the backend exposes; longer canonical names are listed
/// truncated and resolved back through the alias table.
pub const MAX_TOOL_NAME_BYTES: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Alias {
    Canonical(ToolName),
    /// Two canonical names truncate to the same prefix; the alias cannot be
    /// resolved.
    Ambiguous,
}

/// The in-process, read-only backend over the upstream HTTP API.
///
/// Serves tool calls through three staged sources with early return:
/// response cache, SQLite fast-path, then the injected HTTP client. Only the
/// operations on the read-only allowlist are listed or callable.
pub struct LocalBackend {
    operations: HashMap<ToolName, OperationDescriptor>,
    aliases: HashMap<String, Alias>,
    cache: Arc<ResponseCache>,
    cache_enabled: bool,
    fast_path: Arc<FastPath>,
    http: Arc<dyn HttpClientInfra>,
    base_url: String,
    auth_fingerprint: String,
}

impl LocalBackend {
    pub fn new(
        catalog: Vec<OperationDescriptor>,
        api: &ApiSettings,
        cache: Arc<ResponseCache>,
        cache_enabled: bool,
        fast_path: Arc<FastPath>,
        http: Arc<dyn HttpClientInfra>,
    ) -> Self {
        let mut operations = HashMap::new();
        let mut aliases = HashMap::new();

        for descriptor in catalog {
            let truncated = truncate_name(descriptor.tool.as_str());
            if truncated != descriptor.tool.as_str() {
                aliases
                    .entry(truncated)
                    .and_modify(|alias| *alias = Alias::Ambiguous)
                    .or_insert_with(|| Alias::Canonical(descriptor.tool.clone()));
            }
            operations.insert(descriptor.tool.clone(), descriptor);
        }

        LocalBackend {
            operations,
            aliases,
            cache,
            cache_enabled,
            fast_path,
            http,
            base_url: api.base_url.clone(),
            auth_fingerprint: auth_fingerprint(api),
        }
    }

    /// Verifies the operation surface is usable. Runs once at startup,
    /// concurrently with the remote backend's connect.
    pub async fn connect(&self) -> anyhow::Result<()> {
        if self
            .operations
            .values()
            .all(|descriptor| allowlisted_method(&descriptor.operation_id).is_none())
        {
            anyhow::bail!("The operation catalog exposes no read operations");
        }
        Ok(())
    }

    /// Descriptors of the allowlisted operations, names truncated to the
    /// exposed maximum.
    pub fn list_tools(&self) -> Vec<ToolDefinition> {
        let mut tools: Vec<ToolDefinition> = self
            .operations
            .values()
            .filter(|descriptor| allowlisted_method(&descriptor.operation_id).is_some())
            .map(|descriptor| {
                ToolDefinition::new(truncate_name(descriptor.tool.as_str()))
                    .description(descriptor.description.clone())
                    .input_schema(descriptor.input_schema.clone())
                    .read_only_hint(true)
            })
            .collect();
        tools.sort_by(|a, b| a.name.cmp(&b.name));
        tools
    }

    pub fn has_tool(&self, name: &str) -> bool {
        self.find_tool_name(name)
            .map(|canonical| {
                self.operations
                    .get(&canonical)
                    .map(|descriptor| allowlisted_method(&descriptor.operation_id).is_some())
                    .unwrap_or(false)
            })
            .unwrap_or(false)
    }

    /// Resolves an incoming (possibly truncated) name to its canonical tool
    /// name.
    pub fn find_tool_name(&self, name: &str) -> Option<ToolName> {
        let direct = ToolName::new(name);
        if self.operations.contains_key(&direct) {
            return Some(direct);
        }
        match self.aliases.get(name) {
            Some(Alias::Canonical(canonical)) => Some(canonical.clone()),
            Some(Alias::Ambiguous) | None => None,
        }
    }

    /// Serves one tool call. Never fails: every failure mode is an error
    /// result.
    pub async fn call_tool(&self, name: &str, arguments: Value) -> ToolResult {
        let Some(canonical) = self.find_tool_name(name) else {
            return ToolResult::error(format!("Unknown tool: {name}"));
        };
        let descriptor = &self.operations[&canonical];
        if allowlisted_method(&descriptor.operation_id).is_none() {
            return blocked_result(&descriptor.operation_id);
        }

        let (sanitized, control) = split_control_fields(rehydrate_arguments(arguments));
        let params = match sanitized {
            Value::Object(map) => map,
            Value::Null => Map::new(),
            other => {
                return ToolResult::error(format!(
                    "Invalid arguments for {canonical}: expected an object, got {other}"
                ));
            }
        };

        let key = self.key_for(descriptor, &params);

        if self.cache_enabled && !control.force_refresh {
            if let Some(cached) = self.cache.get(&key) {
                debug!(tool = %canonical, "Response cache hit");
                return ToolResult::json(&cached);
            }
        }

        if !control.force_refresh {
            if let Some(found) = self.fast_path.lookup(&descriptor.operation_id, &params).await {
                debug!(tool = %canonical, "SQLite fast-path hit");
                self.store(&key, &found);
                return ToolResult::json(&found);
            }
        }

        match self.http.execute(descriptor, &params).await {
            Ok(response) => {
                self.store(&key, &response.data);
                ToolResult::json(&response.data)
            }
            Err(error) => {
                warn!(tool = %canonical, status = ?error.status, "Upstream API call failed");
                let mut payload = json!({
                    "status": "error",
                    "message": error.message,
                });
                if !error.data.is_null() {
                    payload["data"] = error.data.clone();
                }
                if let Some(status) = error.status {
                    payload["http_status"] = json!(status);
                }
                ToolResult {
                    content: vec![relay_domain::ToolContent::text(payload.to_string())],
                    is_error: true,
                }
            }
        }
    }

    fn key_for(&self, descriptor: &OperationDescriptor, params: &Map<String, Value>) -> String {
        let mut keyed = params.clone();
        keyed.insert(
            CONTEXT_PARAM.to_string(),
            json!({
                "auth_fingerprint": self.auth_fingerprint,
                "base_url": self.base_url,
            }),
        );
        cache_key(&descriptor.http_operation(), &Value::Object(keyed))
    }

    fn store(&self, key: &str, value: &Value) {
        if !self.cache_enabled {
            return;
        }
        self.cache.set(key, value.clone());
        self.cache.spawn_save();
    }
}

fn blocked_result(operation_id: &str) -> ToolResult {
    ToolResult {
        content: vec![relay_domain::ToolContent::text(
            json!({
                "status": "error",
                "code": READ_ONLY_OPERATION_BLOCKED,
                "message": format!(
                    "Operation {operation_id} mutates data and is not served by the read-only \
                     backend"
                ),
            })
            .to_string(),
        )],
        is_error: true,
    }
}

fn auth_fingerprint(api: &ApiSettings) -> String {
    let mut hasher = Sha256::new();
    hasher.update(api.authorization().unwrap_or_default().as_bytes());
    hasher.update(b"|");
    hasher.update(api.version.as_bytes());
    format!("{:x}", hasher.finalize())
}

fn truncate_name(name: &str) -> String {
    if name.len() <= MAX_TOOL_NAME_BYTES {
        return name.to_string();
    }
    let mut end = MAX_TOOL_NAME_BYTES;
    while !name.is_char_boundary(end) {
        end -= 1;
    }
    name[..end].to_string()
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;
    use pretty_assertions::assert_eq;
    use relay_domain::{
        operation_catalog, CacheSettings, HttpMethod, LocalAppCacheSettings, FORCE_REFRESH_FIELD,
    };

    use super::*;
    use crate::{Clock, HttpClientError, HttpResponse, LocalStoreInfra};

    struct FixedClock(u64);

    impl Clock for FixedClock {
        fn now_ms(&self) -> u64 {
            self.0
        }
    }

    struct EmptyStore;

    #[async_trait]
    impl LocalStoreInfra for EmptyStore {
        async fn query(
            &self,
            _sql: &str,
            _params: Vec<String>,
        ) -> anyhow::Result<Vec<Map<String, Value>>> {
            Ok(Vec::new())
        }

        fn is_readable(&self) -> bool {
            false
        }
    }

    /// HTTP stub that records calls and replays scripted responses.
    struct ScriptedHttp {
        responses: Mutex<Vec<Result<HttpResponse, HttpClientError>>>,
        calls: Mutex<Vec<(String, Map<String, Value>)>>,
    }

    impl ScriptedHttp {
        fn new(responses: Vec<Result<HttpResponse, HttpClientError>>) -> Arc<Self> {
            Arc::new(ScriptedHttp {
                responses: Mutex::new(responses),
                calls: Mutex::new(Vec::new()),
            })
        }

        fn ok(data: Value) -> Result<HttpResponse, HttpClientError> {
            Ok(HttpResponse { status: 200, data, headers: HashMap::new() })
        }

        fn call_count(&self) -> usize {
            self.calls.lock().unwrap().len()
        }

        fn last_params(&self) -> Map<String, Value> {
            self.calls.lock().unwrap().last().unwrap().1.clone()
        }
    }

    #[async_trait]
    impl HttpClientInfra for ScriptedHttp {
        async fn execute(
            &self,
            operation: &OperationDescriptor,
            params: &Map<String, Value>,
        ) -> Result<HttpResponse, HttpClientError> {
            self.calls
                .lock()
                .unwrap()
                .push((operation.operation_id.clone(), params.clone()));
            let mut responses = self.responses.lock().unwrap();
            if responses.is_empty() {
                return Ok(HttpResponse {
                    status: 200,
                    data: json!({"default": true}),
                    headers: HashMap::new(),
                });
            }
            responses.remove(0)
        }
    }

    fn backend(http: Arc<ScriptedHttp>) -> (LocalBackend, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let settings = CacheSettings::new(dir.path().join("cache.json"));
        let cache = Arc::new(ResponseCache::new(&settings, Arc::new(FixedClock(0))));
        let fast_path = Arc::new(FastPath::new(
            &LocalAppCacheSettings::new("/nonexistent/notion.db"),
            Arc::new(EmptyStore),
        ));
        let backend = LocalBackend::new(
            operation_catalog(),
            &ApiSettings::default().token("secret"),
            cache.clone(),
            true,
            fast_path,
            http,
        );
        (backend, dir)
    }

    #[tokio::test]
    async fn test_lists_only_allowlisted_operations() {
        let http = ScriptedHttp::new(Vec::new());
        let (fixture, _dir) = backend(http);

        let tools = fixture.list_tools();

        assert!(tools.iter().any(|tool| tool.name.as_str() == "retrieve-a-page"));
        assert!(tools.iter().all(|tool| tool.read_only_hint));
        assert!(!tools.iter().any(|tool| tool.name.as_str() == "patch-page"));
    }

    #[tokio::test]
    async fn test_unknown_tool_is_an_error_result() {
        let http = ScriptedHttp::new(Vec::new());
        let (fixture, _dir) = backend(http.clone());

        let actual = fixture.call_tool("no-such-tool", json!({})).await;

        assert_eq!(actual.is_error, true);
        assert!(actual.joined_text().contains("Unknown tool"));
        assert_eq!(http.call_count(), 0);
    }

    #[tokio::test]
    async fn test_write_operation_is_blocked() {
        let http = ScriptedHttp::new(Vec::new());
        let (fixture, _dir) = backend(http.clone());

        let actual = fixture.call_tool("patch-page", json!({"page_id": "x"})).await;

        assert_eq!(actual.is_error, true);
        assert!(actual.joined_text().contains(READ_ONLY_OPERATION_BLOCKED));
        assert_eq!(http.call_count(), 0);
    }

    #[tokio::test]
    async fn test_success_is_cached_and_replayed() {
        let http = ScriptedHttp::new(vec![ScriptedHttp::ok(json!({"object": "page", "id": "1"}))]);
        let (fixture, _dir) = backend(http.clone());
        let arguments = json!({"page_id": "aaaaaaaa-aaaa-aaaa-aaaa-aaaaaaaaaaaa"});

        let first = fixture.call_tool("retrieve-a-page", arguments.clone()).await;
        let second = fixture.call_tool("retrieve-a-page", arguments).await;

        assert_eq!(first.is_error, false);
        assert_eq!(first, second);
        assert_eq!(http.call_count(), 1);
    }

    #[tokio::test]
    async fn test_force_refresh_bypasses_cache_and_strips_the_field() {
        let http = ScriptedHttp::new(vec![
            ScriptedHttp::ok(json!({"revision": 1})),
            ScriptedHttp::ok(json!({"revision": 2})),
        ]);
        let (fixture, _dir) = backend(http.clone());
        let id = "aaaaaaaa-aaaa-aaaa-aaaa-aaaaaaaaaaaa";

        fixture
            .call_tool("retrieve-a-page", json!({"page_id": id}))
            .await;
        let refreshed = fixture
            .call_tool(
                "retrieve-a-page",
                json!({"page_id": id, FORCE_REFRESH_FIELD: true}),
            )
            .await;
        let cached = fixture
            .call_tool("retrieve-a-page", json!({"page_id": id}))
            .await;

        assert_eq!(http.call_count(), 2);
        assert_eq!(refreshed.single_text().unwrap(), r#"{"revision":2}"#);
        // The cache now holds the refreshed value under the same key.
        assert_eq!(cached.single_text().unwrap(), r#"{"revision":2}"#);
        // The control field never reaches the HTTP client.
        assert_eq!(http.last_params().contains_key(FORCE_REFRESH_FIELD), false);
    }

    #[tokio::test]
    async fn test_http_error_is_not_cached() {
        let http = ScriptedHttp::new(vec![
            Err(HttpClientError {
                message: "HTTP 404".to_string(),
                status: Some(404),
                data: json!({"code": "object_not_found"}),
                headers: HashMap::new(),
            }),
            ScriptedHttp::ok(json!({"recovered": true})),
        ]);
        let (fixture, _dir) = backend(http.clone());
        let arguments = json!({"page_id": "aaaaaaaa-aaaa-aaaa-aaaa-aaaaaaaaaaaa"});

        let failed = fixture.call_tool("retrieve-a-page", arguments.clone()).await;
        let recovered = fixture.call_tool("retrieve-a-page", arguments).await;

        assert_eq!(failed.is_error, true);
        assert!(failed.joined_text().contains("object_not_found"));
        assert_eq!(recovered.is_error, false);
        assert_eq!(http.call_count(), 2);
    }

    #[tokio::test]
    async fn test_rehydrates_over_serialized_arguments() {
        let http = ScriptedHttp::new(vec![ScriptedHttp::ok(json!({"results": []}))]);
        let (fixture, _dir) = backend(http.clone());

        fixture
            .call_tool(
                "post-search",
                json!({"filter": "{\"value\": \"page\", \"property\": \"object\"}"}),
            )
            .await;

        let actual = http.last_params();
        assert_eq!(
            actual.get("filter"),
            Some(&json!({"value": "page", "property": "object"}))
        );
    }

    #[test]
    fn test_truncated_alias_resolution() {
        let long_name = "a".repeat(70);
        let descriptor = OperationDescriptor {
            tool: ToolName::new(&long_name),
            operation_id: "get-long".to_string(),
            method: HttpMethod::Get,
            path: "/v1/long".to_string(),
            description: String::new(),
            input_schema: json!({"type": "object"}),
        };
        let dir = tempfile::tempdir().unwrap();
        let cache = Arc::new(ResponseCache::new(
            &CacheSettings::new(dir.path().join("cache.json")),
            Arc::new(FixedClock(0)),
        ));
        let fast_path = Arc::new(FastPath::new(
            &LocalAppCacheSettings::new("/nonexistent"),
            Arc::new(EmptyStore),
        ));
        let fixture = LocalBackend::new(
            vec![descriptor],
            &ApiSettings::default(),
            cache,
            true,
            fast_path,
            ScriptedHttp::new(Vec::new()),
        );

        let truncated = "a".repeat(MAX_TOOL_NAME_BYTES);
        let actual = fixture.find_tool_name(&truncated);

        assert_eq!(actual, Some(ToolName::new(&long_name)));
    }

    #[test]
    fn test_colliding_truncations_are_ambiguous() {
        let base = "b".repeat(MAX_TOOL_NAME_BYTES);
        let first = format!("{base}-one");
        let second = format!("{base}-two");
        let descriptor = |name: &str| OperationDescriptor {
            tool: ToolName::new(name),
            operation_id: name.to_string(),
            method: HttpMethod::Get,
            path: "/v1/x".to_string(),
            description: String::new(),
            input_schema: json!({"type": "object"}),
        };
        let dir = tempfile::tempdir().unwrap();
        let cache = Arc::new(ResponseCache::new(
            &CacheSettings::new(dir.path().join("cache.json")),
            Arc::new(FixedClock(0)),
        ));
        let fast_path = Arc::new(FastPath::new(
            &LocalAppCacheSettings::new("/nonexistent"),
            Arc::new(EmptyStore),
        ));
        let fixture = LocalBackend::new(
            vec![descriptor(&first), descriptor(&second)],
            &ApiSettings::default(),
            cache,
            true,
            fast_path,
            ScriptedHttp::new(Vec::new()),
        );

        let actual = fixture.find_tool_name(&base);

        assert_eq!(actual, None);
    }
}
