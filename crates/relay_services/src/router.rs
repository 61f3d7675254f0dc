use std::collections::HashMap;
use std::sync::Arc;

use relay_domain::{
    extract_uuid_like, is_boostable_tool, is_plain_read_tool, normalize_tool_name, normalize_uuid,
    RouteEntry, RouteMode, RouteTable, ToolDefinition, ToolName, ToolResult,
};
use serde_json::{json, Value};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::{LocalBackend, RemoteBackend, ResponseCache};

/// Operational meta tool that triggers re-authentication of the remote
/// backend.
pub const REAUTH_TOOL: &str = "reauth";
/// Operational meta tool that drops every response-cache entry.
pub const CLEAR_CACHE_TOOL: &str = "clear-cache";

/// Error-message fragments that suggest an expired or rejected credential.
const AUTH_ERROR_MARKERS: &[&str] = &[
    "401",
    "unauthorized",
    "token expired",
    "token invalid",
    "authentication",
];

const AUTH_HINT: &str = "Token may be expired; call the reauth tool to sign in again.";

/// Fast-backend probes tried, in order, when boosting a remote `fetch`.
const FETCH_PROBES: &[(&str, &str)] = &[
    ("retrieve-a-page", "page_id"),
    ("retrieve-a-database", "database_id"),
    ("retrieve-a-data-source", "data_source_id"),
    ("retrieve-a-block", "block_id"),
    ("retrieve-a-comment", "block_id"),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouterState {
    Init,
    Connecting,
    /// Both backends connected.
    Ready,
    /// Only the local backend is up; exposure is restricted to read-looking
    /// tools.
    DegradedReadOnly,
    /// Neither backend connected; the server cannot start.
    Dead,
}

/// Merges the two backend tool surfaces into one MCP server surface and
/// services calls according to a per-tool route plan.
pub struct Router {
    local: Arc<LocalBackend>,
    remote: Option<Arc<RemoteBackend>>,
    cache: Arc<ResponseCache>,
    state: RwLock<RouterState>,
    routes: RwLock<RouteTable>,
    remote_tools: RwLock<Vec<ToolDefinition>>,
}

impl Router {
    pub fn new(
        local: Arc<LocalBackend>,
        remote: Option<Arc<RemoteBackend>>,
        cache: Arc<ResponseCache>,
    ) -> Self {
        Router {
            local,
            remote,
            cache,
            state: RwLock::new(RouterState::Init),
            routes: RwLock::new(HashMap::new()),
            remote_tools: RwLock::new(Vec::new()),
        }
    }

    pub async fn state(&self) -> RouterState {
        *self.state.read().await
    }

    /// Connects both backends concurrently, settles both outcomes, then
    /// builds the route table. Fails only when no backend at all is
    /// reachable.
    pub async fn start(&self) -> anyhow::Result<()> {
        *self.state.write().await = RouterState::Connecting;

        let remote_connect = async {
            match &self.remote {
                Some(remote) => remote.connect().await.map_err(Some),
                None => Err(None),
            }
        };
        let (local_result, remote_result) = futures::join!(self.local.connect(), remote_connect);

        let next_state = match (&local_result, &remote_result) {
            (_, Ok(())) => RouterState::Ready,
            (Ok(()), Err(remote_error)) => {
                match remote_error {
                    Some(error) => warn!(
                        %error,
                        "Remote backend unavailable; continuing in degraded read-only mode"
                    ),
                    None => warn!(
                        "No remote backend configured; continuing in degraded read-only mode"
                    ),
                }
                RouterState::DegradedReadOnly
            }
            (Err(local_error), Err(_)) => {
                warn!(error = %local_error, "Local backend failed to initialize");
                RouterState::Dead
            }
        };

        *self.state.write().await = next_state;
        if next_state == RouterState::Dead {
            anyhow::bail!(relay_domain::Error::NoBackendAvailable);
        }
        self.rebuild_routes().await;
        Ok(())
    }

    /// Rebuilds the route table from the currently discovered tool surfaces.
    /// Runs after connect and again after every successful reauth.
    pub async fn rebuild_routes(&self) {
        let remote_tools = match &self.remote {
            Some(remote) => remote.tools().await,
            None => Vec::new(),
        };
        let remote_connected = match &self.remote {
            Some(remote) => remote.is_connected().await,
            None => false,
        };

        let mut table: RouteTable = HashMap::new();

        if remote_connected {
            for tool in &remote_tools {
                let name = tool.name.as_str();
                let local_has_same_name = self.local.has_tool(name);
                let mode = if local_has_same_name {
                    if is_plain_read_tool(name) {
                        RouteMode::FastThenOfficialSameName
                    } else {
                        RouteMode::Official
                    }
                } else if is_boostable_tool(name) {
                    RouteMode::OfficialWithFastBoost
                } else {
                    RouteMode::Official
                };
                table.insert(
                    tool.name.clone(),
                    RouteEntry { mode, tool_name: tool.name.clone() },
                );
            }
        } else {
            for tool in self.local.list_tools() {
                let name = tool.name.as_str();
                if is_plain_read_tool(name) {
                    table.insert(
                        tool.name.clone(),
                        RouteEntry { mode: RouteMode::FastOnly, tool_name: tool.name.clone() },
                    );
                }
            }
        }

        debug!(route_count = table.len(), "Route table rebuilt");
        *self.remote_tools.write().await = remote_tools;
        *self.routes.write().await = table;
    }

    /// The merged tool surface: routed tools plus the operational meta
    /// tools.
    pub async fn list_tools(&self) -> Vec<ToolDefinition> {
        let routes = self.routes.read().await;
        let remote_tools = self.remote_tools.read().await;

        let mut tools: Vec<ToolDefinition> = Vec::new();
        for tool in remote_tools.iter() {
            if routes.contains_key(&tool.name) {
                tools.push(tool.clone());
            }
        }
        for tool in self.local.list_tools() {
            if routes.contains_key(&tool.name) && !tools.iter().any(|seen| seen.name == tool.name) {
                tools.push(tool.clone());
            }
        }
        tools.sort_by(|a, b| a.name.cmp(&b.name));

        tools.push(
            ToolDefinition::new(REAUTH_TOOL)
                .description(
                    "Clear cached OAuth tokens for the hosted backend and reconnect, allowing an \
                     interactive sign-in",
                )
                .input_schema(json!({"type": "object", "properties": {}})),
        );
        tools.push(
            ToolDefinition::new(CLEAR_CACHE_TOOL)
                .description("Drop every entry from the response cache")
                .input_schema(json!({"type": "object", "properties": {}}))
                .read_only_hint(false),
        );
        tools
    }

    /// Services one tool call. The route table is sampled once on entry and
    /// used for the whole call.
    pub async fn call_tool(&self, name: &str, arguments: Value) -> ToolResult {
        match name {
            REAUTH_TOOL => return self.reauth().await,
            CLEAR_CACHE_TOOL => {
                let dropped = self.cache.clear();
                info!(dropped, "Response cache cleared by request");
                return ToolResult::text(json!({"status": "ok", "dropped": dropped}).to_string());
            }
            _ => {}
        }

        let route = { self.routes.read().await.get(&ToolName::new(name)).cloned() };
        let Some(route) = route else {
            return ToolResult::error(format!("Unknown tool: {name}"));
        };

        match route.mode {
            RouteMode::Official => self.call_official(&route.tool_name, arguments).await,
            RouteMode::FastOnly => self.local.call_tool(route.tool_name.as_str(), arguments).await,
            RouteMode::OfficialWithFastBoost => {
                if let Some(boosted) = self.try_boost(route.tool_name.as_str(), &arguments).await {
                    return boosted;
                }
                self.call_official(&route.tool_name, arguments).await
            }
            RouteMode::FastThenOfficialSameName => {
                let fast = self
                    .local
                    .call_tool(route.tool_name.as_str(), arguments.clone())
                    .await;
                if !fast.is_error && !fast.is_empty_read() {
                    return fast;
                }
                debug!(tool = %route.tool_name, "Fast result unusable; falling back to remote");
                self.call_official(&route.tool_name, arguments).await
            }
        }
    }

    async fn call_official(&self, name: &ToolName, arguments: Value) -> ToolResult {
        let Some(remote) = &self.remote else {
            return ToolResult::error(format!("{name} requires the remote backend, which is unavailable"));
        };
        match remote.call_tool(name, arguments).await {
            Ok(result) => result,
            Err(error) => ToolResult::error(with_auth_hint(error.to_string())),
        }
    }

    /// Attempts a local equivalent of a remote-only read. Returns a result
    /// only when the boost produced a usable (non-error, non-empty) answer.
    async fn try_boost(&self, name: &str, arguments: &Value) -> Option<ToolResult> {
        let args = arguments.as_object().cloned().unwrap_or_default();

        match normalize_tool_name(name).as_str() {
            "search" => {
                self.usable_fast_result("post-search", Value::Object(args))
                    .await
            }
            "get-users" => {
                let user_id = args.get("user_id").and_then(Value::as_str).unwrap_or("");
                if user_id.is_empty() {
                    self.usable_fast_result("get-users", Value::Object(args))
                        .await
                } else {
                    self.usable_fast_result("get-user", json!({"user_id": user_id}))
                        .await
                }
            }
            "fetch" => {
                // Boost only the plain lookup shape: exactly one `id`
                // argument from which a UUID can be derived.
                if args.len() != 1 {
                    return None;
                }
                let id = args.get("id").and_then(Value::as_str)?;
                let source = id.strip_prefix("collection://").unwrap_or(id);
                let uuid = normalize_uuid(&extract_uuid_like(source))?;

                for (tool, param) in FETCH_PROBES {
                    let mut probe_args = serde_json::Map::new();
                    probe_args.insert((*param).to_string(), Value::String(uuid.clone()));
                    let probe = self
                        .usable_fast_result(tool, Value::Object(probe_args))
                        .await;
                    if probe.is_some() {
                        return probe;
                    }
                }
                None
            }
            _ => None,
        }
    }

    async fn usable_fast_result(&self, tool: &str, arguments: Value) -> Option<ToolResult> {
        if !self.local.has_tool(tool) {
            return None;
        }
        let result = self.local.call_tool(tool, arguments).await;
        if result.is_error || result.is_empty_read() {
            return None;
        }
        Some(result)
    }

    async fn reauth(&self) -> ToolResult {
        let Some(remote) = &self.remote else {
            return ToolResult::error("No remote backend is configured; nothing to re-authenticate");
        };
        match remote.reauth().await {
            Ok(summary) => {
                *self.state.write().await = RouterState::Ready;
                self.rebuild_routes().await;
                ToolResult::text(summary.to_string())
            }
            Err(error) => ToolResult::error(with_auth_hint(error.to_string())),
        }
    }

    /// Tears both backends down; called on shutdown signals.
    pub async fn shutdown(&self) {
        if let Some(remote) = &self.remote {
            remote.close().await;
        }
        if let Err(error) = self.cache.save() {
            warn!(%error, "Failed to persist the response cache during shutdown");
        }
        info!("Router shut down");
    }

    #[cfg(test)]
    pub(crate) async fn routes_snapshot(&self) -> RouteTable {
        self.routes.read().await.clone()
    }
}

fn with_auth_hint(message: String) -> String {
    let lowered = message.to_lowercase();
    if AUTH_ERROR_MARKERS
        .iter()
        .any(|marker| lowered.contains(marker))
    {
        format!("{message}\n{AUTH_HINT}")
    } else {
        message
    }
}
