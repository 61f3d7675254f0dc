use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use anyhow::{anyhow, Context};
use relay_domain::{
    RemoteBackendSettings, ToolDefinition, ToolName, ToolResult, CONNECT_TIMEOUT,
    REAUTH_TIMEOUT, RECONNECT_TIMEOUT,
};
use serde_json::{json, Value};
use tokio::sync::Mutex;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::{BackendTransport, TokenCacheInfra, TransportFactory};

struct Connection {
    transport: Box<dyn BackendTransport>,
    tools: Vec<ToolDefinition>,
}

/// Supervisor of the subprocess-hosted backend.
///
/// Owns the transport lifecycle: bounded initial connect, serial RPCs, a
/// single reconnect-and-retry on call failure, and re-authentication that
/// clears the OAuth token cache before reconnecting under an extended
/// deadline.
pub struct RemoteBackend {
    factory: Arc<dyn TransportFactory>,
    token_cache: Arc<dyn TokenCacheInfra>,
    /// Held across every RPC: exactly one request is in flight at a time and
    /// reconnection is exclusive with calls.
    connection: Mutex<Option<Connection>>,
    remote_url: String,
    reconnects: AtomicU64,
}

impl RemoteBackend {
    pub fn new(
        settings: &RemoteBackendSettings,
        factory: Arc<dyn TransportFactory>,
        token_cache: Arc<dyn TokenCacheInfra>,
    ) -> Self {
        let remote_url = extract_remote_url(
            settings.command.as_deref().unwrap_or_default(),
            &settings.args,
            &settings.url,
        );
        RemoteBackend {
            factory,
            token_cache,
            connection: Mutex::new(None),
            remote_url,
            reconnects: AtomicU64::new(0),
        }
    }

    pub fn remote_url(&self) -> &str {
        &self.remote_url
    }

    /// How many times the transport has been rebuilt after a call failure.
    pub fn reconnect_count(&self) -> u64 {
        self.reconnects.load(Ordering::SeqCst)
    }

    /// Whether a usable OAuth token is already on disk for this remote.
    pub fn has_usable_tokens(&self) -> bool {
        self.token_cache.has_usable_tokens(&self.remote_url)
    }

    /// Initial connect: spawn, handshake and list tools, all bounded by the
    /// connect deadline. On failure the backend stays unconnected and the
    /// router degrades.
    pub async fn connect(&self) -> anyhow::Result<()> {
        let mut slot = self.connection.lock().await;
        let connection = timeout(CONNECT_TIMEOUT, Self::establish(&*self.factory))
            .await
            .map_err(|_| {
                anyhow!(
                    "Connecting to the remote backend timed out after {}s",
                    CONNECT_TIMEOUT.as_secs()
                )
            })??;
        info!(
            url = %self.remote_url,
            tool_count = connection.tools.len(),
            "Remote backend connected"
        );
        *slot = Some(connection);
        Ok(())
    }

    pub async fn is_connected(&self) -> bool {
        self.connection.lock().await.is_some()
    }

    pub async fn tools(&self) -> Vec<ToolDefinition> {
        self.connection
            .lock()
            .await
            .as_ref()
            .map(|connection| connection.tools.clone())
            .unwrap_or_default()
    }

    pub async fn has_tool(&self, name: &str) -> bool {
        self.connection
            .lock()
            .await
            .as_ref()
            .map(|connection| {
                connection
                    .tools
                    .iter()
                    .any(|tool| tool.name.as_str() == name)
            })
            .unwrap_or(false)
    }

    /// Forwards one call. Any child RPC failure triggers exactly one
    /// transport rebuild followed by exactly one retry of the original call;
    /// the retry's outcome is final.
    pub async fn call_tool(&self, name: &ToolName, arguments: Value) -> anyhow::Result<ToolResult> {
        let mut slot = self.connection.lock().await;
        let connection = slot
            .as_ref()
            .ok_or_else(|| anyhow!("Remote backend is not connected"))?;

        let original = match connection.transport.call_tool(name, arguments.clone()).await {
            Ok(result) => return Ok(result),
            Err(error) => error,
        };

        warn!(tool = %name, error = %original, "Remote call failed; rebuilding the transport");
        self.reconnects.fetch_add(1, Ordering::SeqCst);
        if let Some(broken) = slot.take() {
            broken.transport.close().await;
        }

        let rebuilt = timeout(RECONNECT_TIMEOUT, Self::establish(&*self.factory))
            .await
            .map_err(|_| {
                anyhow!(
                    "Remote call failed ({original}) and reconnecting timed out after {}s",
                    RECONNECT_TIMEOUT.as_secs()
                )
            })?
            .map_err(|reconnect_error| {
                anyhow!(
                    "Remote call failed ({original}) and reconnecting failed ({reconnect_error})"
                )
            })?;

        let result = rebuilt.transport.call_tool(name, arguments).await;
        *slot = Some(rebuilt);
        result
    }

    /// Drops the connection, clears every token-cache file for this remote's
    /// URL, then reconnects under the extended deadline so an interactive
    /// OAuth flow can complete. Returns the operation summary payload.
    pub async fn reauth(&self) -> anyhow::Result<Value> {
        let mut slot = self.connection.lock().await;
        if let Some(connection) = slot.take() {
            connection.transport.close().await;
        }

        let eviction = self
            .token_cache
            .evict_for_url(&self.remote_url)
            .context("Failed to clear the token cache")?;
        info!(
            url = %self.remote_url,
            deleted = eviction.deleted_files.len(),
            searched = eviction.searched_dirs.len(),
            "Token cache cleared; reconnecting for interactive sign-in"
        );

        let connection = timeout(REAUTH_TIMEOUT, Self::establish(&*self.factory))
            .await
            .map_err(|_| {
                anyhow!(
                    "Re-authentication timed out after {}s",
                    REAUTH_TIMEOUT.as_secs()
                )
            })??;
        *slot = Some(connection);

        Ok(json!({
            "status": "reauth_triggered",
            "deleted_files": eviction.deleted_files.len(),
            "searched_dirs": eviction.searched_dirs.len(),
            "message": "Token cache cleared and the remote backend reconnected. \
                        Complete the sign-in in your browser if one opened.",
        }))
    }

    pub async fn close(&self) {
        let mut slot = self.connection.lock().await;
        if let Some(connection) = slot.take() {
            connection.transport.close().await;
            debug!(url = %self.remote_url, "Remote backend closed");
        }
    }

    async fn establish(factory: &dyn TransportFactory) -> anyhow::Result<Connection> {
        let transport = factory.connect().await?;
        let tools = transport
            .list_tools()
            .await
            .context("Connected but listing tools failed")?;
        Ok(Connection { transport, tools })
    }
}

/// Derives the remote URL from the launch command line. `mcp-remote` run via
/// node takes the URL as its first script argument; run via npx it follows
/// the package name; anything else falls back to the configured URL.
pub fn extract_remote_url(command: &str, args: &[String], default_url: &str) -> String {
    match command {
        "node" if args.len() >= 2 => args[1].clone(),
        "npx" => args
            .iter()
            .position(|arg| arg == "mcp-remote")
            .and_then(|index| args.get(index + 1))
            .cloned()
            .unwrap_or_else(|| default_url.to_string()),
        _ => default_url.to_string(),
    }
}
