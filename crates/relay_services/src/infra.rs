use std::collections::HashMap;
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use relay_domain::{OperationDescriptor, ToolDefinition, ToolName, ToolResult};
use serde_json::{Map, Value};

/// A live connection to an MCP server. One instance maps to one child
/// process (or in-process wiring); the supervisor discards the whole
/// transport on failure and asks the factory for a new one.
#[async_trait]
pub trait BackendTransport: Send + Sync {
    async fn list_tools(&self) -> anyhow::Result<Vec<ToolDefinition>>;

    async fn call_tool(&self, name: &ToolName, arguments: Value) -> anyhow::Result<ToolResult>;

    /// Tears the connection down. Close failures are swallowed by
    /// implementations; the caller is usually already handling an error.
    async fn close(&self);
}

/// Builds transports from an immutable launch spec, so reconnection always
/// reproduces the original connection.
#[async_trait]
pub trait TransportFactory: Send + Sync {
    async fn connect(&self) -> anyhow::Result<Box<dyn BackendTransport>>;
}

/// Successful response from the upstream HTTP API.
#[derive(Debug, Clone, PartialEq)]
pub struct HttpResponse {
    pub status: u16,
    pub data: Value,
    pub headers: HashMap<String, String>,
}

/// Failed response (or transport failure) from the upstream HTTP API. The
/// payload mirrors what the remote sent so callers can surface it verbatim.
#[derive(Debug, thiserror::Error)]
#[error("{message}")]
pub struct HttpClientError {
    pub message: String,
    pub status: Option<u16>,
    pub data: Value,
    pub headers: HashMap<String, String>,
}

/// The HTTP client the local backend forwards to. Injected so tests can
/// observe and script upstream traffic.
#[async_trait]
pub trait HttpClientInfra: Send + Sync {
    async fn execute(
        &self,
        operation: &OperationDescriptor,
        params: &Map<String, Value>,
    ) -> Result<HttpResponse, HttpClientError>;
}

/// Read access to the third-party SQLite database behind the fast-path.
/// Rows come back in the same shape the `sqlite3 -json` shell prints: one
/// JSON object per row, keyed by column name.
#[async_trait]
pub trait LocalStoreInfra: Send + Sync {
    async fn query(
        &self,
        sql: &str,
        params: Vec<String>,
    ) -> anyhow::Result<Vec<Map<String, Value>>>;

    /// Whether the database file can currently be opened for reading.
    fn is_readable(&self) -> bool;
}

/// Outcome of clearing token-cache files for one remote URL.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TokenEviction {
    pub deleted_files: Vec<PathBuf>,
    pub searched_dirs: Vec<PathBuf>,
}

/// Filesystem side of re-authentication. Writes to the token cache belong to
/// the OAuth bootstrap subprocess; this interface only unlinks and inspects.
pub trait TokenCacheInfra: Send + Sync {
    /// Deletes every token-cache file whose name is keyed by the given URL.
    /// Files keyed by any other URL must be preserved.
    fn evict_for_url(&self, url: &str) -> anyhow::Result<TokenEviction>;

    /// True iff a parseable token file with a usable access token exists for
    /// the given URL.
    fn has_usable_tokens(&self, url: &str) -> bool;
}

/// Injectable time source for cache bookkeeping.
pub trait Clock: Send + Sync {
    fn now_ms(&self) -> u64;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_millis() as u64)
            .unwrap_or(0)
    }
}
