use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use derive_setters::Setters;

pub const DEFAULT_CACHE_TTL_MS: u64 = 30_000;
pub const DEFAULT_CACHE_MAX_ENTRIES: usize = 300;
pub const DEFAULT_MAX_PAGE_SIZE: u32 = 100;
pub const DEFAULT_REMOTE_URL: &str = "https://mcp.notion.com/mcp";
pub const DEFAULT_API_BASE_URL: &str = "https://api.notion.com";
pub const DEFAULT_API_VERSION: &str = "2022-06-28";

pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
pub const RECONNECT_TIMEOUT: Duration = Duration::from_secs(10);
pub const REAUTH_TIMEOUT: Duration = Duration::from_secs(120);

/// Response-cache configuration.
#[derive(Debug, Clone, PartialEq, Setters)]
#[setters(into)]
pub struct CacheSettings {
    pub enabled: bool,
    pub ttl_ms: u64,
    pub max_entries: usize,
    pub path: PathBuf,
}

impl CacheSettings {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        CacheSettings {
            enabled: true,
            ttl_ms: DEFAULT_CACHE_TTL_MS,
            max_entries: DEFAULT_CACHE_MAX_ENTRIES,
            path: path.into(),
        }
    }
}

/// SQLite fast-path configuration. The fast-path is active only when both
/// `enabled` and `trust_enabled` hold.
#[derive(Debug, Clone, PartialEq, Setters)]
#[setters(into)]
pub struct LocalAppCacheSettings {
    pub enabled: bool,
    pub trust_enabled: bool,
    pub db_path: PathBuf,
    pub max_page_size: u32,
}

impl LocalAppCacheSettings {
    pub fn new(db_path: impl Into<PathBuf>) -> Self {
        LocalAppCacheSettings {
            enabled: false,
            trust_enabled: false,
            db_path: db_path.into(),
            max_page_size: DEFAULT_MAX_PAGE_SIZE,
        }
    }

    pub fn is_active(&self) -> bool {
        self.enabled && self.trust_enabled
    }
}

/// Launch spec for the remote-subprocess backend. `command` is `None` when no
/// launcher is configured and the npx fallback is not permitted; the router
/// then starts degraded.
#[derive(Debug, Clone, PartialEq, Setters)]
#[setters(into, strip_option)]
pub struct RemoteBackendSettings {
    pub command: Option<String>,
    pub args: Vec<String>,
    pub env: HashMap<String, String>,
    pub cwd: Option<PathBuf>,
    pub url: String,
    pub allow_npx_fallback: bool,
}

impl Default for RemoteBackendSettings {
    fn default() -> Self {
        RemoteBackendSettings {
            command: None,
            args: Vec::new(),
            env: HashMap::new(),
            cwd: None,
            url: DEFAULT_REMOTE_URL.to_string(),
            allow_npx_fallback: false,
        }
    }
}

/// Credentials and addressing for the upstream HTTP API.
#[derive(Debug, Clone, PartialEq, Setters)]
#[setters(into, strip_option)]
pub struct ApiSettings {
    pub base_url: String,
    pub token: Option<String>,
    pub version: String,
}

impl Default for ApiSettings {
    fn default() -> Self {
        ApiSettings {
            base_url: DEFAULT_API_BASE_URL.to_string(),
            token: None,
            version: DEFAULT_API_VERSION.to_string(),
        }
    }
}

impl ApiSettings {
    /// The Authorization header value forwarded verbatim, when a token is
    /// configured.
    pub fn authorization(&self) -> Option<String> {
        self.token
            .as_deref()
            .map(|token| format!("Bearer {token}"))
    }
}

/// Everything the process reads from its environment, resolved once at
/// startup.
#[derive(Debug, Clone, PartialEq, Setters)]
#[setters(into)]
pub struct RelaySettings {
    pub cache: CacheSettings,
    pub local_app_cache: LocalAppCacheSettings,
    pub remote: RemoteBackendSettings,
    pub api: ApiSettings,
    pub token_cache_dir: PathBuf,
}
