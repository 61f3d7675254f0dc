use std::collections::HashMap;
use std::path::PathBuf;

use relay_domain::{
    ApiSettings, CacheSettings, Error, LocalAppCacheSettings, RelaySettings,
    RemoteBackendSettings, DEFAULT_API_BASE_URL, DEFAULT_API_VERSION, DEFAULT_CACHE_MAX_ENTRIES,
    DEFAULT_CACHE_TTL_MS, DEFAULT_MAX_PAGE_SIZE, DEFAULT_REMOTE_URL,
};
use tracing::warn;

pub const CACHE_ENABLED: &str = "NOTION_RELAY_CACHE_ENABLED";
pub const CACHE_TTL_MS: &str = "NOTION_RELAY_CACHE_TTL_MS";
pub const CACHE_MAX_ENTRIES: &str = "NOTION_RELAY_CACHE_MAX_ENTRIES";
pub const CACHE_PATH: &str = "NOTION_RELAY_CACHE_PATH";
pub const LOCAL_APP_CACHE_ENABLED: &str = "NOTION_RELAY_LOCAL_APP_CACHE_ENABLED";
pub const LOCAL_APP_CACHE_TRUST_ENABLED: &str = "NOTION_RELAY_LOCAL_APP_CACHE_TRUST_ENABLED";
pub const LOCAL_APP_CACHE_DB_PATH: &str = "NOTION_RELAY_LOCAL_APP_CACHE_DB_PATH";
pub const LOCAL_APP_CACHE_MAX_PAGE_SIZE: &str = "NOTION_RELAY_LOCAL_APP_CACHE_MAX_PAGE_SIZE";
pub const TOKEN_CACHE_DIR: &str = "NOTION_RELAY_TOKEN_CACHE_DIR";
pub const ALLOW_NPX_FALLBACK: &str = "NOTION_RELAY_ALLOW_NPX_FALLBACK";
pub const REMOTE_COMMAND: &str = "NOTION_RELAY_REMOTE_COMMAND";
pub const REMOTE_ARGS: &str = "NOTION_RELAY_REMOTE_ARGS";
pub const REMOTE_URL: &str = "NOTION_RELAY_REMOTE_URL";
pub const API_BASE_URL: &str = "NOTION_RELAY_BASE_URL";
pub const API_TOKEN: &str = "NOTION_TOKEN";
pub const API_VERSION: &str = "NOTION_VERSION";

/// Resolves every recognized environment variable into settings.
///
/// Boolean-like and path-like values fall back to their defaults on invalid
/// input; the cache tuning knobs and a NUL byte in the cache path are
/// configuration mistakes worth failing loudly over, so those raise a
/// startup error naming the variable.
pub fn load_settings(env: &dyn EnvSource) -> Result<RelaySettings, Error> {
    let cache = CacheSettings::new(cache_path(env)?)
        .enabled(parse_bool(env, CACHE_ENABLED, true))
        .ttl_ms(parse_positive_u64(env, CACHE_TTL_MS, DEFAULT_CACHE_TTL_MS)?)
        .max_entries(parse_positive_u64(
            env,
            CACHE_MAX_ENTRIES,
            DEFAULT_CACHE_MAX_ENTRIES as u64,
        )? as usize);

    let local_app_cache = LocalAppCacheSettings::new(db_path(env))
        .enabled(parse_bool(env, LOCAL_APP_CACHE_ENABLED, false))
        .trust_enabled(parse_bool(env, LOCAL_APP_CACHE_TRUST_ENABLED, false))
        .max_page_size(parse_lenient_u32(
            env,
            LOCAL_APP_CACHE_MAX_PAGE_SIZE,
            DEFAULT_MAX_PAGE_SIZE,
        ));

    let api = ApiSettings {
        base_url: non_empty(env, API_BASE_URL).unwrap_or_else(|| DEFAULT_API_BASE_URL.to_string()),
        token: non_empty(env, API_TOKEN),
        version: non_empty(env, API_VERSION).unwrap_or_else(|| DEFAULT_API_VERSION.to_string()),
    };

    let remote = remote_settings(env);

    Ok(RelaySettings {
        cache,
        local_app_cache,
        remote,
        api,
        token_cache_dir: token_cache_dir(env),
    })
}

/// Process-environment access behind a seam so tests can script it.
pub trait EnvSource {
    fn var(&self, key: &str) -> Option<String>;
}

/// The real process environment.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessEnv;

impl EnvSource for ProcessEnv {
    fn var(&self, key: &str) -> Option<String> {
        std::env::var(key).ok()
    }
}

fn non_empty(env: &dyn EnvSource, key: &str) -> Option<String> {
    env.var(key).filter(|value| !value.trim().is_empty())
}

fn parse_bool(env: &dyn EnvSource, key: &str, default: bool) -> bool {
    let Some(value) = non_empty(env, key) else {
        return default;
    };
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => true,
        "0" | "false" | "no" | "off" => false,
        other => {
            warn!(variable = key, value = other, "Unrecognized boolean; using the default");
            default
        }
    }
}

fn parse_positive_u64(env: &dyn EnvSource, key: &str, default: u64) -> Result<u64, Error> {
    let Some(value) = non_empty(env, key) else {
        return Ok(default);
    };
    match value.trim().parse::<u64>() {
        Ok(parsed) if parsed > 0 => Ok(parsed),
        _ => Err(Error::InvalidEnvValue {
            variable: key.to_string(),
            reason: format!("{value:?} is not a positive integer"),
            accepted: "a positive decimal integer",
        }),
    }
}

fn parse_lenient_u32(env: &dyn EnvSource, key: &str, default: u32) -> u32 {
    let Some(value) = non_empty(env, key) else {
        return default;
    };
    match value.trim().parse::<u32>() {
        Ok(parsed) if parsed > 0 => parsed,
        _ => {
            warn!(variable = key, %value, "Unusable page size; using the default");
            default
        }
    }
}

fn cache_path(env: &dyn EnvSource) -> Result<PathBuf, Error> {
    match env.var(CACHE_PATH) {
        Some(value) if value.contains('\0') => Err(Error::InvalidEnvValue {
            variable: CACHE_PATH.to_string(),
            reason: "the path contains a NUL byte".to_string(),
            accepted: "a file path, or empty for the default location",
        }),
        Some(value) if !value.trim().is_empty() => Ok(PathBuf::from(value)),
        _ => Ok(default_cache_path()),
    }
}

fn default_cache_path() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("notion-relay")
        .join("response-cache.json")
}

fn db_path(env: &dyn EnvSource) -> PathBuf {
    non_empty(env, LOCAL_APP_CACHE_DB_PATH)
        .map(PathBuf::from)
        .unwrap_or_else(default_db_path)
}

/// Where the desktop app keeps its database on each platform.
fn default_db_path() -> PathBuf {
    #[cfg(target_os = "macos")]
    {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("Library/Application Support/Notion/notion.db")
    }
    #[cfg(not(target_os = "macos"))]
    {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("Notion")
            .join("notion.db")
    }
}

fn token_cache_dir(env: &dyn EnvSource) -> PathBuf {
    non_empty(env, TOKEN_CACHE_DIR)
        .map(PathBuf::from)
        .unwrap_or_else(|| {
            dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(".mcp-auth")
        })
}

fn remote_settings(env: &dyn EnvSource) -> RemoteBackendSettings {
    let url = non_empty(env, REMOTE_URL).unwrap_or_else(|| DEFAULT_REMOTE_URL.to_string());
    let allow_npx_fallback = parse_bool(env, ALLOW_NPX_FALLBACK, false);

    let mut settings = RemoteBackendSettings::default()
        .url(url.clone())
        .allow_npx_fallback(allow_npx_fallback);

    if let Some(command) = non_empty(env, REMOTE_COMMAND) {
        settings.command = Some(command);
        settings.args = non_empty(env, REMOTE_ARGS)
            .map(|args| args.split_whitespace().map(String::from).collect())
            .unwrap_or_default();
    } else if allow_npx_fallback {
        settings.command = Some("npx".to_string());
        settings.args = vec!["-y".to_string(), "mcp-remote".to_string(), url];
    } else {
        warn!(
            "No remote launcher configured and the npx fallback is disabled; \
             the hosted backend will be unavailable"
        );
    }

    // Keep the OAuth helper's token files under our configured directory.
    settings.env = HashMap::from([(
        "MCP_REMOTE_CONFIG_DIR".to_string(),
        token_cache_dir(env).to_string_lossy().into_owned(),
    )]);

    settings
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    struct MapEnv(HashMap<String, String>);

    impl MapEnv {
        fn new(pairs: &[(&str, &str)]) -> Self {
            MapEnv(
                pairs
                    .iter()
                    .map(|(key, value)| (key.to_string(), value.to_string()))
                    .collect(),
            )
        }
    }

    impl EnvSource for MapEnv {
        fn var(&self, key: &str) -> Option<String> {
            self.0.get(key).cloned()
        }
    }

    #[test]
    fn test_defaults_with_empty_environment() {
        let actual = load_settings(&MapEnv::new(&[])).unwrap();

        assert_eq!(actual.cache.enabled, true);
        assert_eq!(actual.cache.ttl_ms, DEFAULT_CACHE_TTL_MS);
        assert_eq!(actual.cache.max_entries, DEFAULT_CACHE_MAX_ENTRIES);
        assert_eq!(actual.local_app_cache.is_active(), false);
        assert_eq!(actual.remote.command, None);
        assert_eq!(actual.api.version, DEFAULT_API_VERSION);
    }

    #[test]
    fn test_invalid_ttl_is_a_startup_error() {
        let env = MapEnv::new(&[(CACHE_TTL_MS, "soon")]);

        let error = load_settings(&env).unwrap_err().to_string();

        assert!(error.contains(CACHE_TTL_MS));
        assert!(error.contains("positive"));
    }

    #[test]
    fn test_zero_max_entries_is_a_startup_error() {
        let env = MapEnv::new(&[(CACHE_MAX_ENTRIES, "0")]);

        let error = load_settings(&env).unwrap_err().to_string();

        assert!(error.contains(CACHE_MAX_ENTRIES));
    }

    #[test]
    fn test_nul_byte_in_cache_path_is_a_startup_error() {
        let env = MapEnv::new(&[(CACHE_PATH, "bad\0path")]);

        let error = load_settings(&env).unwrap_err().to_string();

        assert!(error.contains(CACHE_PATH));
    }

    #[test]
    fn test_empty_cache_path_uses_the_default() {
        let env = MapEnv::new(&[(CACHE_PATH, "")]);

        let actual = load_settings(&env).unwrap();

        assert_eq!(actual.cache.path, default_cache_path());
    }

    #[test]
    fn test_invalid_booleans_fall_back() {
        let env = MapEnv::new(&[
            (CACHE_ENABLED, "maybe"),
            (LOCAL_APP_CACHE_ENABLED, "definitely"),
        ]);

        let actual = load_settings(&env).unwrap();

        assert_eq!(actual.cache.enabled, true);
        assert_eq!(actual.local_app_cache.enabled, false);
    }

    #[test]
    fn test_invalid_page_size_falls_back() {
        let env = MapEnv::new(&[(LOCAL_APP_CACHE_MAX_PAGE_SIZE, "-3")]);

        let actual = load_settings(&env).unwrap();

        assert_eq!(actual.local_app_cache.max_page_size, DEFAULT_MAX_PAGE_SIZE);
    }

    #[test]
    fn test_npx_fallback_builds_the_launcher() {
        let env = MapEnv::new(&[(ALLOW_NPX_FALLBACK, "true")]);

        let actual = load_settings(&env).unwrap();

        assert_eq!(actual.remote.command.as_deref(), Some("npx"));
        assert_eq!(
            actual.remote.args,
            vec!["-y", "mcp-remote", DEFAULT_REMOTE_URL]
        );
    }

    #[test]
    fn test_explicit_command_wins_over_npx() {
        let env = MapEnv::new(&[
            (ALLOW_NPX_FALLBACK, "true"),
            (REMOTE_COMMAND, "node"),
            (REMOTE_ARGS, "/opt/mcp-remote/index.js https://mcp.example.com/mcp"),
        ]);

        let actual = load_settings(&env).unwrap();

        assert_eq!(actual.remote.command.as_deref(), Some("node"));
        assert_eq!(
            actual.remote.args,
            vec!["/opt/mcp-remote/index.js", "https://mcp.example.com/mcp"]
        );
    }

    #[test]
    fn test_token_cache_dir_reaches_the_oauth_helper() {
        let env = MapEnv::new(&[(TOKEN_CACHE_DIR, "/tmp/relay-auth")]);

        let actual = load_settings(&env).unwrap();

        assert_eq!(actual.token_cache_dir, PathBuf::from("/tmp/relay-auth"));
        assert_eq!(
            actual.remote.env.get("MCP_REMOTE_CONFIG_DIR").map(String::as_str),
            Some("/tmp/relay-auth")
        );
    }
}
