use std::path::{Path, PathBuf};

use md5::{Digest, Md5};
use relay_services::{TokenCacheInfra, TokenEviction};
use serde_json::Value;
use tracing::{debug, warn};

/// Token-cache files written by the OAuth bootstrap subprocess.
///
/// The layout is keyed by the MD5 hex of the remote URL and has grown
/// variants over time: a bare `<hash>/tokens.json` at the base, and
/// versioned `mcp-remote-<ver>/` directories holding `<hash>_tokens.json`,
/// `<hash>_client_info.json`, `<hash>_code_verifier.txt` or a nested
/// `<hash>/tokens.json`. Eviction walks every variant; files keyed by other
/// URLs are left alone. This store never writes token files, it only
/// inspects and unlinks them.
pub struct TokenCacheStore {
    base_dir: PathBuf,
}

impl TokenCacheStore {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        TokenCacheStore { base_dir: base_dir.into() }
    }

    fn candidate_files(&self, hash: &str) -> (Vec<PathBuf>, Vec<PathBuf>) {
        let mut searched = Vec::new();
        let mut candidates = Vec::new();

        // Oldest layout: tokens directly under <base>/<hash>/.
        let bare_dir = self.base_dir.join(hash);
        if bare_dir.is_dir() {
            searched.push(bare_dir.clone());
            candidates.push(bare_dir.join("tokens.json"));
        }

        let Ok(entries) = std::fs::read_dir(&self.base_dir) else {
            return (searched, candidates);
        };
        for entry in entries.flatten() {
            let dir = entry.path();
            let Some(name) = dir.file_name().and_then(|name| name.to_str()) else {
                continue;
            };
            if !dir.is_dir() || !name.starts_with("mcp-remote-") {
                continue;
            }
            searched.push(dir.clone());
            candidates.push(dir.join(format!("{hash}_tokens.json")));
            candidates.push(dir.join(format!("{hash}_client_info.json")));
            candidates.push(dir.join(format!("{hash}_code_verifier.txt")));
            candidates.push(dir.join(hash).join("tokens.json"));
        }

        (searched, candidates)
    }
}

impl TokenCacheInfra for TokenCacheStore {
    fn evict_for_url(&self, url: &str) -> anyhow::Result<TokenEviction> {
        let hash = url_hash(url);
        let (searched_dirs, candidates) = self.candidate_files(&hash);

        let mut deleted_files = Vec::new();
        for candidate in candidates {
            if !candidate.is_file() {
                continue;
            }
            match std::fs::remove_file(&candidate) {
                Ok(()) => {
                    debug!(path = %candidate.display(), "Deleted token-cache file");
                    deleted_files.push(candidate);
                }
                Err(error) => {
                    warn!(path = %candidate.display(), %error, "Failed to delete token-cache file");
                }
            }
        }

        Ok(TokenEviction { deleted_files, searched_dirs })
    }

    fn has_usable_tokens(&self, url: &str) -> bool {
        let hash = url_hash(url);
        let (_, candidates) = self.candidate_files(&hash);
        candidates
            .iter()
            .filter(|candidate| {
                candidate
                    .file_name()
                    .and_then(|name| name.to_str())
                    .is_some_and(|name| name.ends_with("tokens.json"))
            })
            .any(|candidate| is_usable_token_file(candidate))
    }
}

/// MD5 hex of the remote URL, matching the naming scheme of the OAuth
/// bootstrap tool.
pub fn url_hash(url: &str) -> String {
    let mut hasher = Md5::new();
    hasher.update(url.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// A token file is usable iff it parses as JSON and carries a non-empty
/// `access_token` string together with either a string `refresh_token` or a
/// numeric `expires_in`.
fn is_usable_token_file(path: &Path) -> bool {
    let Ok(text) = std::fs::read_to_string(path) else {
        return false;
    };
    let Ok(parsed) = serde_json::from_str::<Value>(&text) else {
        return false;
    };
    let access_token_present = parsed
        .get("access_token")
        .and_then(Value::as_str)
        .is_some_and(|token| !token.is_empty());
    let refreshable = parsed.get("refresh_token").is_some_and(Value::is_string)
        || parsed.get("expires_in").is_some_and(Value::is_number);
    access_token_present && refreshable
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    const URL: &str = "https://mcp.example.com/mcp";

    fn store(dir: &tempfile::TempDir) -> TokenCacheStore {
        TokenCacheStore::new(dir.path())
    }

    fn write(path: &Path, contents: &str) {
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, contents).unwrap();
    }

    #[test]
    fn test_url_hash_is_stable_md5_hex() {
        let actual = url_hash("hello");

        assert_eq!(actual, "5d41402abc4b2a76b9719d911017c592");
    }

    #[test]
    fn test_eviction_deletes_only_matching_files() {
        let dir = tempfile::tempdir().unwrap();
        let hash = url_hash(URL);
        let versioned = dir.path().join("mcp-remote-1.0");
        write(&versioned.join(format!("{hash}_tokens.json")), "{}");
        write(&versioned.join(format!("{hash}_client_info.json")), "{}");
        write(&versioned.join("other_tokens.json"), "{}");

        let actual = store(&dir).evict_for_url(URL).unwrap();

        assert_eq!(actual.deleted_files.len(), 2);
        assert_eq!(actual.searched_dirs.len(), 1);
        assert!(versioned.join("other_tokens.json").is_file());
    }

    #[test]
    fn test_eviction_covers_every_layout_variant() {
        let dir = tempfile::tempdir().unwrap();
        let hash = url_hash(URL);
        write(&dir.path().join(&hash).join("tokens.json"), "{}");
        let versioned = dir.path().join("mcp-remote-0.1.29");
        write(&versioned.join(format!("{hash}_tokens.json")), "{}");
        write(&versioned.join(format!("{hash}_code_verifier.txt")), "v");
        write(&versioned.join(&hash).join("tokens.json"), "{}");

        let actual = store(&dir).evict_for_url(URL).unwrap();

        assert_eq!(actual.deleted_files.len(), 4);
    }

    #[test]
    fn test_eviction_on_missing_base_is_empty() {
        let fixture = TokenCacheStore::new("/nonexistent/token-cache");

        let actual = fixture.evict_for_url(URL).unwrap();

        assert_eq!(actual, TokenEviction::default());
    }

    #[test]
    fn test_usable_tokens_require_refresh_material() {
        let dir = tempfile::tempdir().unwrap();
        let hash = url_hash(URL);
        let path = dir
            .path()
            .join("mcp-remote-1.0")
            .join(format!("{hash}_tokens.json"));

        write(&path, r#"{"access_token": "abc"}"#);
        assert_eq!(store(&dir).has_usable_tokens(URL), false);

        write(&path, r#"{"access_token": "abc", "refresh_token": "def"}"#);
        assert_eq!(store(&dir).has_usable_tokens(URL), true);

        write(&path, r#"{"access_token": "abc", "expires_in": 3600}"#);
        assert_eq!(store(&dir).has_usable_tokens(URL), true);

        write(&path, r#"{"access_token": "", "refresh_token": "def"}"#);
        assert_eq!(store(&dir).has_usable_tokens(URL), false);
    }

    #[test]
    fn test_usable_tokens_ignore_other_urls() {
        let dir = tempfile::tempdir().unwrap();
        let other_hash = url_hash("https://other.example.com");
        write(
            &dir.path()
                .join("mcp-remote-1.0")
                .join(format!("{other_hash}_tokens.json")),
            r#"{"access_token": "abc", "refresh_token": "def"}"#,
        );

        assert_eq!(store(&dir).has_usable_tokens(URL), false);
    }
}
