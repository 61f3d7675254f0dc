use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::Context;
use relay_domain::{CacheEntry, CacheFile, CacheSettings, PersistedEntry, CACHE_FILE_VERSION};
use serde_json::Value;
use tracing::{debug, warn};

use crate::Clock;

/// Bounded TTL + LRU map from cache key to response value, with atomic
/// on-disk persistence.
///
/// All map mutations happen under one lock and never suspend; file I/O runs
/// outside the lock on a snapshot.
pub struct ResponseCache {
    entries: Mutex<HashMap<String, CacheEntry>>,
    ttl_ms: u64,
    max_entries: usize,
    path: PathBuf,
    clock: Arc<dyn Clock>,
}

impl ResponseCache {
    pub fn new(settings: &CacheSettings, clock: Arc<dyn Clock>) -> Self {
        ResponseCache {
            entries: Mutex::new(HashMap::new()),
            ttl_ms: settings.ttl_ms.max(1),
            max_entries: settings.max_entries.max(1),
            path: settings.path.clone(),
            clock,
        }
    }

    /// Returns the cached value when present and fresh. An expired entry
    /// observed here is removed before the miss is reported; a hit refreshes
    /// the access time.
    pub fn get(&self, key: &str) -> Option<Value> {
        let now = self.clock.now_ms();
        let mut entries = self.entries.lock().expect("cache lock poisoned");
        match entries.get_mut(key) {
            Some(entry) if entry.is_expired(self.ttl_ms, now) => {
                entries.remove(key);
                None
            }
            Some(entry) => {
                entry.accessed_at = now;
                Some(entry.value.clone())
            }
            None => None,
        }
    }

    /// Inserts or overwrites a value. Overwrites keep the original
    /// `created_at`. Afterwards expired entries are pruned and, if the map is
    /// still over capacity, the least-recently-used entries are evicted.
    pub fn set(&self, key: &str, value: Value) {
        let now = self.clock.now_ms();
        let mut entries = self.entries.lock().expect("cache lock poisoned");
        match entries.get_mut(key) {
            Some(entry) => {
                entry.value = value;
                entry.updated_at = now;
                entry.accessed_at = now;
            }
            None => {
                entries.insert(key.to_string(), CacheEntry::new(value, now));
            }
        }
        Self::prune(&mut entries, self.ttl_ms, self.max_entries, now);
    }

    pub fn delete(&self, key: &str) -> bool {
        self.entries
            .lock()
            .expect("cache lock poisoned")
            .remove(key)
            .is_some()
    }

    /// Drops every entry and reports how many were held.
    pub fn clear(&self) -> usize {
        let mut entries = self.entries.lock().expect("cache lock poisoned");
        let dropped = entries.len();
        entries.clear();
        dropped
    }

    pub fn len(&self) -> usize {
        self.entries.lock().expect("cache lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Loads the persisted cache. A missing file is a normal cold start; a
    /// malformed file or a version mismatch resets to empty without
    /// surfacing an error.
    pub fn load(&self) {
        let text = match std::fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(_) => return,
        };
        let file: CacheFile = match serde_json::from_str(&text) {
            Ok(file) => file,
            Err(error) => {
                warn!(path = %self.path.display(), %error, "Discarding unreadable response cache file");
                return;
            }
        };
        if file.version != CACHE_FILE_VERSION {
            warn!(
                path = %self.path.display(),
                version = file.version,
                "Discarding response cache file with unknown version"
            );
            return;
        }

        let now = self.clock.now_ms();
        let mut entries = self.entries.lock().expect("cache lock poisoned");
        for persisted in file.entries {
            entries.insert(persisted.key, persisted.entry);
        }
        Self::prune(&mut entries, self.ttl_ms, self.max_entries, now);
        debug!(count = entries.len(), "Loaded response cache");
    }

    /// Persists the live entries: prune, snapshot, then write to a temp file
    /// next to the target and rename over it. The file ends up mode 0600 in
    /// a 0700 directory.
    pub fn save(&self) -> anyhow::Result<()> {
        let now = self.clock.now_ms();
        let snapshot = {
            let mut entries = self.entries.lock().expect("cache lock poisoned");
            Self::prune(&mut entries, self.ttl_ms, self.max_entries, now);
            let mut persisted: Vec<PersistedEntry> = entries
                .iter()
                .map(|(key, entry)| PersistedEntry { key: key.clone(), entry: entry.clone() })
                .collect();
            persisted.sort_by(|a, b| a.key.cmp(&b.key));
            persisted
        };

        let file = CacheFile { version: CACHE_FILE_VERSION, entries: snapshot };
        let payload = serde_json::to_string(&file)?;

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create cache directory {}", parent.display()))?;
            set_mode(parent, 0o700);
        }

        let temp = temp_path(&self.path);
        std::fs::write(&temp, payload)
            .with_context(|| format!("Failed to write cache file {}", temp.display()))?;
        std::fs::rename(&temp, &self.path)
            .with_context(|| format!("Failed to move cache file into {}", self.path.display()))?;
        set_mode(&self.path, 0o600);
        Ok(())
    }

    /// Persists in the background; failures are logged, never surfaced.
    pub fn spawn_save(self: &Arc<Self>) {
        let cache = Arc::clone(self);
        tokio::task::spawn_blocking(move || {
            if let Err(error) = cache.save() {
                warn!(%error, "Background response cache persistence failed");
            }
        });
    }

    fn prune(entries: &mut HashMap<String, CacheEntry>, ttl_ms: u64, max_entries: usize, now: u64) {
        entries.retain(|_, entry| !entry.is_expired(ttl_ms, now));

        while entries.len() > max_entries {
            let Some(victim) = entries
                .iter()
                .min_by_key(|(key, entry)| (entry.eviction_rank(), (*key).clone()))
                .map(|(key, _)| key.clone())
            else {
                break;
            };
            entries.remove(&victim);
        }
    }
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(format!(".{}.tmp", std::process::id()));
    PathBuf::from(name)
}

#[cfg(unix)]
fn set_mode(path: &Path, mode: u32) {
    use std::os::unix::fs::PermissionsExt;
    if let Err(error) = std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode)) {
        warn!(path = %path.display(), %error, "Failed to restrict cache file permissions");
    }
}

#[cfg(not(unix))]
fn set_mode(_path: &Path, _mode: u32) {}
