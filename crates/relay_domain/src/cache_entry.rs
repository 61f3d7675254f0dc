use serde::{Deserialize, Serialize};
use serde_json::Value;

/// On-disk format version. A file with any other version loads as empty.
pub const CACHE_FILE_VERSION: u32 = 1;

/// One cached response value with its bookkeeping timestamps (milliseconds
/// from the injected clock).
///
/// `created_at` is set on first insert only and survives overwrites;
/// `updated_at` moves on every overwrite and drives expiry; `accessed_at`
/// moves on every hit and drives eviction order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub value: Value,
    pub created_at: u64,
    pub updated_at: u64,
    pub accessed_at: u64,
}

impl CacheEntry {
    pub fn new(value: Value, now: u64) -> Self {
        CacheEntry { value, created_at: now, updated_at: now, accessed_at: now }
    }

    pub fn is_expired(&self, ttl_ms: u64, now: u64) -> bool {
        self.updated_at.saturating_add(ttl_ms) <= now
    }

    /// Eviction rank: least-recently-used first, with stable tie-breaks.
    pub fn eviction_rank(&self) -> (u64, u64, u64) {
        (self.accessed_at, self.updated_at, self.created_at)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedEntry {
    pub key: String,
    #[serde(flatten)]
    pub entry: CacheEntry,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheFile {
    pub version: u32,
    pub entries: Vec<PersistedEntry>,
}
