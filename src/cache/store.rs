// TTL-bearing response cache
//
// Entries are keyed by (tenant, definition, version, fingerprint), so traffic
// served by different versions never evicts each other. Expiry is lazy:
// `get` treats an expired entry as absent and drops it. `purge_expired`
// is an optional sweep for long-running processes.

use anyhow::Result;
use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;
use std::time::Duration;
use tokio::time::Instant;

/// Longest lifetime of a cache entry; larger TTLs are clamped.
pub const MAX_CACHE_TTL: Duration = Duration::from_secs(365 * 24 * 60 * 60);

/// A cached structured output.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    pub data: Value,
    /// Version string of the configuration that produced `data`
    pub version: String,
    pub expires_at: Instant,
}

impl CacheEntry {
    pub fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

/// Storage behind the response cache.
///
/// `set` is an upsert: concurrent writers for one fingerprint resolve to
/// last-writer-wins.
#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn get(
        &self,
        tenant_id: &str,
        definition_id: &str,
        version: &str,
        fingerprint: &str,
    ) -> Result<Option<CacheEntry>>;

    async fn set(
        &self,
        tenant_id: &str,
        definition_id: &str,
        fingerprint: &str,
        data: Value,
        version: &str,
        ttl: Duration,
    ) -> Result<()>;

    /// Remove every entry for a definition. Returns the number removed.
    async fn invalidate(&self, tenant_id: &str, definition_id: &str) -> Result<usize>;

    /// Drop expired entries. Stores with native expiry can keep the default.
    async fn purge_expired(&self) -> Result<usize> {
        Ok(0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CacheKey {
    tenant_id: String,
    definition_id: String,
    version: String,
    fingerprint: String,
}

/// Process-local cache backed by a sharded concurrent map.
#[derive(Default)]
pub struct MemoryCacheStore {
    entries: DashMap<CacheKey, CacheEntry>,
}

impl MemoryCacheStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored entries, expired ones included.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl CacheStore for MemoryCacheStore {
    async fn get(
        &self,
        tenant_id: &str,
        definition_id: &str,
        version: &str,
        fingerprint: &str,
    ) -> Result<Option<CacheEntry>> {
        let key = CacheKey {
            tenant_id: tenant_id.to_string(),
            definition_id: definition_id.to_string(),
            version: version.to_string(),
            fingerprint: fingerprint.to_string(),
        };
        let now = Instant::now();

        let hit = match self.entries.get(&key) {
            Some(entry) if !entry.is_expired(now) => Some(entry.value().clone()),
            Some(_) => None,
            None => return Ok(None),
        };

        if hit.is_none() {
            // Only remove if still expired; a concurrent set may have replaced it.
            self.entries.remove_if(&key, |_, entry| entry.is_expired(now));
        }
        Ok(hit)
    }

    async fn set(
        &self,
        tenant_id: &str,
        definition_id: &str,
        fingerprint: &str,
        data: Value,
        version: &str,
        ttl: Duration,
    ) -> Result<()> {
        if ttl.is_zero() {
            return Ok(());
        }
        let key = CacheKey {
            tenant_id: tenant_id.to_string(),
            definition_id: definition_id.to_string(),
            version: version.to_string(),
            fingerprint: fingerprint.to_string(),
        };
        let Some(expires_at) = Instant::now().checked_add(ttl.min(MAX_CACHE_TTL)) else {
            return Ok(());
        };
        self.entries.insert(
            key,
            CacheEntry {
                data,
                version: version.to_string(),
                expires_at,
            },
        );
        Ok(())
    }

    async fn invalidate(&self, tenant_id: &str, definition_id: &str) -> Result<usize> {
        let before = self.entries.len();
        self.entries
            .retain(|key, _| !(key.tenant_id == tenant_id && key.definition_id == definition_id));
        let removed = before.saturating_sub(self.entries.len());
        tracing::debug!(tenant_id, definition_id, removed, "Cache invalidated");
        Ok(removed)
    }

    async fn purge_expired(&self) -> Result<usize> {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.is_expired(now));
        Ok(before.saturating_sub(self.entries.len()))
    }
}
