//! Key to entry stores.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::RwLock;
use tracing::trace;

use crate::entry::{CacheEntry, CacheResult};
use crate::key::CacheKey;

/// Concurrent key to entry store.
///
/// Implementations may evict expired entries on read; callers still check
/// `CacheEntry::is_expired` before serving.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Get an entry.
    async fn get(&self, key: &CacheKey) -> CacheResult<Option<CacheEntry>>;

    /// Store an entry, replacing any previous one.
    async fn put(&self, key: CacheKey, entry: CacheEntry) -> CacheResult<()>;

    /// Remove an entry, returning whether one was present.
    async fn remove(&self, key: &CacheKey) -> CacheResult<bool>;

    /// Number of entries held.
    async fn len(&self) -> usize;

    /// Default TTL in seconds for new entries; 0 means unbounded.
    fn default_ttl(&self) -> u64;
}

/// In-memory store with a bounded entry count.
///
/// When full, the oldest stored entry is evicted.
#[derive(Debug)]
pub struct InMemoryStore {
    name: String,
    entries: RwLock<HashMap<CacheKey, CacheEntry>>,
    max_entries: usize,
    default_ttl_secs: u64,
}

impl InMemoryStore {
    /// Create a store.
    pub fn new(name: impl Into<String>, default_ttl_secs: u64, max_entries: usize) -> Self {
        Self {
            name: name.into(),
            entries: RwLock::new(HashMap::new()),
            max_entries,
            default_ttl_secs,
        }
    }

    /// Store name used in logs.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Drop every entry.
    pub fn clear(&self) {
        self.entries.write().clear();
    }

    fn evict_oldest(entries: &mut HashMap<CacheKey, CacheEntry>) -> Option<CacheKey> {
        let oldest = entries
            .iter()
            .min_by_key(|(_, entry)| entry.stored_at)
            .map(|(key, _)| key.clone())?;
        entries.remove(&oldest);
        Some(oldest)
    }
}

#[async_trait]
impl CacheStore for InMemoryStore {
    async fn get(&self, key: &CacheKey) -> CacheResult<Option<CacheEntry>> {
        let entry = self.entries.read().get(key).cloned();
        match entry {
            Some(entry) if entry.is_expired() => {
                self.entries.write().remove(key);
                trace!(store = %self.name, key = %key, "evicted expired entry");
                Ok(None)
            }
            other => Ok(other),
        }
    }

    async fn put(&self, key: CacheKey, entry: CacheEntry) -> CacheResult<()> {
        let mut entries = self.entries.write();
        if self.max_entries > 0
            && entries.len() >= self.max_entries
            && !entries.contains_key(&key)
        {
            if let Some(evicted) = Self::evict_oldest(&mut entries) {
                trace!(store = %self.name, key = %evicted, "evicted oldest entry");
            }
        }
        entries.insert(key, entry);
        Ok(())
    }

    async fn remove(&self, key: &CacheKey) -> CacheResult<bool> {
        Ok(self.entries.write().remove(key).is_some())
    }

    async fn len(&self) -> usize {
        self.entries.read().len()
    }

    fn default_ttl(&self) -> u64 {
        self.default_ttl_secs
    }
}
