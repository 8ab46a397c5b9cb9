use async_trait::async_trait;
use lru::LruCache;
use parking_lot::RwLock;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::drivers::NamespacedDriver;
use crate::error::CacheResult;
use crate::traits::CacheDriver;

/// Configuration for the memory driver
#[derive(Debug, Clone)]
pub struct MemoryDriverConfig {
    /// Maximum number of entries to store
    pub max_entries: usize,
    /// Default physical TTL applied when `set` is called without one
    pub default_ttl: Option<Duration>,
}

impl Default for MemoryDriverConfig {
    fn default() -> Self {
        Self {
            max_entries: 10_000,
            default_ttl: None,
        }
    }
}

struct StoredEntry<V> {
    value: V,
    expires_at: Option<Instant>,
}

impl<V> StoredEntry<V> {
    fn is_expired(&self) -> bool {
        self.expires_at
            .map(|at| Instant::now() >= at)
            .unwrap_or(false)
    }
}

/// In-process L1 driver backed by an LRU map. Physical TTLs are enforced on
/// read; a sampled sweep keeps fully expired entries from lingering.
pub struct MemoryDriver<V> {
    cache: Arc<RwLock<LruCache<String, StoredEntry<V>>>>,
    config: MemoryDriverConfig,
}

impl<V> Clone for MemoryDriver<V> {
    fn clone(&self) -> Self {
        Self {
            cache: Arc::clone(&self.cache),
            config: self.config.clone(),
        }
    }
}

impl<V> MemoryDriver<V>
where
    V: Clone + Send + Sync + 'static,
{
    pub fn new(config: MemoryDriverConfig) -> Self {
        let capacity =
            NonZeroUsize::new(config.max_entries).unwrap_or(NonZeroUsize::new(1).unwrap());

        Self {
            cache: Arc::new(RwLock::new(LruCache::new(capacity))),
            config,
        }
    }

    /// Drop every physically expired entry.
    fn cleanup_expired(&self) {
        let mut cache = self.cache.write();

        let expired_keys: Vec<String> = cache
            .iter()
            .filter_map(|(key, entry)| entry.is_expired().then(|| key.clone()))
            .collect();

        for key in expired_keys {
            cache.pop(&key);
        }
    }
}

#[async_trait]
impl<V> CacheDriver for MemoryDriver<V>
where
    V: Clone + Send + Sync + 'static,
{
    type Value = V;

    async fn get(&self, key: &str) -> CacheResult<Option<Self::Value>> {
        // Periodic cleanup (every 100th access)
        if fastrand::u32(0..100) == 0 {
            self.cleanup_expired();
        }

        let mut cache = self.cache.write();

        match cache.get(key) {
            Some(entry) if entry.is_expired() => {
                cache.pop(key);
                Ok(None)
            }
            Some(entry) => Ok(Some(entry.value.clone())),
            None => Ok(None),
        }
    }

    async fn pull(&self, key: &str) -> CacheResult<Option<Self::Value>> {
        let mut cache = self.cache.write();

        match cache.pop(key) {
            Some(entry) if entry.is_expired() => Ok(None),
            Some(entry) => Ok(Some(entry.value)),
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: Self::Value, ttl: Option<Duration>) -> CacheResult<bool> {
        let ttl = ttl.or(self.config.default_ttl);
        let entry = StoredEntry {
            value,
            expires_at: ttl.map(|ttl| Instant::now() + ttl),
        };

        self.cache.write().put(key.to_string(), entry);
        Ok(true)
    }

    async fn has(&self, key: &str) -> CacheResult<bool> {
        let cache = self.cache.read();

        match cache.peek(key) {
            Some(entry) => Ok(!entry.is_expired()),
            None => Ok(false),
        }
    }

    async fn delete(&self, key: &str) -> CacheResult<bool> {
        Ok(self.cache.write().pop(key).is_some())
    }

    async fn delete_many(&self, keys: &[&str]) -> CacheResult<bool> {
        let mut cache = self.cache.write();
        let mut deleted = false;

        for key in keys {
            deleted |= cache.pop(*key).is_some();
        }

        Ok(deleted)
    }

    async fn clear(&self) -> CacheResult<()> {
        self.cache.write().clear();
        Ok(())
    }

    async fn disconnect(&self) -> CacheResult<()> {
        Ok(())
    }

    fn namespace(&self, prefix: &str) -> Arc<dyn CacheDriver<Value = Self::Value>> {
        Arc::new(NamespacedDriver::new(Arc::new(self.clone()), prefix))
    }
}

/// Builder for memory driver
pub struct MemoryDriverBuilder {
    config: MemoryDriverConfig,
}

impl MemoryDriverBuilder {
    pub fn new() -> Self {
        Self {
            config: MemoryDriverConfig::default(),
        }
    }

    pub fn max_entries(mut self, max_entries: usize) -> Self {
        self.config.max_entries = max_entries;
        self
    }

    pub fn default_ttl(mut self, ttl: Duration) -> Self {
        self.config.default_ttl = Some(ttl);
        self
    }

    pub fn build<V>(self) -> MemoryDriver<V>
    where
        V: Clone + Send + Sync + 'static,
    {
        MemoryDriver::new(self.config)
    }
}

impl Default for MemoryDriverBuilder {
    fn default() -> Self {
        Self::new()
    }
}
