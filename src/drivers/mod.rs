pub mod memory;
pub mod redis;

// Re-exports for convenience
pub use memory::{MemoryDriver, MemoryDriverBuilder, MemoryDriverConfig};
pub use redis::{RedisDriver, RedisDriverBuilder, RedisDriverConfig};

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use crate::error::CacheResult;
use crate::traits::CacheDriver;

/// A prefixing view over another driver. All keys are transparently prefixed
/// on the way in, so several logical namespaces can share one backing store.
pub struct NamespacedDriver<V> {
    inner: Arc<dyn CacheDriver<Value = V>>,
    prefix: String,
}

impl<V> NamespacedDriver<V> {
    pub fn new(inner: Arc<dyn CacheDriver<Value = V>>, prefix: &str) -> Self {
        Self {
            inner,
            prefix: prefix.to_string(),
        }
    }

    fn full_key(&self, key: &str) -> String {
        format!("{}:{}", self.prefix, key)
    }
}

#[async_trait]
impl<V> CacheDriver for NamespacedDriver<V>
where
    V: Send + Sync + 'static,
{
    type Value = V;

    async fn get(&self, key: &str) -> CacheResult<Option<Self::Value>> {
        self.inner.get(&self.full_key(key)).await
    }

    async fn pull(&self, key: &str) -> CacheResult<Option<Self::Value>> {
        self.inner.pull(&self.full_key(key)).await
    }

    async fn set(&self, key: &str, value: Self::Value, ttl: Option<Duration>) -> CacheResult<bool> {
        self.inner.set(&self.full_key(key), value, ttl).await
    }

    async fn has(&self, key: &str) -> CacheResult<bool> {
        self.inner.has(&self.full_key(key)).await
    }

    async fn delete(&self, key: &str) -> CacheResult<bool> {
        self.inner.delete(&self.full_key(key)).await
    }

    async fn delete_many(&self, keys: &[&str]) -> CacheResult<bool> {
        let full_keys: Vec<String> = keys.iter().map(|k| self.full_key(k)).collect();
        let refs: Vec<&str> = full_keys.iter().map(String::as_str).collect();
        self.inner.delete_many(&refs).await
    }

    /// Clears the whole backing store, not just this namespace; the driver
    /// contract has no way to enumerate a prefix.
    async fn clear(&self) -> CacheResult<()> {
        self.inner.clear().await
    }

    async fn disconnect(&self) -> CacheResult<()> {
        self.inner.disconnect().await
    }

    fn namespace(&self, prefix: &str) -> Arc<dyn CacheDriver<Value = Self::Value>> {
        Arc::new(NamespacedDriver {
            inner: Arc::clone(&self.inner),
            prefix: format!("{}:{}", self.prefix, prefix),
        })
    }
}
