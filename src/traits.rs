use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use crate::error::CacheResult;
use crate::options::CacheItemOptions;

/// Contract every storage tier must fulfill.
///
/// Drivers treat values as opaque records and only enforce the physical ttl
/// they are handed on `set`; all logical expiry bookkeeping lives above them.
#[async_trait]
pub trait CacheDriver: Send + Sync {
    type Value: Send + Sync;

    /// Get a value from the cache
    async fn get(&self, key: &str) -> CacheResult<Option<Self::Value>>;

    /// Get a value and delete it in one motion
    async fn pull(&self, key: &str) -> CacheResult<Option<Self::Value>>;

    /// Set a value with an optional physical TTL
    async fn set(&self, key: &str, value: Self::Value, ttl: Option<Duration>) -> CacheResult<bool>;

    /// Check if a key exists
    async fn has(&self, key: &str) -> CacheResult<bool>;

    /// Delete a key from the cache
    async fn delete(&self, key: &str) -> CacheResult<bool>;

    /// Delete multiple keys at once; true when any key was removed
    async fn delete_many(&self, keys: &[&str]) -> CacheResult<bool>;

    /// Clear all entries
    async fn clear(&self) -> CacheResult<()>;

    /// Tear down any underlying connections
    async fn disconnect(&self) -> CacheResult<()>;

    /// A view of this driver whose keys are transparently prefixed
    fn namespace(&self, prefix: &str) -> Arc<dyn CacheDriver<Value = Self::Value>>;
}

/// High-level cache surface: get-or-compute plus the plain passthroughs.
#[async_trait]
pub trait CacheProvider: Send + Sync {
    type Value: Send + Sync;

    /// Return the cached value for `key`, or run `factory` to produce, store
    /// and return it. Concurrent callers for the same key are coalesced into
    /// a single factory run per process.
    async fn get_or_set<F, Fut>(
        &self,
        key: &str,
        factory: F,
        options: CacheItemOptions,
    ) -> CacheResult<Self::Value>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<Self::Value>> + Send + 'static;

    async fn get(&self, key: &str) -> CacheResult<Option<Self::Value>>;

    async fn set(
        &self,
        key: &str,
        value: Self::Value,
        ttl: Option<Duration>,
    ) -> CacheResult<()>;

    async fn delete(&self, key: &str) -> CacheResult<bool>;

    async fn has(&self, key: &str) -> CacheResult<bool>;

    async fn pull(&self, key: &str) -> CacheResult<Option<Self::Value>>;

    async fn clear(&self) -> CacheResult<()>;
}
