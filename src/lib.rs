pub mod cache_stack;
pub mod drivers;
pub mod error;
pub mod events;
pub mod factory;
pub mod get_set;
pub mod item;
pub mod locks;
pub mod options;
pub mod traits;
pub mod writer;

// Re-exports for convenience
pub use cache_stack::{CacheStack, CacheStackBuilder};
pub use error::{CacheError, CacheResult};
pub use events::{CacheEvent, CacheEvents};
pub use item::CacheItem;
pub use options::{CacheItemOptions, FactoryTimeouts, GracePeriod};
pub use traits::{CacheDriver, CacheProvider};

use async_trait::async_trait;
use std::future::Future;
use std::time::Duration;

/// Main StratoCache struct - the entry point for the library
pub struct StratoCache<T> {
    stack: CacheStack<T>,
}

impl<T> Clone for StratoCache<T> {
    fn clone(&self) -> Self {
        Self {
            stack: self.stack.clone(),
        }
    }
}

impl<T> StratoCache<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn new(stack: CacheStack<T>) -> Self {
        Self { stack }
    }

    pub fn builder<S: Into<String>>(name: S) -> CacheStackBuilder<T> {
        CacheStackBuilder::new(name)
    }

    pub fn stack(&self) -> &CacheStack<T> {
        &self.stack
    }

    /// Receiver for the stack's fire-and-forget events.
    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<CacheEvent<T>> {
        self.stack.subscribe()
    }

    /// Tear down both tiers' connections.
    pub async fn disconnect(&self) -> CacheResult<()> {
        self.stack.disconnect().await
    }
}

#[async_trait]
impl<T> CacheProvider for StratoCache<T>
where
    T: Clone + Send + Sync + 'static,
{
    type Value = T;

    async fn get_or_set<F, Fut>(
        &self,
        key: &str,
        factory: F,
        options: CacheItemOptions,
    ) -> CacheResult<Self::Value>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<Self::Value>> + Send + 'static,
    {
        self.stack.get_or_set(key, factory, options).await
    }

    async fn get(&self, key: &str) -> CacheResult<Option<Self::Value>> {
        self.stack.get(key).await
    }

    async fn set(&self, key: &str, value: Self::Value, ttl: Option<Duration>) -> CacheResult<()> {
        self.stack.set(key, value, ttl).await
    }

    async fn delete(&self, key: &str) -> CacheResult<bool> {
        self.stack.delete(key).await
    }

    async fn has(&self, key: &str) -> CacheResult<bool> {
        self.stack.has(key).await
    }

    async fn pull(&self, key: &str) -> CacheResult<Option<Self::Value>> {
        self.stack.pull(key).await
    }

    async fn clear(&self) -> CacheResult<()> {
        self.stack.clear().await
    }
}
