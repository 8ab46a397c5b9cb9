use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::CacheResult;
use crate::events::{CacheEvent, CacheEvents};
use crate::get_set::GetSetHandler;
use crate::item::CacheItem;
use crate::locks::LockRegistry;
use crate::options::CacheItemOptions;
use crate::traits::{CacheDriver, CacheProvider};
use crate::writer::CacheStackWriter;

pub(crate) type TierDriver<T> = Arc<dyn CacheDriver<Value = CacheItem<T>>>;

/// Ordered L1/L2 driver pair with a uniform read/write surface.
///
/// Reads go L1 then L2; writes go L2 then L1, so a reader observing the L1
/// record knows the L2 record is at least as new. At least one tier is always
/// present (the builder enforces it).
pub struct CacheStack<T> {
    pub(crate) l1: Option<TierDriver<T>>,
    pub(crate) l2: Option<TierDriver<T>>,
    pub(crate) name: String,
    pub(crate) events: CacheEvents<T>,
    pub(crate) locks: LockRegistry,
}

impl<T> Clone for CacheStack<T> {
    fn clone(&self) -> Self {
        Self {
            l1: self.l1.clone(),
            l2: self.l2.clone(),
            name: self.name.clone(),
            events: self.events.clone(),
            locks: self.locks.clone(),
        }
    }
}

impl<T> CacheStack<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Receiver for this stack's fire-and-forget events.
    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<CacheEvent<T>> {
        self.events.subscribe()
    }

    /// Typed L1 read. L1 failures propagate; the local tier is authoritative.
    pub(crate) async fn read_l1(&self, key: &str) -> CacheResult<Option<CacheItem<T>>> {
        match &self.l1 {
            Some(l1) => l1.get(key).await,
            None => Ok(None),
        }
    }

    /// Typed L2 read. Any L2 failure (connectivity, decode) is a miss.
    pub(crate) async fn read_l2(&self, key: &str) -> Option<CacheItem<T>> {
        let l2 = self.l2.as_ref()?;

        match l2.get(key).await {
            Ok(item) => item,
            Err(e) => {
                warn!("L2 read failed for key {} on cache {}: {:?}", key, self.name, e);
                None
            }
        }
    }

    /// Tear down both tiers' connections.
    pub async fn disconnect(&self) -> CacheResult<()> {
        if let Some(l2) = &self.l2 {
            l2.disconnect().await?;
        }
        if let Some(l1) = &self.l1 {
            l1.disconnect().await?;
        }
        Ok(())
    }
}

#[async_trait]
impl<T> CacheProvider for CacheStack<T>
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
        GetSetHandler::new(self.clone())
            .handle(key, factory, &options)
            .await
    }

    async fn get(&self, key: &str) -> CacheResult<Option<Self::Value>> {
        if let Some(item) = self.read_l1(key).await? {
            if !item.is_logically_expired() {
                debug!("L1 cache hit for key: {}", key);
                self.events.hit(key, item.value.clone(), false);
                return Ok(Some(item.value));
            }
        }

        if let Some(item) = self.read_l2(key).await {
            if !item.is_logically_expired() {
                debug!("L2 cache hit for key: {}", key);

                // Backfill L1 with the remaining physical lifetime
                if let Some(l1) = &self.l1 {
                    if let Err(e) = l1.set(key, item.clone(), item.physical_ttl()).await {
                        warn!("Failed to backfill L1 cache for key {}: {:?}", key, e);
                    }
                }

                self.events.hit(key, item.value.clone(), false);
                return Ok(Some(item.value));
            }
        }

        self.events.miss(key);
        Ok(None)
    }

    async fn set(&self, key: &str, value: Self::Value, ttl: Option<Duration>) -> CacheResult<()> {
        let options = CacheItemOptions {
            ttl,
            ..Default::default()
        };
        CacheStackWriter::new(self.clone())
            .set(key, value, &options)
            .await
    }

    async fn delete(&self, key: &str) -> CacheResult<bool> {
        let mut deleted = false;

        if let Some(l2) = &self.l2 {
            match l2.delete(key).await {
                Ok(was_deleted) => deleted |= was_deleted,
                Err(e) => warn!("Failed to delete from L2 cache for key {}: {:?}", key, e),
            }
        }

        if let Some(l1) = &self.l1 {
            match l1.delete(key).await {
                Ok(was_deleted) => deleted |= was_deleted,
                Err(e) => warn!("Failed to delete from L1 cache for key {}: {:?}", key, e),
            }
        }

        if deleted {
            self.events.deleted(key);
        }
        Ok(deleted)
    }

    async fn has(&self, key: &str) -> CacheResult<bool> {
        if let Some(l1) = &self.l1 {
            if l1.has(key).await? {
                return Ok(true);
            }
        }

        if let Some(l2) = &self.l2 {
            match l2.has(key).await {
                Ok(exists) => return Ok(exists),
                Err(e) => warn!("L2 has() failed for key {}: {:?}", key, e),
            }
        }

        Ok(false)
    }

    async fn pull(&self, key: &str) -> CacheResult<Option<Self::Value>> {
        let l1_item = match &self.l1 {
            Some(l1) => l1.pull(key).await?,
            None => None,
        };
        let l2_item = match &self.l2 {
            Some(l2) => match l2.pull(key).await {
                Ok(item) => item,
                Err(e) => {
                    warn!("L2 pull failed for key {}: {:?}", key, e);
                    None
                }
            },
            None => None,
        };

        let value = l1_item
            .filter(|item| !item.is_logically_expired())
            .or_else(|| l2_item.filter(|item| !item.is_logically_expired()))
            .map(|item| item.value);

        if value.is_some() {
            self.events.deleted(key);
        }
        Ok(value)
    }

    async fn clear(&self) -> CacheResult<()> {
        if let Some(l2) = &self.l2 {
            if let Err(e) = l2.clear().await {
                warn!("Failed to clear L2 cache {}: {:?}", self.name, e);
            }
        }
        if let Some(l1) = &self.l1 {
            l1.clear().await?;
        }
        Ok(())
    }
}

/// Builder for cache stack
pub struct CacheStackBuilder<T> {
    name: String,
    l1: Option<TierDriver<T>>,
    l2: Option<TierDriver<T>>,
}

impl<T> CacheStackBuilder<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn new<S: Into<String>>(name: S) -> Self {
        Self {
            name: name.into(),
            l1: None,
            l2: None,
        }
    }

    pub fn with_l1_driver(mut self, driver: TierDriver<T>) -> Self {
        self.l1 = Some(driver);
        self
    }

    pub fn with_l2_driver(mut self, driver: TierDriver<T>) -> Self {
        self.l2 = Some(driver);
        self
    }

    /// Panics when neither tier is configured; a stack with no storage is a
    /// configuration bug, caught here rather than mid-operation.
    pub fn build(self) -> CacheStack<T> {
        assert!(
            self.l1.is_some() || self.l2.is_some(),
            "cache stack '{}' needs at least one tier",
            self.name
        );

        let events = CacheEvents::new(&self.name);
        CacheStack {
            l1: self.l1,
            l2: self.l2,
            name: self.name,
            events,
            locks: LockRegistry::new(),
        }
    }
}
