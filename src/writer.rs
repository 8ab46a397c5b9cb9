use tracing::warn;

use crate::cache_stack::CacheStack;
use crate::error::CacheResult;
use crate::item::CacheItem;
use crate::options::CacheItemOptions;
use crate::traits::CacheDriver;

/// Write-through policy for the stack: L2 first, then L1, both with the
/// item's physical TTL.
///
/// The ordering is what lets a reader treat an observed L1 record as proof
/// that the shared tier already has it. An L2 failure is logged and swallowed
/// so the local tier still gets the value; an L1 failure fails the write.
pub struct CacheStackWriter<T> {
    stack: CacheStack<T>,
}

impl<T> Clone for CacheStackWriter<T> {
    fn clone(&self) -> Self {
        Self {
            stack: self.stack.clone(),
        }
    }
}

impl<T> CacheStackWriter<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn new(stack: CacheStack<T>) -> Self {
        Self { stack }
    }

    /// Build a fresh item from `value` + `options` and write it through.
    pub async fn set(&self, key: &str, value: T, options: &CacheItemOptions) -> CacheResult<()> {
        let item = CacheItem::new(key, value, options);
        self.write_item(&item).await
    }

    pub async fn write_item(&self, item: &CacheItem<T>) -> CacheResult<()> {
        let ttl = item.physical_ttl();

        if let Some(l2) = &self.stack.l2 {
            if let Err(e) = l2.set(&item.key, item.clone(), ttl).await {
                warn!(
                    "L2 write failed for key {} on cache {}, keeping local write: {:?}",
                    item.key, self.stack.name, e
                );
            }
        }

        if let Some(l1) = &self.stack.l1 {
            l1.set(&item.key, item.clone(), ttl).await?;
        }

        self.stack.events.written(&item.key);
        Ok(())
    }

    /// Rewrite only the local tier, keeping the item's remaining physical
    /// lifetime. Used for L2 read-through backfills and fallback extensions.
    pub async fn rewrite_l1(&self, item: &CacheItem<T>) -> CacheResult<()> {
        if let Some(l1) = &self.stack.l1 {
            l1.set(&item.key, item.clone(), item.physical_ttl()).await?;
        }
        Ok(())
    }
}
