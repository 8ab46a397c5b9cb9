use std::future::Future;
use tracing::{debug, warn};

use crate::cache_stack::CacheStack;
use crate::error::{CacheError, CacheResult};
use crate::factory::FactoryRunner;
use crate::item::CacheItem;
use crate::options::CacheItemOptions;
use crate::writer::CacheStackWriter;

/// The get-or-compute orchestrator.
///
/// Progression for a `handle` call: optimistic L1 read (no lock), per-key
/// lock acquisition, double-checked L1, L2 read-through, factory execution,
/// then the grace fallback ladder. The per-key lock is what collapses a
/// stampede of concurrent callers into a single factory run; every exit from
/// the protocol releases it exactly once.
pub struct GetSetHandler<T> {
    stack: CacheStack<T>,
    writer: CacheStackWriter<T>,
    runner: FactoryRunner<T>,
}

impl<T> GetSetHandler<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn new(stack: CacheStack<T>) -> Self {
        Self {
            writer: CacheStackWriter::new(stack.clone()),
            runner: FactoryRunner::new(stack.clone()),
            stack,
        }
    }

    pub async fn handle<F, Fut>(
        &self,
        key: &str,
        factory: F,
        options: &CacheItemOptions,
    ) -> CacheResult<T>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        // Fast path: a fresh local item needs no coordination at all.
        let local = self.stack.read_l1(key).await?;
        if let Some(item) = &local {
            if !item.is_logically_expired() {
                if item.is_early_expired() {
                    self.spawn_early_refresh(key, factory, options);
                }
                debug!(
                    "[{}] L1 hit for key {} on cache {}",
                    options.id, key, self.stack.name
                );
                self.stack.events.hit(key, item.value.clone(), false);
                return Ok(item.value.clone());
            }
        }

        // A caller with a graced fallback in hand only waits the soft
        // timeout; one with nothing waits the hard timeout.
        let lock_timeout = options.applicable_lock_timeout(local.is_some());
        let guard = match self.stack.locks.acquire(key, lock_timeout).await {
            Ok(guard) => guard,
            Err(err @ CacheError::LockTimeout { .. }) => {
                if let Some(item) = &local {
                    if item.is_graced(&options.grace_period) {
                        debug!(
                            "[{}] Lock timeout for key {}, serving graced value",
                            options.id, key
                        );
                        self.stack.events.hit(key, item.value.clone(), true);
                        return Ok(item.value.clone());
                    }
                }
                return Err(err);
            }
            Err(err) => return Err(err),
        };

        // Double-checked read: the previous lock holder may have refilled L1
        // while this caller was waiting.
        if let Some(item) = self.stack.read_l1(key).await? {
            if !item.is_logically_expired() {
                guard.release();
                self.stack.events.hit(key, item.value.clone(), false);
                return Ok(item.value.clone());
            }
        }

        // Shared tier read-through; a fresh remote item is promoted into L1
        // with its remaining lifetime.
        let remote = self.stack.read_l2(key).await;
        if let Some(item) = &remote {
            if !item.is_logically_expired() {
                if let Err(e) = self.writer.rewrite_l1(item).await {
                    warn!("Failed to backfill L1 for key {}: {:?}", key, e);
                }
                guard.release();
                self.stack.events.hit(key, item.value.clone(), false);
                return Ok(item.value.clone());
            }
        }

        // Nothing fresh anywhere: run the factory while holding the lock.
        debug!(
            "[{}] Cache miss for key {} on cache {}, invoking factory",
            options.id, key, self.stack.name
        );
        self.stack.events.miss(key);

        match self
            .runner
            .run(key, factory, local.is_some(), options, guard)
            .await
        {
            Ok(value) => Ok(value),
            Err(err @ CacheError::FactorySoftTimeout { .. }) => match local {
                Some(item) if item.is_graced(&options.grace_period) => {
                    self.serve_graced(item, options).await
                }
                _ => Err(err),
            },
            Err(err) if err.is_grace_recoverable() => {
                let stale = remote.or(local);
                match stale {
                    Some(item) if item.is_graced(&options.grace_period) => {
                        debug!(
                            "[{}] Factory failed for key {}, serving graced value: {:?}",
                            options.id, key, err
                        );
                        self.serve_graced(item, options).await
                    }
                    _ => Err(err),
                }
            }
            Err(err) => Err(err),
        }
    }

    /// Graced return: optionally extend the stale item's logical expiry in L1
    /// so readers inside the fallback window do not re-hit the failing
    /// factory.
    async fn serve_graced(&self, item: CacheItem<T>, options: &CacheItemOptions) -> CacheResult<T> {
        if let Some(duration) = options.grace_period.fallback_duration {
            let extended = item.apply_fallback_duration(duration);
            if let Err(e) = self.writer.rewrite_l1(&extended).await {
                warn!(
                    "[{}] Failed to extend stale item in L1 for key {}: {:?}",
                    options.id, item.key, e
                );
            }
        }

        self.stack.events.hit(&item.key, item.value.clone(), true);
        Ok(item.value)
    }

    /// Detached background refresh, fired from the fast path when a hit is
    /// inside its early-expiration window. Probes the per-key lock without
    /// blocking; if it is taken, a refresh or a full miss path is already in
    /// flight and this task bows out.
    fn spawn_early_refresh<F, Fut>(&self, key: &str, factory: F, options: &CacheItemOptions)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        let stack = self.stack.clone();
        let writer = self.writer.clone();
        let key = key.to_string();
        let options = options.clone();

        tokio::spawn(async move {
            let Some(guard) = stack.locks.try_acquire(&key) else {
                return;
            };

            debug!("[{}] Early refresh for key {}", options.id, key);
            match factory().await {
                Ok(value) => {
                    if let Err(e) = writer.set(&key, value, &options).await {
                        warn!(
                            "[{}] Early refresh write failed for key {}: {:?}",
                            options.id, key, e
                        );
                    }
                }
                Err(e) => debug!(
                    "[{}] Early refresh factory failed for key {}: {:?}",
                    options.id, key, e
                ),
            }
            guard.release();
        });
    }
}
