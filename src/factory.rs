use std::future::Future;
use std::time::Duration;
use tokio::task::{JoinError, JoinHandle};
use tracing::{debug, warn};

use crate::cache_stack::CacheStack;
use crate::error::{CacheError, CacheResult};
use crate::locks::KeyLockGuard;
use crate::options::CacheItemOptions;
use crate::writer::CacheStackWriter;

/// Runs a value factory under the caller's per-key lock, bounded by the
/// configured soft and hard deadlines, and pushes the produced value through
/// the write-through path.
///
/// The factory future is spawned as its own task so a soft timeout can hand
/// the stale value back to the caller while the computation keeps running.
/// Whatever happens, the lock is released exactly once: in-band after the
/// write, by the detached continuation, or by the guard's drop on error
/// paths.
pub struct FactoryRunner<T> {
    writer: CacheStackWriter<T>,
}

impl<T> Clone for FactoryRunner<T> {
    fn clone(&self) -> Self {
        Self {
            writer: self.writer.clone(),
        }
    }
}

impl<T> FactoryRunner<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn new(stack: CacheStack<T>) -> Self {
        Self {
            writer: CacheStackWriter::new(stack),
        }
    }

    pub async fn run<F, Fut>(
        &self,
        key: &str,
        factory: F,
        has_fallback: bool,
        options: &CacheItemOptions,
        guard: KeyLockGuard,
    ) -> CacheResult<T>
    where
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        let mut task = tokio::spawn(factory());

        // The soft deadline only matters when the caller has something stale
        // to serve instead.
        let soft = if has_fallback && options.grace_period.enabled {
            options.timeouts.soft
        } else {
            None
        };

        if let Some(soft) = soft {
            return match tokio::time::timeout(soft, &mut task).await {
                Ok(joined) => self.settle(key, joined, options, guard).await,
                Err(_) => {
                    debug!(
                        "[{}] Factory soft timeout for key {}, continuing in background",
                        options.id, key
                    );
                    self.continue_in_background(key, task, options, guard, soft);
                    Err(CacheError::FactorySoftTimeout {
                        key: key.to_string(),
                    })
                }
            };
        }

        match options.timeouts.hard {
            Some(hard) => match tokio::time::timeout(hard, &mut task).await {
                Ok(joined) => self.settle(key, joined, options, guard).await,
                Err(_) => {
                    task.abort();
                    guard.release();
                    Err(CacheError::FactoryHardTimeout {
                        key: key.to_string(),
                    })
                }
            },
            None => {
                let joined = (&mut task).await;
                self.settle(key, joined, options, guard).await
            }
        }
    }

    /// In-band completion: write through, release, hand the value back.
    async fn settle(
        &self,
        key: &str,
        joined: Result<anyhow::Result<T>, JoinError>,
        options: &CacheItemOptions,
        guard: KeyLockGuard,
    ) -> CacheResult<T> {
        match joined {
            Ok(Ok(value)) => {
                self.writer.set(key, value.clone(), options).await?;
                guard.release();
                Ok(value)
            }
            Ok(Err(e)) => {
                guard.release();
                Err(CacheError::Factory(e))
            }
            Err(join_error) => {
                guard.release();
                Err(CacheError::Factory(anyhow::anyhow!(
                    "factory task failed: {join_error}"
                )))
            }
        }
    }

    /// Post-soft-timeout continuation: keep awaiting the factory under the
    /// remaining hard budget, write through on success, log and drop on
    /// failure. Owns the lock until it is done so no second factory can start
    /// for the key while this one is still running.
    fn continue_in_background(
        &self,
        key: &str,
        mut task: JoinHandle<anyhow::Result<T>>,
        options: &CacheItemOptions,
        guard: KeyLockGuard,
        soft_elapsed: Duration,
    ) {
        let writer = self.writer.clone();
        let key = key.to_string();
        let options = options.clone();
        let remaining_hard = options
            .timeouts
            .hard
            .map(|hard| hard.saturating_sub(soft_elapsed));

        tokio::spawn(async move {
            let joined = match remaining_hard {
                Some(budget) => match tokio::time::timeout(budget, &mut task).await {
                    Ok(joined) => joined,
                    Err(_) => {
                        task.abort();
                        warn!(
                            "[{}] Background factory hit the hard deadline for key {}",
                            options.id, key
                        );
                        guard.release();
                        return;
                    }
                },
                None => (&mut task).await,
            };

            match joined {
                Ok(Ok(value)) => {
                    if let Err(e) = writer.set(&key, value, &options).await {
                        warn!(
                            "[{}] Background write-through failed for key {}: {:?}",
                            options.id, key, e
                        );
                    }
                }
                Ok(Err(e)) => debug!(
                    "[{}] Background factory failed for key {}: {:?}",
                    options.id, key, e
                ),
                Err(e) => debug!(
                    "[{}] Background factory task died for key {}: {:?}",
                    options.id, key, e
                ),
            }
            guard.release();
        });
    }
}
