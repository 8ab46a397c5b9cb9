use ahash::RandomState;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::OwnedMutexGuard;

use crate::error::{CacheError, CacheResult};

/// Process-local registry of per-key mutexes. Cheap to clone; all clones
/// share one map.
///
/// The map itself is only ever touched inside a short `parking_lot` critical
/// section (lookup/insert/remove); the per-key mutexes are tokio mutexes so
/// holders may suspend while the lock is held. Entries are refcounted: every
/// checkout increments, every checkin decrements, and the entry is removed at
/// zero, so the registry cannot grow with dead keys and two tasks can never
/// observe different mutexes for the same live key.
#[derive(Clone, Default)]
pub struct LockRegistry {
    inner: Arc<RegistryInner>,
}

#[derive(Default)]
struct RegistryInner {
    entries: parking_lot::Mutex<HashMap<String, LockEntry, RandomState>>,
}

struct LockEntry {
    mutex: Arc<tokio::sync::Mutex<()>>,
    refcount: usize,
}

/// Checkin-on-drop token; keeps the refcount balanced even when an
/// acquisition future is cancelled mid-await.
struct Checkout {
    registry: LockRegistry,
    key: String,
}

impl Drop for Checkout {
    fn drop(&mut self) {
        self.registry.checkin(&self.key);
    }
}

/// An acquired per-key lock. Released explicitly via [`KeyLockGuard::release`]
/// or implicitly on drop; the release is idempotent either way.
pub struct KeyLockGuard {
    guard: Option<OwnedMutexGuard<()>>,
    token: Option<Checkout>,
}

impl KeyLockGuard {
    pub fn release(mut self) {
        self.release_inner();
    }

    fn release_inner(&mut self) {
        // The mutex guard must drop before the checkout token decrements the
        // refcount, otherwise a newcomer could install a second mutex for a
        // key that is still held.
        drop(self.guard.take());
        drop(self.token.take());
    }
}

impl Drop for KeyLockGuard {
    fn drop(&mut self) {
        self.release_inner();
    }
}

impl LockRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn checkout(&self, key: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut entries = self.inner.entries.lock();
        let entry = entries.entry(key.to_string()).or_insert_with(|| LockEntry {
            mutex: Arc::new(tokio::sync::Mutex::new(())),
            refcount: 0,
        });
        entry.refcount += 1;
        Arc::clone(&entry.mutex)
    }

    fn checkin(&self, key: &str) {
        let mut entries = self.inner.entries.lock();
        if let Some(entry) = entries.get_mut(key) {
            entry.refcount -= 1;
            if entry.refcount == 0 {
                entries.remove(key);
            }
        }
    }

    /// Block until the key's mutex is acquired, or until `timeout` elapses.
    pub async fn acquire(&self, key: &str, timeout: Option<Duration>) -> CacheResult<KeyLockGuard> {
        let mutex = self.checkout(key);
        let token = Checkout {
            registry: self.clone(),
            key: key.to_string(),
        };

        let guard = match timeout {
            Some(timeout) => match tokio::time::timeout(timeout, mutex.lock_owned()).await {
                Ok(guard) => guard,
                Err(_) => {
                    return Err(CacheError::LockTimeout {
                        key: key.to_string(),
                    });
                }
            },
            None => mutex.lock_owned().await,
        };

        Ok(KeyLockGuard {
            guard: Some(guard),
            token: Some(token),
        })
    }

    /// Non-blocking probe used by the early refresh path: returns `None` when
    /// the key is already locked, without ever waiting.
    pub fn try_acquire(&self, key: &str) -> Option<KeyLockGuard> {
        let mutex = self.checkout(key);
        let token = Checkout {
            registry: self.clone(),
            key: key.to_string(),
        };

        match mutex.try_lock_owned() {
            Ok(guard) => Some(KeyLockGuard {
                guard: Some(guard),
                token: Some(token),
            }),
            Err(_) => None,
        }
    }

    /// Number of live entries; keys with no holder and no waiter do not count.
    pub fn entry_count(&self) -> usize {
        self.inner.entries.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn acquire_is_exclusive_per_key() {
        let registry = LockRegistry::new();

        let held = registry.acquire("a", None).await.unwrap();
        assert!(registry.try_acquire("a").is_none());
        assert!(registry.try_acquire("b").is_some());

        held.release();
        assert!(registry.try_acquire("a").is_some());
    }

    #[tokio::test]
    async fn acquire_times_out() {
        let registry = LockRegistry::new();

        let _held = registry.acquire("a", None).await.unwrap();
        let result = registry.acquire("a", Some(Duration::from_millis(20))).await;

        assert!(matches!(result, Err(CacheError::LockTimeout { .. })));
        // The loser's checkout must not leak a registry entry.
        assert_eq!(registry.entry_count(), 1);
    }

    #[tokio::test]
    async fn registry_entry_is_removed_after_last_release() {
        let registry = LockRegistry::new();

        let first = registry.acquire("a", None).await.unwrap();
        assert_eq!(registry.entry_count(), 1);
        first.release();
        assert_eq!(registry.entry_count(), 0);
    }

    #[tokio::test]
    async fn dropping_the_guard_releases_the_lock() {
        let registry = LockRegistry::new();

        {
            let _guard = registry.acquire("a", None).await.unwrap();
        }
        assert_eq!(registry.entry_count(), 0);
        assert!(registry.try_acquire("a").is_some());
    }

    #[tokio::test]
    async fn waiters_serialize_critical_sections() {
        let registry = LockRegistry::new();
        let in_section = Arc::new(AtomicUsize::new(0));
        let mut handles = Vec::new();

        for _ in 0..32 {
            let registry = registry.clone();
            let in_section = Arc::clone(&in_section);
            handles.push(tokio::spawn(async move {
                let guard = registry.acquire("hot", None).await.unwrap();
                assert_eq!(in_section.fetch_add(1, Ordering::SeqCst), 0);
                tokio::time::sleep(Duration::from_millis(1)).await;
                assert_eq!(in_section.fetch_sub(1, Ordering::SeqCst), 1);
                guard.release();
            }));
        }

        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(registry.entry_count(), 0);
    }
}
