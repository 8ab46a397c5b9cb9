use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use stratocache::drivers::memory::MemoryDriver;
use stratocache::drivers::MemoryDriverBuilder;
use stratocache::{
    CacheDriver, CacheError, CacheEvent, CacheItem, CacheItemOptions, CacheProvider,
    CacheStackBuilder, FactoryTimeouts, GracePeriod, StratoCache,
};

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

/// The reference option bundle: 1s ttl, 5s grace with a 2s fallback window,
/// 100ms/500ms factory timeouts, background refresh at 80% of the ttl.
fn opts() -> CacheItemOptions {
    CacheItemOptions {
        ttl: Some(Duration::from_millis(1000)),
        early_expiration_percentage: Some(0.8),
        grace_period: GracePeriod::enabled(Duration::from_millis(5000))
            .with_fallback(Duration::from_millis(2000)),
        timeouts: FactoryTimeouts {
            soft: Some(Duration::from_millis(100)),
            hard: Some(Duration::from_millis(500)),
        },
        ..Default::default()
    }
}

type Tier = Arc<MemoryDriver<CacheItem<i32>>>;

fn tiered_cache(name: &str) -> (StratoCache<i32>, Tier, Tier) {
    let l1: Tier = Arc::new(MemoryDriverBuilder::new().build());
    let l2: Tier = Arc::new(MemoryDriverBuilder::new().build());

    let stack = CacheStackBuilder::new(name)
        .with_l1_driver(l1.clone())
        .with_l2_driver(l2.clone())
        .build();

    (StratoCache::new(stack), l1, l2)
}

fn l1_cache(name: &str) -> (StratoCache<i32>, Tier) {
    let l1: Tier = Arc::new(MemoryDriverBuilder::new().build());
    let stack = CacheStackBuilder::new(name).with_l1_driver(l1.clone()).build();
    (StratoCache::new(stack), l1)
}

/// Plant an already-stale item directly into a tier: logically expired
/// `expired_for` ago, still physically alive for grace serving.
async fn plant_stale(tier: &Tier, key: &str, value: i32, expired_for: Duration) {
    let preload = CacheItemOptions {
        ttl: Some(Duration::from_millis(1)),
        grace_period: GracePeriod::enabled(Duration::from_secs(300)),
        ..Default::default()
    };
    let item = CacheItem::new(key, value, &preload);
    tokio::time::sleep(Duration::from_millis(5) + expired_for).await;
    tier.set(key, item, None).await.unwrap();
}

#[tokio::test]
async fn cold_miss_runs_factory_once_and_fills_both_tiers() {
    init_tracing();
    let (cache, l1, l2) = tiered_cache("cold_miss");
    let calls = Arc::new(AtomicUsize::new(0));

    let counter = calls.clone();
    let value = cache
        .get_or_set(
            "a",
            move || async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(42)
            },
            opts(),
        )
        .await
        .unwrap();

    assert_eq!(value, 42);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(l1.get("a").await.unwrap().unwrap().value, 42);
    assert_eq!(l2.get("a").await.unwrap().unwrap().value, 42);
}

#[tokio::test]
async fn stampede_of_callers_runs_the_factory_once() {
    init_tracing();
    let (cache, _l1, _l2) = tiered_cache("stampede");
    let calls = Arc::new(AtomicUsize::new(0));

    // Generous deadlines so slow CI machines cannot time the waiters out.
    let options = CacheItemOptions {
        ttl: Some(Duration::from_secs(10)),
        grace_period: GracePeriod::enabled(Duration::from_secs(30)),
        timeouts: FactoryTimeouts {
            soft: Some(Duration::from_secs(2)),
            hard: Some(Duration::from_secs(10)),
        },
        ..Default::default()
    };

    let mut handles = Vec::new();
    for _ in 0..100 {
        let cache = cache.clone();
        let calls = calls.clone();
        let options = options.clone();
        handles.push(tokio::spawn(async move {
            cache
                .get_or_set(
                    "b",
                    move || async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(200)).await;
                        Ok(7)
                    },
                    options,
                )
                .await
                .unwrap()
        }));
    }

    for handle in handles {
        assert_eq!(handle.await.unwrap(), 7);
    }
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn soft_timeout_serves_stale_while_factory_keeps_running() {
    init_tracing();
    let (cache, l1) = l1_cache("soft_timeout");
    plant_stale(&l1, "c", 1, Duration::from_millis(50)).await;

    let mut rx = cache.subscribe();
    let started = Instant::now();
    let value = cache
        .get_or_set(
            "c",
            || async {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok(2)
            },
            opts(),
        )
        .await
        .unwrap();
    let elapsed = started.elapsed();

    assert_eq!(value, 1);
    assert!(elapsed < Duration::from_millis(400), "took {:?}", elapsed);

    let mut saw_graced_hit = false;
    while let Ok(event) = rx.try_recv() {
        if matches!(event, CacheEvent::Hit { graced: true, .. }) {
            saw_graced_hit = true;
        }
    }
    assert!(saw_graced_hit);

    // Once the background continuation hits the hard deadline it must give
    // the lock back; after deleting the shielded item a fresh caller must be
    // able to take the lock and recompute.
    tokio::time::sleep(Duration::from_millis(600)).await;
    cache.delete("c").await.unwrap();
    let value = cache.get_or_set("c", || async { Ok(3) }, opts()).await.unwrap();
    assert_eq!(value, 3);
}

#[tokio::test]
async fn factory_error_with_grace_serves_stale_and_extends_l1() {
    init_tracing();
    let (cache, l1, l2) = tiered_cache("graced_error");
    plant_stale(&l2, "d", 9, Duration::from_millis(50)).await;

    let value = cache
        .get_or_set(
            "d",
            || async { Err::<i32, _>(anyhow::anyhow!("database down")) },
            opts(),
        )
        .await
        .unwrap();
    assert_eq!(value, 9);

    // The stale item was rewritten into L1 with its logical expiry pushed
    // out by the fallback duration, shielding the failing factory.
    let extended = l1.get("d").await.unwrap().unwrap();
    assert!(!extended.is_logically_expired());
    let logical = extended.logical_expires_at.unwrap();
    let remaining = logical
        .signed_duration_since(chrono::Utc::now())
        .to_std()
        .unwrap();
    assert!(remaining > Duration::from_millis(1500), "{:?}", remaining);
    assert!(remaining < Duration::from_millis(2500), "{:?}", remaining);

    // Readers inside the fallback window are served without a factory call.
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    let value = cache
        .get_or_set(
            "d",
            move || async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(0)
            },
            opts(),
        )
        .await
        .unwrap();
    assert_eq!(value, 9);
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn factory_error_without_grace_propagates() {
    init_tracing();
    let (cache, _l1, l2) = tiered_cache("ungraced_error");
    plant_stale(&l2, "d", 9, Duration::from_millis(50)).await;

    let mut options = opts();
    options.grace_period = GracePeriod::disabled();

    let result = cache
        .get_or_set(
            "d",
            || async { Err::<i32, _>(anyhow::anyhow!("database down")) },
            options,
        )
        .await;

    assert!(matches!(result, Err(CacheError::Factory(_))));
}

#[tokio::test]
async fn early_expired_hit_returns_fast_and_refreshes_in_background() {
    init_tracing();
    let (cache, l1) = l1_cache("early_refresh");

    // Preload a hit whose early-expiration mark has already passed but whose
    // logical expiry has not.
    let preload = CacheItemOptions {
        ttl: Some(Duration::from_millis(1000)),
        early_expiration_percentage: Some(0.01),
        grace_period: GracePeriod::enabled(Duration::from_millis(5000)),
        ..Default::default()
    };
    cache.get_or_set("e", || async { Ok(5) }, preload).await.unwrap();
    tokio::time::sleep(Duration::from_millis(30)).await;

    let value = cache.get_or_set("e", || async { Ok(6) }, opts()).await.unwrap();
    assert_eq!(value, 5);

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(l1.get("e").await.unwrap().unwrap().value, 6);
}

#[tokio::test]
async fn cached_value_shields_a_failing_factory() {
    init_tracing();
    let (cache, _l1) = l1_cache("shield");

    let value = cache.get_or_set("k", || async { Ok(11) }, opts()).await.unwrap();
    assert_eq!(value, 11);

    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    let value = cache
        .get_or_set(
            "k",
            move || async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err::<i32, _>(anyhow::anyhow!("must not run"))
            },
            opts(),
        )
        .await
        .unwrap();

    assert_eq!(value, 11);
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn hard_timeout_without_fallback_fails_the_call() {
    init_tracing();
    let (cache, _l1) = l1_cache("hard_timeout");

    let mut options = opts();
    options.timeouts = FactoryTimeouts {
        soft: Some(Duration::from_millis(50)),
        hard: Some(Duration::from_millis(150)),
    };

    let result = cache
        .get_or_set(
            "h",
            || async {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok(1)
            },
            options,
        )
        .await;

    assert!(matches!(result, Err(CacheError::FactoryHardTimeout { .. })));

    // The lock must have been released on the timeout path.
    let value = cache.get_or_set("h", || async { Ok(2) }, opts()).await.unwrap();
    assert_eq!(value, 2);
}

#[tokio::test]
async fn failed_factory_releases_the_lock_for_the_next_caller() {
    init_tracing();
    let (cache, _l1) = l1_cache("release_on_error");

    let result = cache
        .get_or_set("r", || async { Err::<i32, _>(anyhow::anyhow!("boom")) }, opts())
        .await;
    assert!(result.is_err());

    let value = cache.get_or_set("r", || async { Ok(4) }, opts()).await.unwrap();
    assert_eq!(value, 4);
}

#[tokio::test]
async fn l2_hit_is_promoted_into_l1() {
    init_tracing();
    let (cache, l1, l2) = tiered_cache("promotion");

    // A fresh item that only the shared tier knows about.
    let item = CacheItem::new("p", 21, &opts());
    l2.set("p", item, None).await.unwrap();
    assert!(l1.get("p").await.unwrap().is_none());

    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    let value = cache
        .get_or_set(
            "p",
            move || async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(0)
            },
            opts(),
        )
        .await
        .unwrap();

    assert_eq!(value, 21);
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert_eq!(l1.get("p").await.unwrap().unwrap().value, 21);
}

#[tokio::test]
async fn hit_and_miss_events_carry_the_store_name() {
    init_tracing();
    let (cache, _l1) = l1_cache("event_names");
    let mut rx = cache.subscribe();

    cache.get_or_set("k", || async { Ok(1) }, opts()).await.unwrap();
    cache.get_or_set("k", || async { Ok(2) }, opts()).await.unwrap();

    let mut saw_miss = false;
    let mut saw_written = false;
    let mut saw_hit = false;
    while let Ok(event) = rx.try_recv() {
        match event {
            CacheEvent::Miss { ref store, .. } => {
                assert_eq!(store, "event_names");
                saw_miss = true;
            }
            CacheEvent::Written { .. } => saw_written = true,
            CacheEvent::Hit { value, graced, .. } => {
                assert_eq!(value, 1);
                assert!(!graced);
                saw_hit = true;
            }
            CacheEvent::Deleted { .. } => {}
        }
    }
    assert!(saw_miss && saw_written && saw_hit);
}
