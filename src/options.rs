use std::time::Duration;

/// Stale-serving policy past logical expiration.
#[derive(Debug, Clone, Default)]
pub struct GracePeriod {
    pub enabled: bool,
    /// How long past logical expiration a stale value may still be served.
    pub duration: Duration,
    /// When set, a graced return rewrites the stale item into L1 with its
    /// logical expiry pushed this far out, shielding the failing factory.
    pub fallback_duration: Option<Duration>,
}

impl GracePeriod {
    pub fn enabled(duration: Duration) -> Self {
        Self {
            enabled: true,
            duration,
            fallback_duration: None,
        }
    }

    pub fn disabled() -> Self {
        Self::default()
    }

    pub fn with_fallback(mut self, duration: Duration) -> Self {
        self.fallback_duration = Some(duration);
        self
    }
}

/// Deadlines for factory execution. Soft permits graceful degradation when a
/// fallback value exists; hard terminates the call.
#[derive(Debug, Clone, Default)]
pub struct FactoryTimeouts {
    pub soft: Option<Duration>,
    pub hard: Option<Duration>,
}

/// Resolved per-call options for a get-or-compute operation. Immutable once
/// built; cloned into background tasks as needed.
#[derive(Debug, Clone)]
pub struct CacheItemOptions {
    /// Opaque operation id, attached to every log line of the call.
    pub id: String,
    /// Logical lifetime of the value after a write.
    pub ttl: Option<Duration>,
    /// Fraction of the ttl (0..1, exclusive) after which a hit triggers a
    /// background refresh.
    pub early_expiration_percentage: Option<f64>,
    pub grace_period: GracePeriod,
    pub timeouts: FactoryTimeouts,
    /// Explicit upper bound for lock acquisition, overriding the derived one.
    pub lock_timeout: Option<Duration>,
}

impl Default for CacheItemOptions {
    fn default() -> Self {
        Self {
            id: format!("{:08x}", fastrand::u32(..)),
            ttl: Some(Duration::from_secs(30)),
            early_expiration_percentage: None,
            grace_period: GracePeriod::default(),
            timeouts: FactoryTimeouts::default(),
            lock_timeout: None,
        }
    }
}

impl CacheItemOptions {
    /// How long a caller may wait for the per-key lock.
    ///
    /// An explicit `lock_timeout` always wins. Otherwise a caller holding a
    /// graced fallback only waits the soft timeout before degrading to the
    /// stale value, while a caller with nothing to fall back on waits the
    /// hard timeout. `None` means wait indefinitely.
    pub fn applicable_lock_timeout(&self, has_fallback: bool) -> Option<Duration> {
        if self.lock_timeout.is_some() {
            return self.lock_timeout;
        }
        if has_fallback && self.grace_period.enabled {
            self.timeouts.soft
        } else {
            self.timeouts.hard
        }
    }
}
