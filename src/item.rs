use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::options::{CacheItemOptions, GracePeriod};

/// One cached record as stored in either tier.
///
/// Carries two expiration clocks: the logical clock decides when the value is
/// stale for correctness purposes, the physical clock decides when the backing
/// driver drops the record entirely. The window between the two is what makes
/// grace-period serving possible. Items are immutable after construction;
/// [`CacheItem::apply_fallback_duration`] returns a new item.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheItem<T> {
    pub key: String,
    pub value: T,
    pub created_at: DateTime<Utc>,
    pub logical_expires_at: Option<DateTime<Utc>>,
    pub physical_expires_at: Option<DateTime<Utc>>,
    pub early_expires_at: Option<DateTime<Utc>>,
}

/// Saturating `base + by`, clamped to the far future on overflow.
fn shift(base: DateTime<Utc>, by: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(by)
        .ok()
        .and_then(|delta| base.checked_add_signed(delta))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

impl<T> CacheItem<T> {
    /// Build an item from a freshly produced value and the resolved options.
    ///
    /// With grace enabled the physical expiry sits `grace.duration` past the
    /// logical expiry so stale records survive long enough to be served as
    /// fallbacks. Without a ttl the item never expires.
    pub fn new(key: &str, value: T, options: &CacheItemOptions) -> Self {
        let created_at = Utc::now();

        let logical_expires_at = options.ttl.map(|ttl| shift(created_at, ttl));
        let physical_expires_at = logical_expires_at.map(|logical| {
            if options.grace_period.enabled {
                shift(logical, options.grace_period.duration)
            } else {
                logical
            }
        });
        let early_expires_at = match (options.ttl, options.early_expiration_percentage) {
            (Some(ttl), Some(pct)) if pct > 0.0 && pct < 1.0 => {
                Some(shift(created_at, ttl.mul_f64(pct)))
            }
            _ => None,
        };

        Self {
            key: key.to_string(),
            value,
            created_at,
            logical_expires_at,
            physical_expires_at,
            early_expires_at,
        }
    }

    pub fn is_logically_expired(&self) -> bool {
        self.logical_expires_at
            .map(|at| Utc::now() >= at)
            .unwrap_or(false)
    }

    /// Inside the background-refresh window: past the early mark but still
    /// logically fresh.
    pub fn is_early_expired(&self) -> bool {
        match self.early_expires_at {
            Some(at) => Utc::now() >= at && !self.is_logically_expired(),
            None => false,
        }
    }

    /// Logically expired but still acceptable as a stale fallback.
    pub fn is_graced(&self, grace: &GracePeriod) -> bool {
        if !grace.enabled {
            return false;
        }
        match self.logical_expires_at {
            Some(logical) => {
                let now = Utc::now();
                now >= logical && now < shift(logical, grace.duration)
            }
            None => false,
        }
    }

    /// Remaining time until the driver may drop the record. `None` means the
    /// item has no physical expiry.
    pub fn physical_ttl(&self) -> Option<Duration> {
        self.physical_expires_at.map(|at| {
            at.signed_duration_since(Utc::now())
                .to_std()
                .unwrap_or(Duration::ZERO)
        })
    }

    /// New item whose logical expiry is pushed `duration` into the future so
    /// readers inside that window do not re-hit a failing factory. The
    /// physical expiry is bumped to at least the new logical expiry; the early
    /// refresh mark is dropped.
    pub fn apply_fallback_duration(&self, duration: Duration) -> Self
    where
        T: Clone,
    {
        let logical = shift(Utc::now(), duration);
        let physical = match self.physical_expires_at {
            Some(physical) if physical > logical => physical,
            _ => logical,
        };

        Self {
            key: self.key.clone(),
            value: self.value.clone(),
            created_at: self.created_at,
            logical_expires_at: Some(logical),
            physical_expires_at: Some(physical),
            early_expires_at: None,
        }
    }
}
