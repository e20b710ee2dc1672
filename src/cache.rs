//! TTL-bounded result cache
//!
//! Results are stored serialized, keyed `"<analytic>:<group id>"`, and are
//! fresh while `now - captured_at < ttl`. Expired and unreadable entries are
//! pruned when read and reported as misses; every write also sweeps out
//! whatever has expired. The store holds at most `capacity` entries and
//! evicts the least recently used one beyond that. Callers asking for the
//! same key while it is being computed wait for that computation instead of
//! starting their own.

use std::collections::HashMap;
use std::future::Future;
use std::num::NonZeroUsize;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use lru::LruCache;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::Result;
use crate::window::Clock;

pub fn cache_key(analytic: &str, id: Uuid) -> String {
    format!("{analytic}:{id}")
}

/// A cached value and when it was computed.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry<T> {
    pub value: T,
    pub captured_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
struct StoredEntry {
    payload: Vec<u8>,
    captured_at: DateTime<Utc>,
}

impl StoredEntry {
    fn is_expired(&self, now: DateTime<Utc>, ttl: Duration) -> bool {
        now - self.captured_at >= ttl
    }
}

pub struct ResultCache {
    ttl: Duration,
    clock: Clock,
    entries: RwLock<LruCache<String, StoredEntry>>,
    in_flight: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl ResultCache {
    /// Capacity used when the configured one is zero
    pub const DEFAULT_CAPACITY: NonZeroUsize = match NonZeroUsize::new(1000) {
        Some(capacity) => capacity,
        None => unreachable!(),
    };

    pub fn new(ttl: Duration, capacity: usize, clock: Clock) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(Self::DEFAULT_CAPACITY);
        Self {
            ttl,
            clock,
            entries: RwLock::new(LruCache::new(capacity)),
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    /// Fresh entry for `key`, pruning it if it has expired or cannot be read.
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Option<CacheEntry<T>> {
        let now = (self.clock)();
        // `LruCache::get` marks the entry as recently used
        let stored = self.entries.write().await.get(key).cloned()?;

        if stored.is_expired(now, self.ttl) {
            debug!(key, "cache entry expired");
            self.prune(key, stored.captured_at).await;
            return None;
        }

        match serde_json::from_slice(&stored.payload) {
            Ok(value) => Some(CacheEntry {
                value,
                captured_at: stored.captured_at,
            }),
            Err(error) => {
                warn!(key, %error, "discarding unreadable cache entry");
                self.prune(key, stored.captured_at).await;
                None
            }
        }
    }

    /// Stores `value` under `key`, replacing any previous entry whole.
    pub async fn put<T: Serialize>(&self, key: &str, value: &T) {
        let payload = match serde_json::to_vec(value) {
            Ok(payload) => payload,
            Err(error) => {
                warn!(key, %error, "result not cached");
                return;
            }
        };
        let now = (self.clock)();
        let entry = StoredEntry {
            payload,
            captured_at: now,
        };

        let mut entries = self.entries.write().await;
        self.sweep_expired(&mut entries, now);
        if let Some((evicted, _)) = entries.push(key.to_string(), entry) {
            if evicted != key {
                debug!(key = %evicted, "cache entry evicted");
            }
        }
    }

    pub async fn invalidate(&self, key: &str) {
        if self.entries.write().await.pop(key).is_some() {
            debug!(key, "cache entry invalidated");
        }
    }

    /// Cached value for `key`, or the result of `compute` stored under it.
    ///
    /// Failed computations are returned as-is and leave nothing cached.
    pub async fn get_or_compute<T, F, Fut>(&self, key: &str, compute: F) -> Result<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        if let Some(entry) = self.get::<T>(key).await {
            debug!(key, "cache hit");
            return Ok(entry.value);
        }

        let gate = {
            let mut in_flight = self.in_flight.lock().await;
            in_flight
                .entry(key.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };

        let result = {
            let _turn = gate.lock().await;
            match self.get::<T>(key).await {
                Some(entry) => {
                    debug!(key, "served by concurrent computation");
                    Ok(entry.value)
                }
                None => {
                    debug!(key, "cache miss");
                    match compute().await {
                        Ok(value) => {
                            self.put(key, &value).await;
                            Ok(value)
                        }
                        Err(error) => Err(error),
                    }
                }
            }
        };

        let mut in_flight = self.in_flight.lock().await;
        // Only the map and this call still hold the gate: nobody is waiting.
        if Arc::strong_count(&gate) <= 2 {
            in_flight.remove(key);
        }
        result
    }

    /// Removes `key` unless it was overwritten since it was read.
    async fn prune(&self, key: &str, captured_at: DateTime<Utc>) {
        let mut entries = self.entries.write().await;
        if entries
            .peek(key)
            .is_some_and(|entry| entry.captured_at == captured_at)
        {
            entries.pop(key);
        }
    }

    fn sweep_expired(&self, entries: &mut LruCache<String, StoredEntry>, now: DateTime<Utc>) {
        let expired: Vec<String> = entries
            .iter()
            .filter(|(_, entry)| entry.is_expired(now, self.ttl))
            .map(|(key, _)| key.clone())
            .collect();
        for key in &expired {
            entries.pop(key);
        }
        if !expired.is_empty() {
            debug!(removed = expired.len(), "expired cache entries swept");
        }
    }

    #[cfg(test)]
    async fn put_raw(&self, key: &str, payload: Vec<u8>) {
        let entry = StoredEntry {
            payload,
            captured_at: (self.clock)(),
        };
        self.entries.write().await.push(key.to_string(), entry);
    }

    #[cfg(test)]
    async fn len(&self) -> usize {
        self.entries.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AnalyticsError;
    use crate::fixtures::{fixed_now, ManualClock};
    use crate::models::HealthMetric;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn cache(clock: &ManualClock) -> ResultCache {
        ResultCache::new(Duration::minutes(5), 100, clock.clock())
    }

    #[tokio::test]
    async fn round_trip_within_ttl() {
        let clock = ManualClock::new(fixed_now());
        let cache = cache(&clock);
        let key = cache_key("engagement-forecast", Uuid::new_v4());

        cache.put(&key, &vec![1u32, 2, 3]).await;
        clock.advance(Duration::seconds(299));

        let entry = cache.get::<Vec<u32>>(&key).await.unwrap();
        assert_eq!(entry.value, vec![1, 2, 3]);
        assert_eq!(entry.captured_at, fixed_now());
    }

    #[tokio::test]
    async fn float_results_come_back_bit_for_bit() {
        let clock = ManualClock::new(fixed_now());
        let cache = cache(&clock);
        let trend = vec![0.1 + 0.2, 1.0 / 3.0, 2f64.sqrt(), 5e-324, f64::MAX, 37.5];
        let metric = HealthMetric {
            current: 2.0 / 3.0,
            change_rate: Some(-12),
            trend,
        };

        cache.put("health-trends:group", &metric).await;
        let entry = cache.get::<HealthMetric>("health-trends:group").await.unwrap();

        assert_eq!(entry.value, metric);
        for (cached, original) in entry.value.trend.iter().zip(&metric.trend) {
            assert_eq!(cached.to_bits(), original.to_bits());
        }
    }

    #[tokio::test]
    async fn expired_entries_are_pruned_on_read() {
        let clock = ManualClock::new(fixed_now());
        let cache = cache(&clock);

        cache.put("k", &42u32).await;
        clock.advance(Duration::minutes(5));

        assert_eq!(cache.get::<u32>("k").await, None);
        assert_eq!(cache.len().await, 0);
    }

    #[tokio::test]
    async fn writes_sweep_out_expired_entries() {
        let clock = ManualClock::new(fixed_now());
        let cache = cache(&clock);

        for index in 0..50 {
            cache.put(&format!("stale-{index}"), &index).await;
        }
        clock.advance(Duration::days(30));
        cache.put("fresh", &1u32).await;

        assert_eq!(cache.len().await, 1);
        assert_eq!(cache.get::<u32>("fresh").await.map(|entry| entry.value), Some(1));
    }

    #[tokio::test]
    async fn capacity_evicts_least_recently_used() {
        let clock = ManualClock::new(fixed_now());
        let cache = ResultCache::new(Duration::minutes(5), 2, clock.clock());

        cache.put("a", &1u32).await;
        cache.put("b", &2u32).await;
        assert!(cache.get::<u32>("a").await.is_some());
        cache.put("c", &3u32).await;

        assert_eq!(cache.len().await, 2);
        assert!(cache.get::<u32>("b").await.is_none());
        assert!(cache.get::<u32>("a").await.is_some());
        assert!(cache.get::<u32>("c").await.is_some());
    }

    #[tokio::test]
    async fn unreadable_entries_are_misses() {
        let clock = ManualClock::new(fixed_now());
        let cache = cache(&clock);

        cache.put_raw("k", b"{not json".to_vec()).await;
        assert_eq!(cache.get::<u32>("k").await, None);
        assert_eq!(cache.len().await, 0);

        let value = cache
            .get_or_compute("k", || async { Ok(7u32) })
            .await
            .unwrap();
        assert_eq!(value, 7);
    }

    #[tokio::test]
    async fn recomputes_only_after_expiry() {
        let clock = ManualClock::new(fixed_now());
        let cache = cache(&clock);
        let runs = AtomicUsize::new(0);

        for _ in 0..3 {
            let value = cache
                .get_or_compute("k", || async {
                    Ok(runs.fetch_add(1, Ordering::SeqCst) as u32)
                })
                .await
                .unwrap();
            assert_eq!(value, 0);
        }
        clock.advance(Duration::minutes(6));
        let value = cache
            .get_or_compute("k", || async { Ok(runs.fetch_add(1, Ordering::SeqCst) as u32) })
            .await
            .unwrap();

        assert_eq!(value, 1);
        assert_eq!(runs.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn failures_are_not_cached() {
        let clock = ManualClock::new(fixed_now());
        let cache = cache(&clock);

        let failed: Result<u32> = cache
            .get_or_compute("k", || async {
                Err(AnalyticsError::Config("boom".to_string()))
            })
            .await;
        assert!(failed.is_err());
        assert_eq!(cache.len().await, 0);
    }

    #[tokio::test]
    async fn concurrent_callers_share_one_computation() {
        let clock = ManualClock::new(fixed_now());
        let cache = Arc::new(cache(&clock));
        let runs = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let cache = cache.clone();
            let runs = runs.clone();
            handles.push(tokio::spawn(async move {
                cache
                    .get_or_compute("k", || async move {
                        runs.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
                        Ok(5u32)
                    })
                    .await
            }));
        }
        for handle in handles {
            assert_eq!(handle.await.unwrap().unwrap(), 5);
        }

        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert!(cache.in_flight.lock().await.is_empty());
    }

    #[tokio::test]
    async fn invalidate_forces_recompute() {
        let clock = ManualClock::new(fixed_now());
        let cache = cache(&clock);

        cache.put("k", &1u32).await;
        cache.invalidate("k").await;
        let value = cache
            .get_or_compute("k", || async { Ok(2u32) })
            .await
            .unwrap();
        assert_eq!(value, 2);
    }
}
