use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::debug;

use crate::Result;
use crate::device::{DeviceId, DeviceInfo};

struct CacheEntry<V> {
    value: V,
    expires_at: Instant,
}

impl<V> CacheEntry<V> {
    fn is_live(&self, now: Instant) -> bool {
        now < self.expires_at
    }
}

/// In-memory cache where every entry carries its own time-to-live.
///
/// A read at or past the expiry is a miss, never a stale hit. Map mutation
/// is serialized by the internal mutex; the compute of `get_or_compute`
/// runs outside it, so two tasks racing the same cold key may both compute
/// and the later insert wins. That bounds duplicate work to the racers of
/// one miss window without a single-flight registry.
pub struct TtlCache<K, V> {
    entries: Mutex<HashMap<K, CacheEntry<V>>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
}

impl<K, V> TtlCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub fn get(&self, key: &K) -> Option<V> {
        let mut entries = self.entries.lock().unwrap();
        let now = Instant::now();
        match entries.get(key) {
            Some(entry) if entry.is_live(now) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(entry.value.clone())
            }
            Some(_) => {
                entries.remove(key);
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    pub fn insert(&self, key: K, value: V, ttl: Duration) {
        let entry = CacheEntry {
            value,
            expires_at: Instant::now() + ttl,
        };
        self.entries.lock().unwrap().insert(key, entry);
    }

    /// Cached value if live, otherwise run `compute`, store its result for
    /// `ttl` and return it. A failed compute caches nothing.
    pub async fn get_or_compute<F, Fut>(&self, key: K, ttl: Duration, compute: F) -> Result<V>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V>>,
    {
        if let Some(value) = self.get(&key) {
            return Ok(value);
        }
        let value = compute().await?;
        self.insert(key, value.clone(), ttl);
        Ok(value)
    }

    /// Drop an entry immediately, regardless of remaining ttl.
    pub fn invalidate(&self, key: &K) -> bool {
        self.entries.lock().unwrap().remove(key).is_some()
    }

    /// Drop every entry whose key matches the predicate; returns how many.
    pub fn invalidate_matching(&self, predicate: impl Fn(&K) -> bool) -> usize {
        let mut entries = self.entries.lock().unwrap();
        let before = entries.len();
        entries.retain(|key, _| !predicate(key));
        before - entries.len()
    }

    /// Sweep dead entries; returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let mut entries = self.entries.lock().unwrap();
        let now = Instant::now();
        let before = entries.len();
        entries.retain(|_, entry| entry.is_live(now));
        let removed = before - entries.len();
        if removed > 0 {
            debug!(removed, "purged expired cache entries");
        }
        removed
    }

    pub fn clear(&self) {
        self.entries.lock().unwrap().clear();
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.entries.lock().unwrap().len(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }
}

impl<K, V> Default for TtlCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

/// Memoizes expensive per-device queries, keyed by device and query name.
pub struct DeviceInfoCache {
    inner: TtlCache<(DeviceId, String), DeviceInfo>,
    default_ttl: Duration,
}

impl DeviceInfoCache {
    pub fn new(default_ttl: Duration) -> Self {
        Self {
            inner: TtlCache::new(),
            default_ttl,
        }
    }

    pub async fn get_or_fetch<F, Fut>(
        &self,
        device: &DeviceId,
        query: &str,
        fetch: F,
    ) -> Result<DeviceInfo>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<DeviceInfo>>,
    {
        self.inner
            .get_or_compute((device.clone(), query.to_string()), self.default_ttl, fetch)
            .await
    }

    /// Forget everything known about one device.
    pub fn invalidate_device(&self, device: &DeviceId) -> usize {
        self.inner.invalidate_matching(|(id, _)| id == device)
    }

    pub fn invalidate_query(&self, device: &DeviceId, query: &str) -> bool {
        self.inner
            .invalidate(&(device.clone(), query.to_string()))
    }

    pub fn clear(&self) {
        self.inner.clear();
    }

    pub fn stats(&self) -> CacheStats {
        self.inner.stats()
    }
}
