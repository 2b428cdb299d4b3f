//! In-memory run cache keyed by (config hash, candle range hash).
//!
//! Sits in front of the engine so a search that revisits a parameter set, or
//! two walk-forward windows that share a range, pay for one run only.
//! Bounded by entry count with least-recently-used eviction; entries older
//! than the optional TTL miss and are dropped on access.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use edgelab_core::engine::RunResult;
use edgelab_core::fingerprint::RunKey;
use serde::{Deserialize, Serialize};

/// Cache sizing, as read from a job spec.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub enabled: bool,
    pub capacity: usize,
    /// Seconds an entry stays valid; `None` keeps entries until evicted.
    pub ttl_secs: Option<u64>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            capacity: 4_096,
            ttl_secs: None,
        }
    }
}

/// Counter snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub expirations: u64,
    pub entries: usize,
}

impl CacheStats {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            return 0.0;
        }
        self.hits as f64 / total as f64
    }
}

struct Entry {
    run: Arc<RunResult>,
    inserted: Instant,
    last_used: u64,
}

#[derive(Default)]
struct Inner {
    entries: HashMap<RunKey, Entry>,
    tick: u64,
}

pub struct RunCache {
    inner: Mutex<Inner>,
    capacity: usize,
    ttl: Option<Duration>,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    expirations: AtomicU64,
}

impl RunCache {
    /// `capacity` is clamped to at least one entry.
    pub fn new(capacity: usize, ttl: Option<Duration>) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            capacity: capacity.max(1),
            ttl,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
            expirations: AtomicU64::new(0),
        }
    }

    pub fn from_config(config: &CacheConfig) -> Option<Self> {
        config
            .enabled
            .then(|| Self::new(config.capacity, config.ttl_secs.map(Duration::from_secs)))
    }

    // A panicking evaluation never holds this lock, so poisoning only means
    // another thread died mid-insert; the map itself is still consistent.
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn expired(&self, entry: &Entry) -> bool {
        self.ttl.is_some_and(|ttl| entry.inserted.elapsed() >= ttl)
    }

    pub fn get(&self, key: &RunKey) -> Option<Arc<RunResult>> {
        let mut inner = self.lock();
        inner.tick += 1;
        let tick = inner.tick;
        let expired = match inner.entries.get_mut(key) {
            Some(entry) if !self.expired(entry) => {
                entry.last_used = tick;
                self.hits.fetch_add(1, Ordering::Relaxed);
                return Some(Arc::clone(&entry.run));
            }
            Some(_) => true,
            None => false,
        };
        if expired {
            inner.entries.remove(key);
            self.expirations.fetch_add(1, Ordering::Relaxed);
        }
        self.misses.fetch_add(1, Ordering::Relaxed);
        None
    }

    /// Insert `run`, evicting the least recently used entry at capacity.
    /// Returns the cached `Arc`: an existing live entry wins a race.
    pub fn insert(&self, key: RunKey, run: Arc<RunResult>) -> Arc<RunResult> {
        let mut inner = self.lock();
        inner.tick += 1;
        let tick = inner.tick;
        if let Some(entry) = inner.entries.get_mut(&key) {
            if !self.expired(entry) {
                entry.last_used = tick;
                return Arc::clone(&entry.run);
            }
        }
        if !inner.entries.contains_key(&key) && inner.entries.len() >= self.capacity {
            let victim = inner
                .entries
                .iter()
                .min_by_key(|(_, e)| e.last_used)
                .map(|(k, _)| k.clone());
            if let Some(victim) = victim {
                inner.entries.remove(&victim);
                self.evictions.fetch_add(1, Ordering::Relaxed);
                tracing::trace!(key = %victim, "run cache eviction");
            }
        }
        inner.entries.insert(
            key,
            Entry {
                run: Arc::clone(&run),
                inserted: Instant::now(),
                last_used: tick,
            },
        );
        run
    }

    /// Cached run for `key`, or compute it with `f` outside the lock.
    ///
    /// Two threads missing on the same key may both compute; the first insert
    /// wins and both receive the same `Arc`.
    pub fn get_or_compute<E>(
        &self,
        key: RunKey,
        f: impl FnOnce() -> Result<RunResult, E>,
    ) -> Result<Arc<RunResult>, E> {
        if let Some(hit) = self.get(&key) {
            return Ok(hit);
        }
        let run = Arc::new(f()?);
        Ok(self.insert(key, run))
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.lock().entries.clear();
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            expirations: self.expirations.load(Ordering::Relaxed),
            entries: self.len(),
        }
    }
}

impl std::fmt::Debug for RunCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunCache")
            .field("capacity", &self.capacity)
            .field("ttl", &self.ttl)
            .field("stats", &self.stats())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use edgelab_core::domain::{ConfigHash, RangeHash};

    fn key(i: u8) -> RunKey {
        RunKey {
            config: ConfigHash::from_bytes(&[i]),
            range: RangeHash(String::from("r")),
        }
    }

    fn run(final_equity: f64) -> RunResult {
        RunResult {
            trades: Vec::new(),
            equity_curve: Vec::new(),
            initial_capital: 10_000.0,
            final_equity,
        }
    }

    #[test]
    fn hit_returns_same_arc() {
        let cache = RunCache::new(8, None);
        let first = cache
            .get_or_compute(key(1), || Ok::<_, ()>(run(1.0)))
            .unwrap();
        let second = cache
            .get_or_compute(key(1), || -> Result<RunResult, ()> {
                panic!("must not recompute")
            })
            .unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        let stats = cache.stats();
        assert_eq!((stats.hits, stats.misses), (1, 1));
    }

    #[test]
    fn evicts_least_recently_used() {
        let cache = RunCache::new(2, None);
        cache.insert(key(1), Arc::new(run(1.0)));
        cache.insert(key(2), Arc::new(run(2.0)));
        // Touch 1 so 2 becomes the LRU entry.
        assert!(cache.get(&key(1)).is_some());
        cache.insert(key(3), Arc::new(run(3.0)));
        assert!(cache.get(&key(2)).is_none());
        assert!(cache.get(&key(1)).is_some());
        assert!(cache.get(&key(3)).is_some());
        assert_eq!(cache.stats().evictions, 1);
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn expired_entries_miss() {
        let cache = RunCache::new(4, Some(Duration::ZERO));
        cache.insert(key(1), Arc::new(run(1.0)));
        assert!(cache.get(&key(1)).is_none());
        let stats = cache.stats();
        assert_eq!(stats.expirations, 1);
        assert_eq!(stats.entries, 0);
    }

    #[test]
    fn compute_errors_are_not_cached() {
        let cache = RunCache::new(4, None);
        let err = cache.get_or_compute(key(1), || Err::<RunResult, _>("boom"));
        assert_eq!(err.unwrap_err(), "boom");
        assert!(cache.is_empty());
    }

    #[test]
    fn disabled_config_builds_no_cache() {
        let config = CacheConfig {
            enabled: false,
            ..CacheConfig::default()
        };
        assert!(RunCache::from_config(&config).is_none());
        assert!(RunCache::from_config(&CacheConfig::default()).is_some());
    }
}
