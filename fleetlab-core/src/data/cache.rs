//! In-memory response cache with per-entry TTL.
//!
//! Shared by every provider client for the lifetime of the process.
//!
//! Features:
//! - `DashMap` storage: a shard lock is held only for one map read or
//!   write, never across a network call
//! - Entries past their TTL are never returned; they are evicted on access
//!   or by `prune()`
//! - Bounded capacity: a full cache prunes expired entries, then evicts its
//!   oldest entry
//! - `get_or_fetch` coalesces concurrent misses on one key into a single
//!   upstream call

use dashmap::DashMap;
use serde::Serialize;
use serde_json::Value;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};

use super::provider::ProviderError;

/// Default entry limit.
pub const DEFAULT_MAX_ENTRIES: usize = 100_000;

/// Cache key: provider name plus normalized request parameters.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub provider: String,
    pub params: String,
}

impl CacheKey {
    pub fn new(provider: impl Into<String>, params: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            params: params.into(),
        }
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.provider, self.params)
    }
}

/// A cached response payload.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub value: Value,
    pub inserted_at: Instant,
    pub ttl: Duration,
}

impl CacheEntry {
    /// Fresh while age < ttl.
    pub fn is_fresh(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.inserted_at) < self.ttl
    }
}

/// Hit/miss counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub inserts: u64,
    pub evictions: u64,
    /// Callers that waited on another caller's fetch instead of calling out.
    pub coalesced: u64,
}

impl CacheStats {
    pub fn hit_rate(&self) -> f64 {
        let lookups = self.hits + self.misses;
        if lookups == 0 {
            0.0
        } else {
            self.hits as f64 / lookups as f64
        }
    }
}

type Flight = Arc<OnceLock<Result<Value, ProviderError>>>;

/// Thread-safe key → response store with TTL.
pub struct ResponseCache {
    entries: DashMap<CacheKey, CacheEntry>,
    in_flight: DashMap<CacheKey, Flight>,
    max_entries: usize,
    enabled: bool,
    hits: AtomicU64,
    misses: AtomicU64,
    inserts: AtomicU64,
    evictions: AtomicU64,
    coalesced: AtomicU64,
}

impl ResponseCache {
    pub fn new(max_entries: usize) -> Self {
        Self::build(max_entries, true)
    }

    /// A cache that stores nothing and always misses.
    pub fn disabled() -> Self {
        Self::build(0, false)
    }

    fn build(max_entries: usize, enabled: bool) -> Self {
        Self {
            entries: DashMap::new(),
            in_flight: DashMap::new(),
            max_entries: max_entries.max(1),
            enabled,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            inserts: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
            coalesced: AtomicU64::new(0),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Fresh value for `key`, if any. Expired entries are evicted here.
    pub fn get(&self, key: &CacheKey) -> Option<Value> {
        if !self.enabled {
            self.misses.fetch_add(1, Ordering::Relaxed);
            return None;
        }

        let now = Instant::now();
        // the read guard must be gone before remove_if takes the write lock
        let lookup = self
            .entries
            .get(key)
            .map(|entry| entry.value().is_fresh(now).then(|| entry.value().value.clone()));

        let found = match lookup {
            Some(Some(value)) => Some(value),
            Some(None) => {
                if self.entries.remove_if(key, |_, e| !e.is_fresh(now)).is_some() {
                    self.evictions.fetch_add(1, Ordering::Relaxed);
                }
                None
            }
            None => None,
        };

        match found {
            Some(_) => self.hits.fetch_add(1, Ordering::Relaxed),
            None => self.misses.fetch_add(1, Ordering::Relaxed),
        };
        found
    }

    /// Insert or overwrite `key`.
    pub fn put(&self, key: CacheKey, value: Value, ttl: Duration) {
        if !self.enabled || ttl.is_zero() {
            return;
        }

        if !self.entries.contains_key(&key) && self.entries.len() >= self.max_entries {
            let evicted = self.make_room();
            self.evictions.fetch_add(evicted as u64, Ordering::Relaxed);
        }

        self.entries.insert(
            key,
            CacheEntry {
                value,
                inserted_at: Instant::now(),
                ttl,
            },
        );
        self.inserts.fetch_add(1, Ordering::Relaxed);
    }

    /// Cached value for `key`, or the result of `fetch` stored under it.
    ///
    /// Concurrent callers missing on the same key share one `fetch`: the
    /// first runs it, the rest block until it finishes and receive the same
    /// result. Errors reach every waiter but are never stored.
    pub fn get_or_fetch<F>(
        &self,
        key: &CacheKey,
        ttl: Duration,
        fetch: F,
    ) -> Result<Value, ProviderError>
    where
        F: FnOnce() -> Result<Value, ProviderError>,
    {
        if let Some(value) = self.get(key) {
            return Ok(value);
        }
        if !self.enabled {
            return fetch();
        }

        let flight: Flight = Arc::clone(&self.in_flight.entry(key.clone()).or_default());
        let mut leader = false;
        let result = flight
            .get_or_init(|| {
                leader = true;
                // a previous leader may have stored the value after our miss
                if let Some(value) = self.peek(key) {
                    return Ok(value);
                }
                fetch()
            })
            .clone();

        if leader {
            if let Ok(value) = &result {
                self.put(key.clone(), value.clone(), ttl);
            }
            // stored before removal, so a late caller finds one or the other
            self.in_flight.remove_if(key, |_, f| Arc::ptr_eq(f, &flight));
        } else {
            self.coalesced.fetch_add(1, Ordering::Relaxed);
        }
        result
    }

    /// Fresh value without touching the counters.
    fn peek(&self, key: &CacheKey) -> Option<Value> {
        let now = Instant::now();
        self.entries
            .get(key)
            .and_then(|entry| entry.value().is_fresh(now).then(|| entry.value().value.clone()))
    }

    pub fn invalidate(&self, key: &CacheKey) {
        self.entries.remove(key);
    }

    pub fn clear(&self) {
        self.entries.clear();
    }

    /// Remove every expired entry. Returns the number removed.
    pub fn prune(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.is_fresh(now));
        let removed = before.saturating_sub(self.entries.len());
        self.evictions.fetch_add(removed as u64, Ordering::Relaxed);
        removed
    }

    /// Drop expired entries; if still full, drop the oldest.
    fn make_room(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.is_fresh(now));
        let mut evicted = before.saturating_sub(self.entries.len());

        while self.entries.len() >= self.max_entries {
            let oldest = self
                .entries
                .iter()
                .min_by_key(|entry| entry.value().inserted_at)
                .map(|entry| entry.key().clone());
            match oldest {
                Some(k) => {
                    if self.entries.remove(&k).is_some() {
                        evicted += 1;
                    }
                }
                None => break,
            }
        }
        evicted
    }

    /// Number of stored entries, including expired ones not yet evicted.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            inserts: self.inserts.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            coalesced: self.coalesced.load(Ordering::Relaxed),
        }
    }
}

impl Default for ResponseCache {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ENTRIES)
    }
}

impl fmt::Debug for ResponseCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResponseCache")
            .field("enabled", &self.enabled)
            .field("max_entries", &self.max_entries)
            .field("stats", &self.stats())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;
    use std::sync::{Arc, Barrier};
    use std::thread;

    fn key(s: &str) -> CacheKey {
        CacheKey::new("test", s)
    }

    #[test]
    fn put_then_get_hits() {
        let cache = ResponseCache::default();
        cache.put(key("a"), json!({"make": "Ford"}), Duration::from_secs(60));
        assert_eq!(cache.get(&key("a")), Some(json!({"make": "Ford"})));
        assert_eq!(cache.stats().hits, 1);
    }

    #[test]
    fn miss_on_unknown_key() {
        let cache = ResponseCache::default();
        assert_eq!(cache.get(&key("nope")), None);
        assert_eq!(cache.stats().misses, 1);
    }

    #[test]
    fn expired_entry_is_absent() {
        let cache = ResponseCache::default();
        cache.put(key("a"), json!(1), Duration::from_millis(10));
        assert!(cache.get(&key("a")).is_some());
        thread::sleep(Duration::from_millis(15));
        assert_eq!(cache.get(&key("a")), None);
        // evicted on access
        assert_eq!(cache.len(), 0);
    }

    #[test]
    fn put_overwrites() {
        let cache = ResponseCache::default();
        cache.put(key("a"), json!(1), Duration::from_secs(60));
        cache.put(key("a"), json!(2), Duration::from_secs(60));
        assert_eq!(cache.get(&key("a")), Some(json!(2)));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn keys_differ_by_provider() {
        let cache = ResponseCache::default();
        cache.put(CacheKey::new("vin", "X"), json!(1), Duration::from_secs(60));
        assert_eq!(cache.get(&CacheKey::new("fuel", "X")), None);
    }

    #[test]
    fn invalidate_and_clear() {
        let cache = ResponseCache::default();
        cache.put(key("a"), json!(1), Duration::from_secs(60));
        cache.put(key("b"), json!(2), Duration::from_secs(60));
        cache.invalidate(&key("a"));
        assert_eq!(cache.get(&key("a")), None);
        assert_eq!(cache.len(), 1);
        cache.clear();
        assert!(cache.is_empty());
    }

    #[test]
    fn prune_removes_only_expired() {
        let cache = ResponseCache::default();
        cache.put(key("short"), json!(1), Duration::from_millis(5));
        cache.put(key("long"), json!(2), Duration::from_secs(60));
        thread::sleep(Duration::from_millis(10));
        assert_eq!(cache.prune(), 1);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn capacity_evicts_oldest() {
        let cache = ResponseCache::new(3);
        for i in 0..5 {
            cache.put(key(&i.to_string()), json!(i), Duration::from_secs(60));
            thread::sleep(Duration::from_millis(1));
        }
        assert_eq!(cache.len(), 3);
        assert_eq!(cache.stats().evictions, 2);
        assert_eq!(cache.get(&key("0")), None);
        assert_eq!(cache.get(&key("1")), None);
        assert_eq!(cache.get(&key("4")), Some(json!(4)));
    }

    #[test]
    fn full_cache_drops_expired_before_live() {
        let cache = ResponseCache::new(2);
        cache.put(key("stale"), json!(0), Duration::from_millis(5));
        thread::sleep(Duration::from_millis(2));
        cache.put(key("live"), json!(1), Duration::from_secs(60));
        thread::sleep(Duration::from_millis(10));
        cache.put(key("new"), json!(2), Duration::from_secs(60));
        assert_eq!(cache.get(&key("live")), Some(json!(1)));
        assert_eq!(cache.get(&key("new")), Some(json!(2)));
    }

    #[test]
    fn disabled_cache_always_misses() {
        let cache = ResponseCache::disabled();
        cache.put(key("a"), json!(1), Duration::from_secs(60));
        assert_eq!(cache.get(&key("a")), None);
        assert!(cache.is_empty());
    }

    #[test]
    fn get_or_fetch_stores_success_only() {
        let cache = ResponseCache::default();
        let err: Result<Value, _> = cache.get_or_fetch(&key("a"), Duration::from_secs(60), || {
            Err(ProviderError::Network("reset".into()))
        });
        assert!(err.is_err());
        assert!(cache.is_empty());

        let ok = cache.get_or_fetch(&key("a"), Duration::from_secs(60), || Ok(json!(7)));
        assert_eq!(ok, Ok(json!(7)));
        let again = cache.get_or_fetch(&key("a"), Duration::from_secs(60), || {
            panic!("should be served from the cache")
        });
        assert_eq!(again, Ok(json!(7)));
    }

    #[test]
    fn concurrent_misses_share_one_fetch() {
        let cache = Arc::new(ResponseCache::default());
        let calls = Arc::new(AtomicUsize::new(0));
        let barrier = Arc::new(Barrier::new(8));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let cache = Arc::clone(&cache);
                let calls = Arc::clone(&calls);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    cache.get_or_fetch(&key("menu"), Duration::from_secs(60), || {
                        calls.fetch_add(1, Ordering::SeqCst);
                        thread::sleep(Duration::from_millis(100));
                        Ok(json!(["Ford"]))
                    })
                })
            })
            .collect();
        for h in handles {
            assert_eq!(h.join().unwrap(), Ok(json!(["Ford"])));
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(cache.stats().inserts, 1);
    }

    #[test]
    fn disabled_cache_never_coalesces() {
        let cache = ResponseCache::disabled();
        let calls = AtomicUsize::new(0);
        for _ in 0..3 {
            let _ = cache.get_or_fetch(&key("a"), Duration::from_secs(60), || {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(json!(1))
            });
        }
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn concurrent_readers_see_whole_values() {
        let cache = Arc::new(ResponseCache::default());
        let k = key("shared");
        cache.put(k.clone(), json!({"v": 0, "w": 0}), Duration::from_secs(60));

        let handles: Vec<_> = (0..8)
            .map(|t| {
                let cache = Arc::clone(&cache);
                let k = k.clone();
                thread::spawn(move || {
                    for i in 0..200 {
                        if t % 2 == 0 {
                            cache.put(k.clone(), json!({"v": i, "w": i}), Duration::from_secs(60));
                        } else if let Some(v) = cache.get(&k) {
                            assert_eq!(v["v"], v["w"]);
                        }
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
    }
}
