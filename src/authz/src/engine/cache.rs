//! Access profile cache with store-revision invalidation

use dashmap::DashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::profile::AccessProfile;

/// Cache configuration
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Maximum number of cached paths
    pub capacity: usize,

    /// Time-to-live for cached profiles
    pub ttl: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            capacity: 10_000,
            ttl: Duration::from_secs(60),
        }
    }
}

/// Cached profile tagged with the store revision read before the rules
#[derive(Clone)]
struct CachedEntry {
    profile: Arc<AccessProfile>,
    revision: u64,
    cached_at: Instant,
}

impl CachedEntry {
    fn is_expired(&self, ttl: Duration) -> bool {
        self.cached_at.elapsed() > ttl
    }
}

/// Profile cache keyed by normalized path
///
/// An entry is only served while the store still reports the revision it
/// was read under, so any rule write invalidates it before the next lookup.
pub struct ProfileCache {
    entries: Arc<DashMap<String, CachedEntry>>,
    config: CacheConfig,
    hits: AtomicUsize,
    misses: AtomicUsize,
    expirations: AtomicUsize,
    stale: AtomicUsize,
}

impl ProfileCache {
    pub fn new(config: CacheConfig) -> Self {
        Self {
            entries: Arc::new(DashMap::new()),
            config,
            hits: AtomicUsize::new(0),
            misses: AtomicUsize::new(0),
            expirations: AtomicUsize::new(0),
            stale: AtomicUsize::new(0),
        }
    }

    /// Cached profile for `path`, if still valid at `revision`
    pub fn get(&self, path: &str, revision: u64) -> Option<Arc<AccessProfile>> {
        if let Some(entry) = self.entries.get(path) {
            if entry.revision != revision {
                drop(entry);
                self.entries.remove(path);
                self.stale.fetch_add(1, Ordering::Relaxed);
                self.misses.fetch_add(1, Ordering::Relaxed);
                return None;
            }

            if entry.is_expired(self.config.ttl) {
                drop(entry);
                self.entries.remove(path);
                self.expirations.fetch_add(1, Ordering::Relaxed);
                self.misses.fetch_add(1, Ordering::Relaxed);
                return None;
            }

            self.hits.fetch_add(1, Ordering::Relaxed);
            return Some(Arc::clone(&entry.profile));
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        None
    }

    /// Store a profile read under `revision`
    pub fn put(&self, path: &str, revision: u64, profile: Arc<AccessProfile>) {
        if self.config.capacity == 0 {
            return;
        }

        if self.entries.len() >= self.config.capacity && !self.entries.contains_key(path) {
            self.evict();
        }

        self.entries.insert(
            path.to_string(),
            CachedEntry {
                profile,
                revision,
                cached_at: Instant::now(),
            },
        );
    }

    /// Drop every entry
    pub fn clear(&self) {
        self.entries.clear();
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            expirations: self.expirations.load(Ordering::Relaxed),
            stale: self.stale.load(Ordering::Relaxed),
            entries: self.entries.len(),
            max_entries: self.config.capacity,
        }
    }

    /// Drop expired entries first, then the oldest tenth of the rest
    fn evict(&self) {
        let ttl = self.config.ttl;
        self.entries.retain(|_, entry| !entry.is_expired(ttl));

        if self.entries.len() < self.config.capacity {
            return;
        }

        let mut ages: Vec<(String, Instant)> = self
            .entries
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().cached_at))
            .collect();
        ages.sort_by_key(|(_, cached_at)| *cached_at);

        let to_remove = (self.config.capacity / 10).max(1);
        for (path, _) in ages.into_iter().take(to_remove) {
            self.entries.remove(&path);
        }
    }
}

/// Cache statistics
#[derive(Debug, Clone, Default)]
pub struct CacheStats {
    pub hits: usize,
    pub misses: usize,
    pub expirations: usize,
    /// Entries dropped because the store revision moved on
    pub stale: usize,
    pub entries: usize,
    pub max_entries: usize,
}

impl CacheStats {
    /// Calculate cache hit rate
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}
