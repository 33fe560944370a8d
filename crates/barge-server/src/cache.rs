//! Fingerprinted result cache for the browse API.
//!
//! Keys include the latest commit OID of the ref being browsed, so entries
//! invalidate themselves on content change; the TTL is a year-long backstop
//! on top of that.

use barge_git::Oid;
use lru::LruCache;
use parking_lot::Mutex;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Cache tuning knobs.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Maximum number of cached results.
    pub max_entries: usize,
    /// Time-to-live per entry.
    pub ttl: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: 4096,
            // The OID in the key already invalidates on change.
            ttl: Duration::from_secs(365 * 24 * 60 * 60),
        }
    }
}

/// Hit/miss counters.
#[derive(Debug, Clone, Copy, Default)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
}

struct Entry {
    bytes: Vec<u8>,
    inserted: Instant,
}

/// LRU-bounded, TTL'd key→bytes cache.
pub struct ResultCache {
    entries: Mutex<LruCache<String, Entry>>,
    ttl: Duration,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl ResultCache {
    /// Creates a cache with the given configuration.
    pub fn new(config: CacheConfig) -> Self {
        let capacity = NonZeroUsize::new(config.max_entries.max(1))
            .unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
            ttl: config.ttl,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Builds a cache key from the repo, operation, parameters, and the
    /// latest commit OID the result depends on.
    pub fn key(full_name: &str, operation: &str, params: &[&str], tip: &Oid) -> String {
        let mut key = format!("{}\x1f{}\x1f{}", full_name, operation, tip);
        for param in params {
            key.push('\x1f');
            key.push_str(param);
        }
        key
    }

    /// Fetches a live entry, refreshing its LRU position.
    pub fn get(&self, key: &str) -> Option<Vec<u8>> {
        let mut entries = self.entries.lock();
        match entries.get(key) {
            Some(entry) if entry.inserted.elapsed() <= self.ttl => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(entry.bytes.clone())
            }
            Some(_) => {
                entries.pop(key);
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Stores a result. Empty values are not cached (a missing result is
    /// not a result).
    pub fn put(&self, key: String, bytes: Vec<u8>) {
        if bytes.is_empty() {
            return;
        }
        self.entries.lock().put(
            key,
            Entry {
                bytes,
                inserted: Instant::now(),
            },
        );
    }

    /// Counter snapshot.
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }
}

impl Default for ResultCache {
    fn default() -> Self {
        Self::new(CacheConfig::default())
    }
}
