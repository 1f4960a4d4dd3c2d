//! Fixed-capacity LRU cache of region query results.

use lru::LruCache;
use std::num::NonZeroUsize;

/// Cache key: an exact `(contig, start, stop)` query.
#[derive(Debug, Clone, Hash, Eq, PartialEq)]
pub struct RegionKey {
    pub contig: String,
    pub start: u64,
    pub stop: u64,
}

impl RegionKey {
    pub fn new(contig: impl Into<String>, start: u64, stop: u64) -> Self {
        Self {
            contig: contig.into(),
            start,
            stop,
        }
    }
}

/// Wraps `LruCache` with per-contig invalidation.
///
/// A capacity of 0 disables caching: every lookup misses and inserts are
/// dropped. Hit accounting lives in the store's stats.
pub struct RegionCache<V> {
    cache: Option<LruCache<RegionKey, V>>,
}

impl<V> RegionCache<V> {
    pub fn new(capacity: usize) -> Self {
        Self {
            cache: NonZeroUsize::new(capacity).map(LruCache::new),
        }
    }

    /// Look up a key, marking it most recently used.
    pub fn get(&mut self, key: &RegionKey) -> Option<&V> {
        self.cache.as_mut().and_then(|c| c.get(key))
    }

    /// Insert a value, evicting the least recently used entry when full.
    pub fn put(&mut self, key: RegionKey, value: V) {
        if let Some(cache) = self.cache.as_mut() {
            cache.put(key, value);
        }
    }

    /// Drop entries for one contig, or everything when `contig` is None.
    ///
    /// Returns the number of entries removed.
    pub fn invalidate(&mut self, contig: Option<&str>) -> usize {
        let Some(cache) = self.cache.as_mut() else {
            return 0;
        };
        match contig {
            None => {
                let removed = cache.len();
                cache.clear();
                removed
            }
            Some(contig) => {
                let stale: Vec<RegionKey> = cache
                    .iter()
                    .filter(|(k, _)| k.contig == contig)
                    .map(|(k, _)| k.clone())
                    .collect();
                for key in &stale {
                    cache.pop(key);
                }
                stale.len()
            }
        }
    }

    pub fn len(&self) -> usize {
        self.cache.as_ref().map_or(0, |c| c.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
