//! A bounded, byte-budgeted LRU index.
//!
//! This is the shared primitive behind the cache coordinator's `FileInfo`
//! index, and is generic enough to back the filesystem layer's separate
//! stat/type metadata caches, which carry different value types but the
//! same recency and eviction discipline.

use lru::LruCache;
use parking_lot::RwLock;

use crate::error::CacheError;

/// A value that can live in an [`LruIndex`]. Its `size()` is what the index
/// accounts against `max_bytes` — for `FileInfo` this is the full object
/// size, not the bytes actually downloaded so far (see `FileInfo::size`).
pub trait CacheValue {
    fn size(&self) -> u64;
}

struct Inner<V> {
    map: LruCache<Vec<u8>, V>,
    current_bytes: u64,
}

/// Doubly-linked recency list plus hash lookup, bounded by `max_bytes`.
///
/// All operations are amortised O(1) and take a shared `&self` — the lock is
/// internal, so the index can be handed out as an `Arc<LruIndex<V>>` and
/// shared between the coordinator (admit/evict) and a download job
/// (`update_in_place`) without either owning the other's lock.
pub struct LruIndex<V> {
    max_bytes: u64,
    inner: RwLock<Inner<V>>,
}

impl<V: CacheValue + Clone> LruIndex<V> {
    pub fn new(max_bytes: u64) -> Self {
        Self {
            max_bytes,
            inner: RwLock::new(Inner {
                map: LruCache::unbounded(),
                current_bytes: 0,
            }),
        }
    }

    pub fn max_bytes(&self) -> u64 {
        self.max_bytes
    }

    pub fn len(&self) -> usize {
        self.inner.read().map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn current_bytes(&self) -> u64 {
        self.inner.read().current_bytes
    }

    /// Inserts or replaces `value` at MRU, then evicts LRU-first until
    /// `current_bytes <= max_bytes`. Rejects oversized entries without any
    /// mutation.
    pub fn insert(&self, key: Vec<u8>, value: V) -> Result<Vec<V>, CacheError> {
        let size = value.size();
        if size > self.max_bytes {
            return Err(CacheError::InvalidEntrySize {
                size,
                max_bytes: self.max_bytes,
            });
        }

        let mut inner = self.inner.write();
        match inner.map.peek(&key) {
            Some(old) => {
                let old_size = old.size();
                inner.current_bytes = inner.current_bytes - old_size + size;
            }
            None => {
                inner.current_bytes += size;
            }
        }
        inner.map.put(key, value);

        let mut evicted = Vec::new();
        while inner.current_bytes > self.max_bytes {
            match inner.map.pop_lru() {
                Some((_, v)) => {
                    inner.current_bytes -= v.size();
                    evicted.push(v);
                }
                None => break,
            }
        }

        Ok(evicted)
    }

    /// Promotes `key` to MRU and returns its value, if present.
    pub fn lookup(&self, key: &[u8]) -> Option<V> {
        self.inner.write().map.get(key).cloned()
    }

    /// Non-mutating lookup: recency is unchanged.
    pub fn lookup_peek(&self, key: &[u8]) -> Option<V> {
        self.inner.read().map.peek(key).cloned()
    }

    /// Replaces the value for `key` in place without touching recency. Used
    /// by a download job to publish progress without promoting its own
    /// entry to MRU on every chunk.
    pub fn update_in_place(&self, key: &[u8], value: V) -> Result<(), CacheError> {
        let mut inner = self.inner.write();
        match inner.map.peek_mut(key) {
            Some(slot) => {
                *slot = value;
                Ok(())
            }
            None => Err(CacheError::InvalidEntry),
        }
    }

    pub fn erase(&self, key: &[u8]) -> Option<V> {
        let mut inner = self.inner.write();
        let removed = inner.map.pop(key);
        if let Some(ref v) = removed {
            inner.current_bytes -= v.size();
        }
        removed
    }

    /// Removes every key whose byte string starts with `prefix`. Iteration
    /// order of the matches is unspecified.
    pub fn erase_prefix(&self, prefix: &[u8]) -> Vec<V> {
        let mut inner = self.inner.write();
        let matching: Vec<Vec<u8>> = inner
            .map
            .iter()
            .filter(|(k, _)| k.starts_with(prefix))
            .map(|(k, _)| k.clone())
            .collect();

        let mut evicted = Vec::with_capacity(matching.len());
        for key in matching {
            if let Some(v) = inner.map.pop(&key) {
                inner.current_bytes -= v.size();
                evicted.push(v);
            }
        }
        evicted
    }
}
