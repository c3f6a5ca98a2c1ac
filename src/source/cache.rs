//! In-memory byte cache for exported PDFs and loaded documents

use lru::LruCache;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::Arc;

struct CacheInner {
    lru: LruCache<String, Arc<Vec<u8>>>,
    total_bytes: usize,
    /// Leased entries; never evicted and outside both budgets
    pinned: HashMap<String, Arc<Vec<u8>>>,
}

/// LRU cache with entry count and byte budget limits.
///
/// Entries created through [`ByteCache::lease`] are pinned instead: they do
/// not count against the limits and stay until the lease is dropped.
pub struct ByteCache {
    inner: Mutex<CacheInner>,
    max_bytes: usize,
}

impl ByteCache {
    /// Create a cache with the specified entry capacity and byte budget
    pub fn new(capacity: usize, max_bytes: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            inner: Mutex::new(CacheInner {
                lru: LruCache::new(capacity),
                total_bytes: 0,
                pinned: HashMap::new(),
            }),
            max_bytes,
        }
    }

    /// Store bytes under `key`, evicting least recently used entries until the
    /// byte budget is met. Entries larger than the whole budget are refused and
    /// `false` is returned.
    pub fn put(&self, key: String, data: Arc<Vec<u8>>) -> bool {
        let new_size = data.len();
        if new_size > self.max_bytes {
            return false;
        }

        let mut inner = self.inner.lock();

        if let Some(old) = inner.lru.pop(&key) {
            inner.total_bytes = inner.total_bytes.saturating_sub(old.len());
        }

        while inner.total_bytes + new_size > self.max_bytes {
            match inner.lru.pop_lru() {
                Some((_, evicted)) => {
                    inner.total_bytes = inner.total_bytes.saturating_sub(evicted.len());
                }
                None => break,
            }
        }

        // Capacity eviction inside `push` bypasses the loop above
        if let Some((_, evicted)) = inner.lru.push(key, data) {
            inner.total_bytes = inner.total_bytes.saturating_sub(evicted.len());
        }
        inner.total_bytes += new_size;
        true
    }

    pub fn get(&self, key: &str) -> Option<Arc<Vec<u8>>> {
        let mut inner = self.inner.lock();
        if let Some(data) = inner.pinned.get(key) {
            return Some(Arc::clone(data));
        }
        inner.lru.get(key).cloned()
    }

    pub fn contains(&self, key: &str) -> bool {
        let inner = self.inner.lock();
        inner.pinned.contains_key(key) || inner.lru.contains(key)
    }

    pub fn remove(&self, key: &str) -> Option<Arc<Vec<u8>>> {
        let mut inner = self.inner.lock();
        if let Some(val) = inner.pinned.remove(key) {
            return Some(val);
        }
        let val = inner.lru.pop(key)?;
        inner.total_bytes = inner.total_bytes.saturating_sub(val.len());
        Some(val)
    }

    pub fn len(&self) -> usize {
        let inner = self.inner.lock();
        inner.lru.len() + inner.pinned.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Bytes held by evictable entries
    pub fn total_bytes(&self) -> usize {
        self.inner.lock().total_bytes
    }

    /// Generate a key that does not collide with existing entries.
    pub fn generate_unique_key(&self) -> String {
        let inner = self.inner.lock();
        loop {
            let key = uuid::Uuid::new_v4().to_string();
            if !inner.lru.contains(&key) && !inner.pinned.contains_key(&key) {
                return key;
            }
        }
    }

    /// Pin `data` under a fresh key that is removed when the lease drops.
    pub fn lease(self: &Arc<Self>, data: Arc<Vec<u8>>) -> CacheLease {
        let key = self.generate_unique_key();
        self.inner.lock().pinned.insert(key.clone(), data);
        CacheLease {
            cache: Arc::clone(self),
            key,
        }
    }
}

/// Cache entry owned by a live document; released on drop
pub struct CacheLease {
    cache: Arc<ByteCache>,
    key: String,
}

impl CacheLease {
    pub fn key(&self) -> &str {
        &self.key
    }
}

impl Drop for CacheLease {
    fn drop(&mut self) {
        if self.cache.remove(&self.key).is_some() {
            tracing::debug!(key = %self.key, "released document lease");
        }
    }
}

impl std::fmt::Debug for CacheLease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheLease").field("key", &self.key).finish()
    }
}
