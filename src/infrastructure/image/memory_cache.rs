//! In-memory LRU store for decoded bitmaps, bounded by a byte budget.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use lru::LruCache;
use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::domain::entities::{Bitmap, CacheEntry, CacheKey, Transform};

/// Default memory budget in bytes (64 MB).
pub const DEFAULT_MEMORY_BUDGET: u64 = 64 * 1024 * 1024;

/// Identifies one rendition of a source image.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MemoryKey {
    /// Source identity.
    pub key: CacheKey,
    /// Requested rendition.
    pub transform: Transform,
}

impl MemoryKey {
    /// Creates a rendition key.
    #[must_use]
    pub const fn new(key: CacheKey, transform: Transform) -> Self {
        Self { key, transform }
    }
}

struct MemoryInner {
    entries: LruCache<MemoryKey, CacheEntry<Arc<Bitmap>>>,
    total_bytes: u64,
}

/// In-memory LRU store for decoded bitmaps.
///
/// Lookups are synchronous so the load fast path never yields. Every
/// mutation happens under one lock, so readers never see a partial entry.
pub struct MemoryImageCache {
    inner: Mutex<MemoryInner>,
    budget: u64,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl MemoryImageCache {
    /// Creates a store holding at most `budget` bytes of pixels.
    #[must_use]
    pub fn new(budget: u64) -> Self {
        Self {
            inner: Mutex::new(MemoryInner {
                entries: LruCache::unbounded(),
                total_bytes: 0,
            }),
            budget,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    /// Gets a bitmap and marks it most recently used.
    pub fn get(&self, key: &MemoryKey) -> Option<Arc<Bitmap>> {
        let mut inner = self.inner.lock();
        if let Some(entry) = inner.entries.get_mut(key) {
            entry.touch();
            self.hits.fetch_add(1, Ordering::Relaxed);
            trace!(key = %key.key, "Memory cache hit");
            Some(entry.payload.clone())
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
            trace!(key = %key.key, "Memory cache miss");
            None
        }
    }

    /// Peeks at a bitmap without promoting it in the LRU.
    pub fn peek(&self, key: &MemoryKey) -> Option<Arc<Bitmap>> {
        let inner = self.inner.lock();
        inner.entries.peek(key).map(|entry| entry.payload.clone())
    }

    /// Stores a bitmap, replacing any previous bitmap under the same key,
    /// then evicts least recently used entries until the budget holds.
    ///
    /// Returns `false` if the bitmap alone exceeds the budget and was not stored.
    pub fn put(&self, key: MemoryKey, bitmap: Arc<Bitmap>) -> bool {
        let size = bitmap.size_bytes();
        if size > self.budget {
            debug!(key = %key.key, size, budget = self.budget, "Bitmap exceeds memory budget, not cached");
            return false;
        }

        let mut inner = self.inner.lock();
        let entry = CacheEntry::new(key.key.clone(), bitmap, size);
        if let Some(previous) = inner.entries.put(key.clone(), entry) {
            inner.total_bytes -= previous.size_bytes;
        }
        inner.total_bytes += size;
        debug!(key = %key.key, size, total = inner.total_bytes, "Stored bitmap in memory cache");

        self.evict_locked(&mut inner);
        true
    }

    /// Evicts least recently used entries until the budget holds.
    /// Returns the number of entries removed.
    pub fn evict(&self) -> usize {
        let mut inner = self.inner.lock();
        self.evict_locked(&mut inner)
    }

    fn evict_locked(&self, inner: &mut MemoryInner) -> usize {
        let mut removed = 0;
        while inner.total_bytes > self.budget {
            let Some((key, entry)) = inner.entries.pop_lru() else {
                break;
            };
            inner.total_bytes -= entry.size_bytes;
            removed += 1;
            trace!(key = %key.key, size = entry.size_bytes, "Evicted bitmap from memory cache");
        }
        if removed > 0 {
            self.evictions.fetch_add(removed as u64, Ordering::Relaxed);
            debug!(removed, total = inner.total_bytes, "Memory cache eviction complete");
        }
        removed
    }

    /// Removes one rendition.
    pub fn remove(&self, key: &MemoryKey) -> bool {
        let mut inner = self.inner.lock();
        if let Some(entry) = inner.entries.pop(key) {
            inner.total_bytes -= entry.size_bytes;
            true
        } else {
            false
        }
    }

    /// Removes every rendition of a source. Returns how many were removed.
    pub fn remove_source(&self, key: &CacheKey) -> usize {
        let mut inner = self.inner.lock();
        let doomed: Vec<MemoryKey> = inner
            .entries
            .iter()
            .filter(|(k, _)| &k.key == key)
            .map(|(k, _)| k.clone())
            .collect();
        for k in &doomed {
            if let Some(entry) = inner.entries.pop(k) {
                inner.total_bytes -= entry.size_bytes;
            }
        }
        doomed.len()
    }

    /// Returns true if any rendition of the source is resident.
    pub fn contains_source(&self, key: &CacheKey) -> bool {
        let inner = self.inner.lock();
        inner.entries.iter().any(|(k, _)| &k.key == key)
    }

    /// Clears all bitmaps.
    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.entries.clear();
        inner.total_bytes = 0;
        debug!("Cleared memory image cache");
    }

    /// Bytes currently accounted.
    pub fn total_bytes(&self) -> u64 {
        self.inner.lock().total_bytes
    }

    /// Number of resident renditions.
    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    /// Returns true if nothing is cached.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Configured budget in bytes.
    #[must_use]
    pub const fn budget(&self) -> u64 {
        self.budget
    }

    /// Returns cache statistics.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn stats(&self) -> CacheStats {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        let hit_rate = if total > 0 {
            (hits as f64 / total as f64) * 100.0
        } else {
            0.0
        };
        let inner = self.inner.lock();
        CacheStats {
            hits,
            misses,
            evictions: self.evictions.load(Ordering::Relaxed),
            hit_rate,
            entries: inner.entries.len(),
            size_bytes: inner.total_bytes,
            budget_bytes: self.budget,
        }
    }
}

impl Default for MemoryImageCache {
    fn default() -> Self {
        Self::new(DEFAULT_MEMORY_BUDGET)
    }
}

/// Statistics about memory cache performance.
#[derive(Debug, Clone)]
pub struct CacheStats {
    /// Number of cache hits.
    pub hits: u64,
    /// Number of cache misses.
    pub misses: u64,
    /// Number of budget evictions.
    pub evictions: u64,
    /// Hit rate as a percentage.
    pub hit_rate: f64,
    /// Resident renditions.
    pub entries: usize,
    /// Accounted bytes.
    pub size_bytes: u64,
    /// Configured budget.
    pub budget_bytes: u64,
}

impl std::fmt::Display for CacheStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Memory: {} bitmaps, {}/{} bytes, {:.1}% hit rate ({} hits, {} misses, {} evictions)",
            self.entries,
            self.size_bytes,
            self.budget_bytes,
            self.hit_rate,
            self.hits,
            self.misses,
            self.evictions
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::entities::{CachePolicy, ResizeMode};
    use image::RgbaImage;

    fn bitmap(w: u32, h: u32) -> Arc<Bitmap> {
        Arc::new(Bitmap::new(RgbaImage::new(w, h), w, h))
    }

    fn key(name: &str) -> MemoryKey {
        MemoryKey::new(
            CacheKey::derive(&format!("https://x/{name}.png"), CachePolicy::Immutable),
            Transform::default(),
        )
    }

    #[test]
    fn test_cache_put_and_get() {
        let cache = MemoryImageCache::new(1024 * 1024);
        let id = key("a");
        let img = bitmap(10, 10);

        assert!(cache.put(id.clone(), img.clone()));
        let retrieved = cache.get(&id);

        assert_eq!(retrieved.as_deref(), Some(img.as_ref()));
    }

    #[test]
    fn test_cache_miss() {
        let cache = MemoryImageCache::new(1024);
        assert!(cache.get(&key("nonexistent")).is_none());
    }

    #[test]
    fn test_budget_evicts_least_recently_used() {
        // each 4x4 bitmap is 64 bytes
        let cache = MemoryImageCache::new(128);
        let (a, b, c) = (key("a"), key("b"), key("c"));

        cache.put(a.clone(), bitmap(4, 4));
        cache.put(b.clone(), bitmap(4, 4));
        // touch a so b becomes the LRU entry
        assert!(cache.get(&a).is_some());
        cache.put(c.clone(), bitmap(4, 4));

        assert!(cache.peek(&b).is_none());
        assert!(cache.peek(&a).is_some());
        assert!(cache.peek(&c).is_some());
        assert!(cache.total_bytes() <= cache.budget());
        assert_eq!(cache.stats().evictions, 1);
    }

    #[test]
    fn test_size_never_exceeds_budget() {
        let cache = MemoryImageCache::new(1000);
        for i in 0..50u32 {
            cache.put(key(&i.to_string()), bitmap(1 + i % 7, 1 + i % 5));
            assert!(cache.total_bytes() <= 1000);
        }
    }

    #[test]
    fn test_oversized_bitmap_rejected() {
        let cache = MemoryImageCache::new(16);
        assert!(!cache.put(key("big"), bitmap(10, 10)));
        assert!(cache.is_empty());
        assert_eq!(cache.total_bytes(), 0);
    }

    #[test]
    fn test_reinsert_counts_once() {
        let cache = MemoryImageCache::new(1024);
        let id = key("a");

        cache.put(id.clone(), bitmap(4, 4));
        cache.put(id.clone(), bitmap(4, 4));
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.total_bytes(), 64);

        cache.put(id.clone(), bitmap(2, 2));
        assert_eq!(cache.total_bytes(), 16);
        assert_eq!(cache.peek(&id).map(|b| b.width()), Some(2));
    }

    #[test]
    fn test_renditions_are_separate() {
        let cache = MemoryImageCache::new(4096);
        let source = key("a").key;
        let small = MemoryKey::new(
            source.clone(),
            Transform {
                target_size: Some(crate::domain::entities::TargetSize::new(2, 2)),
                resize_mode: ResizeMode::Cover,
                tint: None,
            },
        );
        let native = MemoryKey::new(source.clone(), Transform::default());

        cache.put(small.clone(), bitmap(2, 2));
        assert!(cache.peek(&native).is_none());
        cache.put(native, bitmap(8, 8));

        assert!(cache.contains_source(&source));
        assert_eq!(cache.remove_source(&source), 2);
        assert!(!cache.contains_source(&source));
        assert_eq!(cache.total_bytes(), 0);
    }

    #[test]
    fn test_cache_stats() {
        let cache = MemoryImageCache::new(1024);
        let id = key("a");
        cache.put(id.clone(), bitmap(2, 2));

        let _ = cache.get(&id);
        let _ = cache.get(&key("missing"));

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.entries, 1);
        assert_eq!(stats.size_bytes, 16);
    }

    #[test]
    fn test_peek_does_not_promote() {
        let cache = MemoryImageCache::new(128);
        let (a, b, c) = (key("a"), key("b"), key("c"));

        cache.put(a.clone(), bitmap(4, 4));
        cache.put(b.clone(), bitmap(4, 4));
        let _ = cache.peek(&a);
        cache.put(c, bitmap(4, 4));

        assert!(cache.peek(&a).is_none());
    }
}
