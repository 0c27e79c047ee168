use lru::LruCache;
use parking_lot::Mutex;
use std::num::NonZeroUsize;
use std::sync::Arc;
use xxhash_rust::xxh3::xxh3_64;

use crate::utils::Metrics;

/// In-memory LRU of successful translations.
///
/// Keys are xxHash3 digests of (source, target, text). Failed translations are
/// never stored, so a transient provider error does not pin the original text.
#[derive(Clone)]
pub struct TranslationCache {
    inner: Arc<CacheInner>,
}

struct CacheInner {
    // `LruCache::get` reorders entries, so reads need exclusive access too
    cache: Mutex<LruCache<u64, String>>,
    metrics: Option<Metrics>,
}

impl TranslationCache {
    /// `max_entries` of zero is bumped to one
    pub fn new(max_entries: usize, metrics: Option<Metrics>) -> Self {
        let capacity = NonZeroUsize::new(max_entries).unwrap_or(NonZeroUsize::MIN);

        Self {
            inner: Arc::new(CacheInner {
                cache: Mutex::new(LruCache::new(capacity)),
                metrics,
            }),
        }
    }

    /// Cache key for one translation request.
    ///
    /// Fields are separated by a byte that cannot appear in UTF-8 text, so
    /// ("ab", "c") and ("a", "bc") hash differently.
    pub fn generate_key(source: &str, target: &str, text: &str) -> u64 {
        let mut hash_input = Vec::with_capacity(source.len() + target.len() + text.len() + 2);
        hash_input.extend_from_slice(source.as_bytes());
        hash_input.push(0xff);
        hash_input.extend_from_slice(target.as_bytes());
        hash_input.push(0xff);
        hash_input.extend_from_slice(text.as_bytes());
        xxh3_64(&hash_input)
    }

    /// Look up a translation, recording a hit or miss
    pub fn get(&self, key: u64) -> Option<String> {
        let found = self.inner.cache.lock().get(&key).cloned();

        if let Some(ref m) = self.inner.metrics {
            if found.is_some() {
                m.record_cache_hit();
            } else {
                m.record_cache_miss();
            }
        }
        found
    }

    pub fn put(&self, key: u64, translated: String) {
        let mut cache = self.inner.cache.lock();
        cache.put(key, translated);

        if let Some(ref m) = self.inner.metrics {
            m.update_cache_size(cache.len());
        }
    }

    pub fn len(&self) -> usize {
        self.inner.cache.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Clear all cache entries
    pub fn clear(&self) {
        self.inner.cache.lock().clear();

        if let Some(ref m) = self.inner.metrics {
            m.update_cache_size(0);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_put_get() {
        let metrics = Metrics::new();
        let cache = TranslationCache::new(100, Some(metrics.clone()));

        let key = TranslationCache::generate_key("en", "es", "Leaf Blight");
        assert!(cache.get(key).is_none());

        cache.put(key, "Tizón de la hoja".to_string());
        assert_eq!(cache.get(key).as_deref(), Some("Tizón de la hoja"));

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.cache_hits, 1);
        assert_eq!(snapshot.cache_misses, 1);
        assert_eq!(snapshot.cache_size, 1);
    }

    #[test]
    fn test_lru_eviction() {
        let cache = TranslationCache::new(2, None);
        cache.put(1, "one".to_string());
        cache.put(2, "two".to_string());
        // Touch 1 so 2 becomes least recently used
        cache.get(1);
        cache.put(3, "three".to_string());

        assert_eq!(cache.len(), 2);
        assert!(cache.get(2).is_none());
        assert!(cache.get(1).is_some());

        cache.clear();
        assert!(cache.is_empty());
    }

    #[test]
    fn test_xxhash_generation() {
        let key1 = TranslationCache::generate_key("en", "es", "Healthy");
        let key2 = TranslationCache::generate_key("en", "es", "Healthy");
        let key3 = TranslationCache::generate_key("en", "fr", "Healthy");
        let key4 = TranslationCache::generate_key("e", "nes", "Healthy");

        assert_eq!(key1, key2);
        assert_ne!(key1, key3);
        assert_ne!(key1, key4);
    }
}
