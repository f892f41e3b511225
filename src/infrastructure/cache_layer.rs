// Local LRU read cache for denormalized records, with per-entry TTL

use async_trait::async_trait;
use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, instrument};

use crate::error::{AppError, AppResult};
use crate::infrastructure::traits::CacheStore;

/// Cache entry with TTL
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub data: String,
    pub inserted_at: Instant,
    pub ttl: Duration,
    pub access_count: u64,
}

impl CacheEntry {
    pub fn new(data: String, ttl: Duration) -> Self {
        Self {
            data,
            inserted_at: Instant::now(),
            ttl,
            access_count: 0,
        }
    }

    pub fn is_expired(&self) -> bool {
        self.inserted_at.elapsed() > self.ttl
    }
}

/// Cache metrics for monitoring and optimization
#[derive(Debug, Default)]
pub struct CacheMetrics {
    pub hits: AtomicU64,
    pub misses: AtomicU64,
    pub evictions: AtomicU64,
    pub invalidations: AtomicU64,
}

impl CacheMetrics {
    pub fn hit_rate(&self) -> f64 {
        let hits = self.hits.load(Ordering::Relaxed);
        let total = hits + self.misses.load(Ordering::Relaxed);
        if total == 0 {
            0.0
        } else {
            hits as f64 / total as f64
        }
    }
}

#[derive(Debug)]
pub struct LruCacheStore {
    entries: Mutex<LruCache<String, CacheEntry>>,
    default_ttl: Duration,
    metrics: CacheMetrics,
}

impl LruCacheStore {
    pub fn new(capacity: usize, default_ttl: Duration) -> AppResult<Self> {
        let capacity = NonZeroUsize::new(capacity).ok_or_else(|| {
            AppError::ConfigurationError("cache capacity must be greater than zero".to_string())
        })?;
        Ok(Self {
            entries: Mutex::new(LruCache::new(capacity)),
            default_ttl,
            metrics: CacheMetrics::default(),
        })
    }

    pub fn metrics(&self) -> &CacheMetrics {
        &self.metrics
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }
}

#[async_trait]
impl CacheStore for LruCacheStore {
    #[instrument(skip(self))]
    async fn get(&self, key: &str) -> AppResult<Option<String>> {
        let mut entries = self.entries.lock().await;

        let expired = match entries.get_mut(key) {
            Some(entry) if !entry.is_expired() => {
                entry.access_count += 1;
                self.metrics.hits.fetch_add(1, Ordering::Relaxed);
                return Ok(Some(entry.data.clone()));
            }
            Some(_) => true,
            None => false,
        };

        if expired {
            entries.pop(key);
            debug!("Dropped expired cache entry {}", key);
        }
        self.metrics.misses.fetch_add(1, Ordering::Relaxed);
        Ok(None)
    }

    async fn set(&self, key: &str, value: String) -> AppResult<()> {
        let mut entries = self.entries.lock().await;
        let entry = CacheEntry::new(value, self.default_ttl);
        if let Some((evicted, _)) = entries.push(key.to_string(), entry) {
            if evicted != key {
                self.metrics.evictions.fetch_add(1, Ordering::Relaxed);
            }
        }
        Ok(())
    }

    async fn del(&self, key: &str) -> AppResult<()> {
        if self.entries.lock().await.pop(key).is_some() {
            self.metrics.invalidations.fetch_add(1, Ordering::Relaxed);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_set_get_del() {
        let cache = LruCacheStore::new(8, Duration::from_secs(60)).unwrap();
        cache.set("post:1", "{}".to_string()).await.unwrap();
        assert_eq!(cache.get("post:1").await.unwrap(), Some("{}".to_string()));

        cache.del("post:1").await.unwrap();
        assert_eq!(cache.get("post:1").await.unwrap(), None);
        assert_eq!(cache.metrics().hits.load(Ordering::Relaxed), 1);
        assert_eq!(cache.metrics().misses.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn test_expired_entries_are_misses() {
        let cache = LruCacheStore::new(8, Duration::from_millis(0)).unwrap();
        cache.set("k", "v".to_string()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert_eq!(cache.get("k").await.unwrap(), None);
        assert!(cache.is_empty().await);
    }

    #[tokio::test]
    async fn test_least_recently_used_is_evicted() {
        let cache = LruCacheStore::new(2, Duration::from_secs(60)).unwrap();
        cache.set("a", "1".to_string()).await.unwrap();
        cache.set("b", "2".to_string()).await.unwrap();
        cache.get("a").await.unwrap();
        cache.set("c", "3".to_string()).await.unwrap();

        assert_eq!(cache.get("b").await.unwrap(), None);
        assert_eq!(cache.get("a").await.unwrap(), Some("1".to_string()));
        assert_eq!(cache.metrics().evictions.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_zero_capacity_rejected() {
        assert!(LruCacheStore::new(0, Duration::from_secs(1)).is_err());
    }
}
