use crate::core::Result;
use async_trait::async_trait;
use lru::LruCache;
use std::num::NonZeroUsize;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

/// Key/value backend behind the cache manager.
///
/// Values are JSON documents so that networked providers can store them as
/// strings without knowing component schemas.
#[async_trait]
pub trait CacheProvider: Send + Sync {
    fn name(&self) -> &str;

    async fn get(&self, key: &str) -> Result<Option<serde_json::Value>>;

    async fn set(&self, key: &str, value: serde_json::Value, ttl: Option<Duration>) -> Result<()>;

    /// Returns whether the key was present.
    async fn delete(&self, key: &str) -> Result<bool>;

    /// Remove every key starting with `prefix`; returns how many were removed.
    async fn delete_prefix(&self, prefix: &str) -> Result<usize>;

    async fn clear(&self) -> Result<()>;

    async fn ping(&self) -> Result<()>;

    /// Number of live (unexpired) entries.
    async fn len(&self) -> Result<usize>;
}

#[derive(Debug, Clone)]
struct CacheEntry {
    value: serde_json::Value,
    expires_at: Option<Instant>,
}

impl CacheEntry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

/// LRU-bounded in-process provider with per-entry TTL.
#[derive(Debug)]
pub struct MemoryCacheProvider {
    entries: Mutex<LruCache<String, CacheEntry>>,
}

impl MemoryCacheProvider {
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
        }
    }

    pub async fn capacity(&self) -> usize {
        self.entries.lock().await.cap().get()
    }
}

#[async_trait]
impl CacheProvider for MemoryCacheProvider {
    fn name(&self) -> &str {
        "memory"
    }

    async fn get(&self, key: &str) -> Result<Option<serde_json::Value>> {
        let mut entries = self.entries.lock().await;
        let expired = match entries.get(key) {
            Some(entry) if entry.is_expired(Instant::now()) => true,
            Some(entry) => return Ok(Some(entry.value.clone())),
            None => return Ok(None),
        };
        if expired {
            entries.pop(key);
        }
        Ok(None)
    }

    async fn set(&self, key: &str, value: serde_json::Value, ttl: Option<Duration>) -> Result<()> {
        // A TTL past the clock's range never expires
        let expires_at = ttl.and_then(|ttl| Instant::now().checked_add(ttl));
        self.entries
            .lock()
            .await
            .put(key.to_string(), CacheEntry { value, expires_at });
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        Ok(self.entries.lock().await.pop(key).is_some())
    }

    async fn delete_prefix(&self, prefix: &str) -> Result<usize> {
        let mut entries = self.entries.lock().await;
        let keys: Vec<String> = entries
            .iter()
            .filter(|(key, _)| key.starts_with(prefix))
            .map(|(key, _)| key.clone())
            .collect();
        for key in &keys {
            entries.pop(key);
        }
        Ok(keys.len())
    }

    async fn clear(&self) -> Result<()> {
        self.entries.lock().await.clear();
        Ok(())
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }

    async fn len(&self) -> Result<usize> {
        let now = Instant::now();
        Ok(self
            .entries
            .lock()
            .await
            .iter()
            .filter(|(_, entry)| !entry.is_expired(now))
            .count())
    }
}

/// Provider that stores nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopCacheProvider;

#[async_trait]
impl CacheProvider for NoopCacheProvider {
    fn name(&self) -> &str {
        "noop"
    }

    async fn get(&self, _key: &str) -> Result<Option<serde_json::Value>> {
        Ok(None)
    }

    async fn set(&self, _key: &str, _value: serde_json::Value, _ttl: Option<Duration>) -> Result<()> {
        Ok(())
    }

    async fn delete(&self, _key: &str) -> Result<bool> {
        Ok(false)
    }

    async fn delete_prefix(&self, _prefix: &str) -> Result<usize> {
        Ok(0)
    }

    async fn clear(&self) -> Result<()> {
        Ok(())
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }

    async fn len(&self) -> Result<usize> {
        Ok(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_set_get_delete() {
        let cache = MemoryCacheProvider::new(8);
        cache.set("a", json!(1), None).await.unwrap();
        assert_eq!(cache.get("a").await.unwrap(), Some(json!(1)));
        assert!(cache.delete("a").await.unwrap());
        assert!(!cache.delete("a").await.unwrap());
        assert_eq!(cache.get("a").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_ttl_expiry() {
        let cache = MemoryCacheProvider::new(8);
        cache
            .set("short", json!("x"), Some(Duration::from_millis(20)))
            .await
            .unwrap();
        cache.set("long", json!("y"), None).await.unwrap();
        tokio::time::sleep(Duration::from_millis(40)).await;

        assert_eq!(cache.get("short").await.unwrap(), None);
        assert_eq!(cache.get("long").await.unwrap(), Some(json!("y")));
        assert_eq!(cache.len().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_huge_ttl_never_expires() {
        let cache = MemoryCacheProvider::new(8);
        cache.set("forever", json!(1), Some(Duration::MAX)).await.unwrap();
        cache
            .set("max_ms", json!(2), Some(Duration::from_millis(u64::MAX)))
            .await
            .unwrap();
        assert_eq!(cache.get("forever").await.unwrap(), Some(json!(1)));
        assert_eq!(cache.get("max_ms").await.unwrap(), Some(json!(2)));
    }

    #[tokio::test]
    async fn test_lru_eviction() {
        let cache = MemoryCacheProvider::new(2);
        cache.set("a", json!(1), None).await.unwrap();
        cache.set("b", json!(2), None).await.unwrap();
        cache.get("a").await.unwrap();
        cache.set("c", json!(3), None).await.unwrap();

        assert!(cache.get("b").await.unwrap().is_none());
        assert!(cache.get("a").await.unwrap().is_some());
        assert_eq!(cache.capacity().await, 2);
    }

    #[tokio::test]
    async fn test_delete_prefix() {
        let cache = MemoryCacheProvider::new(8);
        cache.set("component:1:a", json!({}), None).await.unwrap();
        cache.set("component:1:b", json!({}), None).await.unwrap();
        cache.set("component:2:a", json!({}), None).await.unwrap();

        assert_eq!(cache.delete_prefix("component:1:").await.unwrap(), 2);
        assert_eq!(cache.len().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_noop_stores_nothing() {
        let cache = NoopCacheProvider;
        cache.set("a", json!(1), None).await.unwrap();
        assert_eq!(cache.get("a").await.unwrap(), None);
        assert!(cache.ping().await.is_ok());
    }
}
