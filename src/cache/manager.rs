use super::config::{CacheConfig, CacheProviderKind, CacheStrategy};
use super::provider::{CacheProvider, MemoryCacheProvider, NoopCacheProvider};
use crate::core::{ComponentId, EntityId, Result, TypeId};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{Level, event};

pub fn entity_key(entity_id: &EntityId) -> String {
    format!("entity:{}", entity_id)
}

pub fn component_key(entity_id: &EntityId, type_id: &TypeId) -> String {
    format!("component:{}:{}", entity_id, type_id)
}

fn component_prefix(entity_id: &EntityId) -> String {
    format!("component:{}:", entity_id)
}

/// Component payload kept under `component:<entity_id>:<type_id>`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedComponent {
    pub component_id: ComponentId,
    pub type_id: TypeId,
    /// Encoded document, dates as RFC 3339 strings
    pub data: serde_json::Value,
}

/// Point-in-time cache counters.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub sets: u64,
    pub invalidations: u64,
    pub errors: u64,
    pub entries: usize,
    pub provider: String,
    pub enabled: bool,
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

#[derive(Debug, Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    sets: AtomicU64,
    invalidations: AtomicU64,
    errors: AtomicU64,
}

impl Counters {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn add(counter: &AtomicU64, n: usize) {
        counter.fetch_add(n as u64, Ordering::Relaxed);
    }
}

/// The pieces of the manager a detached write-through task needs.
#[derive(Clone)]
struct Writer {
    provider: Arc<dyn CacheProvider>,
    counters: Arc<Counters>,
    entity_ttl: Option<Duration>,
    component_ttl: Option<Duration>,
}

impl Writer {
    async fn set(&self, key: String, value: serde_json::Value, ttl: Option<Duration>) {
        match self.provider.set(&key, value, ttl).await {
            Ok(()) => Counters::bump(&self.counters.sets),
            Err(e) => self.failed("set", &key, &e.to_string()),
        }
    }

    async fn delete(&self, key: String) {
        match self.provider.delete(&key).await {
            Ok(true) => Counters::bump(&self.counters.invalidations),
            Ok(false) => {}
            Err(e) => self.failed("delete", &key, &e.to_string()),
        }
    }

    async fn delete_prefix(&self, prefix: String) {
        match self.provider.delete_prefix(&prefix).await {
            Ok(n) => Counters::add(&self.counters.invalidations, n),
            Err(e) => self.failed("delete_prefix", &prefix, &e.to_string()),
        }
    }

    async fn refresh(&self, entity_id: EntityId, written: Vec<CachedComponent>, removed: Vec<TypeId>) {
        self.set(entity_key(&entity_id), serde_json::Value::String(entity_id.to_string()), self.entity_ttl)
            .await;
        for component in written {
            let key = component_key(&entity_id, &component.type_id);
            match serde_json::to_value(&component) {
                Ok(value) => self.set(key, value, self.component_ttl).await,
                Err(e) => self.failed("encode", &key, &e.to_string()),
            }
        }
        for type_id in removed {
            self.delete(component_key(&entity_id, &type_id)).await;
        }
    }

    fn failed(&self, op: &str, key: &str, error: &str) {
        Counters::bump(&self.counters.errors);
        event!(
            Level::WARN,
            provider = self.provider.name(),
            op,
            key,
            error,
            "Cache operation failed"
        );
    }
}

/// Applies the configured consistency strategy on top of a [`CacheProvider`].
///
/// Provider failures are logged and counted, never returned: the cache is
/// best-effort and must not fail a data operation.
pub struct CacheManager {
    config: CacheConfig,
    writer: Writer,
    /// Latest detached write-through refresh per entity
    inflight: Mutex<HashMap<EntityId, JoinHandle<()>>>,
}

impl CacheManager {
    pub fn new(config: CacheConfig) -> Self {
        let provider: Arc<dyn CacheProvider> = match config.provider {
            CacheProviderKind::Memory => Arc::new(MemoryCacheProvider::new(config.max_entries)),
            CacheProviderKind::Noop => Arc::new(NoopCacheProvider),
        };
        Self::with_provider(config, provider)
    }

    pub fn with_provider(config: CacheConfig, provider: Arc<dyn CacheProvider>) -> Self {
        let writer = Writer {
            provider,
            counters: Arc::new(Counters::default()),
            entity_ttl: config.entity_ttl,
            component_ttl: config.component_ttl,
        };
        Self {
            config,
            writer,
            inflight: Mutex::new(HashMap::new()),
        }
    }

    pub fn disabled() -> Self {
        Self::new(CacheConfig::disabled())
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    pub fn get_config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn provider(&self) -> &Arc<dyn CacheProvider> {
        &self.writer.provider
    }

    async fn lookup(&self, key: &str) -> Option<serde_json::Value> {
        if !self.config.enabled {
            return None;
        }
        match self.writer.provider.get(key).await {
            Ok(Some(value)) => {
                Counters::bump(&self.writer.counters.hits);
                Some(value)
            }
            Ok(None) => {
                Counters::bump(&self.writer.counters.misses);
                None
            }
            Err(e) => {
                self.writer.failed("get", key, &e.to_string());
                None
            }
        }
    }

    /// Cached existence marker for an entity.
    pub async fn get_entity(&self, entity_id: &EntityId) -> Option<EntityId> {
        let value = self.lookup(&entity_key(entity_id)).await?;
        value.as_str().and_then(|s| s.parse().ok())
    }

    pub async fn get_component(&self, entity_id: &EntityId, type_id: &TypeId) -> Option<CachedComponent> {
        let key = component_key(entity_id, type_id);
        let value = self.lookup(&key).await?;
        match serde_json::from_value::<CachedComponent>(value) {
            Ok(cached) => Some(cached),
            Err(e) => {
                self.writer.failed("decode", &key, &e.to_string());
                self.writer.delete(key).await;
                None
            }
        }
    }

    pub async fn set_entity(&self, entity_id: &EntityId) {
        if !self.config.enabled {
            return;
        }
        self.writer
            .set(
                entity_key(entity_id),
                serde_json::Value::String(entity_id.to_string()),
                self.config.entity_ttl,
            )
            .await;
    }

    pub async fn set_component(&self, entity_id: &EntityId, component: &CachedComponent) {
        if !self.config.enabled {
            return;
        }
        let key = component_key(entity_id, &component.type_id);
        match serde_json::to_value(component) {
            Ok(value) => self.writer.set(key, value, self.config.component_ttl).await,
            Err(e) => self.writer.failed("encode", &key, &e.to_string()),
        }
    }

    /// Apply the consistency strategy after a successful save.
    pub async fn on_save(&self, entity_id: &EntityId, written: Vec<CachedComponent>, removed: Vec<TypeId>) {
        if !self.config.enabled {
            return;
        }
        match self.config.strategy {
            CacheStrategy::WriteThrough if self.config.write_through_async => {
                let writer = self.writer.clone();
                let entity_id = *entity_id;
                let mut inflight = self.inflight.lock().await;
                inflight.retain(|_, handle| !handle.is_finished());
                // Refreshes of one entity land in save order
                let previous = inflight.remove(&entity_id);
                let handle = tokio::spawn(async move {
                    if let Some(previous) = previous
                        && let Err(e) = previous.await
                    {
                        event!(Level::WARN, entity_id = %entity_id, error = %e, "Earlier cache refresh failed");
                    }
                    writer.refresh(entity_id, written, removed).await
                });
                inflight.insert(entity_id, handle);
            }
            CacheStrategy::WriteThrough => self.writer.refresh(*entity_id, written, removed).await,
            CacheStrategy::WriteInvalidate => {
                self.writer.delete(entity_key(entity_id)).await;
                for type_id in written.iter().map(|c| &c.type_id).chain(removed.iter()) {
                    self.writer.delete(component_key(entity_id, type_id)).await;
                }
            }
        }
    }

    /// Both strategies evict everything about an entity on delete.
    pub async fn on_delete(&self, entity_id: &EntityId) {
        self.invalidate_entity(entity_id).await;
    }

    /// Evict every key of an entity.
    ///
    /// A detached refresh still running for the entity is awaited first so
    /// it cannot write the keys back afterwards.
    pub async fn invalidate_entity(&self, entity_id: &EntityId) {
        if !self.config.enabled {
            return;
        }
        self.settle_refresh(entity_id).await;
        self.writer.delete(entity_key(entity_id)).await;
        self.writer.delete_prefix(component_prefix(entity_id)).await;
    }

    /// Wait for the entity's detached refresh chain to finish.
    async fn settle_refresh(&self, entity_id: &EntityId) {
        let Some(handle) = self.inflight.lock().await.remove(entity_id) else {
            return;
        };
        if let Err(e) = handle.await {
            self.writer.failed("refresh", &entity_key(entity_id), &e.to_string());
        }
    }

    pub async fn invalidate_component(&self, entity_id: &EntityId, type_id: &TypeId) {
        if !self.config.enabled {
            return;
        }
        self.writer.delete(component_key(entity_id, type_id)).await;
    }

    pub async fn clear(&self) -> Result<()> {
        self.writer.provider.clear().await
    }

    /// Provider liveness, for health checks.
    pub async fn ping(&self) -> bool {
        match self.writer.provider.ping().await {
            Ok(()) => true,
            Err(e) => {
                self.writer.failed("ping", "", &e.to_string());
                false
            }
        }
    }

    pub async fn get_stats(&self) -> CacheStats {
        let counters = &self.writer.counters;
        let entries = self.writer.provider.len().await.unwrap_or_default();
        CacheStats {
            hits: counters.hits.load(Ordering::Relaxed),
            misses: counters.misses.load(Ordering::Relaxed),
            sets: counters.sets.load(Ordering::Relaxed),
            invalidations: counters.invalidations.load(Ordering::Relaxed),
            errors: counters.errors.load(Ordering::Relaxed),
            entries,
            provider: self.writer.provider.name().to_string(),
            enabled: self.config.enabled,
        }
    }
}

impl Default for CacheManager {
    fn default() -> Self {
        Self::new(CacheConfig::default())
    }
}

impl std::fmt::Debug for CacheManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheManager")
            .field("config", &self.config)
            .field("provider", &self.writer.provider.name())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::DataError;
    use async_trait::async_trait;
    use serde_json::json;

    fn cached(type_name: &str) -> CachedComponent {
        CachedComponent {
            component_id: ComponentId::new(),
            type_id: TypeId::for_name(type_name),
            data: json!({"name": "Alice"}),
        }
    }

    #[tokio::test]
    async fn test_write_through_refreshes_entries() {
        let cache = CacheManager::new(CacheConfig::new());
        let id = EntityId::new();
        cache.on_save(&id, vec![cached("User")], vec![]).await;

        assert_eq!(cache.get_entity(&id).await, Some(id));
        let component = cache.get_component(&id, &TypeId::for_name("User")).await.unwrap();
        assert_eq!(component.data, json!({"name": "Alice"}));
    }

    #[tokio::test]
    async fn test_write_invalidate_evicts_entries() {
        let cache = CacheManager::new(CacheConfig::new().strategy(CacheStrategy::WriteInvalidate));
        let id = EntityId::new();
        cache.set_entity(&id).await;
        cache.set_component(&id, &cached("User")).await;

        cache.on_save(&id, vec![cached("User")], vec![]).await;

        assert_eq!(cache.get_entity(&id).await, None);
        assert!(cache.get_component(&id, &TypeId::for_name("User")).await.is_none());
        assert_eq!(cache.get_stats().await.invalidations, 2);
    }

    #[tokio::test]
    async fn test_delete_evicts_all_components() {
        let cache = CacheManager::default();
        let id = EntityId::new();
        cache.on_save(&id, vec![cached("A"), cached("B")], vec![]).await;
        cache.on_delete(&id).await;

        assert_eq!(cache.get_entity(&id).await, None);
        assert!(cache.get_component(&id, &TypeId::for_name("A")).await.is_none());
        assert_eq!(cache.get_stats().await.entries, 0);
    }

    #[tokio::test]
    async fn test_delete_waits_for_async_refresh() {
        let cache = CacheManager::new(CacheConfig::new().write_through_async(true));
        let id = EntityId::new();
        cache.on_save(&id, vec![cached("A")], vec![]).await;
        cache.on_save(&id, vec![cached("B")], vec![]).await;
        cache.on_delete(&id).await;

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(cache.get_entity(&id).await, None);
        assert!(cache.get_component(&id, &TypeId::for_name("A")).await.is_none());
        assert!(cache.get_component(&id, &TypeId::for_name("B")).await.is_none());
        assert_eq!(cache.get_stats().await.entries, 0);
    }

    #[tokio::test]
    async fn test_disabled_cache_is_passthrough() {
        let cache = CacheManager::disabled();
        let id = EntityId::new();
        cache.set_entity(&id).await;
        assert_eq!(cache.get_entity(&id).await, None);

        let stats = cache.get_stats().await;
        assert!(!stats.enabled);
        assert_eq!(stats.hits + stats.misses + stats.sets, 0);
    }

    #[tokio::test]
    async fn test_stats_hit_rate() {
        let cache = CacheManager::default();
        let id = EntityId::new();
        cache.get_entity(&id).await;
        cache.set_entity(&id).await;
        cache.get_entity(&id).await;

        let stats = cache.get_stats().await;
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert!((stats.hit_rate() - 0.5).abs() < f64::EPSILON);
    }

    struct BrokenProvider;

    #[async_trait]
    impl CacheProvider for BrokenProvider {
        fn name(&self) -> &str {
            "broken"
        }
        async fn get(&self, _key: &str) -> Result<Option<serde_json::Value>> {
            Err(DataError::Cache("connection refused".into()))
        }
        async fn set(&self, _key: &str, _value: serde_json::Value, _ttl: Option<Duration>) -> Result<()> {
            Err(DataError::Cache("connection refused".into()))
        }
        async fn delete(&self, _key: &str) -> Result<bool> {
            Err(DataError::Cache("connection refused".into()))
        }
        async fn delete_prefix(&self, _prefix: &str) -> Result<usize> {
            Err(DataError::Cache("connection refused".into()))
        }
        async fn clear(&self) -> Result<()> {
            Err(DataError::Cache("connection refused".into()))
        }
        async fn ping(&self) -> Result<()> {
            Err(DataError::Cache("connection refused".into()))
        }
        async fn len(&self) -> Result<usize> {
            Err(DataError::Cache("connection refused".into()))
        }
    }

    #[tokio::test]
    async fn test_provider_errors_are_swallowed_and_counted() {
        let cache = CacheManager::with_provider(CacheConfig::new(), Arc::new(BrokenProvider));
        let id = EntityId::new();
        cache.on_save(&id, vec![cached("User")], vec![]).await;
        assert_eq!(cache.get_entity(&id).await, None);
        assert!(!cache.ping().await);

        let stats = cache.get_stats().await;
        assert_eq!(stats.errors, 4);
        assert_eq!(stats.entries, 0);
    }
}
