use crate::cache::{CacheConfig, CacheManager, CacheProvider};
use crate::component::{Component, ComponentRegistry, ComponentSchema};
use crate::core::{DataError, Result, TypeId};
use crate::hooks::HookDispatcher;
use crate::storage::{InMemoryStorage, StorageEngine};
use std::sync::Arc;

/// Shared services every entity and query works against.
///
/// One context replaces process-wide singletons: tests build their own
/// and nothing leaks between them.
///
/// # Examples
///
/// ```
/// use componentdb::{CacheConfig, CacheStrategy, EngineContext};
///
/// let ctx = EngineContext::builder()
///     .cache_config(CacheConfig::new().strategy(CacheStrategy::WriteInvalidate))
///     .build()
///     .unwrap();
///
/// assert!(ctx.registry().is_empty());
/// assert_eq!(ctx.storage().name(), "memory");
/// ```
pub struct EngineContext {
    registry: Arc<ComponentRegistry>,
    storage: Arc<dyn StorageEngine>,
    cache: Arc<CacheManager>,
    hooks: Arc<HookDispatcher>,
}

impl EngineContext {
    pub fn builder() -> EngineContextBuilder {
        EngineContextBuilder::default()
    }

    /// Context with in-memory storage, default cache and no hooks.
    pub fn in_memory() -> Arc<Self> {
        Arc::new(Self {
            registry: Arc::new(ComponentRegistry::new()),
            storage: Arc::new(InMemoryStorage::new()),
            cache: Arc::new(CacheManager::default()),
            hooks: Arc::new(HookDispatcher::new()),
        })
    }

    pub fn registry(&self) -> &Arc<ComponentRegistry> {
        &self.registry
    }

    pub fn storage(&self) -> &Arc<dyn StorageEngine> {
        &self.storage
    }

    pub fn cache(&self) -> &Arc<CacheManager> {
        &self.cache
    }

    pub fn hooks(&self) -> &Arc<HookDispatcher> {
        &self.hooks
    }

    /// Register a component type and let storage declare its indexes.
    pub async fn register_component(&self, schema: ComponentSchema) -> Result<TypeId> {
        let type_id = self.registry.register(schema)?;
        let registered = self
            .registry
            .get_by_type_id(&type_id)
            .ok_or_else(|| DataError::NotRegistered(type_id.to_string()))?;
        self.storage.prepare_component(&registered).await?;
        Ok(type_id)
    }

    pub async fn register_type<T: Component>(&self) -> Result<TypeId> {
        self.register_component(T::schema()).await
    }
}

impl std::fmt::Debug for EngineContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineContext")
            .field("registry", &self.registry)
            .field("storage", &self.storage.name())
            .field("cache", &self.cache)
            .field("hooks", &self.hooks)
            .finish()
    }
}

#[derive(Default)]
pub struct EngineContextBuilder {
    registry: Option<Arc<ComponentRegistry>>,
    storage: Option<Arc<dyn StorageEngine>>,
    cache_config: Option<CacheConfig>,
    cache_provider: Option<Arc<dyn CacheProvider>>,
    hooks: Option<Arc<HookDispatcher>>,
}

impl EngineContextBuilder {
    pub fn registry(mut self, registry: Arc<ComponentRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn storage(mut self, storage: Arc<dyn StorageEngine>) -> Self {
        self.storage = Some(storage);
        self
    }

    pub fn cache_config(mut self, config: CacheConfig) -> Self {
        self.cache_config = Some(config);
        self
    }

    /// Use a custom provider instead of the one named by the config.
    pub fn cache_provider(mut self, provider: Arc<dyn CacheProvider>) -> Self {
        self.cache_provider = Some(provider);
        self
    }

    pub fn hooks(mut self, hooks: Arc<HookDispatcher>) -> Self {
        self.hooks = Some(hooks);
        self
    }

    pub fn build(self) -> Result<Arc<EngineContext>> {
        let config = self.cache_config.unwrap_or_default();
        config
            .validate()
            .map_err(|e| DataError::InvalidArgument(format!("Invalid cache config: {}", e)))?;

        let cache = match self.cache_provider {
            Some(provider) => CacheManager::with_provider(config, provider),
            None => CacheManager::new(config),
        };

        Ok(Arc::new(EngineContext {
            registry: self.registry.unwrap_or_default(),
            storage: self.storage.unwrap_or_else(|| Arc::new(InMemoryStorage::new())),
            cache: Arc::new(cache),
            hooks: self.hooks.unwrap_or_default(),
        }))
    }
}
