pub mod config;
pub mod manager;
pub mod provider;

pub use config::{CacheConfig, CacheProviderKind, CacheStrategy};
pub use manager::{CacheManager, CacheStats, CachedComponent, component_key, entity_key};
pub use provider::{CacheProvider, MemoryCacheProvider, NoopCacheProvider};
