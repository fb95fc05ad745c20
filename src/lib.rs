// ============================================================================
// componentdb Library
// ============================================================================

//! Entity-component persistence engine.
//!
//! Entities own typed components, persist them through a pluggable
//! [`StorageEngine`], keep a [`CacheManager`] consistent with each write and
//! announce every mutation through a [`HookDispatcher`]. All shared services
//! hang off an [`EngineContext`].
//!
//! ```
//! use componentdb::{ComponentSchema, EngineContext, Entity, FieldKind, IndexKind};
//! use serde_json::json;
//!
//! # tokio_test::block_on(async {
//! let ctx = EngineContext::in_memory();
//! ctx.register_component(
//!     ComponentSchema::new("User")
//!         .field("name", FieldKind::String)
//!         .indexed("age", FieldKind::Number, IndexKind::NumericRange),
//! )
//! .await?;
//!
//! let mut user = Entity::new(&ctx);
//! user.add("User", json!({"name": "Alice", "age": 25}))?;
//! user.save().await?;
//!
//! let loaded = Entity::find_by_id(&ctx, user.id()).await?.unwrap();
//! assert!(loaded.has("User"));
//! # Ok::<(), componentdb::DataError>(())
//! # }).unwrap();
//! ```

pub mod archetype;
pub mod cache;
pub mod component;
pub mod context;
pub mod core;
pub mod entity;
pub mod hooks;
pub mod query;
pub mod storage;

// Re-export main types for convenience
pub use archetype::Archetype;
pub use context::{EngineContext, EngineContextBuilder};
pub use crate::core::{ComponentId, DataError, Document, EntityId, FieldKind, Result, TypeId, Value};
pub use entity::{Entity, IntoEntity};

pub use component::{Component, ComponentData, ComponentRegistry, ComponentSchema, FieldDef, IndexKind, IndexedProperty};

pub use query::{Filter, FilterOp, Query, SortDirection};

pub use cache::{
    CacheConfig, CacheManager, CacheProvider, CacheProviderKind, CacheStats, CacheStrategy, MemoryCacheProvider,
    NoopCacheProvider,
};

pub use hooks::{EventKind, HookDispatcher, HookHandler, HookId, HookMetrics, HookOptions, HookReport, LifecycleEvent};

pub use storage::{InMemoryStorage, StorageEngine, StorageStats, StoredComponent, WriteBatch};
