use async_trait::async_trait;
use componentdb::query::QueryPlan;
use componentdb::{
    CacheConfig, ComponentSchema, DataError, EngineContext, Entity, EntityId, EventKind, FieldKind, HookHandler,
    HookOptions, InMemoryStorage, Query, Result, StorageEngine, StoredComponent, TypeId, Value, WriteBatch,
};
use serde_json::json;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

/// Wraps the in-memory engine, counting commits and failing them on demand.
#[derive(Default)]
struct FlakyStorage {
    inner: InMemoryStorage,
    commits: AtomicUsize,
    fail_commits: AtomicBool,
}

#[async_trait]
impl StorageEngine for FlakyStorage {
    fn name(&self) -> &str {
        "flaky"
    }

    async fn prepare_component(&self, schema: &ComponentSchema) -> Result<()> {
        self.inner.prepare_component(schema).await
    }

    async fn commit(&self, batch: WriteBatch) -> Result<()> {
        self.commits.fetch_add(1, Ordering::SeqCst);
        if self.fail_commits.load(Ordering::SeqCst) {
            return Err(DataError::Storage("connection reset".into()));
        }
        self.inner.commit(batch).await
    }

    async fn load_component(&self, entity_id: &EntityId, type_id: &TypeId) -> Result<Option<StoredComponent>> {
        self.inner.load_component(entity_id, type_id).await
    }

    async fn load_components(
        &self,
        entity_id: &EntityId,
        type_ids: Option<&[TypeId]>,
    ) -> Result<Vec<StoredComponent>> {
        self.inner.load_components(entity_id, type_ids).await
    }

    async fn entity_exists(&self, entity_id: &EntityId) -> Result<bool> {
        self.inner.entity_exists(entity_id).await
    }

    async fn delete_entity(&self, entity_id: &EntityId, hard: bool) -> Result<usize> {
        self.inner.delete_entity(entity_id, hard).await
    }

    async fn select(&self, plan: &QueryPlan) -> Result<Vec<EntityId>> {
        self.inner.select(plan).await
    }
}

async fn setup(storage: Arc<FlakyStorage>) -> Arc<EngineContext> {
    let ctx = EngineContext::builder().storage(storage).build().unwrap();
    ctx.register_component(
        ComponentSchema::new("Order")
            .field("sku", FieldKind::String)
            .field("qty", FieldKind::Number),
    )
    .await
    .unwrap();
    ctx
}

#[tokio::test]
async fn test_clean_save_does_not_touch_storage() {
    let storage = Arc::new(FlakyStorage::default());
    let ctx = setup(Arc::clone(&storage)).await;
    let updates = Arc::new(Mutex::new(0));
    let sink = Arc::clone(&updates);
    ctx.hooks()
        .register_entity_hook(
            EventKind::EntityUpdated,
            HookHandler::sync(move |_| {
                *sink.lock().unwrap() += 1;
                Ok(())
            }),
            HookOptions::new(),
        )
        .unwrap();

    let mut order = Entity::new(&ctx);
    order.add("Order", json!({"sku": "A-1", "qty": 2})).unwrap();
    order.save().await.unwrap();
    assert_eq!(storage.commits.load(Ordering::SeqCst), 1);

    assert!(!order.save().await.unwrap());
    assert!(!order.save().await.unwrap());
    assert_eq!(storage.commits.load(Ordering::SeqCst), 1);
    assert_eq!(*updates.lock().unwrap(), 0);
}

#[tokio::test]
async fn test_failed_save_keeps_entity_dirty_and_can_retry() {
    let storage = Arc::new(FlakyStorage::default());
    let ctx = setup(Arc::clone(&storage)).await;
    let created = Arc::new(Mutex::new(0));
    let sink = Arc::clone(&created);
    ctx.hooks()
        .register_entity_hook(
            EventKind::EntityCreated,
            HookHandler::sync(move |_| {
                *sink.lock().unwrap() += 1;
                Ok(())
            }),
            HookOptions::new(),
        )
        .unwrap();

    let mut order = Entity::new(&ctx);
    order.add("Order", json!({"sku": "A-1", "qty": 2})).unwrap();

    storage.fail_commits.store(true, Ordering::SeqCst);
    let err = order.save().await.unwrap_err();
    assert!(err.is_storage());
    assert!(order.is_dirty());
    assert!(!order.is_persisted());
    assert_eq!(order.changed_components(), vec!["Order".to_string()]);
    assert_eq!(*created.lock().unwrap(), 0);

    let type_id = ctx.registry().get_type_id("Order").unwrap();
    assert!(ctx.cache().get_component(&order.id(), &type_id).await.is_none());

    storage.fail_commits.store(false, Ordering::SeqCst);
    assert!(order.save().await.unwrap());
    assert!(order.is_persisted());
    assert_eq!(*created.lock().unwrap(), 1);
    assert!(Entity::find_by_id(&ctx, order.id()).await.unwrap().is_some());
}

#[tokio::test]
async fn test_failed_removal_keeps_tombstone() {
    let storage = Arc::new(FlakyStorage::default());
    let ctx = setup(Arc::clone(&storage)).await;

    let mut order = Entity::new(&ctx);
    order.add("Order", json!({"sku": "A-1", "qty": 2})).unwrap();
    order.save().await.unwrap();

    order.remove("Order").unwrap();
    storage.fail_commits.store(true, Ordering::SeqCst);
    assert!(order.save().await.is_err());
    assert!(!order.has("Order"));

    storage.fail_commits.store(false, Ordering::SeqCst);
    order.save().await.unwrap();
    assert!(Entity::find_by_id(&ctx, order.id()).await.unwrap().is_none());
}

#[tokio::test]
async fn test_hard_delete_removes_rows_soft_delete_keeps_them() {
    let storage = Arc::new(InMemoryStorage::new());
    let ctx = EngineContext::builder()
        .storage(Arc::clone(&storage) as Arc<dyn StorageEngine>)
        .cache_config(CacheConfig::disabled())
        .build()
        .unwrap();
    ctx.register_component(ComponentSchema::new("Order").field("sku", FieldKind::String))
        .await
        .unwrap();

    let mut soft = Entity::new(&ctx);
    soft.add("Order", json!({"sku": "S"})).unwrap();
    soft.save().await.unwrap();
    let mut hard = Entity::new(&ctx);
    hard.add("Order", json!({"sku": "H"})).unwrap();
    hard.save().await.unwrap();

    soft.delete(false).await.unwrap();
    hard.delete(true).await.unwrap();

    let stats = storage.stats().await;
    assert_eq!(stats.live_components, 0);
    assert_eq!(stats.deleted_components, 1);
    assert!(!storage.entity_exists(&soft.id()).await.unwrap());
    assert!(!storage.entity_exists(&hard.id()).await.unwrap());
}

#[tokio::test]
async fn test_snapshot_round_trip_keeps_live_and_deleted_rows() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("world.snapshot");

    let storage = Arc::new(InMemoryStorage::new());
    let ctx = EngineContext::builder()
        .storage(Arc::clone(&storage) as Arc<dyn StorageEngine>)
        .build()
        .unwrap();
    ctx.register_component(
        ComponentSchema::new("Order")
            .field("sku", FieldKind::String)
            .indexed("qty", FieldKind::Number, componentdb::IndexKind::NumericRange),
    )
    .await
    .unwrap();

    let mut kept = Entity::new(&ctx);
    kept.add("Order", json!({"sku": "K", "qty": 5})).unwrap();
    kept.save().await.unwrap();
    let mut gone = Entity::new(&ctx);
    gone.add("Order", json!({"sku": "G", "qty": 9})).unwrap();
    gone.save().await.unwrap();
    gone.delete(false).await.unwrap();

    storage.save_snapshot(&path).await.unwrap();

    let restored = Arc::new(InMemoryStorage::open_snapshot(&path).unwrap());
    let stats = restored.stats().await;
    assert_eq!(stats.live_components, 1);
    assert_eq!(stats.deleted_components, 1);
    assert_eq!(stats.indexes, 1);

    let ctx2 = EngineContext::builder()
        .storage(restored as Arc<dyn StorageEngine>)
        .build()
        .unwrap();
    ctx2.register_component(
        ComponentSchema::new("Order")
            .field("sku", FieldKind::String)
            .indexed("qty", FieldKind::Number, componentdb::IndexKind::NumericRange),
    )
    .await
    .unwrap();

    let ids = Query::new(&ctx2)
        .with_filters("Order", vec![componentdb::Filter::gte("qty", 1)])
        .exec_ids()
        .await
        .unwrap();
    assert_eq!(ids, vec![kept.id()]);

    let mut loaded = Entity::find_by_id(&ctx2, kept.id()).await.unwrap().unwrap();
    let order = loaded.get("Order").await.unwrap().unwrap();
    assert_eq!(order.get("sku"), Some(&Value::Text("K".into())));
}

#[tokio::test]
async fn test_open_missing_snapshot_fails() {
    let dir = TempDir::new().unwrap();
    let result = InMemoryStorage::open_snapshot(dir.path().join("absent.snapshot"));
    assert!(result.is_err());
}
