use super::engine::{StorageEngine, StoredComponent, WriteBatch};
use super::table::{ComponentRow, ComponentTable, IndexSpec};
use crate::component::ComponentSchema;
use crate::core::{EntityId, Result, TypeId};
use crate::query::QueryPlan;
use async_trait::async_trait;
use chrono::Utc;
use tracing::{Level, event};
use tokio::sync::RwLock;

/// Row and index counters of an [`InMemoryStorage`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StorageStats {
    pub entities: usize,
    pub live_components: usize,
    pub deleted_components: usize,
    pub indexes: usize,
}

/// Process-local storage backend.
///
/// One table holds every component row; a single async lock makes each
/// [`WriteBatch`] atomic with respect to readers.
#[derive(Debug, Default)]
pub struct InMemoryStorage {
    table: RwLock<ComponentTable>,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn from_table(table: ComponentTable) -> Self {
        Self {
            table: RwLock::new(table),
        }
    }

    pub(crate) async fn table_copy(&self) -> ComponentTable {
        self.table.read().await.clone()
    }

    pub async fn stats(&self) -> StorageStats {
        let table = self.table.read().await;
        StorageStats {
            entities: table.entity_count(),
            live_components: table.live_row_count(),
            deleted_components: table.deleted_row_count(),
            indexes: table.index_count(),
        }
    }

    fn to_stored(row: &ComponentRow) -> StoredComponent {
        StoredComponent {
            component_id: row.component_id,
            type_id: row.type_id.clone(),
            data: row.data.clone(),
        }
    }
}

#[async_trait]
impl StorageEngine for InMemoryStorage {
    fn name(&self) -> &str {
        "memory"
    }

    async fn prepare_component(&self, schema: &ComponentSchema) -> Result<()> {
        let specs: Vec<IndexSpec> = schema
            .indexed_properties()
            .into_iter()
            .map(|p| IndexSpec {
                field: p.name,
                kind: p.kind,
                index: p.index,
            })
            .collect();

        let mut table = self.table.write().await;
        if table.index_specs().get(schema.type_id()) == Some(&specs) {
            return Ok(());
        }
        event!(
            Level::DEBUG,
            component = schema.name(),
            indexes = specs.len(),
            "Declaring component indexes"
        );
        table.declare_indexes(schema.type_id(), specs);
        Ok(())
    }

    async fn commit(&self, batch: WriteBatch) -> Result<()> {
        let mut table = self.table.write().await;
        for type_id in &batch.removals {
            table.remove(&batch.entity_id, type_id);
        }
        for component in batch.upserts {
            table.upsert(batch.entity_id, component.type_id, component.component_id, component.data);
        }
        Ok(())
    }

    async fn load_component(&self, entity_id: &EntityId, type_id: &TypeId) -> Result<Option<StoredComponent>> {
        let table = self.table.read().await;
        Ok(table.get_live(entity_id, type_id).map(Self::to_stored))
    }

    async fn load_components(
        &self,
        entity_id: &EntityId,
        type_ids: Option<&[TypeId]>,
    ) -> Result<Vec<StoredComponent>> {
        let table = self.table.read().await;
        Ok(table
            .live_rows_for_entity(entity_id)
            .into_iter()
            .filter(|row| type_ids.is_none_or(|ids| ids.contains(&row.type_id)))
            .map(Self::to_stored)
            .collect())
    }

    async fn component_types(&self, entity_id: &EntityId) -> Result<Vec<TypeId>> {
        let table = self.table.read().await;
        Ok(table
            .live_rows_for_entity(entity_id)
            .into_iter()
            .map(|row| row.type_id.clone())
            .collect())
    }

    async fn entity_exists(&self, entity_id: &EntityId) -> Result<bool> {
        Ok(self.table.read().await.entity_exists(entity_id))
    }

    async fn delete_entity(&self, entity_id: &EntityId, hard: bool) -> Result<usize> {
        let mut table = self.table.write().await;
        Ok(table.delete_entity(entity_id, hard, Utc::now()))
    }

    async fn select(&self, plan: &QueryPlan) -> Result<Vec<EntityId>> {
        self.table.read().await.select(plan)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{ComponentId, Document, FieldKind, Value};

    fn stored(type_id: &TypeId, age: i64) -> StoredComponent {
        let mut data = Document::new();
        data.insert("age".into(), Value::Integer(age));
        StoredComponent {
            component_id: ComponentId::new(),
            type_id: type_id.clone(),
            data,
        }
    }

    #[tokio::test]
    async fn test_commit_and_load() {
        let storage = InMemoryStorage::new();
        let schema = ComponentSchema::new("User").field("age", FieldKind::Number);
        storage.prepare_component(&schema).await.unwrap();

        let id = EntityId::new();
        let mut batch = WriteBatch::new(id);
        batch.upserts.push(stored(schema.type_id(), 30));
        storage.commit(batch).await.unwrap();

        assert!(storage.entity_exists(&id).await.unwrap());
        let loaded = storage.load_component(&id, schema.type_id()).await.unwrap().unwrap();
        assert_eq!(loaded.data.get("age"), Some(&Value::Integer(30)));
        assert_eq!(storage.load_components(&id, None).await.unwrap().len(), 1);
        assert_eq!(storage.component_types(&id).await.unwrap(), vec![schema.type_id().clone()]);
        assert!(
            storage
                .load_components(&id, Some(&[TypeId::for_name("Other")]))
                .await
                .unwrap()
                .is_empty()
        );
    }

    #[tokio::test]
    async fn test_removal_and_soft_delete() {
        let storage = InMemoryStorage::new();
        let a = TypeId::for_name("A");
        let b = TypeId::for_name("B");
        let id = EntityId::new();

        let mut batch = WriteBatch::new(id);
        batch.upserts.push(stored(&a, 1));
        batch.upserts.push(stored(&b, 2));
        storage.commit(batch).await.unwrap();

        let mut batch = WriteBatch::new(id);
        batch.removals.push(b.clone());
        storage.commit(batch).await.unwrap();
        assert!(storage.load_component(&id, &b).await.unwrap().is_none());
        assert_eq!(storage.component_types(&id).await.unwrap(), vec![a.clone()]);

        assert_eq!(storage.delete_entity(&id, false).await.unwrap(), 1);
        assert!(!storage.entity_exists(&id).await.unwrap());

        let stats = storage.stats().await;
        assert_eq!(stats.live_components, 0);
        assert_eq!(stats.deleted_components, 1);
    }
}
