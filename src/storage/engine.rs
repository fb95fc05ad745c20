use crate::component::ComponentSchema;
use crate::core::{ComponentId, Document, EntityId, Result, TypeId};
use crate::query::QueryPlan;
use async_trait::async_trait;

/// A component as it lives in storage.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredComponent {
    pub component_id: ComponentId,
    pub type_id: TypeId,
    pub data: Document,
}

/// All writes produced by one entity save.
///
/// A storage engine applies a batch atomically: either every upsert and
/// removal becomes visible, or none does.
#[derive(Debug, Clone, PartialEq)]
pub struct WriteBatch {
    pub entity_id: EntityId,
    pub upserts: Vec<StoredComponent>,
    pub removals: Vec<TypeId>,
}

impl WriteBatch {
    pub fn new(entity_id: EntityId) -> Self {
        Self {
            entity_id,
            upserts: Vec::new(),
            removals: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.upserts.is_empty() && self.removals.is_empty()
    }
}

/// Storage engine trait - allows pluggable storage backends
#[async_trait]
pub trait StorageEngine: Send + Sync {
    /// Backend name, used in diagnostics
    fn name(&self) -> &str;

    /// Prepare storage for a component type (declare its indexes)
    async fn prepare_component(&self, schema: &ComponentSchema) -> Result<()>;

    /// Apply one entity's writes atomically
    async fn commit(&self, batch: WriteBatch) -> Result<()>;

    /// Load one live component
    async fn load_component(&self, entity_id: &EntityId, type_id: &TypeId) -> Result<Option<StoredComponent>>;

    /// Load live components of an entity, optionally restricted to some types
    async fn load_components(
        &self,
        entity_id: &EntityId,
        type_ids: Option<&[TypeId]>,
    ) -> Result<Vec<StoredComponent>>;

    /// Types of the entity's live components
    async fn component_types(&self, entity_id: &EntityId) -> Result<Vec<TypeId>> {
        Ok(self
            .load_components(entity_id, None)
            .await?
            .into_iter()
            .map(|c| c.type_id)
            .collect())
    }

    /// Whether the entity has at least one live component
    async fn entity_exists(&self, entity_id: &EntityId) -> Result<bool>;

    /// Soft-delete (`hard == false`) or physically remove an entity.
    /// Returns the number of live components affected.
    async fn delete_entity(&self, entity_id: &EntityId, hard: bool) -> Result<usize>;

    /// Matching entity ids in result order
    async fn select(&self, plan: &QueryPlan) -> Result<Vec<EntityId>>;

    /// Number of matching entities, ignoring pagination
    async fn count(&self, plan: &QueryPlan) -> Result<usize> {
        Ok(self.select(&plan.without_pagination()).await?.len())
    }
}
