use super::filter::Filter;
use crate::core::{EntityId, TypeId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SortKey {
    pub type_id: TypeId,
    pub field: String,
    pub direction: SortDirection,
}

/// A component the entity must carry, with optional field predicates.
#[derive(Debug, Clone, PartialEq)]
pub struct ComponentConstraint {
    pub type_id: TypeId,
    pub filters: Vec<Filter>,
}

/// Storage-level description of a query.
///
/// Produced by the `Query` builder and executed by a `StorageEngine`.
/// Without a sort key results come back in entity-id (creation) order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryPlan {
    pub required: Vec<ComponentConstraint>,
    pub excluded: Vec<TypeId>,
    pub entity_ids: Option<Vec<EntityId>>,
    pub excluded_entity_ids: Vec<EntityId>,
    pub sort: Option<SortKey>,
    pub limit: Option<usize>,
    pub offset: usize,
}

impl QueryPlan {
    /// Copy of the plan without pagination, for counting.
    pub fn without_pagination(&self) -> Self {
        Self {
            limit: None,
            offset: 0,
            sort: None,
            ..self.clone()
        }
    }
}
