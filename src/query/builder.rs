use super::filter::Filter;
use super::plan::{ComponentConstraint, QueryPlan, SortDirection, SortKey};
use crate::component::ComponentSchema;
use crate::context::EngineContext;
use crate::core::{EntityId, Result, TypeId, Value};
use crate::entity::{Entity, load_component};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{Level, event};

#[derive(Debug, Clone, PartialEq)]
enum Hydration {
    /// Leave every component lazy
    Lazy,
    /// Load the components named in `with`
    Required,
}

/// Fluent query over entities.
///
/// # Examples
///
/// ```
/// use componentdb::{ComponentSchema, EngineContext, Entity, FieldKind, Filter, Query, SortDirection};
/// use serde_json::json;
///
/// # tokio_test::block_on(async {
/// let ctx = EngineContext::in_memory();
/// ctx.register_component(
///     ComponentSchema::new("User")
///         .field("name", FieldKind::String)
///         .field("age", FieldKind::Number),
/// )
/// .await?;
///
/// let mut alice = Entity::new(&ctx);
/// alice.add("User", json!({"name": "Alice", "age": 25}))?;
/// alice.save().await?;
///
/// let adults = Query::new(&ctx)
///     .with_filters("User", vec![Filter::gt("age", 20)])
///     .sort_by("User", "name", SortDirection::Asc)
///     .populate()
///     .exec()
///     .await?;
/// assert_eq!(adults.len(), 1);
/// # Ok::<(), componentdb::DataError>(())
/// # }).unwrap();
/// ```
#[derive(Debug, Clone)]
pub struct Query {
    ctx: Arc<EngineContext>,
    required: Vec<(String, Vec<Filter>)>,
    excluded: Vec<String>,
    entity_ids: Option<Vec<EntityId>>,
    excluded_entity_ids: Vec<EntityId>,
    sort: Option<(String, String, SortDirection)>,
    limit: Option<usize>,
    offset: usize,
    hydration: Hydration,
    eager: Vec<String>,
}

impl Query {
    pub fn new(ctx: &Arc<EngineContext>) -> Self {
        Self {
            ctx: Arc::clone(ctx),
            required: Vec::new(),
            excluded: Vec::new(),
            entity_ids: None,
            excluded_entity_ids: Vec::new(),
            sort: None,
            limit: None,
            offset: 0,
            hydration: Hydration::Lazy,
            eager: Vec::new(),
        }
    }

    /// Require the component.
    pub fn with(self, component: &str) -> Self {
        self.with_filters(component, Vec::new())
    }

    /// Require the component and constrain its fields; repeated calls for
    /// the same component accumulate filters.
    pub fn with_filters(mut self, component: &str, filters: Vec<Filter>) -> Self {
        match self.required.iter_mut().find(|(name, _)| name == component) {
            Some((_, existing)) => existing.extend(filters),
            None => self.required.push((component.to_string(), filters)),
        }
        self
    }

    /// Reject entities carrying the component.
    pub fn without(mut self, component: &str) -> Self {
        self.excluded.push(component.to_string());
        self
    }

    /// Restrict results to the given id; may be called repeatedly.
    pub fn find_by_id(mut self, id: EntityId) -> Self {
        self.entity_ids.get_or_insert_with(Vec::new).push(id);
        self
    }

    pub fn exclude_entity_id(mut self, id: EntityId) -> Self {
        self.excluded_entity_ids.push(id);
        self
    }

    pub fn take(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: usize) -> Self {
        self.offset = offset;
        self
    }

    pub fn sort_by(mut self, component: &str, field: &str, direction: SortDirection) -> Self {
        self.sort = Some((component.to_string(), field.to_string(), direction));
        self
    }

    /// Hydrate the required components into the returned entities.
    pub fn populate(mut self) -> Self {
        self.hydration = Hydration::Required;
        self
    }

    /// Hydrate these components too, when the entity carries them.
    pub fn eager_load_components(mut self, components: &[&str]) -> Self {
        self.eager.extend(components.iter().map(|c| c.to_string()));
        self
    }

    fn type_id(&self, name: &str) -> Result<TypeId> {
        self.ctx.registry().get_type_id(name)
    }

    /// Resolve component names into a storage plan.
    pub fn plan(&self) -> Result<QueryPlan> {
        let required = self
            .required
            .iter()
            .map(|(name, filters)| {
                Ok(ComponentConstraint {
                    type_id: self.type_id(name)?,
                    filters: filters.clone(),
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let excluded = self
            .excluded
            .iter()
            .map(|name| self.type_id(name))
            .collect::<Result<Vec<_>>>()?;

        let sort = match &self.sort {
            Some((component, field, direction)) => Some(SortKey {
                type_id: self.type_id(component)?,
                field: field.clone(),
                direction: *direction,
            }),
            None => None,
        };

        Ok(QueryPlan {
            required,
            excluded,
            entity_ids: self.entity_ids.clone(),
            excluded_entity_ids: self.excluded_entity_ids.clone(),
            sort,
            limit: self.limit,
            offset: self.offset,
        })
    }

    /// Matching entity ids in result order, without hydration.
    pub async fn exec_ids(&self) -> Result<Vec<EntityId>> {
        let plan = self.plan()?;
        self.ctx.storage().select(&plan).await
    }

    /// Matching entities in result order.
    pub async fn exec(&self) -> Result<Vec<Entity>> {
        let plan = self.plan()?;
        let ids = self.ctx.storage().select(&plan).await?;

        let schemas = self.hydrated_schemas()?;

        let mut entities = Vec::with_capacity(ids.len());
        for id in ids {
            // Every live type, so lazy components stay visible to has/remove/duplicate
            let stored: HashSet<TypeId> = self.ctx.storage().component_types(&id).await?.into_iter().collect();
            let mut components = Vec::with_capacity(schemas.len());
            for schema in &schemas {
                if let Some(component) = load_component(&self.ctx, &id, schema).await? {
                    components.push(component);
                }
            }
            entities.push(Entity::hydrated(&self.ctx, id, components, stored));
        }

        event!(
            Level::DEBUG,
            results = entities.len(),
            hydrated = schemas.len(),
            "Query executed"
        );
        Ok(entities)
    }

    fn hydrated_schemas(&self) -> Result<Vec<Arc<ComponentSchema>>> {
        let mut names: Vec<&str> = Vec::new();
        if self.hydration == Hydration::Required {
            names.extend(self.required.iter().map(|(name, _)| name.as_str()));
        }
        names.extend(self.eager.iter().map(String::as_str));

        let mut seen = HashSet::new();
        names
            .into_iter()
            .filter(|name| seen.insert(*name))
            .map(|name| self.ctx.registry().get(name))
            .collect()
    }

    /// Number of matching entities; pagination is ignored.
    pub async fn count(&self) -> Result<usize> {
        let plan = self.plan()?;
        self.ctx.storage().count(&plan).await
    }

    pub async fn find_one_by_id(mut self, id: EntityId) -> Result<Option<Entity>> {
        self.entity_ids = Some(vec![id]);
        Ok(self.take(1).exec().await?.into_iter().next())
    }

    /// First entity whose `component.field` equals `value`.
    pub async fn find_one_by(self, component: &str, field: &str, value: impl Into<Value>) -> Result<Option<Entity>> {
        Ok(self
            .with_filters(component, vec![Filter::eq(field, value)])
            .take(1)
            .exec()
            .await?
            .into_iter()
            .next())
    }
}
