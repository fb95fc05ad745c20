//! Entities: aggregates of components with persisted/dirty tracking.
//!
//! `add`, `set` and `remove` only touch memory and return immediately;
//! `save` and `delete` are the suspension points that reach storage, the
//! cache and awaited hooks.

mod document;
mod lifecycle;

pub use document::IntoEntity;

use crate::cache::CachedComponent;
use crate::component::{Component, ComponentData, ComponentSchema};
use crate::context::EngineContext;
use crate::core::{DataError, Document, EntityId, Result, TypeId};
use crate::hooks::LifecycleEvent;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{Level, event};

pub struct Entity {
    ctx: Arc<EngineContext>,
    id: EntityId,
    components: HashMap<TypeId, ComponentData>,
    /// Tombstones awaiting the next save
    removed: HashSet<TypeId>,
    /// Types known to have a live row in storage
    stored: HashSet<TypeId>,
    /// Partial updates to stored components that are not loaded yet,
    /// merged against the stored row on the next `get` or `save`
    pending: HashMap<TypeId, Document>,
    persisted: bool,
    dirty: bool,
}

impl Entity {
    /// A brand-new entity with a time-ordered id.
    pub fn new(ctx: &Arc<EngineContext>) -> Self {
        Self::with_id(ctx, EntityId::new())
    }

    /// A new, unsaved entity using a caller-supplied id.
    pub fn with_id(ctx: &Arc<EngineContext>, id: EntityId) -> Self {
        Self {
            ctx: Arc::clone(ctx),
            id,
            components: HashMap::new(),
            removed: HashSet::new(),
            stored: HashSet::new(),
            pending: HashMap::new(),
            persisted: false,
            dirty: true,
        }
    }

    /// An entity read back from storage with some components already loaded.
    pub(crate) fn hydrated(
        ctx: &Arc<EngineContext>,
        id: EntityId,
        components: Vec<ComponentData>,
        stored: HashSet<TypeId>,
    ) -> Self {
        let mut stored = stored;
        let components: HashMap<TypeId, ComponentData> = components
            .into_iter()
            .map(|c| {
                stored.insert(c.type_id().clone());
                (c.type_id().clone(), c)
            })
            .collect();
        Self {
            ctx: Arc::clone(ctx),
            id,
            components,
            removed: HashSet::new(),
            stored,
            pending: HashMap::new(),
            persisted: true,
            dirty: false,
        }
    }

    pub fn id(&self) -> EntityId {
        self.id
    }

    pub fn is_persisted(&self) -> bool {
        self.persisted
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn context(&self) -> &Arc<EngineContext> {
        &self.ctx
    }

    fn schema(&self, name: &str) -> Result<Arc<ComponentSchema>> {
        self.ctx.registry().get(name)
    }

    fn emit(&self, event: LifecycleEvent) {
        self.ctx.hooks().fire_detached(&event);
    }

    /// Insert a fully decoded document, replacing any existing instance.
    ///
    /// A stored but unloaded instance counts as existing; its previous
    /// fields are unknown, so the update event carries an empty `old`.
    fn put(&mut self, schema: &ComponentSchema, doc: Document) {
        let type_id = schema.type_id().clone();
        let was_stored = self.stored.contains(&type_id) && !self.removed.contains(&type_id);
        self.removed.remove(&type_id);
        self.pending.remove(&type_id);
        self.dirty = true;

        let event = match self.components.get_mut(&type_id) {
            Some(existing) => {
                let old = existing.replace(doc.clone());
                LifecycleEvent::ComponentUpdated {
                    entity_id: self.id,
                    component: schema.name().to_string(),
                    type_id,
                    old,
                    new: doc,
                }
            }
            None => {
                self.components
                    .insert(type_id.clone(), ComponentData::new(schema.name(), type_id.clone(), doc.clone()));
                if was_stored {
                    LifecycleEvent::ComponentUpdated {
                        entity_id: self.id,
                        component: schema.name().to_string(),
                        type_id,
                        old: Document::new(),
                        new: doc,
                    }
                } else {
                    LifecycleEvent::ComponentAdded {
                        entity_id: self.id,
                        component: schema.name().to_string(),
                        type_id,
                        data: doc,
                    }
                }
            }
        };
        self.emit(event);
    }

    /// Create or replace a component from a JSON object.
    ///
    /// Missing fields take their declared defaults. Fires `component.added`,
    /// or `component.updated` when the entity already carries the component.
    pub fn add(&mut self, name: &str, data: serde_json::Value) -> Result<()> {
        let schema = self.schema(name)?;
        let doc = schema.decode(&data)?;
        self.put(&schema, doc);
        Ok(())
    }

    pub fn add_typed<T: Component>(&mut self, component: &T) -> Result<()> {
        let data = serde_json::to_value(component)?;
        self.add(&T::component_name(), data)
    }

    /// Merge fields into an existing component, or add it when absent.
    ///
    /// For a stored component that has not been loaded the merge is
    /// deferred: the fields are kept aside and merged against the stored
    /// row by the next [`get`](Self::get) or [`save`](Self::save), which
    /// also fires `component.updated` with the real old and new documents.
    pub fn set(&mut self, name: &str, partial: serde_json::Value) -> Result<()> {
        let schema = self.schema(name)?;
        let type_id = schema.type_id().clone();

        let present = !self.removed.contains(&type_id);
        if present && !self.components.contains_key(&type_id) && self.stored.contains(&type_id) {
            let changes = schema.decode_partial(&partial)?;
            if !changes.is_empty() {
                self.pending.entry(type_id).or_default().extend(changes);
                self.dirty = true;
            }
            return Ok(());
        }
        if !present || !self.components.contains_key(&type_id) {
            let doc = schema.decode(&partial)?;
            self.put(&schema, doc);
            return Ok(());
        }

        let changes = schema.decode_partial(&partial)?;
        let Some(component) = self.components.get_mut(&type_id) else {
            return Ok(());
        };
        let old = component.merge(changes);
        if &old == component.data() {
            return Ok(());
        }

        let new = component.data().clone();
        self.dirty = true;
        self.emit(LifecycleEvent::ComponentUpdated {
            entity_id: self.id,
            component: schema.name().to_string(),
            type_id,
            old,
            new,
        });
        Ok(())
    }

    /// Tombstone a component until the next save.
    ///
    /// Returns `false` when the entity carries no such component.
    pub fn remove(&mut self, name: &str) -> Result<bool> {
        let schema = self.schema(name)?;
        let type_id = schema.type_id().clone();
        if self.removed.contains(&type_id) {
            return Ok(false);
        }

        self.pending.remove(&type_id);
        let data = match self.components.remove(&type_id) {
            Some(component) => component.data().clone(),
            None if self.stored.contains(&type_id) => Document::new(),
            None => return Ok(false),
        };

        // Never-saved components vanish without a storage round trip
        if self.stored.contains(&type_id) {
            self.removed.insert(type_id.clone());
        }
        self.dirty = true;
        self.emit(LifecycleEvent::ComponentRemoved {
            entity_id: self.id,
            component: schema.name().to_string(),
            type_id,
            data,
        });
        Ok(true)
    }

    /// Resolve a component: memory first, then the cache, then storage.
    ///
    /// Returns `None` for components the entity does not carry or that are
    /// tombstoned; only registry and storage failures are errors.
    pub async fn get(&mut self, name: &str) -> Result<Option<&ComponentData>> {
        let schema = self.schema(name)?;
        let type_id = schema.type_id().clone();
        if self.removed.contains(&type_id) {
            return Ok(None);
        }
        if self.pending.contains_key(&type_id) {
            self.apply_pending(&schema).await?;
        }
        if self.components.contains_key(&type_id) {
            return Ok(self.components.get(&type_id));
        }

        let Some(component) = self.load(&schema).await? else {
            return Ok(None);
        };
        self.stored.insert(type_id.clone());
        let slot = self.components.entry(type_id).or_insert(component);
        Ok(Some(&*slot))
    }

    pub async fn get_typed<T: Component>(&mut self) -> Result<Option<T>> {
        match self.get(&T::component_name()).await? {
            Some(component) => component.to_typed().map(Some),
            None => Ok(None),
        }
    }

    async fn load(&self, schema: &ComponentSchema) -> Result<Option<ComponentData>> {
        load_component(&self.ctx, &self.id, schema).await
    }

    /// Load the stored row behind a deferred `set` and merge into it.
    pub(crate) async fn apply_pending(&mut self, schema: &ComponentSchema) -> Result<()> {
        let type_id = schema.type_id().clone();
        let Some(changes) = self.pending.remove(&type_id) else {
            return Ok(());
        };

        match self.load(schema).await {
            Ok(Some(mut component)) => {
                let old = component.merge(changes);
                let new = component.data().clone();
                self.components.insert(type_id.clone(), component);
                if old != new {
                    self.emit(LifecycleEvent::ComponentUpdated {
                        entity_id: self.id,
                        component: schema.name().to_string(),
                        type_id,
                        old,
                        new,
                    });
                }
            }
            Ok(None) => {
                // The row is gone, so the fields become a new component
                self.stored.remove(&type_id);
                let mut doc = changes;
                schema.apply_defaults(&mut doc);
                self.put(schema, doc);
            }
            Err(e) => {
                self.pending.insert(type_id, changes);
                return Err(e);
            }
        }
        Ok(())
    }

    /// Loaded, non-tombstoned components ordered by name.
    pub fn component_list(&self) -> Vec<&ComponentData> {
        let mut list: Vec<&ComponentData> = self
            .components
            .iter()
            .filter(|(type_id, _)| !self.removed.contains(*type_id))
            .map(|(_, component)| component)
            .collect();
        list.sort_by(|a, b| a.name().cmp(b.name()));
        list
    }

    /// Whether the entity carries the component, loaded or not.
    pub fn has(&self, name: &str) -> bool {
        let Ok(type_id) = self.ctx.registry().get_type_id(name) else {
            return false;
        };
        !self.removed.contains(&type_id)
            && (self.components.contains_key(&type_id) || self.stored.contains(&type_id))
    }

    /// Names of components the next save would write or delete.
    pub fn changed_components(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .components
            .values()
            .filter(|c| c.is_dirty() || !c.is_persisted())
            .map(|c| c.name().to_string())
            .collect();
        names.extend(self.pending.keys().map(|type_id| self.component_name(type_id)));
        names.extend(self.removed.iter().map(|type_id| self.component_name(type_id)));
        names.sort();
        names
    }

    fn component_name(&self, type_id: &TypeId) -> String {
        self.ctx
            .registry()
            .get_by_type_id(type_id)
            .map(|schema| schema.name().to_string())
            .unwrap_or_else(|| type_id.to_string())
    }

    /// A new unsaved entity carrying deep copies of every component.
    ///
    /// Stored components that are not loaded yet are read (through the
    /// cache) for the copy; this entity's own state is left untouched.
    pub async fn duplicate(&self) -> Result<Entity> {
        let mut copy = Entity::new(&self.ctx);
        for component in self.component_list() {
            let cloned = component.duplicate();
            copy.components.insert(cloned.type_id().clone(), cloned);
        }

        for type_id in &self.stored {
            if self.removed.contains(type_id) || self.components.contains_key(type_id) {
                continue;
            }
            let schema = self
                .ctx
                .registry()
                .get_by_type_id(type_id)
                .ok_or_else(|| not_registered(type_id))?;
            let pending = self.pending.get(type_id);
            let mut data = match (self.load(&schema).await?, pending) {
                (Some(component), _) => component.data().clone(),
                (None, Some(_)) => Document::new(),
                (None, None) => continue,
            };
            if let Some(changes) = pending {
                data.extend(changes.clone());
            }
            schema.apply_defaults(&mut data);
            copy.components
                .insert(type_id.clone(), ComponentData::new(schema.name(), type_id.clone(), data));
        }
        Ok(copy)
    }
}

impl std::fmt::Debug for Entity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Entity")
            .field("id", &self.id)
            .field("components", &self.component_list())
            .field("removed", &self.removed)
            .field("pending", &self.pending.keys().collect::<Vec<_>>())
            .field("persisted", &self.persisted)
            .field("dirty", &self.dirty)
            .finish()
    }
}

/// Cache-then-storage lookup of one component, populating the cache on a miss.
pub(crate) async fn load_component(
    ctx: &EngineContext,
    entity_id: &EntityId,
    schema: &ComponentSchema,
) -> Result<Option<ComponentData>> {
    let type_id = schema.type_id();

    if let Some(cached) = ctx.cache().get_component(entity_id, type_id).await {
        match schema.decode(&cached.data) {
            Ok(doc) => {
                return Ok(Some(ComponentData::loaded(cached.component_id, schema.name(), type_id.clone(), doc)));
            }
            Err(e) => {
                event!(
                    Level::WARN,
                    entity_id = %entity_id,
                    component = schema.name(),
                    error = %e,
                    "Discarding undecodable cached component"
                );
                ctx.cache().invalidate_component(entity_id, type_id).await;
            }
        }
    }

    let Some(stored) = ctx.storage().load_component(entity_id, type_id).await? else {
        return Ok(None);
    };
    ctx.cache()
        .set_component(
            entity_id,
            &CachedComponent {
                component_id: stored.component_id,
                type_id: type_id.clone(),
                data: schema.encode(&stored.data),
            },
        )
        .await;
    Ok(Some(ComponentData::loaded(stored.component_id, schema.name(), type_id.clone(), stored.data)))
}

pub(crate) fn not_registered(type_id: &TypeId) -> DataError {
    DataError::NotRegistered(type_id.to_string())
}
