use super::{Entity, not_registered};
use crate::cache::CachedComponent;
use crate::component::ComponentData;
use crate::context::EngineContext;
use crate::core::{EntityId, Result, TypeId};
use crate::hooks::LifecycleEvent;
use crate::storage::{StoredComponent, WriteBatch};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{Level, event};

impl Entity {
    /// Persist pending changes.
    ///
    /// Returns `Ok(false)` without touching storage when nothing changed.
    /// Deferred merges from [`set`](Entity::set) are resolved first. A
    /// storage failure leaves the entity dirty so the save can be retried.
    pub async fn save(&mut self) -> Result<bool> {
        if !self.dirty {
            return Ok(false);
        }

        let deferred: Vec<TypeId> = self.pending.keys().cloned().collect();
        for type_id in deferred {
            let schema = self
                .ctx
                .registry()
                .get_by_type_id(&type_id)
                .ok_or_else(|| not_registered(&type_id))?;
            self.apply_pending(&schema).await?;
        }

        let mut batch = WriteBatch::new(self.id);
        let mut written = Vec::new();
        let mut changed = Vec::new();
        for component in self.components.values() {
            if component.is_dirty() || !component.is_persisted() {
                let schema = self
                    .ctx
                    .registry()
                    .get_by_type_id(component.type_id())
                    .ok_or_else(|| not_registered(component.type_id()))?;
                batch.upserts.push(StoredComponent {
                    component_id: component.id(),
                    type_id: component.type_id().clone(),
                    data: component.data().clone(),
                });
                written.push(CachedComponent {
                    component_id: component.id(),
                    type_id: component.type_id().clone(),
                    data: schema.encode(component.data()),
                });
                changed.push(component.name().to_string());
            }
        }
        let removed: Vec<TypeId> = self.removed.iter().cloned().collect();
        batch.removals = removed.clone();
        changed.extend(removed.iter().map(|type_id| self.component_name(type_id)));
        changed.sort();

        let upserts = batch.upserts.len();
        if !batch.is_empty() {
            self.ctx.storage().commit(batch).await?;
        }

        for component in self.components.values_mut() {
            component.dirty = false;
            component.persisted = true;
            self.stored.insert(component.type_id().clone());
        }
        for type_id in &removed {
            self.stored.remove(type_id);
        }
        self.removed.clear();
        let created = !self.persisted;
        self.persisted = true;
        self.dirty = false;

        self.ctx.cache().on_save(&self.id, written, removed.clone()).await;

        event!(
            Level::DEBUG,
            entity_id = %self.id,
            upserts,
            removals = removed.len(),
            created,
            "Entity saved"
        );

        let event = if created {
            LifecycleEvent::EntityCreated {
                entity_id: self.id,
                components: changed,
            }
        } else {
            LifecycleEvent::EntityUpdated {
                entity_id: self.id,
                components: changed,
            }
        };
        self.ctx.hooks().fire(&event).await;
        Ok(true)
    }

    /// Delete the entity. Soft deletes keep rows with a deletion marker,
    /// hard deletes remove them.
    ///
    /// Returns `Ok(false)` for entities that were never persisted.
    pub async fn delete(&mut self, hard: bool) -> Result<bool> {
        if !self.persisted {
            return Ok(false);
        }

        let affected = self.ctx.storage().delete_entity(&self.id, hard).await?;
        self.ctx.cache().on_delete(&self.id).await;

        self.persisted = false;
        self.dirty = true;
        self.stored.clear();
        self.removed.clear();
        self.pending.clear();
        for component in self.components.values_mut() {
            component.persisted = false;
            component.dirty = true;
        }

        event!(Level::DEBUG, entity_id = %self.id, hard, affected, "Entity deleted");
        self.ctx
            .hooks()
            .fire(&LifecycleEvent::EntityDeleted {
                entity_id: self.id,
                hard,
            })
            .await;
        Ok(true)
    }

    /// Load an entity with all of its live components.
    ///
    /// `None` when no live component row exists (never saved or deleted).
    pub async fn find_by_id(ctx: &Arc<EngineContext>, id: EntityId) -> Result<Option<Entity>> {
        let rows = ctx.storage().load_components(&id, None).await?;
        if rows.is_empty() {
            return Ok(None);
        }

        let mut components = Vec::with_capacity(rows.len());
        let mut stored = HashSet::with_capacity(rows.len());
        for row in rows {
            let Some(schema) = ctx.registry().get_by_type_id(&row.type_id) else {
                event!(
                    Level::WARN,
                    entity_id = %id,
                    type_id = %row.type_id,
                    "Skipping component of unregistered type"
                );
                continue;
            };
            ctx.cache()
                .set_component(
                    &id,
                    &CachedComponent {
                        component_id: row.component_id,
                        type_id: row.type_id.clone(),
                        data: schema.encode(&row.data),
                    },
                )
                .await;
            stored.insert(row.type_id.clone());
            components.push(ComponentData::loaded(row.component_id, schema.name(), row.type_id, row.data));
        }
        ctx.cache().set_entity(&id).await;

        Ok(Some(Entity::hydrated(ctx, id, components, stored)))
    }

    /// Load several entities, skipping ids that do not resolve. Order follows `ids`.
    pub async fn load_multiple(ctx: &Arc<EngineContext>, ids: &[EntityId]) -> Result<Vec<Entity>> {
        let mut entities = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(entity) = Self::find_by_id(ctx, *id).await? {
                entities.push(entity);
            }
        }
        Ok(entities)
    }
}
