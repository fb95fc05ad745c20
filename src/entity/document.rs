use super::Entity;
use crate::component::ComponentData;
use crate::context::EngineContext;
use crate::core::{DataError, EntityId, Result};
use serde_json::{Map, json};
use std::sync::Arc;

/// Inputs [`Entity::deserialize`] accepts.
///
/// A live [`Entity`] passes through untouched; a JSON document of the shape
/// produced by [`Entity::serialize`] is rebuilt.
pub trait IntoEntity {
    fn into_entity(self, ctx: &Arc<EngineContext>) -> Result<Entity>;
}

impl IntoEntity for Entity {
    fn into_entity(self, _ctx: &Arc<EngineContext>) -> Result<Entity> {
        Ok(self)
    }
}

impl IntoEntity for serde_json::Value {
    fn into_entity(self, ctx: &Arc<EngineContext>) -> Result<Entity> {
        Entity::from_document(ctx, &self)
    }
}

impl IntoEntity for &serde_json::Value {
    fn into_entity(self, ctx: &Arc<EngineContext>) -> Result<Entity> {
        Entity::from_document(ctx, self)
    }
}

impl Entity {
    /// `{"id": ..., "components": {name: fields}}` with dates as ISO-8601 strings.
    pub fn serialize(&self) -> serde_json::Value {
        let components: Map<String, serde_json::Value> = self
            .component_list()
            .into_iter()
            .map(|c| (c.name().to_string(), c.to_json()))
            .collect();
        json!({
            "id": self.id.to_string(),
            "components": components,
        })
    }

    pub fn deserialize(ctx: &Arc<EngineContext>, input: impl IntoEntity) -> Result<Entity> {
        input.into_entity(ctx)
    }

    /// Rebuilt entities are unsaved: saving one upserts every component.
    fn from_document(ctx: &Arc<EngineContext>, document: &serde_json::Value) -> Result<Entity> {
        let id: EntityId = document
            .get("id")
            .and_then(|v| v.as_str())
            .ok_or_else(|| DataError::InvalidArgument("Entity document needs a string 'id'".to_string()))?
            .parse()?;

        let mut entity = Entity::with_id(ctx, id);
        let Some(components) = document.get("components") else {
            return Ok(entity);
        };
        let components = components.as_object().ok_or_else(|| {
            DataError::InvalidArgument("Entity document 'components' must be an object".to_string())
        })?;

        for (name, fields) in components {
            let schema = ctx.registry().get(name)?;
            let doc = schema.decode(fields)?;
            let component = ComponentData::new(schema.name(), schema.type_id().clone(), doc);
            entity.components.insert(schema.type_id().clone(), component);
        }
        Ok(entity)
    }
}
