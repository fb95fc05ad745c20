use crate::context::EngineContext;
use crate::core::{DataError, Result};
use crate::entity::Entity;
use serde_json::{Map, json};
use std::sync::Arc;

/// A named bundle of component types with optional default fields.
///
/// Composition convenience only: archetypes are not persisted and entities
/// built from one are ordinary entities.
#[derive(Debug, Clone, PartialEq)]
pub struct Archetype {
    name: String,
    components: Vec<(String, Option<serde_json::Value>)>,
}

impl Archetype {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            components: Vec::new(),
        }
    }

    pub fn component(mut self, name: &str) -> Self {
        self.components.push((name.to_string(), None));
        self
    }

    pub fn component_with_defaults(mut self, name: &str, defaults: serde_json::Value) -> Self {
        self.components.push((name.to_string(), Some(defaults)));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn component_names(&self) -> Vec<&str> {
        self.components.iter().map(|(name, _)| name.as_str()).collect()
    }

    /// Build an unsaved entity carrying every component of the archetype.
    ///
    /// `fills` is `{component: fields}`; supplied fields override defaults.
    pub fn create_entity(&self, ctx: &Arc<EngineContext>, fills: serde_json::Value) -> Result<Entity> {
        let fills = match fills {
            serde_json::Value::Object(map) => map,
            serde_json::Value::Null => Map::new(),
            other => {
                return Err(DataError::InvalidArgument(format!(
                    "Archetype '{}' expects an object of component fields, got {}",
                    self.name, other
                )));
            }
        };

        if let Some(unknown) = fills.keys().find(|key| !self.components.iter().any(|(name, _)| name == *key)) {
            return Err(DataError::InvalidArgument(format!(
                "Component '{}' is not part of archetype '{}'",
                unknown, self.name
            )));
        }

        let mut entity = Entity::new(ctx);
        for (name, defaults) in &self.components {
            let mut fields = match defaults {
                Some(serde_json::Value::Object(map)) => map.clone(),
                _ => Map::new(),
            };
            if let Some(serde_json::Value::Object(supplied)) = fills.get(name) {
                fields.extend(supplied.clone());
            }
            entity.add(name, serde_json::Value::Object(fields))?;
        }
        Ok(entity)
    }

    /// Flatten an entity into `{"id": ..., component: fields}` for the
    /// archetype's components; absent components map to `null`.
    pub async fn unwrap(&self, entity: &mut Entity) -> Result<serde_json::Value> {
        let mut out = Map::new();
        out.insert("id".to_string(), json!(entity.id().to_string()));
        for (name, _) in &self.components {
            let value = match entity.get(name).await? {
                Some(component) => component.to_json(),
                None => serde_json::Value::Null,
            };
            out.insert(name.clone(), value);
        }
        Ok(serde_json::Value::Object(out))
    }

    /// Whether the entity carries every component of the archetype.
    pub fn matches(&self, entity: &Entity) -> bool {
        self.components.iter().all(|(name, _)| entity.has(name))
    }
}
