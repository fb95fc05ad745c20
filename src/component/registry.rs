use super::schema::{Component, ComponentSchema};
use crate::core::{DataError, Result, TypeId};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tracing::debug;

/// Registry of known component types.
///
/// Populated during bootstrap; lookups afterwards are O(1) by name or type id.
#[derive(Debug, Default)]
pub struct ComponentRegistry {
    inner: RwLock<RegistryInner>,
}

#[derive(Debug, Default)]
struct RegistryInner {
    by_name: HashMap<String, Arc<ComponentSchema>>,
    by_type_id: HashMap<TypeId, Arc<ComponentSchema>>,
}

impl ComponentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a component schema and return its stable type id.
    ///
    /// Registering the same name again is a no-op returning the existing id.
    pub fn register(&self, schema: ComponentSchema) -> Result<TypeId> {
        let mut inner = self.inner.write()?;
        if let Some(existing) = inner.by_name.get(schema.name()) {
            return Ok(existing.type_id().clone());
        }

        let type_id = schema.type_id().clone();
        let schema = Arc::new(schema);
        debug!(component = schema.name(), type_id = %type_id, "component registered");
        inner.by_name.insert(schema.name().to_string(), schema.clone());
        inner.by_type_id.insert(type_id.clone(), schema);
        Ok(type_id)
    }

    pub fn register_type<T: Component>(&self) -> Result<TypeId> {
        self.register(T::schema())
    }

    pub fn get(&self, name: &str) -> Result<Arc<ComponentSchema>> {
        self.inner
            .read()?
            .by_name
            .get(name)
            .cloned()
            .ok_or_else(|| DataError::NotRegistered(name.to_string()))
    }

    pub fn get_type_id(&self, name: &str) -> Result<TypeId> {
        Ok(self.get(name)?.type_id().clone())
    }

    pub fn get_by_type_id(&self, type_id: &TypeId) -> Option<Arc<ComponentSchema>> {
        self.inner.read().ok()?.by_type_id.get(type_id).cloned()
    }

    pub fn is_registered(&self, name: &str) -> bool {
        self.inner
            .read()
            .map(|inner| inner.by_name.contains_key(name))
            .unwrap_or(false)
    }

    pub fn type_ids(&self) -> Vec<TypeId> {
        self.inner
            .read()
            .map(|inner| inner.by_type_id.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub fn schemas(&self) -> Vec<Arc<ComponentSchema>> {
        self.inner
            .read()
            .map(|inner| inner.by_name.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.inner.read().map(|inner| inner.by_name.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::FieldKind;

    #[test]
    fn test_register_is_idempotent() {
        let registry = ComponentRegistry::new();
        let first = registry
            .register(ComponentSchema::new("Position").field("x", FieldKind::Number))
            .unwrap();
        let second = registry
            .register(ComponentSchema::new("Position").field("x", FieldKind::Number))
            .unwrap();
        assert_eq!(first, second);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_lookup_by_name_and_type_id() {
        let registry = ComponentRegistry::new();
        let type_id = registry.register(ComponentSchema::new("Health")).unwrap();
        assert_eq!(registry.get_type_id("Health").unwrap(), type_id);
        assert_eq!(registry.get_by_type_id(&type_id).unwrap().name(), "Health");
    }

    #[test]
    fn test_unregistered_lookup_fails() {
        let registry = ComponentRegistry::new();
        let err = registry.get_type_id("Ghost").unwrap_err();
        assert!(err.is_not_registered());
        assert!(registry.get_by_type_id(&TypeId::for_name("Ghost")).is_none());
    }
}
