use super::schema::Component;
use crate::core::{ComponentId, DataError, Document, Result, TypeId, Value, document_to_json};

/// One component instance attached to an entity.
#[derive(Debug, Clone, PartialEq)]
pub struct ComponentData {
    id: ComponentId,
    type_id: TypeId,
    name: String,
    data: Document,
    pub(crate) dirty: bool,
    pub(crate) persisted: bool,
}

impl ComponentData {
    pub(crate) fn new(name: &str, type_id: TypeId, data: Document) -> Self {
        Self {
            id: ComponentId::new(),
            type_id,
            name: name.to_string(),
            data,
            dirty: true,
            persisted: false,
        }
    }

    /// Rebuild an instance read back from storage or cache.
    pub(crate) fn loaded(id: ComponentId, name: &str, type_id: TypeId, data: Document) -> Self {
        Self {
            id,
            type_id,
            name: name.to_string(),
            data,
            dirty: false,
            persisted: true,
        }
    }

    pub fn id(&self) -> ComponentId {
        self.id
    }

    pub fn type_id(&self) -> &TypeId {
        &self.type_id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn data(&self) -> &Document {
        &self.data
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.data.get(field)
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn is_persisted(&self) -> bool {
        self.persisted
    }

    pub fn to_json(&self) -> serde_json::Value {
        document_to_json(&self.data)
    }

    /// Convert into a typed component struct.
    pub fn to_typed<T: Component>(&self) -> Result<T> {
        serde_json::from_value(self.to_json()).map_err(|e| {
            DataError::Serialization(format!(
                "Cannot convert component '{}' into typed value: {}",
                self.name, e
            ))
        })
    }

    /// Replace the document, returning the previous one.
    pub(crate) fn replace(&mut self, data: Document) -> Document {
        self.dirty = true;
        std::mem::replace(&mut self.data, data)
    }

    /// Merge `partial` into the document, returning the previous document.
    pub(crate) fn merge(&mut self, partial: Document) -> Document {
        let previous = self.data.clone();
        for (key, value) in partial {
            self.data.insert(key, value);
        }
        if self.data != previous {
            self.dirty = true;
        }
        previous
    }

    /// Deep copy with a fresh component id, marked new.
    pub(crate) fn duplicate(&self) -> Self {
        Self::new(&self.name, self.type_id.clone(), self.data.clone())
    }
}
