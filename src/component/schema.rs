use crate::core::{DataError, Document, FieldKind, Result, TypeId, Value, document_to_json};
use serde::{Deserialize, Serialize, de::DeserializeOwned};

/// Kind of dedicated index a storage engine should maintain for a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IndexKind {
    /// Inverted/document index (containment and pattern lookups).
    Inverted,
    /// Ordered index for range scans and sorting.
    Ordered,
    /// Hash index for equality lookups.
    Hash,
    /// Ordered index restricted to numeric values.
    NumericRange,
}

impl IndexKind {
    /// Whether the index keeps keys in order (usable for `<`, `>` and sorting).
    pub fn is_ordered(&self) -> bool {
        matches!(self, Self::Ordered | Self::NumericRange)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldDef {
    pub name: String,
    pub kind: FieldKind,
    pub default: Option<Value>,
    pub index: Option<IndexKind>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct IndexedProperty {
    pub name: String,
    pub kind: FieldKind,
    pub index: IndexKind,
}

/// Declared shape of a component type.
///
/// # Examples
///
/// ```
/// use componentdb::{ComponentSchema, FieldKind, IndexKind, Value};
///
/// let schema = ComponentSchema::new("User")
///     .field("name", FieldKind::String)
///     .indexed("age", FieldKind::Number, IndexKind::NumericRange)
///     .field_with_default("active", FieldKind::Boolean, Value::Boolean(true));
///
/// assert_eq!(schema.properties(), vec!["name", "age", "active"]);
/// assert_eq!(schema.indexed_properties().len(), 1);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct ComponentSchema {
    name: String,
    type_id: TypeId,
    fields: Vec<FieldDef>,
}

impl ComponentSchema {
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        let type_id = TypeId::for_name(&name);
        Self {
            name,
            type_id,
            fields: Vec::new(),
        }
    }

    pub fn field(self, name: &str, kind: FieldKind) -> Self {
        self.push_field(FieldDef {
            name: name.to_string(),
            kind,
            default: None,
            index: None,
        })
    }

    pub fn field_with_default(self, name: &str, kind: FieldKind, default: Value) -> Self {
        self.push_field(FieldDef {
            name: name.to_string(),
            kind,
            default: Some(default),
            index: None,
        })
    }

    pub fn indexed(self, name: &str, kind: FieldKind, index: IndexKind) -> Self {
        self.push_field(FieldDef {
            name: name.to_string(),
            kind,
            default: None,
            index: Some(index),
        })
    }

    fn push_field(mut self, def: FieldDef) -> Self {
        // Redeclaring a field replaces the earlier declaration
        if let Some(existing) = self.fields.iter_mut().find(|f| f.name == def.name) {
            *existing = def;
        } else {
            self.fields.push(def);
        }
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn type_id(&self) -> &TypeId {
        &self.type_id
    }

    pub fn fields(&self) -> &[FieldDef] {
        &self.fields
    }

    pub fn field_def(&self, name: &str) -> Option<&FieldDef> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// All declared field names, in declaration order.
    pub fn properties(&self) -> Vec<&str> {
        self.fields.iter().map(|f| f.name.as_str()).collect()
    }

    /// Only the fields flagged for dedicated indexing.
    pub fn indexed_properties(&self) -> Vec<IndexedProperty> {
        self.fields
            .iter()
            .filter_map(|f| {
                f.index.map(|index| IndexedProperty {
                    name: f.name.clone(),
                    kind: f.kind,
                    index,
                })
            })
            .collect()
    }

    /// Fill in declared defaults for fields missing from `doc`.
    pub fn apply_defaults(&self, doc: &mut Document) {
        for field in &self.fields {
            if doc.contains_key(&field.name) {
                continue;
            }
            if let Some(default) = &field.default {
                doc.insert(field.name.clone(), default.clone());
            }
        }
    }

    /// Decode a full document and apply defaults.
    pub fn decode(&self, json: &serde_json::Value) -> Result<Document> {
        let mut doc = self.decode_partial(json)?;
        self.apply_defaults(&mut doc);
        Ok(doc)
    }

    /// Decode only the fields present in `json`, validating names and kinds.
    pub fn decode_partial(&self, json: &serde_json::Value) -> Result<Document> {
        let object = match json {
            serde_json::Value::Object(map) => map,
            serde_json::Value::Null => return Ok(Document::new()),
            other => {
                return Err(DataError::InvalidArgument(format!(
                    "Component '{}' expects an object, got {}",
                    self.name, other
                )));
            }
        };

        let mut doc = Document::new();
        for (key, raw) in object {
            let def = self.field_def(key).ok_or_else(|| {
                DataError::InvalidArgument(format!(
                    "Field '{}' is not declared on component '{}'",
                    key, self.name
                ))
            })?;
            let value = Value::from_json(raw, Some(def.kind));
            self.check_kind(def, &value)?;
            doc.insert(key.clone(), value);
        }
        Ok(doc)
    }

    /// Validate an already-decoded document against the declared fields.
    pub fn validate(&self, doc: &Document) -> Result<()> {
        for (key, value) in doc {
            let def = self.field_def(key).ok_or_else(|| {
                DataError::InvalidArgument(format!(
                    "Field '{}' is not declared on component '{}'",
                    key, self.name
                ))
            })?;
            self.check_kind(def, value)?;
        }
        Ok(())
    }

    fn check_kind(&self, def: &FieldDef, value: &Value) -> Result<()> {
        if def.kind.is_compatible(value) {
            return Ok(());
        }
        Err(DataError::InvalidArgument(format!(
            "Field '{}.{}' expects {}, got {}",
            self.name,
            def.name,
            def.kind,
            value.type_name()
        )))
    }

    pub fn encode(&self, doc: &Document) -> serde_json::Value {
        document_to_json(doc)
    }
}

/// A statically typed component backed by a serde struct.
///
/// The struct is converted through the same document encoding as dynamic
/// components, so date fields should be `chrono::DateTime<Utc>`.
pub trait Component: Serialize + DeserializeOwned + Send + Sync + 'static {
    fn schema() -> ComponentSchema;

    fn component_name() -> String {
        Self::schema().name().to_string()
    }
}
