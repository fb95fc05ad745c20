pub mod data;
pub mod registry;
pub mod schema;

pub use data::ComponentData;
pub use registry::ComponentRegistry;
pub use schema::{Component, ComponentSchema, FieldDef, IndexKind, IndexedProperty};
