pub mod error;
pub mod types;
pub mod value;

pub use error::{DataError, Result};
pub use types::{ComponentId, EntityId, TypeId};
pub use value::{Document, FieldKind, Value, document_to_json, parse_date};
