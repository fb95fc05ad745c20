pub mod engine;
pub mod memory;
pub mod snapshot;
pub mod table;

pub use engine::{StorageEngine, StoredComponent, WriteBatch};
pub use memory::{InMemoryStorage, StorageStats};
pub use snapshot::{open_snapshot, save_snapshot};
pub use table::{ComponentRow, ComponentTable, IndexSpec};
