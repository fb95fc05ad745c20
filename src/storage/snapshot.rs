//! MessagePack snapshots of an [`InMemoryStorage`].
//!
//! Snapshots carry every row (soft-deleted ones included) plus the declared
//! index specs; indexes themselves are rebuilt on load.

use super::memory::InMemoryStorage;
use super::table::{ComponentRow, ComponentTable, IndexSpec, RowId};
use crate::core::{DataError, Result, TypeId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::io::Write;
use std::path::Path;
use tracing::{Level, event};

const SNAPSHOT_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct StorageSnapshot {
    version: u32,
    created_at: DateTime<Utc>,
    next_row_id: RowId,
    rows: BTreeMap<RowId, ComponentRow>,
    index_specs: HashMap<TypeId, Vec<IndexSpec>>,
}

/// Write the storage contents to `path`.
///
/// The snapshot is written to a temporary file in the same directory and
/// renamed over `path`, so readers never observe a partial file.
pub async fn save_snapshot(storage: &InMemoryStorage, path: impl AsRef<Path>) -> Result<()> {
    let path = path.as_ref();
    let table = storage.table_copy().await;
    let snapshot = StorageSnapshot {
        version: SNAPSHOT_VERSION,
        created_at: Utc::now(),
        next_row_id: table.next_row_id(),
        rows: table.rows().clone(),
        index_specs: table.index_specs().clone(),
    };

    let serialized = rmp_serde::to_vec(&snapshot)
        .map_err(|e| DataError::Serialization(format!("Failed to serialize snapshot: {}", e)))?;

    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => std::env::current_dir()?,
    };
    fs::create_dir_all(&parent)?;

    let mut temp = tempfile::NamedTempFile::new_in(&parent)?;
    temp.write_all(&serialized)?;
    temp.as_file().sync_all()?;
    temp.persist(path)
        .map_err(|e| DataError::Io(format!("Failed to persist snapshot: {}", e)))?;

    event!(
        Level::INFO,
        path = %path.display(),
        rows = snapshot.rows.len(),
        "Snapshot saved"
    );
    Ok(())
}

/// Restore a storage from a snapshot written by [`save_snapshot`].
pub fn open_snapshot(path: impl AsRef<Path>) -> Result<InMemoryStorage> {
    let path = path.as_ref();
    let data = fs::read(path)?;
    let snapshot: StorageSnapshot = rmp_serde::from_slice(&data)
        .map_err(|e| DataError::Serialization(format!("Failed to deserialize snapshot: {}", e)))?;

    if snapshot.version != SNAPSHOT_VERSION {
        return Err(DataError::Storage(format!(
            "Unsupported snapshot version {} (expected {})",
            snapshot.version, SNAPSHOT_VERSION
        )));
    }

    event!(
        Level::INFO,
        path = %path.display(),
        rows = snapshot.rows.len(),
        created_at = %snapshot.created_at,
        "Snapshot loaded"
    );

    let table = ComponentTable::from_parts(snapshot.rows, snapshot.next_row_id, snapshot.index_specs);
    Ok(InMemoryStorage::from_table(table))
}

impl InMemoryStorage {
    pub async fn save_snapshot(&self, path: impl AsRef<Path>) -> Result<()> {
        save_snapshot(self, path).await
    }

    pub fn open_snapshot(path: impl AsRef<Path>) -> Result<Self> {
        open_snapshot(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::component::{ComponentSchema, IndexKind};
    use crate::core::{ComponentId, Document, EntityId, FieldKind, Value};
    use crate::query::{ComponentConstraint, Filter, QueryPlan};
    use crate::storage::{StorageEngine, StoredComponent, WriteBatch};
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_snapshot_round_trip_keeps_rows_and_indexes() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("data.snapshot");

        let storage = InMemoryStorage::new();
        let schema = ComponentSchema::new("User")
            .field("name", FieldKind::String)
            .indexed("age", FieldKind::Number, IndexKind::NumericRange);
        storage.prepare_component(&schema).await.unwrap();

        let mut kept = None;
        for age in [10, 40] {
            let id = EntityId::new();
            let mut data = Document::new();
            data.insert("age".into(), Value::Integer(age));
            data.insert("name".into(), Value::Text(format!("user{}", age)));
            let mut batch = WriteBatch::new(id);
            batch.upserts.push(StoredComponent {
                component_id: ComponentId::new(),
                type_id: schema.type_id().clone(),
                data,
            });
            storage.commit(batch).await.unwrap();
            if age == 40 {
                kept = Some(id);
            } else {
                storage.delete_entity(&id, false).await.unwrap();
            }
        }

        storage.save_snapshot(&path).await.unwrap();
        let restored = InMemoryStorage::open_snapshot(&path).unwrap();

        let stats = restored.stats().await;
        assert_eq!(stats.live_components, 1);
        assert_eq!(stats.deleted_components, 1);
        assert_eq!(stats.indexes, 1);

        let plan = QueryPlan {
            required: vec![ComponentConstraint {
                type_id: schema.type_id().clone(),
                filters: vec![Filter::gte("age", 30)],
            }],
            ..QueryPlan::default()
        };
        assert_eq!(restored.select(&plan).await.unwrap(), vec![kept.unwrap()]);
    }

    #[test]
    fn test_open_missing_snapshot_is_io_error() {
        let dir = TempDir::new().unwrap();
        let err = open_snapshot(dir.path().join("missing")).unwrap_err();
        assert!(matches!(err, DataError::Io(_)));
    }
}
