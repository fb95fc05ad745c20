use crate::component::IndexKind;
use crate::core::{ComponentId, Document, EntityId, FieldKind, Result, TypeId, Value};
use crate::query::{FilterOp, QueryPlan, SortDirection};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::ops::Bound;

pub type RowId = u64;

/// One stored component: the `(entity_id, type_id, data, deleted_at)` row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentRow {
    pub entity_id: EntityId,
    pub type_id: TypeId,
    pub component_id: ComponentId,
    pub data: Document,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl ComponentRow {
    pub fn is_live(&self) -> bool {
        self.deleted_at.is_none()
    }
}

/// Declared secondary index on one component field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexSpec {
    pub field: String,
    pub kind: FieldKind,
    pub index: IndexKind,
}

#[derive(Debug, Clone)]
enum FieldIndex {
    Hash(HashMap<Value, BTreeSet<RowId>>),
    Ordered(BTreeMap<Value, BTreeSet<RowId>>),
}

impl FieldIndex {
    fn new(kind: IndexKind) -> Self {
        if kind.is_ordered() {
            Self::Ordered(BTreeMap::new())
        } else {
            Self::Hash(HashMap::new())
        }
    }

    fn insert(&mut self, key: Value, row_id: RowId) {
        match self {
            Self::Hash(map) => map.entry(key).or_default().insert(row_id),
            Self::Ordered(map) => map.entry(key).or_default().insert(row_id),
        };
    }

    fn remove(&mut self, key: &Value, row_id: RowId) {
        let emptied = match self {
            Self::Hash(map) => map.get_mut(key).map(|ids| {
                ids.remove(&row_id);
                ids.is_empty()
            }),
            Self::Ordered(map) => map.get_mut(key).map(|ids| {
                ids.remove(&row_id);
                ids.is_empty()
            }),
        };
        if emptied == Some(true) {
            match self {
                Self::Hash(map) => map.remove(key),
                Self::Ordered(map) => map.remove(key),
            };
        }
    }

    fn lookup_eq(&self, key: &Value) -> BTreeSet<RowId> {
        match self {
            Self::Hash(map) => map.get(key).cloned().unwrap_or_default(),
            Self::Ordered(map) => map.get(key).cloned().unwrap_or_default(),
        }
    }

    fn lookup_range(&self, lower: Bound<&Value>, upper: Bound<&Value>) -> Option<BTreeSet<RowId>> {
        match self {
            Self::Hash(_) => None,
            Self::Ordered(map) => Some(
                map.range::<Value, _>((lower, upper))
                    .flat_map(|(_, ids)| ids.iter().copied())
                    .collect(),
            ),
        }
    }
}

/// Keys a field value contributes to an index of the given kind.
fn index_keys(index: IndexKind, value: &Value) -> Vec<Value> {
    if value.is_null() {
        return Vec::new();
    }
    match index {
        IndexKind::NumericRange if !value.is_numeric() => Vec::new(),
        IndexKind::Inverted => {
            let mut keys = vec![value.clone()];
            if let Value::Json(serde_json::Value::Array(items)) = value {
                keys.extend(items.iter().map(|item| Value::from_json(item, None)));
            }
            keys
        }
        _ => vec![value.clone()],
    }
}

/// The component table: rows plus primary-key and secondary indexes.
///
/// Only live rows are present in the entity, type and field indexes;
/// soft-deleted rows stay in `rows` until they are overwritten or purged.
#[derive(Debug, Clone, Default)]
pub struct ComponentTable {
    rows: BTreeMap<RowId, ComponentRow>,
    next_row_id: RowId,
    primary: HashMap<(EntityId, TypeId), RowId>,
    by_entity: BTreeMap<EntityId, BTreeSet<RowId>>,
    by_type: HashMap<TypeId, BTreeSet<RowId>>,
    index_specs: HashMap<TypeId, Vec<IndexSpec>>,
    indexes: HashMap<(TypeId, String), FieldIndex>,
}

impl ComponentTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild a table from raw rows (used when restoring snapshots).
    pub fn from_parts(
        rows: BTreeMap<RowId, ComponentRow>,
        next_row_id: RowId,
        index_specs: HashMap<TypeId, Vec<IndexSpec>>,
    ) -> Self {
        let mut table = Self {
            next_row_id,
            ..Self::default()
        };
        for (type_id, specs) in index_specs {
            table.declare_indexes(&type_id, specs);
        }
        for (row_id, row) in rows {
            table.primary.insert((row.entity_id, row.type_id.clone()), row_id);
            if row.is_live() {
                table.attach(row_id, &row);
            }
            table.rows.insert(row_id, row);
        }
        table.next_row_id = table
            .next_row_id
            .max(table.rows.keys().next_back().map(|id| id + 1).unwrap_or(0));
        table
    }

    pub fn rows(&self) -> &BTreeMap<RowId, ComponentRow> {
        &self.rows
    }

    pub fn next_row_id(&self) -> RowId {
        self.next_row_id
    }

    pub fn index_specs(&self) -> &HashMap<TypeId, Vec<IndexSpec>> {
        &self.index_specs
    }

    /// Declare (or redeclare) the secondary indexes of a component type
    /// and backfill them from existing live rows.
    pub fn declare_indexes(&mut self, type_id: &TypeId, specs: Vec<IndexSpec>) {
        self.indexes.retain(|(t, _), _| t != type_id);
        for spec in &specs {
            let mut index = FieldIndex::new(spec.index);
            if let Some(row_ids) = self.by_type.get(type_id) {
                for row_id in row_ids {
                    if let Some(value) = self.rows.get(row_id).and_then(|r| r.data.get(&spec.field)) {
                        for key in index_keys(spec.index, value) {
                            index.insert(key, *row_id);
                        }
                    }
                }
            }
            self.indexes.insert((type_id.clone(), spec.field.clone()), index);
        }
        self.index_specs.insert(type_id.clone(), specs);
    }

    pub fn index_count(&self) -> usize {
        self.indexes.len()
    }

    fn attach(&mut self, row_id: RowId, row: &ComponentRow) {
        self.by_entity.entry(row.entity_id).or_default().insert(row_id);
        self.by_type.entry(row.type_id.clone()).or_default().insert(row_id);
        if let Some(specs) = self.index_specs.get(&row.type_id) {
            for spec in specs {
                let Some(value) = row.data.get(&spec.field) else {
                    continue;
                };
                if let Some(index) = self.indexes.get_mut(&(row.type_id.clone(), spec.field.clone())) {
                    for key in index_keys(spec.index, value) {
                        index.insert(key, row_id);
                    }
                }
            }
        }
    }

    fn detach(&mut self, row_id: RowId, row: &ComponentRow) {
        if let Some(ids) = self.by_entity.get_mut(&row.entity_id) {
            ids.remove(&row_id);
            if ids.is_empty() {
                self.by_entity.remove(&row.entity_id);
            }
        }
        if let Some(ids) = self.by_type.get_mut(&row.type_id) {
            ids.remove(&row_id);
        }
        if let Some(specs) = self.index_specs.get(&row.type_id) {
            for spec in specs {
                let Some(value) = row.data.get(&spec.field) else {
                    continue;
                };
                if let Some(index) = self.indexes.get_mut(&(row.type_id.clone(), spec.field.clone())) {
                    for key in index_keys(spec.index, value) {
                        index.remove(&key, row_id);
                    }
                }
            }
        }
    }

    /// Insert or overwrite the row for `(entity_id, type_id)`.
    ///
    /// Overwriting a soft-deleted row revives it.
    pub fn upsert(&mut self, entity_id: EntityId, type_id: TypeId, component_id: ComponentId, data: Document) -> RowId {
        let row = ComponentRow {
            entity_id,
            type_id: type_id.clone(),
            component_id,
            data,
            deleted_at: None,
        };

        let row_id = match self.primary.get(&(entity_id, type_id.clone())).copied() {
            Some(existing) => {
                if let Some(old) = self.rows.get(&existing).cloned()
                    && old.is_live()
                {
                    self.detach(existing, &old);
                }
                existing
            }
            None => {
                let id = self.next_row_id;
                self.next_row_id += 1;
                self.primary.insert((entity_id, type_id), id);
                id
            }
        };

        self.attach(row_id, &row);
        self.rows.insert(row_id, row);
        row_id
    }

    /// Physically remove one component row. Returns whether a row existed.
    pub fn remove(&mut self, entity_id: &EntityId, type_id: &TypeId) -> bool {
        let Some(row_id) = self.primary.remove(&(*entity_id, type_id.clone())) else {
            return false;
        };
        if let Some(row) = self.rows.remove(&row_id) {
            if row.is_live() {
                self.detach(row_id, &row);
            }
            return true;
        }
        false
    }

    /// Soft-delete or physically remove every row of an entity.
    /// Returns the number of live rows affected.
    pub fn delete_entity(&mut self, entity_id: &EntityId, hard: bool, now: DateTime<Utc>) -> usize {
        let row_ids: Vec<RowId> = self
            .rows
            .iter()
            .filter(|(_, row)| row.entity_id == *entity_id)
            .map(|(id, _)| *id)
            .collect();

        let mut affected = 0;
        for row_id in row_ids {
            let Some(row) = self.rows.get(&row_id).cloned() else {
                continue;
            };
            if row.is_live() {
                affected += 1;
                self.detach(row_id, &row);
            }
            if hard {
                self.rows.remove(&row_id);
                self.primary.remove(&(row.entity_id, row.type_id));
            } else if let Some(stored) = self.rows.get_mut(&row_id)
                && stored.deleted_at.is_none()
            {
                stored.deleted_at = Some(now);
            }
        }
        affected
    }

    pub fn get_live(&self, entity_id: &EntityId, type_id: &TypeId) -> Option<&ComponentRow> {
        self.primary
            .get(&(*entity_id, type_id.clone()))
            .and_then(|row_id| self.rows.get(row_id))
            .filter(|row| row.is_live())
    }

    pub fn live_rows_for_entity(&self, entity_id: &EntityId) -> Vec<&ComponentRow> {
        self.by_entity
            .get(entity_id)
            .map(|ids| ids.iter().filter_map(|id| self.rows.get(id)).collect())
            .unwrap_or_default()
    }

    pub fn entity_exists(&self, entity_id: &EntityId) -> bool {
        self.by_entity.contains_key(entity_id)
    }

    pub fn live_row_count(&self) -> usize {
        self.rows.values().filter(|r| r.is_live()).count()
    }

    pub fn deleted_row_count(&self) -> usize {
        self.rows.len() - self.live_row_count()
    }

    pub fn entity_count(&self) -> usize {
        self.by_entity.len()
    }

    /// Narrow the candidate rows of one constraint through a secondary index.
    ///
    /// Returns `None` when no usable index exists; the result is always a
    /// superset of the matching rows, callers still evaluate every filter.
    fn indexed_candidates(&self, type_id: &TypeId, op: &FilterOp, field: &str) -> Option<BTreeSet<RowId>> {
        let specs = self.index_specs.get(type_id)?;
        let spec = specs.iter().find(|s| s.field == field)?;
        let index = self.indexes.get(&(type_id.clone(), field.to_string()))?;

        let usable = |value: &Value| {
            !value.is_null()
                && spec.kind.is_compatible(value)
                && (spec.index != IndexKind::NumericRange || value.is_numeric())
        };

        match op {
            FilterOp::Eq(value) if usable(value) => Some(index.lookup_eq(value)),
            FilterOp::In(values) if values.iter().all(usable) => Some(
                values
                    .iter()
                    .flat_map(|v| index.lookup_eq(v))
                    .collect(),
            ),
            FilterOp::Gt(value) if usable(value) => {
                index.lookup_range(Bound::Excluded(value), Bound::Unbounded)
            }
            FilterOp::Gte(value) if usable(value) => {
                index.lookup_range(Bound::Included(value), Bound::Unbounded)
            }
            FilterOp::Lt(value) if usable(value) => {
                index.lookup_range(Bound::Unbounded, Bound::Excluded(value))
            }
            FilterOp::Lte(value) if usable(value) => {
                index.lookup_range(Bound::Unbounded, Bound::Included(value))
            }
            _ => None,
        }
    }

    /// Entities carrying a live row of `type_id`, narrowed by indexes where possible.
    fn candidate_entities(&self, constraint: &crate::query::ComponentConstraint) -> BTreeSet<EntityId> {
        let mut narrowed: Option<BTreeSet<RowId>> = None;
        for filter in &constraint.filters {
            if let Some(rows) = self.indexed_candidates(&constraint.type_id, &filter.op, &filter.field) {
                narrowed = Some(match narrowed {
                    Some(current) => current.intersection(&rows).copied().collect(),
                    None => rows,
                });
            }
        }

        let row_ids = match narrowed {
            Some(rows) => rows,
            None => self.by_type.get(&constraint.type_id).cloned().unwrap_or_default(),
        };

        row_ids
            .iter()
            .filter_map(|id| self.rows.get(id))
            .filter(|row| row.is_live())
            .map(|row| row.entity_id)
            .collect()
    }

    fn entity_matches(&self, entity_id: &EntityId, plan: &QueryPlan) -> Result<bool> {
        if plan.excluded_entity_ids.contains(entity_id) {
            return Ok(false);
        }
        for type_id in &plan.excluded {
            if self.get_live(entity_id, type_id).is_some() {
                return Ok(false);
            }
        }
        for constraint in &plan.required {
            let Some(row) = self.get_live(entity_id, &constraint.type_id) else {
                return Ok(false);
            };
            for filter in &constraint.filters {
                if !filter.matches(&row.data)? {
                    return Ok(false);
                }
            }
        }
        Ok(!plan.required.is_empty() || self.entity_exists(entity_id))
    }

    /// Execute a query plan, returning matching entity ids in result order.
    pub fn select(&self, plan: &QueryPlan) -> Result<Vec<EntityId>> {
        let candidates: BTreeSet<EntityId> = if let Some(ids) = &plan.entity_ids {
            ids.iter().copied().collect()
        } else if let Some(first) = plan.required.first() {
            let mut set = self.candidate_entities(first);
            for constraint in plan.required.iter().skip(1) {
                if set.is_empty() {
                    break;
                }
                let other = self.candidate_entities(constraint);
                set = set.intersection(&other).copied().collect();
            }
            set
        } else {
            self.by_entity.keys().copied().collect()
        };

        let mut matched = Vec::with_capacity(candidates.len());
        for entity_id in candidates {
            if self.entity_matches(&entity_id, plan)? {
                matched.push(entity_id);
            }
        }

        if let Some(sort) = &plan.sort {
            let null = Value::Null;
            let mut keyed: Vec<(EntityId, &Value)> = matched
                .into_iter()
                .map(|id| {
                    let key = self
                        .get_live(&id, &sort.type_id)
                        .and_then(|row| row.data.get(&sort.field))
                        .unwrap_or(&null);
                    (id, key)
                })
                .collect();
            // Stable sort; NULLs and missing fields stay last in both directions
            keyed.sort_by(|(_, a), (_, b)| match (a.is_null(), b.is_null()) {
                (true, true) => Ordering::Equal,
                (true, false) => Ordering::Greater,
                (false, true) => Ordering::Less,
                (false, false) => match sort.direction {
                    SortDirection::Asc => a.cmp(b),
                    SortDirection::Desc => b.cmp(a),
                },
            });
            matched = keyed.into_iter().map(|(id, _)| id).collect();
        }

        let limit = plan.limit.unwrap_or(usize::MAX);
        Ok(matched.into_iter().skip(plan.offset).take(limit).collect())
    }
}
