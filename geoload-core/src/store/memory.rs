//! In-memory [`Dataset`] backed by an ordered row map and an R\*-tree.
//!
//! Useful for staging data, for joins against small reference layers and for
//! exercising the pipeline without a storage engine. Spatial queries are
//! prefiltered on bounding boxes with `rstar` and refined with the DE-9IM
//! relation from `geo`.

use std::{cell::RefCell, collections::BTreeMap, sync::Arc};

use geo::{BoundingRect, Geometry};
use rstar::{
    AABB, RTree,
    primitives::{GeomWithData, Rectangle},
};

use crate::{FieldSet, FieldType, Row, RowBuffer, SchemaError, Value};

use super::{
    Cursor, Dataset, InsertHandle, Predicate, SchemaLock, SpatialQuery, StoreError, SubFields,
};

type IndexEntry = GeomWithData<Rectangle<[f64; 2]>, i64>;

/// Counters describing what has happened to a [`MemoryDataset`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MemoryStats {
    /// Rows committed to the dataset through insert handles.
    pub rows_inserted: u64,
    /// Calls to [`InsertHandle::flush`] on buffered handles.
    pub flushes: u64,
    /// Calls to [`Dataset::change_schema_lock`].
    pub lock_changes: u64,
    /// Calls to [`Dataset::set_load_only_mode`].
    pub load_only_changes: u64,
}

#[derive(Debug, Default)]
struct MemoryState {
    rows: BTreeMap<i64, Vec<Value>>,
    next_object_id: i64,
    lock: SchemaLock,
    load_only: bool,
    removed: bool,
    stats: MemoryStats,
    index: Option<RTree<IndexEntry>>,
}

impl MemoryState {
    fn allocate_object_id(&mut self) -> i64 {
        self.next_object_id += 1;
        self.next_object_id
    }

    fn commit(&mut self, object_id: i64, values: Vec<Value>) {
        self.rows.insert(object_id, values);
        self.index = None;
    }
}

/// A dataset held entirely in memory.
///
/// # Examples
///
/// ```
/// use geoload_core::{Dataset, FieldDescriptor, FieldSet, FieldType, MemoryDataset, Value};
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let fields = FieldSet::new(vec![
///     FieldDescriptor::new("OBJECTID", FieldType::ObjectId),
///     FieldDescriptor::new("NAME", FieldType::String),
/// ])?;
/// let parks = MemoryDataset::new("parks", fields);
/// parks.push(vec![Value::Null, Value::from("Roundhay")])?;
/// assert_eq!(parks.count(None)?, 1);
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct MemoryDataset {
    name: String,
    path: String,
    fields: Arc<FieldSet>,
    supports_load_only: bool,
    state: RefCell<MemoryState>,
}

impl MemoryDataset {
    /// Create an empty dataset with load-only support.
    pub fn new(name: impl Into<String>, fields: FieldSet) -> Self {
        Self {
            name: name.into(),
            path: String::from("memory://"),
            fields: Arc::new(fields),
            supports_load_only: true,
            state: RefCell::new(MemoryState::default()),
        }
    }

    /// Set the data-source path reported by [`Dataset::path`].
    #[must_use]
    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = path.into();
        self
    }

    /// Make the dataset reject load-only mode.
    #[must_use]
    pub const fn without_load_only_mode(mut self) -> Self {
        self.supports_load_only = false;
        self
    }

    /// Seed a row directly, bypassing insert handles and statistics.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Schema`] when `values` is not aligned with the
    /// dataset's fields, or [`StoreError::DatasetNotFound`] after
    /// [`MemoryDataset::remove`].
    pub fn push(&self, values: Vec<Value>) -> Result<i64, StoreError> {
        self.ensure_exists()?;
        self.check_width(values.len())?;
        let mut state = self.state.borrow_mut();
        let object_id = state.allocate_object_id();
        state.commit(object_id, values);
        Ok(object_id)
    }

    /// Snapshot of every committed row in object-id order.
    #[must_use]
    pub fn rows(&self) -> Vec<Row> {
        let state = self.state.borrow();
        state
            .rows
            .iter()
            .filter_map(|(id, values)| self.materialise(*id, values, &SubFields::All))
            .collect()
    }

    /// Number of committed rows.
    #[must_use]
    pub fn len(&self) -> usize {
        self.state.borrow().rows.len()
    }

    /// Whether the dataset holds no rows.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.state.borrow().rows.is_empty()
    }

    /// Counters accumulated so far.
    #[must_use]
    pub fn stats(&self) -> MemoryStats {
        self.state.borrow().stats
    }

    /// Mark the dataset as deleted from its workspace. Every later operation
    /// fails with [`StoreError::DatasetNotFound`].
    pub fn remove(&self) {
        self.state.borrow_mut().removed = true;
    }

    fn ensure_exists(&self) -> Result<(), StoreError> {
        if self.state.borrow().removed {
            return Err(StoreError::DatasetNotFound {
                dataset: self.name.clone(),
            });
        }
        Ok(())
    }

    fn check_width(&self, actual: usize) -> Result<(), StoreError> {
        if actual == self.fields.len() {
            return Ok(());
        }
        Err(StoreError::Schema {
            dataset: self.name.clone(),
            source: SchemaError::ValueCountMismatch {
                expected: self.fields.len(),
                actual,
            },
        })
    }

    fn unsupported(&self, operation: &'static str) -> StoreError {
        StoreError::UnsupportedOperation {
            operation,
            dataset: self.name.clone(),
        }
    }

    fn matches(&self, object_id: i64, predicate: Option<&Predicate>) -> Result<bool, StoreError> {
        match predicate {
            None => Ok(true),
            Some(p) => p
                .matches_object_id(object_id)
                .ok_or_else(|| self.unsupported("where clause filtering")),
        }
    }

    fn materialise(&self, object_id: i64, values: &[Value], sub_fields: &SubFields) -> Option<Row> {
        let projected = self
            .fields
            .iter()
            .zip(values)
            .map(|(field, value)| {
                let always = matches!(field.field_type, FieldType::ObjectId | FieldType::Geometry);
                if always || sub_fields.includes(&field.name) {
                    value.clone()
                } else {
                    Value::Null
                }
            })
            .collect();
        Row::new(object_id, Arc::clone(&self.fields), projected).ok()
    }

    fn geometry_of<'v>(&self, values: &'v [Value]) -> Option<&'v Geometry<f64>> {
        self.fields
            .position_of_type(FieldType::Geometry)
            .and_then(|index| values.get(index))
            .and_then(Value::as_geometry)
    }

    fn build_index(&self, state: &MemoryState) -> RTree<IndexEntry> {
        let entries = state
            .rows
            .iter()
            .filter_map(|(id, values)| {
                let rect = self.geometry_of(values)?.bounding_rect()?;
                let envelope = Rectangle::from_corners(
                    [rect.min().x, rect.min().y],
                    [rect.max().x, rect.max().y],
                );
                Some(GeomWithData::new(envelope, *id))
            })
            .collect();
        RTree::bulk_load(entries)
    }

    fn candidate_ids(&self, query: &SpatialQuery) -> Vec<i64> {
        let mut state = self.state.borrow_mut();
        if !query.relation.requires_envelope_overlap() {
            return state.rows.keys().copied().collect();
        }
        let Some(rect) = query.geometry.bounding_rect() else {
            return Vec::new();
        };
        if state.index.is_none() {
            let index = self.build_index(&state);
            state.index = Some(index);
        }
        let envelope =
            AABB::from_corners([rect.min().x, rect.min().y], [rect.max().x, rect.max().y]);
        let mut ids: Vec<i64> = state
            .index
            .as_ref()
            .map(|index| {
                index
                    .locate_in_envelope_intersecting(&envelope)
                    .map(|entry| entry.data)
                    .collect()
            })
            .unwrap_or_default();
        ids.sort_unstable();
        ids
    }
}

/// Cursor over a snapshot of rows taken when the cursor was opened.
struct SnapshotCursor {
    rows: std::vec::IntoIter<Row>,
}

impl Cursor for SnapshotCursor {
    fn next_row(&mut self) -> Result<Option<Row>, StoreError> {
        Ok(self.rows.next())
    }
}

impl Dataset for MemoryDataset {
    fn name(&self) -> &str {
        &self.name
    }

    fn path(&self) -> &str {
        &self.path
    }

    fn fields(&self) -> Arc<FieldSet> {
        Arc::clone(&self.fields)
    }

    fn search(
        &self,
        predicate: Option<&Predicate>,
        _read_only: bool,
    ) -> Result<Box<dyn Cursor + '_>, StoreError> {
        self.ensure_exists()?;
        let state = self.state.borrow();
        let mut rows = Vec::new();
        for (id, values) in &state.rows {
            if self.matches(*id, predicate)? {
                rows.extend(self.materialise(*id, values, &SubFields::All));
            }
        }
        Ok(Box::new(SnapshotCursor {
            rows: rows.into_iter(),
        }))
    }

    fn search_spatial(&self, query: &SpatialQuery) -> Result<Box<dyn Cursor + '_>, StoreError> {
        self.ensure_exists()?;
        let candidates = self.candidate_ids(query);
        let state = self.state.borrow();
        let mut rows = Vec::new();
        for id in candidates {
            let Some(values) = state.rows.get(&id) else {
                continue;
            };
            if !self.matches(id, query.predicate.as_ref())? {
                continue;
            }
            let Some(geometry) = self.geometry_of(values) else {
                continue;
            };
            if query.relation.holds(&query.geometry, geometry) {
                rows.extend(self.materialise(id, values, &query.sub_fields));
            }
        }
        Ok(Box::new(SnapshotCursor {
            rows: rows.into_iter(),
        }))
    }

    fn count(&self, predicate: Option<&Predicate>) -> Result<u64, StoreError> {
        self.ensure_exists()?;
        let state = self.state.borrow();
        let mut count = 0_u64;
        for id in state.rows.keys() {
            if self.matches(*id, predicate)? {
                count += 1;
            }
        }
        Ok(count)
    }

    fn begin_insert(&self, buffered: bool) -> Result<Box<dyn InsertHandle + '_>, StoreError> {
        self.ensure_exists()?;
        Ok(Box::new(MemoryInsertHandle {
            dataset: self,
            buffered,
            pending: Vec::new(),
        }))
    }

    fn schema_lock(&self) -> SchemaLock {
        self.state.borrow().lock
    }

    fn change_schema_lock(&self, lock: SchemaLock) -> Result<(), StoreError> {
        self.ensure_exists()?;
        let mut state = self.state.borrow_mut();
        state.lock = lock;
        state.stats.lock_changes += 1;
        Ok(())
    }

    fn supports_load_only_mode(&self) -> bool {
        self.supports_load_only
    }

    fn load_only_mode(&self) -> bool {
        self.state.borrow().load_only
    }

    fn set_load_only_mode(&self, enabled: bool) -> Result<(), StoreError> {
        self.ensure_exists()?;
        if !self.supports_load_only {
            return Err(self.unsupported("load-only mode"));
        }
        let mut state = self.state.borrow_mut();
        state.load_only = enabled;
        state.stats.load_only_changes += 1;
        Ok(())
    }
}

struct MemoryInsertHandle<'a> {
    dataset: &'a MemoryDataset,
    buffered: bool,
    pending: Vec<(i64, Vec<Value>)>,
}

impl InsertHandle for MemoryInsertHandle<'_> {
    fn insert(&mut self, row: RowBuffer) -> Result<i64, StoreError> {
        self.dataset.ensure_exists()?;
        self.dataset.check_width(row.values().len())?;
        let mut state = self.dataset.state.borrow_mut();
        let object_id = state.allocate_object_id();
        let values = row.into_values();
        if self.buffered {
            self.pending.push((object_id, values));
        } else {
            state.commit(object_id, values);
            state.stats.rows_inserted += 1;
        }
        Ok(object_id)
    }

    fn flush(&mut self) -> Result<(), StoreError> {
        self.dataset.ensure_exists()?;
        let mut state = self.dataset.state.borrow_mut();
        for (object_id, values) in self.pending.drain(..) {
            state.commit(object_id, values);
            state.stats.rows_inserted += 1;
        }
        if self.buffered {
            state.stats.flushes += 1;
        }
        Ok(())
    }
}

impl Drop for MemoryInsertHandle<'_> {
    fn drop(&mut self) {
        if !self.pending.is_empty() {
            log::debug!(
                "discarding {} unflushed rows for dataset {}",
                self.pending.len(),
                self.dataset.name
            );
        }
    }
}
