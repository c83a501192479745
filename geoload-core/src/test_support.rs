//! Test-only datasets and fixture builders used by unit and behaviour tests.

use std::{cell::Cell, sync::Arc};

use geo::{Geometry, Point};

use crate::{
    Cursor, Dataset, FieldDescriptor, FieldSet, FieldType, InsertHandle, MemoryDataset, Predicate,
    RowBuffer, SchemaLock, SpatialQuery, StoreError, Value,
};

/// Field set with an `OBJECTID` followed by one text field per name.
///
/// # Panics
///
/// Panics when `names` repeats a name.
#[must_use]
pub fn keyed_fields(names: &[&str]) -> FieldSet {
    build_fields(names, false)
}

/// Like [`keyed_fields`] with a trailing `SHAPE` geometry field.
///
/// # Panics
///
/// Panics when `names` repeats a name or includes `SHAPE`.
#[must_use]
pub fn feature_fields(names: &[&str]) -> FieldSet {
    build_fields(names, true)
}

#[expect(clippy::expect_used, reason = "fixture builders fail loudly")]
fn build_fields(names: &[&str], with_shape: bool) -> FieldSet {
    let mut fields = vec![FieldDescriptor::new("OBJECTID", FieldType::ObjectId)];
    fields.extend(
        names
            .iter()
            .map(|name| FieldDescriptor::new(*name, FieldType::String)),
    );
    if with_shape {
        fields.push(FieldDescriptor::new("SHAPE", FieldType::Geometry));
    }
    FieldSet::new(fields).expect("fixture field names are unique")
}

/// A table of `rows` rows with a `NAME` column holding `row-1`, `row-2`, ...
///
/// # Panics
///
/// Panics if seeding the in-memory dataset fails.
#[must_use]
#[expect(clippy::expect_used, reason = "fixture builders fail loudly")]
pub fn numbered_table(name: &str, rows: u64) -> MemoryDataset {
    let dataset = MemoryDataset::new(name, keyed_fields(&["NAME"]));
    for row in 1..=rows {
        dataset
            .push(vec![Value::Null, Value::from(format!("row-{row}"))])
            .expect("seed fixture row");
    }
    dataset
}

/// Point geometry helper.
#[must_use]
pub fn point(x: f64, y: f64) -> Geometry<f64> {
    Geometry::Point(Point::new(x, y))
}

/// Wraps a dataset and makes inserts fail once `fail_after` rows have been
/// accepted.
///
/// Every other operation is delegated unchanged, so lock and load-only state
/// can be inspected on the inner dataset afterwards.
#[derive(Debug)]
pub struct FailingDataset<D> {
    inner: D,
    fail_after: u64,
    accepted: Cell<u64>,
}

impl<D: Dataset> FailingDataset<D> {
    /// Fail every insert after the first `fail_after`.
    pub const fn new(inner: D, fail_after: u64) -> Self {
        Self {
            inner,
            fail_after,
            accepted: Cell::new(0),
        }
    }

    /// Borrow the wrapped dataset.
    pub const fn inner(&self) -> &D {
        &self.inner
    }

    /// Recover the wrapped dataset.
    pub fn into_inner(self) -> D {
        self.inner
    }
}

struct FailingInsertHandle<'a, D> {
    owner: &'a FailingDataset<D>,
    inner: Box<dyn InsertHandle + 'a>,
}

impl<D: Dataset> InsertHandle for FailingInsertHandle<'_, D> {
    fn insert(&mut self, row: RowBuffer) -> Result<i64, StoreError> {
        let accepted = self.owner.accepted.get();
        if accepted >= self.owner.fail_after {
            return Err(StoreError::backend(
                self.owner.inner.name(),
                format!("simulated insert failure after {accepted} rows"),
            ));
        }
        self.owner.accepted.set(accepted + 1);
        self.inner.insert(row)
    }

    fn flush(&mut self) -> Result<(), StoreError> {
        self.inner.flush()
    }
}

impl<D: Dataset> Dataset for FailingDataset<D> {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn path(&self) -> &str {
        self.inner.path()
    }

    fn fields(&self) -> Arc<FieldSet> {
        self.inner.fields()
    }

    fn search(
        &self,
        predicate: Option<&Predicate>,
        read_only: bool,
    ) -> Result<Box<dyn Cursor + '_>, StoreError> {
        self.inner.search(predicate, read_only)
    }

    fn search_spatial(&self, query: &SpatialQuery) -> Result<Box<dyn Cursor + '_>, StoreError> {
        self.inner.search_spatial(query)
    }

    fn count(&self, predicate: Option<&Predicate>) -> Result<u64, StoreError> {
        self.inner.count(predicate)
    }

    fn begin_insert(&self, buffered: bool) -> Result<Box<dyn InsertHandle + '_>, StoreError> {
        let inner = self.inner.begin_insert(buffered)?;
        Ok(Box::new(FailingInsertHandle { owner: self, inner }))
    }

    fn schema_lock(&self) -> SchemaLock {
        self.inner.schema_lock()
    }

    fn change_schema_lock(&self, lock: SchemaLock) -> Result<(), StoreError> {
        self.inner.change_schema_lock(lock)
    }

    fn supports_load_only_mode(&self) -> bool {
        self.inner.supports_load_only_mode()
    }

    fn load_only_mode(&self) -> bool {
        self.inner.load_only_mode()
    }

    fn set_load_only_mode(&self, enabled: bool) -> Result<(), StoreError> {
        self.inner.set_load_only_mode(enabled)
    }
}
