//! Data access traits for feature and table stores.
//!
//! The pipeline never talks to a storage engine directly. It drives a
//! [`Dataset`] through cursors, insert handles, schema locks and the
//! load-only toggle. Cursors and insert handles are released when dropped,
//! so every exit path gives the store its resources back.

use std::sync::Arc;

use crate::{FieldSet, Row, RowBuffer};

mod error;
mod memory;
mod query;
mod source;

pub use error::{BackendError, StoreError};
pub use memory::{MemoryDataset, MemoryStats};
pub use query::{
    MAX_OBJECT_IDS_PER_PREDICATE, Predicate, SchemaLock, SpatialQuery, SpatialRelation, SubFields,
};
pub use source::{CursorSource, ReaderSource, RecordListSource, RecordSource, TabularReader};

/// Forward-only, single-pass stream of rows.
///
/// Dropping the cursor releases it.
pub trait Cursor {
    /// Next row, or `Ok(None)` once the stream is exhausted.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] when the backend fails mid-stream.
    fn next_row(&mut self) -> Result<Option<Row>, StoreError>;
}

impl Iterator for dyn Cursor + '_ {
    type Item = Result<Row, StoreError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_row().transpose()
    }
}

/// Handle for inserting rows into a dataset.
///
/// Buffered handles hold rows until [`InsertHandle::flush`]; rows still
/// pending when the handle is dropped are discarded.
pub trait InsertHandle {
    /// Queue or write one row, returning the object id it was assigned.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] when the row does not fit the dataset or the
    /// backend rejects it.
    fn insert(&mut self, row: RowBuffer) -> Result<i64, StoreError>;

    /// Persist every pending row.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] when the backend cannot commit the rows.
    fn flush(&mut self) -> Result<(), StoreError>;
}

/// A feature class or table.
///
/// All methods take `&self`: a dataset is a handle onto shared storage, so
/// cursors and insert handles borrow it while lock and mode changes go
/// through the same handle.
pub trait Dataset {
    /// Dataset name, used in error messages.
    fn name(&self) -> &str;

    /// Path of the data source the dataset lives in.
    fn path(&self) -> &str;

    /// Field layout.
    fn fields(&self) -> Arc<FieldSet>;

    /// Name of the object-id field, if the dataset has one.
    fn object_id_field(&self) -> Option<String> {
        self.fields().object_id_field().map(|f| f.name.clone())
    }

    /// Name of the shape field. Tables return `None`.
    fn geometry_field(&self) -> Option<String> {
        self.fields().geometry_field().map(|f| f.name.clone())
    }

    /// Position of the field called `name`, ignoring case.
    fn find_field(&self, name: &str) -> Option<usize> {
        self.fields().find(name)
    }

    /// Open a cursor over rows matching `predicate`, or every row for
    /// `None`. `read_only` hints that rows will not be updated in place.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::DatasetNotFound`] for a dataset that no longer
    /// exists, or a backend error.
    fn search(
        &self,
        predicate: Option<&Predicate>,
        read_only: bool,
    ) -> Result<Box<dyn Cursor + '_>, StoreError>;

    /// Open a cursor over rows satisfying a spatial query.
    ///
    /// # Errors
    ///
    /// As for [`Dataset::search`].
    fn search_spatial(&self, query: &SpatialQuery) -> Result<Box<dyn Cursor + '_>, StoreError>;

    /// Number of rows matching `predicate`.
    ///
    /// # Errors
    ///
    /// As for [`Dataset::search`].
    fn count(&self, predicate: Option<&Predicate>) -> Result<u64, StoreError>;

    /// Open an insert handle.
    ///
    /// # Errors
    ///
    /// As for [`Dataset::search`].
    fn begin_insert(&self, buffered: bool) -> Result<Box<dyn InsertHandle + '_>, StoreError>;

    /// Lock currently held.
    fn schema_lock(&self) -> SchemaLock;

    /// Acquire or downgrade the schema lock.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] when the lock cannot be changed.
    fn change_schema_lock(&self, lock: SchemaLock) -> Result<(), StoreError>;

    /// Whether the dataset can suspend per-row maintenance for bulk loads.
    fn supports_load_only_mode(&self) -> bool;

    /// Whether load-only mode is active.
    fn load_only_mode(&self) -> bool;

    /// Enable or disable load-only mode.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::UnsupportedOperation`] when the dataset has no
    /// load-only mode, or a backend error.
    fn set_load_only_mode(&self, enabled: bool) -> Result<(), StoreError>;
}

