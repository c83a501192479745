//! Facade crate for geoload.
//!
//! This crate re-exports the bulk-load and spatial-join pipeline from
//! `geoload-core` and exposes the SQLite store behind the `sqlite` feature.

#![forbid(unsafe_code)]

pub use geoload_core::{
    AppendError, Appender, BackendError, BulkLoadWriter, ConvertError, Cursor, CursorSource,
    DEFAULT_FLUSH_EVERY, DEFAULT_PROGRESS_STEP, Dataset, FieldConverter, FieldConverterRegistry,
    FieldDescriptor, FieldSet, FieldType, InsertHandle, IntersectsStrategy, JoinError,
    LoadSummary, MemoryDataset, Predicate, ProgressTracker, ReaderSource, Record, RecordError,
    RecordListSource, RecordSource, Row, RowBuffer, SchemaError, SchemaLock, SkipFields,
    SourceRow, SpatialFilterStrategy, SpatialJoinStrategy, SpatialJoiner, SpatialQuery,
    SpatialRelation, StoreError, SubFields, TabularReader, Value, braced_upper, convert, join,
    looper, progress, retry,
};

#[cfg(feature = "test-support")]
pub use geoload_core::test_support;

#[cfg(feature = "sqlite")]
pub use geoload_sqlite::{SqliteDataset, SqliteRowReader, SqliteStoreError, SqliteWorkspace};
