//! Core pipeline for bulk-loading and spatially joining geospatial datasets.
//!
//! The crate models attribute values, field schemas and rows, and drives any
//! storage engine through the [`Dataset`] trait. On top of that it offers:
//!
//! - [`Appender`]: copy rows from a [`RecordSource`] or another dataset into
//!   a target under an exclusive lock with load-only mode enabled, applying
//!   per-field converters and reporting percentage progress.
//! - [`SpatialJoiner`]: relate every input feature to reference features and
//!   emit relation records.
//! - [`looper`]: small visiting helpers over dataset cursors.
//!
//! [`MemoryDataset`] is an in-process backend used in tests and as a staging
//! area; `geoload-sqlite` provides a persistent one.

#![forbid(unsafe_code)]

mod append;
pub mod convert;
mod field;
pub mod join;
pub mod looper;
pub mod progress;
mod record;
pub mod retry;
mod row;
mod store;
mod value;
mod writer;

#[cfg(any(test, feature = "test-support"))]
pub mod test_support;

pub use append::{AppendError, Appender};
pub use convert::{ConvertError, FieldConverter, FieldConverterRegistry, SkipFields};
pub use field::{
    FieldDescriptor, FieldSet, FieldType, SchemaError, field_names_match, normalize_field_name,
};
pub use join::{
    IntersectsStrategy, JoinError, SpatialFilterStrategy, SpatialJoinStrategy, SpatialJoiner,
};
pub use progress::{DEFAULT_PROGRESS_STEP, ProgressTracker};
pub use record::{Record, RecordError};
pub use row::{Row, RowBuffer, SourceRow};
pub use store::{
    BackendError, Cursor, CursorSource, Dataset, InsertHandle, MAX_OBJECT_IDS_PER_PREDICATE,
    MemoryDataset, MemoryStats, Predicate, ReaderSource, RecordListSource, RecordSource,
    SchemaLock, SpatialQuery, SpatialRelation, StoreError, SubFields, TabularReader,
};
pub use value::{Value, braced_upper};
pub use writer::{BulkLoadWriter, DEFAULT_FLUSH_EVERY, LoadSummary};
