//! SQLite-backed datasets for geoload.
//!
//! A [`SqliteWorkspace`] wraps one database file. Each dataset is a table
//! whose field layout is recorded in the `geoload_fields` metadata table.
//! Geometry columns are stored as JSON text beside four bounding-box columns
//! that back spatial search. [`SqliteRowReader`] exposes arbitrary queries as
//! a [`geoload_core::TabularReader`] so they can feed an append.

#![forbid(unsafe_code)]

mod codec;
mod dataset;
mod error;
mod reader;
mod schema;
mod workspace;

pub use dataset::SqliteDataset;
pub use error::SqliteStoreError;
pub use reader::SqliteRowReader;
pub use workspace::{IN_MEMORY_PATH, SqliteWorkspace};
