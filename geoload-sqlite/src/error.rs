//! Errors raised by the SQLite workspace and its datasets.

use std::path::PathBuf;

use geoload_core::{SchemaError, StoreError};
use thiserror::Error;

/// Error raised when opening, creating or reading SQLite datasets.
#[derive(Debug, Error)]
pub enum SqliteStoreError {
    /// Opening the SQLite database failed.
    #[error("failed to open SQLite database at {path}: {source}")]
    OpenDatabase {
        /// Location of the SQLite database on disk.
        path: PathBuf,
        /// Source error returned by `rusqlite`.
        #[source]
        source: rusqlite::Error,
    },
    /// No table or field metadata exists for the dataset.
    #[error("dataset {dataset} was not found")]
    DatasetNotFound {
        /// Requested dataset name.
        dataset: String,
    },
    /// `create_dataset` was asked for a name that is already taken.
    #[error("dataset {dataset} already exists")]
    DatasetExists {
        /// Conflicting dataset name.
        dataset: String,
    },
    /// Stored or requested field metadata is invalid.
    #[error("invalid fields for dataset {dataset}: {source}")]
    Schema {
        /// Dataset whose fields were rejected.
        dataset: String,
        /// Validation failure.
        #[source]
        source: SchemaError,
    },
    /// A stored value could not be decoded for its column.
    #[error("column {column} holds an invalid value: {message}")]
    InvalidValue {
        /// Column the value was read from.
        column: String,
        /// What was wrong with it.
        message: String,
    },
    /// A geometry or default-value payload could not be converted to or
    /// from JSON.
    #[error("invalid JSON payload for column {column}: {source}")]
    Json {
        /// Column the payload was read from or written to.
        column: String,
        /// JSON encoding or decoding failure.
        #[source]
        source: serde_json::Error,
    },
    /// Generic SQLite error.
    #[error(transparent)]
    Database(#[from] rusqlite::Error),
}

impl SqliteStoreError {
    /// Convert into a [`StoreError`] for `dataset`.
    #[must_use]
    pub fn into_store_error(self, dataset: &str) -> StoreError {
        match self {
            Self::DatasetNotFound { dataset: missing } => {
                StoreError::DatasetNotFound { dataset: missing }
            }
            Self::Schema {
                dataset: owner,
                source,
            } => StoreError::Schema {
                dataset: owner,
                source,
            },
            other => StoreError::backend(dataset, other),
        }
    }
}
