//! Errors surfaced by dataset stores.

use thiserror::Error;

use crate::SchemaError;

/// Boxed backend failure carried by [`StoreError::Backend`].
pub type BackendError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors raised by [`crate::Dataset`] implementations and their cursors and
/// insert handles.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The dataset does not exist (or no longer exists) in its workspace.
    #[error("dataset {dataset} was not found")]
    DatasetNotFound {
        /// Name of the missing dataset.
        dataset: String,
    },
    /// The dataset cannot perform the requested operation.
    #[error("{operation} is not supported for dataset {dataset}")]
    UnsupportedOperation {
        /// Short description of the operation, such as `load-only mode`.
        operation: &'static str,
        /// Dataset that rejected the operation.
        dataset: String,
    },
    /// A field index did not address a slot of the row.
    #[error("field index {index} is out of range for a row of {len} fields")]
    FieldIndexOutOfRange {
        /// Requested index.
        index: usize,
        /// Number of slots in the row.
        len: usize,
    },
    /// A row did not match the dataset's field layout.
    #[error("row does not match the fields of dataset {dataset}: {source}")]
    Schema {
        /// Dataset the row was written to.
        dataset: String,
        /// Layout mismatch.
        #[source]
        source: SchemaError,
    },
    /// The underlying storage engine failed.
    #[error("dataset {dataset} failed: {source}")]
    Backend {
        /// Dataset the failing call targeted.
        dataset: String,
        /// Error reported by the storage engine.
        #[source]
        source: BackendError,
    },
}

impl StoreError {
    /// Wrap a storage-engine failure for `dataset`.
    pub fn backend(dataset: impl Into<String>, source: impl Into<BackendError>) -> Self {
        Self::Backend {
            dataset: dataset.into(),
            source: source.into(),
        }
    }

    /// Name of the dataset the error concerns, if it names one.
    #[must_use]
    pub fn dataset(&self) -> Option<&str> {
        match self {
            Self::DatasetNotFound { dataset }
            | Self::UnsupportedOperation { dataset, .. }
            | Self::Schema { dataset, .. }
            | Self::Backend { dataset, .. } => Some(dataset),
            Self::FieldIndexOutOfRange { .. } => None,
        }
    }
}
