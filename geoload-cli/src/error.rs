//! Error types emitted by the geoload CLI.
//!
//! Keep this error type reasonably small, as many CLI helpers return
//! `Result<_, CliError>`.

use std::sync::Arc;

use camino::Utf8PathBuf;
use geoload_core::{AppendError, JoinError, StoreError, retry::RetryError};
use geoload_sqlite::SqliteStoreError;
use thiserror::Error;

/// Errors emitted by the geoload CLI.
#[derive(Debug, Error)]
pub enum CliError {
    /// Provided arguments failed Clap validation.
    #[error(transparent)]
    ArgumentParsing(#[from] clap::Error),
    /// Configuration layering failed (files, env, CLI).
    #[error("failed to load configuration: {0}")]
    Configuration(#[from] Arc<ortho_config::OrthoError>),
    /// A required option is missing after configuration merging.
    #[error("missing {field} (set --{field} or {env})")]
    MissingArgument {
        /// Flag name without leading dashes.
        field: &'static str,
        /// Environment variable that can supply the value.
        env: &'static str,
    },
    /// Two options that exclude each other were both supplied.
    #[error("--{first} cannot be combined with --{second}")]
    ConflictingArguments {
        /// First flag name.
        first: &'static str,
        /// Second flag name.
        second: &'static str,
    },
    /// A `--map` value was not of the form `TARGET=SOURCE`.
    #[error("field mapping {mapping:?} must look like TARGET=SOURCE")]
    InvalidFieldMapping {
        /// Rejected mapping text.
        mapping: String,
    },
    /// The SQLite workspace could not be opened.
    #[error("failed to open workspace {path:?}: {source}")]
    OpenWorkspace {
        /// Workspace path.
        path: Utf8PathBuf,
        /// Every failed attempt.
        #[source]
        source: RetryError<SqliteStoreError>,
    },
    /// A dataset could not be opened in its workspace.
    #[error("failed to open dataset {dataset}: {source}")]
    OpenDataset {
        /// Dataset name.
        dataset: String,
        /// Store failure.
        #[source]
        source: SqliteStoreError,
    },
    /// The source SQL query could not be run.
    #[error("failed to run source query: {source}")]
    Query {
        /// Store failure.
        #[source]
        source: StoreError,
    },
    /// Appending rows failed.
    #[error("failed to append to {target}: {source}")]
    Append {
        /// Target dataset.
        target: String,
        /// Append failure.
        #[source]
        source: AppendError,
    },
    /// The spatial join failed.
    #[error("spatial join failed: {0}")]
    Join(#[source] JoinError),
    /// Join records could not be encoded as JSON.
    #[error("failed to serialize join records: {0}")]
    SerializeRecords(#[source] serde_json::Error),
    /// Writing the join output failed.
    #[error("failed to write join output: {0}")]
    WriteOutput(#[source] std::io::Error),
}
