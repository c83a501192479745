//! A SQLite database holding any number of datasets.

use std::path::Path;

use geoload_core::{
    FieldSet,
    retry::{RetryError, open_with_retry},
};
use rusqlite::{Connection, Statement};

use crate::{
    SqliteDataset, SqliteStoreError,
    schema::{FIELDS_TABLE, create_table, ensure_metadata_table, load_fields, table_exists},
};

/// Path reported by in-memory workspaces.
pub const IN_MEMORY_PATH: &str = ":memory:";

/// An open SQLite database.
///
/// Datasets borrow the workspace's connection, so they cannot outlive it.
///
/// # Examples
///
/// ```
/// use geoload_core::{Dataset, FieldDescriptor, FieldSet, FieldType};
/// use geoload_sqlite::SqliteWorkspace;
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let workspace = SqliteWorkspace::in_memory()?;
/// let fields = FieldSet::new(vec![
///     FieldDescriptor::new("OBJECTID", FieldType::ObjectId),
///     FieldDescriptor::new("NAME", FieldType::String),
/// ])?;
/// workspace.create_dataset("parks", fields)?;
/// let parks = workspace.dataset("parks")?;
/// assert_eq!(parks.count(None)?, 0);
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct SqliteWorkspace {
    connection: Connection,
    path: String,
}

impl SqliteWorkspace {
    /// Open or create the database at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`SqliteStoreError::OpenDatabase`] when SQLite cannot open the
    /// file, or a database error when the metadata table cannot be created.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, SqliteStoreError> {
        let location = path.as_ref();
        let connection =
            Connection::open(location).map_err(|source| SqliteStoreError::OpenDatabase {
                path: location.to_path_buf(),
                source,
            })?;
        Self::with_connection(connection, location.display().to_string())
    }

    /// Open `path`, trying up to `max_attempts` times.
    ///
    /// # Errors
    ///
    /// Returns [`RetryError::MaxRetriesExceeded`] with every attempt's error.
    pub fn open_with_retry(
        path: impl AsRef<Path>,
        max_attempts: u32,
    ) -> Result<Self, RetryError<SqliteStoreError>> {
        let location = path.as_ref();
        open_with_retry(max_attempts, |attempt| {
            log::debug!("opening {} (attempt {attempt})", location.display());
            Self::open(location)
        })
    }

    /// A private in-memory database.
    ///
    /// # Errors
    ///
    /// Returns a database error when SQLite cannot allocate the database.
    pub fn in_memory() -> Result<Self, SqliteStoreError> {
        Self::with_connection(Connection::open_in_memory()?, IN_MEMORY_PATH.to_owned())
    }

    fn with_connection(connection: Connection, path: String) -> Result<Self, SqliteStoreError> {
        ensure_metadata_table(&connection)?;
        Ok(Self { connection, path })
    }

    /// Path the workspace was opened from.
    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    /// The underlying connection.
    #[must_use]
    pub const fn connection(&self) -> &Connection {
        &self.connection
    }

    /// Names of user tables, sorted.
    ///
    /// # Errors
    ///
    /// Returns a database error when the catalogue cannot be read.
    pub fn dataset_names(&self) -> Result<Vec<String>, SqliteStoreError> {
        let mut statement = self.connection.prepare(
            "SELECT name FROM sqlite_master WHERE type = 'table' \
             AND name NOT LIKE 'sqlite_%' AND name <> ?1 ORDER BY name",
        )?;
        let names = statement
            .query_map([FIELDS_TABLE], |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()?;
        Ok(names)
    }

    /// Create a dataset called `name` with `fields`.
    ///
    /// # Errors
    ///
    /// Returns [`SqliteStoreError::DatasetExists`] when the name is taken.
    pub fn create_dataset(
        &self,
        name: &str,
        fields: FieldSet,
    ) -> Result<SqliteDataset<'_>, SqliteStoreError> {
        if table_exists(&self.connection, name)? {
            return Err(SqliteStoreError::DatasetExists {
                dataset: name.to_owned(),
            });
        }
        create_table(&self.connection, name, &fields)?;
        Ok(SqliteDataset::new(&self.connection, name, &self.path, fields))
    }

    /// Open the dataset called `name`.
    ///
    /// Tables created outside this crate are opened with fields inferred
    /// from their declared column types.
    ///
    /// # Errors
    ///
    /// Returns [`SqliteStoreError::DatasetNotFound`] when no such table exists.
    pub fn dataset(&self, name: &str) -> Result<SqliteDataset<'_>, SqliteStoreError> {
        let fields =
            load_fields(&self.connection, name)?.ok_or_else(|| SqliteStoreError::DatasetNotFound {
                dataset: name.to_owned(),
            })?;
        Ok(SqliteDataset::new(&self.connection, name, &self.path, fields))
    }

    /// Drop the dataset called `name` and its recorded fields.
    ///
    /// Dataset handles opened earlier report
    /// [`geoload_core::StoreError::DatasetNotFound`] afterwards.
    ///
    /// # Errors
    ///
    /// Returns [`SqliteStoreError::DatasetNotFound`] when no such table exists.
    pub fn drop_dataset(&self, name: &str) -> Result<(), SqliteStoreError> {
        if !table_exists(&self.connection, name)? {
            return Err(SqliteStoreError::DatasetNotFound {
                dataset: name.to_owned(),
            });
        }
        let transaction = self.connection.unchecked_transaction()?;
        transaction.execute_batch(&format!(
            "DROP TABLE {}",
            crate::codec::quote_ident(name)
        ))?;
        transaction.execute(&format!("DELETE FROM {FIELDS_TABLE} WHERE dataset = ?1"), [name])?;
        transaction.commit()?;
        log::debug!("dropped dataset {name}");
        Ok(())
    }

    /// Prepare `sql` for reading through a [`crate::SqliteRowReader`].
    ///
    /// # Errors
    ///
    /// Returns a database error when the statement does not compile.
    pub fn tabular(&self, sql: &str) -> Result<Statement<'_>, SqliteStoreError> {
        Ok(self.connection.prepare(sql)?)
    }
}
