//! Forward-only reader over the rows of a prepared statement.

use geoload_core::{FieldType, StoreError, TabularReader, Value, field_names_match};
use rusqlite::{Params, Rows, Statement};

use crate::codec::{decode_untyped, storage_type};

const QUERY_SOURCE: &str = "query";

/// [`TabularReader`] over the result of a SQL query.
///
/// Each call to [`TabularReader::read`] decodes the whole row, so values stay
/// available until the next advance. Column types follow the storage class of
/// the current row's values.
///
/// # Examples
///
/// ```
/// use geoload_core::TabularReader;
/// use geoload_sqlite::{SqliteRowReader, SqliteWorkspace};
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let workspace = SqliteWorkspace::in_memory()?;
/// let mut statement = workspace.tabular("SELECT 1 AS one, 'a' AS letter")?;
/// let mut reader = SqliteRowReader::new(&mut statement)?;
/// assert!(reader.read()?);
/// assert_eq!(reader.ordinal("LETTER"), Some(1));
/// # Ok(())
/// # }
/// ```
pub struct SqliteRowReader<'s> {
    rows: Rows<'s>,
    columns: Vec<String>,
    current: Vec<Value>,
    current_types: Vec<Option<FieldType>>,
}

impl<'s> SqliteRowReader<'s> {
    /// Run `statement` without parameters.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] when the query cannot start.
    pub fn new(statement: &'s mut Statement<'_>) -> Result<Self, StoreError> {
        Self::with_params(statement, [])
    }

    /// Run `statement` with `params` bound.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] when binding fails or the query cannot start.
    pub fn with_params<P: Params>(
        statement: &'s mut Statement<'_>,
        params: P,
    ) -> Result<Self, StoreError> {
        let columns: Vec<String> = statement
            .column_names()
            .into_iter()
            .map(str::to_owned)
            .collect();
        let rows = statement
            .query(params)
            .map_err(|err| StoreError::backend(QUERY_SOURCE, err))?;
        Ok(Self {
            rows,
            columns,
            current: Vec::new(),
            current_types: Vec::new(),
        })
    }

    /// Column names in select order.
    #[must_use]
    pub fn columns(&self) -> &[String] {
        &self.columns
    }
}

impl std::fmt::Debug for SqliteRowReader<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteRowReader")
            .field("columns", &self.columns)
            .field("current", &self.current)
            .finish_non_exhaustive()
    }
}

impl TabularReader for SqliteRowReader<'_> {
    fn read(&mut self) -> Result<bool, StoreError> {
        let Some(row) = self
            .rows
            .next()
            .map_err(|err| StoreError::backend(QUERY_SOURCE, err))?
        else {
            self.current.clear();
            self.current_types.clear();
            return Ok(false);
        };
        let mut values = Vec::with_capacity(self.columns.len());
        let mut types = Vec::with_capacity(self.columns.len());
        for (ordinal, column) in self.columns.iter().enumerate() {
            let stored = row
                .get_ref(ordinal)
                .map_err(|err| StoreError::backend(QUERY_SOURCE, err))?;
            types.push(storage_type(stored));
            values.push(
                decode_untyped(stored, column)
                    .map_err(|err| err.into_store_error(QUERY_SOURCE))?,
            );
        }
        self.current = values;
        self.current_types = types;
        Ok(true)
    }

    fn field_count(&self) -> usize {
        self.columns.len()
    }

    fn ordinal(&self, name: &str) -> Option<usize> {
        self.columns
            .iter()
            .position(|column| field_names_match(column, name))
    }

    fn value(&self, ordinal: usize) -> Result<Value, StoreError> {
        self.current
            .get(ordinal)
            .cloned()
            .ok_or(StoreError::FieldIndexOutOfRange {
                index: ordinal,
                len: self.current.len(),
            })
    }

    fn column_type(&self, ordinal: usize) -> Option<FieldType> {
        self.current_types.get(ordinal).copied().flatten()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::SqliteWorkspace;
    use rstest::{fixture, rstest};

    #[fixture]
    fn workspace() -> SqliteWorkspace {
        let workspace = SqliteWorkspace::in_memory().expect("open in-memory workspace");
        workspace
            .connection()
            .execute_batch(
                "CREATE TABLE visits (site TEXT, hits INTEGER, ratio REAL, raw BLOB);
                 INSERT INTO visits VALUES ('north', 4, 0.5, x'01');
                 INSERT INTO visits VALUES ('south', NULL, 1.5, NULL);",
            )
            .expect("seed visits");
        workspace
    }

    #[rstest]
    fn reads_rows_in_order(workspace: SqliteWorkspace) {
        let mut statement = workspace
            .tabular("SELECT site, hits, ratio, raw FROM visits ORDER BY rowid")
            .expect("prepare");
        let mut reader = SqliteRowReader::new(&mut statement).expect("query");
        assert_eq!(reader.field_count(), 4);

        assert!(reader.read().expect("first row"));
        assert_eq!(reader.value(0).expect("site"), Value::from("north"));
        assert_eq!(reader.value(1).expect("hits"), Value::Int(4));
        assert_eq!(reader.value(3).expect("raw"), Value::Blob(vec![1]));
        assert_eq!(reader.column_type(2), Some(FieldType::Double));

        assert!(reader.read().expect("second row"));
        assert_eq!(reader.value(1).expect("hits"), Value::Null);
        assert_eq!(reader.column_type(1), None);

        assert!(!reader.read().expect("exhausted"));
    }

    #[rstest]
    fn ordinals_ignore_case(workspace: SqliteWorkspace) {
        let mut statement = workspace
            .tabular("SELECT site, hits FROM visits")
            .expect("prepare");
        let reader = SqliteRowReader::new(&mut statement).expect("query");
        assert_eq!(reader.ordinal("HITS"), Some(1));
        assert_eq!(reader.ordinal("missing"), None);
    }

    #[rstest]
    fn bound_parameters_filter_rows(workspace: SqliteWorkspace) {
        let mut statement = workspace
            .tabular("SELECT site FROM visits WHERE ratio > ?1")
            .expect("prepare");
        let mut reader = SqliteRowReader::with_params(&mut statement, [1.0]).expect("query");
        assert!(reader.read().expect("row"));
        assert_eq!(reader.value(0).expect("site"), Value::from("south"));
        assert!(!reader.read().expect("exhausted"));
    }

    #[rstest]
    fn out_of_range_ordinals_are_reported(workspace: SqliteWorkspace) {
        let mut statement = workspace.tabular("SELECT site FROM visits").expect("prepare");
        let mut reader = SqliteRowReader::new(&mut statement).expect("query");
        assert!(reader.read().expect("row"));
        let err = reader.value(3).expect_err("no such column");
        assert!(matches!(
            err,
            StoreError::FieldIndexOutOfRange { index: 3, len: 1 }
        ));
    }
}
