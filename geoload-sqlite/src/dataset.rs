//! [`Dataset`] implementation over one SQLite table.

use std::{
    cell::{Cell, RefCell},
    collections::VecDeque,
    fmt,
    sync::Arc,
};

use geo::{BoundingRect, Geometry};
use geoload_core::{
    Cursor, Dataset, FieldSet, FieldType, InsertHandle, Predicate, Row, RowBuffer, SchemaError,
    SchemaLock, SpatialQuery, StoreError, SubFields, Value,
};
use rusqlite::{Connection, params_from_iter, types::Value as SqlValue};

use crate::{
    SqliteStoreError,
    codec::{decode, encode, quote_ident},
    schema::{BBOX_COLUMNS, table_exists},
};

/// Rows fetched per cursor page.
const PAGE_SIZE: usize = 512;

/// Pragmas overridden while load-only mode is on.
#[derive(Debug, Clone)]
struct SavedPragmas {
    synchronous: i64,
    journal_mode: String,
}

/// A feature class or table stored in a [`crate::SqliteWorkspace`].
///
/// Geometries live in the shape column as JSON text with a bounding box
/// kept in four `geoload_*` columns, which spatial searches use as a
/// prefilter before testing the relation exactly.
///
/// The schema lock maps to `PRAGMA locking_mode` and load-only mode turns
/// `synchronous` off and moves the journal into memory. Both are connection
/// wide.
pub struct SqliteDataset<'w> {
    connection: &'w Connection,
    name: String,
    path: String,
    fields: Arc<FieldSet>,
    table: String,
    select_list: String,
    lock: Cell<SchemaLock>,
    saved_pragmas: RefCell<Option<SavedPragmas>>,
}

impl fmt::Debug for SqliteDataset<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SqliteDataset")
            .field("name", &self.name)
            .field("path", &self.path)
            .field("fields", &self.fields.len())
            .field("lock", &self.lock.get())
            .finish_non_exhaustive()
    }
}

impl<'w> SqliteDataset<'w> {
    pub(crate) fn new(
        connection: &'w Connection,
        name: &str,
        path: &str,
        fields: FieldSet,
    ) -> Self {
        let mut columns = vec!["rowid".to_owned()];
        columns.extend(fields.iter().map(|field| quote_ident(&field.name)));
        Self {
            connection,
            name: name.to_owned(),
            path: path.to_owned(),
            table: quote_ident(name),
            select_list: columns.join(", "),
            fields: Arc::new(fields),
            lock: Cell::new(SchemaLock::Shared),
            saved_pragmas: RefCell::new(None),
        }
    }

    fn fail(&self, err: impl Into<SqliteStoreError>) -> StoreError {
        err.into().into_store_error(&self.name)
    }

    fn ensure_exists(&self) -> Result<(), StoreError> {
        if table_exists(self.connection, &self.name).map_err(|err| self.fail(err))? {
            Ok(())
        } else {
            Err(StoreError::DatasetNotFound {
                dataset: self.name.clone(),
            })
        }
    }

    /// SQL condition for an optional predicate.
    ///
    /// Raw where clauses are spliced into statements whose keyset and
    /// envelope bounds are positional parameters, so a clause carrying its
    /// own parameter marker is rejected rather than allowed to rebind them.
    fn condition(&self, predicate: Option<&Predicate>) -> Result<Option<String>, StoreError> {
        let Some(filter) = predicate else {
            return Ok(None);
        };
        if matches!(filter, Predicate::Where(clause) if has_parameter_marker(clause)) {
            return Err(StoreError::UnsupportedOperation {
                operation: "parameter markers in a where clause",
                dataset: self.name.clone(),
            });
        }
        Ok(Some(format!("({})", filter.to_where_clause("rowid"))))
    }

    fn geometry_index(&self) -> Option<usize> {
        self.fields.position_of_type(FieldType::Geometry)
    }

    fn decode_row(&self, row: &rusqlite::Row<'_>) -> Result<(i64, Vec<Value>), SqliteStoreError> {
        let object_id: i64 = row.get(0)?;
        let mut values = Vec::with_capacity(self.fields.len());
        for (offset, field) in self.fields.iter().enumerate() {
            let raw = row.get_ref(offset + 1)?;
            values.push(decode(field.field_type, raw, &field.name)?);
        }
        Ok((object_id, values))
    }

    fn open_cursor(&self, filter: CursorFilter) -> Result<Box<dyn Cursor + '_>, StoreError> {
        self.ensure_exists()?;
        Ok(Box::new(SqliteCursor {
            dataset: self,
            filter,
            last_id: i64::MIN,
            page: VecDeque::new(),
            exhausted: false,
        }))
    }

    fn read_pragmas(&self) -> Result<SavedPragmas, SqliteStoreError> {
        let synchronous = self
            .connection
            .pragma_query_value(None, "synchronous", |row| row.get(0))?;
        let journal_mode = self
            .connection
            .pragma_query_value(None, "journal_mode", |row| row.get(0))?;
        Ok(SavedPragmas {
            synchronous,
            journal_mode,
        })
    }

    fn apply_pragmas(&self, synchronous: i64, journal_mode: &str) -> Result<(), SqliteStoreError> {
        self.connection
            .pragma_update(None, "synchronous", synchronous)?;
        let applied: String = self.connection.pragma_update_and_check(
            None,
            "journal_mode",
            journal_mode,
            |row| row.get(0),
        )?;
        log::trace!("{}: synchronous={synchronous} journal_mode={applied}", self.name);
        Ok(())
    }
}

/// SQL condition plus bound parameters; spatial cursors also refine and
/// project each row.
#[derive(Debug, Default)]
struct CursorFilter {
    condition: Option<String>,
    params: Vec<SqlValue>,
    spatial: Option<SpatialQuery>,
}

impl CursorFilter {
    fn attribute(condition: Option<String>) -> Self {
        Self {
            condition,
            ..Self::default()
        }
    }

    fn spatial(query: &SpatialQuery, condition: Option<String>) -> Self {
        let mut conditions: Vec<String> = condition.into_iter().collect();
        let mut params = Vec::new();
        if query.relation.requires_envelope_overlap() {
            let [min_x, min_y, max_x, max_y] = BBOX_COLUMNS;
            let envelope = query.geometry.bounding_rect().map_or_else(
                || "1 = 0".to_owned(),
                |rect| {
                    params.extend([
                        SqlValue::Real(rect.min().x),
                        SqlValue::Real(rect.max().x),
                        SqlValue::Real(rect.min().y),
                        SqlValue::Real(rect.max().y),
                    ]);
                    format!("{max_x} >= ?2 AND {min_x} <= ?3 AND {max_y} >= ?4 AND {min_y} <= ?5")
                },
            );
            conditions.push(envelope);
        }
        Self {
            condition: (!conditions.is_empty()).then(|| conditions.join(" AND ")),
            params,
            spatial: Some(query.clone()),
        }
    }
}

struct SqliteCursor<'d, 'w> {
    dataset: &'d SqliteDataset<'w>,
    filter: CursorFilter,
    last_id: i64,
    page: VecDeque<Row>,
    exhausted: bool,
}

impl SqliteCursor<'_, '_> {
    /// Fetch the next page of rows after `last_id`.
    fn fill_page(&mut self) -> Result<(), SqliteStoreError> {
        let dataset = self.dataset;
        let condition = self
            .filter
            .condition
            .as_ref()
            .map(|c| format!(" AND {c}"))
            .unwrap_or_default();
        let sql = format!(
            "SELECT {} FROM {} WHERE rowid > ?1{condition} ORDER BY rowid LIMIT {PAGE_SIZE}",
            dataset.select_list, dataset.table
        );
        let mut statement = dataset.connection.prepare_cached(&sql)?;
        let params = std::iter::once(SqlValue::Integer(self.last_id))
            .chain(self.filter.params.iter().cloned());
        let mut rows = statement.query(params_from_iter(params))?;
        let mut fetched = 0;
        while let Some(row) = rows.next()? {
            fetched += 1;
            let (object_id, values) = dataset.decode_row(row)?;
            self.last_id = object_id;
            if let Some(kept) = self.refine(values) {
                let decoded = Row::new(object_id, Arc::clone(&dataset.fields), kept).map_err(
                    |source| SqliteStoreError::Schema {
                        dataset: dataset.name.clone(),
                        source,
                    },
                )?;
                self.page.push_back(decoded);
            }
        }
        self.exhausted = fetched < PAGE_SIZE;
        Ok(())
    }

    /// Apply the exact spatial relation and the field projection.
    fn refine(&self, values: Vec<Value>) -> Option<Vec<Value>> {
        let Some(query) = &self.filter.spatial else {
            return Some(values);
        };
        let geometry = self
            .dataset
            .geometry_index()
            .and_then(|index| values.get(index))
            .and_then(Value::as_geometry)?;
        if !query.relation.holds(&query.geometry, geometry) {
            return None;
        }
        Some(project(&self.dataset.fields, values, &query.sub_fields))
    }
}

/// Whether a raw where clause holds a `?`, `:name`, `@name` or `$name`
/// marker outside string literals and quoted identifiers.
fn has_parameter_marker(clause: &str) -> bool {
    let mut closing: Option<char> = None;
    let mut chars = clause.chars().peekable();
    while let Some(ch) = chars.next() {
        match closing {
            Some(end) if ch == end => closing = None,
            Some(_) => {}
            None => match ch {
                '\'' | '"' | '`' => closing = Some(ch),
                '[' => closing = Some(']'),
                '?' => return true,
                ':' | '@' | '$' => {
                    if chars
                        .peek()
                        .is_some_and(|next| next.is_alphanumeric() || *next == '_')
                    {
                        return true;
                    }
                }
                _ => {}
            },
        }
    }
    false
}

fn project(fields: &FieldSet, values: Vec<Value>, sub_fields: &SubFields) -> Vec<Value> {
    if matches!(sub_fields, SubFields::All) {
        return values;
    }
    fields
        .iter()
        .zip(values)
        .map(|(field, value)| {
            let always = matches!(field.field_type, FieldType::ObjectId | FieldType::Geometry);
            if always || sub_fields.includes(&field.name) {
                value
            } else {
                Value::Null
            }
        })
        .collect()
}

impl Cursor for SqliteCursor<'_, '_> {
    fn next_row(&mut self) -> Result<Option<Row>, StoreError> {
        loop {
            if let Some(row) = self.page.pop_front() {
                return Ok(Some(row));
            }
            if self.exhausted {
                return Ok(None);
            }
            self.fill_page().map_err(|err| self.dataset.fail(err))?;
        }
    }
}

impl Dataset for SqliteDataset<'_> {
    fn name(&self) -> &str {
        &self.name
    }

    fn path(&self) -> &str {
        &self.path
    }

    fn fields(&self) -> Arc<FieldSet> {
        Arc::clone(&self.fields)
    }

    fn search(
        &self,
        predicate: Option<&Predicate>,
        _read_only: bool,
    ) -> Result<Box<dyn Cursor + '_>, StoreError> {
        let condition = self.condition(predicate)?;
        self.open_cursor(CursorFilter::attribute(condition))
    }

    fn search_spatial(&self, query: &SpatialQuery) -> Result<Box<dyn Cursor + '_>, StoreError> {
        if self.geometry_index().is_none() {
            return Err(StoreError::UnsupportedOperation {
                operation: "spatial search",
                dataset: self.name.clone(),
            });
        }
        let condition = self.condition(query.predicate.as_ref())?;
        self.open_cursor(CursorFilter::spatial(query, condition))
    }

    fn count(&self, predicate: Option<&Predicate>) -> Result<u64, StoreError> {
        self.ensure_exists()?;
        let condition = self
            .condition(predicate)?
            .map(|c| format!(" WHERE {c}"))
            .unwrap_or_default();
        let count: i64 = self
            .connection
            .query_row(
                &format!("SELECT COUNT(*) FROM {}{condition}", self.table),
                [],
                |row| row.get(0),
            )
            .map_err(|err| self.fail(err))?;
        Ok(u64::try_from(count).unwrap_or_default())
    }

    fn begin_insert(&self, buffered: bool) -> Result<Box<dyn InsertHandle + '_>, StoreError> {
        self.ensure_exists()?;
        if buffered {
            if !self.connection.is_autocommit() {
                return Err(StoreError::UnsupportedOperation {
                    operation: "buffered insert inside an open transaction",
                    dataset: self.name.clone(),
                });
            }
            self.connection
                .execute_batch("BEGIN")
                .map_err(|err| self.fail(err))?;
        }
        Ok(Box::new(SqliteInsertHandle {
            sql: insert_sql(self),
            dataset: self,
            in_transaction: buffered,
            pending: 0,
        }))
    }

    fn schema_lock(&self) -> SchemaLock {
        self.lock.get()
    }

    fn change_schema_lock(&self, lock: SchemaLock) -> Result<(), StoreError> {
        // Releasing must still work after the table was dropped mid-load.
        let mode = match lock {
            SchemaLock::Shared => "NORMAL",
            SchemaLock::Exclusive => {
                self.ensure_exists()?;
                "EXCLUSIVE"
            }
        };
        let applied: String = self
            .connection
            .pragma_update_and_check(None, "locking_mode", mode, |row| row.get(0))
            .map_err(|err| self.fail(err))?;
        log::debug!("{}: locking_mode={applied}", self.name);
        self.lock.set(lock);
        Ok(())
    }

    fn supports_load_only_mode(&self) -> bool {
        true
    }

    fn load_only_mode(&self) -> bool {
        self.saved_pragmas.borrow().is_some()
    }

    fn set_load_only_mode(&self, enabled: bool) -> Result<(), StoreError> {
        if enabled == self.load_only_mode() {
            return Ok(());
        }
        if enabled {
            self.ensure_exists()?;
            let saved = self.read_pragmas().map_err(|err| self.fail(err))?;
            self.apply_pragmas(0, "MEMORY")
                .map_err(|err| self.fail(err))?;
            self.saved_pragmas.replace(Some(saved));
        } else if let Some(saved) = self.saved_pragmas.take() {
            if let Err(err) = self.apply_pragmas(saved.synchronous, &saved.journal_mode) {
                self.saved_pragmas.replace(Some(saved));
                return Err(self.fail(err));
            }
        }
        Ok(())
    }
}

/// Columns written on insert: every field but the object id, plus the
/// bounding box when the dataset has a shape field.
fn insert_sql(dataset: &SqliteDataset<'_>) -> String {
    let mut columns: Vec<String> = dataset
        .fields
        .iter()
        .filter(|field| field.field_type != FieldType::ObjectId)
        .map(|field| quote_ident(&field.name))
        .collect();
    if dataset.geometry_index().is_some() {
        columns.extend(BBOX_COLUMNS.iter().map(|column| (*column).to_owned()));
    }
    if columns.is_empty() {
        return format!("INSERT INTO {} DEFAULT VALUES", dataset.table);
    }
    let placeholders: Vec<String> = (1..=columns.len()).map(|n| format!("?{n}")).collect();
    format!(
        "INSERT INTO {} ({}) VALUES ({})",
        dataset.table,
        columns.join(", "),
        placeholders.join(", ")
    )
}

struct SqliteInsertHandle<'d, 'w> {
    dataset: &'d SqliteDataset<'w>,
    sql: String,
    in_transaction: bool,
    pending: u64,
}

impl SqliteInsertHandle<'_, '_> {
    fn bind_values(&self, row: &RowBuffer) -> Result<Vec<SqlValue>, SqliteStoreError> {
        let fields = &self.dataset.fields;
        let mut params = Vec::with_capacity(fields.len() + BBOX_COLUMNS.len());
        for (field, value) in fields.iter().zip(row.values()) {
            if field.field_type != FieldType::ObjectId {
                params.push(encode(value, &field.name)?);
            }
        }
        if self.dataset.geometry_index().is_some() {
            params.extend(bbox_params(row.geometry()));
        }
        Ok(params)
    }
}

fn bbox_params(geometry: Option<&Geometry<f64>>) -> [SqlValue; 4] {
    geometry.and_then(|shape| shape.bounding_rect()).map_or(
        [SqlValue::Null, SqlValue::Null, SqlValue::Null, SqlValue::Null],
        |rect| {
            [
                SqlValue::Real(rect.min().x),
                SqlValue::Real(rect.min().y),
                SqlValue::Real(rect.max().x),
                SqlValue::Real(rect.max().y),
            ]
        },
    )
}

impl InsertHandle for SqliteInsertHandle<'_, '_> {
    fn insert(&mut self, row: RowBuffer) -> Result<i64, StoreError> {
        let dataset = self.dataset;
        if row.values().len() != dataset.fields.len() {
            return Err(StoreError::Schema {
                dataset: dataset.name.clone(),
                source: SchemaError::ValueCountMismatch {
                    expected: dataset.fields.len(),
                    actual: row.values().len(),
                },
            });
        }
        let params = self.bind_values(&row).map_err(|err| dataset.fail(err))?;
        let mut statement = dataset
            .connection
            .prepare_cached(&self.sql)
            .map_err(|err| dataset.fail(err))?;
        statement
            .execute(params_from_iter(params))
            .map_err(|err| dataset.fail(err))?;
        self.pending += 1;
        Ok(dataset.connection.last_insert_rowid())
    }

    fn flush(&mut self) -> Result<(), StoreError> {
        if !self.in_transaction {
            return Ok(());
        }
        let dataset = self.dataset;
        dataset
            .connection
            .execute_batch("COMMIT; BEGIN")
            .map_err(|err| dataset.fail(err))?;
        log::trace!("{}: committed {} rows", dataset.name, self.pending);
        self.pending = 0;
        Ok(())
    }
}

impl Drop for SqliteInsertHandle<'_, '_> {
    fn drop(&mut self) {
        if !self.in_transaction {
            return;
        }
        if self.pending > 0 {
            log::debug!(
                "{}: rolling back {} unflushed rows",
                self.dataset.name,
                self.pending
            );
        }
        if let Err(err) = self.dataset.connection.execute_batch("ROLLBACK") {
            log::warn!("{}: rollback failed: {err}", self.dataset.name);
        }
    }
}
