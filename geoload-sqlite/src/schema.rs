//! Table creation and the `geoload_fields` metadata table.

use geoload_core::{FieldDescriptor, FieldSet, FieldType, Value};
use rusqlite::{Connection, OptionalExtension, params};

use crate::{
    SqliteStoreError,
    codec::{column_decl, infer_field_type, quote_ident},
};

/// Metadata table recording each dataset's field layout.
pub(crate) const FIELDS_TABLE: &str = "geoload_fields";

/// Bounding-box columns kept beside a geometry column.
pub(crate) const BBOX_COLUMNS: [&str; 4] = [
    "geoload_minx",
    "geoload_miny",
    "geoload_maxx",
    "geoload_maxy",
];

pub(crate) fn ensure_metadata_table(connection: &Connection) -> rusqlite::Result<()> {
    connection.execute_batch(&format!(
        "CREATE TABLE IF NOT EXISTS {FIELDS_TABLE} (
            dataset TEXT NOT NULL,
            position INTEGER NOT NULL,
            name TEXT NOT NULL,
            field_type TEXT NOT NULL,
            width INTEGER,
            precision INTEGER,
            nullable INTEGER NOT NULL,
            editable INTEGER NOT NULL,
            primary_key INTEGER NOT NULL,
            default_value TEXT,
            PRIMARY KEY (dataset, position)
        )"
    ))
}

pub(crate) fn table_exists(connection: &Connection, name: &str) -> rusqlite::Result<bool> {
    connection
        .query_row(
            "SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1",
            [name],
            |_| Ok(()),
        )
        .optional()
        .map(|found| found.is_some())
}

/// Create the table for `name` and record its fields.
pub(crate) fn create_table(
    connection: &Connection,
    name: &str,
    fields: &FieldSet,
) -> Result<(), SqliteStoreError> {
    let mut columns = Vec::with_capacity(fields.len() + BBOX_COLUMNS.len());
    for field in fields {
        let mut column = format!("{} {}", quote_ident(&field.name), column_decl(field.field_type));
        if !field.nullable && field.field_type != FieldType::ObjectId {
            column.push_str(" NOT NULL");
        }
        columns.push(column);
    }
    if fields.geometry_field().is_some() {
        columns.extend(BBOX_COLUMNS.iter().map(|column| format!("{column} REAL")));
    }

    let transaction = connection.unchecked_transaction()?;
    transaction.execute_batch(&format!(
        "CREATE TABLE {} ({})",
        quote_ident(name),
        columns.join(", ")
    ))?;
    if fields.geometry_field().is_some() {
        transaction.execute_batch(&format!(
            "CREATE INDEX {} ON {} ({})",
            quote_ident(&format!("{name}_bbox")),
            quote_ident(name),
            BBOX_COLUMNS.join(", ")
        ))?;
    }
    {
        let mut insert = transaction.prepare(&format!(
            "INSERT INTO {FIELDS_TABLE} (dataset, position, name, field_type, width, precision, \
             nullable, editable, primary_key, default_value) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)"
        ))?;
        for (position, field) in fields.iter().enumerate() {
            let default_value = field
                .default_value
                .as_ref()
                .map(serde_json::to_string)
                .transpose()
                .map_err(|source| SqliteStoreError::Json {
                    column: field.name.clone(),
                    source,
                })?;
            insert.execute(params![
                name,
                i64::try_from(position).unwrap_or(i64::MAX),
                field.name,
                field.field_type.keyword(),
                field.width,
                field.precision,
                field.nullable,
                field.editable,
                field.is_primary_key,
                default_value,
            ])?;
        }
    }
    transaction.commit()?;
    log::debug!("created dataset {name} with {} fields", fields.len());
    Ok(())
}

/// Field layout of `name`: recorded metadata when present, otherwise
/// inferred from the table's declared columns. `None` when no table exists.
pub(crate) fn load_fields(
    connection: &Connection,
    name: &str,
) -> Result<Option<FieldSet>, SqliteStoreError> {
    if !table_exists(connection, name)? {
        return Ok(None);
    }
    let recorded = recorded_fields(connection, name)?;
    let descriptors = if recorded.is_empty() {
        log::debug!("dataset {name} has no recorded fields; inferring from the table");
        inferred_fields(connection, name)?
    } else {
        recorded
    };
    FieldSet::new(descriptors)
        .map(Some)
        .map_err(|source| SqliteStoreError::Schema {
            dataset: name.to_owned(),
            source,
        })
}

fn recorded_fields(
    connection: &Connection,
    name: &str,
) -> Result<Vec<FieldDescriptor>, SqliteStoreError> {
    if !table_exists(connection, FIELDS_TABLE)? {
        return Ok(Vec::new());
    }
    let mut statement = connection.prepare(&format!(
        "SELECT name, field_type, width, precision, nullable, editable, primary_key, \
         default_value FROM {FIELDS_TABLE} WHERE dataset = ?1 ORDER BY position"
    ))?;
    let mut rows = statement.query([name])?;
    let mut fields = Vec::new();
    while let Some(row) = rows.next()? {
        let field_name: String = row.get(0)?;
        let keyword: String = row.get(1)?;
        let field_type: FieldType =
            keyword
                .parse()
                .map_err(|source| SqliteStoreError::Schema {
                    dataset: name.to_owned(),
                    source,
                })?;
        let default_text: Option<String> = row.get(7)?;
        let default_value = default_text
            .map(|text| serde_json::from_str::<Value>(&text))
            .transpose()
            .map_err(|source| SqliteStoreError::Json {
                column: field_name.clone(),
                source,
            })?;
        fields.push(FieldDescriptor {
            name: field_name,
            field_type,
            width: row.get(2)?,
            precision: row.get(3)?,
            nullable: row.get(4)?,
            editable: row.get(5)?,
            default_value,
            is_primary_key: row.get(6)?,
        });
    }
    Ok(fields)
}

fn inferred_fields(
    connection: &Connection,
    name: &str,
) -> Result<Vec<FieldDescriptor>, SqliteStoreError> {
    let mut statement = connection.prepare(&format!("PRAGMA table_info({})", quote_ident(name)))?;
    let mut rows = statement.query([])?;
    let mut fields = Vec::new();
    while let Some(row) = rows.next()? {
        let column: String = row.get(1)?;
        if BBOX_COLUMNS.contains(&column.as_str()) {
            continue;
        }
        let declared: String = row.get(2)?;
        let not_null: bool = row.get(3)?;
        let primary_key: i64 = row.get(5)?;
        let field_type = infer_field_type(&declared, primary_key > 0);
        let mut field = FieldDescriptor::new(column, field_type);
        if not_null {
            field = field.not_null();
        }
        fields.push(field);
    }
    Ok(fields)
}
