//! Record sources consumed by the append orchestrator.
//!
//! A [`RecordSource`] is a feature/table cursor ([`CursorSource`]), a
//! tabular result stream such as an SQL query ([`ReaderSource`]) or a list
//! of in-memory transfer records ([`RecordListSource`]).

use geo::Geometry;

use crate::{FieldType, Record, Row, SourceRow, StoreError, Value};

use super::Cursor;

/// Forward-only source of rows positioned one row at a time.
pub trait RecordSource {
    /// Move to the next row, returning `false` once exhausted.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] when the underlying stream fails.
    fn advance(&mut self) -> Result<bool, StoreError>;

    /// The row the source is positioned on, if any.
    fn current(&self) -> Option<&dyn SourceRow>;
}

/// [`RecordSource`] over a dataset cursor.
pub struct CursorSource<'a> {
    cursor: Box<dyn Cursor + 'a>,
    current: Option<Row>,
}

impl<'a> CursorSource<'a> {
    /// Wrap an open cursor.
    #[must_use]
    pub fn new(cursor: Box<dyn Cursor + 'a>) -> Self {
        Self {
            cursor,
            current: None,
        }
    }
}

impl std::fmt::Debug for CursorSource<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CursorSource")
            .field("current", &self.current.as_ref().map(Row::object_id))
            .finish_non_exhaustive()
    }
}

impl RecordSource for CursorSource<'_> {
    fn advance(&mut self) -> Result<bool, StoreError> {
        self.current = self.cursor.next_row()?;
        Ok(self.current.is_some())
    }

    fn current(&self) -> Option<&dyn SourceRow> {
        self.current.as_ref().map(|row| row as &dyn SourceRow)
    }
}

/// Tabular, non-spatial result stream such as an SQL query.
///
/// Dropping the reader closes it.
pub trait TabularReader {
    /// Advance to the next row, returning `false` once exhausted.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] when the stream fails.
    fn read(&mut self) -> Result<bool, StoreError>;

    /// Number of columns.
    fn field_count(&self) -> usize;

    /// Ordinal of the column called `name`, ignoring case.
    fn ordinal(&self, name: &str) -> Option<usize>;

    /// Value of the column at `ordinal` on the current row.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::FieldIndexOutOfRange`] for an unknown ordinal or
    /// a backend error when the value cannot be decoded.
    fn value(&self, ordinal: usize) -> Result<Value, StoreError>;

    /// Declared type of the column at `ordinal`, when known.
    fn column_type(&self, ordinal: usize) -> Option<FieldType> {
        let _ = ordinal;
        None
    }
}

/// [`RecordSource`] over a [`TabularReader`].
///
/// Tabular rows carry no geometry, so appending from a reader leaves the
/// destination shape unset unless a converter supplies it.
#[derive(Debug)]
pub struct ReaderSource<R> {
    reader: R,
    positioned: bool,
}

impl<R: TabularReader> ReaderSource<R> {
    /// Wrap a reader that has not been advanced yet.
    pub const fn new(reader: R) -> Self {
        Self {
            reader,
            positioned: false,
        }
    }

    /// Recover the wrapped reader.
    pub fn into_inner(self) -> R {
        self.reader
    }
}

impl<R: TabularReader> SourceRow for ReaderSource<R> {
    fn find_field(&self, name: &str) -> Option<usize> {
        self.reader.ordinal(name)
    }

    fn value(&self, index: usize) -> Result<Value, StoreError> {
        self.reader.value(index)
    }

    fn field_type(&self, index: usize) -> Option<FieldType> {
        self.reader.column_type(index)
    }

    fn geometry(&self) -> Option<Geometry<f64>> {
        None
    }
}

impl<R: TabularReader> RecordSource for ReaderSource<R> {
    fn advance(&mut self) -> Result<bool, StoreError> {
        self.positioned = self.reader.read()?;
        Ok(self.positioned)
    }

    fn current(&self) -> Option<&dyn SourceRow> {
        self.positioned.then_some(self as &dyn SourceRow)
    }
}

/// [`RecordSource`] over a slice of [`Record`]s, yielded in order.
#[derive(Debug, Clone)]
pub struct RecordListSource<'r> {
    records: std::slice::Iter<'r, Record>,
    current: Option<&'r Record>,
}

impl<'r> RecordListSource<'r> {
    /// Wrap `records`; the source starts before the first record.
    #[must_use]
    pub fn new(records: &'r [Record]) -> Self {
        Self {
            records: records.iter(),
            current: None,
        }
    }
}

impl RecordSource for RecordListSource<'_> {
    fn advance(&mut self) -> Result<bool, StoreError> {
        self.current = self.records.next();
        Ok(self.current.is_some())
    }

    fn current(&self) -> Option<&dyn SourceRow> {
        self.current.map(|record| record as &dyn SourceRow)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    fn record_list_yields_each_record_once() {
        let records: Vec<Record> = ["a", "b"]
            .into_iter()
            .map(|name| [("NAME", name)].into_iter().collect())
            .collect();
        let mut source = RecordListSource::new(&records);
        assert!(source.current().is_none());
        let mut names = Vec::new();
        while source.advance().expect("in-memory source") {
            let row = source.current().expect("positioned");
            names.push(row.value(0).expect("name"));
        }
        assert_eq!(names, vec![Value::from("a"), Value::from("b")]);
        assert!(source.current().is_none());
    }
}
