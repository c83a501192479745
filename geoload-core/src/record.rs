//! Case-insensitive attribute bag used for composed rows.

use geo::Geometry;
use indexmap::IndexMap;
use thiserror::Error;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::{FieldType, SourceRow, StoreError, Value, normalize_field_name};

/// Errors raised by [`Record`] accessors.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RecordError {
    /// The record has no value under the requested name.
    #[error("record has no field named {field}")]
    MissingField {
        /// Name as requested by the caller.
        field: String,
    },
}

/// Ordered mapping from normalised field name to [`Value`].
///
/// Keys are folded to upper case on every access, so `"Name"`, `"NAME"` and
/// `"name"` address the same slot. The first assignment fixes a key's
/// position; later assignments overwrite the value in place.
///
/// # Examples
///
/// ```
/// use geoload_core::{Record, RecordError, Value};
///
/// let mut record = Record::new();
/// record.set("Name", "Ash Lane");
/// record.set("NAME", "Ash Road");
/// assert_eq!(record.len(), 1);
/// assert_eq!(record.get("name")?, &Value::from("Ash Road"));
/// assert!(matches!(record.get("width"), Err(RecordError::MissingField { .. })));
/// # Ok::<(), RecordError>(())
/// ```
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize), serde(transparent))]
pub struct Record {
    values: IndexMap<String, Value>,
}

impl Record {
    /// Create an empty record.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or overwrite the value stored under `name`.
    pub fn set(&mut self, name: &str, value: impl Into<Value>) {
        self.values.insert(normalize_field_name(name), value.into());
    }

    /// Value stored under `name`.
    ///
    /// # Errors
    ///
    /// Returns [`RecordError::MissingField`] when no value is stored under
    /// the normalised name.
    pub fn get(&self, name: &str) -> Result<&Value, RecordError> {
        self.values
            .get(&normalize_field_name(name))
            .ok_or_else(|| RecordError::MissingField {
                field: name.to_owned(),
            })
    }

    /// Whether a value is stored under `name`.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(&normalize_field_name(name))
    }

    /// Type of the value stored under `name`; `Ok(None)` for a null value.
    ///
    /// # Errors
    ///
    /// Returns [`RecordError::MissingField`] when the field is absent.
    pub fn field_type(&self, name: &str) -> Result<Option<FieldType>, RecordError> {
        self.get(name).map(Value::field_type)
    }

    /// Normalised names in insertion order.
    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    /// Number of fields.
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether the record has no fields.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Iterate over `(normalised name, value)` pairs in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Copy every field of `other` into `self`, overwriting shared names.
    pub fn extend_from(&mut self, other: &Self) {
        for (name, value) in &other.values {
            self.values.insert(name.clone(), value.clone());
        }
    }
}

/// Records feed the append pipeline as transfer objects. Field positions
/// follow insertion order and the geometry is the first geometry value held.
impl SourceRow for Record {
    fn find_field(&self, name: &str) -> Option<usize> {
        self.values.get_index_of(&normalize_field_name(name))
    }

    fn value(&self, index: usize) -> Result<Value, StoreError> {
        self.values
            .get_index(index)
            .map(|(_, value)| value.clone())
            .ok_or(StoreError::FieldIndexOutOfRange {
                index,
                len: self.values.len(),
            })
    }

    fn field_type(&self, index: usize) -> Option<FieldType> {
        self.values
            .get_index(index)
            .and_then(|(_, value)| value.field_type())
    }

    fn geometry(&self) -> Option<Geometry<f64>> {
        self.values.values().find_map(Value::as_geometry).cloned()
    }
}

impl<K, V> FromIterator<(K, V)> for Record
where
    K: AsRef<str>,
    V: Into<Value>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut record = Self::new();
        for (name, value) in iter {
            record.set(name.as_ref(), value);
        }
        record
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    fn first_assignment_fixes_position() {
        let mut record = Record::new();
        record.set("b", 1_i64);
        record.set("a", 2_i64);
        record.set("B", 3_i64);
        let names: Vec<_> = record.field_names().collect();
        assert_eq!(names, vec!["B", "A"]);
        assert_eq!(record.get("b"), Ok(&Value::Int(3)));
    }

    #[rstest]
    fn source_row_view_follows_insertion_order() {
        let shape = Geometry::Point(geo::Point::new(3.0, 4.0));
        let record: Record = [
            ("Name", Value::from("kiosk")),
            ("Shape", Value::Geometry(shape.clone())),
        ]
        .into_iter()
        .collect();
        let row: &dyn SourceRow = &record;
        assert_eq!(row.find_field("shape"), Some(1));
        assert_eq!(row.value(0).expect("name slot"), Value::from("kiosk"));
        assert_eq!(row.field_type(1), Some(FieldType::Geometry));
        assert_eq!(row.geometry(), Some(shape));
        assert!(matches!(
            row.value(2),
            Err(StoreError::FieldIndexOutOfRange { index: 2, len: 2 })
        ));
    }

    #[rstest]
    fn missing_field_names_the_requested_key() {
        let record = Record::new();
        assert_eq!(
            record.get("Width"),
            Err(RecordError::MissingField {
                field: "Width".into()
            })
        );
    }

    #[rstest]
    fn field_type_reflects_stored_value() {
        let record: Record = [("Lanes", Value::SmallInt(2)), ("Note", Value::Null)]
            .into_iter()
            .collect();
        assert_eq!(record.field_type("lanes"), Ok(Some(FieldType::SmallInt)));
        assert_eq!(record.field_type("note"), Ok(None));
        assert!(record.field_type("other").is_err());
    }

    #[rstest]
    fn extend_overwrites_shared_names() {
        let mut base: Record = [("ID", 1_i64)].into_iter().collect();
        let extra: Record = [("id", 5_i64), ("kind", 9_i64)].into_iter().collect();
        base.extend_from(&extra);
        assert_eq!(base.len(), 2);
        assert_eq!(base.get("ID"), Ok(&Value::Int(5)));
    }
}
