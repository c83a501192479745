//! Per-field value converters and the skip-field set.
//!
//! Both collections normalise names once, when an entry is added, and fold
//! lookup keys the same way, so callers may use any casing.

use std::{
    collections::{BTreeSet, HashMap},
    fmt,
};

use thiserror::Error;

use crate::{SourceRow, StoreError, Value, normalize_field_name};

/// Errors a converter may report.
#[derive(Debug, Error)]
pub enum ConvertError {
    /// Reading from the source row failed.
    #[error(transparent)]
    Source(#[from] StoreError),
    /// The converter needed a source field that the row does not have.
    #[error("source row has no field named {field}")]
    MissingSourceField {
        /// Name the converter looked for.
        field: String,
    },
    /// The source value could not be turned into the destination value.
    #[error("cannot convert value for {field}: {message}")]
    InvalidValue {
        /// Destination field being produced.
        field: String,
        /// Human-readable reason.
        message: String,
    },
}

/// Produces the value of one destination field from a source row.
///
/// `source_index` is the position of the same-named field in the source row,
/// or `None` when the source has no such field. Closures with the matching
/// signature implement the trait.
pub trait FieldConverter {
    /// Compute the destination value.
    ///
    /// # Errors
    ///
    /// Returns a [`ConvertError`] when the value cannot be produced; the
    /// append run aborts with it.
    fn convert(
        &self,
        source: &dyn SourceRow,
        source_index: Option<usize>,
    ) -> Result<Value, ConvertError>;
}

impl<F> FieldConverter for F
where
    F: Fn(&dyn SourceRow, Option<usize>) -> Result<Value, ConvertError>,
{
    fn convert(
        &self,
        source: &dyn SourceRow,
        source_index: Option<usize>,
    ) -> Result<Value, ConvertError> {
        self(source, source_index)
    }
}

/// Converters keyed by normalised destination field name.
///
/// # Examples
///
/// ```
/// use geoload_core::{FieldConverterRegistry, Value, convert::constant};
///
/// let mut registry = FieldConverterRegistry::new();
/// registry.register("Name", constant(Value::from("first")));
/// registry.register("NAME", constant(Value::from("second")));
/// assert_eq!(registry.len(), 1);
/// assert!(registry.resolve("name").is_some());
/// ```
#[derive(Default)]
pub struct FieldConverterRegistry<'a> {
    converters: HashMap<String, Box<dyn FieldConverter + 'a>>,
}

impl<'a> FieldConverterRegistry<'a> {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `converter` for `field`, replacing any converter registered
    /// under the same name in any casing.
    pub fn register(&mut self, field: &str, converter: impl FieldConverter + 'a) {
        self.converters
            .insert(normalize_field_name(field), Box::new(converter));
    }

    /// Converter registered for `field`, ignoring case.
    #[must_use]
    pub fn resolve(&self, field: &str) -> Option<&(dyn FieldConverter + 'a)> {
        self.converters
            .get(&normalize_field_name(field))
            .map(AsRef::as_ref)
    }

    /// Number of registered converters.
    #[must_use]
    pub fn len(&self) -> usize {
        self.converters.len()
    }

    /// Whether no converter is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.converters.is_empty()
    }
}

impl fmt::Debug for FieldConverterRegistry<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<_> = self.converters.keys().collect();
        names.sort_unstable();
        f.debug_struct("FieldConverterRegistry")
            .field("fields", &names)
            .finish()
    }
}

/// Normalised names of destination fields the copy step never writes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SkipFields {
    names: BTreeSet<String>,
}

impl SkipFields {
    /// Create an empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `field`; returns `false` if it was already present in any casing.
    pub fn insert(&mut self, field: &str) -> bool {
        self.names.insert(normalize_field_name(field))
    }

    /// Whether `field` is skipped, ignoring case.
    #[must_use]
    pub fn contains(&self, field: &str) -> bool {
        self.names.contains(&normalize_field_name(field))
    }

    /// Number of skipped fields.
    #[must_use]
    pub fn len(&self) -> usize {
        self.names.len()
    }

    /// Whether no field is skipped.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Normalised names in sorted order.
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.names.iter().map(String::as_str)
    }
}

impl<S: AsRef<str>> FromIterator<S> for SkipFields {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        let mut set = Self::new();
        for name in iter {
            set.insert(name.as_ref());
        }
        set
    }
}

impl<S: AsRef<str>> Extend<S> for SkipFields {
    fn extend<I: IntoIterator<Item = S>>(&mut self, iter: I) {
        for name in iter {
            self.insert(name.as_ref());
        }
    }
}

/// Converter that copies the value of a differently named source field.
///
/// ```
/// use geoload_core::{FieldConverterRegistry, convert::copy_from};
///
/// let mut registry = FieldConverterRegistry::new();
/// registry.register("STREET", copy_from("ROAD_NAME"));
/// assert!(registry.resolve("street").is_some());
/// ```
pub fn copy_from(
    source_field: &str,
) -> impl Fn(&dyn SourceRow, Option<usize>) -> Result<Value, ConvertError> + use<> {
    let name = source_field.to_owned();
    move |row: &dyn SourceRow, _: Option<usize>| {
        let index = row
            .find_field(&name)
            .ok_or_else(|| ConvertError::MissingSourceField {
                field: name.clone(),
            })?;
        Ok(row.value(index)?)
    }
}

/// Converter that always yields `value`.
pub fn constant(
    value: Value,
) -> impl Fn(&dyn SourceRow, Option<usize>) -> Result<Value, ConvertError> {
    move |_: &dyn SourceRow, _: Option<usize>| Ok(value.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{FieldDescriptor, FieldSet, FieldType, Row};
    use rstest::{fixture, rstest};
    use std::sync::Arc;

    #[fixture]
    fn row() -> Row {
        let fields = FieldSet::new(vec![
            FieldDescriptor::new("OBJECTID", FieldType::ObjectId),
            FieldDescriptor::new("ROAD_NAME", FieldType::String),
        ])
        .expect("valid fields");
        Row::new(4, Arc::new(fields), vec![Value::Null, Value::from("Kirkgate")])
            .expect("aligned row")
    }

    #[rstest]
    fn re_registering_overwrites(row: Row) {
        let mut registry = FieldConverterRegistry::new();
        registry.register("Label", constant(Value::from("old")));
        registry.register("LABEL", constant(Value::from("new")));
        assert_eq!(registry.len(), 1);
        let converter = registry.resolve("label").expect("registered");
        let value = converter.convert(&row, None).expect("converted");
        assert_eq!(value, Value::from("new"));
    }

    #[rstest]
    fn copy_from_reads_named_field(row: Row) {
        let converter = copy_from("road_name");
        assert_eq!(converter(&row, None).expect("copied"), Value::from("Kirkgate"));
    }

    #[rstest]
    fn copy_from_reports_missing_field(row: Row) {
        let converter = copy_from("width");
        let err = converter(&row, None).expect_err("missing");
        assert!(matches!(err, ConvertError::MissingSourceField { ref field } if field == "width"));
    }

    #[rstest]
    fn skip_fields_fold_case() {
        let mut skip: SkipFields = ["Shape"].into_iter().collect();
        assert!(!skip.insert("SHAPE"));
        assert!(skip.contains("shape"));
        assert_eq!(skip.iter().collect::<Vec<_>>(), vec!["SHAPE"]);
    }
}
