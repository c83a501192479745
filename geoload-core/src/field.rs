//! Field metadata: type tags, descriptors and ordered field sets.
//!
//! Field names are compared case-insensitively everywhere. The canonical form
//! is produced by [`normalize_field_name`] and is what [`crate::Record`] keys
//! and converter registrations are stored under.

use std::{fmt, str::FromStr};

use thiserror::Error;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::Value;

/// Fold a field name to its canonical, upper-case form.
///
/// ```
/// assert_eq!(geoload_core::normalize_field_name("Road_Name"), "ROAD_NAME");
/// ```
#[must_use]
pub fn normalize_field_name(name: &str) -> String {
    name.trim().to_uppercase()
}

/// Compare two field names ignoring case.
#[must_use]
pub fn field_names_match(left: &str, right: &str) -> bool {
    normalize_field_name(left) == normalize_field_name(right)
}

/// Type tag describing the values a field holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum FieldType {
    /// Store-maintained object identifier.
    ObjectId,
    /// 16-bit integer.
    SmallInt,
    /// Integer.
    Int,
    /// Single-precision float.
    Float,
    /// Double-precision float.
    Double,
    /// Text.
    String,
    /// Date and time.
    Date,
    /// Caller-assigned GUID.
    Guid,
    /// Store-assigned GUID.
    GlobalId,
    /// Shape column.
    Geometry,
    /// Binary payload.
    Blob,
    /// Raster payload.
    Raster,
}

impl FieldType {
    /// Canonical keyword for the type, as accepted by [`FieldType::from_str`].
    #[must_use]
    pub const fn keyword(self) -> &'static str {
        match self {
            Self::ObjectId => "OID",
            Self::SmallInt => "SHORT",
            Self::Int => "LONG",
            Self::Float => "FLOAT",
            Self::Double => "DOUBLE",
            Self::String => "TEXT",
            Self::Date => "DATE",
            Self::Guid => "GUID",
            Self::GlobalId => "GLOBALID",
            Self::Geometry => "GEOMETRY",
            Self::Blob => "BLOB",
            Self::Raster => "RASTER",
        }
    }

    /// Whether values of this type hold a GUID.
    #[must_use]
    pub const fn is_guid(self) -> bool {
        matches!(self, Self::Guid | Self::GlobalId)
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.keyword())
    }
}

impl FromStr for FieldType {
    type Err = SchemaError;

    fn from_str(keyword: &str) -> Result<Self, Self::Err> {
        match normalize_field_name(keyword).as_str() {
            "OID" | "OBJECTID" => Ok(Self::ObjectId),
            "SHORT" | "SMALLINT" => Ok(Self::SmallInt),
            "INT" | "LONG" | "INTEGER" => Ok(Self::Int),
            "FLOAT" | "SINGLE" => Ok(Self::Float),
            "DOUBLE" => Ok(Self::Double),
            "TEXT" | "STRING" => Ok(Self::String),
            "DATE" | "DATETIME" => Ok(Self::Date),
            "GUID" => Ok(Self::Guid),
            "GLOBALID" => Ok(Self::GlobalId),
            "GEOMETRY" => Ok(Self::Geometry),
            "BLOB" => Ok(Self::Blob),
            "RASTER" => Ok(Self::Raster),
            _ => Err(SchemaError::UnknownFieldType {
                keyword: keyword.to_owned(),
            }),
        }
    }
}

/// Errors raised while building field metadata.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SchemaError {
    /// Two descriptors share a name once case is ignored.
    #[error("field {field} is defined more than once")]
    DuplicateField {
        /// Name of the repeated field.
        field: String,
    },
    /// A descriptor had an empty name.
    #[error("field at position {position} has an empty name")]
    EmptyFieldName {
        /// Zero-based position of the offending descriptor.
        position: usize,
    },
    /// A type keyword was not recognised.
    #[error("unknown field type keyword {keyword:?}")]
    UnknownFieldType {
        /// Keyword as supplied by the caller.
        keyword: String,
    },
    /// A row carried a different number of values than its field set.
    #[error("expected {expected} values but found {actual}")]
    ValueCountMismatch {
        /// Number of fields in the set.
        expected: usize,
        /// Number of values supplied.
        actual: usize,
    },
}

/// Metadata for one field of a dataset.
///
/// ```
/// use geoload_core::{FieldDescriptor, FieldType};
///
/// let name = FieldDescriptor::new("NAME", FieldType::String).with_width(64);
/// assert!(name.editable);
/// assert!(!FieldDescriptor::new("OBJECTID", FieldType::ObjectId).editable);
/// ```
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct FieldDescriptor {
    /// Field name as stored by the dataset.
    pub name: String,
    /// Type tag.
    pub field_type: FieldType,
    /// Maximum length for text fields.
    pub width: Option<u32>,
    /// Numeric precision.
    pub precision: Option<u32>,
    /// Whether the field accepts nulls.
    pub nullable: bool,
    /// Whether callers may write the field. Object-id and global-id fields
    /// are store-maintained and start out read-only.
    pub editable: bool,
    /// Value new rows start with.
    pub default_value: Option<Value>,
    /// Whether the field is part of the primary key.
    pub is_primary_key: bool,
}

impl FieldDescriptor {
    /// Describe a nullable field with no width, precision or default.
    pub fn new(name: impl Into<String>, field_type: FieldType) -> Self {
        let store_maintained = matches!(field_type, FieldType::ObjectId | FieldType::GlobalId);
        Self {
            name: name.into(),
            field_type,
            width: None,
            precision: None,
            nullable: !matches!(field_type, FieldType::ObjectId),
            editable: !store_maintained,
            default_value: None,
            is_primary_key: matches!(field_type, FieldType::ObjectId),
        }
    }

    /// Set the maximum width.
    #[must_use]
    pub const fn with_width(mut self, width: u32) -> Self {
        self.width = Some(width);
        self
    }

    /// Set the numeric precision.
    #[must_use]
    pub const fn with_precision(mut self, precision: u32) -> Self {
        self.precision = Some(precision);
        self
    }

    /// Set the default value.
    #[must_use]
    pub fn with_default(mut self, value: impl Into<Value>) -> Self {
        self.default_value = Some(value.into());
        self
    }

    /// Mark the field as rejecting nulls.
    #[must_use]
    pub const fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    /// Mark the field as read-only.
    #[must_use]
    pub const fn read_only(mut self) -> Self {
        self.editable = false;
        self
    }

    /// Mark the field as part of the primary key.
    #[must_use]
    pub const fn primary_key(mut self) -> Self {
        self.is_primary_key = true;
        self
    }

    /// The canonical form of [`FieldDescriptor::name`].
    #[must_use]
    pub fn normalized_name(&self) -> String {
        normalize_field_name(&self.name)
    }
}

/// Ordered, name-unique collection of field descriptors.
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize))]
pub struct FieldSet {
    fields: Vec<FieldDescriptor>,
}

impl FieldSet {
    /// Build a field set, rejecting empty and duplicate names.
    ///
    /// # Errors
    ///
    /// Returns [`SchemaError::EmptyFieldName`] or [`SchemaError::DuplicateField`].
    pub fn new(fields: Vec<FieldDescriptor>) -> Result<Self, SchemaError> {
        let mut seen = std::collections::HashSet::with_capacity(fields.len());
        for (position, field) in fields.iter().enumerate() {
            let key = field.normalized_name();
            if key.is_empty() {
                return Err(SchemaError::EmptyFieldName { position });
            }
            if !seen.insert(key) {
                return Err(SchemaError::DuplicateField {
                    field: field.name.clone(),
                });
            }
        }
        Ok(Self { fields })
    }

    /// Number of fields.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.fields.len()
    }

    /// Whether the set has no fields.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Descriptor at `index`.
    #[must_use]
    pub fn get(&self, index: usize) -> Option<&FieldDescriptor> {
        self.fields.get(index)
    }

    /// Iterate over descriptors in order.
    pub fn iter(&self) -> std::slice::Iter<'_, FieldDescriptor> {
        self.fields.iter()
    }

    /// Position of the field called `name`, ignoring case.
    #[must_use]
    pub fn find(&self, name: &str) -> Option<usize> {
        let key = normalize_field_name(name);
        self.fields.iter().position(|f| f.normalized_name() == key)
    }

    /// Descriptor of the field called `name`, ignoring case.
    #[must_use]
    pub fn field(&self, name: &str) -> Option<&FieldDescriptor> {
        self.find(name).and_then(|index| self.fields.get(index))
    }

    /// Position of the first field of `field_type`.
    #[must_use]
    pub fn position_of_type(&self, field_type: FieldType) -> Option<usize> {
        self.fields.iter().position(|f| f.field_type == field_type)
    }

    /// The store-maintained object-id field, if any.
    #[must_use]
    pub fn object_id_field(&self) -> Option<&FieldDescriptor> {
        self.position_of_type(FieldType::ObjectId)
            .and_then(|index| self.fields.get(index))
    }

    /// The shape field, if any. Tables have none.
    #[must_use]
    pub fn geometry_field(&self) -> Option<&FieldDescriptor> {
        self.position_of_type(FieldType::Geometry)
            .and_then(|index| self.fields.get(index))
    }

    /// Field names in order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|f| f.name.as_str())
    }
}

impl<'a> IntoIterator for &'a FieldSet {
    type Item = &'a FieldDescriptor;
    type IntoIter = std::slice::Iter<'a, FieldDescriptor>;

    fn into_iter(self) -> Self::IntoIter {
        self.fields.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("text", FieldType::String)]
    #[case("String", FieldType::String)]
    #[case("SHORT", FieldType::SmallInt)]
    #[case("long", FieldType::Int)]
    #[case("int", FieldType::Int)]
    #[case("single", FieldType::Float)]
    #[case("DateTime", FieldType::Date)]
    #[case("GlobalID", FieldType::GlobalId)]
    #[case("geometry", FieldType::Geometry)]
    #[case("raster", FieldType::Raster)]
    fn parses_type_keywords(#[case] keyword: &str, #[case] expected: FieldType) {
        assert_eq!(keyword.parse::<FieldType>(), Ok(expected));
    }

    #[rstest]
    fn rejects_unknown_keyword() {
        let err = "polygon".parse::<FieldType>().expect_err("unknown keyword");
        assert!(matches!(err, SchemaError::UnknownFieldType { .. }));
    }

    #[rstest]
    fn field_set_rejects_names_that_differ_only_in_case() {
        let result = FieldSet::new(vec![
            FieldDescriptor::new("Name", FieldType::String),
            FieldDescriptor::new("NAME", FieldType::String),
        ]);
        assert_eq!(
            result,
            Err(SchemaError::DuplicateField {
                field: "NAME".into()
            })
        );
    }

    #[rstest]
    fn field_set_rejects_blank_names() {
        let result = FieldSet::new(vec![FieldDescriptor::new("  ", FieldType::Int)]);
        assert_eq!(result, Err(SchemaError::EmptyFieldName { position: 0 }));
    }

    #[rstest]
    fn find_ignores_case() {
        let fields = FieldSet::new(vec![
            FieldDescriptor::new("OBJECTID", FieldType::ObjectId),
            FieldDescriptor::new("Road_Name", FieldType::String),
            FieldDescriptor::new("Shape", FieldType::Geometry),
        ])
        .expect("valid field set");
        assert_eq!(fields.find("road_name"), Some(1));
        assert_eq!(fields.find("missing"), None);
        assert_eq!(
            fields.object_id_field().map(|f| f.name.as_str()),
            Some("OBJECTID")
        );
        assert_eq!(
            fields.geometry_field().map(|f| f.name.as_str()),
            Some("Shape")
        );
    }
}
