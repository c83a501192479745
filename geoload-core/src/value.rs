//! Dynamically typed attribute values.
//!
//! Rows, records and converters exchange attributes as [`Value`]s. The
//! variants mirror the field types a feature/table store can describe, with
//! [`Value::Null`] standing in for unset or absent data.

use chrono::NaiveDateTime;
use geo::Geometry;
use uuid::Uuid;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::field::FieldType;

/// A single attribute value.
///
/// # Examples
///
/// ```
/// use geoload_core::{FieldType, Value};
///
/// let value = Value::from("Main Street");
/// assert_eq!(value.as_str(), Some("Main Street"));
/// assert_eq!(value.field_type(), Some(FieldType::String));
/// assert!(Value::Null.is_null());
/// ```
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Value {
    /// Absent or unset value.
    #[default]
    Null,
    /// 16-bit signed integer.
    SmallInt(i16),
    /// 64-bit signed integer. Object identifiers use this variant.
    Int(i64),
    /// Single-precision float.
    Float(f32),
    /// Double-precision float.
    Double(f64),
    /// UTF-8 text.
    String(String),
    /// Timestamp without a zone.
    Date(NaiveDateTime),
    /// Globally unique identifier.
    Guid(Uuid),
    /// Geometry in the dataset's coordinate space.
    Geometry(Geometry<f64>),
    /// Opaque binary payload.
    Blob(Vec<u8>),
}

impl Value {
    /// Return `true` when the value is [`Value::Null`].
    #[must_use]
    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// The field type this value naturally maps to, or `None` for `Null`.
    #[must_use]
    pub const fn field_type(&self) -> Option<FieldType> {
        match self {
            Self::Null => None,
            Self::SmallInt(_) => Some(FieldType::SmallInt),
            Self::Int(_) => Some(FieldType::Int),
            Self::Float(_) => Some(FieldType::Float),
            Self::Double(_) => Some(FieldType::Double),
            Self::String(_) => Some(FieldType::String),
            Self::Date(_) => Some(FieldType::Date),
            Self::Guid(_) => Some(FieldType::Guid),
            Self::Geometry(_) => Some(FieldType::Geometry),
            Self::Blob(_) => Some(FieldType::Blob),
        }
    }

    /// Integer view of the value, widening small integers.
    #[must_use]
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::SmallInt(v) => Some(i64::from(*v)),
            Self::Int(v) => Some(*v),
            _ => None,
        }
    }

    /// Floating-point view of the value, widening single precision.
    #[must_use]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Float(v) => Some(f64::from(*v)),
            Self::Double(v) => Some(*v),
            _ => None,
        }
    }

    /// Borrow the text of a [`Value::String`].
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(v) => Some(v),
            _ => None,
        }
    }

    /// Borrow the geometry of a [`Value::Geometry`].
    #[must_use]
    pub const fn as_geometry(&self) -> Option<&Geometry<f64>> {
        match self {
            Self::Geometry(v) => Some(v),
            _ => None,
        }
    }

    /// Return the identifier of a [`Value::Guid`].
    #[must_use]
    pub const fn as_guid(&self) -> Option<Uuid> {
        match self {
            Self::Guid(v) => Some(*v),
            _ => None,
        }
    }

    /// Braced, upper-case text form of a GUID value.
    ///
    /// ```
    /// use geoload_core::Value;
    /// use uuid::Uuid;
    ///
    /// let id = Uuid::parse_str("b5a586c8-a22b-4e04-8f75-bb43a97c0551").unwrap();
    /// assert_eq!(
    ///     Value::Guid(id).guid_string().as_deref(),
    ///     Some("{B5A586C8-A22B-4E04-8F75-BB43A97C0551}"),
    /// );
    /// ```
    #[must_use]
    pub fn guid_string(&self) -> Option<String> {
        self.as_guid().map(braced_upper)
    }
}

/// Render a GUID as `{XXXXXXXX-XXXX-XXXX-XXXX-XXXXXXXXXXXX}`.
#[must_use]
pub fn braced_upper(id: Uuid) -> String {
    format!("{{{}}}", id.hyphenated()).to_uppercase()
}

impl From<i16> for Value {
    fn from(value: i16) -> Self {
        Self::SmallInt(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Self::Int(i64::from(value))
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<f32> for Value {
    fn from(value: f32) -> Self {
        Self::Float(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Self::Double(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Self::String(value.to_owned())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<NaiveDateTime> for Value {
    fn from(value: NaiveDateTime) -> Self {
        Self::Date(value)
    }
}

impl From<Uuid> for Value {
    fn from(value: Uuid) -> Self {
        Self::Guid(value)
    }
}

impl From<Geometry<f64>> for Value {
    fn from(value: Geometry<f64>) -> Self {
        Self::Geometry(value)
    }
}

impl<T: Into<Self>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::Null, Into::into)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::point;
    use rstest::rstest;

    #[rstest]
    #[case(Value::SmallInt(7), Some(7))]
    #[case(Value::Int(-3), Some(-3))]
    #[case(Value::Double(1.0), None)]
    #[case(Value::Null, None)]
    fn integer_view_widens_small_ints(#[case] value: Value, #[case] expected: Option<i64>) {
        assert_eq!(value.as_i64(), expected);
    }

    #[rstest]
    fn guid_renders_braced_upper_case() {
        let id = Uuid::parse_str("0f8fad5b-d9cb-469f-a165-70867728950e").expect("valid uuid");
        assert_eq!(braced_upper(id), "{0F8FAD5B-D9CB-469F-A165-70867728950E}");
    }

    #[rstest]
    fn optional_values_map_none_to_null() {
        assert_eq!(Value::from(None::<i64>), Value::Null);
        assert_eq!(Value::from(Some("x")), Value::String("x".into()));
    }

    #[rstest]
    fn geometry_values_report_geometry_type() {
        let value = Value::from(Geometry::Point(point! { x: 1.0, y: 2.0 }));
        assert_eq!(value.field_type(), Some(FieldType::Geometry));
        assert!(value.as_geometry().is_some());
    }
}
