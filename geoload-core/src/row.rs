//! Rows read from datasets and buffers written to them.

use std::sync::Arc;

use geo::Geometry;

use crate::{FieldSet, FieldType, SchemaError, StoreError, Value};

/// Read access to the current row of any record source.
///
/// Converters and the copy step only ever see a source row through this
/// trait, so feature cursors and SQL result streams are interchangeable.
pub trait SourceRow {
    /// Position of the field called `name`, ignoring case.
    fn find_field(&self, name: &str) -> Option<usize>;

    /// Value at `index`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::FieldIndexOutOfRange`] for an unknown index or a
    /// backend error when the value cannot be decoded.
    fn value(&self, index: usize) -> Result<Value, StoreError>;

    /// Declared type of the field at `index`, when the source knows it.
    fn field_type(&self, index: usize) -> Option<FieldType>;

    /// Geometry of the row. Table rows have none.
    fn geometry(&self) -> Option<Geometry<f64>>;

    /// Object identifier, for sources that assign one.
    fn object_id(&self) -> Option<i64> {
        None
    }
}

/// One row yielded by a [`crate::Cursor`].
///
/// The row shares its dataset's [`FieldSet`]; `values` is aligned with it.
/// The geometry lives in the geometry field's slot and the object id in the
/// object-id field's slot, when the dataset has those fields.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    object_id: i64,
    fields: Arc<FieldSet>,
    values: Vec<Value>,
}

impl Row {
    /// Assemble a row, writing `object_id` into the object-id slot.
    ///
    /// # Errors
    ///
    /// Returns [`SchemaError::ValueCountMismatch`] when `values` is not
    /// aligned with `fields`.
    pub fn new(
        object_id: i64,
        fields: Arc<FieldSet>,
        mut values: Vec<Value>,
    ) -> Result<Self, SchemaError> {
        if values.len() != fields.len() {
            return Err(SchemaError::ValueCountMismatch {
                expected: fields.len(),
                actual: values.len(),
            });
        }
        if let Some(slot) = fields
            .position_of_type(FieldType::ObjectId)
            .and_then(|index| values.get_mut(index))
        {
            *slot = Value::Int(object_id);
        }
        Ok(Self {
            object_id,
            fields,
            values,
        })
    }

    /// Store-assigned identifier.
    #[must_use]
    pub const fn object_id(&self) -> i64 {
        self.object_id
    }

    /// Field metadata shared with the dataset.
    #[must_use]
    pub fn fields(&self) -> &Arc<FieldSet> {
        &self.fields
    }

    /// Values aligned with [`Row::fields`].
    #[must_use]
    pub fn values(&self) -> &[Value] {
        &self.values
    }

    /// Value of the field called `name`, ignoring case.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields.find(name).and_then(|index| self.values.get(index))
    }

    /// Borrow the geometry, if the dataset has a shape field and it is set.
    #[must_use]
    pub fn shape(&self) -> Option<&Geometry<f64>> {
        self.fields
            .position_of_type(FieldType::Geometry)
            .and_then(|index| self.values.get(index))
            .and_then(Value::as_geometry)
    }
}

impl SourceRow for Row {
    fn find_field(&self, name: &str) -> Option<usize> {
        self.fields.find(name)
    }

    fn value(&self, index: usize) -> Result<Value, StoreError> {
        self.values
            .get(index)
            .cloned()
            .ok_or(StoreError::FieldIndexOutOfRange {
                index,
                len: self.values.len(),
            })
    }

    fn field_type(&self, index: usize) -> Option<FieldType> {
        self.fields.get(index).map(|f| f.field_type)
    }

    fn geometry(&self) -> Option<Geometry<f64>> {
        self.shape().cloned()
    }

    fn object_id(&self) -> Option<i64> {
        Some(self.object_id)
    }
}

/// A destination row under construction.
///
/// Slots start at each field's default value, or `Null` when none is
/// declared.
#[derive(Debug, Clone, PartialEq)]
pub struct RowBuffer {
    fields: Arc<FieldSet>,
    values: Vec<Value>,
}

impl RowBuffer {
    /// Allocate a buffer for `fields`.
    #[must_use]
    pub fn new(fields: Arc<FieldSet>) -> Self {
        let values = fields
            .iter()
            .map(|f| f.default_value.clone().unwrap_or_default())
            .collect();
        Self { fields, values }
    }

    /// Field metadata the buffer was allocated for.
    #[must_use]
    pub fn fields(&self) -> &Arc<FieldSet> {
        &self.fields
    }

    /// Overwrite the slot at `index`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::FieldIndexOutOfRange`] for an unknown index.
    pub fn set_value(&mut self, index: usize, value: Value) -> Result<(), StoreError> {
        let len = self.values.len();
        let slot = self
            .values
            .get_mut(index)
            .ok_or(StoreError::FieldIndexOutOfRange { index, len })?;
        *slot = value;
        Ok(())
    }

    /// Value at `index`.
    #[must_use]
    pub fn value(&self, index: usize) -> Option<&Value> {
        self.values.get(index)
    }

    /// Value of the field called `name`, ignoring case.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields.find(name).and_then(|index| self.values.get(index))
    }

    /// Set or clear the geometry. Buffers without a shape field ignore it.
    pub fn set_geometry(&mut self, geometry: Option<Geometry<f64>>) {
        if let Some(slot) = self
            .fields
            .position_of_type(FieldType::Geometry)
            .and_then(|index| self.values.get_mut(index))
        {
            *slot = geometry.map_or(Value::Null, Value::Geometry);
        }
    }

    /// Borrow the geometry slot's content.
    #[must_use]
    pub fn geometry(&self) -> Option<&Geometry<f64>> {
        self.fields
            .position_of_type(FieldType::Geometry)
            .and_then(|index| self.values.get(index))
            .and_then(Value::as_geometry)
    }

    /// Values aligned with [`RowBuffer::fields`].
    #[must_use]
    pub fn values(&self) -> &[Value] {
        &self.values
    }

    /// Consume the buffer, returning its values.
    #[must_use]
    pub fn into_values(self) -> Vec<Value> {
        self.values
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::FieldDescriptor;
    use geo::point;
    use rstest::{fixture, rstest};

    #[fixture]
    fn fields() -> Arc<FieldSet> {
        Arc::new(
            FieldSet::new(vec![
                FieldDescriptor::new("OBJECTID", FieldType::ObjectId),
                FieldDescriptor::new("STATUS", FieldType::String).with_default("open"),
                FieldDescriptor::new("SHAPE", FieldType::Geometry),
            ])
            .expect("valid fields"),
        )
    }

    #[rstest]
    fn row_writes_object_id_slot(fields: Arc<FieldSet>) {
        let row = Row::new(9, fields, vec![Value::Null; 3]).expect("aligned row");
        assert_eq!(row.get("objectid"), Some(&Value::Int(9)));
        assert_eq!(SourceRow::object_id(&row), Some(9));
    }

    #[rstest]
    fn row_rejects_misaligned_values(fields: Arc<FieldSet>) {
        let err = Row::new(1, fields, vec![Value::Null]).expect_err("misaligned");
        assert_eq!(
            err,
            SchemaError::ValueCountMismatch {
                expected: 3,
                actual: 1
            }
        );
    }

    #[rstest]
    fn buffer_starts_from_defaults(fields: Arc<FieldSet>) {
        let buffer = RowBuffer::new(fields);
        assert_eq!(buffer.get("status"), Some(&Value::from("open")));
        assert_eq!(buffer.value(0), Some(&Value::Null));
    }

    #[rstest]
    fn buffer_geometry_lives_in_shape_slot(fields: Arc<FieldSet>) {
        let mut buffer = RowBuffer::new(fields);
        buffer.set_geometry(Some(Geometry::Point(point! { x: 1.0, y: 1.0 })));
        assert!(matches!(buffer.value(2), Some(Value::Geometry(_))));
        buffer.set_geometry(None);
        assert!(buffer.geometry().is_none());
    }

    #[rstest]
    fn buffer_rejects_unknown_index(fields: Arc<FieldSet>) {
        let mut buffer = RowBuffer::new(fields);
        let err = buffer.set_value(7, Value::Null).expect_err("out of range");
        assert!(matches!(
            err,
            StoreError::FieldIndexOutOfRange { index: 7, len: 3 }
        ));
    }
}
