//! Column definitions.

use crate::types::DataType;
use crate::value::Value;

/// One column of a table.
///
/// `Bytes` columns start out nullable; every other type starts `NOT NULL`.
/// A column without a declared default fills new cells with NULL when it is
/// nullable and with [`Value::zero`] otherwise.
#[derive(Clone, Debug, PartialEq)]
pub struct Column {
    name: String,
    data_type: DataType,
    nullable: bool,
    default_value: Option<Value>,
    position: usize,
}

impl Column {
    pub fn new(name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            name: name.into(),
            data_type,
            nullable: data_type == DataType::Bytes,
            default_value: None,
            position: 0,
        }
    }

    pub fn nullable(mut self, nullable: bool) -> Self {
        self.nullable = nullable;
        self
    }

    pub fn default_value(mut self, value: Value) -> Self {
        self.default_value = Some(value);
        self
    }

    pub(crate) fn at_position(mut self, position: usize) -> Self {
        self.position = position;
        self
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn data_type(&self) -> DataType {
        self.data_type
    }

    #[inline]
    pub fn is_nullable(&self) -> bool {
        self.nullable
    }

    /// The explicit default, if one was declared.
    pub fn declared_default(&self) -> Option<&Value> {
        self.default_value.as_ref()
    }

    /// Value given to this column's cells when none is supplied, for example
    /// when `alter_table` adds the column to existing rows.
    pub fn get_default_value(&self) -> Value {
        match &self.default_value {
            Some(value) => value.clone(),
            None if self.nullable => Value::Null,
            None => Value::zero(self.data_type),
        }
    }

    /// Zero-based position of the column in its table.
    #[inline]
    pub fn position(&self) -> usize {
        self.position
    }
}
