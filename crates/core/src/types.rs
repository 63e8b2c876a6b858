//! Data type definitions for Keel.
//!
//! This module defines the supported data types that can be stored in a cell.

/// Supported cell data types.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DataType {
    /// Boolean type (true/false)
    Boolean,
    /// 32-bit signed integer
    Int32,
    /// 64-bit signed integer
    Int64,
    /// 64-bit floating point number
    Float64,
    /// UTF-8 string
    String,
    /// Date and time stored as Unix timestamp (milliseconds)
    DateTime,
    /// Binary data
    Bytes,
}

impl DataType {
    /// Returns the stable on-disk tag of this type.
    pub fn tag(&self) -> u8 {
        match self {
            DataType::Boolean => 1,
            DataType::Int32 => 2,
            DataType::Int64 => 3,
            DataType::Float64 => 4,
            DataType::String => 5,
            DataType::DateTime => 6,
            DataType::Bytes => 7,
        }
    }

    /// Resolves an on-disk tag.
    pub fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            1 => Some(DataType::Boolean),
            2 => Some(DataType::Int32),
            3 => Some(DataType::Int64),
            4 => Some(DataType::Float64),
            5 => Some(DataType::String),
            6 => Some(DataType::DateTime),
            7 => Some(DataType::Bytes),
            _ => None,
        }
    }

    /// Returns whether a value of type `other` may be stored in a column of this type.
    pub fn accepts(&self, other: DataType) -> bool {
        *self == other || matches!((self, other), (DataType::Int64, DataType::Int32))
    }
}
