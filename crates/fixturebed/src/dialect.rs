//! SQL types and the dialect abstraction.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// SQL type of a mapped column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SqlType {
    Boolean,
    Int16,
    Int32,
    Int64,
    Single,
    Double,
    Decimal { precision: u8, scale: u8 },
    String,
    AnsiString,
    FixedString { length: u32 },
    DateTime,
    Date,
    Time,
    Guid,
    Binary,
    BinaryBlob,
    Xml,
}

impl SqlType {
    /// Large-binary types disqualify a class from second-level caching.
    pub fn is_lob(&self) -> bool {
        matches!(self, SqlType::BinaryBlob)
    }
}

impl fmt::Display for SqlType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SqlType::Boolean => write!(f, "boolean"),
            SqlType::Int16 => write!(f, "int16"),
            SqlType::Int32 => write!(f, "int32"),
            SqlType::Int64 => write!(f, "int64"),
            SqlType::Single => write!(f, "single"),
            SqlType::Double => write!(f, "double"),
            SqlType::Decimal { precision, scale } => write!(f, "decimal({}, {})", precision, scale),
            SqlType::String => write!(f, "string"),
            SqlType::AnsiString => write!(f, "ansi_string"),
            SqlType::FixedString { length } => write!(f, "fixed_string({})", length),
            SqlType::DateTime => write!(f, "date_time"),
            SqlType::Date => write!(f, "date"),
            SqlType::Time => write!(f, "time"),
            SqlType::Guid => write!(f, "guid"),
            SqlType::Binary => write!(f, "binary"),
            SqlType::BinaryBlob => write!(f, "binary_blob"),
            SqlType::Xml => write!(f, "xml"),
        }
    }
}

/// A database dialect: identifier plus SQL type naming.
pub trait Dialect: Send + Sync + fmt::Debug {
    /// Identifier used for applicability checks and capability lookup,
    /// e.g. `SqliteDialect`.
    fn name(&self) -> &str;

    /// Native type name for a SQL type. Errors when the dialect has none.
    fn type_name(&self, sql_type: &SqlType) -> Result<String>;
}
