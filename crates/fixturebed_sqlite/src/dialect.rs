//! The SQLite dialect and its test capabilities.

use std::sync::Arc;

use fixturebed::{CapabilityFlags, CapabilityRegistry, Dialect, DialectCapabilities, HarnessError, SqlType};

/// Identifier of [`SqliteDialect`].
pub const SQLITE_DIALECT: &str = "SqliteDialect";

/// SQLite type naming. Types map onto SQLite's storage affinities.
#[derive(Debug, Clone, Copy, Default)]
pub struct SqliteDialect;

impl Dialect for SqliteDialect {
    fn name(&self) -> &str {
        SQLITE_DIALECT
    }

    fn type_name(&self, sql_type: &SqlType) -> fixturebed::Result<String> {
        let name = match sql_type {
            SqlType::Boolean => "BOOLEAN".to_string(),
            SqlType::Int16 | SqlType::Int32 | SqlType::Int64 => "INTEGER".to_string(),
            SqlType::Single | SqlType::Double => "REAL".to_string(),
            SqlType::Decimal { precision, scale } => format!("NUMERIC({}, {})", precision, scale),
            SqlType::String | SqlType::AnsiString => "TEXT".to_string(),
            SqlType::FixedString { length } => format!("CHAR({})", length),
            SqlType::DateTime => "DATETIME".to_string(),
            SqlType::Date => "DATE".to_string(),
            SqlType::Time => "TIME".to_string(),
            SqlType::Guid => "UNIQUEIDENTIFIER".to_string(),
            SqlType::Binary | SqlType::BinaryBlob => "BLOB".to_string(),
            SqlType::Xml => {
                return Err(HarnessError::UnsupportedSqlType {
                    dialect: SQLITE_DIALECT.to_string(),
                    sql_type: *sql_type,
                })
            }
        };
        Ok(name)
    }
}

/// Test capabilities of SQLite.
///
/// The database is locked by the first writer, decimals are stored as
/// floating point, and there is no transaction coordinator.
pub fn sqlite_capabilities(dialect: Arc<dyn Dialect>) -> DialectCapabilities {
    DialectCapabilities::with_flags(
        dialect,
        CapabilityFlags {
            has_broken_decimal_type: true,
            supports_concurrent_transactions: false,
            supports_distributed_transactions: false,
            supports_full_join: false,
            supports_operator_all: false,
            supports_operator_some: false,
            supports_select_for_update_on_outer_join: false,
            ..CapabilityFlags::default()
        },
    )
}

/// Capability registry with the SQLite override registered.
pub fn capability_registry() -> CapabilityRegistry {
    let mut registry = CapabilityRegistry::new();
    registry.register(SQLITE_DIALECT, sqlite_capabilities);
    registry
}
