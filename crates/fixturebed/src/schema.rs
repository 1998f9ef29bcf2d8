//! Schema export.

/// Creates and drops the tables of a configuration.
///
/// Both operations must tolerate being repeated: the cleanliness check drops
/// and recreates the schema whenever a test leaves rows behind.
pub trait SchemaExporter {
    /// Create all tables. `show_output` logs the DDL, `execute` runs it.
    fn create_schema(&self, show_output: bool, execute: bool) -> crate::Result<()>;

    /// Drop all tables. `show_output` logs the DDL, `execute` runs it.
    fn drop_schema(&self, show_output: bool, execute: bool) -> crate::Result<()>;
}
