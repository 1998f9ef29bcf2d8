//! Table-per-class schema export.

use std::sync::Arc;

use fixturebed::{ClassMapping, ConnectionProvider, Dialect, HarnessError, SchemaExporter};
use tracing::{debug, info};

/// Creates one table per mapped class: an autoincrement id column followed by
/// the property columns.
pub struct SqliteSchemaExporter {
    provider: Arc<dyn ConnectionProvider>,
    dialect: Arc<dyn Dialect>,
    classes: Vec<ClassMapping>,
}

impl SqliteSchemaExporter {
    pub fn new(
        provider: Arc<dyn ConnectionProvider>,
        dialect: Arc<dyn Dialect>,
        classes: Vec<ClassMapping>,
    ) -> Self {
        Self {
            provider,
            dialect,
            classes,
        }
    }

    /// `CREATE TABLE` statements in mapping order.
    pub fn create_script(&self) -> fixturebed::Result<Vec<String>> {
        self.classes
            .iter()
            .map(|class| self.create_table(class))
            .collect()
    }

    /// `DROP TABLE` statements in reverse mapping order.
    pub fn drop_script(&self) -> Vec<String> {
        self.classes
            .iter()
            .rev()
            .map(|class| format!("DROP TABLE IF EXISTS {}", quote_ident(&class.table)))
            .collect()
    }

    fn create_table(&self, class: &ClassMapping) -> fixturebed::Result<String> {
        let mut columns = vec![format!(
            "{} INTEGER PRIMARY KEY AUTOINCREMENT",
            quote_ident(&class.id_column)
        )];
        for column in class.columns() {
            let type_name = self.dialect.type_name(&column.sql_type).map_err(|e| {
                HarnessError::schema(format!(
                    "column {}.{}: {}",
                    class.entity, column.name, e
                ))
            })?;
            columns.push(format!("{} {}", quote_ident(&column.name), type_name));
        }
        Ok(format!(
            "CREATE TABLE IF NOT EXISTS {} ({})",
            quote_ident(&class.table),
            columns.join(", ")
        ))
    }

    fn run(&self, script: &[String], show_output: bool, execute: bool) -> fixturebed::Result<()> {
        if show_output {
            for statement in script {
                info!("{}", statement);
            }
        }
        if !execute || script.is_empty() {
            return Ok(());
        }

        let conn = self.provider.get_connection()?;
        let result = script
            .iter()
            .try_for_each(|statement| conn.execute(statement, &[]).map(|_| ()));
        let released = self.provider.close_connection(&conn);
        result?;
        released?;
        debug!(statements = script.len(), "Executed schema script");
        Ok(())
    }
}

impl SchemaExporter for SqliteSchemaExporter {
    fn create_schema(&self, show_output: bool, execute: bool) -> fixturebed::Result<()> {
        let script = self.create_script()?;
        self.run(&script, show_output, execute)
    }

    fn drop_schema(&self, show_output: bool, execute: bool) -> fixturebed::Result<()> {
        self.run(&self.drop_script(), show_output, execute)
    }
}

pub(crate) fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::{ConnectionBudget, SqliteDriverProvider};
    use crate::dialect::SqliteDialect;
    use fixturebed::MappingDocument;

    const DOC: &str = r#"{
        "classes": [
            { "entity": "Order", "table": "orders",
              "properties": [ { "name": "payment", "type": "int64", "kind": "any" } ] },
            { "entity": "Note", "table": "notes",
              "properties": [ { "name": "body", "type": "xml" } ] }
        ]
    }"#;

    fn exporter(classes: Vec<ClassMapping>) -> (tempfile::TempDir, SqliteSchemaExporter) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("schema.db").to_string_lossy().to_string();
        let provider = Arc::new(SqliteDriverProvider::new(path, None, Arc::new(ConnectionBudget::new())));
        (dir, SqliteSchemaExporter::new(provider, Arc::new(SqliteDialect), classes))
    }

    #[test]
    fn test_create_script_expands_any_columns() {
        let doc = MappingDocument::from_json(DOC).unwrap();
        let (_dir, exporter) = exporter(doc.classes[..1].to_vec());

        let script = exporter.create_script().unwrap();
        assert_eq!(
            script,
            vec![
                "CREATE TABLE IF NOT EXISTS \"orders\" (\"id\" INTEGER PRIMARY KEY AUTOINCREMENT, \"payment_type\" TEXT, \"payment_id\" INTEGER)"
                    .to_string()
            ]
        );
        assert_eq!(exporter.drop_script(), vec!["DROP TABLE IF EXISTS \"orders\"".to_string()]);
    }

    #[test]
    fn test_unsupported_column_type_fails_export() {
        let doc = MappingDocument::from_json(DOC).unwrap();
        let (_dir, exporter) = exporter(doc.classes);

        let err = exporter.create_schema(false, true).unwrap_err();
        assert!(matches!(err, HarnessError::Schema(_)), "{err}");
    }

    #[test]
    fn test_create_and_drop_are_repeatable() {
        let doc = MappingDocument::from_json(DOC).unwrap();
        let (_dir, exporter) = exporter(doc.classes[..1].to_vec());

        exporter.create_schema(false, true).unwrap();
        exporter.create_schema(false, true).unwrap();
        exporter.drop_schema(false, true).unwrap();
        exporter.drop_schema(false, true).unwrap();
    }
}
