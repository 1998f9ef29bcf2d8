//! Mapping documents, mapping sets and the catalog that resolves them.
//!
//! A mapping document is JSON:
//!
//! ```json
//! {
//!   "classes": [
//!     {
//!       "entity": "Order",
//!       "table": "orders",
//!       "properties": [
//!         { "name": "payment", "type": "int64", "kind": "any" }
//!       ]
//!     }
//!   ]
//! }
//! ```

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::dialect::SqlType;
use crate::error::{HarnessError, Result};

/// Module mapping resources resolve against when a suite does not say otherwise.
pub const DEFAULT_MAPPINGS_MODULE: &str = "fixturebed_domain";

/// Second-level cache concurrency strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CacheStrategy {
    ReadOnly,
    ReadWrite,
    NonstrictReadWrite,
    Transactional,
}

impl CacheStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            CacheStrategy::ReadOnly => "read-only",
            CacheStrategy::ReadWrite => "read-write",
            CacheStrategy::NonstrictReadWrite => "nonstrict-read-write",
            CacheStrategy::Transactional => "transactional",
        }
    }
}

impl fmt::Display for CacheStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a property is stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PropertyKind {
    /// One column holding a value of the property's SQL type.
    #[default]
    Simple,
    /// Foreign key to another mapped class (`<column>` integer column).
    ManyToOne,
    /// Polymorphic reference: `<column>_type` names the entity and
    /// `<column>_id` holds its id.
    Any,
}

/// A physical column derived from a property.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnDef {
    pub name: String,
    pub sql_type: SqlType,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertyMapping {
    pub name: String,
    #[serde(default)]
    pub column: Option<String>,
    #[serde(rename = "type")]
    pub sql_type: SqlType,
    #[serde(default)]
    pub kind: PropertyKind,
}

impl PropertyMapping {
    pub fn column_name(&self) -> &str {
        self.column.as_deref().unwrap_or(&self.name)
    }

    pub fn is_simple(&self) -> bool {
        self.kind == PropertyKind::Simple
    }

    pub fn columns(&self) -> Vec<ColumnDef> {
        let base = self.column_name();
        match self.kind {
            PropertyKind::Simple => vec![ColumnDef {
                name: base.to_string(),
                sql_type: self.sql_type,
            }],
            PropertyKind::ManyToOne => vec![ColumnDef {
                name: base.to_string(),
                sql_type: SqlType::Int64,
            }],
            PropertyKind::Any => vec![
                ColumnDef {
                    name: format!("{}_type", base),
                    sql_type: SqlType::String,
                },
                ColumnDef {
                    name: format!("{}_id", base),
                    sql_type: SqlType::Int64,
                },
            ],
        }
    }
}

/// Inverse one-to-many collection (no column on the owning table).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectionMapping {
    pub name: String,
    /// Element entity.
    pub entity: String,
    /// Column on the element table referencing the owner.
    pub key: String,
    #[serde(skip)]
    pub cache_strategy: Option<CacheStrategy>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassMapping {
    pub entity: String,
    pub table: String,
    /// Parent entity when this class is a subclass.
    #[serde(default)]
    pub extends: Option<String>,
    #[serde(default = "default_id_column")]
    pub id_column: String,
    #[serde(default)]
    pub properties: Vec<PropertyMapping>,
    #[serde(default)]
    pub collections: Vec<CollectionMapping>,
    #[serde(skip)]
    pub cache_strategy: Option<CacheStrategy>,
}

fn default_id_column() -> String {
    "id".to_string()
}

impl ClassMapping {
    /// Whether any simple property has a large-binary type.
    pub fn has_lob(&self) -> bool {
        self.properties
            .iter()
            .any(|p| p.is_simple() && p.sql_type.is_lob())
    }

    /// Physical columns, excluding the id column.
    pub fn columns(&self) -> Vec<ColumnDef> {
        self.properties.iter().flat_map(|p| p.columns()).collect()
    }

    pub fn has_column(&self, name: &str) -> bool {
        name == self.id_column || self.columns().iter().any(|c| c.name == name)
    }

    /// Collection role, `<Entity>.<collection>`.
    pub fn collection_role(&self, collection: &CollectionMapping) -> String {
        format!("{}.{}", self.entity, collection.name)
    }
}

/// A parsed mapping resource.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MappingDocument {
    #[serde(default)]
    pub classes: Vec<ClassMapping>,
}

impl MappingDocument {
    pub fn from_json(text: &str) -> Result<Self> {
        let doc: MappingDocument = serde_json::from_str(text)?;
        doc.validate()?;
        Ok(doc)
    }

    fn validate(&self) -> Result<()> {
        for class in &self.classes {
            if class.entity.trim().is_empty() || class.table.trim().is_empty() {
                return Err(HarnessError::mapping("class mapping needs an entity and a table"));
            }
            let mut seen = std::collections::HashSet::new();
            seen.insert(class.id_column.clone());
            for column in class.columns() {
                if !seen.insert(column.name.clone()) {
                    return Err(HarnessError::mapping(format!(
                        "duplicate column '{}' in entity {}",
                        column.name, class.entity
                    )));
                }
            }
        }
        Ok(())
    }
}

/// Ordered mapping resources plus the module they resolve against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MappingSet {
    module: String,
    resources: Vec<String>,
}

impl MappingSet {
    pub fn new<I, S>(module: impl Into<String>, resources: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            module: module.into(),
            resources: resources.into_iter().map(Into::into).collect(),
        }
    }

    /// Empty set in the default module.
    pub fn empty() -> Self {
        Self::new(DEFAULT_MAPPINGS_MODULE, Vec::<String>::new())
    }

    /// Single-resource set for an issue reproduction suite:
    /// `issues.<id>.mappings.json` in the default module.
    pub fn for_issue(issue: &str) -> Self {
        Self::new(
            DEFAULT_MAPPINGS_MODULE,
            [format!("issues.{}.mappings.json", issue)],
        )
    }

    pub fn module(&self) -> &str {
        &self.module
    }

    pub fn resources(&self) -> &[String] {
        &self.resources
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }
}

/// Loader for mapping resources.
pub trait MappingSource: Send + Sync {
    fn load(&self, module: &str, resource: &str) -> Result<MappingDocument>;
}

/// In-memory mapping source populated with JSON documents at startup.
#[derive(Debug, Clone, Default)]
pub struct MappingCatalog {
    documents: HashMap<(String, String), MappingDocument>,
}

impl MappingCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse and register a JSON mapping document.
    pub fn register_json(
        &mut self,
        module: impl Into<String>,
        resource: impl Into<String>,
        json: &str,
    ) -> Result<()> {
        let document = MappingDocument::from_json(json)?;
        self.register(module, resource, document);
        Ok(())
    }

    pub fn register(
        &mut self,
        module: impl Into<String>,
        resource: impl Into<String>,
        document: MappingDocument,
    ) {
        self.documents
            .insert((module.into(), resource.into()), document);
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }
}

impl MappingSource for MappingCatalog {
    fn load(&self, module: &str, resource: &str) -> Result<MappingDocument> {
        self.documents
            .get(&(module.to_string(), resource.to_string()))
            .cloned()
            .ok_or_else(|| HarnessError::MappingNotFound {
                module: module.to_string(),
                resource: resource.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ORDERS: &str = r#"{
        "classes": [
            {
                "entity": "Order",
                "table": "orders",
                "properties": [
                    { "name": "payment", "type": "int64", "kind": "any" },
                    { "name": "note", "column": "order_note", "type": "string" }
                ]
            },
            {
                "entity": "Attachment",
                "table": "attachments",
                "properties": [ { "name": "content", "type": "binary_blob" } ],
                "collections": [ { "name": "orders", "entity": "Order", "key": "attachment_id" } ]
            }
        ]
    }"#;

    #[test]
    fn test_parse_document_columns() {
        let doc = MappingDocument::from_json(ORDERS).unwrap();
        let order = &doc.classes[0];
        let names: Vec<String> = order.columns().into_iter().map(|c| c.name).collect();
        assert_eq!(names, vec!["payment_type", "payment_id", "order_note"]);
        assert!(order.has_column("id"));
        assert!(!order.has_lob());

        let attachment = &doc.classes[1];
        assert!(attachment.has_lob());
        assert_eq!(
            attachment.collection_role(&attachment.collections[0]),
            "Attachment.orders"
        );
    }

    #[test]
    fn test_duplicate_columns_rejected() {
        let json = r#"{"classes": [{"entity": "A", "table": "a", "properties": [
            {"name": "x", "type": "int32"}, {"name": "y", "column": "x", "type": "int32"}
        ]}]}"#;
        assert!(matches!(
            MappingDocument::from_json(json),
            Err(HarnessError::Mapping(_))
        ));
    }

    #[test]
    fn test_catalog_lookup() {
        let mut catalog = MappingCatalog::new();
        catalog
            .register_json("fixturebed_domain", "orders.json", ORDERS)
            .unwrap();

        let doc = catalog.load("fixturebed_domain", "orders.json").unwrap();
        assert_eq!(doc.classes.len(), 2);

        let missing = catalog.load("other_module", "orders.json");
        assert!(matches!(missing, Err(HarnessError::MappingNotFound { .. })));
    }

    #[test]
    fn test_issue_mapping_set() {
        let set = MappingSet::for_issue("nh1234");
        assert_eq!(set.module(), DEFAULT_MAPPINGS_MODULE);
        assert_eq!(set.resources(), ["issues.nh1234.mappings.json".to_string()]);
    }

    #[test]
    fn test_cache_strategy_names() {
        assert_eq!(CacheStrategy::NonstrictReadWrite.to_string(), "nonstrict-read-write");
        let parsed: CacheStrategy = serde_json::from_str("\"read-only\"").unwrap();
        assert_eq!(parsed, CacheStrategy::ReadOnly);
    }
}
