//! Suite configuration: properties, mappings and cache settings.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Deserialize;
use tracing::{debug, info};

use crate::backend::Backend;
use crate::connection::{provider_from_settings, ConnectionProvider, ProviderKind};
use crate::dialect::Dialect;
use crate::error::{HarnessError, Result};
use crate::mapping::{CacheStrategy, ClassMapping};
use crate::schema::SchemaExporter;
use crate::session::SessionFactory;

/// Well-known property keys.
pub mod keys {
    /// Dialect identifier, e.g. `SqliteDialect`.
    pub const DIALECT: &str = "dialect";
    /// `driver` or `tracking`.
    pub const CONNECTION_PROVIDER: &str = "connection.provider";
    pub const CONNECTION_STRING: &str = "connection.connection_string";
    pub const MAX_CONNECTIONS: &str = "connection.max_connections";
    /// `ast` or `classic`.
    pub const QUERY_TRANSLATOR: &str = "query.translator";
    pub const SHOW_SQL: &str = "show_sql";
}

/// Environment variable naming an explicit configuration file.
pub const CONFIG_FILE_ENV: &str = "FIXTUREBED_CONFIG";

/// File looked up in the working directory when no override is set.
pub const DEFAULT_CONFIG_FILE_NAME: &str = "fixturebed.cfg.json";

/// Query-translation strategy of a built factory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryTranslator {
    Ast,
    Classic,
}

impl QueryTranslator {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "ast" | "antlr" => Some(QueryTranslator::Ast),
            "classic" => Some(QueryTranslator::Classic),
            _ => None,
        }
    }
}

impl fmt::Display for QueryTranslator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueryTranslator::Ast => write!(f, "ast"),
            QueryTranslator::Classic => write!(f, "classic"),
        }
    }
}

/// Immutable snapshot of configuration properties.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Settings {
    properties: BTreeMap<String, String>,
}

impl Settings {
    pub fn new(properties: BTreeMap<String, String>) -> Self {
        Self { properties }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.properties.get(key).map(String::as_str)
    }

    pub fn properties(&self) -> &BTreeMap<String, String> {
        &self.properties
    }

    pub fn dialect_name(&self) -> Result<&str> {
        self.get(keys::DIALECT)
            .ok_or_else(|| HarnessError::configuration("no dialect configured"))
    }

    pub fn connection_string(&self) -> Result<&str> {
        self.get(keys::CONNECTION_STRING)
            .ok_or_else(|| HarnessError::configuration("no connection string configured"))
    }

    /// Provider kind; tracking when unset.
    pub fn provider_kind(&self) -> Result<ProviderKind> {
        match self.get(keys::CONNECTION_PROVIDER) {
            None => Ok(ProviderKind::Tracking),
            Some(raw) => ProviderKind::parse(raw).ok_or_else(|| {
                HarnessError::configuration(format!("unknown connection provider '{}'", raw))
            }),
        }
    }

    /// Query translator; AST when unset.
    pub fn query_translator(&self) -> Result<QueryTranslator> {
        match self.get(keys::QUERY_TRANSLATOR) {
            None => Ok(QueryTranslator::Ast),
            Some(raw) => QueryTranslator::parse(raw).ok_or_else(|| {
                HarnessError::configuration(format!("unknown query translator '{}'", raw))
            }),
        }
    }

    pub fn max_connections(&self) -> Result<Option<usize>> {
        match self.get(keys::MAX_CONNECTIONS) {
            None => Ok(None),
            Some(raw) => raw.trim().parse::<usize>().map(Some).map_err(|_| {
                HarnessError::configuration(format!("invalid max connections '{}'", raw))
            }),
        }
    }

    pub fn show_sql(&self) -> bool {
        matches!(self.get(keys::SHOW_SQL), Some("true") | Some("1"))
    }
}

#[derive(Debug, Deserialize)]
struct ConfigFile {
    #[serde(default)]
    properties: BTreeMap<String, String>,
}

/// Mutable configuration for one suite.
///
/// Holds properties and class mappings and delegates building work to the
/// [`Backend`] it was created with.
pub struct Configuration {
    backend: Arc<dyn Backend>,
    properties: BTreeMap<String, String>,
    class_mappings: Vec<ClassMapping>,
}

impl Configuration {
    /// New configuration seeded with the backend's default properties.
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        let properties = backend.default_properties();
        Self {
            backend,
            properties,
            class_mappings: Vec::new(),
        }
    }

    pub fn backend(&self) -> &Arc<dyn Backend> {
        &self.backend
    }

    /// Merge properties from a JSON configuration file.
    pub fn configure_from_file(&mut self, path: impl AsRef<Path>) -> Result<&mut Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        let file: ConfigFile = serde_json::from_str(&text)?;
        debug!(path = %path.display(), count = file.properties.len(), "Applying configuration file");
        self.properties.extend(file.properties);
        Ok(self)
    }

    pub fn set_property(&mut self, key: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    pub fn property(&self, key: &str) -> Option<&str> {
        self.properties.get(key).map(String::as_str)
    }

    /// Snapshot of the current properties.
    pub fn settings(&self) -> Settings {
        Settings::new(self.properties.clone())
    }

    /// Load a mapping resource from `module` and add its classes.
    pub fn add_resource(&mut self, resource: &str, module: &str) -> Result<&mut Self> {
        let document = self.backend.mapping_source().load(module, resource)?;
        for class in document.classes {
            if self.class_mapping(&class.entity).is_some() {
                return Err(HarnessError::mapping(format!(
                    "entity {} is mapped twice (resource {})",
                    class.entity, resource
                )));
            }
            self.class_mappings.push(class);
        }
        debug!(resource, module, "Added mapping resource");
        Ok(self)
    }

    pub fn class_mappings(&self) -> &[ClassMapping] {
        &self.class_mappings
    }

    pub fn class_mapping(&self, entity: &str) -> Option<&ClassMapping> {
        self.class_mappings.iter().find(|c| c.entity == entity)
    }

    /// Whether `entity` takes part in an inheritance hierarchy.
    pub fn is_inherited(&self, entity: &str) -> bool {
        self.class_mappings
            .iter()
            .any(|c| c.entity == entity && c.extends.is_some())
            || self
                .class_mappings
                .iter()
                .any(|c| c.extends.as_deref() == Some(entity))
    }

    /// Collection roles across all mapped classes.
    pub fn collection_roles(&self) -> Vec<String> {
        self.class_mappings
            .iter()
            .flat_map(|class| {
                class
                    .collections
                    .iter()
                    .map(move |coll| class.collection_role(coll))
            })
            .collect()
    }

    pub fn set_cache_concurrency_strategy(
        &mut self,
        entity: &str,
        strategy: CacheStrategy,
    ) -> Result<()> {
        let class = self
            .class_mappings
            .iter_mut()
            .find(|c| c.entity == entity)
            .ok_or_else(|| HarnessError::mapping(format!("unknown entity {}", entity)))?;
        class.cache_strategy = Some(strategy);
        Ok(())
    }

    pub fn set_collection_cache_concurrency_strategy(
        &mut self,
        role: &str,
        strategy: CacheStrategy,
    ) -> Result<()> {
        let (entity, name) = role
            .split_once('.')
            .ok_or_else(|| HarnessError::mapping(format!("invalid collection role {}", role)))?;
        let collection = self
            .class_mappings
            .iter_mut()
            .filter(|c| c.entity == entity)
            .flat_map(|c| c.collections.iter_mut())
            .find(|coll| coll.name == name)
            .ok_or_else(|| HarnessError::mapping(format!("unknown collection role {}", role)))?;
        collection.cache_strategy = Some(strategy);
        Ok(())
    }

    pub fn dialect(&self) -> Result<Arc<dyn Dialect>> {
        self.backend.resolve_dialect(&self.settings())
    }

    /// Fresh connection provider, tracking or not per `connection.provider`.
    pub fn new_connection_provider(&self) -> Result<Arc<dyn ConnectionProvider>> {
        let settings = self.settings();
        let driver = self.backend.driver_provider(&settings)?;
        provider_from_settings(&settings, driver)
    }

    pub fn schema_export(&self) -> Result<Box<dyn SchemaExporter>> {
        self.backend.schema_exporter(self)
    }

    pub fn build_session_factory(&self) -> Result<Arc<dyn SessionFactory>> {
        let factory = self.backend.build_session_factory(self)?;
        info!(
            backend = self.backend.name(),
            classes = factory.mapped_class_count(),
            "Built session factory"
        );
        Ok(factory)
    }
}

impl fmt::Debug for Configuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Configuration")
            .field("backend", &self.backend.name())
            .field("properties", &self.properties)
            .field("classes", &self.class_mappings.len())
            .finish()
    }
}

/// Configuration file used by default, if any.
///
/// `FIXTUREBED_CONFIG` wins when it names an existing file; otherwise
/// `fixturebed.cfg.json` in the working directory.
pub fn default_configuration_file_path() -> Option<PathBuf> {
    if let Ok(path) = std::env::var(CONFIG_FILE_ENV) {
        let path = PathBuf::from(path);
        if path.is_file() {
            return Some(path);
        }
    }
    let local = std::env::current_dir().ok()?.join(DEFAULT_CONFIG_FILE_NAME);
    local.is_file().then_some(local)
}

/// Standard configuration: backend defaults merged with the default file.
pub fn default_configuration(backend: Arc<dyn Backend>) -> Result<Configuration> {
    let mut cfg = Configuration::new(backend);
    if let Some(path) = default_configuration_file_path() {
        cfg.configure_from_file(path)?;
    }
    Ok(cfg)
}
