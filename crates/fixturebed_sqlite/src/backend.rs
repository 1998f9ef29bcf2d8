//! The SQLite [`Backend`].

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use fixturebed::{
    keys, Backend, CapabilityRegistry, Configuration, ConnectionProvider, Dialect, HarnessError,
    MappingSource, ProviderKind, SchemaExporter, SessionFactory, Settings,
};
use tempfile::TempDir;
use tracing::info;
use uuid::Uuid;

use crate::connection::{ConnectionBudget, SqliteDriverProvider};
use crate::dialect::{capability_registry, SqliteDialect, SQLITE_DIALECT};
use crate::error::Result;
use crate::schema::SqliteSchemaExporter;
use crate::session::SqliteSessionFactory;

/// Backend over one SQLite database file.
///
/// Every provider built by the backend shares one connection count, so
/// `connection.max_connections` bounds all connections to the database.
pub struct SqliteBackend {
    path: PathBuf,
    mappings: Arc<dyn MappingSource>,
    registry: CapabilityRegistry,
    properties: BTreeMap<String, String>,
    budget: Arc<ConnectionBudget>,
    // Removes the database directory on drop.
    _dir: Option<TempDir>,
}

impl SqliteBackend {
    /// Backend over a fresh database in its own temporary directory.
    pub fn temporary(mappings: impl MappingSource + 'static) -> Result<Self> {
        let dir = tempfile::Builder::new().prefix("fixturebed-").tempdir()?;
        let path = dir.path().join(format!("{}.db", Uuid::new_v4()));
        let mut backend = Self::open(path, mappings);
        backend._dir = Some(dir);
        Ok(backend)
    }

    /// Backend over the database at `path`, created on first connection.
    pub fn open(path: impl Into<PathBuf>, mappings: impl MappingSource + 'static) -> Self {
        let path = path.into();
        let mut properties = BTreeMap::new();
        properties.insert(keys::DIALECT.to_string(), SQLITE_DIALECT.to_string());
        properties.insert(
            keys::CONNECTION_STRING.to_string(),
            path.to_string_lossy().to_string(),
        );
        properties.insert(
            keys::CONNECTION_PROVIDER.to_string(),
            ProviderKind::Tracking.as_str().to_string(),
        );
        info!(path = %path.display(), "Using SQLite database");

        Self {
            path,
            mappings: Arc::new(mappings),
            registry: capability_registry(),
            properties,
            budget: Arc::new(ConnectionBudget::new()),
            _dir: None,
        }
    }

    /// Override a default property of every configuration built on this
    /// backend.
    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    pub fn database_path(&self) -> &Path {
        &self.path
    }

    /// Connections currently open to the database, across all providers.
    pub fn live_connections(&self) -> usize {
        self.budget.live()
    }

    fn driver(&self, settings: &Settings) -> fixturebed::Result<SqliteDriverProvider> {
        Ok(SqliteDriverProvider::new(
            settings.connection_string()?,
            settings.max_connections()?,
            Arc::clone(&self.budget),
        ))
    }
}

impl Backend for SqliteBackend {
    fn name(&self) -> &str {
        "sqlite"
    }

    fn default_properties(&self) -> BTreeMap<String, String> {
        self.properties.clone()
    }

    fn mapping_source(&self) -> &dyn MappingSource {
        self.mappings.as_ref()
    }

    fn capability_registry(&self) -> &CapabilityRegistry {
        &self.registry
    }

    fn resolve_dialect(&self, settings: &Settings) -> fixturebed::Result<Arc<dyn Dialect>> {
        match settings.dialect_name()? {
            SQLITE_DIALECT => Ok(Arc::new(SqliteDialect)),
            other => Err(HarnessError::Dialect(format!(
                "{} is not available on the sqlite backend",
                other
            ))),
        }
    }

    fn driver_provider(&self, settings: &Settings) -> fixturebed::Result<Arc<dyn ConnectionProvider>> {
        Ok(Arc::new(self.driver(settings)?))
    }

    fn schema_exporter(&self, cfg: &Configuration) -> fixturebed::Result<Box<dyn SchemaExporter>> {
        let provider = self.driver_provider(&cfg.settings())?;
        Ok(Box::new(SqliteSchemaExporter::new(
            provider,
            cfg.dialect()?,
            cfg.class_mappings().to_vec(),
        )))
    }

    fn build_session_factory(&self, cfg: &Configuration) -> fixturebed::Result<Arc<dyn SessionFactory>> {
        Ok(Arc::new(SqliteSessionFactory::build(cfg)?))
    }
}

impl std::fmt::Debug for SqliteBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteBackend")
            .field("path", &self.path)
            .field("live_connections", &self.live_connections())
            .finish()
    }
}
