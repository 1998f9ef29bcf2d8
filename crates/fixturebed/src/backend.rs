//! The seam between the harness and a persistence backend.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::capabilities::CapabilityRegistry;
use crate::config::{Configuration, Settings};
use crate::connection::ConnectionProvider;
use crate::dialect::Dialect;
use crate::error::Result;
use crate::mapping::MappingSource;
use crate::schema::SchemaExporter;
use crate::session::SessionFactory;

/// Everything the harness needs from a backend.
///
/// A [`Configuration`] holds an `Arc<dyn Backend>` and forwards building work
/// to it.
pub trait Backend: Send + Sync {
    fn name(&self) -> &str;

    /// Properties every new configuration starts with.
    fn default_properties(&self) -> BTreeMap<String, String> {
        BTreeMap::new()
    }

    fn mapping_source(&self) -> &dyn MappingSource;

    fn capability_registry(&self) -> &CapabilityRegistry;

    fn resolve_dialect(&self, settings: &Settings) -> Result<Arc<dyn Dialect>>;

    /// Plain (non-tracking) provider for the configured connection string.
    fn driver_provider(&self, settings: &Settings) -> Result<Arc<dyn ConnectionProvider>>;

    fn schema_exporter(&self, cfg: &Configuration) -> Result<Box<dyn SchemaExporter>>;

    fn build_session_factory(&self, cfg: &Configuration) -> Result<Arc<dyn SessionFactory>>;
}
