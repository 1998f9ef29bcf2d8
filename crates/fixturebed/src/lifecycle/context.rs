//! Per-suite state shared by every test of a suite.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::backend::Backend;
use crate::capabilities::DialectCapabilities;
use crate::config::{default_configuration, Configuration, QueryTranslator};
use crate::dialect::Dialect;
use crate::error::{HarnessError, Result};
use crate::session::{Interceptor, Session, SessionFactory, SessionHandle};
use crate::statement;
use crate::tracker::ConnectionTracker;

/// Configuration, factory, last opened session and tracker of one suite.
///
/// Owned by a single [`TestLifecycle`](super::TestLifecycle); tests receive it
/// mutably so that opening a session can be recorded.
pub struct SuiteContext {
    backend: Arc<dyn Backend>,
    configuration: Option<Configuration>,
    dialect: Option<Arc<dyn Dialect>>,
    capabilities: Option<DialectCapabilities>,
    factory: Option<Arc<dyn SessionFactory>>,
    last_opened_session: Option<SessionHandle>,
    tracker: Option<Arc<ConnectionTracker>>,
}

impl SuiteContext {
    pub(crate) fn new(backend: Arc<dyn Backend>) -> Self {
        Self {
            backend,
            configuration: None,
            dialect: None,
            capabilities: None,
            factory: None,
            last_opened_session: None,
            tracker: None,
        }
    }

    pub fn backend(&self) -> &Arc<dyn Backend> {
        &self.backend
    }

    pub fn configuration(&self) -> Result<&Configuration> {
        self.configuration
            .as_ref()
            .ok_or_else(|| HarnessError::invalid_state("suite is not configured"))
    }

    pub fn dialect(&self) -> Result<&Arc<dyn Dialect>> {
        self.dialect
            .as_ref()
            .ok_or_else(|| HarnessError::invalid_state("dialect not resolved"))
    }

    /// Capabilities of the suite's dialect, resolved once at configuration.
    pub fn capabilities(&self) -> Result<&DialectCapabilities> {
        self.capabilities
            .as_ref()
            .ok_or_else(|| HarnessError::invalid_state("dialect not resolved"))
    }

    pub fn factory(&self) -> Result<&Arc<dyn SessionFactory>> {
        self.factory
            .as_ref()
            .ok_or_else(|| HarnessError::invalid_state("session factory not built"))
    }

    /// The tracker, when the factory runs on the tracking provider.
    pub fn tracker(&self) -> Option<&Arc<ConnectionTracker>> {
        self.tracker.as_ref()
    }

    pub fn last_opened_session(&self) -> Option<&SessionHandle> {
        self.last_opened_session.as_ref()
    }

    /// Open a session and remember it as the last opened one.
    ///
    /// Only the most recent session is checked after the test; opening another
    /// one replaces the reference.
    pub fn open_session(&mut self) -> Result<SessionHandle> {
        let session = self.factory()?.open_session()?;
        self.last_opened_session = Some(Arc::clone(&session));
        Ok(session)
    }

    pub fn open_session_with(&mut self, interceptor: Arc<dyn Interceptor>) -> Result<SessionHandle> {
        let session = self.factory()?.open_session_with(interceptor)?;
        self.last_opened_session = Some(Arc::clone(&session));
        Ok(session)
    }

    pub fn query_translator(&self) -> Result<QueryTranslator> {
        self.factory()?.settings().query_translator()
    }

    pub fn is_ast_translator(&self) -> bool {
        matches!(self.query_translator(), Ok(QueryTranslator::Ast))
    }

    pub fn is_classic_translator(&self) -> bool {
        matches!(self.query_translator(), Ok(QueryTranslator::Classic))
    }

    /// Execute `sql` in its own transaction on a fresh provider.
    ///
    /// Works before the suite is configured by falling back to the default
    /// configuration.
    pub fn execute_statement(&self, sql: &str) -> Result<u64> {
        let provider = match &self.configuration {
            Some(cfg) => cfg.new_connection_provider()?,
            None => default_configuration(Arc::clone(&self.backend))?.new_connection_provider()?,
        };
        statement::execute_statement(provider, sql)
    }

    /// Execute `sql` on the live connection of `session`.
    pub fn execute_in_session(&self, session: &dyn Session, sql: &str) -> Result<u64> {
        statement::execute_in_session(session, sql)
    }

    pub(crate) fn set_configuration(&mut self, cfg: Configuration) {
        self.configuration = Some(cfg);
    }

    pub(crate) fn set_dialect(&mut self, dialect: Arc<dyn Dialect>) {
        let capabilities = self
            .backend
            .capability_registry()
            .resolve(Arc::clone(&dialect));
        self.dialect = Some(dialect);
        self.capabilities = Some(capabilities);
    }

    /// Store the factory and capture its tracker, if any.
    pub(crate) fn set_factory(&mut self, factory: Arc<dyn SessionFactory>) {
        self.tracker = factory.connection_provider().tracking();
        if self.tracker.is_none() {
            debug!("Factory provider is not tracking; connection leak checks disabled");
        }
        self.factory = Some(factory);
    }

    /// Close the factory and forget everything.
    pub(crate) fn cleanup(&mut self) {
        if let Some(factory) = self.factory.take() {
            if !factory.is_closed() {
                if let Err(e) = factory.close() {
                    warn!("Failed to close session factory: {}", e);
                }
            }
        }
        self.tracker = None;
        self.last_opened_session = None;
        self.capabilities = None;
        self.dialect = None;
        self.configuration = None;
    }
}
