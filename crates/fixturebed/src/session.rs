//! Sessions and session factories.

use std::fmt;
use std::sync::Arc;

use crate::config::Settings;
use crate::connection::{ConnectionHandle, ConnectionProvider};
use crate::error::Result;
use crate::value::{Record, Row, Value};

/// Query text matching every row of every mapped entity.
pub const ANY_ENTITY_QUERY: &str = "from object";

/// Hooks a session calls around writes.
pub trait Interceptor: Send + Sync {
    /// Called before an entity is inserted; may rewrite the record.
    fn on_save(&self, _entity: &str, _record: &mut Record) {}

    /// Called after rows were deleted.
    fn on_delete(&self, _entity: &str, _rows: u64) {}
}

/// A unit-of-work handle holding one connection.
pub trait Session: Send + Sync + fmt::Debug {
    fn is_open(&self) -> bool;

    /// Close the session, returning its connection to the provider.
    fn close(&self) -> Result<()>;

    /// The live connection this session runs on.
    fn connection(&self) -> Result<ConnectionHandle>;

    /// Insert a new entity row, returning its generated id.
    fn save(&self, entity: &str, record: Record) -> Result<i64>;

    fn get(&self, entity: &str, id: i64) -> Result<Option<Row>>;

    /// Rows of `entity` whose columns equal the given values.
    fn find(&self, entity: &str, criteria: &[(&str, Value)]) -> Result<Vec<Row>>;

    /// Run a `from <Entity>` query. `from object` spans every mapped entity.
    fn create_query(&self, text: &str) -> Result<Vec<Row>>;

    /// Delete every row matched by a query, returning the count.
    fn delete(&self, query: &str) -> Result<u64>;
}

pub type SessionHandle = Arc<dyn Session>;

/// Factory for sessions over one configuration.
pub trait SessionFactory: Send + Sync {
    fn open_session(&self) -> Result<SessionHandle>;

    fn open_session_with(&self, interceptor: Arc<dyn Interceptor>) -> Result<SessionHandle>;

    fn close(&self) -> Result<()>;

    fn is_closed(&self) -> bool;

    fn mapped_class_count(&self) -> usize;

    /// Settings the factory was built with.
    fn settings(&self) -> &Settings;

    fn connection_provider(&self) -> Arc<dyn ConnectionProvider>;
}
