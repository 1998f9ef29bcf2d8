//! Fixturebed: suite lifecycle and leak detection for persistence tests
//!
//! A suite ([`Fixture`]) declares the mappings it needs. [`TestLifecycle`]
//! builds a configuration from them, creates the schema, builds a session
//! factory and then runs each [`TestCase`]. After every test it checks that
//! the test closed its session, left the database empty and released every
//! connection; each violation is repaired and reported as a test failure.
//!
//! Persistence itself is behind the [`Backend`] trait. `fixturebed_sqlite`
//! provides the reference backend.
//!
//! # Usage
//!
//! ```rust,ignore
//! use fixturebed::{Fixture, MappingSet, TestCase, TestLifecycle};
//!
//! struct Orders;
//!
//! impl Fixture for Orders {
//!     fn mappings(&self) -> MappingSet {
//!         MappingSet::for_issue("orders")
//!     }
//! }
//!
//! let mut lifecycle = TestLifecycle::new(backend, Orders);
//! let report = lifecycle.run(&[TestCase::new("saves_order", saves_order)])?;
//! assert!(report.is_success(), "{report}");
//! ```

mod backend;
mod capabilities;
mod config;
mod connection;
mod dialect;
mod error;
mod lifecycle;
mod mapping;
mod schema;
mod session;
mod statement;
mod tracker;
mod value;

pub use backend::Backend;
pub use capabilities::{CapabilityConstructor, CapabilityFlags, CapabilityRegistry, DialectCapabilities};
pub use config::{
    default_configuration, default_configuration_file_path, keys, Configuration, QueryTranslator,
    Settings, CONFIG_FILE_ENV, DEFAULT_CONFIG_FILE_NAME,
};
pub use connection::{
    provider_from_settings, Connection, ConnectionHandle, ConnectionId, ConnectionProvider,
    ProviderKind,
};
pub use dialect::{Dialect, SqlType};
pub use error::{BoxError, HarnessError, Result};
pub use lifecycle::{
    apply_cache_settings, CleanlinessReport, Fixture, LifecycleState, Requirement, SuiteContext,
    SuiteReport, SuiteStatus, TestBody, TestCase, TestLifecycle, TestOutcome, TestResult,
};
pub use mapping::{
    CacheStrategy, ClassMapping, CollectionMapping, ColumnDef, MappingCatalog, MappingDocument,
    MappingSet, MappingSource, PropertyKind, PropertyMapping, DEFAULT_MAPPINGS_MODULE,
};
pub use schema::SchemaExporter;
pub use session::{Interceptor, Session, SessionFactory, SessionHandle, ANY_ENTITY_QUERY};
pub use statement::{execute_in_session, execute_statement};
pub use tracker::ConnectionTracker;
pub use value::{FromValue, Record, Row, Value};
