//! SQLite reference backend for fixturebed
//!
//! Implements every collaborator the harness needs (dialect, connection
//! provider, schema export, sessions) over an embedded SQLite database file.
//! Each [`SqliteBackend::temporary`] backend gets its own database, so suites
//! on different backends can run in parallel.
//!
//! # Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use fixturebed::TestLifecycle;
//! use fixturebed_sqlite::SqliteBackend;
//!
//! let backend = Arc::new(SqliteBackend::temporary(catalog)?);
//! let mut lifecycle = TestLifecycle::new(backend, MySuite::default());
//! let report = lifecycle.run(&MySuite::tests())?;
//! ```

mod backend;
mod connection;
mod dialect;
mod error;
mod schema;
mod session;

pub use backend::SqliteBackend;
pub use connection::{ConnectionBudget, SqliteConnection, SqliteDriverProvider};
pub use dialect::{capability_registry, sqlite_capabilities, SqliteDialect, SQLITE_DIALECT};
pub use error::{Result, SqliteError};
pub use schema::SqliteSchemaExporter;
pub use session::{SqliteSession, SqliteSessionFactory};
