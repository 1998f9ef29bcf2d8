//! Error types for the harness.

use thiserror::Error;

use crate::dialect::SqlType;

/// Harness operation result type.
pub type Result<T> = std::result::Result<T, HarnessError>;

/// Boxed error used to carry collaborator failures.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Harness errors.
#[derive(Error, Debug)]
pub enum HarnessError {
    /// Fatal suite setup failure. The suite is aborted and no tests run.
    #[error("Error while setting up suite {suite}: {source}")]
    SuiteSetup {
        suite: String,
        #[source]
        source: Box<HarnessError>,
    },

    /// A connection could not be obtained from the provider.
    #[error("Could not open connection to: {target}")]
    ConnectionEstablishment {
        target: String,
        #[source]
        source: Box<HarnessError>,
    },

    /// Ad-hoc statement execution failed (resources were already released).
    #[error("Statement execution failed ({sql}): {source}")]
    StatementExecution {
        sql: String,
        #[source]
        source: Box<HarnessError>,
    },

    /// Invalid or missing configuration property
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Mapping resource could not be resolved
    #[error("Mapping resource not found: {resource} (module {module})")]
    MappingNotFound { module: String, resource: String },

    /// Mapping document is malformed or inconsistent
    #[error("Mapping error: {0}")]
    Mapping(String),

    /// Dialect has no type name for the SQL type
    #[error("Dialect {dialect} does not support SQL type {sql_type}")]
    UnsupportedSqlType { dialect: String, sql_type: SqlType },

    /// Dialect could not be resolved
    #[error("Dialect error: {0}")]
    Dialect(String),

    /// Schema export error
    #[error("Schema export error: {0}")]
    Schema(String),

    /// Session or session factory error
    #[error("Session error: {0}")]
    Session(String),

    /// Query could not be parsed or executed
    #[error("Query error: {0}")]
    Query(String),

    /// Operation not valid in the current lifecycle state
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Error raised by a backend implementation
    #[error("Backend error: {0}")]
    Backend(#[source] BoxError),

    /// Error raised by a fixture hook or test body
    #[error(transparent)]
    Fixture(#[from] anyhow::Error),

    /// IO error (configuration files)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error (mapping documents, configuration files)
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl HarnessError {
    /// Create a configuration error.
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    /// Create a mapping error.
    pub fn mapping(msg: impl Into<String>) -> Self {
        Self::Mapping(msg.into())
    }

    /// Create a schema export error.
    pub fn schema(msg: impl Into<String>) -> Self {
        Self::Schema(msg.into())
    }

    /// Create a session error.
    pub fn session(msg: impl Into<String>) -> Self {
        Self::Session(msg.into())
    }

    /// Create a query error.
    pub fn query(msg: impl Into<String>) -> Self {
        Self::Query(msg.into())
    }

    /// Create an invalid state error.
    pub fn invalid_state(msg: impl Into<String>) -> Self {
        Self::InvalidState(msg.into())
    }

    /// Wrap a backend error.
    pub fn backend(err: impl Into<BoxError>) -> Self {
        Self::Backend(err.into())
    }
}
