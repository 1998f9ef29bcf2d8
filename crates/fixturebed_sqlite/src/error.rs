//! Error types for the SQLite backend.

use fixturebed::{ConnectionId, HarnessError};
use thiserror::Error;

/// SQLite backend result type.
pub type Result<T> = std::result::Result<T, SqliteError>;

/// SQLite backend errors.
#[derive(Error, Debug)]
pub enum SqliteError {
    /// Error reported by SQLite
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// IO error (temporary database directory)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Every allowed connection is in use
    #[error("Connection limit of {limit} reached ({live} open)")]
    Exhausted { limit: usize, live: usize },

    /// Connection was already closed
    #[error("Connection {0} is closed")]
    Closed(ConnectionId),
}

impl From<SqliteError> for HarnessError {
    fn from(err: SqliteError) -> Self {
        HarnessError::backend(err)
    }
}
